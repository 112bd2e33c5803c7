//! 核心层：错误与恢复、循环状态、组件装配

pub mod builder;
pub mod error;
pub mod recovery;
pub mod state;

pub use builder::LoopBuilder;
pub use error::{AgentError, RecoveryAction};
pub use recovery::RecoveryEngine;
pub use state::{CompletionReason, LoopContext, LoopState, Phase, RunOutcome, StatusSnapshot, ToolTier};
