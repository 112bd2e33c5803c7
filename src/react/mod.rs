//! 控制层：动作解析、嵌套状态栈、工具层级策略、事件日志与执行循环

pub mod events;
pub mod loop_;
pub mod nested;
pub mod parser;
pub mod tier;

pub use events::{Event, EventKind, EventLog};
pub use loop_::{ExecutionLoop, LoopSettings};
pub use nested::NestedStateStack;
pub use parser::{parse_action, ParsedAction};
pub use tier::{TierDecision, TierPolicy};
