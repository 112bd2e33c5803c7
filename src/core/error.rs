//! 循环错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：相位处理器返回 AgentError，error_handling 相位据此决定 Fallback 或 Abort。

use thiserror::Error;

use crate::env::EnvError;
use crate::llm::LlmError;
use crate::tools::RegistryError;

/// 执行循环中可能出现的错误（分发、工具超时、基础设施、生命周期）
///
/// 解析失败不在此列：无法解析的模型输出按空动作继续。
#[derive(Error, Debug)]
pub enum AgentError {
    /// 工具名未注册且 shell 兜底也不可用
    #[error("Dispatch failed: {0}")]
    DispatchFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 环境未初始化、注册表缺失、传输失败等，一律致命
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),

    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("already running")]
    AlreadyRunning,

    #[error("not running")]
    NotRunning,

    #[error("Nested state depth exceeded (max {max})")]
    NestedDepthExceeded { max: usize },

    #[error("Nested state stack is empty")]
    NestedStackEmpty,

    #[error("Total execution timeout exceeded after {0}s")]
    TotalTimeout(u64),

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl From<EnvError> for AgentError {
    fn from(err: EnvError) -> Self {
        match err {
            EnvError::Timeout { op, secs } => {
                AgentError::ToolTimeout(format!("environment {op} after {secs}s"))
            }
            other => AgentError::Infrastructure(other.to_string()),
        }
    }
}

/// 恢复引擎根据错误给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 进入 fallback_processing，标记 using_fallback 后回到 execution_phase
    Fallback,
    /// 放弃本次运行：state_cleanup → idle，任务记为失败
    Abort,
}
