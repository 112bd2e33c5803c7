//! 执行环境：循环对沙箱后端的全部依赖
//!
//! 命令执行、文件读写、会话环境变量、会话创建/重置，每个操作都带显式超时。
//! 非零退出码是数据而不是错误；传输 / 未初始化属于基础设施错误。

pub mod local;
pub mod remote;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use local::LocalEnvironment;
pub use remote::RemoteEnvironment;

/// 命令执行结果：合并后的 stdout + stderr 与退出码
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub output: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvError {
    #[error("environment session not initialized")]
    NotInitialized,

    #[error("{op} timed out after {secs}s")]
    Timeout { op: &'static str, secs: u64 },

    #[error("path escapes sandbox: {0}")]
    PathEscape(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl EnvError {
    /// 工具层无法转成文本观察的错误
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, EnvError::NotInitialized | EnvError::Transport(_))
    }
}

/// 环境协作方契约
#[async_trait]
pub trait Environment: Send + Sync {
    async fn execute(&self, command: &str, timeout: Duration) -> Result<CommandOutput, EnvError>;

    async fn read_file(&self, path: &str, timeout: Duration) -> Result<String, EnvError>;

    /// 写文件，父目录不存在时自动创建
    async fn write_file(&self, path: &str, content: &str, timeout: Duration) -> Result<(), EnvError>;

    /// 设置会话级环境变量（对后续 execute 生效）
    async fn set_env(&self, vars: &BTreeMap<String, String>, timeout: Duration) -> Result<(), EnvError>;

    /// 创建或重置工作会话
    async fn reset_session(&self, timeout: Duration) -> Result<(), EnvError>;
}
