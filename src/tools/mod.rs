pub mod args;
pub mod dispatcher;
pub mod edit;
pub mod env_vars;
pub mod filesystem;
pub mod http;
pub mod pipeline;
pub mod profile;
pub mod registry;
pub mod schema;
pub mod search;
pub mod session;
pub mod shell;

use std::sync::Arc;
use std::time::Duration;

use crate::env::Environment;

pub use dispatcher::{ActionDispatcher, DispatchOutcome, DispatchStatus};
pub use edit::EditReplaceTool;
pub use env_vars::EnvTool;
pub use filesystem::FileTool;
pub use http::HttpTool;
pub use pipeline::PipelineTool;
pub use profile::ProfileDataTool;
pub use registry::{RegistryError, Tool, ToolDefinition, ToolError, ToolRegistry};
pub use schema::{declarations_json, declarations_prompt};
pub use search::SearchTool;
pub use session::SessionResetTool;
pub use shell::ShellTool;

/// 内置工具全集（三个层级），共享同一执行环境
pub fn builtin_tools(env: Arc<dyn Environment>, timeout: Duration) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ShellTool::new(env.clone(), timeout)),
        Arc::new(FileTool::new(env.clone(), timeout)),
        Arc::new(EditReplaceTool::new(env.clone(), timeout)),
        Arc::new(HttpTool::new(timeout)),
        Arc::new(EnvTool::new(env.clone(), timeout)),
        Arc::new(ProfileDataTool::new(env.clone(), timeout)),
        Arc::new(SearchTool::new(env.clone(), timeout)),
        Arc::new(PipelineTool::new(env.clone(), timeout)),
        Arc::new(SessionResetTool::new(env, timeout)),
    ]
}

/// 注册内置工具；名称冲突时返回错误
pub fn register_builtin_tools(
    registry: &ToolRegistry,
    env: Arc<dyn Environment>,
    timeout: Duration,
) -> Result<(), RegistryError> {
    for tool in builtin_tools(env, timeout) {
        registry.register_arc(tool)?;
    }
    Ok(())
}
