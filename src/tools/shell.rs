//! Shell 工具：在执行环境中运行命令
//!
//! 同时是分发器的兜底工具：未识别的动作整体作为命令交给它。
//! 明显破坏性的子串（rm -rf /、mkfs、fork bomb 等）直接拒绝，以文本观察返回。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde_json::Value;

use crate::env::{CommandOutput, Environment};
use crate::tools::args::str_arg;
use crate::tools::schema::parameters_for;
use crate::tools::{Tool, ToolError};

/// 禁止的子串
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf /",
    "rm -fr /",
    "mkfs",
    "dd if=/dev/zero of=/dev/",
    "> /dev/sd",
    ":(){ :|:& };:", // fork bomb
    "chmod -r 777 /",
];

#[allow(dead_code)]
#[derive(JsonSchema)]
struct ShellArgs {
    /// 要执行的 shell 命令
    command: String,
}

/// 把命令结果格式化为观察文本
pub fn format_command_output(out: &CommandOutput) -> String {
    let body = out.output.trim_end();
    match (out.success(), body.is_empty()) {
        (true, true) => "(no output)".to_string(),
        (true, false) => body.to_string(),
        (false, true) => format!("Exit code {}", out.exit_code),
        (false, false) => format!("Exit code {}\n{}", out.exit_code, body),
    }
}

pub struct ShellTool {
    env: Arc<dyn Environment>,
    timeout: Duration,
}

impl ShellTool {
    pub fn new(env: Arc<dyn Environment>, timeout: Duration) -> Self {
        Self { env, timeout }
    }

    /// 命中的禁止子串；其他执行命令的工具（pipeline）共用这道检查
    pub(crate) fn forbidden_pattern(command: &str) -> Option<&'static str> {
        let lower = command.to_lowercase();
        FORBIDDEN_SUBSTR.iter().copied().find(|p| lower.contains(p))
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run a shell command in the task environment. Usage: shell <command>"
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<ShellArgs>()
    }

    fn parse_args(&self, raw: &str) -> Value {
        serde_json::json!({ "command": raw.trim() })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let command = str_arg(&args, "command").unwrap_or("").trim();
        if command.is_empty() {
            return Err(ToolError::InvalidArguments("empty command".to_string()));
        }
        if let Some(pattern) = Self::forbidden_pattern(command) {
            tracing::warn!(command = %command, pattern = %pattern, "shell command refused");
            return Ok(format!("Refused: command matches forbidden pattern '{pattern}'"));
        }

        tracing::info!(command = %command, "shell tool execute");
        match self.env.execute(command, self.timeout).await {
            Ok(out) => Ok(format_command_output(&out)),
            Err(e) => ToolError::observe_env("executing command", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{EnvError, LocalEnvironment};

    async fn tool() -> (tempfile::TempDir, ShellTool) {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalEnvironment::new(dir.path());
        env.reset_session(Duration::from_secs(5)).await.unwrap();
        (dir, ShellTool::new(Arc::new(env), Duration::from_secs(5)))
    }

    #[test]
    fn test_format_command_output() {
        let ok = CommandOutput { output: "hi\n".into(), exit_code: 0 };
        assert_eq!(format_command_output(&ok), "hi");
        let empty = CommandOutput { output: String::new(), exit_code: 0 };
        assert_eq!(format_command_output(&empty), "(no output)");
        let failed = CommandOutput { output: "boom".into(), exit_code: 2 };
        assert_eq!(format_command_output(&failed), "Exit code 2\nboom");
    }

    #[tokio::test]
    async fn test_runs_command() {
        let (_dir, shell) = tool().await;
        let args = shell.parse_args(" echo hi ");
        assert_eq!(args["command"], "echo hi");
        assert_eq!(shell.execute(args).await.unwrap(), "hi");
    }

    #[tokio::test]
    async fn test_forbidden_pattern_is_observation() {
        let (_dir, shell) = tool().await;
        let out = shell
            .execute(serde_json::json!({ "command": "rm -rf / --no-preserve-root" }))
            .await
            .unwrap();
        assert!(out.starts_with("Refused"));
    }

    #[tokio::test]
    async fn test_uninitialized_environment_is_infrastructure() {
        let dir = tempfile::tempdir().unwrap();
        let shell = ShellTool::new(Arc::new(LocalEnvironment::new(dir.path())), Duration::from_secs(1));
        let err = shell
            .execute(serde_json::json!({ "command": "ls" }))
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::Infrastructure(EnvError::NotInitialized.to_string()));
    }
}
