//! 扩展层级：`extended.search <pattern> [path]`，在工作目录内递归 grep

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde_json::Value;

use crate::core::state::ToolTier;
use crate::env::Environment;
use crate::tools::args::{shell_quote, str_arg, take_tokens};
use crate::tools::schema::parameters_for;
use crate::tools::shell::format_command_output;
use crate::tools::{Tool, ToolError};

#[allow(dead_code)]
#[derive(JsonSchema)]
struct SearchArgs {
    /// 正则（grep -E 语法）
    pattern: String,
    /// 搜索起点，默认当前目录
    path: Option<String>,
}

pub struct SearchTool {
    env: Arc<dyn Environment>,
    timeout: Duration,
}

impl SearchTool {
    pub fn new(env: Arc<dyn Environment>, timeout: Duration) -> Self {
        Self { env, timeout }
    }

    fn command(pattern: &str, path: &str) -> String {
        format!("grep -rnE -- {} {}", shell_quote(pattern), shell_quote(path))
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "extended.search"
    }

    fn description(&self) -> &str {
        "Recursively search files for a pattern, printing file:line matches. Usage: extended.search <pattern> [path]"
    }

    fn tier(&self) -> ToolTier {
        ToolTier::Extended
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<SearchArgs>()
    }

    fn parse_args(&self, raw: &str) -> Value {
        let (tokens, _) = take_tokens(raw, 2);
        let mut args = serde_json::json!({
            "pattern": tokens.first().cloned().unwrap_or_default(),
        });
        if let Some(path) = tokens.get(1) {
            args["path"] = Value::String(path.clone());
        }
        args
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let pattern = str_arg(&args, "pattern").unwrap_or("");
        if pattern.is_empty() {
            return Err(ToolError::InvalidArguments("missing pattern".to_string()));
        }
        let path = str_arg(&args, "path").unwrap_or(".");

        tracing::info!(pattern = %pattern, path = %path, "search tool execute");
        match self.env.execute(&Self::command(pattern, path), self.timeout).await {
            // grep: 1 = 无匹配
            Ok(out) if out.exit_code == 1 && out.output.trim().is_empty() => {
                Ok(format!("No matches for '{pattern}' in {path}"))
            }
            Ok(out) => Ok(format_command_output(&out)),
            Err(e) => ToolError::observe_env("searching", e),
        }
    }
}
