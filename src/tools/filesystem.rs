//! 文件工具：`file <read|write|append> <path> [content...]`
//!
//! 读写都经由执行环境（沙箱路径校验由环境负责）；读失败等以「Error reading file X: …」形式返回观察。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde_json::Value;

use crate::env::{EnvError, Environment};
use crate::tools::args::{str_arg, take_tokens};
use crate::tools::schema::parameters_for;
use crate::tools::{Tool, ToolError};

#[allow(dead_code)]
#[derive(JsonSchema)]
struct FileArgs {
    /// read / write / append
    op: String,
    /// 相对工作目录的路径
    path: String,
    /// write / append 时写入的内容
    content: Option<String>,
}

pub struct FileTool {
    env: Arc<dyn Environment>,
    timeout: Duration,
}

impl FileTool {
    pub fn new(env: Arc<dyn Environment>, timeout: Duration) -> Self {
        Self { env, timeout }
    }

    async fn read(&self, path: &str) -> Result<String, ToolError> {
        tracing::info!(path = %path, "file tool read");
        match self.env.read_file(path, self.timeout).await {
            Ok(content) if content.is_empty() => Ok(format!("{path} is empty")),
            Ok(content) => Ok(content),
            Err(e) => ToolError::observe_env(&format!("reading file {path}"), e),
        }
    }

    async fn write(&self, path: &str, content: &str) -> Result<String, ToolError> {
        tracing::info!(path = %path, bytes = content.len(), "file tool write");
        match self.env.write_file(path, content, self.timeout).await {
            Ok(()) => Ok(format!("Wrote {} bytes to {path}", content.len())),
            Err(e) => ToolError::observe_env(&format!("writing file {path}"), e),
        }
    }

    async fn append(&self, path: &str, content: &str) -> Result<String, ToolError> {
        let existing = match self.env.read_file(path, self.timeout).await {
            Ok(existing) => existing,
            Err(EnvError::NotFound(_)) => String::new(),
            Err(e) => return ToolError::observe_env(&format!("reading file {path}"), e),
        };
        let mut combined = existing;
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(content);
        match self.env.write_file(path, &combined, self.timeout).await {
            Ok(()) => Ok(format!("Appended {} bytes to {path}", content.len())),
            Err(e) => ToolError::observe_env(&format!("writing file {path}"), e),
        }
    }
}

#[async_trait]
impl Tool for FileTool {
    fn name(&self) -> &str {
        "file"
    }

    fn description(&self) -> &str {
        "Read or write files. Usage: file read <path> | file write <path> <content> | file append <path> <content>"
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<FileArgs>()
    }

    fn parse_args(&self, raw: &str) -> Value {
        let (tokens, rest) = take_tokens(raw, 2);
        let mut args = serde_json::json!({
            "op": tokens.first().map(|s| s.to_lowercase()).unwrap_or_default(),
            "path": tokens.get(1).cloned().unwrap_or_default(),
        });
        if !rest.is_empty() {
            args["content"] = Value::String(rest.to_string());
        }
        args
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let op = str_arg(&args, "op").unwrap_or("");
        let path = str_arg(&args, "path").unwrap_or("");
        if path.is_empty() {
            return Err(ToolError::InvalidArguments("missing path".to_string()));
        }
        let content = str_arg(&args, "content").unwrap_or("");
        match op {
            "read" | "cat" => self.read(path).await,
            "write" => self.write(path, content).await,
            "append" => self.append(path, content).await,
            other => Err(ToolError::InvalidArguments(format!(
                "unknown file operation '{other}' (expected read, write or append)"
            ))),
        }
    }
}
