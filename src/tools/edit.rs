//! 精确替换编辑：`edit_replace <path> <old> <new...>`
//!
//! old 为一个词（可用引号包含空格），new 为剩余原文。只替换第一处匹配；未匹配时返回错误观察。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde_json::Value;

use crate::env::Environment;
use crate::tools::args::{str_arg, take_tokens};
use crate::tools::schema::parameters_for;
use crate::tools::{Tool, ToolError};

#[allow(dead_code)]
#[derive(JsonSchema)]
struct EditArgs {
    /// 目标文件
    path: String,
    /// 要被替换的原文（首次出现）
    old: String,
    /// 替换后的文本
    new: String,
}

pub struct EditReplaceTool {
    env: Arc<dyn Environment>,
    timeout: Duration,
}

impl EditReplaceTool {
    pub fn new(env: Arc<dyn Environment>, timeout: Duration) -> Self {
        Self { env, timeout }
    }
}

#[async_trait]
impl Tool for EditReplaceTool {
    fn name(&self) -> &str {
        "edit_replace"
    }

    fn description(&self) -> &str {
        "Replace the first occurrence of <old> with <new> in a file. Usage: edit_replace <path> <old> <new...> (quote <old> if it has spaces)"
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<EditArgs>()
    }

    fn parse_args(&self, raw: &str) -> Value {
        let (tokens, rest) = take_tokens(raw, 2);
        serde_json::json!({
            "path": tokens.first().cloned().unwrap_or_default(),
            "old": tokens.get(1).cloned().unwrap_or_default(),
            "new": rest,
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let path = str_arg(&args, "path").unwrap_or("");
        let old = str_arg(&args, "old").unwrap_or("");
        let new = str_arg(&args, "new").unwrap_or("");
        if path.is_empty() || old.is_empty() {
            return Err(ToolError::InvalidArguments(
                "usage: edit_replace <path> <old> <new...>".to_string(),
            ));
        }

        let content = match self.env.read_file(path, self.timeout).await {
            Ok(c) => c,
            Err(e) => return ToolError::observe_env(&format!("reading file {path}"), e),
        };
        let occurrences = content.matches(old).count();
        if occurrences == 0 {
            return Ok(format!("Error: '{old}' not found in {path}"));
        }
        let updated = content.replacen(old, new, 1);
        let line = content[..content.find(old).unwrap_or(0)].lines().count().max(1);

        tracing::info!(path = %path, line, occurrences, "edit_replace");
        match self.env.write_file(path, &updated, self.timeout).await {
            Ok(()) if occurrences > 1 => Ok(format!(
                "Replaced first of {occurrences} occurrences in {path} (line {line})"
            )),
            Ok(()) => Ok(format!("Replaced 1 occurrence in {path} (line {line})")),
            Err(e) => ToolError::observe_env(&format!("writing file {path}"), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::LocalEnvironment;

    async fn setup(content: &str) -> (tempfile::TempDir, Arc<LocalEnvironment>, EditReplaceTool) {
        let dir = tempfile::tempdir().unwrap();
        let env = Arc::new(LocalEnvironment::new(dir.path()));
        env.reset_session(Duration::from_secs(5)).await.unwrap();
        env.write_file("main.rs", content, Duration::from_secs(5)).await.unwrap();
        let tool = EditReplaceTool::new(env.clone(), Duration::from_secs(5));
        (dir, env, tool)
    }

    #[test]
    fn test_parse_args_quoted_old() {
        let dir = std::env::temp_dir();
        let tool = EditReplaceTool::new(Arc::new(LocalEnvironment::new(dir)), Duration::from_secs(1));
        let args = tool.parse_args("src/lib.rs \"fn old()\" fn new() {}");
        assert_eq!(args["path"], "src/lib.rs");
        assert_eq!(args["old"], "fn old()");
        assert_eq!(args["new"], "fn new() {}");
    }

    #[tokio::test]
    async fn test_replaces_first_occurrence() {
        let (_dir, env, tool) = setup("let a = 1;\nlet a = 1;\n").await;
        let out = tool
            .execute(tool.parse_args("main.rs \"= 1\" = 2"))
            .await
            .unwrap();
        assert!(out.contains("first of 2"), "{out}");
        let content = env.read_file("main.rs", Duration::from_secs(5)).await.unwrap();
        assert_eq!(content, "let a = 2;\nlet a = 1;\n");
    }

    #[tokio::test]
    async fn test_missing_old_text_is_observation() {
        let (_dir, _env, tool) = setup("hello").await;
        let out = tool.execute(tool.parse_args("main.rs absent x")).await.unwrap();
        assert_eq!(out, "Error: 'absent' not found in main.rs");
    }
}
