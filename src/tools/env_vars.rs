//! 环境变量工具：`env KEY=VALUE ...`，写入执行环境的会话变量

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde_json::Value;

use crate::env::Environment;
use crate::tools::args::next_token;
use crate::tools::schema::parameters_for;
use crate::tools::{Tool, ToolError};

#[allow(dead_code)]
#[derive(JsonSchema)]
struct EnvArgs {
    /// 变量名 → 值
    vars: BTreeMap<String, String>,
}

pub struct EnvTool {
    env: Arc<dyn Environment>,
    timeout: Duration,
}

impl EnvTool {
    pub fn new(env: Arc<dyn Environment>, timeout: Duration) -> Self {
        Self { env, timeout }
    }

    fn valid_key(key: &str) -> bool {
        let mut chars = key.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }
}

#[async_trait]
impl Tool for EnvTool {
    fn name(&self) -> &str {
        "env"
    }

    fn description(&self) -> &str {
        "Set environment variables for later commands. Usage: env KEY=VALUE [KEY=VALUE ...]"
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<EnvArgs>()
    }

    fn parse_args(&self, raw: &str) -> Value {
        let mut vars = serde_json::Map::new();
        let mut invalid = Vec::new();
        let mut rest = raw;
        while let Some((token, remaining)) = next_token(rest) {
            rest = remaining;
            match token.split_once('=') {
                Some((k, v)) if Self::valid_key(k) => {
                    vars.insert(k.to_string(), Value::String(v.to_string()));
                }
                _ => invalid.push(Value::String(token)),
            }
        }
        serde_json::json!({ "vars": vars, "invalid": invalid })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        if let Some(bad) = args.get("invalid").and_then(|v| v.as_array()).filter(|a| !a.is_empty()) {
            let names: Vec<&str> = bad.iter().filter_map(|v| v.as_str()).collect();
            return Err(ToolError::InvalidArguments(format!(
                "expected KEY=VALUE, got: {}",
                names.join(", ")
            )));
        }
        let vars: BTreeMap<String, String> = args
            .get("vars")
            .and_then(|v| v.as_object())
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        if vars.is_empty() {
            return Err(ToolError::InvalidArguments("no variables given".to_string()));
        }

        match self.env.set_env(&vars, self.timeout).await {
            Ok(()) => Ok(format!(
                "Set {}",
                vars.keys().cloned().collect::<Vec<_>>().join(", ")
            )),
            Err(e) => ToolError::observe_env("setting environment variables", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::LocalEnvironment;

    #[tokio::test]
    async fn test_sets_vars_visible_to_commands() {
        let dir = tempfile::tempdir().unwrap();
        let env = Arc::new(LocalEnvironment::new(dir.path()));
        env.reset_session(Duration::from_secs(5)).await.unwrap();
        let tool = EnvTool::new(env.clone(), Duration::from_secs(5));

        let out = tool
            .execute(tool.parse_args("MODE=fast 'GREETING=hello there'"))
            .await
            .unwrap();
        assert_eq!(out, "Set GREETING, MODE");
        let echoed = env
            .execute("echo \"$GREETING/$MODE\"", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(echoed.output.trim(), "hello there/fast");
    }

    #[tokio::test]
    async fn test_invalid_pairs_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tool = EnvTool::new(Arc::new(LocalEnvironment::new(dir.path())), Duration::from_secs(1));
        let err = tool.execute(tool.parse_args("1BAD=x novalue")).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(msg) if msg.contains("novalue")));
    }
}
