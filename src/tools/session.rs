//! 专家层级：`specialized.session_reset`，丢弃当前会话状态（环境变量等）并重建

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::state::ToolTier;
use crate::env::Environment;
use crate::tools::{Tool, ToolError};

pub struct SessionResetTool {
    env: Arc<dyn Environment>,
    timeout: Duration,
}

impl SessionResetTool {
    pub fn new(env: Arc<dyn Environment>, timeout: Duration) -> Self {
        Self { env, timeout }
    }
}

#[async_trait]
impl Tool for SessionResetTool {
    fn name(&self) -> &str {
        "specialized.session_reset"
    }

    fn description(&self) -> &str {
        "Reset the environment session, dropping variables set earlier. Usage: specialized.session_reset"
    }

    fn tier(&self) -> ToolTier {
        ToolTier::Specialized
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value) -> Result<String, ToolError> {
        tracing::info!("session reset requested by action");
        match self.env.reset_session(self.timeout).await {
            Ok(()) => Ok("Session reset".to_string()),
            Err(e) => ToolError::observe_env("resetting session", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::LocalEnvironment;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_reset_drops_variables() {
        let dir = tempfile::tempdir().unwrap();
        let env = Arc::new(LocalEnvironment::new(dir.path()));
        let t = Duration::from_secs(5);
        env.reset_session(t).await.unwrap();
        let vars = BTreeMap::from([("FOO".to_string(), "bar".to_string())]);
        env.set_env(&vars, t).await.unwrap();

        let tool = SessionResetTool::new(env.clone(), t);
        assert_eq!(tool.execute(Value::Null).await.unwrap(), "Session reset");
        let out = env.execute("echo \"[$FOO]\"", t).await.unwrap();
        assert_eq!(out.output.trim(), "[]");
    }
}
