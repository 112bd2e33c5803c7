//! 动作分发器
//!
//! 把动作字符串拆成「工具名 + 剩余参数」，按工具自己的 parse_args 构造参数后在超时内执行。
//! 未注册的名字整体交给 shell 工具（兜底，而非错误）；超时、参数错误、层级不足都以文本观察返回，
//! 只有 shell 兜底缺失或工具报告基础设施失败才是硬错误。每次调用输出一条 JSON 审计日志。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;

use crate::core::state::ToolTier;
use crate::core::AgentError;
use crate::tools::{Tool, ToolDefinition, ToolError, ToolRegistry};

pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 16 * 1024;
pub const TRUNCATION_MARKER: &str = "\n...[output truncated]";
/// 未识别工具名时的兜底工具
pub const FALLBACK_TOOL: &str = "shell";

const NOOP_OBSERVATION: &str =
    "No action was found in your response. Reply with a ```tool block containing the next action, or `submit` when done.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Ok,
    ToolError,
    TimedOut,
    Rejected,
    Noop,
}

impl DispatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStatus::Ok => "ok",
            DispatchStatus::ToolError => "error",
            DispatchStatus::TimedOut => "timeout",
            DispatchStatus::Rejected => "rejected",
            DispatchStatus::Noop => "noop",
        }
    }
}

/// 一次分发的结果
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub tool: String,
    pub args: Value,
    pub observation: String,
    pub status: DispatchStatus,
    /// 是否走了 shell 兜底
    pub fallback: bool,
    pub truncated: bool,
    pub duration_ms: u64,
}

impl DispatchOutcome {
    fn new(tool: &str, args: Value, observation: String, status: DispatchStatus, fallback: bool) -> Self {
        Self {
            tool: tool.to_string(),
            args,
            observation,
            status,
            fallback,
            truncated: false,
            duration_ms: 0,
        }
    }
}

pub struct ActionDispatcher {
    registry: Arc<ToolRegistry>,
    default_timeout: Duration,
    max_output_bytes: usize,
}

impl ActionDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, default_timeout: Duration) -> Self {
        Self {
            registry,
            default_timeout,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn tool_declarations(&self, tier: ToolTier) -> Vec<ToolDefinition> {
        self.registry.list_for_tier(tier)
    }

    /// 解析动作：返回 (工具, 参数, 是否兜底)
    fn resolve(&self, action: &str) -> Result<(Arc<dyn Tool>, Value, bool), AgentError> {
        let action = action.trim();
        let (name, rest) = match action.find(char::is_whitespace) {
            Some(idx) => (&action[..idx], &action[idx..]),
            None => (action, ""),
        };

        match self.registry.get(name) {
            Ok(tool) => {
                let args = tool.parse_args(rest);
                Ok((tool, args, false))
            }
            Err(_) => {
                let shell = self.registry.get(FALLBACK_TOOL).map_err(|_| {
                    AgentError::DispatchFailed(format!(
                        "unknown tool '{name}' and no '{FALLBACK_TOOL}' fallback registered"
                    ))
                })?;
                tracing::debug!(tool = %name, "unregistered tool, falling back to shell");
                Ok((shell, serde_json::json!({ "command": action }), true))
            }
        }
    }

    /// 分发动作；timeout 为 None 时用默认超时
    pub async fn dispatch(
        &self,
        action: &str,
        tier: ToolTier,
        timeout: Option<Duration>,
    ) -> Result<DispatchOutcome, AgentError> {
        let start = Instant::now();
        let mut outcome = self.dispatch_inner(action, tier, timeout).await?;

        let (observation, truncated) =
            truncate_output(std::mem::take(&mut outcome.observation), self.max_output_bytes);
        outcome.observation = observation;
        outcome.truncated = truncated;
        outcome.duration_ms = start.elapsed().as_millis() as u64;

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": outcome.tool,
            "ok": outcome.status == DispatchStatus::Ok,
            "outcome": outcome.status.as_str(),
            "duration_ms": outcome.duration_ms,
            "args_preview": args_preview(&outcome.args),
            "fallback": outcome.fallback,
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        Ok(outcome)
    }

    async fn dispatch_inner(
        &self,
        action: &str,
        tier: ToolTier,
        timeout: Option<Duration>,
    ) -> Result<DispatchOutcome, AgentError> {
        if action.trim().is_empty() {
            return Ok(DispatchOutcome::new(
                "",
                Value::Null,
                NOOP_OBSERVATION.to_string(),
                DispatchStatus::Noop,
                false,
            ));
        }

        let (tool, args, fallback) = self.resolve(action)?;
        let name = tool.name().to_string();

        if tool.tier() > tier {
            let observation = format!(
                "Tool '{name}' requires the {} tier (current tier: {tier}).",
                tool.tier()
            );
            return Ok(DispatchOutcome::new(&name, args, observation, DispatchStatus::Rejected, fallback));
        }

        let limit = timeout.unwrap_or(self.default_timeout);
        let result = tokio::time::timeout(limit, tool.execute(args.clone())).await;
        let (observation, status) = match result {
            Ok(Ok(text)) => (text, DispatchStatus::Ok),
            Ok(Err(ToolError::InvalidArguments(msg))) => (
                format!("Error: invalid arguments for '{name}': {msg}"),
                DispatchStatus::ToolError,
            ),
            Ok(Err(ToolError::Infrastructure(msg))) => {
                tracing::warn!(tool = %name, error = %msg, "tool infrastructure failure");
                return Err(AgentError::Infrastructure(format!("{name}: {msg}")));
            }
            Err(_) => {
                tracing::warn!(tool = %name, timeout_secs = limit.as_secs_f64(), "tool timed out");
                (
                    format!("Tool '{name}' timed out after {:.1}s", limit.as_secs_f64()),
                    DispatchStatus::TimedOut,
                )
            }
        };
        Ok(DispatchOutcome::new(&name, args, observation, status, fallback))
    }
}

/// 超过 max 字节时按字符边界截断并附加标记
pub fn truncate_output(output: String, max: usize) -> (String, bool) {
    if output.len() <= max {
        return (output, false);
    }
    let mut cut = max;
    while cut > 0 && !output.is_char_boundary(cut) {
        cut -= 1;
    }
    (format!("{}{}", &output[..cut], TRUNCATION_MARKER), true)
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Recorder {
        name: &'static str,
        tier: ToolTier,
    }

    #[async_trait]
    impl Tool for Recorder {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "records its args"
        }
        fn tier(&self) -> ToolTier {
            self.tier
        }
        fn parse_args(&self, raw: &str) -> Value {
            serde_json::json!({ "command": raw.trim() })
        }
        async fn execute(&self, args: Value) -> Result<String, ToolError> {
            Ok(format!("ran {}", args["command"].as_str().unwrap_or_default()))
        }
    }

    struct Sleepy;

    #[async_trait]
    impl Tool for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }
        fn description(&self) -> &str {
            "never finishes in time"
        }
        async fn execute(&self, _args: Value) -> Result<String, ToolError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok("late".into())
        }
    }

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "environment is gone"
        }
        async fn execute(&self, _args: Value) -> Result<String, ToolError> {
            Err(ToolError::Infrastructure("environment not initialized".into()))
        }
    }

    fn dispatcher_with_shell() -> ActionDispatcher {
        let registry = ToolRegistry::new();
        registry
            .register(Recorder { name: "shell", tier: ToolTier::Base })
            .unwrap();
        registry
            .register(Recorder { name: "extended.search", tier: ToolTier::Extended })
            .unwrap();
        registry.register(Sleepy).unwrap();
        registry.register(Broken).unwrap();
        ActionDispatcher::new(Arc::new(registry), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_known_tool_gets_remaining_args() {
        let d = dispatcher_with_shell();
        let out = d.dispatch("shell echo hi", ToolTier::Base, None).await.unwrap();
        assert_eq!(out.tool, "shell");
        assert_eq!(out.args["command"], "echo hi");
        assert!(!out.fallback);
        assert_eq!(out.status, DispatchStatus::Ok);
    }

    #[tokio::test]
    async fn test_unknown_tool_falls_back_to_shell_with_full_action() {
        let d = dispatcher_with_shell();
        let out = d.dispatch("foo bar", ToolTier::Base, None).await.unwrap();
        assert_eq!(out.tool, "shell");
        assert_eq!(out.args["command"], "foo bar");
        assert!(out.fallback);
        assert_eq!(out.observation, "ran foo bar");
    }

    #[tokio::test]
    async fn test_missing_shell_fallback_is_dispatch_error() {
        let d = ActionDispatcher::new(Arc::new(ToolRegistry::new()), Duration::from_secs(1));
        let err = d.dispatch("foo bar", ToolTier::Base, None).await.unwrap_err();
        assert!(matches!(err, AgentError::DispatchFailed(_)));
    }

    #[tokio::test]
    async fn test_empty_action_is_noop() {
        let d = dispatcher_with_shell();
        let out = d.dispatch("   ", ToolTier::Base, None).await.unwrap();
        assert_eq!(out.status, DispatchStatus::Noop);
        assert!(!out.observation.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_is_textual_observation() {
        let d = dispatcher_with_shell();
        let out = d
            .dispatch("sleepy", ToolTier::Base, Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert_eq!(out.status, DispatchStatus::TimedOut);
        assert!(out.observation.contains("timed out"));
    }

    #[tokio::test]
    async fn test_infrastructure_failure_is_hard_error() {
        let d = dispatcher_with_shell();
        let err = d.dispatch("broken", ToolTier::Base, None).await.unwrap_err();
        assert!(matches!(err, AgentError::Infrastructure(_)));
    }

    #[tokio::test]
    async fn test_tier_gate_rejects_textually() {
        let d = dispatcher_with_shell();
        let out = d.dispatch("extended.search todo", ToolTier::Base, None).await.unwrap();
        assert_eq!(out.status, DispatchStatus::Rejected);
        assert!(out.observation.contains("extended"));
        let ok = d.dispatch("extended.search todo", ToolTier::Extended, None).await.unwrap();
        assert_eq!(ok.status, DispatchStatus::Ok);
    }

    #[tokio::test]
    async fn test_output_truncated_with_marker() {
        let d = dispatcher_with_shell().with_max_output_bytes(8);
        let out = d
            .dispatch("shell this output is long", ToolTier::Base, None)
            .await
            .unwrap();
        assert!(out.truncated);
        assert!(out.observation.ends_with(TRUNCATION_MARKER));
        assert!(out.observation.starts_with("ran this"));
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let (text, truncated) = truncate_output("héllo".to_string(), 2);
        assert!(truncated);
        assert!(text.starts_with('h'));
        let (same, truncated) = truncate_output("ok".to_string(), 10);
        assert_eq!(same, "ok");
        assert!(!truncated);
    }
}
