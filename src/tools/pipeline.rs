//! 专家层级：`specialized.pipeline cmd1 ;; cmd2 ;; ...`
//!
//! 依次执行各阶段，遇到第一个非零退出码即停止；每个阶段的输出都带编号标题。
//! 执行前逐段过 shell 的禁止子串检查，任一阶段命中则整条流水线不执行。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde_json::Value;

use crate::core::state::ToolTier;
use crate::env::Environment;
use crate::tools::shell::{format_command_output, ShellTool};
use crate::tools::{Tool, ToolError};

pub const STAGE_SEPARATOR: &str = ";;";

#[allow(dead_code)]
#[derive(JsonSchema)]
struct PipelineArgs {
    /// 按顺序执行的命令
    stages: Vec<String>,
}

pub struct PipelineTool {
    env: Arc<dyn Environment>,
    timeout: Duration,
}

impl PipelineTool {
    pub fn new(env: Arc<dyn Environment>, timeout: Duration) -> Self {
        Self { env, timeout }
    }
}

#[async_trait]
impl Tool for PipelineTool {
    fn name(&self) -> &str {
        "specialized.pipeline"
    }

    fn description(&self) -> &str {
        "Run several commands in order, stopping at the first failure. Usage: specialized.pipeline <cmd1> ;; <cmd2> ;; ..."
    }

    fn tier(&self) -> ToolTier {
        ToolTier::Specialized
    }

    fn parameters_schema(&self) -> Value {
        crate::tools::schema::parameters_for::<PipelineArgs>()
    }

    fn parse_args(&self, raw: &str) -> Value {
        let stages: Vec<String> = raw
            .split(STAGE_SEPARATOR)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        serde_json::json!({ "stages": stages })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let stages: Vec<&str> = args
            .get("stages")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|s| s.as_str()).collect())
            .unwrap_or_default();
        if stages.is_empty() {
            return Err(ToolError::InvalidArguments("no stages given".to_string()));
        }

        for (i, stage) in stages.iter().enumerate() {
            if let Some(pattern) = ShellTool::forbidden_pattern(stage) {
                tracing::warn!(stage = i + 1, command = %stage, pattern = %pattern, "pipeline refused");
                return Ok(format!(
                    "Refused: stage {} matches forbidden pattern '{pattern}'; no stages were run",
                    i + 1
                ));
            }
        }

        let total = stages.len();
        let mut report = Vec::with_capacity(total);
        for (i, stage) in stages.iter().enumerate() {
            let n = i + 1;
            tracing::info!(stage = n, total, command = %stage, "pipeline stage");
            let out = match self.env.execute(stage, self.timeout).await {
                Ok(out) => out,
                Err(e) => {
                    let observed = ToolError::observe_env(&format!("in stage {n}"), e)?;
                    report.push(format!("[{n}/{total}] {stage}\n{observed}"));
                    report.push(format!("Pipeline stopped at stage {n}"));
                    return Ok(report.join("\n"));
                }
            };
            report.push(format!("[{n}/{total}] {stage}\n{}", format_command_output(&out)));
            if !out.success() {
                report.push(format!("Pipeline stopped at stage {n}"));
                return Ok(report.join("\n"));
            }
        }
        report.push(format!("Pipeline completed ({total} stages)"));
        Ok(report.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::LocalEnvironment;

    async fn tool() -> (tempfile::TempDir, PipelineTool) {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalEnvironment::new(dir.path());
        env.reset_session(Duration::from_secs(5)).await.unwrap();
        (dir, PipelineTool::new(Arc::new(env), Duration::from_secs(5)))
    }

    #[test]
    fn test_parse_args_splits_stages() {
        let tool = PipelineTool::new(Arc::new(LocalEnvironment::new(std::env::temp_dir())), Duration::from_secs(1));
        let args = tool.parse_args("echo a ;; ;; echo b");
        assert_eq!(args["stages"], serde_json::json!(["echo a", "echo b"]));
    }

    #[tokio::test]
    async fn test_runs_all_stages() {
        let (_dir, tool) = tool().await;
        let out = tool.execute(tool.parse_args("echo a ;; echo b")).await.unwrap();
        assert_eq!(out, "[1/2] echo a\na\n[2/2] echo b\nb\nPipeline completed (2 stages)");
    }

    #[tokio::test]
    async fn test_stops_at_first_failure() {
        let (_dir, tool) = tool().await;
        let out = tool
            .execute(tool.parse_args("echo a ;; exit 3 ;; echo never"))
            .await
            .unwrap();
        assert!(out.contains("Exit code 3"));
        assert!(out.ends_with("Pipeline stopped at stage 2"));
        assert!(!out.contains("never"));
    }

    #[tokio::test]
    async fn test_forbidden_stage_refuses_whole_pipeline() {
        let (dir, tool) = tool().await;
        let out = tool
            .execute(tool.parse_args("touch marker ;; rm -rf / ;; echo after"))
            .await
            .unwrap();
        assert_eq!(
            out,
            "Refused: stage 2 matches forbidden pattern 'rm -rf /'; no stages were run"
        );
        assert!(!dir.path().join("marker").exists());
    }
}
