//! 循环构建器：统一的组件装配逻辑
//!
//! 配置 → 执行环境、模型客户端、工具注册表、分发器、层级策略、恢复引擎 → ExecutionLoop。
//! 测试与嵌入方可以用 with_* 替换环境或模型，或追加自定义工具。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{AgentError, RecoveryEngine};
use crate::env::{Environment, LocalEnvironment, RemoteEnvironment};
use crate::llm::{LlmClient, OpenAiClient, ScriptedLlmClient};
use crate::react::{ExecutionLoop, TierPolicy};
use crate::tools::{register_builtin_tools, ActionDispatcher, Tool, ToolRegistry};

pub struct LoopBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    environment: Option<Arc<dyn Environment>>,
    extra_tools: Vec<Arc<dyn Tool>>,
    shutdown: Option<CancellationToken>,
}

impl LoopBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            environment: None,
            extra_tools: Vec::new(),
            shutdown: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_environment(mut self, environment: Arc<dyn Environment>) -> Self {
        self.environment = Some(environment);
        self
    }

    /// 在内置工具之外追加工具；与内置同名时 build 失败
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.extra_tools.push(tool);
        self
    }

    /// 进程级关闭 token；取消时正在进行的运行以 stopped 结束
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn build_environment(&self) -> Result<Arc<dyn Environment>, AgentError> {
        if let Some(env) = &self.environment {
            return Ok(env.clone());
        }
        let section = &self.config.environment;
        match section.kind.as_str() {
            "local" => Ok(Arc::new(LocalEnvironment::new(&section.root))),
            "remote" => {
                let base_url = section.base_url.as_deref().ok_or_else(|| {
                    AgentError::ConfigError("environment.base_url is required for remote".to_string())
                })?;
                Ok(Arc::new(RemoteEnvironment::new(base_url)))
            }
            other => Err(AgentError::ConfigError(format!(
                "unknown environment kind '{other}' (expected local or remote)"
            ))),
        }
    }

    pub fn build_llm(&self) -> Result<Arc<dyn LlmClient>, AgentError> {
        if let Some(llm) = &self.llm {
            return Ok(llm.clone());
        }
        let section = &self.config.llm;
        match section.provider.as_str() {
            "mock" => {
                tracing::warn!("using scripted mock oracle; set llm.provider = \"openai\" for a real model");
                Ok(Arc::new(ScriptedLlmClient::new(Vec::<String>::new())))
            }
            "openai" => Ok(Arc::new(OpenAiClient::new(
                section.base_url.as_deref(),
                &section.model,
                section.api_key.as_deref(),
                Duration::from_secs(section.request_timeout_secs),
            ))),
            other => Err(AgentError::ConfigError(format!(
                "unknown llm provider '{other}' (expected mock or openai)"
            ))),
        }
    }

    /// 内置工具 + 追加工具
    pub fn build_registry(&self, environment: Arc<dyn Environment>) -> Result<ToolRegistry, AgentError> {
        let registry = ToolRegistry::new();
        let timeout = Duration::from_secs(self.config.tools.execution_timeout_secs);
        register_builtin_tools(&registry, environment, timeout)?;
        for tool in &self.extra_tools {
            registry.register_arc(tool.clone())?;
        }
        tracing::info!(tools = registry.len(), "tool registry built");
        Ok(registry)
    }

    pub fn build(self) -> Result<ExecutionLoop, AgentError> {
        let environment = self.build_environment()?;
        let llm = self.build_llm()?;
        let registry = Arc::new(self.build_registry(environment.clone())?);
        let settings = self.config.loop_settings();
        let dispatcher = ActionDispatcher::new(registry, settings.tool_timeout)
            .with_max_output_bytes(self.config.tools.max_output_bytes);
        let tiers = TierPolicy::new(
            self.config.tiers.triggers.clone(),
            self.config.tiers.specialized_step_threshold,
        );

        let execution = ExecutionLoop::new(llm, dispatcher, environment, settings)
            .with_tier_policy(tiers)
            .with_recovery(RecoveryEngine::with_max_fallbacks(self.config.recovery.max_fallbacks));
        Ok(match self.shutdown {
            Some(token) => execution.with_shutdown(token),
            None => execution,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{RegistryError, ShellTool};

    #[test]
    fn test_unknown_kinds_are_config_errors() {
        let mut config = AppConfig::default();
        config.environment.kind = "docker".into();
        assert!(matches!(
            LoopBuilder::new(config.clone()).build_environment(),
            Err(AgentError::ConfigError(_))
        ));

        config.environment.kind = "remote".into();
        assert!(matches!(
            LoopBuilder::new(config.clone()).build_environment(),
            Err(AgentError::ConfigError(_))
        ));

        config.llm.provider = "nope".into();
        assert!(matches!(
            LoopBuilder::new(config).build_llm(),
            Err(AgentError::ConfigError(_))
        ));
    }

    #[test]
    fn test_duplicate_extra_tool_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn Environment> = Arc::new(LocalEnvironment::new(dir.path()));
        let builder = LoopBuilder::new(AppConfig::default())
            .with_tool(Arc::new(ShellTool::new(env.clone(), Duration::from_secs(1))));
        let err = builder.build_registry(env).err().expect("expected build_registry to fail");
        assert!(matches!(err, AgentError::Registry(RegistryError::AlreadyRegistered(_))));
    }

    #[tokio::test]
    async fn test_build_applies_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.environment.root = dir.path().to_path_buf();
        config.loop_.max_steps = 4;
        let execution = LoopBuilder::new(config).build().unwrap();
        assert_eq!(execution.settings().max_steps, 4);
        assert_eq!(execution.dispatcher().registry().len(), 9);
        assert!(!execution.is_running().await);
    }

    #[tokio::test]
    async fn test_cancelled_shutdown_rejects_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.environment.root = dir.path().to_path_buf();
        let shutdown = CancellationToken::new();
        let execution = LoopBuilder::new(config)
            .with_shutdown(shutdown.clone())
            .build()
            .unwrap();
        shutdown.cancel();
        assert!(matches!(execution.start("late").await, Err(AgentError::Cancelled)));
        assert!(!execution.is_running().await);
    }
}
