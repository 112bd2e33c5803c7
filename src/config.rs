//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEE_LOOP__*` 覆盖（双下划线表示嵌套，如 `BEE_LOOP__LOOP__MAX_STEPS=40`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::react::loop_::{DEFAULT_COMPLETION_KEYWORDS, DEFAULT_SYSTEM_PROMPT};
use crate::react::nested::DEFAULT_MAX_NESTED_DEPTH;
use crate::react::tier::{DEFAULT_SPECIALIZED_STEP_THRESHOLD, DEFAULT_TRIGGERS};
use crate::react::LoopSettings;
use crate::tools::dispatcher::DEFAULT_MAX_OUTPUT_BYTES;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    #[serde(rename = "loop")]
    pub loop_: LoopSection,
    pub tools: ToolsSection,
    pub tiers: TiersSection,
    pub environment: EnvironmentSection,
    pub recovery: RecoverySection,
}

/// [app] 段：名称与系统提示词
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：mock / openai（任意 OpenAI 兼容端点）
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 未设置时读取 OPENAI_API_KEY
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

/// [loop] 段：步数上限、嵌套深度、总超时、检查点间隔、完成关键词
#[derive(Debug, Clone, Deserialize)]
pub struct LoopSection {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_max_nested_depth")]
    pub max_nested_depth: usize,
    #[serde(default = "default_total_timeout_secs")]
    pub total_timeout_secs: u64,
    #[serde(default = "default_evaluation_interval")]
    pub evaluation_interval: usize,
    #[serde(default = "default_completion_keywords")]
    pub completion_keywords: Vec<String>,
}

impl Default for LoopSection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_nested_depth: default_max_nested_depth(),
            total_timeout_secs: default_total_timeout_secs(),
            evaluation_interval: default_evaluation_interval(),
            completion_keywords: default_completion_keywords(),
        }
    }
}

fn default_max_steps() -> usize {
    20
}

fn default_max_nested_depth() -> usize {
    DEFAULT_MAX_NESTED_DEPTH
}

fn default_total_timeout_secs() -> u64 {
    1800
}

fn default_evaluation_interval() -> usize {
    3
}

fn default_completion_keywords() -> Vec<String> {
    DEFAULT_COMPLETION_KEYWORDS.iter().map(|s| s.to_string()).collect()
}

/// [tools] 段：单次调用超时、连续超时上限、输出截断阈值
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
    #[serde(default = "default_max_consecutive_timeouts")]
    pub max_consecutive_timeouts: usize,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            execution_timeout_secs: default_execution_timeout_secs(),
            max_consecutive_timeouts: default_max_consecutive_timeouts(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

fn default_execution_timeout_secs() -> u64 {
    30
}

fn default_max_consecutive_timeouts() -> usize {
    3
}

fn default_max_output_bytes() -> usize {
    DEFAULT_MAX_OUTPUT_BYTES
}

/// [tiers] 段：触发词与 specialized 步数阈值
#[derive(Debug, Clone, Deserialize)]
pub struct TiersSection {
    #[serde(default = "default_triggers")]
    pub triggers: Vec<String>,
    #[serde(default = "default_specialized_step_threshold")]
    pub specialized_step_threshold: usize,
}

impl Default for TiersSection {
    fn default() -> Self {
        Self {
            triggers: default_triggers(),
            specialized_step_threshold: default_specialized_step_threshold(),
        }
    }
}

fn default_triggers() -> Vec<String> {
    DEFAULT_TRIGGERS.iter().map(|s| s.to_string()).collect()
}

fn default_specialized_step_threshold() -> usize {
    DEFAULT_SPECIALIZED_STEP_THRESHOLD
}

/// [environment] 段：local（本地沙箱目录）或 remote（HTTP 执行服务）
#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentSection {
    #[serde(default = "default_environment_kind")]
    pub kind: String,
    #[serde(default = "default_environment_root")]
    pub root: PathBuf,
    pub base_url: Option<String>,
    #[serde(default = "default_environment_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EnvironmentSection {
    fn default() -> Self {
        Self {
            kind: default_environment_kind(),
            root: default_environment_root(),
            base_url: None,
            timeout_secs: default_environment_timeout_secs(),
        }
    }
}

fn default_environment_kind() -> String {
    "local".to_string()
}

fn default_environment_root() -> PathBuf {
    PathBuf::from("workspace")
}

fn default_environment_timeout_secs() -> u64 {
    30
}

/// [recovery] 段：每次运行允许的 fallback 次数
#[derive(Debug, Clone, Deserialize)]
pub struct RecoverySection {
    #[serde(default = "default_max_fallbacks")]
    pub max_fallbacks: u32,
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            max_fallbacks: default_max_fallbacks(),
        }
    }
}

fn default_max_fallbacks() -> u32 {
    1
}

impl AppConfig {
    /// 执行循环参数
    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            max_steps: self.loop_.max_steps,
            max_nested_depth: self.loop_.max_nested_depth,
            total_timeout: Duration::from_secs(self.loop_.total_timeout_secs),
            evaluation_interval: self.loop_.evaluation_interval,
            completion_keywords: self.loop_.completion_keywords.clone(),
            tool_timeout: Duration::from_secs(self.tools.execution_timeout_secs),
            max_consecutive_timeouts: self.tools.max_consecutive_timeouts,
            env_timeout: Duration::from_secs(self.environment.timeout_secs),
            system_prompt: self.app.system_prompt.clone(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 BEE_LOOP__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEE_LOOP__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEE_LOOP")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.llm.provider, "mock");
        assert_eq!(config.loop_.max_steps, 20);
        assert_eq!(config.loop_.max_nested_depth, 5);
        assert_eq!(config.tools.execution_timeout_secs, 30);
        assert_eq!(config.tools.max_output_bytes, 16 * 1024);
        assert_eq!(config.environment.kind, "local");
        assert_eq!(config.recovery.max_fallbacks, 1);
        assert!(config.tiers.triggers.iter().any(|t| t == "data science"));
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[loop]\nmax_steps = 7\ncompletion_keywords = [\"all done\"]\n\n[tiers]\ntriggers = [\"genomics\"]\n\n[recovery]\nmax_fallbacks = 2"
        )
        .unwrap();

        let config = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.loop_.max_steps, 7);
        assert_eq!(config.loop_.evaluation_interval, 3);
        assert_eq!(config.tiers.triggers, vec!["genomics"]);
        assert_eq!(config.recovery.max_fallbacks, 2);

        let settings = config.loop_settings();
        assert_eq!(settings.max_steps, 7);
        assert_eq!(settings.completion_keywords, vec!["all done"]);
        assert_eq!(settings.tool_timeout, Duration::from_secs(30));
    }
}
