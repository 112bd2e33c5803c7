//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / tier / parse_args / execute），由 ToolRegistry 按名注册与查找。
//! 每个工具自带参数提取规则（parse_args），分发器不再集中 switch。
//! 注册不覆盖同名工具；注册与查找由同一把读写锁保护，get 不会看到注册到一半的工具。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::state::ToolTier;
use crate::env::EnvError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tool already registered: {0}")]
    AlreadyRegistered(String),

    #[error("tool not found: {0}")]
    NotFound(String),
}

/// 工具执行错误：InvalidArguments 会被转成文本观察，Infrastructure 是硬错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("infrastructure failure: {0}")]
    Infrastructure(String),
}

impl ToolError {
    /// 环境错误 → 工具结果：基础设施错误上抛，其余变成可读的错误观察
    pub fn observe_env(action: &str, err: EnvError) -> Result<String, ToolError> {
        if err.is_infrastructure() {
            Err(ToolError::Infrastructure(err.to_string()))
        } else {
            Ok(format!("Error {action}: {err}"))
        }
    }
}

/// 对外声明（供模型提示），注册后不可变
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub tier: ToolTier,
    pub parameters: Value,
}

/// 工具 trait：名称、描述、层级、参数 schema、参数提取、异步执行
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（动作字符串的首词）
    fn name(&self) -> &str;

    /// 工具描述（供模型理解功能）
    fn description(&self) -> &str;

    /// 使用该工具所需的最低层级
    fn tier(&self) -> ToolTier {
        ToolTier::Base
    }

    /// 参数 JSON Schema，默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 把动作字符串中工具名之后的部分转成参数对象
    fn parse_args(&self, raw: &str) -> Value {
        serde_json::json!({ "input": raw.trim() })
    }

    /// 执行工具；可读的失败信息应作为 Ok 返回，只有基础设施失败才返回 Err
    async fn execute(&self, args: Value) -> Result<String, ToolError>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            tier: self.tier(),
            parameters: self.parameters_schema(),
        }
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        let mut tools = self.tools.write().unwrap_or_else(|e| e.into_inner());
        if tools.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        tracing::debug!(tool = %name, tier = %tool.tier(), "tool registered");
        tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>, RegistryError> {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_ok()
    }

    /// 当前注册集合的快照（按名称排序）
    pub fn list(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|t| t.definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn list_names(&self) -> Vec<String> {
        self.list().into_iter().map(|d| d.name).collect()
    }

    /// 在给定层级下允许使用的工具
    pub fn list_for_tier(&self, tier: ToolTier) -> Vec<ToolDefinition> {
        self.list().into_iter().filter(|d| d.tier <= tier).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, ToolTier);

    #[async_trait]
    impl Tool for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "test tool"
        }
        fn tier(&self) -> ToolTier {
            self.1
        }
        async fn execute(&self, args: Value) -> Result<String, ToolError> {
            Ok(args.to_string())
        }
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let registry = ToolRegistry::new();
        registry.register(Named("alpha", ToolTier::Base)).unwrap();
        let err = registry.register(Named("alpha", ToolTier::Extended)).unwrap_err();
        assert_eq!(err, RegistryError::AlreadyRegistered("alpha".into()));
        assert_eq!(registry.get("alpha").unwrap().tier(), ToolTier::Base);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let registry = ToolRegistry::new();
        assert!(matches!(registry.get("ghost"), Err(RegistryError::NotFound(n)) if n == "ghost"));
    }

    #[test]
    fn test_list_is_sorted_snapshot_and_tier_filtered() {
        let registry = ToolRegistry::new();
        registry.register(Named("zeta", ToolTier::Base)).unwrap();
        registry.register(Named("extended.alpha", ToolTier::Extended)).unwrap();
        registry.register(Named("specialized.beta", ToolTier::Specialized)).unwrap();
        assert_eq!(
            registry.list_names(),
            vec!["extended.alpha", "specialized.beta", "zeta"]
        );
        let base: Vec<String> = registry
            .list_for_tier(ToolTier::Base)
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(base, vec!["zeta"]);
        assert_eq!(registry.list_for_tier(ToolTier::Extended).len(), 2);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_observe_env_splits_infrastructure() {
        assert!(matches!(
            ToolError::observe_env("reading a.txt", EnvError::NotInitialized),
            Err(ToolError::Infrastructure(_))
        ));
        let text = ToolError::observe_env("reading a.txt", EnvError::NotFound("a.txt".into())).unwrap();
        assert_eq!(text, "Error reading a.txt: not found: a.txt");
    }
}
