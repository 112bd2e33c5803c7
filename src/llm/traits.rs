//! LLM 客户端抽象
//!
//! 执行循环只需要一个请求/响应函数：complete(history) → ModelOutput。

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::llm::Message;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("empty response")]
    EmptyResponse,
}

/// 模型输出：至少包含 message 字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelOutput {
    pub message: String,
}

impl ModelOutput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// 原始文本若是带字符串 message 字段的 JSON 对象则取该字段，否则原样保留
    pub fn from_raw(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with('{') {
            if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(trimmed) {
                if let Some(message) = map.get("message").and_then(|v| v.as_str()) {
                    return Self::new(message);
                }
            }
        }
        Self::new(raw)
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<ModelOutput, LlmError>;

    /// 累计 token 使用：(prompt, completion, total)，默认 (0, 0, 0)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
