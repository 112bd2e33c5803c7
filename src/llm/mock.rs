//! 脚本化 LLM 客户端（用于测试与离线演示，无需 API）
//!
//! 按顺序回放预设输出（可包含错误）；脚本耗尽后回复一个 submit 工具块。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message, ModelOutput};

/// 脚本耗尽后的默认回复
pub const EXHAUSTED_REPLY: &str = "Nothing left to do.\n```tool\nsubmit\n```";

#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<String, String>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_results(outputs.into_iter().map(|s| Ok(s.into())))
    }

    /// 脚本中的 Err 会以 LlmError::Request 返回
    pub fn from_results<I>(results: I) -> Self
    where
        I: IntoIterator<Item = Result<String, String>>,
    {
        Self {
            script: Mutex::new(results.into_iter().collect()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// 每次调用前等待，模拟慢速模型
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, _messages: &[Message]) -> Result<ModelOutput, LlmError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(Ok(text)) => Ok(ModelOutput::from_raw(&text)),
            Some(Err(e)) => Err(LlmError::Request(e)),
            None => Ok(ModelOutput::new(EXHAUSTED_REPLY)),
        }
    }
}
