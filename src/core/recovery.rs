//! 错误恢复引擎
//!
//! 根据 AgentError 与本次运行已使用的 fallback 次数返回 RecoveryAction。
//! 最低契约：每次运行允许一次 fallback，第二次失败即终止。

use crate::core::{AgentError, RecoveryAction};

/// 一次性 fallback 策略（次数可配置，默认 1）
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    max_fallbacks: u32,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self { max_fallbacks: 1 }
    }
}

impl RecoveryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_fallbacks(max_fallbacks: u32) -> Self {
        Self { max_fallbacks }
    }

    pub fn max_fallbacks(&self) -> u32 {
        self.max_fallbacks
    }

    /// 取消、总超时、生命周期错误直接终止；其余错误在额度内尝试 fallback
    pub fn handle(&self, err: &AgentError, fallbacks_used: u32) -> RecoveryAction {
        match err {
            AgentError::Cancelled
            | AgentError::TotalTimeout(_)
            | AgentError::AlreadyRunning
            | AgentError::NotRunning
            | AgentError::ConfigError(_) => RecoveryAction::Abort,
            _ if fallbacks_used >= self.max_fallbacks => RecoveryAction::Abort,
            _ => RecoveryAction::Fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;

    #[test]
    fn test_first_error_falls_back() {
        let engine = RecoveryEngine::new();
        let err = AgentError::LlmError(LlmError::Request("boom".to_string()));
        assert_eq!(engine.handle(&err, 0), RecoveryAction::Fallback);
    }

    #[test]
    fn test_second_error_aborts() {
        let engine = RecoveryEngine::new();
        let err = AgentError::Infrastructure("environment down".to_string());
        assert_eq!(engine.handle(&err, 1), RecoveryAction::Abort);
    }

    #[test]
    fn test_cancelled_always_aborts() {
        let engine = RecoveryEngine::with_max_fallbacks(3);
        assert_eq!(engine.handle(&AgentError::Cancelled, 0), RecoveryAction::Abort);
        assert_eq!(engine.handle(&AgentError::TotalTimeout(10), 0), RecoveryAction::Abort);
    }

    #[test]
    fn test_configurable_budget() {
        let engine = RecoveryEngine::with_max_fallbacks(2);
        let err = AgentError::DispatchFailed("no shell".to_string());
        assert_eq!(engine.handle(&err, 1), RecoveryAction::Fallback);
        assert_eq!(engine.handle(&err, 2), RecoveryAction::Abort);
    }
}
