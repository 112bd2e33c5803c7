//! 嵌套状态栈：在可能升级工具层级的调用前后保存 / 恢复上下文
//!
//! push 按值复制当前 LoopContext；pop 用栈顶快照覆盖当前上下文，但保留最近观察、
//! 最近模型输出、当前思考三个键。超过 max_depth 的 push 失败且栈不变。

use crate::core::state::LoopContext;
use crate::core::AgentError;

pub const DEFAULT_MAX_NESTED_DEPTH: usize = 5;

#[derive(Debug, Clone)]
pub struct NestedStateStack {
    frames: Vec<LoopContext>,
    max_depth: usize,
    high_water: usize,
}

impl Default for NestedStateStack {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_NESTED_DEPTH)
    }
}

impl NestedStateStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            frames: Vec::new(),
            max_depth,
            high_water: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// 本次运行出现过的最大深度
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// 压入上下文副本，返回新深度
    pub fn push(&mut self, context: &LoopContext) -> Result<usize, AgentError> {
        if self.frames.len() >= self.max_depth {
            return Err(AgentError::NestedDepthExceeded {
                max: self.max_depth,
            });
        }
        self.frames.push(context.clone());
        self.high_water = self.high_water.max(self.frames.len());
        tracing::debug!(depth = self.frames.len(), "nested state push");
        Ok(self.frames.len())
    }

    /// 弹出栈顶快照写回 context（保留三个 carry-over 键），返回新深度
    pub fn pop(&mut self, context: &mut LoopContext) -> Result<usize, AgentError> {
        let mut restored = self.frames.pop().ok_or(AgentError::NestedStackEmpty)?;
        context.carry_over_into(&mut restored);
        *context = restored;
        tracing::debug!(depth = self.frames.len(), "nested state pop");
        Ok(self.frames.len())
    }

    /// 丢弃所有帧（state_cleanup），返回被丢弃的帧数
    pub fn clear(&mut self) -> usize {
        let dropped = self.frames.len();
        self.frames.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_balanced() {
        let mut stack = NestedStateStack::default();
        let mut ctx = LoopContext::default();
        let before = stack.depth();
        stack.push(&ctx).unwrap();
        ctx.plan = Some("changed during call".into());
        stack.pop(&mut ctx).unwrap();
        assert_eq!(stack.depth(), before);
        assert!(ctx.plan.is_none());
    }

    #[test]
    fn test_push_beyond_max_fails_unchanged() {
        let mut stack = NestedStateStack::new(2);
        let ctx = LoopContext::default();
        stack.push(&ctx).unwrap();
        stack.push(&ctx).unwrap();
        let err = stack.push(&ctx).unwrap_err();
        assert!(matches!(err, AgentError::NestedDepthExceeded { max: 2 }));
        assert_eq!(stack.depth(), 2);
    }

    #[test]
    fn test_default_depth_is_five() {
        let mut stack = NestedStateStack::default();
        let ctx = LoopContext::default();
        for _ in 0..5 {
            stack.push(&ctx).unwrap();
        }
        assert!(stack.push(&ctx).is_err());
        assert_eq!(stack.high_water(), 5);
    }

    #[test]
    fn test_pop_preserves_carry_over_keys() {
        let mut stack = NestedStateStack::default();
        let mut ctx = LoopContext {
            last_observation: Some("old obs".into()),
            ..Default::default()
        };
        stack.push(&ctx).unwrap();
        ctx.last_observation = Some("fresh obs".into());
        ctx.last_thought = Some("thinking".into());
        ctx.requirements = vec!["scratch".into()];
        stack.pop(&mut ctx).unwrap();
        assert_eq!(ctx.last_observation.as_deref(), Some("fresh obs"));
        assert_eq!(ctx.last_thought.as_deref(), Some("thinking"));
        assert!(ctx.requirements.is_empty());
    }

    #[test]
    fn test_pop_empty_fails() {
        let mut stack = NestedStateStack::default();
        let mut ctx = LoopContext::default();
        assert!(matches!(stack.pop(&mut ctx), Err(AgentError::NestedStackEmpty)));
    }

    #[test]
    fn test_clear_reports_dropped_frames() {
        let mut stack = NestedStateStack::default();
        let ctx = LoopContext::default();
        stack.push(&ctx).unwrap();
        stack.push(&ctx).unwrap();
        assert_eq!(stack.clear(), 2);
        assert!(stack.is_empty());
    }
}
