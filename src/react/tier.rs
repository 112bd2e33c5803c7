//! 工具层级策略
//!
//! 检查点（tool_discovery 与每 N 步）扫描任务描述中的触发词（大小写不敏感子串）：
//! base 且命中 → extended；extended、步数超过阈值且命中 → specialized。
//! 另外，带层级前缀的动作（如 `extended.profile_data`）会自动升级到对应层级。

use crate::core::state::ToolTier;

/// 默认领域触发词
pub const DEFAULT_TRIGGERS: &[&str] = &[
    "data science",
    "data analysis",
    "machine learning",
    "deep learning",
    "neural network",
    "dataset",
    "statistics",
    "visualization",
    "security audit",
    "vulnerability",
    "penetration test",
    "web scraping",
    "database migration",
    "kubernetes",
    "distributed system",
];

pub const DEFAULT_SPECIALIZED_STEP_THRESHOLD: usize = 5;

/// 一次层级升级决定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierDecision {
    pub from: ToolTier,
    pub to: ToolTier,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct TierPolicy {
    triggers: Vec<String>,
    specialized_step_threshold: usize,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_TRIGGERS.iter().map(|s| s.to_string()).collect(),
            DEFAULT_SPECIALIZED_STEP_THRESHOLD,
        )
    }
}

impl TierPolicy {
    pub fn new(triggers: Vec<String>, specialized_step_threshold: usize) -> Self {
        let triggers = triggers
            .into_iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self {
            triggers,
            specialized_step_threshold,
        }
    }

    pub fn triggers(&self) -> &[String] {
        &self.triggers
    }

    /// 任务描述中命中的触发词（保持词表顺序）
    pub fn matched_triggers(&self, task: &str) -> Vec<String> {
        let task = task.to_lowercase();
        self.triggers
            .iter()
            .filter(|t| task.contains(t.as_str()))
            .cloned()
            .collect()
    }

    /// 检查点评估；不需要升级时返回 None
    pub fn evaluate(&self, task: &str, current: ToolTier, step_count: usize) -> Option<TierDecision> {
        let matched = self.matched_triggers(task);
        let first = matched.first()?;
        match current {
            ToolTier::Base => Some(TierDecision {
                from: current,
                to: ToolTier::Extended,
                reason: format!("task matched trigger '{first}'"),
            }),
            ToolTier::Extended if step_count > self.specialized_step_threshold => Some(TierDecision {
                from: current,
                to: ToolTier::Specialized,
                reason: format!(
                    "step {step_count} exceeded {} with trigger '{first}'",
                    self.specialized_step_threshold
                ),
            }),
            _ => None,
        }
    }

    /// 动作首词的层级前缀（`extended.` / `specialized.`）
    pub fn tier_for_action(action: &str) -> Option<ToolTier> {
        let name = action.split_whitespace().next()?;
        let (prefix, rest) = name.split_once('.')?;
        if rest.is_empty() {
            return None;
        }
        match ToolTier::from_name(prefix)? {
            ToolTier::Base => None,
            tier => Some(tier),
        }
    }

    /// 带前缀动作的自动升级；目标不高于当前层级时返回 None
    pub fn auto_escalation(current: ToolTier, action: &str) -> Option<TierDecision> {
        let target = Self::tier_for_action(action)?;
        (target > current).then(|| TierDecision {
            from: current,
            to: target,
            reason: format!("namespaced action requested {target} tier"),
        })
    }
}
