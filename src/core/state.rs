//! 状态定义：相位、工具层级、LoopState 与只读快照
//!
//! LoopState 由 ExecutionLoop 独占，只在其锁内修改；外部只能拿到 StatusSnapshot。

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::react::events::{Event, EventKind, EventLog};

/// 状态机相位（穷举）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Setup,
    TaskInitiation,
    AnalyzeRequirements,
    ToolDiscovery,
    PlanningPhase,
    ExecutionPhase,
    ExecuteStep,
    ToolTransitionEvaluation,
    ToolbeltActivation,
    CompletionVerification,
    StateCleanup,
    ErrorHandling,
    FallbackProcessing,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Setup => "setup",
            Phase::TaskInitiation => "task_initiation",
            Phase::AnalyzeRequirements => "analyze_requirements",
            Phase::ToolDiscovery => "tool_discovery",
            Phase::PlanningPhase => "planning_phase",
            Phase::ExecutionPhase => "execution_phase",
            Phase::ExecuteStep => "execute_step",
            Phase::ToolTransitionEvaluation => "tool_transition_evaluation",
            Phase::ToolbeltActivation => "toolbelt_activation",
            Phase::CompletionVerification => "completion_verification",
            Phase::StateCleanup => "state_cleanup",
            Phase::ErrorHandling => "error_handling",
            Phase::FallbackProcessing => "fallback_processing",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 工具层级：base → extended → specialized，单次运行内只升不降
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolTier {
    #[default]
    Base,
    Extended,
    Specialized,
}

impl ToolTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolTier::Base => "base",
            ToolTier::Extended => "extended",
            ToolTier::Specialized => "specialized",
        }
    }

    /// 按名称解析（大小写不敏感）；未知名称返回 None
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "base" => Some(ToolTier::Base),
            "extended" => Some(ToolTier::Extended),
            "specialized" => Some(ToolTier::Specialized),
            _ => None,
        }
    }
}

impl fmt::Display for ToolTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 完成原因
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// 模型给出 submit 动作
    Submitted,
    /// 模型给出 exit 动作
    Exited,
    /// 观察或思考中命中完成关键词
    KeywordMatched,
    /// 达到步数上限
    StepCeiling,
}

impl CompletionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionReason::Submitted => "submitted",
            CompletionReason::Exited => "exited",
            CompletionReason::KeywordMatched => "keyword_matched",
            CompletionReason::StepCeiling => "step_ceiling",
        }
    }
}

/// 一次运行的最终结果
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed { reason: CompletionReason },
    Failed { error: String },
    Stopped,
}

/// 跨相位的工作上下文：具名字段 + 一个显式的扩展表
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LoopContext {
    pub last_model_output: Option<String>,
    pub last_observation: Option<String>,
    pub last_thought: Option<String>,
    /// analyze_requirements 命中的触发词
    pub requirements: Vec<String>,
    /// 当前层级可用的工具名
    pub available_tools: Vec<String>,
    pub plan: Option<String>,
    pub completion_signal: Option<CompletionReason>,
    pub using_fallback: bool,
    pub cleanup_at: Option<DateTime<Utc>>,
    /// 任务相关的临时数据；键名由调用方约定
    pub extra: BTreeMap<String, Value>,
}

impl LoopContext {
    /// 嵌套栈弹出时保留的三个键：最近观察、最近模型输出、当前思考
    pub fn carry_over_into(&mut self, restored: &mut LoopContext) {
        restored.last_observation = self.last_observation.take();
        restored.last_model_output = self.last_model_output.take();
        restored.last_thought = self.last_thought.take();
    }
}

/// 一次任务运行的权威状态
#[derive(Clone, Debug, Default)]
pub struct LoopState {
    pub run_id: Option<Uuid>,
    pub phase: Phase,
    pub task: Option<String>,
    pub step_count: usize,
    pub current_action: Option<String>,
    pub last_error: Option<String>,
    pub tool_tier: ToolTier,
    pub context: LoopContext,
    pub events: EventLog,
    pub outcome: Option<RunOutcome>,
    pub nested_high_water: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl LoopState {
    pub fn new() -> Self {
        Self::default()
    }

    /// setup 语义：清空瞬时字段、计数、层级、上下文与事件，绑定新任务
    pub fn reset_for_run(&mut self, run_id: Uuid, task: String) {
        self.run_id = Some(run_id);
        self.task = Some(task);
        self.step_count = 0;
        self.current_action = None;
        self.last_error = None;
        self.tool_tier = ToolTier::Base;
        self.context = LoopContext::default();
        self.events = EventLog::new();
        self.outcome = None;
        self.nested_high_water = 0;
        self.started_at = Some(Utc::now());
        self.finished_at = None;
    }

    pub fn push_event(&mut self, kind: EventKind, data: Value) -> &Event {
        self.events.append(kind, data)
    }

    /// 切换相位并追加恰好一条 phase_transition 事件，返回原相位
    pub fn transition(&mut self, to: Phase) -> Phase {
        let from = self.phase;
        self.phase = to;
        self.events.append(
            EventKind::PhaseTransition,
            json!({ "from": from.as_str(), "to": to.as_str(), "step": self.step_count }),
        );
        from
    }

    /// 升级到 target；目标不高于当前层级时为空操作，返回 None
    pub fn escalate_tier(&mut self, target: ToolTier, reason: &str) -> Option<(ToolTier, ToolTier)> {
        if target <= self.tool_tier {
            return None;
        }
        let previous = self.tool_tier;
        self.tool_tier = target;
        self.events.append(
            EventKind::TierEscalation,
            json!({
                "previous": previous.as_str(),
                "new": target.as_str(),
                "reason": reason,
                "step": self.step_count,
            }),
        );
        Some((previous, target))
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            run_id: self.run_id,
            phase: self.phase,
            task: self.task.clone(),
            step_count: self.step_count,
            current_action: self.current_action.clone(),
            last_error: self.last_error.clone(),
            tool_tier: self.tool_tier,
            context: self.context.clone(),
            events: self.events.iter().cloned().collect(),
            outcome: self.outcome.clone(),
            nested_high_water: self.nested_high_water,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// 对外暴露的只读状态快照（监控 / UI）
#[derive(Clone, Debug, Serialize)]
pub struct StatusSnapshot {
    pub run_id: Option<Uuid>,
    pub phase: Phase,
    pub task: Option<String>,
    pub step_count: usize,
    pub current_action: Option<String>,
    pub last_error: Option<String>,
    pub tool_tier: ToolTier,
    pub context: LoopContext,
    pub events: Vec<Event>,
    pub outcome: Option<RunOutcome>,
    pub nested_high_water: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StatusSnapshot {
    pub fn events_of(&self, kind: &EventKind) -> Vec<&Event> {
        self.events.iter().filter(|e| &e.kind == kind).collect()
    }

    /// 按顺序列出 (from, to) 相位转换
    pub fn transitions(&self) -> Vec<(String, String)> {
        self.events_of(&EventKind::PhaseTransition)
            .into_iter()
            .map(|e| {
                let field = |k: &str| {
                    e.data
                        .get(k)
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string()
                };
                (field("from"), field("to"))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_appends_one_event() {
        let mut state = LoopState::new();
        assert_eq!(state.phase, Phase::Idle);
        let from = state.transition(Phase::Setup);
        assert_eq!(from, Phase::Idle);
        assert_eq!(state.phase, Phase::Setup);
        assert_eq!(state.events.count(&EventKind::PhaseTransition), 1);
    }

    #[test]
    fn test_tier_never_regresses() {
        let mut state = LoopState::new();
        assert!(state.escalate_tier(ToolTier::Extended, "trigger").is_some());
        assert!(state.escalate_tier(ToolTier::Extended, "again").is_none());
        assert!(state.escalate_tier(ToolTier::Base, "down").is_none());
        assert_eq!(state.tool_tier, ToolTier::Extended);
        assert_eq!(state.events.count(&EventKind::TierEscalation), 1);
    }

    #[test]
    fn test_reset_for_run_clears_transients() {
        let mut state = LoopState::new();
        state.step_count = 7;
        state.tool_tier = ToolTier::Specialized;
        state.last_error = Some("old".into());
        state.context.using_fallback = true;
        state.push_event(EventKind::Error, json!({}));

        state.reset_for_run(Uuid::new_v4(), "new task".into());
        assert_eq!(state.step_count, 0);
        assert_eq!(state.tool_tier, ToolTier::Base);
        assert!(state.last_error.is_none());
        assert!(!state.context.using_fallback);
        assert!(state.events.is_empty());
        assert_eq!(state.task.as_deref(), Some("new task"));
    }

    #[test]
    fn test_carry_over_keys() {
        let mut current = LoopContext {
            last_observation: Some("obs".into()),
            last_model_output: Some("out".into()),
            last_thought: Some("thought".into()),
            plan: Some("new plan".into()),
            ..Default::default()
        };
        let mut restored = LoopContext {
            plan: Some("old plan".into()),
            ..Default::default()
        };
        current.carry_over_into(&mut restored);
        assert_eq!(restored.last_observation.as_deref(), Some("obs"));
        assert_eq!(restored.last_model_output.as_deref(), Some("out"));
        assert_eq!(restored.last_thought.as_deref(), Some("thought"));
        assert_eq!(restored.plan.as_deref(), Some("old plan"));
    }

    #[test]
    fn test_tier_from_name() {
        assert_eq!(ToolTier::from_name("Extended"), Some(ToolTier::Extended));
        assert_eq!(ToolTier::from_name("nope"), None);
        assert!(ToolTier::Base < ToolTier::Extended && ToolTier::Extended < ToolTier::Specialized);
    }
}
