//! 运行事件日志：只追加、按时间排序，运行期间不裁剪
//!
//! 部分事件类型（tool_dispatched / tier_escalation / error）额外维护一个派生索引，
//! 索引只存日志中的位置，随 append 同步更新，不单独修改。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;

/// 事件类型
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    PhaseTransition,
    TaskStarted,
    ActionParsed,
    TierEscalation,
    NestedPush,
    NestedPop,
    ToolDispatched,
    Observation,
    Error,
    Fallback,
    Cleanup,
    TaskCompleted,
    TaskFailed,
    Stopped,
    /// 外部通过 add_event 写入的自定义类型
    Custom(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::PhaseTransition => "phase_transition",
            EventKind::TaskStarted => "task_started",
            EventKind::ActionParsed => "action_parsed",
            EventKind::TierEscalation => "tier_escalation",
            EventKind::NestedPush => "nested_push",
            EventKind::NestedPop => "nested_pop",
            EventKind::ToolDispatched => "tool_dispatched",
            EventKind::Observation => "observation",
            EventKind::Error => "error",
            EventKind::Fallback => "fallback",
            EventKind::Cleanup => "cleanup",
            EventKind::TaskCompleted => "task_completed",
            EventKind::TaskFailed => "task_failed",
            EventKind::Stopped => "stopped",
            EventKind::Custom(name) => name,
        }
    }

    /// 由名称解析；内置名称映射到对应变体，其余视为 Custom
    pub fn from_name(name: &str) -> Self {
        match name {
            "phase_transition" => EventKind::PhaseTransition,
            "task_started" => EventKind::TaskStarted,
            "action_parsed" => EventKind::ActionParsed,
            "tier_escalation" => EventKind::TierEscalation,
            "nested_push" => EventKind::NestedPush,
            "nested_pop" => EventKind::NestedPop,
            "tool_dispatched" => EventKind::ToolDispatched,
            "observation" => EventKind::Observation,
            "error" => EventKind::Error,
            "fallback" => EventKind::Fallback,
            "cleanup" => EventKind::Cleanup,
            "task_completed" => EventKind::TaskCompleted,
            "task_failed" => EventKind::TaskFailed,
            "stopped" => EventKind::Stopped,
            other => EventKind::Custom(other.to_string()),
        }
    }

    /// 是否进入派生索引
    pub fn is_indexed(&self) -> bool {
        matches!(
            self,
            EventKind::ToolDispatched | EventKind::TierEscalation | EventKind::Error
        )
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// 单条事件，追加后不可变；seq 是唯一的顺序保证
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub seq: u64,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

/// 事件日志 + 派生索引
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventLog {
    events: Vec<Event>,
    #[serde(skip)]
    index: HashMap<EventKind, Vec<usize>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, kind: EventKind, data: Value) -> &Event {
        let pos = self.events.len();
        if kind.is_indexed() {
            self.index.entry(kind.clone()).or_default().push(pos);
        }
        self.events.push(Event {
            seq: pos as u64,
            kind,
            timestamp: Utc::now(),
            data,
        });
        &self.events[pos]
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn last(&self) -> Option<&Event> {
        self.events.last()
    }

    /// 按类型查询；索引类型走位置表，其余顺序扫描
    pub fn by_kind(&self, kind: &EventKind) -> Vec<&Event> {
        if kind.is_indexed() {
            self.index
                .get(kind)
                .map(|positions| positions.iter().map(|&i| &self.events[i]).collect())
                .unwrap_or_default()
        } else {
            self.events.iter().filter(|e| &e.kind == kind).collect()
        }
    }

    pub fn count(&self, kind: &EventKind) -> usize {
        self.by_kind(kind).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_append_orders_by_seq() {
        let mut log = EventLog::new();
        log.append(EventKind::TaskStarted, json!({}));
        log.append(EventKind::Observation, json!({"text": "hi"}));
        let seqs: Vec<u64> = log.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1]);
        assert_eq!(log.last().map(|e| e.kind.clone()), Some(EventKind::Observation));
    }

    #[test]
    fn test_index_matches_scan() {
        let mut log = EventLog::new();
        log.append(EventKind::ToolDispatched, json!({"tool": "shell"}));
        log.append(EventKind::Observation, json!({}));
        log.append(EventKind::ToolDispatched, json!({"tool": "file"}));
        log.append(EventKind::Error, json!({"error": "x"}));

        let dispatched = log.by_kind(&EventKind::ToolDispatched);
        assert_eq!(dispatched.len(), 2);
        assert_eq!(dispatched[1].data["tool"], "file");
        assert_eq!(log.count(&EventKind::Error), 1);
        assert_eq!(log.count(&EventKind::Observation), 1);
    }

    #[test]
    fn test_custom_kind_serializes_as_name() {
        let mut log = EventLog::new();
        log.append(EventKind::from_name("user_note"), json!({"note": "n"}));
        let value = serde_json::to_value(log.last().unwrap()).unwrap();
        assert_eq!(value["type"], "user_note");
        assert_eq!(EventKind::from_name("error"), EventKind::Error);
    }
}
