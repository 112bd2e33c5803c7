//! 对话历史消息
//!
//! 执行循环把系统提示、任务、模型输出与观察依次写入历史，作为下一次调用的输入。
//! 观察与任务都以 user 角色出现，带固定前缀以便模型区分。

use serde::{Deserialize, Serialize};

pub const TASK_PREFIX: &str = "Task: ";
pub const OBSERVATION_PREFIX: &str = "Observation: ";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn task(task: &str) -> Self {
        Self::user(format!("{TASK_PREFIX}{task}"))
    }

    /// 工具结果回灌给模型
    pub fn observation(observation: &str) -> Self {
        Self::user(format!("{OBSERVATION_PREFIX}{observation}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_constructors() {
        let task = Message::task("count files");
        assert_eq!(task.role, Role::User);
        assert_eq!(task.content, "Task: count files");

        let obs = Message::observation("3 files");
        assert_eq!(obs.content, "Observation: 3 files");
        assert_eq!(obs.role, Role::User);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_value(Message::assistant("hi")).unwrap();
        assert_eq!(json["role"], "assistant");
    }
}
