//! 对话记录（Transcript）
//!
//! 一次运行内按顺序追加的消息历史：system 指令、任务、模型输出与 Observation。
//! 只追加、不剪枝；每次调用模型时整体读出。上下文窗口裁剪不在此处处理。

use serde::{Deserialize, Serialize};

/// 消息角色；Observation 为工具结果或纠错提示，发给 LLM 时按 user 消息投递
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Observation,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn observation(content: impl Into<String>) -> Self {
        Self {
            role: Role::Observation,
            content: content.into(),
        }
    }
}

/// 单次运行的消息历史；由控制循环独占
#[derive(Clone, Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    /// 初始状态：system 指令 + 任务
    pub fn new(system: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system), Message::user(task)],
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 替换首条 system 消息（Planner 在每轮思考前刷新可用的记忆键）
    pub fn set_system(&mut self, system: impl Into<String>) {
        match self.messages.first_mut() {
            Some(first) if first.role == Role::System => first.content = system.into(),
            _ => self.messages.insert(0, Message::system(system)),
        }
    }

    /// 统计某角色的消息条数
    pub fn count(&self, role: Role) -> usize {
        self.messages.iter().filter(|m| m.role == role).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_starts_with_system_and_task() {
        let t = Transcript::new("instructions", "list files");
        assert_eq!(t.len(), 2);
        assert_eq!(t.messages()[0].role, Role::System);
        assert_eq!(t.messages()[1], Message::user("list files"));
    }

    #[test]
    fn test_transcript_is_append_only() {
        let mut t = Transcript::new("s", "task");
        t.push(Message::assistant("thinking"));
        t.push(Message::observation("result"));
        let roles: Vec<Role> = t.messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Observation]
        );
        assert_eq!(t.count(Role::Observation), 1);
    }

    #[test]
    fn test_set_system_replaces_only_first() {
        let mut t = Transcript::new("old", "task");
        t.set_system("new");
        assert_eq!(t.messages()[0].content, "new");
        assert_eq!(t.len(), 2);
    }
}
