//! Mock LLM 客户端（用于测试与离线演示，无需 API）
//!
//! - ScriptedLlmClient：按顺序回放预设的回复或错误，脚本用尽后重复最后一条
//! - MockLlmClient：离线演示用，第一轮列目录，之后给出 Final Answer

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

/// 按脚本回放的客户端；记录调用次数与每次收到的消息条数
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    last: Mutex<Option<Result<String, LlmError>>>,
    calls: AtomicUsize,
    seen_lengths: Mutex<Vec<usize>>,
}

impl ScriptedLlmClient {
    pub fn new(script: Vec<Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    /// 只有成功回复的脚本
    pub fn replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(replies.into_iter().map(|r| Ok(r.into())).collect())
    }

    /// 总调用次数（含失败）
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 每次调用时传入的消息条数
    pub fn seen_lengths(&self) -> Vec<usize> {
        self.seen_lengths
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen_lengths.lock() {
            seen.push(messages.len());
        }
        let next = self
            .script
            .lock()
            .map_err(|e| LlmError::Other(e.to_string()))?
            .pop_front();
        let mut last = self
            .last
            .lock()
            .map_err(|e| LlmError::Other(e.to_string()))?;
        match next {
            Some(item) => {
                *last = Some(item.clone());
                item
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(LlmError::Other("script exhausted".to_string()))),
        }
    }
}

/// 演示客户端：尚无 Observation 时调用 ls，否则把最近的 Observation 作为最终答案
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let last_observation = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Observation)
            .map(|m| m.content.as_str());

        let reply = match last_observation {
            None => serde_json::json!({
                "thought": "Mock: start by looking at the workspace.",
                "action": {"tool": "ls", "input": {"path": "."}}
            }),
            Some(obs) => serde_json::json!({
                "thought": "Mock: report what was observed.",
                "action": {"tool": "final_answer", "input": format!("Mock finished. Last observation:\n{obs}")}
            }),
        };
        Ok(format!("```json\n{reply}\n```"))
    }
}
