//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Scripted Mock）实现 LlmClient::complete：
//! 输入完整消息历史，返回一段完整文本；不要求流式。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;

/// 传输层错误；是否可重试由 RecoveryEngine 按错误特征判定
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("connection reset: {0}")]
    ConnectionReset(String),

    #[error("rate limited")]
    RateLimited,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Other(String),
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
