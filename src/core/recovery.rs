//! 恢复引擎（上游调用的弹性层）
//!
//! call_model 在最多 max_retries + 1 次尝试内调用 LLM：瞬时错误（服务不可用、超时、连接重置）
//! 固定退避后重试，其它错误立即作为 Fatal 返回；重试耗尽返回 Unavailable。
//! 重试对 Transcript 不可见。解析失败的纠错提示也由这里生成。

use std::time::Duration;

use crate::core::{ParseError, RecoveryAction, UpstreamError};
use crate::llm::{LlmClient, LlmError};
use crate::memory::Message;

/// 视为瞬时故障的错误特征（小写匹配）
const TRANSIENT_SIGNATURES: &[&str] = &[
    "service unavailable",
    "temporarily unavailable",
    "503",
    "502",
    "504",
    "bad gateway",
    "gateway timeout",
    "timed out",
    "timeout",
    "connection reset",
    "connection refused",
    "connection closed",
    "broken pipe",
    "overloaded",
    "rate limit",
    "429",
];

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(2000),
        }
    }
}

/// 恢复引擎：对上游错误分类并执行有界重试
#[derive(Debug, Default, Clone)]
pub struct RecoveryEngine {
    policy: RetryPolicy,
}

impl RecoveryEngine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// 按错误特征分类
    pub fn classify(&self, err: &LlmError) -> UpstreamError {
        match err {
            LlmError::Timeout(_)
            | LlmError::Unavailable(_)
            | LlmError::ConnectionReset(_)
            | LlmError::RateLimited => UpstreamError::Transient(err.to_string()),
            LlmError::InvalidRequest(msg) => UpstreamError::Fatal(msg.clone()),
            LlmError::Other(msg) => {
                let lower = msg.to_lowercase();
                if TRANSIENT_SIGNATURES.iter().any(|s| lower.contains(s)) {
                    UpstreamError::Transient(msg.clone())
                } else {
                    UpstreamError::Fatal(msg.clone())
                }
            }
        }
    }

    /// 第 attempt 次（从 1 开始）失败后该怎么办
    pub fn handle(&self, err: &LlmError, attempt: u32) -> RecoveryAction {
        if self.classify(err).is_transient() && attempt <= self.policy.max_retries {
            RecoveryAction::RetryAfter(self.policy.backoff)
        } else {
            RecoveryAction::Abort
        }
    }

    /// 调用模型；恰好返回一次成功回复或一个 UpstreamError（不会是 Transient）
    pub async fn call_model(
        &self,
        llm: &dyn LlmClient,
        messages: &[Message],
    ) -> Result<String, UpstreamError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let err = match llm.complete(messages).await {
                Ok(text) => return Ok(text),
                Err(e) => e,
            };
            match self.handle(&err, attempt) {
                RecoveryAction::RetryAfter(backoff) => {
                    tracing::warn!(
                        attempt,
                        max_retries = self.policy.max_retries,
                        error = %err,
                        "transient LLM failure, retrying"
                    );
                    if !backoff.is_zero() {
                        tokio::time::sleep(backoff).await;
                    }
                }
                RecoveryAction::Abort => {
                    return Err(match self.classify(&err) {
                        UpstreamError::Transient(last_error) => UpstreamError::Unavailable {
                            attempts: attempt,
                            last_error,
                        },
                        other => other,
                    });
                }
            }
        }
    }

    /// 解析失败后注入下一轮的纠错 Observation
    pub fn parse_correction(&self, err: &ParseError) -> String {
        format!(
            "Your previous response could not be parsed ({err}). \
            Respond with a short thought followed by exactly one JSON object in a ```json block: \
            {{\"thought\": \"...\", \"action\": {{\"tool\": \"<tool name>\", \"input\": {{...}}}}}}. \
            When you are done, use the tool \"final_answer\" with the answer as input."
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    fn engine(max_retries: u32) -> RecoveryEngine {
        RecoveryEngine::new(RetryPolicy {
            max_retries,
            backoff: Duration::ZERO,
        })
    }

    #[test]
    fn test_classify_by_signature() {
        let e = engine(1);
        assert!(e.classify(&LlmError::Other("HTTP 503 Service Unavailable".into())).is_transient());
        assert!(e.classify(&LlmError::Other("Connection reset by peer".into())).is_transient());
        assert!(e.classify(&LlmError::Timeout(30)).is_transient());
        assert_eq!(
            e.classify(&LlmError::Other("invalid api key".into())),
            UpstreamError::Fatal("invalid api key".into())
        );
        assert!(!e.classify(&LlmError::InvalidRequest("bad".into())).is_transient());
    }

    #[test]
    fn test_handle_stops_after_max_retries() {
        let e = engine(2);
        let err = LlmError::Unavailable("down".into());
        assert_eq!(e.handle(&err, 1), RecoveryAction::RetryAfter(Duration::ZERO));
        assert_eq!(e.handle(&err, 2), RecoveryAction::RetryAfter(Duration::ZERO));
        assert_eq!(e.handle(&err, 3), RecoveryAction::Abort);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let llm = ScriptedLlmClient::new(vec![
            Err(LlmError::Unavailable("503".into())),
            Err(LlmError::Timeout(5)),
            Ok("done".into()),
        ]);
        let out = engine(2).call_model(&llm, &[]).await;
        assert_eq!(out, Ok("done".to_string()));
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_is_unavailable() {
        let llm = ScriptedLlmClient::new(vec![
            Err(LlmError::Unavailable("503".into())),
            Err(LlmError::Unavailable("503".into())),
            Ok("too late".into()),
        ]);
        let out = engine(1).call_model(&llm, &[]).await;
        assert!(matches!(out, Err(UpstreamError::Unavailable { attempts: 2, .. })));
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_fatal_is_not_retried() {
        let llm = ScriptedLlmClient::new(vec![
            Err(LlmError::InvalidRequest("malformed".into())),
            Ok("never".into()),
        ]);
        let out = engine(5).call_model(&llm, &[]).await;
        assert_eq!(out, Err(UpstreamError::Fatal("malformed".into())));
        assert_eq!(llm.calls(), 1);
    }

    #[test]
    fn test_parse_correction_mentions_format() {
        let msg = engine(0).parse_correction(&ParseError::Empty);
        assert!(msg.contains("JSON"));
        assert!(msg.contains("final_answer"));
    }
}
