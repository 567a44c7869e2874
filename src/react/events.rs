//! 控制循环过程事件：供 CLI 等下游逐步展示

use serde::Serialize;

use crate::core::TerminationReason;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    /// 迭代步数更新（当前第几步）
    StepUpdate { step: usize, max_steps: usize },
    /// 正在调用 LLM 思考
    Thinking,
    /// 一次迭代完成；tool 为 None 表示本轮解析失败
    Iteration {
        iteration: usize,
        thought: String,
        tool: Option<String>,
        observation_preview: String,
    },
    /// 运行结束
    Terminated {
        reason: TerminationReason,
        answer: String,
    },
    /// Token 使用统计（本次运行增量）
    TokenUsage {
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
    },
}
