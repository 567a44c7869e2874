//! 运行状态：控制循环阶段、迭代记录与运行结果

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::tools::{Action, ToolResult};

/// 上游不可用时返回给用户的固定文案
pub const UPSTREAM_APOLOGY: &str =
    "Sorry, the language model service is currently unavailable, so I could not complete this task. Please try again later.";
/// 达到迭代上限时的固定文案
pub const MAX_ITERATIONS_MESSAGE: &str =
    "I could not complete the task within the allowed number of steps.";
/// 连续解析失败过多时的固定文案
pub const PARSE_EXHAUSTED_MESSAGE: &str =
    "I could not produce a valid action after repeated attempts, so the task was stopped.";

/// 终止原因
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TerminationReason {
    FinalAnswer,
    MaxIterationsReached,
    UpstreamUnavailable,
    ParseExhausted,
}

impl TerminationReason {
    /// 非 FinalAnswer 的终止对应的固定用户文案
    pub fn fixed_message(&self) -> Option<&'static str> {
        match self {
            TerminationReason::FinalAnswer => None,
            TerminationReason::MaxIterationsReached => Some(MAX_ITERATIONS_MESSAGE),
            TerminationReason::UpstreamUnavailable => Some(UPSTREAM_APOLOGY),
            TerminationReason::ParseExhausted => Some(PARSE_EXHAUSTED_MESSAGE),
        }
    }
}

/// 控制循环状态机：THINKING → PARSING → DISPATCHING → OBSERVING → (THINKING | TERMINATED)
#[derive(Debug)]
pub enum LoopPhase {
    Thinking,
    Parsing {
        raw: String,
    },
    Dispatching {
        thought: String,
        action: Action,
    },
    Observing {
        thought: String,
        action: Action,
        result: ToolResult,
    },
    Terminated {
        reason: TerminationReason,
        answer: String,
    },
}

impl LoopPhase {
    pub fn name(&self) -> &'static str {
        match self {
            LoopPhase::Thinking => "thinking",
            LoopPhase::Parsing { .. } => "parsing",
            LoopPhase::Dispatching { .. } => "dispatching",
            LoopPhase::Observing { .. } => "observing",
            LoopPhase::Terminated { .. } => "terminated",
        }
    }
}

/// 一次迭代的审计记录；解析失败的迭代 action 为 None
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IterationRecord {
    pub index: usize,
    pub thought: String,
    pub action: Option<Action>,
    pub observation: String,
    pub terminal: bool,
}

impl IterationRecord {
    /// 本次迭代是否真正调用了工具
    pub fn dispatched(&self) -> bool {
        !self.terminal && self.action.is_some()
    }
}

/// 运行结果
#[derive(Clone, Debug, Serialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub final_answer: String,
    pub termination_reason: TerminationReason,
    pub iterations: Vec<IterationRecord>,
    pub tool_dispatches: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    pub fn succeeded(&self) -> bool {
        self.termination_reason == TerminationReason::FinalAnswer
    }
}
