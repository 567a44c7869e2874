//! 控制循环
//!
//! 显式状态机：Thinking → Parsing → Dispatching → Observing → (Thinking | Terminated)，
//! 解析失败走 Parsing → Thinking 侧边（注入纠错 Observation，仍消耗一次迭代）。
//! 只有上游不可用、迭代上限、连续解析失败上限会终止运行；未知工具与工具失败都作为 Observation 反馈。
//! 可选 event_tx：每完成一次迭代推送一条 Iteration 事件。

use chrono::Utc;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::core::{
    IterationRecord, LoopPhase, RecoveryEngine, RunResult, TerminationReason,
};
use crate::memory::{Message, Scratchpad, Transcript};
use crate::react::{ActionParser, Planner, ReactEvent};
use crate::tools::{truncate_chars, ToolRegistry, ToolResult};

/// 单次运行默认最大迭代数
pub const DEFAULT_MAX_ITERATIONS: usize = 15;
/// 默认连续解析失败上限（0 表示不单独限制）
pub const DEFAULT_MAX_CONSECUTIVE_PARSE_FAILURES: usize = 5;
/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 一次运行所需的协作者与上限
pub struct ReactSession<'a> {
    pub planner: &'a Planner,
    pub registry: &'a ToolRegistry,
    pub recovery: &'a RecoveryEngine,
    pub max_iterations: usize,
    pub max_consecutive_parse_failures: usize,
    /// 可选：事件推送通道
    pub event_tx: Option<&'a UnboundedSender<ReactEvent>>,
}

impl<'a> ReactSession<'a> {
    pub fn new(
        planner: &'a Planner,
        registry: &'a ToolRegistry,
        recovery: &'a RecoveryEngine,
    ) -> Self {
        Self {
            planner,
            registry,
            recovery,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_consecutive_parse_failures: DEFAULT_MAX_CONSECUTIVE_PARSE_FAILURES,
            event_tx: None,
        }
    }

    /// 设置迭代上限（至少 1）与连续解析失败上限
    pub fn with_limits(
        mut self,
        max_iterations: usize,
        max_consecutive_parse_failures: usize,
    ) -> Self {
        self.max_iterations = max_iterations.max(1);
        self.max_consecutive_parse_failures = max_consecutive_parse_failures;
        self
    }

    /// 设置事件推送通道
    pub fn with_event_tx(mut self, tx: &'a UnboundedSender<ReactEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn emit(&self, ev: ReactEvent) {
        if let Some(tx) = self.event_tx {
            let _ = tx.send(ev);
        }
    }
}

/// 工具结果 → Observation 文本
fn format_observation(tool: &str, result: &ToolResult, saved_as: Option<&str>) -> String {
    let mut s = if result.is_success() {
        format!("Observation from {}:\n{}", tool, result.output)
    } else {
        format!("Observation from {} (error):\n{}", tool, result.output)
    };
    if let Some(key) = saved_as {
        s.push_str(&format!("\n[saved to memory['{key}']]"));
    }
    s
}

/// 执行一次完整运行；总是返回 RunResult
pub async fn react_loop(session: &ReactSession<'_>, task: &str) -> RunResult {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let planner = session.planner;
    let registry = session.registry;
    let recovery = session.recovery;
    let parser = ActionParser::new(registry.tool_names());
    let (init_prompt, init_completion, _) = planner.token_usage();

    let mut transcript = Transcript::new(planner.base_system_prompt(), task);
    let mut scratchpad = Scratchpad::new();
    let mut iterations: Vec<IterationRecord> = Vec::new();
    let mut consecutive_parse_failures = 0usize;
    let mut tool_dispatches = 0usize;
    let mut phase = LoopPhase::Thinking;

    tracing::info!(%run_id, max_iterations = session.max_iterations, "run started");

    let (reason, answer) = loop {
        let index = iterations.len() + 1;
        tracing::debug!(%run_id, iteration = index, phase = phase.name(), "phase");
        phase = match phase {
            LoopPhase::Thinking => {
                session.emit(ReactEvent::StepUpdate {
                    step: index,
                    max_steps: session.max_iterations,
                });
                session.emit(ReactEvent::Thinking);
                match planner
                    .plan(recovery, registry, &scratchpad, &mut transcript)
                    .await
                {
                    Ok(raw) => LoopPhase::Parsing { raw },
                    Err(e) => {
                        tracing::error!(
                            %run_id,
                            iteration = index,
                            error = %e,
                            "upstream unavailable, terminating run"
                        );
                        LoopPhase::Terminated {
                            reason: TerminationReason::UpstreamUnavailable,
                            answer: String::new(),
                        }
                    }
                }
            }

            LoopPhase::Parsing { raw } => {
                transcript.push(Message::assistant(raw.clone()));
                match parser.parse(&raw) {
                    Ok(step) if step.action.is_terminator() => {
                        consecutive_parse_failures = 0;
                        let answer = step.action.answer_text();
                        session.emit(ReactEvent::Iteration {
                            iteration: index,
                            thought: step.thought.clone(),
                            tool: Some(step.action.tool.clone()),
                            observation_preview: truncate_chars(&answer, OBSERVATION_PREVIEW_CHARS),
                        });
                        iterations.push(IterationRecord {
                            index,
                            thought: step.thought,
                            action: Some(step.action),
                            observation: answer.clone(),
                            terminal: true,
                        });
                        LoopPhase::Terminated {
                            reason: TerminationReason::FinalAnswer,
                            answer,
                        }
                    }
                    Ok(step) => {
                        consecutive_parse_failures = 0;
                        tracing::debug!(
                            iteration = index,
                            source = ?step.source,
                            tool = %step.action.tool,
                            "parsed action"
                        );
                        LoopPhase::Dispatching {
                            thought: step.thought,
                            action: step.action,
                        }
                    }
                    Err(e) => {
                        consecutive_parse_failures += 1;
                        tracing::warn!(
                            %run_id,
                            iteration = index,
                            consecutive = consecutive_parse_failures,
                            error = %e,
                            "could not parse model output"
                        );
                        let correction = recovery.parse_correction(&e);
                        transcript.push(Message::observation(correction.clone()));
                        session.emit(ReactEvent::Iteration {
                            iteration: index,
                            thought: String::new(),
                            tool: None,
                            observation_preview: truncate_chars(
                                &correction,
                                OBSERVATION_PREVIEW_CHARS,
                            ),
                        });
                        iterations.push(IterationRecord {
                            index,
                            thought: String::new(),
                            action: None,
                            observation: correction,
                            terminal: false,
                        });
                        let limit = session.max_consecutive_parse_failures;
                        if limit > 0 && consecutive_parse_failures >= limit {
                            LoopPhase::Terminated {
                                reason: TerminationReason::ParseExhausted,
                                answer: String::new(),
                            }
                        } else if iterations.len() >= session.max_iterations {
                            LoopPhase::Terminated {
                                reason: TerminationReason::MaxIterationsReached,
                                answer: String::new(),
                            }
                        } else {
                            LoopPhase::Thinking
                        }
                    }
                }
            }

            LoopPhase::Dispatching { thought, action } => {
                let result = registry.dispatch(&action, &scratchpad).await;
                tool_dispatches += 1;
                LoopPhase::Observing {
                    thought,
                    action,
                    result,
                }
            }

            LoopPhase::Observing {
                thought,
                action,
                result,
            } => {
                // 可复用结果自动写入工作记忆，后写覆盖
                let saved_as = registry
                    .memory_key(&action.tool)
                    .filter(|_| result.is_success());
                if let Some(key) = saved_as {
                    scratchpad.write(key, result.raw.clone(), index);
                }
                let observation = format_observation(&action.tool, &result, saved_as);
                transcript.push(Message::observation(observation.clone()));
                tracing::info!(
                    %run_id,
                    iteration = index,
                    tool = %action.tool,
                    ok = result.is_success(),
                    "iteration complete"
                );
                session.emit(ReactEvent::Iteration {
                    iteration: index,
                    thought: thought.clone(),
                    tool: Some(action.tool.clone()),
                    observation_preview: truncate_chars(&result.output, OBSERVATION_PREVIEW_CHARS),
                });
                iterations.push(IterationRecord {
                    index,
                    thought,
                    action: Some(action),
                    observation,
                    terminal: false,
                });
                if iterations.len() >= session.max_iterations {
                    LoopPhase::Terminated {
                        reason: TerminationReason::MaxIterationsReached,
                        answer: String::new(),
                    }
                } else {
                    LoopPhase::Thinking
                }
            }

            LoopPhase::Terminated { reason, answer } => break (reason, answer),
        };
    };

    // FinalAnswer 原样返回；其它终止原因使用固定文案
    let final_answer = match reason.fixed_message() {
        Some(msg) => msg.to_string(),
        None => answer,
    };

    let (cur_prompt, cur_completion, _) = planner.token_usage();
    let prompt_tokens = cur_prompt.saturating_sub(init_prompt);
    let completion_tokens = cur_completion.saturating_sub(init_completion);
    session.emit(ReactEvent::TokenUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens,
    });
    session.emit(ReactEvent::Terminated {
        reason,
        answer: final_answer.clone(),
    });
    tracing::info!(
        %run_id,
        reason = ?reason,
        iterations = iterations.len(),
        tool_dispatches,
        "run finished"
    );

    RunResult {
        run_id,
        final_answer,
        termination_reason: reason,
        iterations,
        tool_dispatches,
        started_at,
        finished_at: Utc::now(),
    }
}
