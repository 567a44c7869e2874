//! 核心编排层：错误类型、恢复引擎、运行状态与组件装配

pub mod builder;
pub mod error;
pub mod recovery;
pub mod state;

pub use builder::{create_agent_builder, create_llm_from_config, AgentBuilder, AgentComponents};
pub use error::{AgentError, DispatchError, ParseError, RecoveryAction, UpstreamError};
pub use recovery::{RecoveryEngine, RetryPolicy};
pub use state::{
    IterationRecord, LoopPhase, RunResult, TerminationReason, MAX_ITERATIONS_MESSAGE,
    PARSE_EXHAUSTED_MESSAGE, UPSTREAM_APOLOGY,
};
