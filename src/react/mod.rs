//! 认知层：动作解析、Planner、控制循环与过程事件

pub mod events;
pub mod loop_;
pub mod parser;
pub mod planner;

pub use events::ReactEvent;
pub use loop_::{
    react_loop, ReactSession, DEFAULT_MAX_CONSECUTIVE_PARSE_FAILURES, DEFAULT_MAX_ITERATIONS,
};
pub use parser::{sanitize, ActionParser, ExtractionStrategy, ParsedStep, StepSource};
pub use planner::{Planner, DEFAULT_SYSTEM_PROMPT};
