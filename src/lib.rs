//! Forager - 自主任务执行智能体
//!
//! 接收自然语言任务，循环「思考 → 解析动作 → 调用工具 → 观察」，直到模型给出最终答案或触及上限。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、恢复引擎（有界重试）、运行状态、组件装配
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock / 脚本回放）
//! - **memory**: Transcript（消息历史）与 Scratchpad（工作记忆）
//! - **observability**: tracing 初始化
//! - **react**: 动作解析与清洗、Planner、控制循环、过程事件
//! - **tools**: 工具 trait、注册表与分发、内置工具（ls、cat、git_status、analyze_code、list_dependencies、execute_code）

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use crate::core::{AgentBuilder, RunResult, TerminationReason};
pub use crate::react::{react_loop, ReactSession};
