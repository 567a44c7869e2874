//! 错误类型与恢复动作
//!
//! - ParseError / DispatchError：可恢复，转为 Observation 反馈给模型自我纠正
//! - UpstreamError：Transient 由 RecoveryEngine 内部重试；Fatal 或重试耗尽则终止运行
//! - AgentError：装配期错误（配置、沙箱路径等），不出现在控制循环内部

use std::time::Duration;

use thiserror::Error;

/// 装配与工具内部使用的错误（配置、路径逃逸、IO）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),
}

/// 模型输出无法解析为动作
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty response")]
    Empty,

    #[error("no action found in response: {preview}")]
    NoAction { preview: String },

    #[error("structured block has no tool name: {preview}")]
    MissingTool { preview: String },

    #[error("invalid structured block ({reason}): {preview}")]
    InvalidBlock { reason: String, preview: String },
}

/// 文本生成服务调用失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// 可重试（服务不可用、超时、连接重置）；只在 RecoveryEngine 内部出现
    #[error("transient upstream failure: {0}")]
    Transient(String),

    /// 不可重试（如请求格式错误、鉴权失败）
    #[error("fatal upstream failure: {0}")]
    Fatal(String),

    /// 重试次数耗尽
    #[error("upstream unavailable after {attempts} attempts: {last_error}")]
    Unavailable { attempts: u32, last_error: String },
}

impl UpstreamError {
    pub fn is_transient(&self) -> bool {
        matches!(self, UpstreamError::Transient(_))
    }
}

/// 工具分发失败；dispatch 把它渲染成 error 状态的 ToolResult，不会中止循环
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Unknown tool '{name}'. Available tools: {}", available.join(", "))]
    UnknownTool { name: String, available: Vec<String> },

    #[error("Invalid input for tool '{tool}': {reason}")]
    InvalidInput { tool: String, reason: String },

    #[error("Tool '{tool}' failed: {reason}")]
    ToolFailed { tool: String, reason: String },
}

/// RecoveryEngine 对单次上游失败给出的动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 等待后重试
    RetryAfter(Duration),
    /// 放弃本次调用
    Abort,
}
