//! 工具注册表与分发器
//!
//! 所有工具实现 Tool trait，由 ToolRegistry 按名注册；dispatch 是唯一调用工具的入口：
//! 对声明需要工作记忆的工具注入 Scratchpad，未知工具与执行失败都渲染为 error 状态的 ToolResult，
//! 不重试、不另加超时（超时由各工具自己负责）；每次调用输出一条结构化审计日志。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::core::DispatchError;
use crate::memory::Scratchpad;
use crate::tools::{truncate_chars, Action, ActionInput};

const AUDIT_PREVIEW_CHARS: usize = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Error,
}

/// 工具结果：output 为给模型看的文本，raw 为原始负载（可复用工具会被写入工作记忆）
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolResult {
    pub status: ToolStatus,
    pub output: String,
    pub raw: Value,
}

impl ToolResult {
    pub fn success(output: impl Into<String>, raw: Value) -> Self {
        Self {
            status: ToolStatus::Success,
            output: output.into(),
            raw,
        }
    }

    pub fn error(output: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            output: output.into(),
            raw: Value::Null,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }
}

/// 分发时传给工具的上下文；只有 needs_memory 的工具拿得到 Scratchpad
#[derive(Clone, Copy, Default)]
pub struct ToolContext<'a> {
    pub memory: Option<&'a Scratchpad>,
}

/// 工具 trait：名称、描述、参数 schema、是否读取工作记忆、结果的固定记忆键、异步执行
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    fn needs_memory(&self) -> bool {
        false
    }

    /// 成功结果自动写入工作记忆时使用的键；None 表示结果不可复用
    fn memory_key(&self) -> Option<&'static str> {
        None
    }

    async fn execute(
        &self,
        input: &ActionInput,
        ctx: ToolContext<'_>,
    ) -> Result<ToolResult, DispatchError>;
}

struct RegisteredTool {
    handler: Arc<dyn Tool>,
    needs_memory: bool,
}

/// 工具注册表：每个控制循环构造一次并按引用传入，不存在全局单例
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以工具自身的名称与记忆需求注册
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        let needs_memory = tool.needs_memory();
        self.register_with(name, tool, needs_memory);
    }

    /// 显式指定名称与是否注入工作记忆
    pub fn register_with(
        &mut self,
        name: impl Into<String>,
        handler: impl Tool + 'static,
        needs_memory: bool,
    ) {
        self.tools.insert(
            name.into(),
            RegisteredTool {
                handler: Arc::new(handler),
                needs_memory,
            },
        );
    }

    pub fn needs_memory(&self, name: &str) -> bool {
        self.tools.get(name).map(|t| t.needs_memory).unwrap_or(false)
    }

    pub fn memory_key(&self, name: &str) -> Option<&'static str> {
        self.tools.get(name).and_then(|t| t.handler.memory_key())
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 分发一个动作；总是返回 ToolResult
    pub async fn dispatch(&self, action: &Action, scratchpad: &Scratchpad) -> ToolResult {
        let start = Instant::now();
        let result = match self.tools.get(&action.tool) {
            None => ToolResult::error(
                DispatchError::UnknownTool {
                    name: action.tool.clone(),
                    available: self.tool_names(),
                }
                .to_string(),
            ),
            Some(entry) => {
                let ctx = ToolContext {
                    memory: entry.needs_memory.then_some(scratchpad),
                };
                match entry.handler.execute(&action.input, ctx).await {
                    Ok(r) => r,
                    Err(e) => ToolResult::error(e.to_string()),
                }
            }
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": action.tool,
            "ok": result.is_success(),
            "duration_ms": start.elapsed().as_millis() as u64,
            "input_preview": action.input.preview(AUDIT_PREVIEW_CHARS),
            "output_preview": truncate_chars(&result.output, AUDIT_PREVIEW_CHARS),
        });
        tracing::info!(audit = %audit, "tool");
        result
    }

    /// Prompt 中的工具目录：名称、描述、是否读取工作记忆、参数 schema
    pub fn catalogue(&self) -> String {
        let mut s = String::new();
        for (name, entry) in &self.tools {
            s.push_str(&format!("- {}: {}", name, entry.handler.description()));
            if entry.needs_memory {
                s.push_str(" [reads working memory]");
            }
            if let Some(key) = entry.handler.memory_key() {
                s.push_str(&format!(" [result saved as memory['{key}']]"));
            }
            s.push('\n');
            s.push_str(&format!("  parameters: {}\n", entry.handler.parameters_schema()));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::keys;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo text"
        }
        async fn execute(
            &self,
            input: &ActionInput,
            ctx: ToolContext<'_>,
        ) -> Result<ToolResult, DispatchError> {
            #[derive(serde::Deserialize)]
            struct EchoInput {
                text: String,
            }
            let parsed: EchoInput = input.decode("text").map_err(|reason| {
                DispatchError::InvalidInput {
                    tool: "echo".into(),
                    reason,
                }
            })?;
            let saw_memory = ctx.memory.is_some();
            Ok(ToolResult::success(parsed.text, json!({ "saw_memory": saw_memory })))
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_result() {
        let mut registry = ToolRegistry::new();
        registry.register(Echo);
        let r = registry
            .dispatch(&Action::new("rm", ActionInput::default()), &Scratchpad::new())
            .await;
        assert_eq!(r.status, ToolStatus::Error);
        assert!(r.output.contains("Unknown tool 'rm'"));
        assert!(r.output.contains("echo"));
    }

    #[tokio::test]
    async fn test_memory_injected_only_when_declared() {
        let mut registry = ToolRegistry::new();
        registry.register(Echo);
        registry.register_with("echo_mem", Echo, true);
        let mut pad = Scratchpad::new();
        pad.write(keys::GIT_STATUS, json!("clean"), 0);

        let plain = registry
            .dispatch(&Action::new("echo", ActionInput::Text("hi".into())), &pad)
            .await;
        assert_eq!(plain.raw, json!({"saw_memory": false}));

        let with_mem = registry
            .dispatch(&Action::new("echo_mem", ActionInput::Text("hi".into())), &pad)
            .await;
        assert_eq!(with_mem.output, "hi");
        assert_eq!(with_mem.raw, json!({"saw_memory": true}));
    }

    #[tokio::test]
    async fn test_invalid_input_becomes_error_result() {
        let mut registry = ToolRegistry::new();
        registry.register(Echo);
        let r = registry
            .dispatch(&Action::new("echo", ActionInput::default()), &Scratchpad::new())
            .await;
        assert!(!r.is_success());
        assert!(r.output.contains("Invalid input"));
    }

    #[test]
    fn test_catalogue_marks_memory_tools() {
        let mut registry = ToolRegistry::new();
        registry.register_with("echo_mem", Echo, true);
        assert!(registry.catalogue().contains("[reads working memory]"));
        assert!(registry.needs_memory("echo_mem"));
        assert!(registry.memory_key("echo_mem").is_none());
    }
}
