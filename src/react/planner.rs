//! Planner：拼装 system prompt 并通过恢复引擎调用 LLM
//!
//! system prompt = 基础指令 + 工具目录 + 动作格式 Schema + 终止约定 + 当前工作记忆键。
//! 每轮思考前刷新，让模型看到最新写入的记忆键。

use std::sync::Arc;

use crate::core::{RecoveryEngine, UpstreamError};
use crate::llm::LlmClient;
use crate::memory::{Scratchpad, Transcript};
use crate::tools::{action_format_schema_json, ToolRegistry, FINAL_ANSWER};

/// 未配置 prompt 文件时使用的基础指令
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an autonomous software engineering agent working inside a sandboxed workspace. \
Solve the task step by step. In every reply, think briefly and then choose exactly one tool to call. \
You will receive the tool result as an Observation before your next reply.";

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn base_system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 完整的 system 消息
    pub fn system_message(&self, registry: &ToolRegistry, scratchpad: &Scratchpad) -> String {
        let mut s = format!(
            "{}\n\n## Tools\n{}- {}: finish the task. Input is the answer text for the user.\n\n\
            ## Response format\nReply with a short thought, then one JSON object in a ```json block \
            matching this schema:\n{}\n\
            Example:\n```json\n{{\"thought\": \"I need the file list\", \"action\": {{\"tool\": \"ls\", \"input\": {{\"path\": \".\"}}}}}}\n```\n\
            Multi-line code must be a single JSON string with \\n escapes. \
            Tool results marked as saved are stored in working memory; in execute_code read them with \
            memory['<key>'] instead of copying them into the code.\n",
            self.system_prompt.trim_end(),
            registry.catalogue(),
            FINAL_ANSWER,
            action_format_schema_json(),
        );
        let memory = scratchpad.to_prompt_section();
        if !memory.is_empty() {
            s.push('\n');
            s.push_str(&memory);
        }
        s
    }

    /// 刷新 system 消息后调用模型；重试对 Transcript 不可见
    pub async fn plan(
        &self,
        recovery: &RecoveryEngine,
        registry: &ToolRegistry,
        scratchpad: &Scratchpad,
        transcript: &mut Transcript,
    ) -> Result<String, UpstreamError> {
        transcript.set_system(self.system_message(registry, scratchpad));
        recovery
            .call_model(self.llm.as_ref(), transcript.messages())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::memory::{keys, Role};
    use serde_json::json;

    #[test]
    fn test_system_message_lists_tools_and_memory_keys() {
        let planner = Planner::new(Arc::new(ScriptedLlmClient::default()), "Base.");
        let mut registry = ToolRegistry::new();
        registry.register(crate::tools::LsTool::new("."));
        let mut pad = Scratchpad::new();
        let empty = planner.system_message(&registry, &pad);
        assert!(empty.starts_with("Base."));
        assert!(empty.contains("- ls:"));
        assert!(empty.contains(FINAL_ANSWER));
        assert!(!empty.contains("## Working memory"));

        pad.write(keys::DIRECTORY_LISTING, json!(["a"]), 1);
        let with_memory = planner.system_message(&registry, &pad);
        assert!(with_memory.contains("- directory_listing (written at iteration 1)"));
    }

    #[tokio::test]
    async fn test_plan_refreshes_system_in_place() {
        let llm = Arc::new(ScriptedLlmClient::replies(["ok"]));
        let planner = Planner::new(llm.clone(), "Base.");
        let registry = ToolRegistry::new();
        let pad = Scratchpad::new();
        let mut transcript = Transcript::new("stale", "task");
        let out = planner
            .plan(&RecoveryEngine::default(), &registry, &pad, &mut transcript)
            .await
            .unwrap();
        assert_eq!(out, "ok");
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.count(Role::System), 1);
        assert!(transcript.messages()[0].content.starts_with("Base."));
        assert_eq!(llm.seen_lengths(), vec![2]);
    }
}
