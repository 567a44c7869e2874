//! 动作格式 JSON Schema（schemars 生成）
//!
//! 拼入 system prompt，告诉模型一次回复的合法结构，减少格式错误。

use schemars::{schema_for, JsonSchema};
use std::collections::BTreeMap;

/// 一次回复的结构（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ActionFormat {
    /// 本轮推理
    pub thought: String,
    pub action: ActionCall,
}

#[allow(dead_code)]
#[derive(JsonSchema)]
struct ActionCall {
    /// 工具名，如 ls、cat、execute_code；结束时用 final_answer
    pub tool: String,
    /// 工具参数（键值均为字符串），或一段文本
    pub input: BTreeMap<String, String>,
}

/// 返回动作格式的 JSON Schema 字符串
pub fn action_format_schema_json() -> String {
    let schema = schema_for!(ActionFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
