//! 动作与工具输入
//!
//! 模型给出的 input 可以是一段文本或一个字符串键值表；各工具在分发时把它解码成自己的
//! 强类型输入结构，多余字段忽略，文本输入映射到该工具的主字段。

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::FINAL_ANSWER;

/// 动作输入：文本或键值表
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionInput {
    Text(String),
    Fields(BTreeMap<String, String>),
}

impl Default for ActionInput {
    fn default() -> Self {
        ActionInput::Fields(BTreeMap::new())
    }
}

impl ActionInput {
    /// 从任意 JSON 值构造：字符串 → Text，对象 → Fields（非字符串值转为 JSON 文本），null → 空表
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => ActionInput::default(),
            Value::String(s) => ActionInput::Text(s.clone()),
            Value::Object(map) => ActionInput::Fields(
                map.iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| (k.clone(), value_to_string(v)))
                    .collect(),
            ),
            other => ActionInput::Text(value_to_string(other)),
        }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        match self {
            ActionInput::Fields(map) => map.get(field).map(String::as_str),
            ActionInput::Text(_) => None,
        }
    }

    /// 解码为工具的强类型输入；Text 输入放进 primary_field
    pub fn decode<T: DeserializeOwned>(&self, primary_field: &str) -> Result<T, String> {
        let value = match self {
            ActionInput::Text(text) => {
                let mut map = serde_json::Map::new();
                map.insert(primary_field.to_string(), Value::String(text.clone()));
                Value::Object(map)
            }
            ActionInput::Fields(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        };
        serde_json::from_value(value).map_err(|e| e.to_string())
    }

    /// 日志/事件用的短预览
    pub fn preview(&self, max_chars: usize) -> String {
        let s = match self {
            ActionInput::Text(t) => t.clone(),
            ActionInput::Fields(f) => serde_json::to_string(f).unwrap_or_default(),
        };
        truncate_chars(&s, max_chars)
    }
}

/// 解析得到的动作
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub tool: String,
    #[serde(default)]
    pub input: ActionInput,
}

impl Action {
    pub fn new(tool: impl Into<String>, input: ActionInput) -> Self {
        Self {
            tool: tool.into(),
            input,
        }
    }

    pub fn final_answer(answer: impl Into<String>) -> Self {
        Self::new(FINAL_ANSWER, ActionInput::Text(answer.into()))
    }

    pub fn is_terminator(&self) -> bool {
        self.tool == FINAL_ANSWER
    }

    /// 终止动作携带的答案文本，原样返回
    pub fn answer_text(&self) -> String {
        match &self.input {
            ActionInput::Text(t) => t.clone(),
            ActionInput::Fields(f) => ["answer", "final_answer", "text", "output", "result"]
                .iter()
                .find_map(|k| f.get(*k))
                .or_else(|| f.values().next())
                .cloned()
                .unwrap_or_default(),
        }
    }
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 按字符截断，超长时追加 "..."
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct LsLike {
        #[serde(default)]
        path: String,
        #[serde(default)]
        recursive: Option<String>,
    }

    #[test]
    fn test_from_value_stringifies_non_strings() {
        let input = ActionInput::from_value(&json!({"path": "src", "depth": 2, "skip": null}));
        assert_eq!(input.get("path"), Some("src"));
        assert_eq!(input.get("depth"), Some("2"));
        assert_eq!(input.get("skip"), None);
    }

    #[test]
    fn test_decode_text_goes_to_primary_field() {
        let decoded: LsLike = ActionInput::Text("src".into()).decode("path").unwrap();
        assert_eq!(decoded.path, "src");
        assert!(decoded.recursive.is_none());
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let input = ActionInput::from_value(&json!({"path": "a", "colour": "blue"}));
        let decoded: LsLike = input.decode("path").unwrap();
        assert_eq!(decoded.path, "a");
    }

    #[test]
    fn test_answer_text_prefers_answer_field() {
        let action = Action::new(
            FINAL_ANSWER,
            ActionInput::from_value(&json!({"note": "x", "answer": "42"})),
        );
        assert_eq!(action.answer_text(), "42");
        assert_eq!(Action::final_answer("  spaced  ").answer_text(), "  spaced  ");
    }
}
