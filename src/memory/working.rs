//! 工作记忆（Scratchpad）：单次运行内的键值存储
//!
//! 可复用工具（目录列举、仓库状态、分析报告、依赖列表）成功后，控制循环会把原始结果
//! 自动写入该工具的固定键；需要记忆的工具（如 execute_code）直接按键读取，
//! 模型无需逐字转述之前的大段输出。每键后写覆盖，不做合并；读取未设置的键返回 None。

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// 各类可复用工具结果的固定键
pub mod keys {
    pub const DIRECTORY_LISTING: &str = "directory_listing";
    pub const GIT_STATUS: &str = "git_status";
    pub const ANALYSIS_REPORT: &str = "analysis_report";
    pub const DEPENDENCY_LIST: &str = "dependency_list";
}

/// 单个条目：值 + 写入时所在的迭代序号
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScratchpadEntry {
    pub key: String,
    pub value: Value,
    pub written_at_iteration: usize,
}

/// 工作记忆；由一次运行独占，运行结束即丢弃
#[derive(Clone, Debug, Default)]
pub struct Scratchpad {
    entries: BTreeMap<String, ScratchpadEntry>,
}

impl Scratchpad {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入（后写覆盖）
    pub fn write(&mut self, key: impl Into<String>, value: Value, iteration: usize) {
        let key = key.into();
        tracing::debug!(key = %key, iteration, "scratchpad write");
        self.entries.insert(
            key.clone(),
            ScratchpadEntry {
                key,
                value,
                written_at_iteration: iteration,
            },
        );
    }

    pub fn read(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).map(|e| &e.value)
    }

    /// 当前所有键值的拷贝（供 execute_code 序列化给子进程）
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 构建供 Planner 使用的 Prompt 片段：只列出键与写入轮次，不展开值
    pub fn to_prompt_section(&self) -> String {
        if self.entries.is_empty() {
            return String::new();
        }
        let mut s = String::from("## Working memory\nReference these with memory['<key>'] in execute_code:\n");
        for e in self.entries.values() {
            s.push_str(&format!(
                "- {} (written at iteration {})\n",
                e.key, e.written_at_iteration
            ));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_read_unset_key_is_absent() {
        let pad = Scratchpad::new();
        assert!(pad.read(keys::GIT_STATUS).is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let mut pad = Scratchpad::new();
        pad.write(keys::DIRECTORY_LISTING, json!(["a.rs"]), 1);
        pad.write(keys::DIRECTORY_LISTING, json!(["b.rs", "c.rs"]), 3);
        assert_eq!(pad.len(), 1);
        assert_eq!(pad.read(keys::DIRECTORY_LISTING), Some(&json!(["b.rs", "c.rs"])));
        assert!(pad
            .to_prompt_section()
            .contains("- directory_listing (written at iteration 3)"));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut pad = Scratchpad::new();
        pad.write("k", json!(1), 0);
        let snap = pad.snapshot();
        pad.write("k", json!(2), 1);
        assert_eq!(snap.get("k"), Some(&json!(1)));
    }

    #[test]
    fn test_prompt_section_lists_keys_only() {
        let mut pad = Scratchpad::new();
        assert!(pad.to_prompt_section().is_empty());
        pad.write(keys::DEPENDENCY_LIST, json!(["serde 1.0"]), 2);
        let section = pad.to_prompt_section();
        assert!(section.contains("dependency_list"));
        assert!(!section.contains("serde 1.0"));
    }
}
