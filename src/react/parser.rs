//! 结构化动作解析与清洗
//!
//! 把模型的自由文本回复转成 (thought, action)。流程：
//! 1. 去除破坏解析的控制字符（保留 \n \t \r）与零宽字符
//! 2. 按提取策略链定位结构化块：```json 围栏 → "Action:" 标记之后 → 整段文本
//! 3. 统一工作记忆引用写法为 `memory['key']`（先于多行处理，未转义的 memory["k"] 不会截断字符串）
//! 4. 去掉字符串字面量之外的行首装饰符号（状态图标、emoji）
//! 5. 把字符串值中的物理换行（多行代码参数）转义为 `\n`，三引号块转为 JSON 字符串
//! 6. 解码为 JSON，宽松识别几种常见结构，工具名归一化（"Final Answer" → final_answer）
//! 7. 解码失败时走启发式：块中点名的已知工具、行首 Final Answer 短语、
//!    ReAct 风格 Action/Action Input、已知工具名子串
//!
//! parse 从不 panic：要么返回可用的 Action，要么返回带类型的 ParseError。

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::core::ParseError;
use crate::tools::{truncate_chars, Action, ActionInput, FINAL_ANSWER};

const PREVIEW_CHARS: usize = 120;

/// 解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStep {
    pub thought: String,
    pub action: Action,
    pub source: StepSource,
}

/// 动作来自哪条路径（用于日志）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepSource {
    Structured(ExtractionStrategy),
    Heuristic,
}

/// 结构化块提取策略；按顺序尝试，第一个返回 Some 的胜出
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    /// ```json ... ``` 围栏
    FencedJson,
    /// 字面 "Action:" 标记之后的全部文本
    ActionMarker,
    /// 整段文本（兜底）
    WholeText,
}

impl ExtractionStrategy {
    pub const DEFAULT_CHAIN: [ExtractionStrategy; 3] = [
        ExtractionStrategy::FencedJson,
        ExtractionStrategy::ActionMarker,
        ExtractionStrategy::WholeText,
    ];

    pub fn extract<'a>(&self, text: &'a str) -> Option<&'a str> {
        match self {
            ExtractionStrategy::FencedJson => {
                let lower = text.to_ascii_lowercase();
                let start = lower.find("```json")? + "```json".len();
                let rest = &text[start..];
                let block = rest.find("```").map(|end| &rest[..end]).unwrap_or(rest);
                non_empty(block)
            }
            ExtractionStrategy::ActionMarker => {
                let start = text.find("Action:")? + "Action:".len();
                let rest = text[start..].trim();
                let rest = rest.strip_prefix("```").unwrap_or(rest);
                let rest = rest.trim_end().strip_suffix("```").unwrap_or(rest);
                non_empty(rest)
            }
            ExtractionStrategy::WholeText => non_empty(text),
        }
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let t = s.trim();
    (!t.is_empty()).then_some(t)
}

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn memory_ref_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(
        &RE,
        r#"\b(?:memory|scratchpad)\s*\[\s*\\?["']([A-Za-z0-9_.\-]+)\\?["']\s*\]"#,
    )
}

fn triple_quote_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r#"(?s)"""(.*?)""""#)
}

fn final_answer_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r"(?ims)^[ \t]*final[ _]?answer[ \t]*:[ \t]*(.+)")
}

fn react_action_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(
        &RE,
        r"(?ms)^\s*Action\s*:\s*([A-Za-z][\w\- ]*?)\s*$\s*^\s*Action Input\s*:\s*(.*)",
    )
}

fn string_pair_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r#""([A-Za-z_][A-Za-z0-9_]*)"\s*:\s*"((?:[^"\\]|\\.)*)""#)
}

/// 零宽字符与 BOM
fn is_zero_width(c: char) -> bool {
    matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}')
}

/// 去除控制字符（保留 \n \t \r）与零宽字符
pub fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter(|&c| !(c.is_control() && !matches!(c, '\n' | '\t' | '\r')) && !is_zero_width(c))
        .collect()
}

/// 行首装饰符号：箭头、几何图形、杂项符号、dingbats、emoji 及变体选择符
fn is_decoration(c: char) -> bool {
    matches!(c,
        '\u{2022}' | '\u{2023}' | '\u{2043}'
        | '\u{2190}'..='\u{21FF}'
        | '\u{2300}'..='\u{23FF}'
        | '\u{2460}'..='\u{24FF}'
        | '\u{2500}'..='\u{27BF}'
        | '\u{2900}'..='\u{297F}'
        | '\u{2B00}'..='\u{2BFF}'
        | '\u{FE0E}' | '\u{FE0F}'
        | '\u{1F000}'..='\u{1FAFF}')
}

fn strip_line_decoration(line: &str) -> String {
    let body = line.trim_start();
    let indent = &line[..line.len() - body.len()];
    match body.chars().next() {
        Some(c) if is_decoration(c) => {
            let rest = body.trim_start_matches(|c: char| is_decoration(c) || c.is_whitespace());
            format!("{indent}{rest}")
        }
        _ => line.to_string(),
    }
}

/// 去掉每行缩进之后的装饰符号串（及其后的空白），缩进保留
pub fn strip_decorations(text: &str) -> String {
    text.split('\n')
        .map(strip_line_decoration)
        .collect::<Vec<_>>()
        .join("\n")
}

/// 结构化块内的装饰清理：起始于字符串字面量内部的行（多行代码参数）原样保留
fn strip_block_decorations(block: &str) -> String {
    let mut in_string = false;
    let mut escaped = false;
    block
        .split('\n')
        .map(|line| {
            let out = if in_string {
                line.to_string()
            } else {
                strip_line_decoration(line)
            };
            for c in line.chars() {
                match c {
                    _ if escaped => escaped = false,
                    '\\' if in_string => escaped = true,
                    '"' => in_string = !in_string,
                    _ => {}
                }
            }
            out
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 清洗：控制字符 + 行首装饰；幂等
pub fn sanitize(text: &str) -> String {
    strip_decorations(&strip_control_chars(text))
}

/// 统一工作记忆引用：memory["k"] / memory[\"k\"] / scratchpad['k'] → memory['k']
pub fn normalize_memory_refs(block: &str) -> String {
    match memory_ref_re() {
        Some(re) => re.replace_all(block, "memory['$1']").into_owned(),
        None => block.to_string(),
    }
}

/// 多行字符串归一：三引号块转 JSON 字符串；字符串内的物理换行、制表符转义
pub fn normalize_multiline(block: &str) -> String {
    let block = match triple_quote_re() {
        Some(re) => re
            .replace_all(block, |caps: &regex::Captures| {
                serde_json::to_string(&caps[1]).unwrap_or_default()
            })
            .into_owned(),
        None => block.to_string(),
    };

    let mut out = String::with_capacity(block.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut chars = block.chars().peekable();
    while let Some(c) = chars.next() {
        if !in_string {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
            continue;
        }
        if escaped {
            escaped = false;
            out.push(c);
            continue;
        }
        match c {
            '\\' => {
                escaped = true;
                out.push(c);
            }
            '"' => {
                in_string = false;
                out.push(c);
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

/// 工具名归一：小写，空格/连字符 → 下划线，终止工具的别名映射为 final_answer
pub fn normalize_tool_name(name: &str) -> String {
    let canonical: String = name
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    match canonical.as_str() {
        "final_answer" | "finalanswer" | "final" | "finish" | "answer" | "done" => {
            FINAL_ANSWER.to_string()
        }
        _ => canonical,
    }
}

/// 取出第一个平衡的 JSON 对象文本（忽略字符串中的花括号）
fn json_object_span(block: &str) -> Option<&str> {
    let start = block.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in block[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&block[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    // 不平衡时退回到最后一个 '}'
    let end = block.rfind('}')?;
    (end > start).then(|| &block[start..=end])
}

fn first_field<'v>(obj: &'v Map<String, Value>, names: &[&str]) -> Option<&'v Value> {
    names.iter().find_map(|n| obj.get(*n)).filter(|v| !v.is_null())
}

fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

const INPUT_FIELDS: &[&str] = &["input", "args", "arguments", "tool_input", "action_input", "parameters"];
const TOOL_FIELDS: &[&str] = &["tool", "name", "tool_name"];

/// 从解码后的对象中识别 (thought, action)
fn interpret(value: &Value) -> Result<(Option<String>, Action), String> {
    let Value::Object(obj) = value else {
        return Err("top-level value is not an object".to_string());
    };
    let thought = first_field(obj, &["thought", "thoughts", "reasoning"]).and_then(as_text);

    if let Some(answer) = first_field(obj, &["final_answer", "finalAnswer"]) {
        let answer = as_text(answer).unwrap_or_default();
        return Ok((thought, Action::final_answer(answer)));
    }

    let (tool, input) = match obj.get("action") {
        Some(Value::Object(action)) => (
            first_field(action, TOOL_FIELDS).and_then(as_text),
            first_field(action, INPUT_FIELDS),
        ),
        Some(Value::String(tool)) => (Some(tool.clone()), first_field(obj, INPUT_FIELDS)),
        _ => (
            first_field(obj, TOOL_FIELDS).and_then(as_text),
            first_field(obj, INPUT_FIELDS),
        ),
    };
    let tool = tool
        .map(|t| normalize_tool_name(&t))
        .filter(|t| !t.is_empty())
        .ok_or_else(|| "missing tool".to_string())?;
    let input = input.map(ActionInput::from_value).unwrap_or_default();
    Ok((thought, Action::new(tool, input)))
}

/// 回复中 "Thought:" 之后、动作之前的文本；没有标记时取结构化块之前的散文
fn prose_thought(text: &str) -> String {
    if let Some(idx) = text.find("Thought:") {
        let rest = &text[idx + "Thought:".len()..];
        let end = ["\nAction", "```", "{"]
            .iter()
            .filter_map(|m| rest.find(m))
            .min()
            .unwrap_or(rest.len());
        return rest[..end].trim().to_string();
    }
    let end = ["```", "Action:", "{"]
        .iter()
        .filter_map(|m| text.find(m))
        .min()
        .unwrap_or(0);
    text[..end].trim().to_string()
}

/// 动作解析器：持有已知工具名（启发式回退用）
#[derive(Debug, Clone)]
pub struct ActionParser {
    known_tools: Vec<(String, Regex)>,
}

impl ActionParser {
    pub fn new<I, S>(known_tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tools: Vec<String> = known_tools.into_iter().map(Into::into).collect();
        // 长名优先，避免 git_status 被更短的名字截胡
        tools.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let known_tools = tools
            .into_iter()
            .filter(|t| t != FINAL_ANSWER)
            .filter_map(|t| {
                Regex::new(&format!(r"\b{}\b", regex::escape(&t)))
                    .ok()
                    .map(|re| (t, re))
            })
            .collect();
        Self { known_tools }
    }

    pub fn parse(&self, raw: &str) -> Result<ParsedStep, ParseError> {
        let text = strip_control_chars(raw);
        if text.trim().is_empty() {
            return Err(ParseError::Empty);
        }
        let preview = truncate_chars(text.trim(), PREVIEW_CHARS);
        let cleaned = sanitize(&text);

        let located = ExtractionStrategy::DEFAULT_CHAIN
            .iter()
            .find_map(|s| s.extract(&text).map(|block| (*s, block)));

        let mut located_block: Option<String> = None;
        let mut structured_err = ParseError::NoAction {
            preview: preview.clone(),
        };
        if let Some((strategy, block)) = located {
            let block =
                normalize_multiline(&strip_block_decorations(&normalize_memory_refs(block)));
            located_block = Some(block.clone());
            if let Some(span) = json_object_span(&block) {
                match serde_json::from_str::<Value>(span) {
                    Ok(value) => match interpret(&value) {
                        Ok((thought, action)) => {
                            let thought = thought.unwrap_or_else(|| prose_thought(&cleaned));
                            return Ok(ParsedStep {
                                thought,
                                action,
                                source: StepSource::Structured(strategy),
                            });
                        }
                        Err(_) => {
                            structured_err = ParseError::MissingTool {
                                preview: preview.clone(),
                            }
                        }
                    },
                    Err(e) => {
                        structured_err = ParseError::InvalidBlock {
                            reason: e.to_string(),
                            preview: preview.clone(),
                        }
                    }
                }
            }
        }

        match self.heuristic(&cleaned, located_block.as_deref()) {
            Some(action) => Ok(ParsedStep {
                thought: prose_thought(&cleaned),
                action,
                source: StepSource::Heuristic,
            }),
            None => Err(structured_err),
        }
    }

    /// 启发式回退：结构化块中点名的已知工具 → 行首 Final Answer 短语 →
    /// ReAct 风格 Action/Action Input → 已知工具名子串
    fn heuristic(&self, text: &str, block: Option<&str>) -> Option<Action> {
        if let Some(block) = block {
            if let Some(tool) = self.tool_named_in(block) {
                return string_fields(block)
                    .map(|fields| Action::new(tool, ActionInput::Fields(fields)));
            }
        }

        if let Some(caps) = final_answer_re().and_then(|re| re.captures(text)) {
            let answer = caps[1].trim();
            if !answer.is_empty() {
                return Some(Action::final_answer(answer));
            }
        }

        if let Some(caps) = react_action_re().and_then(|re| re.captures(text)) {
            let tool = normalize_tool_name(&caps[1]);
            let raw_input = caps[2].trim();
            let input = match serde_json::from_str::<Value>(raw_input) {
                Ok(v) => ActionInput::from_value(&v),
                Err(_) if raw_input.is_empty() => ActionInput::default(),
                Err(_) => ActionInput::Text(raw_input.to_string()),
            };
            if tool == FINAL_ANSWER {
                return Some(Action::final_answer(raw_input));
            }
            if self.is_known(&tool) {
                return Some(Action::new(tool, input));
            }
        }

        let (tool, _) = self
            .known_tools
            .iter()
            .filter_map(|(t, re)| re.find(text).map(|m| (t, m.start())))
            .min_by_key(|(_, pos)| *pos)?;
        let fields = string_fields(text)?;
        Some(Action::new(tool.clone(), ActionInput::Fields(fields)))
    }

    fn is_known(&self, tool: &str) -> bool {
        self.known_tools.iter().any(|(t, _)| t == tool)
    }

    /// 块内 "tool": "<name>" 之类字段点名的已知工具
    fn tool_named_in(&self, block: &str) -> Option<String> {
        let re = string_pair_re()?;
        re.captures_iter(block)
            .filter(|c| TOOL_FIELDS.contains(&&c[1]) || &c[1] == "action")
            .map(|c| normalize_tool_name(&unescape(&c[2])))
            .find(|t| self.is_known(t))
    }
}

/// 从残缺 JSON 中逐个提取 "key": "value" 字符串字段；
/// 任一值疑似在未转义的引号处被截断时放弃，宁可报解析错误也不派发残缺参数
fn string_fields(text: &str) -> Option<BTreeMap<String, String>> {
    let Some(re) = string_pair_re() else {
        return Some(BTreeMap::new());
    };
    let mut fields = BTreeMap::new();
    for caps in re.captures_iter(text) {
        let whole = caps.get(0)?;
        let next = text[whole.end()..].chars().next();
        if !matches!(next, None | Some(',' | '}' | ']' | ':') | Some(' ' | '\t' | '\n' | '\r')) {
            return None;
        }
        let key = &caps[1];
        let is_meta = matches!(key, "action" | "thought" | "thoughts" | "reasoning");
        if TOOL_FIELDS.contains(&key) || is_meta {
            continue;
        }
        fields.insert(caps[1].to_string(), unescape(&caps[2]));
    }
    Some(fields)
}

fn unescape(s: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{s}\"")).unwrap_or_else(|_| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> ActionParser {
        ActionParser::new(["ls", "cat", "git_status", "execute_code", "final_answer"])
    }

    #[test]
    fn test_fenced_json_block() {
        let raw = "I should list the files.\n```json\n{\"thought\": \"list\", \"action\": {\"tool\": \"ls\", \"input\": {\"path\": \"src\"}}}\n```";
        let step = parser().parse(raw).unwrap();
        assert_eq!(step.thought, "list");
        assert_eq!(step.action.tool, "ls");
        assert_eq!(step.action.input.get("path"), Some("src"));
        assert_eq!(step.source, StepSource::Structured(ExtractionStrategy::FencedJson));
    }

    #[test]
    fn test_action_marker_with_thought_line() {
        let raw = "Thought: check the repo\nAction: {\"tool\": \"git_status\", \"input\": {}}";
        let step = parser().parse(raw).unwrap();
        assert_eq!(step.thought, "check the repo");
        assert_eq!(step.action.tool, "git_status");
        assert_eq!(step.source, StepSource::Structured(ExtractionStrategy::ActionMarker));
    }

    #[test]
    fn test_whole_text_flat_object() {
        let step = parser().parse(r#"{"tool": "cat", "args": {"path": "README.md"}}"#).unwrap();
        assert_eq!(step.action, Action::new("cat", ActionInput::from_value(&serde_json::json!({"path": "README.md"}))));
        assert_eq!(step.source, StepSource::Structured(ExtractionStrategy::WholeText));
    }

    #[test]
    fn test_final_answer_alias_and_unmodified_answer() {
        let raw = "```json\n{\"thought\": \"done\", \"action\": {\"tool\": \"Final Answer\", \"input\": \"  42 files  \"}}\n```";
        let step = parser().parse(raw).unwrap();
        assert!(step.action.is_terminator());
        assert_eq!(step.action.answer_text(), "  42 files  ");
    }

    #[test]
    fn test_action_as_string_with_action_input() {
        let step = parser()
            .parse(r#"{"thought": "t", "action": "LS", "action_input": "src"}"#)
            .unwrap();
        assert_eq!(step.action.tool, "ls");
        assert_eq!(step.action.input, ActionInput::Text("src".into()));
    }

    #[test]
    fn test_multiline_code_is_escaped() {
        let raw = "```json\n{\"action\": {\"tool\": \"execute_code\", \"input\": {\"code\": \"for f in memory['directory_listing']:\n    print(f)\"}}}\n```";
        let step = parser().parse(raw).unwrap();
        assert_eq!(
            step.action.input.get("code"),
            Some("for f in memory['directory_listing']:\n    print(f)")
        );
    }

    #[test]
    fn test_triple_quoted_code() {
        let raw = "{\"tool\": \"execute_code\", \"input\": {\"code\": \"\"\"print(\"hi\")\nprint(2)\"\"\"}}";
        let step = parser().parse(raw).unwrap();
        assert_eq!(step.action.input.get("code"), Some("print(\"hi\")\nprint(2)"));
    }

    #[test]
    fn test_memory_reference_variants_are_canonical() {
        assert_eq!(normalize_memory_refs(r#"memory["git_status"]"#), "memory['git_status']");
        assert_eq!(normalize_memory_refs(r#"memory[\"git_status\"]"#), "memory['git_status']");
        assert_eq!(normalize_memory_refs("scratchpad[ 'a' ]"), "memory['a']");
        // 未转义的双引号引用会破坏 JSON，归一后可解码
        let raw = r#"{"tool": "execute_code", "input": {"code": "print(len(memory["directory_listing"]))"}}"#;
        let step = parser().parse(raw).unwrap();
        assert_eq!(
            step.action.input.get("code"),
            Some("print(len(memory['directory_listing']))")
        );
    }

    #[test]
    fn test_decorations_and_control_chars_removed() {
        let raw = "\u{200B}✅ Thought: ok\n🚀 ```json\n\u{0007}{\"tool\": \"ls\"}\n```";
        let step = parser().parse(raw).unwrap();
        assert_eq!(step.action.tool, "ls");
        assert_eq!(strip_decorations("  ✅ ✨ x"), "  x");
    }

    #[test]
    fn test_heuristic_final_answer_phrase() {
        let step = parser().parse("I now know.\nFinal Answer: the repo is clean").unwrap();
        assert!(step.action.is_terminator());
        assert_eq!(step.action.answer_text(), "the repo is clean");
        assert_eq!(step.source, StepSource::Heuristic);
    }

    #[test]
    fn test_heuristic_react_style() {
        let step = parser()
            .parse("Thought: look\nAction: ls\nAction Input: {\"path\": \"src\"}")
            .unwrap();
        assert_eq!(step.action.tool, "ls");
        assert_eq!(step.action.input.get("path"), Some("src"));
        assert_eq!(step.thought, "look");
    }

    #[test]
    fn test_heuristic_known_tool_substring() {
        let step = parser()
            .parse("I will use cat with \"path\": \"Cargo.toml\" {broken")
            .unwrap();
        assert_eq!(step.action.tool, "cat");
        assert_eq!(step.action.input.get("path"), Some("Cargo.toml"));
    }

    #[test]
    fn test_decorations_inside_string_values_are_kept() {
        let raw = "```json\n{\"tool\": \"execute_code\", \"input\": {\"code\": \"s = '''\n→ arrow line\n  ✅ done\n'''\nprint(s)\"}}\n```";
        let step = parser().parse(raw).unwrap();
        assert_eq!(
            step.action.input.get("code"),
            Some("s = '''\n→ arrow line\n  ✅ done\n'''\nprint(s)")
        );
        // 字符串之外的行首装饰照常去掉
        let raw = "```json\n✅ {\"tool\": \"ls\",\n➡️ \"input\": {\"path\": \"src\"}}\n```";
        assert_eq!(parser().parse(raw).unwrap().action.input.get("path"), Some("src"));
    }

    #[test]
    fn test_final_answer_phrase_mid_sentence_does_not_terminate() {
        let raw = "Thought: the final answer: is near, but first ls.\n```json\n{\"tool\": \"ls\", \"input\": {\"path\": \"src\"}\n```";
        let step = parser().parse(raw).unwrap();
        assert_eq!(step.action.tool, "ls");
        assert_eq!(step.action.input.get("path"), Some("src"));
        assert_eq!(step.source, StepSource::Heuristic);
    }

    #[test]
    fn test_tool_named_in_broken_block_wins_over_phrase() {
        let raw = "Final answer: not yet\n```json\n{\"tool\": \"cat\", \"input\": {\"path\": \"README.md\"\n```";
        let step = parser().parse(raw).unwrap();
        assert_eq!(step.action.tool, "cat");
        assert_eq!(step.action.input.get("path"), Some("README.md"));
    }

    #[test]
    fn test_truncated_string_field_is_not_dispatched() {
        // 未转义的引号截断了 code，报错而不是派发 code = "print("
        let raw = "```json\n{\"tool\": \"execute_code\", \"input\": {\"code\": \"print(\"hi\")\"}\n```";
        assert!(matches!(parser().parse(raw), Err(ParseError::InvalidBlock { .. })));
        assert_eq!(string_fields(r#"{"code": "print("hi")"}"#), None);
        assert_eq!(
            string_fields(r#"{"path": "a", "n": "b"}"#),
            Some(BTreeMap::from([
                ("n".to_string(), "b".to_string()),
                ("path".to_string(), "a".to_string()),
            ]))
        );
    }

    #[test]
    fn test_parse_errors_are_typed() {
        assert_eq!(parser().parse("  \u{0000} "), Err(ParseError::Empty));
        assert!(matches!(
            parser().parse("I am not sure what to do."),
            Err(ParseError::NoAction { .. })
        ));
        assert!(matches!(
            parser().parse("{\"thought\": \"x\"}"),
            Err(ParseError::MissingTool { .. })
        ));
        assert!(matches!(
            parser().parse("{\"thought\": \"x\", \"tool\": }"),
            Err(ParseError::InvalidBlock { .. })
        ));
    }

    #[test]
    fn test_normalize_tool_name() {
        assert_eq!(normalize_tool_name(" Git-Status "), "git_status");
        assert_eq!(normalize_tool_name("FINISH"), FINAL_ANSWER);
        assert_eq!(normalize_tool_name("`ls`"), "ls");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let samples = [
            "",
            "plain text",
            "✅ ✅ done\n\t🚀\n",
            "  \u{FEFF}⚠️  warning\r\n➡️ {\"tool\": \"ls\"}",
            "\u{0001}\u{001B}[31mred\u{200D}",
            "   \n\u{2705}\u{FE0F}",
            "→→ x → y",
        ];
        for s in samples {
            let once = sanitize(s);
            assert_eq!(sanitize(&once), once, "input {s:?}");
        }
    }
}
