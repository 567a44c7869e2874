//! 静态质量分析工具：按扩展名套用逐行规则，生成结构化报告（写入工作记忆）

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use walkdir::WalkDir;

use crate::core::DispatchError;
use crate::memory::keys;
use crate::tools::{ActionInput, SafeFs, Tool, ToolContext, ToolResult};

const MAX_FILE_SIZE: u64 = 1024 * 1024;
const LONG_LINE_CHARS: usize = 120;
const LARGE_FILE_LINES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub path: String,
    pub line: usize,
    pub severity: Severity,
    pub category: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisReport {
    pub files_scanned: usize,
    pub issues: Vec<Issue>,
    /// category -> 数量
    pub summary: BTreeMap<String, usize>,
}

struct LineRule {
    extensions: &'static [&'static str],
    pattern: Regex,
    severity: Severity,
    category: &'static str,
    message: &'static str,
}

fn rule(
    extensions: &'static [&'static str],
    pattern: &str,
    severity: Severity,
    category: &'static str,
    message: &'static str,
) -> Option<LineRule> {
    Regex::new(pattern).ok().map(|pattern| LineRule {
        extensions,
        pattern,
        severity,
        category,
        message,
    })
}

fn line_rules() -> &'static [LineRule] {
    static RULES: OnceLock<Vec<LineRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        const RS: &[&str] = &["rs"];
        const PY: &[&str] = &["py"];
        const JS: &[&str] = &["js", "ts", "jsx", "tsx"];
        const ANY: &[&str] = &["rs", "py", "js", "ts", "jsx", "tsx", "go", "java", "c", "cpp", "h"];
        [
            rule(
                RS,
                r"\.unwrap\(\)",
                Severity::Warning,
                "error_handling",
                "Consider using ? or explicit error handling instead of unwrap()",
            ),
            rule(
                RS,
                r"\b(todo|unimplemented)!",
                Severity::Warning,
                "incomplete",
                "Found incomplete code (todo! or unimplemented!)",
            ),
            rule(
                RS,
                r"\bunsafe\s*\{",
                Severity::Warning,
                "safety",
                "Unsafe block found - ensure safety invariants are documented",
            ),
            rule(
                RS,
                r"\bpanic!\(",
                Severity::Warning,
                "error_handling",
                "Avoid panic! in library code - return errors instead",
            ),
            rule(
                RS,
                r"std::mem::forget",
                Severity::Error,
                "safety",
                "std::mem::forget can leak resources - use ManuallyDrop if necessary",
            ),
            rule(
                RS,
                r"\b(println|eprintln)!",
                Severity::Info,
                "logging",
                "Consider tracing instead of println!/eprintln!",
            ),
            rule(
                PY,
                r"^\s*except\s*:",
                Severity::Warning,
                "error_handling",
                "Bare except: clause catches KeyboardInterrupt and SystemExit",
            ),
            rule(
                PY,
                r"^\s*print\(",
                Severity::Info,
                "logging",
                "Consider the logging module instead of print()",
            ),
            rule(
                JS,
                r"\beval\(",
                Severity::Error,
                "security",
                "Avoid eval() - major security risk",
            ),
            rule(
                JS,
                r"\bdebugger;",
                Severity::Warning,
                "debugging",
                "Remove debugger statement",
            ),
            rule(
                JS,
                r"console\.log\(",
                Severity::Info,
                "logging",
                "Remove console.log before production",
            ),
            rule(
                ANY,
                r"\b(TODO|FIXME|XXX)\b",
                Severity::Info,
                "incomplete",
                "Found TODO/FIXME marker",
            ),
            rule(
                ANY,
                r#"(?i)(password|secret|api_key)\s*[:=]\s*["'][^"']+["']"#,
                Severity::Warning,
                "security",
                "Possible hard-coded secret",
            ),
        ]
        .into_iter()
        .flatten()
        .collect()
    })
}

/// 分析单个文件内容
pub fn analyze_source(path: &str, ext: &str, content: &str) -> Vec<Issue> {
    let mut issues = Vec::new();
    let rules: Vec<&LineRule> = line_rules()
        .iter()
        .filter(|r| r.extensions.contains(&ext))
        .collect();
    let mut long_lines = 0usize;
    let mut first_long = 0usize;
    let mut line_count = 0usize;

    for (i, line) in content.lines().enumerate() {
        line_count += 1;
        let trimmed = line.trim_start();
        if trimmed.starts_with("//") && !trimmed.contains("TODO") && !trimmed.contains("FIXME") {
            continue;
        }
        for r in &rules {
            if r.pattern.is_match(line) {
                issues.push(Issue {
                    path: path.to_string(),
                    line: i + 1,
                    severity: r.severity,
                    category: r.category,
                    message: r.message.to_string(),
                });
            }
        }
        if line.chars().count() > LONG_LINE_CHARS {
            long_lines += 1;
            if first_long == 0 {
                first_long = i + 1;
            }
        }
    }

    if long_lines > 0 {
        issues.push(Issue {
            path: path.to_string(),
            line: first_long,
            severity: Severity::Info,
            category: "style",
            message: format!("{} line(s) exceed {} characters", long_lines, LONG_LINE_CHARS),
        });
    }
    if line_count > LARGE_FILE_LINES {
        issues.push(Issue {
            path: path.to_string(),
            line: 1,
            severity: Severity::Info,
            category: "complexity",
            message: format!("File is {} lines - consider splitting it", line_count),
        });
    }
    issues
}

#[derive(Debug, Deserialize)]
struct AnalyzeInput {
    #[serde(default)]
    path: String,
}

pub struct AnalyzeCodeTool {
    fs: SafeFs,
    max_files: usize,
}

impl AnalyzeCodeTool {
    pub fn new(root_dir: impl AsRef<Path>, max_files: usize) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
            max_files: max_files.max(1),
        }
    }

    fn analyze_path(&self, target: &Path) -> AnalysisReport {
        let known: Vec<&str> = line_rules()
            .iter()
            .flat_map(|r| r.extensions.iter().copied())
            .collect();
        let mut report = AnalysisReport::default();
        let walker = WalkDir::new(target)
            .max_depth(8)
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !matches!(
                        e.file_name().to_string_lossy().as_ref(),
                        "target" | "node_modules" | ".git" | "__pycache__"
                    )
            })
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file());

        for entry in walker {
            if report.files_scanned >= self.max_files {
                break;
            }
            let Some(ext) = entry.path().extension().map(|e| e.to_string_lossy().to_string()) else {
                continue;
            };
            if !known.contains(&ext.as_str()) {
                continue;
            }
            if entry.metadata().map(|m| m.len() > MAX_FILE_SIZE).unwrap_or(true) {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            let rel = entry
                .path()
                .strip_prefix(self.fs.root())
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            report.files_scanned += 1;
            report.issues.extend(analyze_source(&rel, &ext, &content));
        }
        for issue in &report.issues {
            *report.summary.entry(issue.category.to_string()).or_default() += 1;
        }
        report
    }
}

#[async_trait]
impl Tool for AnalyzeCodeTool {
    fn name(&self) -> &str {
        "analyze_code"
    }

    fn description(&self) -> &str {
        "Scan source files (Rust, Python, JS/TS and others) for common quality and security issues."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File or directory relative to the workspace, default '.'"}
            },
            "required": []
        })
    }

    fn memory_key(&self) -> Option<&'static str> {
        Some(keys::ANALYSIS_REPORT)
    }

    async fn execute(
        &self,
        input: &ActionInput,
        _ctx: ToolContext<'_>,
    ) -> Result<ToolResult, DispatchError> {
        let args: AnalyzeInput = input.decode("path").map_err(|reason| {
            DispatchError::InvalidInput {
                tool: self.name().to_string(),
                reason,
            }
        })?;
        let fail = |reason: String| DispatchError::ToolFailed {
            tool: "analyze_code".to_string(),
            reason,
        };
        let target = self.fs.resolve(&args.path).map_err(|e| fail(e.to_string()))?;
        tracing::info!(path = %args.path, "analyze_code tool execute");
        let report = self.analyze_path(&target);

        let mut output = format!(
            "## Analysis Report\n{} file(s) scanned, {} issue(s).\n",
            report.files_scanned,
            report.issues.len()
        );
        for issue in &report.issues {
            output.push_str(&format!(
                "- [{:?}] {}:{} ({}) {}\n",
                issue.severity, issue.path, issue.line, issue.category, issue.message
            ));
        }
        let raw = serde_json::to_value(&report).map_err(|e| fail(e.to_string()))?;
        Ok(ToolResult::success(output.trim_end().to_string(), raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_rules() {
        let src = "fn main() {\n    let x = foo().unwrap();\n    todo!()\n}\n";
        let issues = analyze_source("main.rs", "rs", src);
        let cats: Vec<(usize, &str)> = issues.iter().map(|i| (i.line, i.category)).collect();
        assert_eq!(cats, vec![(2, "error_handling"), (3, "incomplete")]);
    }

    #[test]
    fn test_comment_lines_are_skipped() {
        let issues = analyze_source("lib.rs", "rs", "// x.unwrap() in a comment\n");
        assert!(issues.is_empty());
    }

    #[test]
    fn test_python_bare_except() {
        let issues = analyze_source("a.py", "py", "try:\n    pass\nexcept:\n    pass\n");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Warning);
    }

    #[tokio::test]
    async fn test_tool_builds_report_with_summary() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.js"), "eval(x);\nconsole.log(1);\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "eval(").unwrap();
        let tool = AnalyzeCodeTool::new(dir.path(), 10);
        let r = tool
            .execute(&ActionInput::default(), ToolContext::default())
            .await
            .unwrap();
        assert!(r.is_success());
        assert_eq!(r.raw["files_scanned"], 1);
        assert_eq!(r.raw["summary"]["security"], 1);
        assert_eq!(r.raw["summary"]["logging"], 1);
    }
}
