//! 代码执行工具（需要工作记忆）
//!
//! 在临时目录中以子进程运行 Python 或 sh 代码，带自身超时。工作记忆快照写入 memory.json：
//! Python 代码可直接使用 `memory['<key>']`；sh 代码通过环境变量 `MEMORY_<KEY>` 读取
//! （数组按行展开，字符串原样，其它值为 JSON 文本）。

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

use crate::core::DispatchError;
use crate::tools::{truncate_chars, ActionInput, Tool, ToolContext, ToolResult};

const MEMORY_FILE: &str = "memory.json";

const PYTHON_PRELUDE: &str = "import json as _json, os as _os\n\
with open(_os.environ['FORAGER_MEMORY_FILE'], encoding='utf-8') as _f:\n    memory = _json.load(_f)\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python,
    Shell,
}

impl Language {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "python" | "python3" | "py" => Some(Language::Python),
            "sh" | "shell" | "bash" => Some(Language::Shell),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Shell => "sh",
        }
    }
}

/// 把记忆值渲染为环境变量文本
fn env_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|i| match i {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

/// 记忆键 → 环境变量名，如 directory_listing → MEMORY_DIRECTORY_LISTING
pub fn env_name(key: &str) -> String {
    let mut name = String::from("MEMORY_");
    name.extend(key.chars().map(|c| {
        if c.is_ascii_alphanumeric() {
            c.to_ascii_uppercase()
        } else {
            '_'
        }
    }));
    name
}

#[derive(Debug, Deserialize)]
struct ExecInput {
    code: String,
    #[serde(default)]
    language: String,
}

/// 执行配置
#[derive(Debug, Clone)]
pub struct ExecSettings {
    pub python: String,
    pub allowed_languages: Vec<String>,
    pub timeout_secs: u64,
    pub max_output_chars: usize,
}

impl Default for ExecSettings {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            allowed_languages: vec!["python".to_string(), "sh".to_string()],
            timeout_secs: 30,
            max_output_chars: 8000,
        }
    }
}

pub struct ExecuteCodeTool {
    settings: ExecSettings,
}

impl ExecuteCodeTool {
    pub fn new(settings: ExecSettings) -> Self {
        Self { settings }
    }

    fn fail(&self, reason: impl Into<String>) -> DispatchError {
        DispatchError::ToolFailed {
            tool: "execute_code".to_string(),
            reason: reason.into(),
        }
    }

    fn build_command(
        &self,
        lang: Language,
        code: &str,
        dir: &Path,
        memory: &BTreeMap<String, Value>,
    ) -> Result<Command, DispatchError> {
        let mut cmd = match lang {
            Language::Python => {
                let script = dir.join("main.py");
                std::fs::write(&script, format!("{PYTHON_PRELUDE}{code}\n"))
                    .map_err(|e| self.fail(e.to_string()))?;
                let mut c = Command::new(&self.settings.python);
                c.arg(&script);
                c
            }
            Language::Shell => {
                let script = dir.join("main.sh");
                std::fs::write(&script, format!("{code}\n")).map_err(|e| self.fail(e.to_string()))?;
                let mut c = Command::new("sh");
                c.arg(&script);
                for (key, value) in memory {
                    c.env(env_name(key), env_value(value));
                }
                c
            }
        };
        cmd.current_dir(dir)
            .env("FORAGER_MEMORY_FILE", dir.join(MEMORY_FILE))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }
}

#[async_trait]
impl Tool for ExecuteCodeTool {
    fn name(&self) -> &str {
        "execute_code"
    }

    fn description(&self) -> &str {
        "Run a short Python or sh program in a sandboxed temp directory. Prior tool results are available \
        as memory['<key>'] in Python or $MEMORY_<KEY> in sh; do not paste them into the code."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "code": {"type": "string", "description": "Program source"},
                "language": {"type": "string", "enum": ["python", "sh"], "description": "Default python"}
            },
            "required": ["code"]
        })
    }

    fn needs_memory(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        input: &ActionInput,
        ctx: ToolContext<'_>,
    ) -> Result<ToolResult, DispatchError> {
        let args: ExecInput = input.decode("code").map_err(|reason| {
            DispatchError::InvalidInput {
                tool: self.name().to_string(),
                reason,
            }
        })?;
        let lang = Language::parse(&args.language).ok_or_else(|| DispatchError::InvalidInput {
            tool: self.name().to_string(),
            reason: format!("unsupported language '{}'", args.language),
        })?;
        if !self.settings.allowed_languages.iter().any(|l| l == lang.as_str()) {
            return Err(DispatchError::InvalidInput {
                tool: self.name().to_string(),
                reason: format!("language '{}' is disabled", lang.as_str()),
            });
        }

        let memory = ctx.memory.map(|m| m.snapshot()).unwrap_or_default();
        let dir = tempfile::tempdir().map_err(|e| self.fail(e.to_string()))?;
        let memory_json = serde_json::to_string(&memory).map_err(|e| self.fail(e.to_string()))?;
        std::fs::write(dir.path().join(MEMORY_FILE), memory_json)
            .map_err(|e| self.fail(e.to_string()))?;

        tracing::info!(
            language = lang.as_str(),
            memory_keys = memory.len(),
            "execute_code tool execute"
        );
        let mut cmd = self.build_command(lang, &args.code, dir.path(), &memory)?;
        let output = tokio::time::timeout(
            Duration::from_secs(self.settings.timeout_secs),
            cmd.output(),
        )
        .await
        .map_err(|_| self.fail(format!("timed out after {}s", self.settings.timeout_secs)))?
        .map_err(|e| self.fail(format!("could not start interpreter: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let raw = serde_json::json!({
            "stdout": stdout,
            "stderr": stderr,
            "exit_code": output.status.code(),
        });
        let max = self.settings.max_output_chars;
        if !output.status.success() {
            return Ok(ToolResult {
                raw,
                ..ToolResult::error(format!(
                    "Exit {:?}\nstdout: {}\nstderr: {}",
                    output.status.code(),
                    truncate_chars(stdout.trim_end(), max),
                    truncate_chars(stderr.trim_end(), max)
                ))
            });
        }
        let text = if stderr.trim().is_empty() {
            stdout
        } else {
            format!("{}\nstderr: {}", stdout.trim_end(), stderr.trim_end())
        };
        Ok(ToolResult::success(truncate_chars(&text, max), raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{keys, Scratchpad};
    use serde_json::json;

    fn sh_only() -> ExecuteCodeTool {
        ExecuteCodeTool::new(ExecSettings {
            allowed_languages: vec!["sh".to_string()],
            timeout_secs: 10,
            ..ExecSettings::default()
        })
    }

    #[test]
    fn test_env_name_and_value() {
        assert_eq!(env_name("directory_listing"), "MEMORY_DIRECTORY_LISTING");
        assert_eq!(env_name("a-b"), "MEMORY_A_B");
        assert_eq!(env_value(&json!(["a", "b/"])), "a\nb/");
        assert_eq!(env_value(&json!({"k": 1})), r#"{"k":1}"#);
    }

    #[tokio::test]
    async fn test_sh_reads_memory_env() {
        let mut pad = Scratchpad::new();
        pad.write(keys::DIRECTORY_LISTING, json!(["Cargo.toml", "src/"]), 1);
        let input = ActionInput::from_value(&json!({
            "language": "sh",
            "code": "printf '%s' \"$MEMORY_DIRECTORY_LISTING\""
        }));
        let r = sh_only()
            .execute(&input, ToolContext { memory: Some(&pad) })
            .await
            .unwrap();
        assert!(r.is_success(), "{}", r.output);
        assert_eq!(r.output, "Cargo.toml\nsrc/");
    }

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    #[tokio::test]
    async fn test_python_reads_memory_dict() {
        if !python_available() {
            eprintln!("python3 not found, skipping");
            return;
        }
        let mut pad = Scratchpad::new();
        pad.write(keys::DIRECTORY_LISTING, json!(["Cargo.toml", "src/"]), 1);
        pad.write(keys::GIT_STATUS, json!({"branch": "main", "clean": true}), 2);
        let input = ActionInput::from_value(&json!({
            "language": "python",
            "code": "entries = memory['directory_listing']\n\
                     print(len(entries), entries[-1], memory['git_status']['branch'], sep='|', end='')"
        }));
        let tool = ExecuteCodeTool::new(ExecSettings {
            timeout_secs: 10,
            ..ExecSettings::default()
        });
        let r = tool
            .execute(&input, ToolContext { memory: Some(&pad) })
            .await
            .unwrap();
        assert!(r.is_success(), "{}", r.output);
        assert_eq!(r.output, "2|src/|main");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_error_result() {
        let input = ActionInput::from_value(&json!({"language": "sh", "code": "echo boom >&2; exit 3"}));
        let r = sh_only().execute(&input, ToolContext::default()).await.unwrap();
        assert!(!r.is_success());
        assert!(r.output.contains("boom"));
        assert_eq!(r.raw["exit_code"], 3);
    }

    #[tokio::test]
    async fn test_disabled_language_is_rejected() {
        let r = sh_only()
            .execute(&ActionInput::Text("print(1)".into()), ToolContext::default())
            .await;
        assert!(matches!(r, Err(DispatchError::InvalidInput { .. })));
    }
}
