//! 沙箱文件系统工具
//!
//! SafeFs 绑定 root_dir，所有路径经 resolve 校验必须在 root 下（禁止 ../ 逃逸）；
//! LsTool（目录列举，结果写入工作记忆）/ CatTool（读文件）基于 SafeFs。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use walkdir::WalkDir;

use crate::core::{AgentError, DispatchError};
use crate::memory::keys;
use crate::tools::{ActionInput, Tool, ToolContext, ToolResult};

/// 递归列举的最大深度与条目数
const MAX_RECURSIVE_DEPTH: usize = 6;
const MAX_LISTING_ENTRIES: usize = 1000;
/// cat 返回的最大字符数
const MAX_READ_CHARS: usize = 20_000;

/// 沙箱文件系统：绑定根目录，resolve 校验路径在根下，防止路径逃逸
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 检查路径是否在沙箱内
    pub fn resolve(&self, path: &str) -> Result<PathBuf, AgentError> {
        let path = path.trim().trim_start_matches("./");
        if path.is_empty() || path == "." {
            return Ok(self.root_dir.clone());
        }
        let full = self.root_dir.join(path);
        let canonical = full
            .canonicalize()
            .map_err(|_| AgentError::ToolExecutionFailed(format!("Path not found: {}", path)))?;
        if canonical.starts_with(&self.root_dir) {
            Ok(canonical)
        } else {
            Err(AgentError::PathEscape(path.to_string())) // 如 ../../etc/passwd
        }
    }

    pub fn read_file(&self, path: &str) -> Result<String, AgentError> {
        let resolved = self.resolve(path)?;
        std::fs::read_to_string(&resolved)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Read failed: {}", e)))
    }

    /// 列出目录；目录以 "/" 结尾，隐藏文件跳过，结果排序
    pub fn list_dir(&self, path: &str, recursive: bool) -> Result<Vec<String>, AgentError> {
        let base = self.resolve(path)?;
        if !base.is_dir() {
            return Err(AgentError::ToolExecutionFailed(format!(
                "Not a directory: {}",
                path
            )));
        }
        let max_depth = if recursive { MAX_RECURSIVE_DEPTH } else { 1 };
        let mut entries = Vec::new();
        let walker = WalkDir::new(&base)
            .min_depth(1)
            .max_depth(max_depth)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
        for e in walker {
            let e = e.map_err(|e| AgentError::ToolExecutionFailed(format!("List failed: {}", e)))?;
            let rel = e
                .path()
                .strip_prefix(&base)
                .unwrap_or(e.path())
                .to_string_lossy()
                .replace('\\', "/");
            let suffix = if e.file_type().is_dir() { "/" } else { "" };
            entries.push(format!("{}{}", rel, suffix));
            if entries.len() >= MAX_LISTING_ENTRIES {
                tracing::warn!(path = %path, "directory listing truncated");
                break;
            }
        }
        entries.sort();
        Ok(entries)
    }
}

fn invalid(tool: &str) -> impl Fn(String) -> DispatchError + '_ {
    move |reason| DispatchError::InvalidInput {
        tool: tool.to_string(),
        reason,
    }
}

fn failed(tool: &str, err: AgentError) -> DispatchError {
    DispatchError::ToolFailed {
        tool: tool.to_string(),
        reason: err.to_string(),
    }
}

fn is_truthy(v: Option<&str>) -> bool {
    matches!(
        v.map(|s| s.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "yes" | "1")
    )
}

#[derive(Debug, Deserialize)]
struct LsInput {
    #[serde(default)]
    path: String,
    #[serde(default)]
    recursive: Option<String>,
}

/// Ls 工具：列出目录（可递归）
pub struct LsTool {
    fs: SafeFs,
}

impl LsTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for LsTool {
    fn name(&self) -> &str {
        "ls"
    }

    fn description(&self) -> &str {
        "List a directory inside the workspace. Directories end with '/'."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory relative to the workspace, default '.'"},
                "recursive": {"type": "string", "description": "'true' to list sub-directories as well"}
            },
            "required": []
        })
    }

    fn memory_key(&self) -> Option<&'static str> {
        Some(keys::DIRECTORY_LISTING)
    }

    async fn execute(
        &self,
        input: &ActionInput,
        _ctx: ToolContext<'_>,
    ) -> Result<ToolResult, DispatchError> {
        let args: LsInput = input.decode("path").map_err(invalid(self.name()))?;
        let recursive = is_truthy(args.recursive.as_deref());
        tracing::info!(path = %args.path, recursive, "ls tool execute");
        let entries = self
            .fs
            .list_dir(&args.path, recursive)
            .map_err(|e| failed(self.name(), e))?;
        let output = if entries.is_empty() {
            "(empty directory)".to_string()
        } else {
            entries.join("\n")
        };
        Ok(ToolResult::success(output, serde_json::json!(entries)))
    }
}

#[derive(Debug, Deserialize)]
struct CatInput {
    path: String,
}

/// Cat 工具：读取文件内容
pub struct CatTool {
    fs: SafeFs,
}

impl CatTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for CatTool {
    fn name(&self) -> &str {
        "cat"
    }

    fn description(&self) -> &str {
        "Read a text file inside the workspace."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path relative to the workspace"}
            },
            "required": ["path"]
        })
    }

    async fn execute(
        &self,
        input: &ActionInput,
        _ctx: ToolContext<'_>,
    ) -> Result<ToolResult, DispatchError> {
        let args: CatInput = input.decode("path").map_err(invalid(self.name()))?;
        tracing::info!(path = %args.path, "cat tool execute");
        let content = self
            .fs
            .read_file(&args.path)
            .map_err(|e| failed(self.name(), e))?;
        let output = crate::tools::truncate_chars(&content, MAX_READ_CHARS);
        Ok(ToolResult::success(output, Value::String(content)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolStatus;

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("README.md"), "hello").unwrap();
        std::fs::write(dir.path().join(".hidden"), "x").unwrap();
        dir
    }

    #[test]
    fn test_resolve_rejects_escape() {
        let dir = workspace();
        let fs = SafeFs::new(dir.path());
        let sub = dir.path().join("src");
        let inner = SafeFs::new(&sub);
        assert!(matches!(inner.resolve("../README.md"), Err(AgentError::PathEscape(_))));
        assert!(fs.resolve("src/main.rs").is_ok());
    }

    #[tokio::test]
    async fn test_ls_lists_sorted_without_hidden() {
        let dir = workspace();
        let tool = LsTool::new(dir.path());
        let r = tool
            .execute(&ActionInput::Text(".".into()), ToolContext::default())
            .await
            .unwrap();
        assert_eq!(r.status, ToolStatus::Success);
        assert_eq!(r.raw, serde_json::json!(["README.md", "src/"]));
        assert_eq!(r.output, "README.md\nsrc/");
    }

    #[tokio::test]
    async fn test_ls_recursive() {
        let dir = workspace();
        let tool = LsTool::new(dir.path());
        let input = ActionInput::from_value(&serde_json::json!({"path": ".", "recursive": true}));
        let r = tool.execute(&input, ToolContext::default()).await.unwrap();
        assert_eq!(r.raw, serde_json::json!(["README.md", "src/", "src/main.rs"]));
    }

    #[tokio::test]
    async fn test_cat_reads_file() {
        let dir = workspace();
        let tool = CatTool::new(dir.path());
        let r = tool
            .execute(&ActionInput::Text("README.md".into()), ToolContext::default())
            .await
            .unwrap();
        assert_eq!(r.output, "hello");
        assert!(tool
            .execute(&ActionInput::Text("missing.txt".into()), ToolContext::default())
            .await
            .is_err());
    }
}
