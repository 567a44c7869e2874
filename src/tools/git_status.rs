//! Git 状态工具：当前分支与工作区变更（porcelain 格式），结果写入工作记忆

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::Command;

use crate::core::DispatchError;
use crate::memory::keys;
use crate::tools::{ActionInput, SafeFs, Tool, ToolContext, ToolResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    /// 两位状态码，如 " M"、"??"、"A "
    pub status: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GitStatus {
    pub branch: Option<String>,
    pub clean: bool,
    pub entries: Vec<StatusEntry>,
}

/// 解析 `git status --porcelain=v1 --branch` 输出
pub fn parse_porcelain(output: &str) -> GitStatus {
    let mut branch = None;
    let mut entries = Vec::new();
    for line in output.lines() {
        if let Some(rest) = line.strip_prefix("## ") {
            let rest = rest.trim_start_matches("No commits yet on ");
            let name = rest
                .split("...")
                .next()
                .unwrap_or(rest)
                .split_whitespace()
                .next()
                .unwrap_or(rest);
            branch = Some(name.to_string());
            continue;
        }
        if line.len() < 4 {
            continue;
        }
        let (status, path) = line.split_at(2);
        entries.push(StatusEntry {
            status: status.to_string(),
            path: path.trim().to_string(),
        });
    }
    GitStatus {
        branch,
        clean: entries.is_empty(),
        entries,
    }
}

#[derive(Debug, Deserialize)]
struct GitStatusInput {
    #[serde(default)]
    path: String,
}

pub struct GitStatusTool {
    fs: SafeFs,
    timeout_secs: u64,
}

impl GitStatusTool {
    pub fn new(root_dir: impl AsRef<Path>, timeout_secs: u64) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
            timeout_secs,
        }
    }

    async fn run_git(&self, args: &[&str], cwd: &Path) -> Result<String, String> {
        let output = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            Command::new("git").args(args).current_dir(cwd).output(),
        )
        .await
        .map_err(|_| format!("git timed out after {}s", self.timeout_secs))?
        .map_err(|e| format!("Failed to run git: {}", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("Git command failed: {}", stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl Tool for GitStatusTool {
    fn name(&self) -> &str {
        "git_status"
    }

    fn description(&self) -> &str {
        "Show the current branch and the changed / untracked files of a git repository."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Repository path relative to the workspace, default '.'"}
            },
            "required": []
        })
    }

    fn memory_key(&self) -> Option<&'static str> {
        Some(keys::GIT_STATUS)
    }

    async fn execute(
        &self,
        input: &ActionInput,
        _ctx: ToolContext<'_>,
    ) -> Result<ToolResult, DispatchError> {
        let args: GitStatusInput = input.decode("path").map_err(|reason| {
            DispatchError::InvalidInput {
                tool: self.name().to_string(),
                reason,
            }
        })?;
        let fail = |reason: String| DispatchError::ToolFailed {
            tool: "git_status".to_string(),
            reason,
        };
        let repo = self.fs.resolve(&args.path).map_err(|e| fail(e.to_string()))?;
        let raw_output = self
            .run_git(&["status", "--porcelain=v1", "--branch"], &repo)
            .await
            .map_err(fail)?;
        let status = parse_porcelain(&raw_output);

        let mut output = format!(
            "## Git Status (branch: {})\n",
            status.branch.as_deref().unwrap_or("unknown")
        );
        if status.clean {
            output.push_str("Working tree clean.");
        } else {
            for e in &status.entries {
                output.push_str(&format!("{} {}\n", e.status, e.path));
            }
        }
        let raw = serde_json::to_value(&status).map_err(|e| fail(e.to_string()))?;
        Ok(ToolResult::success(output.trim_end().to_string(), raw))
    }
}
