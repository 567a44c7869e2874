//! 依赖清单工具：读取 Cargo.toml / package.json / requirements.txt，结果写入工作记忆

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::DispatchError;
use crate::memory::keys;
use crate::tools::{ActionInput, SafeFs, Tool, ToolContext, ToolResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    pub ecosystem: &'static str,
    pub name: String,
    pub version: String,
    /// normal / dev / build
    pub kind: &'static str,
}

/// 解析 Cargo.toml 的各依赖表（含 [workspace.dependencies]）
pub fn parse_cargo_manifest(content: &str) -> Result<Vec<Dependency>, String> {
    let doc: toml::Table = toml::from_str(content).map_err(|e: toml::de::Error| e.to_string())?;
    let mut deps = Vec::new();
    let mut push_table = |table: Option<&toml::Value>, kind: &'static str| {
        let Some(table) = table.and_then(|t| t.as_table()) else {
            return;
        };
        for (name, spec) in table {
            let version = match spec {
                toml::Value::String(v) => v.clone(),
                toml::Value::Table(t) => t
                    .get("version")
                    .and_then(|v| v.as_str())
                    .map(String::from)
                    .or_else(|| t.get("path").and_then(|p| p.as_str()).map(|p| format!("path:{p}")))
                    .or_else(|| t.get("git").and_then(|g| g.as_str()).map(|g| format!("git:{g}")))
                    .or_else(|| {
                        t.get("workspace")
                            .and_then(|w| w.as_bool())
                            .filter(|w| *w)
                            .map(|_| "workspace".to_string())
                    })
                    .unwrap_or_else(|| "*".to_string()),
                _ => "*".to_string(),
            };
            deps.push(Dependency {
                ecosystem: "cargo",
                name: name.clone(),
                version,
                kind,
            });
        }
    };
    push_table(doc.get("dependencies"), "normal");
    push_table(doc.get("dev-dependencies"), "dev");
    push_table(doc.get("build-dependencies"), "build");
    push_table(
        doc.get("workspace").and_then(|w| w.get("dependencies")),
        "normal",
    );
    Ok(deps)
}

/// 解析 package.json 的 dependencies / devDependencies
pub fn parse_package_json(content: &str) -> Result<Vec<Dependency>, String> {
    let doc: Value = serde_json::from_str(content).map_err(|e| e.to_string())?;
    let mut deps = Vec::new();
    for (field, kind) in [("dependencies", "normal"), ("devDependencies", "dev")] {
        if let Some(map) = doc.get(field).and_then(|v| v.as_object()) {
            for (name, version) in map {
                deps.push(Dependency {
                    ecosystem: "npm",
                    name: name.clone(),
                    version: version.as_str().unwrap_or("*").to_string(),
                    kind,
                });
            }
        }
    }
    Ok(deps)
}

/// 解析 requirements.txt（忽略注释、选项行与环境标记）
pub fn parse_requirements(content: &str) -> Vec<Dependency> {
    content
        .lines()
        .map(|l| l.split('#').next().unwrap_or("").trim())
        .filter(|l| !l.is_empty() && !l.starts_with('-'))
        .map(|l| {
            let l = l.split(';').next().unwrap_or(l).trim();
            let split_at = l
                .find(|c: char| matches!(c, '=' | '<' | '>' | '~' | '!' | '['))
                .unwrap_or(l.len());
            let (name, rest) = l.split_at(split_at);
            let version = rest
                .trim_start_matches(|c: char| {
                    c == '[' || c.is_alphanumeric() || c == ',' || c == ']'
                })
                .trim();
            Dependency {
                ecosystem: "pypi",
                name: name.trim().to_string(),
                version: if version.is_empty() { "*".to_string() } else { version.to_string() },
                kind: "normal",
            }
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct DependenciesInput {
    #[serde(default)]
    path: String,
}

pub struct ListDependenciesTool {
    fs: SafeFs,
}

impl ListDependenciesTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for ListDependenciesTool {
    fn name(&self) -> &str {
        "list_dependencies"
    }

    fn description(&self) -> &str {
        "List declared dependencies from Cargo.toml, package.json and requirements.txt in a project directory."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Project directory relative to the workspace, default '.'"}
            },
            "required": []
        })
    }

    fn memory_key(&self) -> Option<&'static str> {
        Some(keys::DEPENDENCY_LIST)
    }

    async fn execute(
        &self,
        input: &ActionInput,
        _ctx: ToolContext<'_>,
    ) -> Result<ToolResult, DispatchError> {
        let args: DependenciesInput = input.decode("path").map_err(|reason| {
            DispatchError::InvalidInput {
                tool: self.name().to_string(),
                reason,
            }
        })?;
        let fail = |reason: String| DispatchError::ToolFailed {
            tool: "list_dependencies".to_string(),
            reason,
        };
        let dir = self.fs.resolve(&args.path).map_err(|e| fail(e.to_string()))?;

        let mut deps = Vec::new();
        let mut manifests = Vec::new();
        let read = |name: &str| std::fs::read_to_string(dir.join(name)).ok();
        if let Some(c) = read("Cargo.toml") {
            deps.extend(parse_cargo_manifest(&c).map_err(|e| fail(format!("Cargo.toml: {e}")))?);
            manifests.push("Cargo.toml");
        }
        if let Some(c) = read("package.json") {
            deps.extend(parse_package_json(&c).map_err(|e| fail(format!("package.json: {e}")))?);
            manifests.push("package.json");
        }
        if let Some(c) = read("requirements.txt") {
            deps.extend(parse_requirements(&c));
            manifests.push("requirements.txt");
        }
        if manifests.is_empty() {
            return Ok(ToolResult::error(format!(
                "No Cargo.toml, package.json or requirements.txt found in '{}'",
                if args.path.is_empty() { "." } else { args.path.as_str() }
            )));
        }

        let mut output = format!(
            "## Dependencies ({} from {})\n",
            deps.len(),
            manifests.join(", ")
        );
        for d in &deps {
            output.push_str(&format!(
                "- [{}] {} {} ({})\n",
                d.ecosystem, d.name, d.version, d.kind
            ));
        }
        let raw = serde_json::to_value(&deps).map_err(|e| fail(e.to_string()))?;
        Ok(ToolResult::success(output.trim_end().to_string(), raw))
    }
}
