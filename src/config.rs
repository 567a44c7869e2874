//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `FORAGER__*` 覆盖（双下划线表示嵌套，如 `FORAGER__LLM__PROVIDER=mock`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub tools: ToolsSection,
}

/// [app] 段：应用名、工作目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 沙箱根目录，未设置时用当前目录
    pub workspace_root: Option<PathBuf>,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / deepseek / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    /// 未设置时使用各后端的默认模型
    pub model: Option<String>,
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒），每次重试分别计时
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [agent] 段：控制循环上限与重试策略
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// 每次思考的最大重试次数（总尝试数 = max_retries + 1）
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// 连续解析失败上限，0 表示不单独限制
    #[serde(default = "default_max_consecutive_parse_failures")]
    pub max_consecutive_parse_failures: usize,
    /// 基础 system prompt 文件；未设置时使用内置文案
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_consecutive_parse_failures: default_max_consecutive_parse_failures(),
            system_prompt_path: None,
        }
    }
}

fn default_max_iterations() -> usize {
    15
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    2000
}

fn default_max_consecutive_parse_failures() -> usize {
    5
}

/// [tools] 段：工具超时、代码执行、静态分析
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒），由各工具自行执行
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub exec: ExecSection,
    #[serde(default)]
    pub analysis: AnalysisSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            exec: ExecSection::default(),
            analysis: AnalysisSection::default(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [tools.exec] 段：解释器与允许的语言
#[derive(Debug, Clone, Deserialize)]
pub struct ExecSection {
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default = "default_allowed_languages")]
    pub allowed_languages: Vec<String>,
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
}

impl Default for ExecSection {
    fn default() -> Self {
        Self {
            python: default_python(),
            allowed_languages: default_allowed_languages(),
            max_output_chars: default_max_output_chars(),
        }
    }
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_allowed_languages() -> Vec<String> {
    vec!["python".into(), "sh".into()]
}

fn default_max_output_chars() -> usize {
    8000
}

/// [tools.analysis] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisSection {
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
        }
    }
}

fn default_max_files() -> usize {
    200
}

/// 从 config 目录加载配置，环境变量 FORAGER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 FORAGER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, ignoring");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("FORAGER")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let c = AppConfig::default();
        assert_eq!(c.agent.max_iterations, 15);
        assert_eq!(c.agent.max_retries, 3);
        assert_eq!(c.agent.retry_backoff_ms, 2000);
        assert_eq!(c.agent.max_consecutive_parse_failures, 5);
        assert_eq!(c.tools.tool_timeout_secs, 30);
        assert_eq!(c.llm.provider, "deepseek");
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forager.toml");
        std::fs::write(
            &path,
            "[llm]\nprovider = \"mock\"\n\n[agent]\nmax_iterations = 4\n\n[tools.exec]\nallowed_languages = [\"sh\"]\n",
        )
        .unwrap();
        let c = load_config(Some(path)).unwrap();
        assert_eq!(c.llm.provider, "mock");
        assert_eq!(c.agent.max_iterations, 4);
        assert_eq!(c.agent.max_retries, 3);
        assert_eq!(c.tools.exec.allowed_languages, vec!["sh".to_string()]);
    }
}
