//! Agent 构建器：从配置装配 LLM、工具注册表、恢复引擎与 Planner
//!
//! 每次运行都从同一组组件出发；注册表由这里构造一次并按引用传入控制循环。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;

use crate::config::AppConfig;
use crate::core::recovery::RetryPolicy;
use crate::core::{AgentError, RecoveryEngine, RunResult};
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient};
use crate::react::{react_loop, Planner, ReactEvent, ReactSession, DEFAULT_SYSTEM_PROMPT};
use crate::tools::{
    AnalyzeCodeTool, CatTool, ExecSettings, ExecuteCodeTool, GitStatusTool, ListDependenciesTool,
    LsTool, ToolRegistry,
};

const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";

/// 按 provider 选择 LLM 后端；缺少 API Key 或 provider 未知时退回 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let timeout = cfg.llm.timeouts.request;
    let has_deepseek_key =
        std::env::var("DEEPSEEK_API_KEY").is_ok() || std::env::var("OPENAI_API_KEY").is_ok();
    let has_openai_key = std::env::var("OPENAI_API_KEY").is_ok();

    match provider.as_str() {
        "deepseek" if has_deepseek_key => {
            let client = create_deepseek_client(cfg.llm.model.as_deref(), timeout);
            tracing::info!(model = ?cfg.llm.model, "Using DeepSeek LLM");
            Arc::new(client)
        }
        "openai" if has_openai_key => {
            let model = cfg.llm.model.as_deref().unwrap_or(OPENAI_DEFAULT_MODEL);
            tracing::info!(model, "Using OpenAI LLM");
            Arc::new(
                OpenAiClient::new(cfg.llm.base_url.as_deref(), model, None)
                    .with_request_timeout(timeout),
            )
        }
        "mock" => Arc::new(MockLlmClient),
        other => {
            tracing::warn!(provider = other, "No API key set or provider unknown, using Mock LLM");
            Arc::new(MockLlmClient)
        }
    }
}

/// Agent 构建器
pub struct AgentBuilder {
    config: AppConfig,
    workspace: PathBuf,
    system_prompt: String,
    llm: Option<Arc<dyn LlmClient>>,
}

impl AgentBuilder {
    pub fn new(config: AppConfig, workspace: PathBuf) -> Self {
        Self {
            config,
            workspace,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            llm: None,
        }
    }

    /// 设置系统提示词
    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = prompt.to_string();
        self
    }

    /// 从 [agent].system_prompt_path 加载系统提示词，读不到时保留内置文案
    pub fn with_system_prompt_from_file(mut self) -> Self {
        let Some(path) = self.config.agent.system_prompt_path.clone() else {
            return self;
        };
        match std::fs::read_to_string(&path) {
            Ok(prompt) if !prompt.trim().is_empty() => self.system_prompt = prompt,
            Ok(_) => tracing::warn!(
                path = %path.display(),
                "system prompt file is empty, using built-in prompt"
            ),
            Err(e) => tracing::warn!(
                path = %path.display(),
                error = %e,
                "system prompt file unreadable, using built-in prompt"
            ),
        }
        self
    }

    /// 注入现成的 LLM 客户端（测试与嵌入场景）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 构建工具注册表
    pub fn build_tool_registry(&self) -> ToolRegistry {
        let tools_cfg = &self.config.tools;
        let mut tools = ToolRegistry::new();
        tools.register(LsTool::new(&self.workspace));
        tools.register(CatTool::new(&self.workspace));
        tools.register(GitStatusTool::new(&self.workspace, tools_cfg.tool_timeout_secs));
        tools.register(AnalyzeCodeTool::new(&self.workspace, tools_cfg.analysis.max_files));
        tools.register(ListDependenciesTool::new(&self.workspace));
        tools.register(ExecuteCodeTool::new(ExecSettings {
            python: tools_cfg.exec.python.clone(),
            allowed_languages: tools_cfg.exec.allowed_languages.clone(),
            timeout_secs: tools_cfg.tool_timeout_secs,
            max_output_chars: tools_cfg.exec.max_output_chars,
        }));
        tools
    }

    pub fn build_recovery(&self) -> RecoveryEngine {
        RecoveryEngine::new(RetryPolicy {
            max_retries: self.config.agent.max_retries,
            backoff: Duration::from_millis(self.config.agent.retry_backoff_ms),
        })
    }

    pub fn build_llm(&self) -> Arc<dyn LlmClient> {
        self.llm
            .clone()
            .unwrap_or_else(|| create_llm_from_config(&self.config))
    }

    /// 构建完整的 AgentComponents
    pub fn build_components(&self) -> AgentComponents {
        let llm = self.build_llm();
        AgentComponents {
            planner: Planner::new(llm, self.system_prompt.clone()),
            registry: self.build_tool_registry(),
            recovery: self.build_recovery(),
            config: self.config.clone(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 构建前修改配置（命令行覆盖）
    pub fn config_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }
}

/// 预构建的组件：Planner、ToolRegistry、RecoveryEngine；可连续执行多次运行
pub struct AgentComponents {
    pub planner: Planner,
    pub registry: ToolRegistry,
    pub recovery: RecoveryEngine,
    pub config: AppConfig,
}

impl AgentComponents {
    pub fn session(&self) -> ReactSession<'_> {
        ReactSession::new(&self.planner, &self.registry, &self.recovery).with_limits(
            self.config.agent.max_iterations,
            self.config.agent.max_consecutive_parse_failures,
        )
    }

    /// 执行一个任务
    pub async fn run(&self, task: &str) -> RunResult {
        react_loop(&self.session(), task).await
    }

    /// 执行一个任务并推送过程事件
    pub async fn run_with_events(&self, task: &str, tx: &UnboundedSender<ReactEvent>) -> RunResult {
        react_loop(&self.session().with_event_tx(tx), task).await
    }
}

/// 便捷函数：加载配置、确定工作目录，返回 AgentBuilder
pub fn create_agent_builder(
    config_path: Option<PathBuf>,
    workspace_override: Option<PathBuf>,
) -> Result<AgentBuilder, AgentError> {
    let config = crate::config::load_config(config_path)
        .map_err(|e| AgentError::ConfigError(e.to_string()))?;

    let workspace = match workspace_override.or_else(|| config.app.workspace_root.clone()) {
        Some(w) => w,
        None => std::env::current_dir().map_err(|e| AgentError::ConfigError(e.to_string()))?,
    };
    if !workspace.is_dir() {
        return Err(AgentError::ConfigError(format!(
            "workspace is not a directory: {}",
            workspace.display()
        )));
    }
    let workspace = workspace.canonicalize().unwrap_or(workspace);

    Ok(AgentBuilder::new(config, workspace).with_system_prompt_from_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TerminationReason;
    use crate::llm::ScriptedLlmClient;

    #[test]
    fn test_registry_has_all_tools() {
        let dir = tempfile::tempdir().unwrap();
        let builder = AgentBuilder::new(AppConfig::default(), dir.path().to_path_buf());
        let registry = builder.build_tool_registry();
        assert_eq!(
            registry.tool_names(),
            vec!["analyze_code", "cat", "execute_code", "git_status", "list_dependencies", "ls"]
        );
        assert!(registry.needs_memory("execute_code"));
        assert!(!registry.needs_memory("ls"));
    }

    #[test]
    fn test_mock_provider_without_keys() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".into();
        // 只验证不会 panic 且返回可用客户端
        let llm = create_llm_from_config(&cfg);
        assert_eq!(llm.token_usage(), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_components_run_with_injected_llm() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlmClient::replies([
            "```json\n{\"thought\": \"done\", \"action\": {\"tool\": \"final_answer\", \"input\": \"ok\"}}\n```",
        ]));
        let components = AgentBuilder::new(AppConfig::default(), dir.path().to_path_buf())
            .with_llm(llm)
            .build_components();
        let result = components.run("say ok").await;
        assert_eq!(result.termination_reason, TerminationReason::FinalAnswer);
        assert_eq!(result.final_answer, "ok");
    }
}
