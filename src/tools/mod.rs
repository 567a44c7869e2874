pub mod analysis;
pub mod dependencies;
pub mod exec_code;
pub mod filesystem;
pub mod git_status;
pub mod input;
pub mod registry;
pub mod schema;

/// 终止工具名：拦截于分发之前，从不执行
pub const FINAL_ANSWER: &str = "final_answer";

pub use analysis::AnalyzeCodeTool;
pub use dependencies::ListDependenciesTool;
pub use exec_code::{ExecSettings, ExecuteCodeTool};
pub use filesystem::{CatTool, LsTool, SafeFs};
pub use git_status::GitStatusTool;
pub use input::{truncate_chars, Action, ActionInput};
pub use registry::{Tool, ToolContext, ToolRegistry, ToolResult, ToolStatus};
pub use schema::action_format_schema_json;
