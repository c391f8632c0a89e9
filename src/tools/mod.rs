//! 工具层：注册表、执行器（超时 + 审计）、执行上下文与内置工具

pub mod context;
pub mod echo;
pub mod executor;
pub mod knowledge;
pub mod navigate;
pub mod registry;
pub mod schema;
pub mod settings;

pub use context::{ContextBundle, NoopUi, RecordingUi, ToolContext, UiHooks};
pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use knowledge::SearchKnowledgeTool;
pub use navigate::NavigateTool;
pub use registry::{Tool, ToolRegistry};
pub use schema::schema_value;
pub use settings::UpdateAgentSettingsTool;
