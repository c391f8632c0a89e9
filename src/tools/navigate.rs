//! navigate 工具：通过宿主应用的 UI 钩子切换视图

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::schema::schema_value;
use crate::tools::{Tool, ToolContext};

#[derive(Deserialize, JsonSchema)]
struct NavigateArgs {
    /// 目标视图名，如 chat / settings / files / memory
    view: String,
}

pub struct NavigateTool;

#[async_trait]
impl Tool for NavigateTool {
    fn name(&self) -> &str {
        "navigate"
    }

    fn description(&self) -> &str {
        "Switch the application to another view (e.g. chat, settings, files, memory)."
    }

    fn parameters_schema(&self) -> Value {
        schema_value::<NavigateArgs>()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, String> {
        let args: NavigateArgs = serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))?;
        let view = args.view.trim();
        if view.is_empty() {
            return Err("view must not be empty".to_string());
        }
        ctx.ui.navigate(view)?;
        Ok(json!({ "success": true, "view": view }))
    }
}
