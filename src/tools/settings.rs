//! update_agent_settings 工具：让模型在对话中修改某个智能体的生成参数

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::agents::{AgentPool, GenerationPatch};
use crate::tools::schema::schema_value;
use crate::tools::{Tool, ToolContext};

#[derive(Debug, Deserialize, JsonSchema)]
struct SettingsArgs {
    /// 目标智能体的 id 或名称
    agent: String,
    system_prompt: Option<String>,
    /// 0.0 - 2.0
    temperature: Option<f32>,
    /// 0.0 - 1.0
    top_p: Option<f32>,
    top_k: Option<u32>,
    max_output_tokens: Option<u32>,
    enabled_tools: Option<Vec<String>>,
}

pub struct UpdateAgentSettingsTool {
    pool: Arc<AgentPool>,
}

impl UpdateAgentSettingsTool {
    pub fn new(pool: Arc<AgentPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Tool for UpdateAgentSettingsTool {
    fn name(&self) -> &str {
        "update_agent_settings"
    }

    fn description(&self) -> &str {
        "Update an agent's generation settings (temperature, top_p, top_k, max_output_tokens, enabled_tools, system_prompt). Only the given fields change."
    }

    fn parameters_schema(&self) -> Value {
        schema_value::<SettingsArgs>()
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, String> {
        let args: SettingsArgs = serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))?;
        let patch = GenerationPatch {
            system_prompt: args.system_prompt,
            temperature: args.temperature,
            top_p: args.top_p,
            top_k: args.top_k,
            max_output_tokens: args.max_output_tokens,
            enabled_tools: args.enabled_tools,
        };
        if patch.is_empty() {
            return Err("no settings given".to_string());
        }
        let updated = self
            .pool
            .update_config(&args.agent, &patch)
            .await
            .map_err(|e| e.to_string())?;
        Ok(json!({
            "success": true,
            "agent": updated.id,
            "settings": updated.generation,
        }))
    }
}
