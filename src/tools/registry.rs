//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册与查找，
//! ToolExecutor 在调用时加超时并统一转 AgentError。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::ToolDeclaration;
use crate::tools::ToolContext;

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具，返回可序列化的 JSON 结果；Err 为给模型看的失败说明
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, String>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// 智能体启用的工具声明（按启用顺序，忽略未注册的名称）
    pub fn declarations(&self, enabled: &[String]) -> Vec<ToolDeclaration> {
        enabled
            .iter()
            .filter_map(|name| {
                let tool = self.tools.get(name);
                if tool.is_none() {
                    tracing::warn!(tool = %name, "enabled tool is not registered");
                }
                tool
            })
            .map(|tool| ToolDeclaration {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;

    #[test]
    fn test_declarations_follow_enabled_order() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool);
        let decls = reg.declarations(&["missing".into(), "echo".into()]);
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].name, "echo");
        assert_eq!(reg.tool_names(), vec!["echo".to_string()]);
    }
}
