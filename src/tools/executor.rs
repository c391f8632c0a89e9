//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时，execute(tool_name, args, ctx) 在超时内调用工具，
//! 未注册 / 失败 / 超时分别转为 ToolNotFound / ToolExecutionFailed / ToolTimeout；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::{ToolContext, ToolRegistry};

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn with_timeout(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub async fn execute(&self, tool_name: &str, args: Value, ctx: &ToolContext) -> Result<Value, AgentError> {
        let start = Instant::now();
        let preview = args_preview(&args);
        let result = match self.registry.get(tool_name) {
            Some(tool) => Some(timeout(self.timeout, tool.execute(args, ctx)).await),
            None => None,
        };

        let (ok, outcome): (bool, &str) = match &result {
            Some(Ok(Ok(_))) => (true, "ok"),
            Some(Ok(Err(_))) => (false, "error"),
            Some(Err(_)) => (false, "timeout"),
            None => (false, "not_found"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit, "tool");

        match result {
            Some(Ok(Ok(value))) => Ok(value),
            Some(Ok(Err(e))) => Err(AgentError::ToolExecutionFailed(e)),
            Some(Err(_)) => Err(AgentError::ToolTimeout(tool_name.to_string())),
            None => Err(AgentError::ToolNotFound(tool_name.to_string())),
        }
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    use crate::tools::{EchoTool, Tool};

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "fail"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, String> {
            Err("boom".into())
        }
    }

    fn executor(timeout_ms: u64) -> ToolExecutor {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool);
        reg.register(SlowTool);
        reg.register(FailingTool);
        ToolExecutor::with_timeout(Arc::new(reg), Duration::from_millis(timeout_ms))
    }

    #[tokio::test]
    async fn test_ok() {
        let v = executor(5_000)
            .execute("echo", json!({"text": "hi"}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(v["text"], "hi");
    }

    #[tokio::test]
    async fn test_not_found() {
        let err = executor(5_000)
            .execute("ghost", json!({}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolNotFound(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn test_failure() {
        let err = executor(5_000)
            .execute("fail", json!({}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolExecutionFailed(m) if m == "boom"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let err = executor(20)
            .execute("slow", json!({}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolTimeout(_)));
    }
}
