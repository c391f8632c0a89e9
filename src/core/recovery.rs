//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供路由器、执行循环、计划执行器与会话收尾决定如何继续。

use serde_json::json;

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

pub const LOOP_LIMIT_MESSAGE: &str =
    "It seems I'm stuck in a loop of function calls. Please try rephrasing your request.";

pub const PLAN_PARSE_MESSAGE: &str =
    "I'm sorry, I couldn't create a valid plan for this request. Please try rephrasing it.";

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::Routing(_) => RecoveryAction::FallbackToDefault,
            AgentError::PlanParse(_) => RecoveryAction::NotifyUser(PLAN_PARSE_MESSAGE.to_string()),
            AgentError::LoopLimitExceeded(_) => {
                RecoveryAction::NotifyUser(LOOP_LIMIT_MESSAGE.to_string())
            }
            AgentError::StepAgentNotFound { step, agent } => RecoveryAction::SubstituteStepOutput(
                format!("Error: Step {step} could not be executed because agent '{agent}' was not found."),
            ),
            AgentError::ToolNotFound(name) => RecoveryAction::FeedBackToModel(json!({
                "success": false,
                "message": format!("Tool '{name}' not found."),
            })),
            AgentError::ToolExecutionFailed(msg) => RecoveryAction::FeedBackToModel(json!({
                "success": false,
                "message": msg,
            })),
            AgentError::ToolTimeout(name) => RecoveryAction::FeedBackToModel(json!({
                "success": false,
                "message": format!("Tool '{name}' timed out."),
            })),
            AgentError::NoveltyCheck(_) | AgentError::Summarization(_) => RecoveryAction::UseDefault,
            AgentError::Cancelled => RecoveryAction::Abort,
            AgentError::EmbeddingBatch { .. }
            | AgentError::Llm(_)
            | AgentError::Storage(_)
            | AgentError::InvalidTransition { .. }
            | AgentError::RunNotFound(_)
            | AgentError::AgentNotFound(_)
            | AgentError::Config(_) => RecoveryAction::Propagate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;

    #[test]
    fn test_routing_falls_back() {
        let engine = RecoveryEngine::new();
        let action = engine.handle(&AgentError::Routing("bad json".into()));
        assert_eq!(action, RecoveryAction::FallbackToDefault);
    }

    #[test]
    fn test_loop_limit_notifies_user() {
        let engine = RecoveryEngine::new();
        match engine.handle(&AgentError::LoopLimitExceeded(10)) {
            RecoveryAction::NotifyUser(msg) => assert!(msg.contains("stuck in a loop")),
            other => panic!("Expected NotifyUser, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_tool_is_fed_back() {
        let engine = RecoveryEngine::new();
        match engine.handle(&AgentError::ToolNotFound("fake_tool".into())) {
            RecoveryAction::FeedBackToModel(v) => {
                assert_eq!(v["success"], false);
                assert!(v["message"].as_str().unwrap().contains("fake_tool"));
            }
            other => panic!("Expected FeedBackToModel, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_step_agent_substitutes_output() {
        let engine = RecoveryEngine::new();
        let err = AgentError::StepAgentNotFound {
            step: 2,
            agent: "ghost".into(),
        };
        match engine.handle(&err) {
            RecoveryAction::SubstituteStepOutput(msg) => {
                assert!(msg.starts_with("Error:"));
                assert!(msg.contains("ghost"));
            }
            other => panic!("Expected SubstituteStepOutput, got {other:?}"),
        }
    }

    #[test]
    fn test_embedding_failure_propagates() {
        let engine = RecoveryEngine::new();
        let err = AgentError::EmbeddingBatch {
            batch: 0,
            attempts: 5,
            source: LlmError::Timeout,
        };
        assert_eq!(engine.handle(&err), RecoveryAction::Propagate);
    }

    #[test]
    fn test_novelty_failure_uses_default() {
        let engine = RecoveryEngine::new();
        assert_eq!(
            engine.handle(&AgentError::NoveltyCheck("503".into())),
            RecoveryAction::UseDefault
        );
    }

    #[test]
    fn test_cancelled_aborts() {
        let engine = RecoveryEngine::new();
        assert_eq!(engine.handle(&AgentError::Cancelled), RecoveryAction::Abort);
    }
}
