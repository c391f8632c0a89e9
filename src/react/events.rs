//! 运行过程事件：按产生顺序推送给调用方（思考、内容、工具调用、计划快照、用量、运行记录）

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::llm::UsageMetadata;
use crate::performance::ExecutionRun;
use crate::react::planner::WorkflowStep;

/// 单个运行事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorEvent {
    /// 路由结果（总是第一个事件）
    Routed {
        agent_id: String,
        agent_name: String,
        reasoning: String,
    },
    /// 模型思考内容，或引擎给出的中性提示
    Thought { text: String },
    /// 模型输出内容
    Content { text: String },
    /// 透传的 grounding 元数据
    Metadata { grounding: serde_json::Value },
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    ToolResult {
        tool: String,
        result: serde_json::Value,
    },
    /// 计划快照（每次步骤状态变化后发送完整列表）
    PlanUpdate { steps: Vec<WorkflowStep> },
    /// 本轮用量与运行累计
    Usage {
        turn: UsageMetadata,
        cumulative: UsageMetadata,
    },
    /// 运行记录已持久化
    RunRecorded { run: ExecutionRun },
    /// 面向用户的错误消息；之后不会再有内容事件
    Error { message: String },
    Done,
}

/// 单写者事件出口：接收端被丢弃或取消令牌触发后，任何发送都返回 Cancelled
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<SupervisorEvent>,
    cancel: CancellationToken,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<SupervisorEvent>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// 在每次后端调用前检查
    pub fn check(&self) -> Result<(), AgentError> {
        if self.cancel.is_cancelled() || self.tx.is_closed() {
            return Err(AgentError::Cancelled);
        }
        Ok(())
    }

    pub async fn emit(&self, event: SupervisorEvent) -> Result<(), AgentError> {
        self.check()?;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
            sent = self.tx.send(event) => sent.map_err(|_| AgentError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_after_receiver_dropped_is_cancelled() {
        let (tx, rx) = mpsc::channel(4);
        let sink = EventSink::new(tx, CancellationToken::new());
        sink.emit(SupervisorEvent::Done).await.unwrap();
        drop(rx);
        assert!(matches!(sink.emit(SupervisorEvent::Done).await, Err(AgentError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_token_stops_emit() {
        let (tx, _rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        let sink = EventSink::new(tx, token.clone());
        token.cancel();
        assert!(matches!(sink.check(), Err(AgentError::Cancelled)));
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let v = serde_json::to_value(SupervisorEvent::Thought { text: "x".into() }).unwrap();
        assert_eq!(v["type"], "thought");
        assert_eq!(v["text"], "x");
    }
}
