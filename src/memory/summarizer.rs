//! 会话摘要：会话结束时把最近若干轮对话提炼为一句可长期保存的事实（或 null）

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::core::AgentError;
use crate::llm::{parse_json_reply, Content, GenerateConfig, LlmBackend};
use crate::memory::conversation::{format_transcript, ConversationTurn};

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// 返回 None 表示没有值得记住的内容
    async fn summarize(&self, turns: &[ConversationTurn]) -> Result<Option<String>, AgentError>;
}

#[derive(Debug, Deserialize)]
struct FactReply {
    fact: Option<String>,
}

pub struct LlmSummarizer {
    backend: Arc<dyn LlmBackend>,
}

impl LlmSummarizer {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, turns: &[ConversationTurn]) -> Result<Option<String>, AgentError> {
        if turns.is_empty() {
            return Ok(None);
        }
        let config = GenerateConfig {
            system_instruction: Some(
                "Extract at most one durable fact about the user or their project from the conversation, \
                 as a single sentence. If nothing is worth remembering, use null. \
                 Reply with JSON: {\"fact\": string | null}."
                    .to_string(),
            ),
            temperature: Some(0.0),
            json_output: true,
            response_schema: Some(json!({
                "type": "object",
                "properties": { "fact": { "type": ["string", "null"] } },
                "required": ["fact"]
            })),
            ..Default::default()
        };
        let resp = self
            .backend
            .generate(&[Content::user(format_transcript(turns))], &config)
            .await
            .map_err(|e| AgentError::Summarization(e.to_string()))?;
        let reply: FactReply =
            parse_json_reply(&resp.text).map_err(|e| AgentError::Summarization(format!("invalid reply: {e}")))?;
        Ok(reply
            .fact
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty()))
    }
}
