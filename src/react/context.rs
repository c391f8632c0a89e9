//! 上下文组装：按固定顺序拼接分层上下文，空层跳过
//!
//! 1. 短期窗口（最近 k 轮对话）
//! 2. 长期记忆（当前智能体分区内与提示最相关的条目）
//! 3. 重试上下文（上次失败 + 用户原话反馈）
//! 4. 检索增强（仅当智能体接受上下文）：`--- From file: <id> ---` 块

use serde::{Deserialize, Serialize};

use crate::agents::AgentDescriptor;
use crate::core::AgentError;
use crate::memory::{format_context, format_memory_bullets, LongTermMemory, Retriever, ShortTermMemory};

pub const NO_CONTEXT_FOUND: &str = "No relevant context found in the indexed files.";

/// 重试上下文：上次的原始提示与用户的纠正反馈
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryContext {
    pub original_prompt: String,
    pub feedback: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    ShortTerm,
    LongTerm,
    Retry,
    Retrieval,
}

#[derive(Debug, Clone)]
pub struct ContextLayer {
    pub kind: LayerKind,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub layers: Vec<ContextLayer>,
    /// 智能体接受检索上下文但没有检索到任何块
    pub retrieval_empty: bool,
    /// 各层 + 用户原始请求拼接后的完整提示
    pub prompt: String,
}

impl AssembledContext {
    pub fn has_layer(&self, kind: LayerKind) -> bool {
        self.layers.iter().any(|l| l.kind == kind)
    }
}

pub struct ContextAssembler<'a> {
    pub short_term: &'a ShortTermMemory,
    pub long_term: &'a LongTermMemory,
    pub retriever: &'a Retriever,
    pub short_term_window: usize,
    pub long_term_top_n: usize,
    pub rag_top_k: usize,
}

impl ContextAssembler<'_> {
    /// 组装上下文；检索失败（如嵌入重试耗尽）直接上抛
    pub async fn assemble(
        &self,
        agent: &AgentDescriptor,
        prompt: &str,
        retry: Option<&RetryContext>,
    ) -> Result<AssembledContext, AgentError> {
        let mut layers = Vec::new();

        if let Some(transcript) = self.short_term.transcript(self.short_term_window) {
            layers.push(ContextLayer {
                kind: LayerKind::ShortTerm,
                text: format!("## Recent Conversation\n{transcript}"),
            });
        }

        let memories = self
            .long_term
            .search(&agent.id, prompt, self.long_term_top_n)
            .await?;
        if !memories.is_empty() {
            layers.push(ContextLayer {
                kind: LayerKind::LongTerm,
                text: format!(
                    "## Things You Remember About This User\n{}",
                    format_memory_bullets(&memories)
                ),
            });
        }

        if let Some(r) = retry {
            layers.push(ContextLayer {
                kind: LayerKind::Retry,
                text: format!(
                    "## Previous Attempt Failed\nYour previous answer to \"{}\" was not satisfactory. \
                     The user's feedback, verbatim:\n\"{}\"\nTake this feedback into account.",
                    r.original_prompt, r.feedback
                ),
            });
        }

        let mut retrieval_empty = false;
        if agent.accepts_context() {
            let hits = self.retriever.search(prompt, self.rag_top_k).await?;
            if hits.is_empty() {
                retrieval_empty = true;
            } else {
                tracing::debug!(agent = %agent.id, chunks = hits.len(), "retrieved context");
                layers.push(ContextLayer {
                    kind: LayerKind::Retrieval,
                    text: format!("## Relevant Files\n{}", format_context(&hits)),
                });
            }
        }

        let mut sections: Vec<&str> = layers.iter().map(|l| l.text.as_str()).collect();
        let request = format!("## User Request\n{prompt}");
        let prompt = if sections.is_empty() {
            prompt.to_string()
        } else {
            sections.push(&request);
            sections.join("\n\n")
        };

        Ok(AssembledContext {
            layers,
            retrieval_empty,
            prompt,
        })
    }
}
