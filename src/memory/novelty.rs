//! 新颖性判断：决定一条候选事实是否值得写入长期记忆
//!
//! 策略可替换：LlmNoveltyOracle 让模型判断，KeywordNoveltyOracle 按词集 Jaccard 相似度判断。
//! 已有记忆为空时直接视为新颖；判断失败时默认新颖（宁可多记，不可静默丢失）。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::llm::{parse_json_reply, Content, GenerateConfig, LlmBackend};
use crate::memory::long_term::AgentMemoryItem;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NoveltyVerdict {
    #[serde(rename = "isNovel")]
    pub is_novel: bool,
    #[serde(default)]
    pub reason: String,
}

#[async_trait]
pub trait NoveltyOracle: Send + Sync {
    async fn judge(&self, candidate: &str, existing: &[AgentMemoryItem]) -> Result<NoveltyVerdict, AgentError>;
}

/// 门控入口：空集合直接新颖；oracle 失败按恢复策略取默认值 true
pub async fn check_novelty(
    oracle: &dyn NoveltyOracle,
    candidate: &str,
    existing: &[AgentMemoryItem],
) -> NoveltyVerdict {
    if existing.is_empty() {
        return NoveltyVerdict {
            is_novel: true,
            reason: "no related memories".to_string(),
        };
    }
    match oracle.judge(candidate, existing).await {
        Ok(v) => v,
        Err(e) => {
            let action = RecoveryEngine::new().handle(&e);
            tracing::warn!(error = %e, ?action, "novelty check failed, treating candidate as novel");
            NoveltyVerdict {
                is_novel: true,
                reason: format!("novelty check failed: {e}"),
            }
        }
    }
}

pub struct LlmNoveltyOracle {
    backend: Arc<dyn LlmBackend>,
}

impl LlmNoveltyOracle {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl NoveltyOracle for LlmNoveltyOracle {
    async fn judge(&self, candidate: &str, existing: &[AgentMemoryItem]) -> Result<NoveltyVerdict, AgentError> {
        let known = existing
            .iter()
            .map(|m| format!("- {}", m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Existing memories:\n{known}\n\nCandidate memory:\n{candidate}\n\n\
             Does the candidate add information that is not already covered by the existing memories?"
        );
        let config = GenerateConfig {
            system_instruction: Some(
                "You deduplicate an assistant's long-term memory. Reply with JSON: \
                 {\"isNovel\": boolean, \"reason\": string}."
                    .to_string(),
            ),
            temperature: Some(0.0),
            json_output: true,
            response_schema: Some(json!({
                "type": "object",
                "properties": {
                    "isNovel": { "type": "boolean" },
                    "reason": { "type": "string" }
                },
                "required": ["isNovel", "reason"]
            })),
            ..Default::default()
        };
        let resp = self
            .backend
            .generate(&[Content::user(prompt)], &config)
            .await
            .map_err(|e| AgentError::NoveltyCheck(e.to_string()))?;
        parse_json_reply(&resp.text).map_err(|e| AgentError::NoveltyCheck(format!("invalid verdict: {e}")))
    }
}

/// 规则实现：与任一已有记忆的词集 Jaccard 相似度达到阈值即视为重复
pub struct KeywordNoveltyOracle {
    threshold: f32,
}

impl KeywordNoveltyOracle {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for KeywordNoveltyOracle {
    fn default() -> Self {
        Self::new(0.6)
    }
}

fn word_set(s: &str) -> HashSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / union as f32
}

#[async_trait]
impl NoveltyOracle for KeywordNoveltyOracle {
    async fn judge(&self, candidate: &str, existing: &[AgentMemoryItem]) -> Result<NoveltyVerdict, AgentError> {
        let cand = word_set(candidate);
        let best = existing
            .iter()
            .map(|m| jaccard(&cand, &word_set(&m.content)))
            .fold(0.0f32, f32::max);
        Ok(NoveltyVerdict {
            is_novel: best < self.threshold,
            reason: format!("max keyword overlap {best:.2}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, MockBackend};
    use crate::memory::long_term::MemoryType;
    use chrono::Utc;

    fn item(content: &str) -> AgentMemoryItem {
        AgentMemoryItem {
            id: "m1".into(),
            content: content.into(),
            memory_type: MemoryType::SelfGenerated,
            weight: 0.5,
            created_at: Utc::now(),
            last_accessed: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_empty_existing_is_novel_without_call() {
        let backend = Arc::new(MockBackend::new());
        let oracle = LlmNoveltyOracle::new(backend.clone());
        let v = check_novelty(&oracle, "anything", &[]).await;
        assert!(v.is_novel);
        assert_eq!(backend.generate_calls(), 0);
    }

    #[tokio::test]
    async fn test_llm_verdict_parsed() {
        let backend = Arc::new(MockBackend::new());
        backend.push_response(r#"{"isNovel": false, "reason": "already known"}"#);
        let oracle = LlmNoveltyOracle::new(backend);
        let v = check_novelty(&oracle, "user likes rust", &[item("user likes rust")]).await;
        assert!(!v.is_novel);
        assert_eq!(v.reason, "already known");
    }

    #[tokio::test]
    async fn test_backend_failure_defaults_to_novel() {
        let backend = Arc::new(MockBackend::new());
        backend.push_response_error(LlmError::Unavailable("503".into()));
        let oracle = LlmNoveltyOracle::new(backend);
        let v = check_novelty(&oracle, "x", &[item("y")]).await;
        assert!(v.is_novel);
    }

    #[tokio::test]
    async fn test_unparseable_verdict_defaults_to_novel() {
        let backend = Arc::new(MockBackend::new());
        backend.push_response("sure, it is novel");
        let oracle = LlmNoveltyOracle::new(backend);
        assert!(check_novelty(&oracle, "x", &[item("y")]).await.is_novel);
    }

    #[tokio::test]
    async fn test_keyword_oracle() {
        let oracle = KeywordNoveltyOracle::default();
        let existing = [item("The user prefers dark mode")];
        assert!(!oracle.judge("the user prefers dark mode", &existing).await.unwrap().is_novel);
        assert!(oracle.judge("Project deadline is Friday", &existing).await.unwrap().is_novel);
    }
}
