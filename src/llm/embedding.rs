//! 嵌入：OpenAI 兼容 /embeddings 客户端 + 批量嵌入管线
//!
//! EmbeddingPipeline 将文本按批（默认 100）请求嵌入，仅对可重试错误做指数退避重试（默认 5 次），
//! 并对每个返回向量做 L2 归一化。重试耗尽后错误原样上抛，不会静默写入部分结果。

use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;

use super::traits::{LlmBackend, LlmError};
use super::types::EmbedTaskType;
use crate::core::AgentError;

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedder {
    /// 与对话共用 OPENAI_API_KEY / base_url
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }

    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::StringArray(texts.to_vec()))
            .build()
            .map_err(|e| LlmError::InvalidRequest(e.to_string()))?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| classify_error_message(&e.to_string()))?;
        let mut data = response.data;
        data.sort_by_key(|e| e.index);
        Ok(data.into_iter().map(|e| e.embedding).collect())
    }
}

impl Clone for OpenAiEmbedder {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            model: self.model.clone(),
        }
    }
}

/// async-openai 的错误只暴露文本，按关键字归类
pub(crate) fn classify_error_message(msg: &str) -> LlmError {
    let lower = msg.to_lowercase();
    if lower.contains("rate limit") || lower.contains("429") {
        LlmError::RateLimited(msg.to_string())
    } else if lower.contains("timed out") || lower.contains("timeout") {
        LlmError::Timeout
    } else if lower.contains("overloaded")
        || lower.contains("503")
        || lower.contains("502")
        || lower.contains("unavailable")
    {
        LlmError::Unavailable(msg.to_string())
    } else if lower.contains("connect") || lower.contains("error sending request") {
        LlmError::Transport(msg.to_string())
    } else {
        LlmError::Api(msg.to_string())
    }
}

/// L2 归一化（零向量保持不变）
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// 第 attempt 次失败后的等待时长：base * 2^(attempt-1)，溢出时饱和
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

/// 批量嵌入管线
pub struct EmbeddingPipeline {
    backend: Arc<dyn LlmBackend>,
    batch_size: usize,
    max_attempts: u32,
    base_delay: Duration,
}

impl EmbeddingPipeline {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self {
            backend,
            batch_size: 100,
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
        }
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.max(1);
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.base_delay = base_delay;
        self
    }

    /// 入库文档嵌入：逐批请求，任一批失败即整体失败
    pub async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AgentError> {
        let mut out = Vec::with_capacity(texts.len());
        for (batch_idx, batch) in texts.chunks(self.batch_size).enumerate() {
            let vectors = self
                .embed_batch_with_retry(batch_idx, batch, EmbedTaskType::RetrievalDocument)
                .await?;
            out.extend(vectors);
        }
        Ok(out)
    }

    /// 查询嵌入（单条）
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, AgentError> {
        let mut vectors = self
            .embed_batch_with_retry(0, &[text.to_string()], EmbedTaskType::RetrievalQuery)
            .await?;
        vectors.pop().ok_or_else(|| AgentError::EmbeddingBatch {
            batch: 0,
            attempts: 1,
            source: LlmError::InvalidResponse("empty embedding response".to_string()),
        })
    }

    async fn embed_batch_with_retry(
        &self,
        batch_idx: usize,
        batch: &[String],
        task: EmbedTaskType,
    ) -> Result<Vec<Vec<f32>>, AgentError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = self.backend.embed(batch, task).await.and_then(|v| {
                if v.len() == batch.len() {
                    Ok(v)
                } else {
                    Err(LlmError::InvalidResponse(format!(
                        "expected {} embeddings, got {}",
                        batch.len(),
                        v.len()
                    )))
                }
            });
            match result {
                Ok(mut vectors) => {
                    for v in vectors.iter_mut() {
                        l2_normalize(v);
                    }
                    return Ok(vectors);
                }
                Err(e) if e.is_retriable() && attempt < self.max_attempts => {
                    let delay = backoff_delay(self.base_delay, attempt);
                    tracing::warn!(batch = batch_idx, attempt, ?delay, error = %e, "embedding batch failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(batch = batch_idx, attempt, error = %e, "embedding batch failed");
                    return Err(AgentError::EmbeddingBatch {
                        batch: batch_idx,
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }
}
