//! LLM 后端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmBackend：
//! generate_stream（流式分片）、generate（非流式结构化响应）、embed（批量嵌入）。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use thiserror::Error;

use super::types::{Content, EmbedTaskType, GenerateChunk, GenerateConfig, GenerateResponse};

/// 后端错误；is_retriable 区分可重试的瞬时故障（限流、服务不可用、超时、网络）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("API error: {0}")]
    Api(String),
}

impl LlmError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited(_) | LlmError::Unavailable(_) | LlmError::Timeout | LlmError::Transport(_)
        )
    }

    /// 由 HTTP 状态码映射
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            429 => LlmError::RateLimited(body),
            500 | 502 | 503 | 504 | 529 => LlmError::Unavailable(body),
            400 | 404 | 422 => LlmError::InvalidRequest(body),
            _ => LlmError::Api(format!("HTTP {status}: {body}")),
        }
    }
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<GenerateChunk, LlmError>> + Send>>;

#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// 流式生成：按顺序产出 text / thought / function_call / metadata / usage 分片
    async fn generate_stream(
        &self,
        contents: &[Content],
        config: &GenerateConfig,
    ) -> Result<ChunkStream, LlmError>;

    /// 非流式生成：用于分类、新颖性判断、摘要等一次性调用
    async fn generate(
        &self,
        contents: &[Content],
        config: &GenerateConfig,
    ) -> Result<GenerateResponse, LlmError>;

    /// 批量嵌入，返回与输入等长的向量列表
    async fn embed(&self, texts: &[String], task: EmbedTaskType) -> Result<Vec<Vec<f32>>, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        assert!(LlmError::from_status(429, "slow down").is_retriable());
        assert!(LlmError::from_status(503, "overloaded").is_retriable());
        assert!(LlmError::Timeout.is_retriable());
        assert!(!LlmError::from_status(400, "bad").is_retriable());
        assert!(!LlmError::from_status(401, "no key").is_retriable());
        assert!(!LlmError::InvalidResponse("x".into()).is_retriable());
    }
}
