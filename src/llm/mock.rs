//! Mock 后端（用于测试，无需 API）
//!
//! - 流式：按队列逐轮返回预置分片；队列为空时回显最后一条用户文本
//! - 非流式：优先消费队列中的响应，否则交给 responder 闭包，再否则返回 "{}"
//! - 嵌入：确定性的词袋哈希向量，可注入失败
//! - 记录每类调用的次数与请求内容，便于断言

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::stream;

use super::traits::{ChunkStream, LlmBackend, LlmError};
use super::types::{Content, ContentRole, EmbedTaskType, GenerateChunk, GenerateConfig, GenerateResponse};

pub const MOCK_EMBEDDING_DIM: usize = 64;

type Responder = Box<dyn Fn(&[Content], &GenerateConfig) -> Result<String, LlmError> + Send + Sync>;

/// 一次被记录的调用
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub contents: Vec<Content>,
    pub config: GenerateConfig,
}

#[derive(Default)]
pub struct MockBackend {
    turns: Mutex<VecDeque<Result<Vec<GenerateChunk>, LlmError>>>,
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    responder: Option<Responder>,
    embed_failures: Mutex<VecDeque<LlmError>>,
    stream_log: Mutex<Vec<RecordedCall>>,
    generate_log: Mutex<Vec<RecordedCall>>,
    stream_calls: AtomicUsize,
    generate_calls: AtomicUsize,
    embed_calls: AtomicUsize,
}

/// 测试替身里锁中毒无需处理，直接取内部值
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 非流式调用的兜底应答
    pub fn with_responder<F>(mut self, f: F) -> Self
    where
        F: Fn(&[Content], &GenerateConfig) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(f));
        self
    }

    /// 追加一轮流式输出
    pub fn push_turn(&self, chunks: Vec<GenerateChunk>) {
        lock(&self.turns).push_back(Ok(chunks));
    }

    /// 追加一轮失败的流式调用
    pub fn push_turn_error(&self, err: LlmError) {
        lock(&self.turns).push_back(Err(err));
    }

    pub fn push_response(&self, text: impl Into<String>) {
        lock(&self.responses).push_back(Ok(text.into()));
    }

    pub fn push_response_error(&self, err: LlmError) {
        lock(&self.responses).push_back(Err(err));
    }

    /// 接下来的若干次嵌入调用依次失败
    pub fn fail_next_embeds(&self, errors: Vec<LlmError>) {
        lock(&self.embed_failures).extend(errors);
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn stream_requests(&self) -> Vec<RecordedCall> {
        lock(&self.stream_log).clone()
    }

    pub fn generate_requests(&self) -> Vec<RecordedCall> {
        lock(&self.generate_log).clone()
    }
}

fn last_user_text(contents: &[Content]) -> String {
    contents
        .iter()
        .rev()
        .find(|c| c.role == ContentRole::User)
        .map(|c| c.text())
        .unwrap_or_else(|| "(no input)".to_string())
}

/// 词袋哈希嵌入：同样的词落在同样的维度上，保证相似文本点积更高
pub fn bag_of_words_embedding(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; MOCK_EMBEDDING_DIM];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let word = word.to_lowercase();
        // FNV-1a
        let mut h: u64 = 0xcbf29ce484222325;
        for b in word.bytes() {
            h ^= b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        v[(h % MOCK_EMBEDDING_DIM as u64) as usize] += 1.0;
    }
    if v.iter().all(|x| *x == 0.0) {
        v[0] = 1.0;
    }
    v
}

#[async_trait]
impl LlmBackend for MockBackend {
    async fn generate_stream(
        &self,
        contents: &[Content],
        config: &GenerateConfig,
    ) -> Result<ChunkStream, LlmError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.stream_log).push(RecordedCall {
            contents: contents.to_vec(),
            config: config.clone(),
        });
        let next = lock(&self.turns).pop_front();
        let chunks = match next {
            Some(turn) => turn?,
            None => vec![
                GenerateChunk::text(format!("Echo from Mock: {}", last_user_text(contents))),
                GenerateChunk::usage(10, 5),
            ],
        };
        Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok))))
    }

    async fn generate(
        &self,
        contents: &[Content],
        config: &GenerateConfig,
    ) -> Result<GenerateResponse, LlmError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.generate_log).push(RecordedCall {
            contents: contents.to_vec(),
            config: config.clone(),
        });
        let queued = lock(&self.responses).pop_front();
        let text = match (queued, &self.responder) {
            (Some(r), _) => r?,
            (None, Some(f)) => f(contents, config)?,
            (None, None) => "{}".to_string(),
        };
        Ok(GenerateResponse {
            text,
            thought: None,
            usage: None,
        })
    }

    async fn embed(&self, texts: &[String], _task: EmbedTaskType) -> Result<Vec<Vec<f32>>, LlmError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.embed_failures).pop_front() {
            return Err(err);
        }
        Ok(texts.iter().map(|t| bag_of_words_embedding(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_default_turn_echoes_last_user_text() {
        let mock = MockBackend::new();
        let mut s = mock
            .generate_stream(&[Content::user("ping")], &GenerateConfig::default())
            .await
            .unwrap();
        let first = s.next().await.unwrap().unwrap();
        assert_eq!(first.text.as_deref(), Some("Echo from Mock: ping"));
        assert_eq!(mock.stream_calls(), 1);
    }

    #[tokio::test]
    async fn test_queued_response_before_responder() {
        let mock = MockBackend::new().with_responder(|_, _| Ok("fallback".into()));
        mock.push_response("queued");
        let a = mock.generate(&[], &GenerateConfig::default()).await.unwrap();
        let b = mock.generate(&[], &GenerateConfig::default()).await.unwrap();
        assert_eq!(a.text, "queued");
        assert_eq!(b.text, "fallback");
    }

    #[test]
    fn test_bag_of_words_is_deterministic() {
        assert_eq!(bag_of_words_embedding("Rust async"), bag_of_words_embedding("rust ASYNC"));
        assert_eq!(bag_of_words_embedding("").len(), MOCK_EMBEDDING_DIM);
    }
}
