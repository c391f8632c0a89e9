//! RAG (Retrieval-Augmented Generation)
//!
//! 提供文档分块、向量化存储与检索：
//! - Chunker：定长字符块 + 重叠（UTF-8 安全）
//! - VectorStore：按来源标识存于 KvStore 的 `vec:{source_id}`，重新入库整体替换；暴力点积检索，
//!   同分按入库序号排序
//! - Retriever：串起分块、嵌入管线与向量库，供执行监督器和 search_knowledge 工具使用

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::core::AgentError;
use crate::llm::EmbeddingPipeline;
use crate::storage::{get_json, set_json, KvStore};

const VEC_PREFIX: &str = "vec:";
/// 下一个入库序号
const SEQ_KEY: &str = "meta:vec_seq";

/// 分块策略
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// 块大小（字符数）
    pub chunk_size: usize,
    /// 相邻块重叠（字符数），必须小于 chunk_size
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 64,
        }
    }
}

/// 文档分块器
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        let size = config.chunk_size.max(1);
        Self {
            config: ChunkingConfig {
                chunk_size: size,
                chunk_overlap: config.chunk_overlap.min(size - 1),
            },
        }
    }

    /// 定长切分；空白块被丢弃
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let step = self.config.chunk_size - self.config.chunk_overlap;
        let mut out = Vec::new();
        let mut start = 0;
        while start < total {
            let end = (start + self.config.chunk_size).min(total);
            let piece: String = chars[start..end].iter().collect();
            if !piece.trim().is_empty() {
                out.push(piece);
            }
            if end == total {
                break;
            }
            start += step;
        }
        out
    }
}

/// 带嵌入的文档块
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorChunk {
    pub id: String,
    pub source_id: String,
    /// 来源类型（file / note / url ...），对检索不透明
    pub source_type: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    /// 入库序号，由 VectorStore 写入时分配
    #[serde(default)]
    pub seq: u64,
}

/// 检索结果
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: VectorChunk,
    pub score: f32,
}

fn source_key(source_id: &str) -> String {
    format!("{VEC_PREFIX}{source_id}")
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// 向量存储
pub struct VectorStore {
    store: Arc<dyn KvStore>,
    /// 固定维度；None 时只要求同一批内维度一致
    dimensions: Option<usize>,
    seq_lock: Mutex<()>,
}

impl VectorStore {
    pub fn new(store: Arc<dyn KvStore>, dimensions: Option<usize>) -> Self {
        Self {
            store,
            dimensions,
            seq_lock: Mutex::new(()),
        }
    }

    /// 写入某来源的全部块，替换该来源旧块
    pub async fn put_source(&self, source_id: &str, chunks: &[VectorChunk]) -> Result<(), AgentError> {
        let expected = self.dimensions.or_else(|| chunks.first().map(|c| c.embedding.len()));
        if let Some(dim) = expected {
            if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != dim) {
                return Err(AgentError::Config(format!(
                    "embedding dimension mismatch for chunk {}: expected {dim}, got {}",
                    bad.id,
                    bad.embedding.len()
                )));
            }
        }
        let _guard = self.seq_lock.lock().await;
        let base: u64 = get_json(self.store.as_ref(), SEQ_KEY).await?.unwrap_or(0);
        let stamped: Vec<VectorChunk> = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| VectorChunk {
                seq: base + i as u64,
                ..c.clone()
            })
            .collect();
        set_json(self.store.as_ref(), &source_key(source_id), &stamped).await?;
        set_json(self.store.as_ref(), SEQ_KEY, &(base + stamped.len() as u64)).await?;
        Ok(())
    }

    pub async fn get_source(&self, source_id: &str) -> Result<Vec<VectorChunk>, AgentError> {
        Ok(get_json(self.store.as_ref(), &source_key(source_id))
            .await?
            .unwrap_or_default())
    }

    pub async fn remove_source(&self, source_id: &str) -> Result<bool, AgentError> {
        Ok(self.store.delete(&source_key(source_id)).await?)
    }

    /// 清空全部来源，返回删除的来源数
    pub async fn clear(&self) -> Result<usize, AgentError> {
        let keys = self.store.list_keys(VEC_PREFIX).await?;
        for key in &keys {
            self.store.delete(key).await?;
        }
        Ok(keys.len())
    }

    pub async fn sources(&self) -> Result<Vec<String>, AgentError> {
        Ok(self
            .store
            .list_keys(VEC_PREFIX)
            .await?
            .into_iter()
            .map(|k| k[VEC_PREFIX.len()..].to_string())
            .collect())
    }

    /// 暴力扫描：查询向量与所有块点积（两侧均已归一化即余弦），降序取 top_k，同分先入库者在前
    pub async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>, AgentError> {
        let mut hits = Vec::new();
        for key in self.store.list_keys(VEC_PREFIX).await? {
            let chunks: Vec<VectorChunk> = get_json(self.store.as_ref(), &key).await?.unwrap_or_default();
            for chunk in chunks {
                if chunk.embedding.len() != query.len() {
                    tracing::warn!(chunk = %chunk.id, "skipping chunk with mismatched dimension");
                    continue;
                }
                let score = dot(query, &chunk.embedding);
                hits.push(SearchHit { chunk, score });
            }
        }
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk.seq.cmp(&b.chunk.seq))
        });
        hits.retain(|h| h.score > 0.0);
        hits.truncate(top_k);
        Ok(hits)
    }
}

/// 检索入口：入库 / 移除 / 清空 / 查询
pub struct Retriever {
    chunker: Chunker,
    pipeline: Arc<EmbeddingPipeline>,
    store: Arc<VectorStore>,
}

impl Retriever {
    pub fn new(chunker: Chunker, pipeline: Arc<EmbeddingPipeline>, store: Arc<VectorStore>) -> Self {
        Self {
            chunker,
            pipeline,
            store,
        }
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// 分块、嵌入、替换写入；嵌入失败时不写入任何块。返回块数
    pub async fn ingest(&self, source_id: &str, source_type: &str, text: &str) -> Result<usize, AgentError> {
        let pieces = self.chunker.chunk(text);
        let embeddings = self.pipeline.embed_documents(&pieces).await?;
        let now = Utc::now();
        let chunks: Vec<VectorChunk> = pieces
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (text, embedding))| VectorChunk {
                id: format!("{source_id}#{i}"),
                source_id: source_id.to_string(),
                source_type: source_type.to_string(),
                text,
                embedding,
                created_at: now,
                seq: 0,
            })
            .collect();
        self.store.put_source(source_id, &chunks).await?;
        tracing::info!(source = source_id, chunks = chunks.len(), "source ingested");
        Ok(chunks.len())
    }

    pub async fn remove(&self, source_id: &str) -> Result<bool, AgentError> {
        let removed = self.store.remove_source(source_id).await?;
        tracing::info!(source = source_id, removed, "source removed");
        Ok(removed)
    }

    pub async fn clear(&self) -> Result<usize, AgentError> {
        self.store.clear().await
    }

    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, AgentError> {
        let q = self.pipeline.embed_query(query).await?;
        self.store.search(&q, top_k).await
    }
}

/// 格式化为 `--- From file: <id> ---` 块
pub fn format_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|h| format!("--- From file: {} ---\n{}", h.chunk.source_id, h.chunk.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}
