//! 记忆层：短期（对话窗口）、长期（按智能体加权记忆 + 新颖性门控 + 会话摘要）、检索（RAG 向量库）

pub mod conversation;
pub mod long_term;
pub mod novelty;
pub mod rag;
pub mod summarizer;

pub use conversation::{format_transcript, ConversationTurn, ShortTermMemory, TurnAuthor};
pub use long_term::{format_memory_bullets, AgentMemoryItem, LongTermMemory, MemoryType, ScoredMemory};
pub use novelty::{check_novelty, KeywordNoveltyOracle, LlmNoveltyOracle, NoveltyOracle, NoveltyVerdict};
pub use rag::{format_context, Chunker, ChunkingConfig, Retriever, SearchHit, VectorChunk, VectorStore};
pub use summarizer::{LlmSummarizer, Summarizer};
