//! LLM 层：后端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）+ 嵌入管线

pub mod deepseek;
pub mod embedding;
pub mod mock;
pub mod openai;
pub mod traits;
pub mod types;

pub use deepseek::{create_deepseek_backend, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use embedding::{l2_normalize, EmbeddingPipeline, OpenAiEmbedder};
pub use mock::{MockBackend, RecordedCall};
pub use openai::OpenAiBackend;
pub use traits::{ChunkStream, LlmBackend, LlmError};
pub use types::{
    Content, ContentRole, EmbedTaskType, FunctionCall, GenerateChunk, GenerateConfig,
    GenerateResponse, Part, ToolDeclaration, UsageMetadata, parse_json_reply, strip_code_fences,
};
