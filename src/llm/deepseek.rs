//! DeepSeek 预设（OpenAI 兼容格式）
//!
//! - Base URL: https://api.deepseek.com
//! - 模型: deepseek-chat (常规对话), deepseek-reasoner (思考模式)
//! - DeepSeek 不提供 embeddings 接口，嵌入仍走 OpenAI（OPENAI_API_KEY）

use crate::llm::{OpenAiBackend, OpenAiEmbedder};

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const DEEPSEEK_REASONER: &str = "deepseek-reasoner";

/// 创建 DeepSeek 后端
///
/// - 优先使用环境变量 `DEEPSEEK_API_KEY`
/// - 模型可通过 `model` 参数或 `DEEPSEEK_MODEL` 环境变量指定
pub fn create_deepseek_backend(
    model: Option<&str>,
    embedding_model: &str,
    timeout_secs: u64,
) -> OpenAiBackend {
    let api_key = std::env::var("DEEPSEEK_API_KEY")
        .ok()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .unwrap_or_else(|| "sk-placeholder".to_string());

    let model = model
        .map(String::from)
        .or_else(|| std::env::var("DEEPSEEK_MODEL").ok())
        .unwrap_or_else(|| DEEPSEEK_CHAT.to_string());

    OpenAiBackend::new(
        Some(DEEPSEEK_BASE_URL),
        &model,
        embedding_model,
        Some(api_key.as_str()),
        timeout_secs,
    )
    .with_embedder(OpenAiEmbedder::new(None, embedding_model, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_model_wins() {
        let backend = create_deepseek_backend(Some(DEEPSEEK_REASONER), "text-embedding-3-small", 10);
        assert_eq!(backend.model(), DEEPSEEK_REASONER);
    }
}
