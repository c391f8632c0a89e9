//! OpenAI 兼容 API 后端
//!
//! 对话通过 async_openai 的 chat 接口调用（function calling、JSON 输出），
//! 嵌入委托给 OpenAiEmbedder。可配置 base_url，兼容 DeepSeek、自建代理等。
//! 流式接口以一次完整请求模拟：按 text -> function_call -> usage 顺序产出分片。

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls,
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionTool, ChatCompletionTools,
    CompletionUsage, CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    CreateChatCompletionResponse, FunctionCall as WireFunctionCall, FunctionObject,
    ResponseFormat, ResponseFormatJsonSchema,
};
use async_openai::error::OpenAIError;
use async_openai::Client;
use async_trait::async_trait;
use futures_util::stream;
use serde_json::Value;

use super::embedding::{classify_error_message, OpenAiEmbedder};
use super::traits::{ChunkStream, LlmBackend, LlmError};
use super::types::{
    Content, ContentRole, EmbedTaskType, FunctionCall, GenerateChunk, GenerateConfig,
    GenerateResponse, Part, UsageMetadata,
};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
    model: String,
    embedder: OpenAiEmbedder,
}

impl OpenAiBackend {
    pub fn new(
        base_url: Option<&str>,
        model: &str,
        embedding_model: &str,
        api_key: Option<&str>,
        timeout_secs: u64,
    ) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key.clone())
        } else {
            OpenAIConfig::new().with_api_key(api_key.clone())
        };

        let mut client = Client::with_config(config);
        match reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
        {
            Ok(http) => client = client.with_http_client(http),
            Err(e) => tracing::warn!(error = %e, timeout_secs, "failed to build http client, request timeout not applied"),
        }

        Self {
            client,
            embedder: OpenAiEmbedder::new(base_url, embedding_model, Some(api_key.as_str())),
            model: model.to_string(),
        }
    }

    /// 替换嵌入客户端（对话与嵌入走不同服务商时使用）
    pub fn with_embedder(mut self, embedder: OpenAiEmbedder) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(
        &self,
        contents: &[Content],
        config: &GenerateConfig,
    ) -> Result<CreateChatCompletionRequest, LlmError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model)
            .messages(to_openai_messages(contents, config.system_instruction.as_deref())?);
        if let Some(t) = config.temperature {
            args.temperature(t);
        }
        if let Some(p) = config.top_p {
            args.top_p(p);
        }
        if let Some(m) = config.max_output_tokens {
            args.max_completion_tokens(m);
        }
        // top_k 无对应字段，OpenAI 兼容端点忽略
        if !config.tools.is_empty() {
            let tools: Vec<ChatCompletionTools> = config
                .tools
                .iter()
                .map(|t| {
                    ChatCompletionTools::Function(ChatCompletionTool {
                        function: FunctionObject {
                            name: t.name.clone(),
                            description: Some(t.description.clone()),
                            parameters: Some(t.parameters.clone()),
                            strict: None,
                        },
                    })
                })
                .collect();
            args.tools(tools);
        }
        if config.json_output {
            args.response_format(match &config.response_schema {
                Some(schema) => ResponseFormat::JsonSchema {
                    json_schema: ResponseFormatJsonSchema {
                        description: None,
                        name: "response".to_string(),
                        schema: Some(schema.clone()),
                        strict: None,
                    },
                },
                None => ResponseFormat::JsonObject,
            });
        }
        args.build().map_err(invalid_request)
    }

    async fn chat(
        &self,
        contents: &[Content],
        config: &GenerateConfig,
    ) -> Result<CreateChatCompletionResponse, LlmError> {
        let request = self.build_request(contents, config)?;
        self.client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_error)
    }
}

fn invalid_request(e: OpenAIError) -> LlmError {
    LlmError::InvalidRequest(e.to_string())
}

fn map_openai_error(e: OpenAIError) -> LlmError {
    match e {
        OpenAIError::InvalidArgument(msg) => LlmError::InvalidRequest(msg),
        other => classify_error_message(&other.to_string()),
    }
}

/// Content 序列 -> OpenAI messages；函数调用与其结果按出现顺序配对 tool_call_id
fn to_openai_messages(
    contents: &[Content],
    system: Option<&str>,
) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
    let mut out = Vec::with_capacity(contents.len() + 1);
    if let Some(s) = system.filter(|s| !s.is_empty()) {
        out.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(s)
                .build()
                .map_err(invalid_request)?
                .into(),
        );
    }
    let mut call_seq = 0usize;
    for content in contents {
        for part in &content.parts {
            let msg: ChatCompletionRequestMessage = match (part, &content.role) {
                (Part::Text { text }, ContentRole::User) => ChatCompletionRequestUserMessageArgs::default()
                    .content(text.as_str())
                    .build()
                    .map_err(invalid_request)?
                    .into(),
                (Part::Text { text }, _) => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(text.as_str())
                    .build()
                    .map_err(invalid_request)?
                    .into(),
                (Part::FunctionCall { call }, _) => {
                    call_seq += 1;
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .tool_calls(vec![ChatCompletionMessageToolCalls::Function(
                            ChatCompletionMessageToolCall {
                                id: format!("call_{call_seq}"),
                                function: WireFunctionCall {
                                    name: call.name.clone(),
                                    arguments: call.args.to_string(),
                                },
                            },
                        )])
                        .build()
                        .map_err(invalid_request)?
                        .into()
                }
                (Part::FunctionResponse { response, .. }, _) => ChatCompletionRequestToolMessageArgs::default()
                    .tool_call_id(format!("call_{call_seq}"))
                    .content(response.to_string())
                    .build()
                    .map_err(invalid_request)?
                    .into(),
            };
            out.push(msg);
        }
    }
    Ok(out)
}

fn usage_metadata(usage: &CompletionUsage) -> UsageMetadata {
    UsageMetadata {
        prompt_token_count: u64::from(usage.prompt_tokens),
        candidates_token_count: u64::from(usage.completion_tokens),
        total_token_count: u64::from(usage.total_tokens),
        thoughts_token_count: usage
            .completion_tokens_details
            .as_ref()
            .and_then(|d| d.reasoning_tokens)
            .map(u64::from)
            .unwrap_or(0),
    }
}

/// 完整响应 -> 流式分片
fn response_chunks(resp: &CreateChatCompletionResponse) -> Vec<GenerateChunk> {
    let mut chunks = Vec::new();
    if let Some(msg) = resp.choices.first().map(|c| &c.message) {
        if let Some(t) = msg.content.as_ref().filter(|t| !t.is_empty()) {
            chunks.push(GenerateChunk::text(t.clone()));
        }
        // 仅取第一个函数调用：循环每轮只执行一个工具
        let first_call = msg.tool_calls.iter().flatten().find_map(|tc| match tc {
            ChatCompletionMessageToolCalls::Function(call) => Some(call),
            _ => None,
        });
        if let Some(call) = first_call {
            let args = serde_json::from_str(&call.function.arguments).unwrap_or(Value::Null);
            chunks.push(GenerateChunk {
                function_call: Some(FunctionCall {
                    name: call.function.name.clone(),
                    args,
                }),
                ..Default::default()
            });
        }
    }
    if let Some(u) = &resp.usage {
        chunks.push(GenerateChunk {
            usage_metadata: Some(usage_metadata(u)),
            ..Default::default()
        });
    }
    chunks
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn generate_stream(
        &self,
        contents: &[Content],
        config: &GenerateConfig,
    ) -> Result<ChunkStream, LlmError> {
        let resp = self.chat(contents, config).await?;
        let chunks: Vec<Result<GenerateChunk, LlmError>> = response_chunks(&resp).into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn generate(
        &self,
        contents: &[Content],
        config: &GenerateConfig,
    ) -> Result<GenerateResponse, LlmError> {
        let resp = self.chat(contents, config).await?;
        Ok(GenerateResponse {
            text: resp
                .choices
                .first()
                .and_then(|c| c.message.content.clone())
                .unwrap_or_default(),
            thought: None,
            usage: resp.usage.as_ref().map(usage_metadata),
        })
    }

    async fn embed(&self, texts: &[String], _task: EmbedTaskType) -> Result<Vec<Vec<f32>>, LlmError> {
        self.embedder.embed_batch(texts).await
    }
}
