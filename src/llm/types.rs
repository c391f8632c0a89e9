//! 与后端交互的内容模型：对话内容、流式分片、生成配置、Token 用量

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 对话内容的角色
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentRole {
    User,
    Model,
    /// 工具返回结果
    Function,
}

/// 模型发起的函数调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    FunctionCall { call: FunctionCall },
    FunctionResponse { name: String, response: Value },
}

/// 一条对话内容（一个角色 + 若干 part）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: ContentRole,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ContentRole::User,
            parts: vec![Part::Text { text: text.into() }],
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: ContentRole::Model,
            parts: vec![Part::Text { text: text.into() }],
        }
    }

    pub fn function_call(call: FunctionCall) -> Self {
        Self {
            role: ContentRole::Model,
            parts: vec![Part::FunctionCall { call }],
        }
    }

    pub fn function_response(name: impl Into<String>, response: Value) -> Self {
        Self {
            role: ContentRole::Function,
            parts: vec![Part::FunctionResponse {
                name: name.into(),
                response,
            }],
        }
    }

    /// 拼接所有文本 part
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Token 用量；跨轮累计时逐字段相加
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub prompt_token_count: u64,
    pub candidates_token_count: u64,
    pub total_token_count: u64,
    pub thoughts_token_count: u64,
}

impl UsageMetadata {
    pub fn add(&mut self, other: &UsageMetadata) {
        self.prompt_token_count += other.prompt_token_count;
        self.candidates_token_count += other.candidates_token_count;
        self.total_token_count += other.total_token_count;
        self.thoughts_token_count += other.thoughts_token_count;
    }
}

/// 流式响应中的一个分片，各字段均可缺省
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateChunk {
    pub text: Option<String>,
    pub thought: Option<String>,
    pub function_call: Option<FunctionCall>,
    pub grounding_metadata: Option<Value>,
    pub usage_metadata: Option<UsageMetadata>,
}

impl GenerateChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn thought(text: impl Into<String>) -> Self {
        Self {
            thought: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn call(name: impl Into<String>, args: Value) -> Self {
        Self {
            function_call: Some(FunctionCall {
                name: name.into(),
                args,
            }),
            ..Default::default()
        }
    }

    pub fn usage(prompt: u64, candidates: u64) -> Self {
        Self {
            usage_metadata: Some(UsageMetadata {
                prompt_token_count: prompt,
                candidates_token_count: candidates,
                total_token_count: prompt + candidates,
                thoughts_token_count: 0,
            }),
            ..Default::default()
        }
    }
}

/// 暴露给模型的工具声明
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 单次调用的生成配置（每次调用时从智能体当前配置构造）
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateConfig {
    pub system_instruction: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_output_tokens: Option<u32>,
    pub tools: Vec<ToolDeclaration>,
    /// 要求模型输出 JSON
    pub json_output: bool,
    pub response_schema: Option<Value>,
}

/// 非流式调用的完整响应
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerateResponse {
    pub text: String,
    pub thought: Option<String>,
    pub usage: Option<UsageMetadata>,
}

/// 嵌入任务类型：入库文档与检索查询可使用不同的编码方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbedTaskType {
    RetrievalDocument,
    RetrievalQuery,
}

static FENCE_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// 去掉模型常包裹在 JSON 外的 Markdown 代码围栏（```json ... ```）
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let re = FENCE_RE.get_or_init(|| Regex::new(r"(?s)^```[a-zA-Z0-9_-]*\s*(.*?)\s*```$").ok());
    match re.as_ref().and_then(|re| re.captures(trimmed)).and_then(|c| c.get(1)) {
        Some(m) => m.as_str(),
        None => trimmed,
    }
}

/// 解析模型返回的 JSON（容忍代码围栏）
pub fn parse_json_reply<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(strip_code_fences(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_add_sums_every_field() {
        let mut total = UsageMetadata::default();
        total.add(&UsageMetadata {
            prompt_token_count: 10,
            candidates_token_count: 5,
            total_token_count: 15,
            thoughts_token_count: 2,
        });
        total.add(&UsageMetadata {
            prompt_token_count: 20,
            candidates_token_count: 1,
            total_token_count: 21,
            thoughts_token_count: 0,
        });
        assert_eq!(total.prompt_token_count, 30);
        assert_eq!(total.candidates_token_count, 6);
        assert_eq!(total.total_token_count, 36);
        assert_eq!(total.thoughts_token_count, 2);
    }

    #[test]
    fn test_content_text_skips_non_text_parts() {
        let c = Content {
            role: ContentRole::Model,
            parts: vec![
                Part::Text { text: "a".into() },
                Part::FunctionCall {
                    call: FunctionCall {
                        name: "echo".into(),
                        args: Value::Null,
                    },
                },
                Part::Text { text: "b".into() },
            ],
        };
        assert_eq!(c.text(), "ab");
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fences("  {\"b\": 2} "), "{\"b\": 2}");
        let v: Value = parse_json_reply("```json\n{\"ok\": true}\n```").unwrap();
        assert_eq!(v["ok"], true);
    }
}
