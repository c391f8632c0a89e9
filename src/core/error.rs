//! 引擎错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定回退默认智能体 / 通知用户 / 回灌模型 / 替换步骤输出 / 上抛 / 终止。

use thiserror::Error;

use crate::llm::LlmError;
use crate::storage::StorageError;

/// 路由、执行、记忆、检索过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 分类调用失败或响应无法解析；路由器内部吞掉并回退默认智能体
    #[error("Routing failed: {0}")]
    Routing(String),

    #[error("Plan parse error: {0}")]
    PlanParse(String),

    #[error("Step {step} agent not found: {agent}")]
    StepAgentNotFound { step: u32, agent: String },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Function-call loop exceeded {0} turns")]
    LoopLimitExceeded(usize),

    #[error("Novelty check failed: {0}")]
    NoveltyCheck(String),

    #[error("Summarization failed: {0}")]
    Summarization(String),

    #[error("Embedding batch {batch} failed after {attempts} attempt(s): {source}")]
    EmbeddingBatch {
        batch: usize,
        attempts: u32,
        source: LlmError,
    },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid step transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Cancelled")]
    Cancelled,
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 改用默认智能体，用户无感知
    FallbackToDefault,
    /// 终止本次运行，向用户展示一条消息
    NotifyUser(String),
    /// 以结构化错误回灌对话，让模型自行应对
    FeedBackToModel(serde_json::Value),
    /// 计划步骤以该文本作为输出，计划继续
    SubstituteStepOutput(String),
    /// 采用保守默认值（新颖性默认 true、摘要默认跳过）
    UseDefault,
    /// 向调用方上抛
    Propagate,
    Abort,
}
