//! 单智能体函数调用循环
//!
//! Running -> (函数调用) ToolPending -> 执行工具、回灌结果 -> Running ... -> Done
//! 达到轮数上限仍在调用工具则进入 LoopLimitHit，以 LoopLimitExceeded 结束本次运行（不自动重试）。
//! 每轮开始时重新读取智能体当前配置；用量跨轮逐字段累加。

use futures_util::StreamExt;

use crate::agents::{AgentDescriptor, AgentPool};
use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::llm::{Content, FunctionCall, GenerateConfig, LlmBackend, UsageMetadata};
use crate::react::events::{EventSink, SupervisorEvent};
use crate::tools::{ToolContext, ToolExecutor, ToolRegistry};

/// 单次运行内的最大模型轮数，防止死循环
pub const DEFAULT_MAX_TURNS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    ToolPending,
    Done,
    LoopLimitHit,
}

/// 循环正常结束（Done）时的结果
#[derive(Debug, Clone, Default)]
pub struct LoopOutcome {
    /// 所有轮次的内容输出拼接
    pub text: String,
    pub thoughts: String,
    pub usage: UsageMetadata,
    pub turns: usize,
}

/// 由智能体当前配置构造本轮生成配置
pub fn generate_config(agent: &AgentDescriptor, registry: &ToolRegistry) -> GenerateConfig {
    let g = &agent.generation;
    GenerateConfig {
        system_instruction: (!g.system_prompt.is_empty()).then(|| g.system_prompt.clone()),
        temperature: g.temperature,
        top_p: g.top_p,
        top_k: g.top_k,
        max_output_tokens: g.max_output_tokens,
        tools: registry.declarations(&g.enabled_tools),
        json_output: g.json_response,
        response_schema: g.response_schema.clone(),
    }
}

/// 一轮流式响应的汇总
#[derive(Default)]
struct TurnOutput {
    text: String,
    usage: Option<UsageMetadata>,
    /// 本轮最后一个事件为函数调用时才保留
    call: Option<FunctionCall>,
}

/// 循环所需的协作者
pub struct LoopSession<'a> {
    pub backend: &'a dyn LlmBackend,
    pub pool: &'a AgentPool,
    pub executor: &'a ToolExecutor,
    pub recovery: &'a RecoveryEngine,
    pub tool_ctx: &'a ToolContext,
    pub sink: &'a EventSink,
    pub max_turns: usize,
}

impl LoopSession<'_> {
    /// 驱动循环直到 Done；contents 为已组装好的对话（最后一条是用户请求）
    pub async fn run(&self, agent_id: &str, mut contents: Vec<Content>) -> Result<LoopOutcome, AgentError> {
        let mut outcome = LoopOutcome::default();
        let mut state = LoopState::Running;

        while state == LoopState::Running {
            outcome.turns += 1;
            let agent = self
                .pool
                .get(agent_id)
                .await
                .ok_or_else(|| AgentError::AgentNotFound(agent_id.to_string()))?;
            let config = generate_config(&agent, self.executor.registry());

            let turn = self.stream_turn(&contents, &config, &mut outcome).await?;
            if let Some(u) = turn.usage {
                outcome.usage.add(&u);
                self.sink
                    .emit(SupervisorEvent::Usage {
                        turn: u,
                        cumulative: outcome.usage,
                    })
                    .await?;
            }
            outcome.text.push_str(&turn.text);

            let Some(call) = turn.call else {
                state = LoopState::Done;
                break;
            };
            if outcome.turns >= self.max_turns {
                state = LoopState::LoopLimitHit;
                break;
            }
            state = LoopState::ToolPending;
            tracing::debug!(agent = agent_id, tool = %call.name, turn = outcome.turns, "function call");

            self.sink
                .emit(SupervisorEvent::ToolCall {
                    tool: call.name.clone(),
                    args: call.args.clone(),
                })
                .await?;
            let result = match self.executor.execute(&call.name, call.args.clone(), self.tool_ctx).await {
                Ok(v) => v,
                Err(e) => match self.recovery.handle(&e) {
                    RecoveryAction::FeedBackToModel(v) => {
                        tracing::warn!(tool = %call.name, error = %e, "tool failed, feeding error back");
                        v
                    }
                    _ => return Err(e),
                },
            };
            self.sink
                .emit(SupervisorEvent::ToolResult {
                    tool: call.name.clone(),
                    result: result.clone(),
                })
                .await?;

            if !turn.text.is_empty() {
                contents.push(Content::model(turn.text));
            }
            let name = call.name.clone();
            contents.push(Content::function_call(call));
            contents.push(Content::function_response(name, result));
            state = LoopState::Running;
        }

        match state {
            LoopState::LoopLimitHit => {
                tracing::warn!(agent = agent_id, turns = outcome.turns, "function-call loop limit hit");
                Err(AgentError::LoopLimitExceeded(self.max_turns))
            }
            _ => Ok(outcome),
        }
    }

    async fn stream_turn(
        &self,
        contents: &[Content],
        config: &GenerateConfig,
        outcome: &mut LoopOutcome,
    ) -> Result<TurnOutput, AgentError> {
        self.sink.check()?;
        let mut stream = self.backend.generate_stream(contents, config).await?;
        let mut turn = TurnOutput::default();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if let Some(thought) = chunk.thought {
                outcome.thoughts.push_str(&thought);
                self.sink.emit(SupervisorEvent::Thought { text: thought }).await?;
            }
            if let Some(text) = chunk.text {
                if !text.is_empty() {
                    turn.call = None;
                    turn.text.push_str(&text);
                    self.sink.emit(SupervisorEvent::Content { text }).await?;
                }
            }
            if let Some(grounding) = chunk.grounding_metadata {
                self.sink.emit(SupervisorEvent::Metadata { grounding }).await?;
            }
            if let Some(call) = chunk.function_call {
                turn.call = Some(call);
            }
            if let Some(u) = chunk.usage_metadata {
                turn.usage = Some(u);
            }
        }
        Ok(turn)
    }
}
