//! 执行监督者：一次用户请求的完整生命周期
//!
//! 路由（或强制指定）-> 分层上下文组装 -> 单智能体函数调用循环 / 多步计划 -> 评分落盘 -> Done。
//! 每次运行由单个生产者任务写事件通道，保证事件顺序；接收端丢弃或取消令牌触发后，
//! 生产者在下一次后端调用前停止，且只有最终评分写入完成的运行才算已记录。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agents::{AgentDescriptor, AgentPool};
use crate::core::{AgentError, AgentRouter, RecoveryAction, RecoveryEngine};
use crate::llm::{Content, LlmBackend};
use crate::memory::{
    AgentMemoryItem, ConversationTurn, LongTermMemory, NoveltyOracle, Retriever, ShortTermMemory, Summarizer,
};
use crate::performance::{ExecutionRun, Feedback, PerformanceTracker};
use crate::react::context::{ContextAssembler, RetryContext, NO_CONTEXT_FOUND};
use crate::react::events::{EventSink, SupervisorEvent};
use crate::react::loop_::{LoopSession, DEFAULT_MAX_TURNS};
use crate::react::planner::PlanRunner;
use crate::tools::{ContextBundle, ToolContext, ToolExecutor, UiHooks};

/// 监督者参数（来自 `[supervisor]` 与 `[memory]` 配置段）
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub max_function_turns: usize,
    pub short_term_window: usize,
    pub long_term_top_n: usize,
    pub rag_top_k: usize,
    /// 会话摘要取最近多少轮
    pub summary_turns: usize,
    /// 摘要短于此字符数则丢弃
    pub min_fact_chars: usize,
    pub novelty_top_n: usize,
    pub event_buffer: usize,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            max_function_turns: DEFAULT_MAX_TURNS,
            short_term_window: 5,
            long_term_top_n: 5,
            rag_top_k: 5,
            summary_turns: 10,
            min_fact_chars: 12,
            novelty_top_n: 5,
            event_buffer: 32,
        }
    }
}

/// 一次运行请求
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub prompt: String,
    pub bundle: ContextBundle,
    /// 跳过路由，直接使用该智能体（id 或名称）
    pub force_agent: Option<String>,
    pub retry: Option<RetryContext>,
    /// 预先构造的对话内容，放在本次用户请求之前
    pub contents: Vec<Content>,
}

impl RunRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.force_agent = Some(agent.into());
        self
    }

    pub fn with_retry(mut self, original_prompt: impl Into<String>, feedback: impl Into<String>) -> Self {
        self.retry = Some(RetryContext {
            original_prompt: original_prompt.into(),
            feedback: feedback.into(),
        });
        self
    }

    pub fn with_bundle(mut self, bundle: ContextBundle) -> Self {
        self.bundle = bundle;
        self
    }

    pub fn with_contents(mut self, contents: Vec<Content>) -> Self {
        self.contents = contents;
        self
    }
}

/// 运行句柄：路由结果 + 按序拉取的事件流。丢弃句柄即取消运行
pub struct RunHandle {
    pub agent: AgentDescriptor,
    pub reasoning: String,
    events: mpsc::Receiver<SupervisorEvent>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RunHandle {
    pub async fn next(&mut self) -> Option<SupervisorEvent> {
        self.events.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 取完所有事件直到生产者结束
    pub async fn collect(mut self) -> Vec<SupervisorEvent> {
        let mut out = Vec::new();
        while let Some(ev) = self.next().await {
            out.push(ev);
        }
        out
    }

    /// 取消并等待生产者退出
    pub async fn cancel_and_wait(mut self) {
        self.cancel.cancel();
        self.events.close();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "run task ended abnormally");
            }
        }
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Clone)]
pub struct Supervisor {
    pub(crate) backend: Arc<dyn LlmBackend>,
    pub(crate) pool: Arc<AgentPool>,
    pub(crate) router: Arc<AgentRouter>,
    pub(crate) executor: Arc<ToolExecutor>,
    pub(crate) retriever: Arc<Retriever>,
    pub(crate) long_term: Arc<LongTermMemory>,
    pub(crate) short_term: Arc<Mutex<ShortTermMemory>>,
    pub(crate) tracker: Arc<PerformanceTracker>,
    pub(crate) novelty: Arc<dyn NoveltyOracle>,
    pub(crate) summarizer: Arc<dyn Summarizer>,
    pub(crate) ui: Arc<dyn UiHooks>,
    pub(crate) credentials: HashMap<String, String>,
    pub(crate) settings: SupervisorSettings,
}

impl Supervisor {
    pub fn pool(&self) -> &Arc<AgentPool> {
        &self.pool
    }

    pub fn retriever(&self) -> &Arc<Retriever> {
        &self.retriever
    }

    pub fn tracker(&self) -> &Arc<PerformanceTracker> {
        &self.tracker
    }

    pub fn long_term(&self) -> &Arc<LongTermMemory> {
        &self.long_term
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub async fn recent_turns(&self, k: usize) -> Vec<ConversationTurn> {
        self.short_term.lock().await.recent(k)
    }

    /// 选定智能体并启动生产者任务；路由本身不会失败，强制指定的智能体不存在时返回 AgentNotFound
    pub async fn run(&self, req: RunRequest) -> Result<RunHandle, AgentError> {
        let (agent, reasoning) = match &req.force_agent {
            Some(name) => {
                let agent = self
                    .pool
                    .resolve(name)
                    .await
                    .ok_or_else(|| AgentError::AgentNotFound(name.clone()))?;
                (agent, "Agent selected by caller.".to_string())
            }
            None => {
                let d = self.router.select_agent(&req.prompt).await?;
                (d.agent, d.reasoning)
            }
        };
        tracing::info!(agent = %agent.id, planner = agent.is_planner(), "run started");

        let (tx, rx) = mpsc::channel(self.settings.event_buffer.max(1));
        let cancel = CancellationToken::new();
        let sink = EventSink::new(tx, cancel.clone());
        let this = self.clone();
        let task_agent = agent.clone();
        let task_reasoning = reasoning.clone();
        let task = tokio::spawn(async move {
            let recovery = RecoveryEngine::new();
            if let Err(e) = this.drive(&req, &task_agent, task_reasoning, &sink, &recovery).await {
                this.finish_with_error(e, &sink, &recovery).await;
            }
        });

        Ok(RunHandle {
            agent,
            reasoning,
            events: rx,
            cancel,
            task: Some(task),
        })
    }

    async fn drive(
        &self,
        req: &RunRequest,
        agent: &AgentDescriptor,
        reasoning: String,
        sink: &EventSink,
        recovery: &RecoveryEngine,
    ) -> Result<(), AgentError> {
        sink.emit(SupervisorEvent::Routed {
            agent_id: agent.id.clone(),
            agent_name: agent.name.clone(),
            reasoning,
        })
        .await?;

        let short = self.short_term.lock().await.clone();
        let assembler = ContextAssembler {
            short_term: &short,
            long_term: &self.long_term,
            retriever: &self.retriever,
            short_term_window: self.settings.short_term_window,
            long_term_top_n: self.settings.long_term_top_n,
            rag_top_k: self.settings.rag_top_k,
        };
        let ctx = assembler.assemble(agent, &req.prompt, req.retry.as_ref()).await?;
        if ctx.retrieval_empty {
            sink.emit(SupervisorEvent::Thought {
                text: NO_CONTEXT_FOUND.to_string(),
            })
            .await?;
        }
        // 用户轮次与智能体轮次在运行成功后成对写入窗口
        let user_turn = ConversationTurn::user(req.prompt.as_str());

        let mut contents = req.contents.clone();
        contents.push(Content::user(ctx.prompt));

        let tool_ctx = ToolContext::new(self.ui.clone())
            .with_credentials(self.credentials.clone())
            .with_bundle(req.bundle.clone());
        let session = LoopSession {
            backend: self.backend.as_ref(),
            pool: &self.pool,
            executor: &self.executor,
            recovery,
            tool_ctx: &tool_ctx,
            sink,
            max_turns: self.settings.max_function_turns,
        };

        let (text, thoughts) = if agent.is_planner() {
            let runner = PlanRunner {
                session: &session,
                tracker: &self.tracker,
            };
            let outcome = runner.run(agent, contents, &req.prompt).await?;
            (outcome.execution_context, String::new())
        } else {
            let outcome = session.run(&agent.id, contents).await?;
            // 效率按原始提示计算，不含上下文层与工具回灌
            let run = self
                .tracker
                .record(&agent.id, &req.prompt, outcome.usage, &outcome.text, agent.expects_json())
                .await?;
            sink.emit(SupervisorEvent::RunRecorded { run }).await?;
            (outcome.text, outcome.thoughts)
        };

        let mut turn = ConversationTurn::agent(agent.name.as_str(), text);
        if !thoughts.is_empty() {
            turn = turn.with_thoughts(thoughts);
        }
        {
            let mut short_term = self.short_term.lock().await;
            short_term.push(user_turn);
            short_term.push(turn);
        }
        sink.emit(SupervisorEvent::Done).await?;
        tracing::info!(agent = %agent.id, "run finished");
        Ok(())
    }

    async fn finish_with_error(&self, err: AgentError, sink: &EventSink, recovery: &RecoveryEngine) {
        let message = match recovery.handle(&err) {
            RecoveryAction::Abort => {
                tracing::info!("run cancelled by caller");
                return;
            }
            RecoveryAction::NotifyUser(msg) => {
                tracing::warn!(error = %err, "run aborted");
                msg
            }
            _ => {
                tracing::error!(error = %err, "run failed");
                err.to_string()
            }
        };
        if sink.emit(SupervisorEvent::Error { message }).await.is_ok() {
            let _ = sink.emit(SupervisorEvent::Done).await;
        }
    }

    /// 用户反馈：重算分数；带理由的负反馈写入该智能体的长期记忆
    pub async fn submit_feedback(
        &self,
        run_id: &str,
        feedback: Feedback,
        reason: Option<&str>,
    ) -> Result<ExecutionRun, AgentError> {
        self.tracker.apply_feedback(run_id, feedback, reason).await
    }

    /// 会话结束：摘要最近若干轮 -> 新颖性门控 -> 写入长期记忆；随后清空短期窗口
    pub async fn end_session(&self, agent: &str) -> Result<Option<AgentMemoryItem>, AgentError> {
        let agent = self
            .pool
            .resolve(agent)
            .await
            .ok_or_else(|| AgentError::AgentNotFound(agent.to_string()))?;
        let turns = {
            let mut short = self.short_term.lock().await;
            let turns = short.recent(self.settings.summary_turns);
            short.clear();
            turns
        };
        if turns.is_empty() {
            return Ok(None);
        }

        let fact = match self.summarizer.summarize(&turns).await {
            Ok(f) => f,
            Err(e) => {
                let action = RecoveryEngine::new().handle(&e);
                tracing::warn!(error = %e, ?action, "session summary failed, skipping commit");
                None
            }
        };
        let Some(fact) = fact
            .map(|f| f.trim().to_string())
            .filter(|f| f.chars().count() >= self.settings.min_fact_chars)
        else {
            tracing::debug!(agent = %agent.id, "no fact worth remembering");
            return Ok(None);
        };
        self.long_term
            .commit_if_novel(&agent.id, &fact, self.novelty.as_ref(), self.settings.novelty_top_n)
            .await
    }
}
