//! 多步计划：解析与顺序执行
//!
//! 计划智能体一次性输出 `{plan: [{step, agent, task}]}`（思考透传，内容整体缓冲后再解析）。
//! 各步骤严格顺序执行：pending -> in_progress -> completed，每次状态变化发送完整计划快照。
//! 步骤智能体缺失时以错误文本作为该步输出并继续；前序步骤输出累加进后续步骤的提示。

use std::fmt;

use futures_util::StreamExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::agents::AgentDescriptor;
use crate::core::{AgentError, RecoveryAction};
use crate::llm::{parse_json_reply, Content, UsageMetadata};
use crate::performance::PerformanceTracker;
use crate::react::events::SupervisorEvent;
use crate::react::loop_::{generate_config, LoopSession};
use crate::tools::schema_value;

/// 计划文档（同时用于生成计划智能体的响应 schema）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanDocument {
    pub plan: Vec<PlanStepSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanStepSpec {
    /// 步骤序号，从 1 开始
    #[serde(default)]
    pub step: u32,
    /// 执行该步骤的智能体名称
    pub agent: String,
    /// 自包含的任务描述
    pub task: String,
}

pub fn plan_schema() -> serde_json::Value {
    schema_value::<PlanDocument>()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub step: u32,
    pub agent: String,
    pub task: String,
    pub status: StepStatus,
    pub output: Option<String>,
    pub usage: Option<UsageMetadata>,
}

impl WorkflowStep {
    fn from_spec(spec: PlanStepSpec) -> Self {
        Self {
            step: spec.step,
            agent: spec.agent,
            task: spec.task,
            status: StepStatus::Pending,
            output: None,
            usage: None,
        }
    }

    /// 状态只能前进一格：pending -> in_progress -> completed
    pub fn advance(&mut self, to: StepStatus) -> Result<(), AgentError> {
        let ok = matches!(
            (self.status, to),
            (StepStatus::Pending, StepStatus::InProgress) | (StepStatus::InProgress, StepStatus::Completed)
        );
        if !ok {
            return Err(AgentError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }
}

/// 解析计划文本（容忍代码围栏）；空计划视为解析失败。缺省序号按位置补齐
pub fn parse_plan(text: &str) -> Result<Vec<WorkflowStep>, AgentError> {
    let doc: PlanDocument = parse_json_reply(text).map_err(|e| AgentError::PlanParse(e.to_string()))?;
    if doc.plan.is_empty() {
        return Err(AgentError::PlanParse("plan has no steps".into()));
    }
    Ok(doc
        .plan
        .into_iter()
        .enumerate()
        .map(|(i, mut spec)| {
            if spec.step == 0 {
                spec.step = i as u32 + 1;
            }
            WorkflowStep::from_spec(spec)
        })
        .collect())
}

/// 单步提示：原始请求 + 所有前序步骤输出 + 本步任务
pub fn step_prompt(original: &str, execution_context: &str, step: &WorkflowStep) -> String {
    let mut out = format!("You are executing one step of a larger plan.\n\nOriginal request:\n{original}\n\n");
    if !execution_context.is_empty() {
        out.push_str("Results from previous steps:\n");
        out.push_str(execution_context);
        out.push_str("\n\n");
    }
    out.push_str(&format!("Your task (step {}):\n{}", step.step, step.task));
    out
}

/// 计划执行结果
#[derive(Debug, Clone, Default)]
pub struct PlanOutcome {
    pub steps: Vec<WorkflowStep>,
    /// 所有已执行步骤的输出（按顺序拼接）
    pub execution_context: String,
    pub usage: UsageMetadata,
}

pub struct PlanRunner<'a> {
    pub session: &'a LoopSession<'a>,
    pub tracker: &'a PerformanceTracker,
}

impl PlanRunner<'_> {
    /// 生成并执行计划；解析失败返回 PlanParse，交由调用方通知用户
    pub async fn run(
        &self,
        planner: &AgentDescriptor,
        contents: Vec<Content>,
        original_prompt: &str,
    ) -> Result<PlanOutcome, AgentError> {
        let mut outcome = PlanOutcome::default();
        let raw = self.generate_plan(planner, &contents, &mut outcome.usage).await?;
        let run = self
            .tracker
            .record(&planner.id, original_prompt, outcome.usage, &raw, true)
            .await?;
        self.session.sink.emit(SupervisorEvent::RunRecorded { run }).await?;

        outcome.steps = parse_plan(&raw)?;
        tracing::info!(steps = outcome.steps.len(), "plan parsed");
        self.snapshot(&outcome.steps).await?;

        for i in 0..outcome.steps.len() {
            outcome.steps[i].advance(StepStatus::InProgress)?;
            self.snapshot(&outcome.steps).await?;

            let step = outcome.steps[i].clone();
            match self.session.pool.resolve(&step.agent).await {
                None => {
                    let err = AgentError::StepAgentNotFound {
                        step: step.step,
                        agent: step.agent.clone(),
                    };
                    let text = match self.session.recovery.handle(&err) {
                        RecoveryAction::SubstituteStepOutput(text) => text,
                        _ => err.to_string(),
                    };
                    tracing::warn!(step = step.step, agent = %step.agent, "plan step agent not found");
                    outcome.steps[i].output = Some(text);
                }
                Some(agent) => {
                    let prompt = step_prompt(original_prompt, &outcome.execution_context, &step);
                    let result = self.session.run(&agent.id, vec![Content::user(prompt.as_str())]).await?;
                    let run = self
                        .tracker
                        .record(&agent.id, &prompt, result.usage, &result.text, agent.expects_json())
                        .await?;
                    self.session.sink.emit(SupervisorEvent::RunRecorded { run }).await?;

                    if !outcome.execution_context.is_empty() {
                        outcome.execution_context.push_str("\n\n");
                    }
                    outcome
                        .execution_context
                        .push_str(&format!("### Step {} ({}) output:\n{}", step.step, agent.name, result.text));
                    outcome.usage.add(&result.usage);
                    outcome.steps[i].output = Some(result.text);
                    outcome.steps[i].usage = Some(result.usage);
                }
            }

            outcome.steps[i].advance(StepStatus::Completed)?;
            self.snapshot(&outcome.steps).await?;
        }
        Ok(outcome)
    }

    /// 流式调用计划智能体：思考透传，内容整体缓冲
    async fn generate_plan(
        &self,
        planner: &AgentDescriptor,
        contents: &[Content],
        usage: &mut UsageMetadata,
    ) -> Result<String, AgentError> {
        let session = self.session;
        let mut config = generate_config(planner, session.executor.registry());
        config.tools.clear();
        config.json_output = true;
        if config.response_schema.is_none() {
            config.response_schema = Some(plan_schema());
        }

        session.sink.check()?;
        let mut stream = session.backend.generate_stream(contents, &config).await?;
        let mut buffer = String::new();
        let mut turn_usage = None;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if let Some(thought) = chunk.thought {
                session.sink.emit(SupervisorEvent::Thought { text: thought }).await?;
            }
            if let Some(text) = chunk.text {
                buffer.push_str(&text);
            }
            if let Some(u) = chunk.usage_metadata {
                turn_usage = Some(u);
            }
        }
        if let Some(u) = turn_usage {
            usage.add(&u);
            session
                .sink
                .emit(SupervisorEvent::Usage {
                    turn: u,
                    cumulative: *usage,
                })
                .await?;
        }
        Ok(buffer)
    }

    async fn snapshot(&self, steps: &[WorkflowStep]) -> Result<(), AgentError> {
        self.session
            .sink
            .emit(SupervisorEvent::PlanUpdate { steps: steps.to_vec() })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plan_with_fences() {
        let steps = parse_plan(
            "```json\n{\"plan\": [{\"step\": 1, \"agent\": \"Code Search\", \"task\": \"find main\"}, \
             {\"agent\": \"General Assistant\", \"task\": \"summarize\"}]}\n```",
        )
        .unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].step, 2);
        assert!(steps.iter().all(|s| s.status == StepStatus::Pending));
    }

    #[test]
    fn test_parse_plan_rejects_garbage_and_empty() {
        assert!(matches!(parse_plan("{\"plan\": [{\"step\": 1"), Err(AgentError::PlanParse(_))));
        assert!(matches!(parse_plan("{\"plan\": []}"), Err(AgentError::PlanParse(_))));
        assert!(matches!(parse_plan("Sure, here is a plan"), Err(AgentError::PlanParse(_))));
    }

    #[test]
    fn test_status_only_moves_forward() {
        let mut step = WorkflowStep::from_spec(PlanStepSpec {
            step: 1,
            agent: "a".into(),
            task: "t".into(),
        });
        assert!(step.advance(StepStatus::Completed).is_err());
        step.advance(StepStatus::InProgress).unwrap();
        assert!(step.advance(StepStatus::InProgress).is_err());
        step.advance(StepStatus::Completed).unwrap();
        assert!(matches!(
            step.advance(StepStatus::Pending),
            Err(AgentError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_step_prompt_includes_prior_outputs() {
        let step = WorkflowStep::from_spec(PlanStepSpec {
            step: 2,
            agent: "a".into(),
            task: "summarize the findings".into(),
        });
        let p = step_prompt("original", "### Step 1 (A) output:\nfound it", &step);
        assert!(p.contains("found it"));
        assert!(p.ends_with("Your task (step 2):\nsummarize the findings"));
        let first = step_prompt("original", "", &step);
        assert!(!first.contains("Results from previous steps"));
    }

    #[test]
    fn test_plan_schema_lists_fields() {
        let schema = plan_schema();
        assert!(schema["properties"]["plan"].is_object());
    }
}
