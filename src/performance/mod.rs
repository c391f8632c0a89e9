//! 运行评分：效率 / 质量打分、运行记录持久化、用户反馈调整
//!
//! final = efficiency × quality × multiplier（正反馈 1.2、负反馈 0.5、无反馈 1.0）。
//! 反馈是已完成运行记录的唯一修改路径；带理由的负反馈同时写入该智能体的长期记忆。

use std::f32::consts::PI;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::llm::{strip_code_fences, UsageMetadata};
use crate::memory::{LongTermMemory, MemoryType};
use crate::storage::{get_json, set_json, KvStore};

const RUN_PREFIX: &str = "run:";

pub const POSITIVE_MULTIPLIER: f32 = 1.2;
pub const NEGATIVE_MULTIPLIER: f32 = 0.5;

const FAILURE_MARKERS: &[&str] = &["error", "failed", "unable to"];
const REFUSAL_PHRASES: &[&str] = &["i cannot", "i can't", "i'm sorry", "i am sorry", "i am unable", "i won't"];
const SHORT_OUTPUT_CHARS: usize = 50;
const SCORE_FLOOR: f32 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feedback {
    Positive,
    Negative,
}

impl Feedback {
    pub fn multiplier(self) -> f32 {
        match self {
            Feedback::Positive => POSITIVE_MULTIPLIER,
            Feedback::Negative => NEGATIVE_MULTIPLIER,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRun {
    pub id: String,
    pub agent_id: String,
    pub prompt: String,
    pub usage: UsageMetadata,
    pub efficiency: f32,
    pub quality: f32,
    pub feedback: Option<Feedback>,
    pub final_score: f32,
    pub created_at: DateTime<Utc>,
}

/// 效率：ratio = 提示字符数 / 总 token，atan 压缩到 (0, 1) 后钳到 [0.1, 1.0]；无 token 时为 0.5
pub fn efficiency_score(prompt_chars: usize, total_tokens: u64) -> f32 {
    if total_tokens == 0 {
        return 0.5;
    }
    let ratio = prompt_chars as f32 / total_tokens as f32;
    ((ratio - 1.0).atan() / PI + 0.5).clamp(SCORE_FLOOR, 1.0)
}

/// 质量：启发式扣分；声明 JSON 输出但无法解析时直接 0.1
pub fn quality_score(output: &str, expects_json: bool) -> f32 {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return SCORE_FLOOR;
    }
    let lower = trimmed.to_lowercase();
    let mut score = 1.0f32;
    if FAILURE_MARKERS.iter().any(|m| lower.contains(m)) {
        score *= 0.7;
    }
    if trimmed.chars().count() < SHORT_OUTPUT_CHARS && REFUSAL_PHRASES.iter().any(|p| lower.contains(p)) {
        score *= 0.4;
    }
    if expects_json && serde_json::from_str::<serde_json::Value>(strip_code_fences(trimmed)).is_err() {
        return SCORE_FLOOR;
    }
    score.max(SCORE_FLOOR)
}

/// 按智能体汇总
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AgentPerformance {
    pub agent_id: String,
    pub runs: usize,
    pub mean_final_score: f32,
    pub positive: usize,
    pub negative: usize,
    pub total_tokens: u64,
}

pub struct PerformanceTracker {
    store: Arc<dyn KvStore>,
    memory: Arc<LongTermMemory>,
}

fn run_key(id: &str) -> String {
    format!("{RUN_PREFIX}{id}")
}

impl PerformanceTracker {
    pub fn new(store: Arc<dyn KvStore>, memory: Arc<LongTermMemory>) -> Self {
        Self { store, memory }
    }

    /// 计算分数并持久化；写入完成才算“已记录”
    pub async fn record(
        &self,
        agent_id: &str,
        prompt: &str,
        usage: UsageMetadata,
        output: &str,
        expects_json: bool,
    ) -> Result<ExecutionRun, AgentError> {
        let efficiency = efficiency_score(prompt.chars().count(), usage.total_token_count);
        let quality = quality_score(output, expects_json);
        let run = ExecutionRun {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            prompt: prompt.to_string(),
            usage,
            efficiency,
            quality,
            feedback: None,
            final_score: efficiency * quality,
            created_at: Utc::now(),
        };
        set_json(self.store.as_ref(), &run_key(&run.id), &run).await?;
        tracing::info!(
            run = %run.id,
            agent = agent_id,
            efficiency,
            quality,
            total_tokens = usage.total_token_count,
            "run recorded"
        );
        Ok(run)
    }

    pub async fn get(&self, run_id: &str) -> Result<Option<ExecutionRun>, AgentError> {
        Ok(get_json(self.store.as_ref(), &run_key(run_id)).await?)
    }

    /// 反馈：重算 final 并持久化；带理由的负反馈写入长期记忆
    pub async fn apply_feedback(
        &self,
        run_id: &str,
        feedback: Feedback,
        reason: Option<&str>,
    ) -> Result<ExecutionRun, AgentError> {
        let mut run = self
            .get(run_id)
            .await?
            .ok_or_else(|| AgentError::RunNotFound(run_id.to_string()))?;
        run.feedback = Some(feedback);
        run.final_score = run.efficiency * run.quality * feedback.multiplier();
        set_json(self.store.as_ref(), &run_key(run_id), &run).await?;
        tracing::info!(run = run_id, agent = %run.agent_id, ?feedback, final_score = run.final_score, "feedback applied");

        if let (Feedback::Negative, Some(reason)) = (feedback, reason.map(str::trim).filter(|r| !r.is_empty())) {
            self.memory
                .add(
                    &run.agent_id,
                    &format!("User feedback on a previous answer: {reason}"),
                    MemoryType::Feedback,
                    None,
                )
                .await?;
        }
        Ok(run)
    }

    pub async fn runs_for_agent(&self, agent_id: &str) -> Result<Vec<ExecutionRun>, AgentError> {
        let mut runs = Vec::new();
        for key in self.store.list_keys(RUN_PREFIX).await? {
            if let Some(run) = get_json::<ExecutionRun>(self.store.as_ref(), &key).await? {
                if run.agent_id == agent_id {
                    runs.push(run);
                }
            }
        }
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(runs)
    }

    pub async fn agent_summary(&self, agent_id: &str) -> Result<AgentPerformance, AgentError> {
        let runs = self.runs_for_agent(agent_id).await?;
        let mut summary = AgentPerformance {
            agent_id: agent_id.to_string(),
            runs: runs.len(),
            ..Default::default()
        };
        if runs.is_empty() {
            return Ok(summary);
        }
        summary.mean_final_score = runs.iter().map(|r| r.final_score).sum::<f32>() / runs.len() as f32;
        summary.positive = runs.iter().filter(|r| r.feedback == Some(Feedback::Positive)).count();
        summary.negative = runs.iter().filter(|r| r.feedback == Some(Feedback::Negative)).count();
        summary.total_tokens = runs.iter().map(|r| r.usage.total_token_count).sum();
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryKv;

    fn tracker() -> (PerformanceTracker, Arc<LongTermMemory>) {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());
        let memory = Arc::new(LongTermMemory::new(store.clone(), 50));
        (PerformanceTracker::new(store, memory.clone()), memory)
    }

    fn usage(total: u64) -> UsageMetadata {
        UsageMetadata {
            prompt_token_count: total / 2,
            candidates_token_count: total - total / 2,
            total_token_count: total,
            thoughts_token_count: 0,
        }
    }

    #[test]
    fn test_efficiency_bounds() {
        assert_eq!(efficiency_score(100, 0), 0.5);
        assert!((efficiency_score(100, 100) - 0.5).abs() < 1e-6);
        for (l, t) in [(1usize, 100_000u64), (100_000, 1), (0, 5), (50, 49), (3, 7)] {
            let s = efficiency_score(l, t);
            assert!((0.1..=1.0).contains(&s), "{l}/{t} -> {s}");
        }
        // ratio -> 0 时趋近 atan(-1)/π + 0.5 = 0.25
        assert!((efficiency_score(1, 100_000) - 0.25).abs() < 1e-3);
        assert!(efficiency_score(100_000, 1) > 0.99);
    }

    #[test]
    fn test_quality_empty_is_floor() {
        assert_eq!(quality_score("", false), 0.1);
        assert_eq!(quality_score("   ", true), 0.1);
    }

    #[test]
    fn test_quality_penalties() {
        assert_eq!(quality_score("All good, here is the answer you asked for.", false), 1.0);
        assert!((quality_score("The build failed with a linker problem", false) - 0.7).abs() < 1e-6);
        assert!((quality_score("I'm sorry, I cannot help.", false) - 0.4).abs() < 1e-6);
        // 两项扣分叠加
        assert!((quality_score("Sorry, I am unable to do that.", false) - 0.28).abs() < 1e-6);
    }

    #[test]
    fn test_quality_invalid_json_is_floor() {
        assert_eq!(quality_score("not json at all, but long and polite enough to pass", true), 0.1);
        assert_eq!(quality_score("```json\n{\"ok\": true}\n```", true), 1.0);
    }

    #[tokio::test]
    async fn test_record_and_positive_feedback() {
        let (t, _) = tracker();
        let run = t.record("chat", "hello there", usage(20), "Hi! How can I help?", false).await.unwrap();
        assert!((run.final_score - run.efficiency * run.quality).abs() < 1e-6);
        let updated = t.apply_feedback(&run.id, Feedback::Positive, None).await.unwrap();
        assert!((updated.final_score - run.efficiency * run.quality * 1.2).abs() < 1e-6);
        assert_eq!(t.get(&run.id).await.unwrap().unwrap().feedback, Some(Feedback::Positive));
    }

    #[tokio::test]
    async fn test_negative_feedback_with_reason_creates_memory() {
        let (t, memory) = tracker();
        let run = t.record("code_search", "find main", usage(40), "It is in src/main.rs", false).await.unwrap();
        let updated = t
            .apply_feedback(&run.id, Feedback::Negative, Some("wrong language used"))
            .await
            .unwrap();
        assert!((updated.final_score - run.efficiency * run.quality * 0.5).abs() < 1e-6);
        let items = memory.list("code_search").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].memory_type, MemoryType::Feedback);
        assert_eq!(items[0].weight, 1.0);
        assert!(items[0].content.contains("wrong language used"));
    }

    #[tokio::test]
    async fn test_negative_feedback_without_reason_no_memory() {
        let (t, memory) = tracker();
        let run = t.record("chat", "x", usage(10), "y", false).await.unwrap();
        t.apply_feedback(&run.id, Feedback::Negative, Some("  ")).await.unwrap();
        assert!(memory.list("chat").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let (t, _) = tracker();
        assert!(matches!(
            t.apply_feedback("nope", Feedback::Positive, None).await,
            Err(AgentError::RunNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_agent_summary() {
        let (t, _) = tracker();
        let a = t.record("chat", "a", usage(10), "answer one", false).await.unwrap();
        t.record("chat", "b", usage(10), "answer two", false).await.unwrap();
        t.record("planner", "c", usage(10), "{}", true).await.unwrap();
        t.apply_feedback(&a.id, Feedback::Positive, None).await.unwrap();
        let s = t.agent_summary("chat").await.unwrap();
        assert_eq!(s.runs, 2);
        assert_eq!(s.positive, 1);
        assert_eq!(s.negative, 0);
        assert_eq!(s.total_tokens, 20);
    }
}
