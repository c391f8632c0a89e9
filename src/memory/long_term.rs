//! 长期记忆：按智能体分区的加权记忆条目，跨会话检索
//!
//! 每个分区存于 KvStore 的 `ltm:{agent_id}`，容量上限（默认 50）按创建时间保留最新。
//! 检索打分 = weight × 10 + 命中的查询词数（子串匹配，忽略大小写）；返回的条目会刷新 last_accessed。
//! 分区写入（插入裁剪、检索刷新、删除）由每分区一把锁串行化。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::core::AgentError;
use crate::memory::novelty::{check_novelty, NoveltyOracle};
use crate::storage::{get_json, set_json, KvStore};

const LTM_PREFIX: &str = "ltm:";

pub const DEFAULT_SELF_GENERATED_WEIGHT: f32 = 0.5;
pub const DEFAULT_FEEDBACK_WEIGHT: f32 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// 会话结束时由摘要提炼
    SelfGenerated,
    /// 用户负反馈中的纠正
    Feedback,
}

impl MemoryType {
    pub fn default_weight(self) -> f32 {
        match self {
            MemoryType::SelfGenerated => DEFAULT_SELF_GENERATED_WEIGHT,
            MemoryType::Feedback => DEFAULT_FEEDBACK_WEIGHT,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentMemoryItem {
    pub id: String,
    pub content: String,
    pub memory_type: MemoryType,
    pub weight: f32,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct ScoredMemory {
    pub item: AgentMemoryItem,
    pub score: f32,
}

pub struct LongTermMemory {
    store: Arc<dyn KvStore>,
    max_items: usize,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

fn partition_key(agent_id: &str) -> String {
    format!("{LTM_PREFIX}{agent_id}")
}

impl LongTermMemory {
    pub fn new(store: Arc<dyn KvStore>, max_items: usize) -> Self {
        Self {
            store,
            max_items: max_items.max(1),
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn partition_lock(&self, agent_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn load(&self, agent_id: &str) -> Result<Vec<AgentMemoryItem>, AgentError> {
        Ok(get_json(self.store.as_ref(), &partition_key(agent_id))
            .await?
            .unwrap_or_default())
    }

    async fn save(&self, agent_id: &str, items: &[AgentMemoryItem]) -> Result<(), AgentError> {
        set_json(self.store.as_ref(), &partition_key(agent_id), items).await?;
        Ok(())
    }

    /// 写入一条记忆；weight 缺省按类型取默认值，必须 > 0
    pub async fn add(
        &self,
        agent_id: &str,
        content: &str,
        memory_type: MemoryType,
        weight: Option<f32>,
    ) -> Result<AgentMemoryItem, AgentError> {
        let weight = weight.unwrap_or_else(|| memory_type.default_weight());
        if weight.is_nan() || weight <= 0.0 {
            return Err(AgentError::Config(format!("memory weight must be > 0, got {weight}")));
        }
        let now = Utc::now();
        let item = AgentMemoryItem {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.trim().to_string(),
            memory_type,
            weight,
            created_at: now,
            last_accessed: now,
        };

        let lock = self.partition_lock(agent_id).await;
        let _guard = lock.lock().await;
        let mut items = self.load(agent_id).await?;
        items.insert(0, item.clone());
        // 新条目在前，稳定排序保证同一时刻写入的新条目不会被裁掉
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if items.len() > self.max_items {
            let evicted = items.len() - self.max_items;
            items.truncate(self.max_items);
            tracing::debug!(agent = agent_id, evicted, "long-term memory capped");
        }
        self.save(agent_id, &items).await?;
        tracing::info!(agent = agent_id, kind = ?memory_type, "memory item stored");
        Ok(item)
    }

    /// 加权检索 top_n，并刷新命中条目的 last_accessed
    pub async fn search(&self, agent_id: &str, query: &str, top_n: usize) -> Result<Vec<ScoredMemory>, AgentError> {
        let words: Vec<String> = query.split_whitespace().map(|w| w.to_lowercase()).collect();

        let lock = self.partition_lock(agent_id).await;
        let _guard = lock.lock().await;
        let mut items = self.load(agent_id).await?;
        if items.is_empty() || top_n == 0 {
            return Ok(vec![]);
        }

        let mut scored: Vec<(usize, f32)> = items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let content = item.content.to_lowercase();
                let hits = words.iter().filter(|w| content.contains(w.as_str())).count();
                (i, item.weight * 10.0 + hits as f32)
            })
            .filter(|(_, score)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_n);

        let now = Utc::now();
        for (i, _) in &scored {
            items[*i].last_accessed = now;
        }
        let results = scored
            .iter()
            .map(|(i, score)| ScoredMemory {
                item: items[*i].clone(),
                score: *score,
            })
            .collect();
        self.save(agent_id, &items).await?;
        Ok(results)
    }

    pub async fn list(&self, agent_id: &str) -> Result<Vec<AgentMemoryItem>, AgentError> {
        self.load(agent_id).await
    }

    pub async fn delete(&self, agent_id: &str, item_id: &str) -> Result<bool, AgentError> {
        let lock = self.partition_lock(agent_id).await;
        let _guard = lock.lock().await;
        let mut items = self.load(agent_id).await?;
        let before = items.len();
        items.retain(|i| i.id != item_id);
        if items.len() == before {
            return Ok(false);
        }
        self.save(agent_id, &items).await?;
        Ok(true)
    }

    /// 清空分区，返回删除条数
    pub async fn clear(&self, agent_id: &str) -> Result<usize, AgentError> {
        let lock = self.partition_lock(agent_id).await;
        let _guard = lock.lock().await;
        let n = self.load(agent_id).await?.len();
        self.store.delete(&partition_key(agent_id)).await?;
        Ok(n)
    }

    /// 经新颖性门控后写入自生成记忆；不新颖时返回 None
    pub async fn commit_if_novel(
        &self,
        agent_id: &str,
        candidate: &str,
        oracle: &dyn NoveltyOracle,
        top_n: usize,
    ) -> Result<Option<AgentMemoryItem>, AgentError> {
        let existing: Vec<AgentMemoryItem> = self
            .search(agent_id, candidate, top_n)
            .await?
            .into_iter()
            .map(|s| s.item)
            .collect();
        let verdict = check_novelty(oracle, candidate, &existing).await;
        if !verdict.is_novel {
            tracing::info!(agent = agent_id, reason = %verdict.reason, "memory candidate not novel, skipped");
            return Ok(None);
        }
        self.add(agent_id, candidate, MemoryType::SelfGenerated, None)
            .await
            .map(Some)
    }
}

/// 格式化为项目符号列表
pub fn format_memory_bullets(items: &[ScoredMemory]) -> String {
    items
        .iter()
        .map(|m| format!("- {}", m.item.content))
        .collect::<Vec<_>>()
        .join("\n")
}
