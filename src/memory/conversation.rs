//! 短期记忆：当前会话的对话轮次
//!
//! 保留最近 capacity 条轮次（超出时丢弃最旧的），组装上下文时只取最近 k 条格式化为带标签的对话记录。

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// 轮次作者
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnAuthor {
    User,
    Agent,
}

/// 单条对话轮次，写入后不可变
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: String,
    pub author: TurnAuthor,
    pub text: String,
    pub thoughts: Option<String>,
    pub agent_name: Option<String>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            author: TurnAuthor::User,
            text: text.into(),
            thoughts: None,
            agent_name: None,
        }
    }

    pub fn agent(agent_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            author: TurnAuthor::Agent,
            text: text.into(),
            thoughts: None,
            agent_name: Some(agent_name.into()),
        }
    }

    pub fn with_thoughts(mut self, thoughts: impl Into<String>) -> Self {
        let t = thoughts.into();
        if !t.is_empty() {
            self.thoughts = Some(t);
        }
        self
    }

    /// 对话记录中的说话人标签
    pub fn label(&self) -> &str {
        match self.author {
            TurnAuthor::User => "User",
            TurnAuthor::Agent => self.agent_name.as_deref().unwrap_or("Agent"),
        }
    }
}

/// 短期记忆窗口
#[derive(Clone, Debug)]
pub struct ShortTermMemory {
    turns: VecDeque<ConversationTurn>,
    capacity: usize,
}

impl ShortTermMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.capacity {
            self.turns.pop_front();
        }
    }

    /// 最近 k 条，按时间顺序
    pub fn recent(&self, k: usize) -> Vec<ConversationTurn> {
        let skip = self.turns.len().saturating_sub(k);
        self.turns.iter().skip(skip).cloned().collect()
    }

    /// 最近 k 条格式化为 `Label: text` 的对话记录；无轮次时返回 None
    pub fn transcript(&self, k: usize) -> Option<String> {
        let recent = self.recent(k);
        if recent.is_empty() {
            return None;
        }
        Some(format_transcript(&recent))
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

pub fn format_transcript(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.label(), t.text))
        .collect::<Vec<_>>()
        .join("\n")
}
