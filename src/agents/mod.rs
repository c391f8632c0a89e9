//! 智能体池：描述符、生成配置、能力标记
//!
//! 生成参数可在运行时修改（设置面板或 update_agent_settings 工具），
//! 调用方必须在每次调用时重新读取，不得缓存描述符。加载时做一次校验。

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::core::AgentError;

/// 能力标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// 接受检索增强上下文（RAG）
    AcceptsContext,
    /// 生成多步计划，不调用工具
    Planner,
}

/// 每个智能体的生成配置；可选字段缺省时交给后端默认值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub system_prompt: String,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_output_tokens: Option<u32>,
    pub enabled_tools: Vec<String>,
    /// 声明结构化（JSON）输出契约
    pub json_response: bool,
    pub response_schema: Option<Value>,
}

impl GenerationConfig {
    fn validate(&self, id: &str) -> Result<(), AgentError> {
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(AgentError::Config(format!("agent {id}: temperature {t} out of [0, 2]")));
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(AgentError::Config(format!("agent {id}: top_p {p} out of [0, 1]")));
            }
        }
        if self.max_output_tokens == Some(0) {
            return Err(AgentError::Config(format!("agent {id}: max_output_tokens must be > 0")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
}

impl AgentDescriptor {
    pub fn new(id: &str, name: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            generation: GenerationConfig::default(),
            capabilities: BTreeSet::new(),
        }
    }

    pub fn with_capability(mut self, cap: Capability) -> Self {
        self.capabilities.insert(cap);
        self
    }

    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn accepts_context(&self) -> bool {
        self.capabilities.contains(&Capability::AcceptsContext)
    }

    pub fn is_planner(&self) -> bool {
        self.capabilities.contains(&Capability::Planner)
    }

    pub fn expects_json(&self) -> bool {
        self.generation.json_response || self.generation.response_schema.is_some()
    }

    /// 名称或 id 匹配（忽略大小写与首尾空白）
    pub fn matches(&self, name_or_id: &str) -> bool {
        let needle = name_or_id.trim();
        self.id.eq_ignore_ascii_case(needle) || self.name.eq_ignore_ascii_case(needle)
    }
}

/// 运行时设置更新：只覆盖给出的字段
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationPatch {
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_output_tokens: Option<u32>,
    pub enabled_tools: Option<Vec<String>>,
}

impl GenerationPatch {
    fn apply(&self, cfg: &mut GenerationConfig) {
        if let Some(p) = &self.system_prompt {
            cfg.system_prompt = p.clone();
        }
        if let Some(t) = self.temperature {
            cfg.temperature = Some(t);
        }
        if let Some(p) = self.top_p {
            cfg.top_p = Some(p);
        }
        if let Some(k) = self.top_k {
            cfg.top_k = Some(k);
        }
        if let Some(m) = self.max_output_tokens {
            cfg.max_output_tokens = Some(m);
        }
        if let Some(tools) = &self.enabled_tools {
            cfg.enabled_tools = tools.clone();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.system_prompt.is_none()
            && self.temperature.is_none()
            && self.top_p.is_none()
            && self.top_k.is_none()
            && self.max_output_tokens.is_none()
            && self.enabled_tools.is_none()
    }
}

/// 智能体池
pub struct AgentPool {
    agents: RwLock<Vec<AgentDescriptor>>,
    default_id: String,
    planner_id: Option<String>,
}

impl AgentPool {
    /// 校验并创建：id 唯一、名称非空、默认/计划智能体存在、计划智能体不启用工具
    pub fn new(
        agents: Vec<AgentDescriptor>,
        default_id: &str,
        planner_id: Option<&str>,
    ) -> Result<Self, AgentError> {
        if agents.is_empty() {
            return Err(AgentError::Config("agent pool is empty".into()));
        }
        let mut seen = HashSet::new();
        for a in &agents {
            if a.id.trim().is_empty() || a.name.trim().is_empty() {
                return Err(AgentError::Config(format!("agent '{}' has empty id or name", a.id)));
            }
            if !seen.insert(a.id.to_lowercase()) {
                return Err(AgentError::Config(format!("duplicate agent id: {}", a.id)));
            }
            a.generation.validate(&a.id)?;
        }
        if !agents.iter().any(|a| a.id == default_id) {
            return Err(AgentError::Config(format!("default agent '{default_id}' not in pool")));
        }
        if let Some(pid) = planner_id {
            let planner = agents
                .iter()
                .find(|a| a.id == pid)
                .ok_or_else(|| AgentError::Config(format!("planner agent '{pid}' not in pool")))?;
            if !planner.is_planner() {
                return Err(AgentError::Config(format!("agent '{pid}' lacks the planner capability")));
            }
            if !planner.generation.enabled_tools.is_empty() {
                return Err(AgentError::Config(format!("planner agent '{pid}' must not enable tools")));
            }
        }
        Ok(Self {
            agents: RwLock::new(agents),
            default_id: default_id.to_string(),
            planner_id: planner_id.map(String::from),
        })
    }

    /// 内置池：通用对话 / 代码检索 / 计划
    pub fn builtin() -> Result<Self, AgentError> {
        Self::new(builtin_agents(), "chat", Some("planner"))
    }

    pub fn default_id(&self) -> &str {
        &self.default_id
    }

    pub fn planner_id(&self) -> Option<&str> {
        self.planner_id.as_deref()
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn list(&self) -> Vec<AgentDescriptor> {
        self.agents.read().await.clone()
    }

    /// 按 id 精确查找
    pub async fn get(&self, id: &str) -> Option<AgentDescriptor> {
        self.agents.read().await.iter().find(|a| a.id == id).cloned()
    }

    /// 按名称或 id 查找（模型输出、计划步骤用）
    pub async fn resolve(&self, name_or_id: &str) -> Option<AgentDescriptor> {
        self.agents
            .read()
            .await
            .iter()
            .find(|a| a.matches(name_or_id))
            .cloned()
    }

    pub async fn default_agent(&self) -> Result<AgentDescriptor, AgentError> {
        self.get(&self.default_id)
            .await
            .ok_or_else(|| AgentError::AgentNotFound(self.default_id.clone()))
    }

    /// 运行时更新生成参数；非法值整体拒绝，不做部分写入
    pub async fn update_config(&self, id: &str, patch: &GenerationPatch) -> Result<AgentDescriptor, AgentError> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .iter_mut()
            .find(|a| a.matches(id))
            .ok_or_else(|| AgentError::AgentNotFound(id.to_string()))?;
        let mut updated = agent.generation.clone();
        patch.apply(&mut updated);
        updated.validate(&agent.id)?;
        if agent.is_planner() && !updated.enabled_tools.is_empty() {
            return Err(AgentError::Config(format!("planner agent '{}' must not enable tools", agent.id)));
        }
        agent.generation = updated;
        tracing::info!(agent = %agent.id, "agent settings updated");
        Ok(agent.clone())
    }
}

pub fn builtin_agents() -> Vec<AgentDescriptor> {
    vec![
        AgentDescriptor::new(
            "chat",
            "General Assistant",
            "Friendly conversational agent for greetings, small talk, general questions and app settings.",
        )
        .with_generation(GenerationConfig {
            system_prompt: "You are a helpful, friendly assistant. Answer concisely.".into(),
            temperature: Some(0.7),
            enabled_tools: vec!["navigate".into(), "update_agent_settings".into()],
            ..Default::default()
        }),
        AgentDescriptor::new(
            "code_search",
            "Code Search",
            "Answers questions about the indexed source code and documents using retrieved file context.",
        )
        .with_capability(Capability::AcceptsContext)
        .with_generation(GenerationConfig {
            system_prompt: "You answer questions about the user's code. Cite the files you rely on.".into(),
            temperature: Some(0.2),
            enabled_tools: vec!["search_knowledge".into()],
            ..Default::default()
        }),
        AgentDescriptor::new(
            "planner",
            "Planner",
            "Breaks complex, multi-part requests into an ordered plan executed by other agents.",
        )
        .with_capability(Capability::Planner)
        .with_generation(GenerationConfig {
            system_prompt: "You are a planner. Split the request into ordered steps. Each step names one agent \
                            from the pool and a self-contained task. Reply with JSON only."
                .into(),
            temperature: Some(0.1),
            json_response: true,
            ..Default::default()
        }),
    ]
}
