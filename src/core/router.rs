//! 请求路由：为自由文本请求选择处理的智能体
//!
//! - 池中只有一个智能体时直接返回
//! - 否则先查缓存（版本化命名空间 + 原始提示），命中后按名称解析回当前池中的描述符，解析不到则忽略缓存
//! - 未命中时做一次分类调用，要求返回 `{reasoning, agent_name}`；未知名称回退默认智能体
//! - 只缓存成功解析的结果；任何后端失败都回退默认智能体，不向上抛

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::agents::{AgentDescriptor, AgentPool};
use crate::cache::TtlCache;
use crate::core::{AgentError, RecoveryEngine};
use crate::llm::{parse_json_reply, Content, GenerateConfig, LlmBackend};

pub const SINGLE_AGENT_REASONING: &str = "Only one agent is available.";

/// 路由结果
#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub agent: AgentDescriptor,
    pub reasoning: String,
    /// 是否来自缓存
    pub cached: bool,
}

/// 模型的分类输出
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Classification {
    #[serde(default)]
    reasoning: String,
    agent_name: String,
}

/// 缓存的路由决定（存名称，读取时重新解析）
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedRoute {
    agent_name: String,
    reasoning: String,
}

pub struct AgentRouter {
    backend: Arc<dyn LlmBackend>,
    pool: Arc<AgentPool>,
    cache: Arc<TtlCache>,
    namespace: String,
    ttl: Duration,
    recovery: RecoveryEngine,
}

impl AgentRouter {
    pub fn new(backend: Arc<dyn LlmBackend>, pool: Arc<AgentPool>, cache: Arc<TtlCache>) -> Self {
        Self {
            backend,
            pool,
            cache,
            namespace: "router:v1".to_string(),
            ttl: Duration::from_secs(3600),
            recovery: RecoveryEngine::new(),
        }
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn cache_key(&self, prompt: &str) -> String {
        format!("{}:{}", self.namespace, prompt)
    }

    /// 选择智能体；只有默认智能体缺失（池配置损坏）时才会返回错误
    pub async fn select_agent(&self, prompt: &str) -> Result<RouteDecision, AgentError> {
        let agents = self.pool.list().await;
        if agents.len() == 1 {
            if let Some(agent) = agents.first().cloned() {
                return Ok(RouteDecision {
                    agent,
                    reasoning: SINGLE_AGENT_REASONING.to_string(),
                    cached: false,
                });
            }
        }

        let key = self.cache_key(prompt);
        match self.cache.get::<CachedRoute>(&key).await {
            Ok(Some(hit)) => match self.pool.resolve(&hit.agent_name).await {
                Some(agent) => {
                    tracing::debug!(agent = %agent.id, "route cache hit");
                    return Ok(RouteDecision {
                        agent,
                        reasoning: hit.reasoning,
                        cached: true,
                    });
                }
                None => tracing::debug!(agent = %hit.agent_name, "cached route no longer resolvable, ignoring"),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "route cache read failed"),
        }

        match self.classify(prompt, &agents).await {
            Ok(c) => match self.pool.resolve(&c.agent_name).await {
                Some(agent) => {
                    let cached = CachedRoute {
                        agent_name: agent.name.clone(),
                        reasoning: c.reasoning.clone(),
                    };
                    if let Err(e) = self.cache.set(&key, &cached, self.ttl).await {
                        tracing::warn!(error = %e, "route cache write failed");
                    }
                    tracing::info!(agent = %agent.id, "request routed");
                    Ok(RouteDecision {
                        agent,
                        reasoning: c.reasoning,
                        cached: false,
                    })
                }
                None => {
                    tracing::warn!(agent = %c.agent_name, "classifier named unknown agent, using default");
                    self.fallback(format!(
                        "The suggested agent '{}' is not available, so the default agent will handle this request.",
                        c.agent_name
                    ))
                    .await
                }
            },
            Err(e) => {
                let action = self.recovery.handle(&e);
                tracing::warn!(error = %e, ?action, "routing failed, using default agent");
                self.fallback("Routing failed, so the default agent will handle this request.".to_string())
                    .await
            }
        }
    }

    async fn fallback(&self, reasoning: String) -> Result<RouteDecision, AgentError> {
        Ok(RouteDecision {
            agent: self.pool.default_agent().await?,
            reasoning,
            cached: false,
        })
    }

    async fn classify(&self, prompt: &str, agents: &[AgentDescriptor]) -> Result<Classification, AgentError> {
        let roster = agents
            .iter()
            .map(|a| format!("- {}: {}", a.name, a.description))
            .collect::<Vec<_>>()
            .join("\n");
        let system = format!(
            "You route user requests to the best agent.\n\
             Available agents:\n{roster}\n\n\
             First decide what the user intends, then pick exactly one agent by its name. \
             Reply with JSON: {{\"reasoning\": string, \"agent_name\": string}}."
        );
        let config = GenerateConfig {
            system_instruction: Some(system),
            temperature: Some(0.0),
            json_output: true,
            response_schema: Some(json!({
                "type": "object",
                "properties": {
                    "reasoning": { "type": "string" },
                    "agent_name": { "type": "string" }
                },
                "required": ["reasoning", "agent_name"]
            })),
            ..Default::default()
        };
        let resp = self
            .backend
            .generate(&[Content::user(prompt)], &config)
            .await
            .map_err(|e| AgentError::Routing(e.to_string()))?;
        parse_json_reply(&resp.text).map_err(|e| AgentError::Routing(format!("invalid classification: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentDescriptor;
    use crate::llm::{LlmError, MockBackend};
    use crate::storage::InMemoryKv;

    fn router(backend: Arc<MockBackend>, pool: AgentPool) -> AgentRouter {
        AgentRouter::new(
            backend,
            Arc::new(pool),
            Arc::new(TtlCache::new(Arc::new(InMemoryKv::new()))),
        )
    }

    #[tokio::test]
    async fn test_single_agent_short_circuits() {
        let backend = Arc::new(MockBackend::new());
        let pool = AgentPool::new(vec![AgentDescriptor::new("solo", "Solo", "only one")], "solo", None).unwrap();
        let d = router(backend.clone(), pool).select_agent("anything").await.unwrap();
        assert_eq!(d.agent.id, "solo");
        assert_eq!(d.reasoning, SINGLE_AGENT_REASONING);
        assert_eq!(backend.generate_calls(), 0);
    }

    #[tokio::test]
    async fn test_classification_is_cached() {
        let backend = Arc::new(MockBackend::new());
        backend.push_response(r#"{"reasoning": "code question", "agent_name": "Code Search"}"#);
        let r = router(backend.clone(), AgentPool::builtin().unwrap());
        let a = r.select_agent("where is main defined?").await.unwrap();
        let b = r.select_agent("where is main defined?").await.unwrap();
        assert_eq!(a.agent.id, "code_search");
        assert_eq!(b.agent.id, "code_search");
        assert!(!a.cached);
        assert!(b.cached);
        assert_eq!(backend.generate_calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_agent_falls_back_and_is_not_cached() {
        let backend = Arc::new(MockBackend::new().with_responder(|_, _| {
            Ok(r#"{"reasoning": "?", "agent_name": "Ghost"}"#.to_string())
        }));
        let r = router(backend.clone(), AgentPool::builtin().unwrap());
        let d = r.select_agent("hm").await.unwrap();
        assert_eq!(d.agent.id, "chat");
        assert!(d.reasoning.contains("Ghost"));
        r.select_agent("hm").await.unwrap();
        assert_eq!(backend.generate_calls(), 2);
    }

    #[tokio::test]
    async fn test_backend_error_falls_back() {
        let backend = Arc::new(MockBackend::new());
        backend.push_response_error(LlmError::Unavailable("503".into()));
        let d = router(backend, AgentPool::builtin().unwrap())
            .select_agent("hello")
            .await
            .unwrap();
        assert_eq!(d.agent.id, "chat");
    }

    #[tokio::test]
    async fn test_malformed_json_falls_back() {
        let backend = Arc::new(MockBackend::new());
        backend.push_response("I think the chat agent");
        let d = router(backend, AgentPool::builtin().unwrap())
            .select_agent("hello")
            .await
            .unwrap();
        assert_eq!(d.agent.id, "chat");
    }

    #[tokio::test]
    async fn test_system_instruction_lists_every_agent() {
        let backend = Arc::new(MockBackend::new());
        backend.push_response(r#"{"reasoning": "greeting", "agent_name": "General Assistant"}"#);
        router(backend.clone(), AgentPool::builtin().unwrap())
            .select_agent("hi")
            .await
            .unwrap();
        let system = backend.generate_requests()[0]
            .config
            .system_instruction
            .clone()
            .unwrap();
        for name in ["General Assistant", "Code Search", "Planner"] {
            assert!(system.contains(name));
        }
    }
}
