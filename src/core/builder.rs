//! 引擎构建器：由 AppConfig 组装存储、缓存、后端、智能体池、检索、记忆、评分与工具，得到 Supervisor
//!
//! 后端、存储、UI 钩子与新颖性/摘要策略都可注入（测试中注入 MockBackend）。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::agents::{builtin_agents, AgentPool};
use crate::cache::TtlCache;
use crate::config::AppConfig;
use crate::core::{AgentError, AgentRouter};
use crate::llm::{create_deepseek_backend, EmbeddingPipeline, LlmBackend, MockBackend, OpenAiBackend};
use crate::memory::{
    Chunker, ChunkingConfig, LlmNoveltyOracle, LlmSummarizer, LongTermMemory, NoveltyOracle, Retriever,
    ShortTermMemory, Summarizer, VectorStore,
};
use crate::performance::PerformanceTracker;
use crate::react::{Supervisor, SupervisorSettings};
use crate::storage::{InMemoryKv, KvStore, SqliteKv};
use crate::tools::{
    EchoTool, NavigateTool, NoopUi, SearchKnowledgeTool, ToolExecutor, ToolRegistry, UiHooks,
    UpdateAgentSettingsTool,
};

const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

pub struct EngineBuilder {
    config: AppConfig,
    backend: Option<Arc<dyn LlmBackend>>,
    store: Option<Arc<dyn KvStore>>,
    ui: Arc<dyn UiHooks>,
    credentials: HashMap<String, String>,
    novelty: Option<Arc<dyn NoveltyOracle>>,
    summarizer: Option<Arc<dyn Summarizer>>,
}

impl EngineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            backend: None,
            store: None,
            ui: Arc::new(NoopUi),
            credentials: HashMap::new(),
            novelty: None,
            summarizer: None,
        }
    }

    /// 注入后端，忽略 [llm] 段
    pub fn with_backend(mut self, backend: Arc<dyn LlmBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// 注入存储，忽略 [storage] 段
    pub fn with_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_ui(mut self, ui: Arc<dyn UiHooks>) -> Self {
        self.ui = ui;
        self
    }

    /// 执行时传给工具的凭据
    pub fn with_credentials(mut self, credentials: HashMap<String, String>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_novelty_oracle(mut self, oracle: Arc<dyn NoveltyOracle>) -> Self {
        self.novelty = Some(oracle);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn build_store(&self) -> Result<Arc<dyn KvStore>, AgentError> {
        if let Some(store) = &self.store {
            return Ok(store.clone());
        }
        let section = &self.config.storage;
        match section.backend.as_str() {
            "memory" => Ok(Arc::new(InMemoryKv::new())),
            "sqlite" => {
                let path = if section.path.is_absolute() {
                    section.path.clone()
                } else {
                    self.config.app.data_dir.join(&section.path)
                };
                tracing::info!(path = %path.display(), "opening sqlite store");
                Ok(Arc::new(SqliteKv::open(path)?))
            }
            other => Err(AgentError::Config(format!("unknown storage backend: {other}"))),
        }
    }

    pub fn build_backend(&self) -> Result<Arc<dyn LlmBackend>, AgentError> {
        if let Some(backend) = &self.backend {
            return Ok(backend.clone());
        }
        let llm = &self.config.llm;
        let backend: Arc<dyn LlmBackend> = match llm.provider.as_str() {
            "openai" => Arc::new(OpenAiBackend::new(
                llm.base_url.as_deref(),
                llm.model.as_deref().unwrap_or(DEFAULT_OPENAI_MODEL),
                &llm.embedding_model,
                None,
                llm.request_timeout_secs,
            )),
            "deepseek" => Arc::new(create_deepseek_backend(
                llm.model.as_deref(),
                &llm.embedding_model,
                llm.request_timeout_secs,
            )),
            "mock" => Arc::new(MockBackend::new()),
            other => return Err(AgentError::Config(format!("unknown llm provider: {other}"))),
        };
        tracing::info!(provider = %llm.provider, "llm backend ready");
        Ok(backend)
    }

    /// 智能体池：配置了 [[agents]] 用配置，否则用内置池；planner_agent 为空串表示不启用计划
    pub fn build_pool(&self) -> Result<AgentPool, AgentError> {
        let agents = if self.config.agents.is_empty() {
            builtin_agents()
        } else {
            self.config.agents.clone()
        };
        let planner = self
            .config
            .supervisor
            .planner_agent
            .as_deref()
            .filter(|p| !p.trim().is_empty());
        AgentPool::new(agents, &self.config.router.default_agent, planner)
    }

    /// 所有接入方式共享同一套工具
    pub fn build_tool_registry(&self, pool: Arc<AgentPool>, retriever: Arc<Retriever>) -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool);
        tools.register(NavigateTool);
        tools.register(UpdateAgentSettingsTool::new(pool));
        tools.register(SearchKnowledgeTool::new(retriever));
        tools
    }

    pub fn build_retriever(&self, backend: Arc<dyn LlmBackend>, store: Arc<dyn KvStore>) -> Retriever {
        let r = &self.config.retrieval;
        let pipeline = EmbeddingPipeline::new(backend)
            .with_batch_size(r.batch_size)
            .with_retry(r.max_attempts, Duration::from_millis(r.base_delay_ms));
        Retriever::new(
            Chunker::new(ChunkingConfig {
                chunk_size: r.chunk_size,
                chunk_overlap: r.chunk_overlap,
            }),
            Arc::new(pipeline),
            Arc::new(VectorStore::new(store, r.dimensions)),
        )
    }

    pub fn build(self) -> Result<Supervisor, AgentError> {
        let store = self.build_store()?;
        let backend = self.build_backend()?;
        let pool = Arc::new(self.build_pool()?);

        let mut cache = TtlCache::new(store.clone());
        if let Some(max) = self.config.cache.max_entries {
            cache = cache.with_max_entries(max);
        }
        let router = AgentRouter::new(backend.clone(), pool.clone(), Arc::new(cache))
            .with_namespace(&self.config.router.cache_namespace)
            .with_ttl(Duration::from_secs(self.config.router.cache_ttl_secs));

        let retriever = Arc::new(self.build_retriever(backend.clone(), store.clone()));
        let long_term = Arc::new(LongTermMemory::new(store.clone(), self.config.memory.max_items_per_agent));
        let tracker = Arc::new(PerformanceTracker::new(store, long_term.clone()));
        let registry = self.build_tool_registry(pool.clone(), retriever.clone());
        let executor = ToolExecutor::new(Arc::new(registry), self.config.tools.tool_timeout_secs);

        let novelty = self
            .novelty
            .unwrap_or_else(|| Arc::new(LlmNoveltyOracle::new(backend.clone())));
        let summarizer = self
            .summarizer
            .unwrap_or_else(|| Arc::new(LlmSummarizer::new(backend.clone())));

        let s = &self.config.supervisor;
        let m = &self.config.memory;
        let settings = SupervisorSettings {
            max_function_turns: s.max_function_turns.max(1),
            short_term_window: s.short_term_window,
            long_term_top_n: s.long_term_top_n,
            rag_top_k: s.rag_top_k,
            summary_turns: m.summary_turns,
            min_fact_chars: m.min_fact_chars,
            novelty_top_n: m.novelty_top_n,
            ..Default::default()
        };

        Ok(Supervisor {
            backend,
            pool,
            router: Arc::new(router),
            executor: Arc::new(executor),
            retriever,
            long_term,
            short_term: Arc::new(Mutex::new(ShortTermMemory::new(s.short_term_capacity))),
            tracker,
            novelty,
            summarizer,
            ui: self.ui,
            credentials: self.credentials,
            settings,
        })
    }
}

/// 便捷函数：从默认路径加载配置并创建构建器；配置加载失败时回退默认值
pub fn create_engine_builder(config_path: Option<PathBuf>) -> EngineBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    EngineBuilder::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentDescriptor;

    #[test]
    fn test_unknown_provider_rejected() {
        let mut config = AppConfig::default();
        config.llm.provider = "carrier-pigeon".into();
        assert!(matches!(
            EngineBuilder::new(config).build_backend(),
            Err(AgentError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_builtin_pool_by_default() {
        let mut config = AppConfig::default();
        config.llm.provider = "mock".into();
        let sup = EngineBuilder::new(config).build().unwrap();
        assert_eq!(sup.pool().len().await, 3);
        assert_eq!(sup.pool().planner_id(), Some("planner"));
    }

    #[test]
    fn test_custom_pool_without_planner() {
        let mut config = AppConfig::default();
        config.agents = vec![AgentDescriptor::new("solo", "Solo", "only agent")];
        config.router.default_agent = "solo".into();
        config.supervisor.planner_agent = Some(String::new());
        let pool = EngineBuilder::new(config).build_pool().unwrap();
        assert_eq!(pool.planner_id(), None);
    }

    #[test]
    fn test_sqlite_store_under_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.app.data_dir = dir.path().to_path_buf();
        config.storage.backend = "sqlite".into();
        EngineBuilder::new(config).build_store().unwrap();
        assert!(dir.path().join("hive.db").exists());
    }
}
