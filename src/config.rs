//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::agents::AgentDescriptor;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub router: RouterSection,
    pub supervisor: SupervisorSection,
    pub retrieval: RetrievalSection,
    pub memory: MemorySection,
    pub storage: StorageSection,
    pub cache: CacheSection,
    pub tools: ToolsSection,
    /// 智能体池；为空时使用内置池
    pub agents: Vec<AgentDescriptor>,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    pub data_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "hive".to_string(),
            data_dir: PathBuf::from("data"),
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / deepseek / mock
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub embedding_model: String,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: None,
            base_url: None,
            embedding_model: "text-embedding-3-small".to_string(),
            request_timeout_secs: 60,
        }
    }
}

/// [router] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    pub default_agent: String,
    pub cache_ttl_secs: u64,
    /// 路由缓存命名空间；改变分类提示时换版本号即可使旧缓存失效
    pub cache_namespace: String,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            default_agent: "chat".to_string(),
            cache_ttl_secs: 3600,
            cache_namespace: "router:v1".to_string(),
        }
    }
}

/// [supervisor] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorSection {
    pub max_function_turns: usize,
    pub short_term_window: usize,
    pub short_term_capacity: usize,
    pub long_term_top_n: usize,
    pub rag_top_k: usize,
    /// 计划智能体 id；置空表示不启用多步计划
    pub planner_agent: Option<String>,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            max_function_turns: 10,
            short_term_window: 5,
            short_term_capacity: 50,
            long_term_top_n: 5,
            rag_top_k: 5,
            planner_agent: Some("planner".to_string()),
        }
    }
}

/// [retrieval] 段：分块与嵌入批处理
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// 固定向量维度；不设则以首次写入为准
    pub dimensions: Option<usize>,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 64,
            batch_size: 100,
            max_attempts: 5,
            base_delay_ms: 500,
            dimensions: None,
        }
    }
}

/// [memory] 段：长期记忆与会话摘要
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub max_items_per_agent: usize,
    pub summary_turns: usize,
    pub min_fact_chars: usize,
    pub novelty_top_n: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            max_items_per_agent: 50,
            summary_turns: 10,
            min_fact_chars: 12,
            novelty_top_n: 5,
        }
    }
}

/// [storage] 段：memory / sqlite
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub backend: String,
    /// SQLite 文件路径；相对路径基于 app.data_dir
    pub path: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            path: PathBuf::from("hive.db"),
        }
    }
}

/// [cache] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub max_entries: Option<usize>,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: Some(1000),
        }
    }
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self { tool_timeout_secs: 30 }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let c = AppConfig::default();
        assert_eq!(c.router.cache_ttl_secs, 3600);
        assert_eq!(c.supervisor.max_function_turns, 10);
        assert_eq!(c.retrieval.chunk_size, 512);
        assert_eq!(c.memory.max_items_per_agent, 50);
        assert!(c.agents.is_empty());
    }

    #[test]
    fn test_file_overrides_and_agents() {
        let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            f,
            r#"
[llm]
provider = "mock"

[retrieval]
chunk_size = 256

[[agents]]
id = "solo"
name = "Solo"
description = "the only agent"

[agents.generation]
system_prompt = "Be brief."
temperature = 0.3
"#
        )
        .unwrap();
        let c = load_config(Some(f.path().to_path_buf())).unwrap();
        assert_eq!(c.llm.provider, "mock");
        assert_eq!(c.retrieval.chunk_size, 256);
        assert_eq!(c.retrieval.chunk_overlap, 64);
        assert_eq!(c.agents.len(), 1);
        assert_eq!(c.agents[0].generation.temperature, Some(0.3));
    }
}
