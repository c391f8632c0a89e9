//! Hive - Rust 多智能体编排引擎
//!
//! 模块划分：
//! - **agents**: 智能体描述符、生成配置、能力标记、运行时可修改的智能体池
//! - **cache**: 基于键值存储的 TTL 缓存
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类与恢复、请求路由、引擎构建
//! - **llm**: 后端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）、嵌入管线
//! - **memory**: 短期窗口、长期记忆（新颖性门控、会话摘要）、检索增强（分块 / 向量库）
//! - **observability**: tracing 初始化
//! - **performance**: 运行评分与反馈
//! - **react**: 上下文组装、函数调用循环、多步计划、监督者
//! - **storage**: 键值存储（内存 / SQLite）
//! - **tools**: 工具注册表、执行器与内置工具

pub mod agents;
pub mod cache;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod performance;
pub mod react;
pub mod storage;
pub mod tools;

pub use crate::core::{AgentError, EngineBuilder};
pub use crate::react::{RunHandle, RunRequest, Supervisor, SupervisorEvent};
