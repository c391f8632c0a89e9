//! 核心层：错误分类与恢复、请求路由、引擎构建

pub mod builder;
pub mod error;
pub mod recovery;
pub mod router;

pub use builder::{create_engine_builder, EngineBuilder};
pub use error::{AgentError, RecoveryAction};
pub use recovery::{RecoveryEngine, LOOP_LIMIT_MESSAGE, PLAN_PARSE_MESSAGE};
pub use router::{AgentRouter, RouteDecision, SINGLE_AGENT_REASONING};
