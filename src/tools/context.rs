//! 工具执行上下文：凭据、UI 回调、上下文包

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// UI 回调钩子（由宿主应用实现；引擎本身不关心界面）
pub trait UiHooks: Send + Sync {
    /// 切换到指定视图
    fn navigate(&self, view: &str) -> Result<(), String>;
}

/// 无界面时的空实现
#[derive(Debug, Default)]
pub struct NoopUi;

impl UiHooks for NoopUi {
    fn navigate(&self, view: &str) -> Result<(), String> {
        tracing::debug!(view, "navigate ignored (no ui attached)");
        Ok(())
    }
}

/// 记录导航请求（REPL 与测试用）
#[derive(Debug, Default)]
pub struct RecordingUi {
    visited: Mutex<Vec<String>>,
}

impl RecordingUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visited(&self) -> Vec<String> {
        self.visited.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl UiHooks for RecordingUi {
    fn navigate(&self, view: &str) -> Result<(), String> {
        self.visited
            .lock()
            .map_err(|_| "ui state poisoned".to_string())?
            .push(view.to_string());
        Ok(())
    }
}

/// 请求附带的上下文包（文件树、暂存文件），对引擎不透明
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    pub file_tree: Option<String>,
    #[serde(default)]
    pub staged_files: Vec<String>,
}

/// 执行时传给工具的环境
#[derive(Clone)]
pub struct ToolContext {
    pub credentials: HashMap<String, String>,
    pub ui: Arc<dyn UiHooks>,
    pub bundle: ContextBundle,
}

impl ToolContext {
    pub fn new(ui: Arc<dyn UiHooks>) -> Self {
        Self {
            credentials: HashMap::new(),
            ui,
            bundle: ContextBundle::default(),
        }
    }

    pub fn with_credentials(mut self, credentials: HashMap<String, String>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_bundle(mut self, bundle: ContextBundle) -> Self {
        self.bundle = bundle;
        self
    }
}

impl Default for ToolContext {
    fn default() -> Self {
        Self::new(Arc::new(NoopUi))
    }
}
