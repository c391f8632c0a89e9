//! search_knowledge 工具：把向量检索暴露给模型

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::memory::Retriever;
use crate::tools::schema::schema_value;
use crate::tools::{Tool, ToolContext};

const MAX_TOP_K: usize = 20;

#[derive(Deserialize, JsonSchema)]
struct SearchArgs {
    /// 自然语言查询
    query: String,
    /// 返回条数，默认 5
    top_k: Option<usize>,
}

pub struct SearchKnowledgeTool {
    retriever: Arc<Retriever>,
}

impl SearchKnowledgeTool {
    pub fn new(retriever: Arc<Retriever>) -> Self {
        Self { retriever }
    }
}

#[async_trait]
impl Tool for SearchKnowledgeTool {
    fn name(&self) -> &str {
        "search_knowledge"
    }

    fn description(&self) -> &str {
        "Semantic search over the ingested files and documents. Returns the most relevant chunks with their source."
    }

    fn parameters_schema(&self) -> Value {
        schema_value::<SearchArgs>()
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, String> {
        let args: SearchArgs = serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))?;
        let top_k = args.top_k.unwrap_or(5).clamp(1, MAX_TOP_K);
        let hits = self
            .retriever
            .search(&args.query, top_k)
            .await
            .map_err(|e| e.to_string())?;
        let results: Vec<Value> = hits
            .iter()
            .map(|h| {
                json!({
                    "source": h.chunk.source_id,
                    "text": h.chunk.text,
                    "score": h.score,
                })
            })
            .collect();
        Ok(json!({ "success": true, "results": results }))
    }
}
