//! JSON Schema 生成（schemars）：工具参数与结构化输出契约共用

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 类型 T 的 JSON Schema
pub fn schema_value<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
}
