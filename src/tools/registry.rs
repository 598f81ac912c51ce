//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / is_irreversible / execute），
//! 由 ToolRegistry 按名注册与查找。不可逆工具（删除、装卸包、杀进程）在注册表中
//! 显式打标，由调度器经确认门拦截，而非运行时推断。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、不可逆标记、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（用于 JSON 中的 "tool" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema（供 LLM 生成正确的参数格式，执行前用于校验）
    /// 默认返回空对象，表示无参数或参数格式不限
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 副作用不可撤销的工具：执行前必须经确认门
    fn is_irreversible(&self) -> bool {
        false
    }

    /// 单次调用超时覆盖（秒）；None 用执行器的全局超时
    fn timeout_secs(&self) -> Option<u64> {
        None
    }

    /// 执行工具
    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 按最小 JSON Schema 子集校验参数：type、required、properties（递归）。
/// 空 schema 放行一切。
pub fn validate_args(value: &Value, schema: &Value) -> Result<(), String> {
    let schema_obj = match schema.as_object() {
        Some(obj) => obj,
        None => return Ok(()),
    };
    if schema_obj.is_empty() {
        return Ok(());
    }

    if let Some(type_val) = schema_obj.get("type").and_then(|t| t.as_str()) {
        let matches = match type_val {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "object" => value.is_object(),
            "array" => value.is_array(),
            "null" => value.is_null(),
            other => return Err(format!("unknown schema type: {other}")),
        };
        if !matches {
            return Err(format!("expected type '{}', got {}", type_val, json_type_name(value)));
        }
    }

    if let Some(required) = schema_obj.get("required").and_then(|r| r.as_array()) {
        if let Some(obj) = value.as_object() {
            for req in required {
                if let Some(key) = req.as_str() {
                    if !obj.contains_key(key) {
                        return Err(format!("missing required field: '{key}'"));
                    }
                }
            }
        }
    }

    if let Some(props) = schema_obj.get("properties").and_then(|p| p.as_object()) {
        if let Some(val_obj) = value.as_object() {
            for (key, prop_schema) in props {
                if let Some(prop_value) = val_obj.get(key) {
                    validate_args(prop_value, prop_schema)?;
                }
            }
        }
    }

    Ok(())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 生成工具能力清单 JSON（名称、描述、参数 schema、不可逆标记），拼入 system prompt
    pub fn to_schema_json(&self) -> String {
        let mut names = self.tool_names();
        names.sort();
        let tools: Vec<Value> = names
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "parameters": tool.parameters_schema(),
                    "irreversible": tool.is_irreversible(),
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}
