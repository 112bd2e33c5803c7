//! 工具参数 JSON Schema 生成（schemars）与工具声明渲染
//!
//! 声明文本注入模型历史，减少动作格式错误。

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

use crate::tools::ToolDefinition;

/// 由参数结构体生成 JSON Schema
pub fn parameters_for<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| {
        serde_json::json!({ "type": "object", "properties": {}, "required": [] })
    })
}

/// 工具声明列表的 JSON（对外发布）
pub fn declarations_json(defs: &[ToolDefinition]) -> String {
    serde_json::to_string_pretty(defs).unwrap_or_else(|_| "[]".to_string())
}

/// 给模型看的简洁清单：每行 `name (tier): description`
pub fn declarations_prompt(defs: &[ToolDefinition]) -> String {
    defs.iter()
        .map(|d| format!("- {} ({}): {}", d.name, d.tier, d.description))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::ToolTier;

    #[allow(dead_code)]
    #[derive(JsonSchema)]
    struct Demo {
        /// 要执行的命令
        command: String,
    }

    #[test]
    fn test_parameters_for_lists_properties() {
        let schema = parameters_for::<Demo>();
        assert!(schema["properties"]["command"].is_object());
    }

    #[test]
    fn test_declarations_prompt_format() {
        let defs = vec![ToolDefinition {
            name: "shell".into(),
            description: "Run a command".into(),
            tier: ToolTier::Base,
            parameters: serde_json::json!({}),
        }];
        assert_eq!(declarations_prompt(&defs), "- shell (base): Run a command");
        assert!(declarations_json(&defs).contains("\"tier\": \"base\""));
    }
}
