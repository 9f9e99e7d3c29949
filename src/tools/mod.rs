pub mod config;
pub mod tool;

pub use config::{ExecutionMode, ToolConfig, ToolTransport};
pub use tool::{ExternalTool, FunctionTool, HandlerTool};

use serde_json::{Map, Value, json};
use std::sync::Arc;

use crate::message::{ToolCall, ToolId};

/// 客户端工具注册表，按 (tool_name, display_name) 查找
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn FunctionTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_configs(configs: &[ToolConfig]) -> Self {
        let mut registry = Self::new();
        for config in configs {
            registry.register(Arc::new(ExternalTool::new(config.clone())));
        }
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn FunctionTool>) {
        log::info!("Registered function tool: {:?}", tool.tool_id());
        self.tools.push(tool);
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn find(&self, id: &ToolId) -> Option<&Arc<dyn FunctionTool>> {
        self.tools.iter().find(|t| t.tool_id() == id)
    }

    /// 执行 toolCall，返回发回 agent 的 tool response
    pub async fn run(&self, call: &ToolCall) -> Value {
        let label = call.tool_id.label();
        let Some(tool) = self.find(&call.tool_id) else {
            log::warn!("Could not find registered function {:?}", call.tool_id);
            return json!({ "error": format!("Function tool '{}' not registered.", label) });
        };

        match tool.call(call.input.clone()).await {
            Ok(response) => {
                let mut reply = Map::new();
                if let Some(id) = &call.id {
                    reply.insert("id".into(), json!(id));
                }
                reply.insert("tool".into(), json!(tool.tool_id().tool_name));
                // 回传 toolCall 里的 displayName，而非注册时的
                if let Some(display) = &call.tool_id.tool_display_name {
                    reply.insert("displayName".into(), json!(display));
                }
                reply.insert("response".into(), response);
                Value::Object(reply)
            }
            Err(e) => {
                log::error!("An error occurred while running tool '{}': {}", label, e);
                json!({
                    "error": format!(
                        "An error occurred while running {}. The function returned {}",
                        label, e
                    )
                })
            }
        }
    }
}
