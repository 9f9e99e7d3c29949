use serde::{Deserialize, Serialize};

/// 执行模式
/// - Sync（默认）：等待执行完成，结果作为 tool response 返回给 agent
/// - Background：立刻返回 started，后台执行，结果只记录日志
#[derive(Clone, Debug, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Sync,
    Background,
}

/// 传输协议类型
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolTransport {
    /// 子进程 stdin/stdout 模式
    Subprocess {
        executable: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// HTTP/REST 调用
    Http {
        url: String,
        #[serde(default = "default_http_method")]
        method: String,
    },
    /// TCP Socket JSON 通信
    Tcp { address: String },
}

fn default_http_method() -> String {
    "POST".to_string()
}

fn default_timeout() -> u64 {
    5000
}

/// 客户端工具配置，name / display_name 与 agent 下发的 toolCall 精确匹配
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ToolConfig {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub mode: ExecutionMode,

    /// 统一超时时间（毫秒），默认 5000ms
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// 传输协议配置（扁平化到同一层 TOML）
    #[serde(flatten)]
    pub transport: ToolTransport,
}
