use async_trait::async_trait;
use serde_json::{Value, json};
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::{Duration, timeout};

use super::config::{ExecutionMode, ToolConfig, ToolTransport};
use crate::message::ToolId;

#[async_trait]
pub trait FunctionTool: Send + Sync {
    fn tool_id(&self) -> &ToolId;
    async fn call(&self, input: Value) -> Result<Value, String>;
}

/// 配置驱动的外部工具（子进程 / HTTP / TCP）
pub struct ExternalTool {
    id: ToolId,
    config: ToolConfig,
}

impl ExternalTool {
    pub fn new(config: ToolConfig) -> Self {
        Self {
            id: ToolId::new(config.name.clone(), config.display_name.clone()),
            config,
        }
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    /// 根据传输协议类型分发执行
    async fn execute_inner(config: &ToolConfig, input: Value) -> Result<Value, String> {
        match &config.transport {
            ToolTransport::Subprocess { executable, args } => {
                Self::exec_subprocess(executable, args, input).await
            }
            ToolTransport::Http { url, method } => Self::exec_http(url, method, input).await,
            ToolTransport::Tcp { address } => Self::exec_tcp(address, input).await,
        }
    }

    /// 子进程执行：参数 JSON 写入 stdin，stdout 作为结果
    async fn exec_subprocess(
        executable: &str,
        args: &[String],
        input: Value,
    ) -> Result<Value, String> {
        let input_json = input.to_string();
        log::info!("Executing subprocess tool: {}, input: {}", executable, input_json);

        let mut child = Command::new(executable)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("Failed to spawn {}: {}", executable, e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input_json.as_bytes())
                .await
                .map_err(|e| format!("Failed to write to {}: {}", executable, e))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| format!("Failed to wait for {}: {}", executable, e))?;

        if output.status.success() {
            Ok(parse_output(&String::from_utf8_lossy(&output.stdout)))
        } else {
            Err(format!(
                "Subprocess error: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }

    /// HTTP 调用
    async fn exec_http(url: &str, method: &str, input: Value) -> Result<Value, String> {
        let client = reqwest::Client::new();

        let request = match method.to_uppercase().as_str() {
            "GET" => client.get(url),
            _ => client.post(url).json(&input),
        };

        let response = request
            .send()
            .await
            .map_err(|e| format!("HTTP request failed: {}", e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| format!("Failed to read HTTP response: {}", e))?;
        if !status.is_success() {
            return Err(format!("HTTP {}: {}", status.as_u16(), text));
        }
        Ok(parse_output(&text))
    }

    /// TCP Socket 调用，一行 JSON 请求，读取一次响应
    async fn exec_tcp(address: &str, input: Value) -> Result<Value, String> {
        use tokio::io::AsyncReadExt;
        use tokio::net::TcpStream;

        let mut stream = TcpStream::connect(address)
            .await
            .map_err(|e| format!("TCP connection to {} failed: {}", address, e))?;

        let mut payload = input.to_string().into_bytes();
        payload.push(b'\n');
        stream
            .write_all(&payload)
            .await
            .map_err(|e| format!("TCP write failed: {}", e))?;

        let mut buf = vec![0u8; 4096];
        let n = stream
            .read(&mut buf)
            .await
            .map_err(|e| format!("TCP read failed: {}", e))?;

        Ok(parse_output(&String::from_utf8_lossy(&buf[..n])))
    }
}

/// 输出是 JSON 就按 JSON 返回，否则包成 {"result": text}
fn parse_output(text: &str) -> Value {
    let trimmed = text.trim();
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value @ Value::Object(_)) => value,
        Ok(other) => json!({ "result": other }),
        Err(_) => json!({ "result": trimmed }),
    }
}

#[async_trait]
impl FunctionTool for ExternalTool {
    fn tool_id(&self) -> &ToolId {
        &self.id
    }

    async fn call(&self, input: Value) -> Result<Value, String> {
        // ---- 后台模式 ----
        if self.config.mode == ExecutionMode::Background {
            let config = self.config.clone();
            tokio::spawn(async move {
                log::info!("后台工具已启动: {}", config.name);
                let limit = Duration::from_millis(config.timeout_ms);
                match timeout(limit, Self::execute_inner(&config, input)).await {
                    Ok(Ok(value)) => log::info!("后台工具 [{}] 执行完成: {}", config.name, value),
                    Ok(Err(err)) => log::error!("后台工具 [{}] 执行失败: {}", config.name, err),
                    Err(_) => log::error!(
                        "后台工具 [{}] 执行超时 ({}ms)",
                        config.name,
                        config.timeout_ms
                    ),
                }
            });
            return Ok(json!({ "status": "started" }));
        }

        // ---- 同步模式 ----
        let limit = Duration::from_millis(self.config.timeout_ms);
        match timeout(limit, Self::execute_inner(&self.config, input)).await {
            Ok(result) => result,
            Err(_) => Err(format!(
                "Tool '{}' execution timed out after {} ms",
                self.id.label(),
                self.config.timeout_ms
            )),
        }
    }
}

type BoxedHandler =
    Box<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value, String>> + Send>> + Send + Sync>;

/// 进程内注册的工具（async 闭包）
pub struct HandlerTool {
    id: ToolId,
    handler: BoxedHandler,
}

impl HandlerTool {
    pub fn new<F, Fut>(id: ToolId, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        Self {
            id,
            handler: Box::new(move |input| Box::pin(handler(input))),
        }
    }
}

#[async_trait]
impl FunctionTool for HandlerTool {
    fn tool_id(&self) -> &ToolId {
        &self.id
    }

    async fn call(&self, input: Value) -> Result<Value, String> {
        (self.handler)(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(transport: ToolTransport, timeout_ms: u64) -> ExternalTool {
        ExternalTool::new(ToolConfig {
            name: "t".into(),
            display_name: None,
            description: String::new(),
            mode: ExecutionMode::Sync,
            timeout_ms,
            transport,
        })
    }

    #[test]
    fn output_parsing() {
        assert_eq!(parse_output(" {\"a\":1}\n"), json!({"a": 1}));
        assert_eq!(parse_output("42"), json!({"result": 42}));
        assert_eq!(parse_output("plain text\n"), json!({"result": "plain text"}));
    }

    #[tokio::test]
    async fn tcp_tool_round_trip() {
        use tokio::io::{AsyncBufReadExt, BufReader};
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut line = String::new();
            BufReader::new(read).read_line(&mut line).await.unwrap();
            let input: Value = serde_json::from_str(&line).unwrap();
            let reply = json!({"echo": input["q"]});
            write.write_all(reply.to_string().as_bytes()).await.unwrap();
        });

        let t = tool(ToolTransport::Tcp { address: addr.to_string() }, 2000);
        assert_eq!(t.call(json!({"q": "hi"})).await, Ok(json!({"echo": "hi"})));
    }

    #[tokio::test]
    async fn tcp_tool_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let t = tool(ToolTransport::Tcp { address: addr.to_string() }, 50);
        let err = t.call(json!({})).await.unwrap_err();
        assert!(err.contains("timed out"), "{}", err);
    }

    #[tokio::test]
    async fn handler_tool_runs_closure() {
        let t = HandlerTool::new(ToolId::new("sum", None), |input: Value| async move {
            match input["a"].as_i64() {
                Some(a) => Ok(json!({"sum": a + 1})),
                None => Err("missing a".to_string()),
            }
        });
        assert_eq!(t.call(json!({"a": 1})).await, Ok(json!({"sum": 2})));
        assert_eq!(t.call(json!({})).await, Err("missing a".to_string()));
    }
}
