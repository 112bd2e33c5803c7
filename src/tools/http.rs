//! HTTP 工具：`http <method> <url> [body...]`
//!
//! 通过 reqwest 发请求，返回状态行与响应体（超长由分发器截断）；请求失败作为错误观察返回。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use schemars::JsonSchema;
use serde_json::Value;

use crate::tools::args::{str_arg, take_tokens};
use crate::tools::schema::parameters_for;
use crate::tools::{Tool, ToolError};

const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"];

#[allow(dead_code)]
#[derive(JsonSchema)]
struct HttpArgs {
    /// GET / POST / PUT / PATCH / DELETE / HEAD
    method: String,
    /// 完整 URL（http 或 https）
    url: String,
    /// 可选请求体；以 { 或 [ 开头时按 JSON 发送
    body: Option<String>,
}

pub struct HttpTool {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTool {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    fn validate(method: &str, url: &str) -> Result<Method, ToolError> {
        let upper = method.to_ascii_uppercase();
        if !ALLOWED_METHODS.contains(&upper.as_str()) {
            return Err(ToolError::InvalidArguments(format!(
                "unsupported method '{method}'"
            )));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ToolError::InvalidArguments(format!(
                "url must start with http:// or https://, got '{url}'"
            )));
        }
        Method::from_bytes(upper.as_bytes()).map_err(|e| ToolError::InvalidArguments(e.to_string()))
    }
}

#[async_trait]
impl Tool for HttpTool {
    fn name(&self) -> &str {
        "http"
    }

    fn description(&self) -> &str {
        "Send an HTTP request. Usage: http <method> <url> [body...]"
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<HttpArgs>()
    }

    fn parse_args(&self, raw: &str) -> Value {
        let (tokens, rest) = take_tokens(raw, 2);
        let mut args = serde_json::json!({
            "method": tokens.first().cloned().unwrap_or_default(),
            "url": tokens.get(1).cloned().unwrap_or_default(),
        });
        if !rest.is_empty() {
            args["body"] = Value::String(rest.to_string());
        }
        args
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let method = Self::validate(
            str_arg(&args, "method").unwrap_or(""),
            str_arg(&args, "url").unwrap_or(""),
        )?;
        let url = str_arg(&args, "url").unwrap_or("");

        let mut request = self.client.request(method.clone(), url).timeout(self.timeout);
        if let Some(body) = str_arg(&args, "body") {
            let trimmed = body.trim_start();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                request = request.header(reqwest::header::CONTENT_TYPE, "application/json");
            }
            request = request.body(body.to_string());
        }

        tracing::info!(method = %method, url = %url, "http tool execute");
        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return Ok(format!("Error requesting {url}: {e}")),
        };
        let status = response.status();
        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => return Ok(format!("HTTP {status}\nError reading body: {e}")),
        };
        Ok(if text.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}\n{text}")
        })
    }
}
