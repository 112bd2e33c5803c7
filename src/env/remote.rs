//! 远程执行服务客户端
//!
//! 通过 HTTP JSON 访问远程沙箱：
//! - `POST /sessions` 创建会话，返回 `{"id": "..."}`
//! - `POST /sessions/{id}/exec` `{"command", "timeout_secs"}` → `{"output", "exit_code"}`
//! - `GET|PUT /sessions/{id}/files?path=...` 读写文件（PUT 体为 `{"content"}`，服务端负责创建父目录）
//! - `POST /sessions/{id}/env` `{"vars": {...}}`
//! - `DELETE /sessions/{id}` 释放旧会话（reset_session 创建新会话之后）

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::env::{CommandOutput, EnvError, Environment};

#[derive(Debug, Deserialize)]
struct SessionCreated {
    id: String,
}

#[derive(Debug, Serialize)]
struct ExecRequest<'a> {
    command: &'a str,
    timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct FileBody {
    content: String,
}

#[derive(Debug, Serialize)]
struct EnvRequest<'a> {
    vars: &'a BTreeMap<String, String>,
}

pub struct RemoteEnvironment {
    client: reqwest::Client,
    base_url: String,
    session_id: Mutex<Option<String>>,
}

impl RemoteEnvironment {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session_id: Mutex::new(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn session_url(&self, suffix: &str) -> Result<String, EnvError> {
        let session = self.session_id.lock().await;
        let id = session.as_ref().ok_or(EnvError::NotInitialized)?;
        Ok(format!("{}/sessions/{}/{}", self.base_url, id, suffix))
    }

    async fn send(
        &self,
        op: &'static str,
        request: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<reqwest::Response, EnvError> {
        let response = request.timeout(timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                EnvError::Timeout {
                    op,
                    secs: timeout.as_secs(),
                }
            } else {
                EnvError::Transport(e.to_string())
            }
        })?;
        Ok(response)
    }

    /// 释放旧会话；失败只记日志，不影响已创建的新会话
    async fn release_session(&self, id: &str, timeout: Duration) {
        let url = format!("{}/sessions/{}", self.base_url, id);
        let released = match self.send("release_session", self.client.delete(&url), timeout).await {
            Ok(response) => check_status(&response, "sessions"),
            Err(e) => Err(e),
        };
        match released {
            Ok(()) => tracing::debug!(session = %id, "remote environment session released"),
            Err(e) => tracing::warn!(session = %id, error = %e, "failed to release remote session"),
        }
    }
}

fn check_status(response: &reqwest::Response, subject: &str) -> Result<(), EnvError> {
    match response.status() {
        s if s.is_success() => Ok(()),
        StatusCode::NOT_FOUND => Err(EnvError::NotFound(subject.to_string())),
        StatusCode::FORBIDDEN => Err(EnvError::PathEscape(subject.to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::GONE => Err(EnvError::NotInitialized),
        s => Err(EnvError::Transport(format!("{subject}: HTTP {s}"))),
    }
}

fn decode_error(err: reqwest::Error) -> EnvError {
    EnvError::Transport(format!("invalid response body: {err}"))
}

#[async_trait]
impl Environment for RemoteEnvironment {
    async fn execute(&self, command: &str, timeout: Duration) -> Result<CommandOutput, EnvError> {
        let url = self.session_url("exec").await?;
        let body = ExecRequest {
            command,
            timeout_secs: timeout.as_secs().max(1),
        };
        // 服务端自身也按 timeout_secs 终止命令，这里多留一点余量给传输
        let response = self
            .send("execute", self.client.post(&url).json(&body), timeout + Duration::from_secs(2))
            .await?;
        check_status(&response, "exec")?;
        response.json::<CommandOutput>().await.map_err(decode_error)
    }

    async fn read_file(&self, path: &str, timeout: Duration) -> Result<String, EnvError> {
        let url = self.session_url("files").await?;
        let response = self
            .send("read_file", self.client.get(&url).query(&[("path", path)]), timeout)
            .await?;
        check_status(&response, path)?;
        let body: FileBody = response.json().await.map_err(decode_error)?;
        Ok(body.content)
    }

    async fn write_file(&self, path: &str, content: &str, timeout: Duration) -> Result<(), EnvError> {
        let url = self.session_url("files").await?;
        let body = FileBody {
            content: content.to_string(),
        };
        let response = self
            .send(
                "write_file",
                self.client.put(&url).query(&[("path", path)]).json(&body),
                timeout,
            )
            .await?;
        check_status(&response, path)
    }

    async fn set_env(&self, vars: &BTreeMap<String, String>, timeout: Duration) -> Result<(), EnvError> {
        let url = self.session_url("env").await?;
        let response = self
            .send("set_env", self.client.post(&url).json(&EnvRequest { vars }), timeout)
            .await?;
        check_status(&response, "env")
    }

    async fn reset_session(&self, timeout: Duration) -> Result<(), EnvError> {
        let url = format!("{}/sessions", self.base_url);
        let response = self
            .send("reset_session", self.client.post(&url), timeout)
            .await?;
        check_status(&response, "sessions")?;
        let created: SessionCreated = response.json().await.map_err(decode_error)?;
        tracing::info!(session = %created.id, base_url = %self.base_url, "remote environment session created");
        let previous = self.session_id.lock().await.replace(created.id);
        if let Some(previous) = previous {
            self.release_session(&previous, timeout).await;
        }
        Ok(())
    }
}
