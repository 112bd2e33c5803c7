//! 本地沙箱环境
//!
//! 绑定 root 目录，所有路径在词法层面规范化后必须仍在 root 下（禁止 ../ 逃逸）；
//! 命令通过 sh -c 在 root 下执行，带会话环境变量与超时。首次 reset_session 之前所有操作返回 NotInitialized。

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::env::{CommandOutput, EnvError, Environment};

#[derive(Debug, Default)]
struct LocalSession {
    id: Uuid,
    vars: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct LocalEnvironment {
    root: PathBuf,
    session: Mutex<Option<LocalSession>>,
}

impl LocalEnvironment {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            session: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 把相对路径（或 root 下的绝对路径）解析为 root 内的路径
    pub fn resolve(&self, path: &str) -> Result<PathBuf, EnvError> {
        let candidate = Path::new(path.trim());
        let relative = if candidate.is_absolute() {
            candidate
                .strip_prefix(&self.root)
                .map_err(|_| EnvError::PathEscape(path.to_string()))?
        } else {
            candidate
        };

        let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(p) => parts.push(p),
                Component::CurDir => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(EnvError::PathEscape(path.to_string()));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(EnvError::PathEscape(path.to_string()));
                }
            }
        }
        Ok(parts.into_iter().fold(self.root.clone(), |acc, p| acc.join(p)))
    }

    async fn ensure_session(&self) -> Result<(), EnvError> {
        if self.session.lock().await.is_some() {
            Ok(())
        } else {
            Err(EnvError::NotInitialized)
        }
    }
}

fn io_error(path: &str, err: std::io::Error) -> EnvError {
    if err.kind() == std::io::ErrorKind::NotFound {
        EnvError::NotFound(path.to_string())
    } else {
        EnvError::Io(format!("{path}: {err}"))
    }
}

#[async_trait]
impl Environment for LocalEnvironment {
    async fn execute(&self, command: &str, timeout: Duration) -> Result<CommandOutput, EnvError> {
        let (session_id, vars) = {
            let session = self.session.lock().await;
            session
                .as_ref()
                .map(|s| (s.id, s.vars.clone()))
                .ok_or(EnvError::NotInitialized)?
        };

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .envs(&vars)
            .kill_on_drop(true);

        tracing::debug!(session = %session_id, command = %command, "local environment execute");
        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| EnvError::Timeout {
                op: "execute",
                secs: timeout.as_secs(),
            })?
            .map_err(|e| EnvError::Io(format!("spawn failed: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = if stderr.trim().is_empty() {
            stdout.to_string()
        } else if stdout.trim().is_empty() {
            stderr.to_string()
        } else {
            format!("{}\n{}", stdout.trim_end(), stderr)
        };
        Ok(CommandOutput {
            output: combined,
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn read_file(&self, path: &str, timeout: Duration) -> Result<String, EnvError> {
        self.ensure_session().await?;
        let resolved = self.resolve(path)?;
        tokio::time::timeout(timeout, tokio::fs::read_to_string(&resolved))
            .await
            .map_err(|_| EnvError::Timeout {
                op: "read_file",
                secs: timeout.as_secs(),
            })?
            .map_err(|e| io_error(path, e))
    }

    async fn write_file(&self, path: &str, content: &str, timeout: Duration) -> Result<(), EnvError> {
        self.ensure_session().await?;
        let resolved = self.resolve(path)?;
        let write = async {
            if let Some(parent) = resolved.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&resolved, content).await
        };
        tokio::time::timeout(timeout, write)
            .await
            .map_err(|_| EnvError::Timeout {
                op: "write_file",
                secs: timeout.as_secs(),
            })?
            .map_err(|e| io_error(path, e))
    }

    async fn set_env(&self, vars: &BTreeMap<String, String>, _timeout: Duration) -> Result<(), EnvError> {
        let mut session = self.session.lock().await;
        let session = session.as_mut().ok_or(EnvError::NotInitialized)?;
        session
            .vars
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn reset_session(&self, timeout: Duration) -> Result<(), EnvError> {
        tokio::time::timeout(timeout, tokio::fs::create_dir_all(&self.root))
            .await
            .map_err(|_| EnvError::Timeout {
                op: "reset_session",
                secs: timeout.as_secs(),
            })?
            .map_err(|e| EnvError::Io(format!("create root failed: {e}")))?;
        let id = Uuid::new_v4();
        *self.session.lock().await = Some(LocalSession {
            id,
            vars: BTreeMap::new(),
        });
        tracing::info!(session = %id, root = %self.root.display(), "local environment session reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(5);

    async fn ready_env() -> (tempfile::TempDir, LocalEnvironment) {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalEnvironment::new(dir.path());
        env.reset_session(T).await.unwrap();
        (dir, env)
    }

    #[tokio::test]
    async fn test_not_initialized_before_reset() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalEnvironment::new(dir.path());
        assert_eq!(env.execute("true", T).await.unwrap_err(), EnvError::NotInitialized);
        assert_eq!(env.read_file("a.txt", T).await.unwrap_err(), EnvError::NotInitialized);
    }

    #[tokio::test]
    async fn test_execute_reports_exit_code() {
        let (_dir, env) = ready_env().await;
        let ok = env.execute("echo hi", T).await.unwrap();
        assert!(ok.success());
        assert_eq!(ok.output.trim(), "hi");
        let failed = env.execute("echo oops >&2; exit 3", T).await.unwrap();
        assert_eq!(failed.exit_code, 3);
        assert!(failed.output.contains("oops"));
    }

    #[tokio::test]
    async fn test_execute_timeout() {
        let (_dir, env) = ready_env().await;
        let err = env.execute("sleep 5", Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, EnvError::Timeout { op: "execute", .. }));
    }

    #[tokio::test]
    async fn test_write_creates_parents_and_reads_back() {
        let (_dir, env) = ready_env().await;
        env.write_file("nested/dir/out.txt", "hello", T).await.unwrap();
        assert_eq!(env.read_file("nested/dir/out.txt", T).await.unwrap(), "hello");
        assert!(matches!(
            env.read_file("missing.txt", T).await,
            Err(EnvError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_path_escape_rejected() {
        let (_dir, env) = ready_env().await;
        assert!(matches!(
            env.read_file("../../etc/passwd", T).await,
            Err(EnvError::PathEscape(_))
        ));
        assert!(matches!(env.resolve("/etc/passwd"), Err(EnvError::PathEscape(_))));
        assert!(env.resolve("a/../b.txt").is_ok());
    }

    #[tokio::test]
    async fn test_session_env_vars() {
        let (_dir, env) = ready_env().await;
        let mut vars = BTreeMap::new();
        vars.insert("BEE_GREETING".to_string(), "hola".to_string());
        env.set_env(&vars, T).await.unwrap();
        let out = env.execute("echo $BEE_GREETING", T).await.unwrap();
        assert_eq!(out.output.trim(), "hola");

        env.reset_session(T).await.unwrap();
        let out = env.execute("echo ${BEE_GREETING:-unset}", T).await.unwrap();
        assert_eq!(out.output.trim(), "unset");
    }
}
