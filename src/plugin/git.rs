//! Built-in plugin that shells out to the system `git` binary.
//!
//! Each invocation spawns a fresh `git` child process rather than keeping one
//! alive, since git subcommands are one-shot. The child is killed if the
//! call's deadline elapses, and stdout/stderr are capped so a runaway
//! command (e.g. `git log` with no `-n`) cannot exhaust memory.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use gateway_core::{CapabilityDescriptor, CapabilityKind};
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use super::{Plugin, PluginHealth};
use crate::{Error, Result};

/// Maximum combined stdout+stderr bytes captured per invocation.
const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Default timeout for a single `git` invocation.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Subcommands this plugin permits; anything else is rejected before spawn.
/// Exposed as tools `git_status`/`git_diff`/`git_add`/`git_commit`/
/// `git_push`/`git_pull`/`git_branch`/`git_log`.
const ALLOWED_SUBCOMMANDS: &[&str] = &["status", "diff", "add", "commit", "push", "pull", "branch", "log"];

/// Git operations exposed as `git_<subcommand>`.
pub struct GitPlugin {
    id: String,
    repo_path: PathBuf,
    timeout: Duration,
}

impl GitPlugin {
    /// Build a plugin operating against the repository at `repo_path`.
    #[must_use]
    pub fn new(id: impl Into<String>, repo_path: PathBuf) -> Self {
        Self {
            id: id.into(),
            repo_path,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the per-invocation timeout (default 30s).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, subcommand: &str, args: &[String]) -> Result<Value> {
        if !ALLOWED_SUBCOMMANDS.contains(&subcommand) {
            return Err(Error::AccessDenied(format!("git subcommand '{subcommand}' is not permitted")));
        }

        let mut cmd = Command::new("git");
        cmd.arg(subcommand)
            .args(args)
            .current_dir(&self.repo_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| Error::Transport(format!("failed to spawn git: {e}")))?;
        let mut stdout = child.stdout.take().expect("piped stdout");
        let mut stderr = child.stderr.take().expect("piped stderr");

        let read_capped = async {
            let mut out = Vec::new();
            let mut err = Vec::new();
            let _ = stdout.take(MAX_OUTPUT_BYTES as u64).read_to_end(&mut out).await;
            let _ = stderr.take(MAX_OUTPUT_BYTES as u64).read_to_end(&mut err).await;
            (out, err)
        };

        let (output, status) = match tokio::time::timeout(self.timeout, async {
            let (out, err) = read_capped.await;
            let status = child.wait().await;
            (out, err, status)
        })
        .await
        {
            Ok((out, err, status)) => {
                let status = status.map_err(|e| Error::Transport(format!("git wait failed: {e}")))?;
                ((out, err), status)
            }
            Err(_) => {
                let _ = child.start_kill();
                return Err(Error::Timeout(format!("git {subcommand} exceeded {:?}", self.timeout)));
            }
        };

        let (stdout_bytes, stderr_bytes) = output;
        let stdout_str = String::from_utf8_lossy(&stdout_bytes).into_owned();
        let stderr_str = String::from_utf8_lossy(&stderr_bytes).into_owned();

        if !status.success() {
            return Err(Error::internal(format!("git {subcommand} failed: {stderr_str}")));
        }

        Ok(serde_json::json!({ "stdout": stdout_str, "stderr": stderr_str }))
    }
}

#[async_trait]
impl Plugin for GitPlugin {
    fn id(&self) -> &str {
        &self.id
    }

    async fn init(&self) -> Result<()> {
        if !self.repo_path.join(".git").exists() {
            return Err(Error::Config(format!("{} is not a git repository", self.repo_path.display())));
        }
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> PluginHealth {
        if self.repo_path.join(".git").exists() {
            PluginHealth::Healthy
        } else {
            PluginHealth::Unhealthy("repository path no longer contains .git".to_string())
        }
    }

    async fn capabilities(&self) -> Result<Vec<CapabilityDescriptor>> {
        Ok(ALLOWED_SUBCOMMANDS
            .iter()
            .map(|name| CapabilityDescriptor {
                name: format!("git_{name}"),
                kind: CapabilityKind::Tool,
                input_schema: Some(serde_json::json!({
                    "type": "object",
                    "properties": {"args": {"type": "array", "items": {"type": "string"}}},
                })),
                output_hint: None,
                version: Some("1.0.0".to_string()),
                tags: vec!["git".to_string()],
                description: None,
            })
            .collect())
    }

    async fn invoke(&self, tool: &str, args: Value) -> Result<Value> {
        let subcommand = tool.strip_prefix("git_").ok_or_else(|| Error::method_not_found(format!("git.{tool}")))?;
        let extra_args: Vec<String> = args
            .get("args")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        self.run(subcommand, &extra_args).await
    }

    fn version(&self) -> &str {
        "1.0.0"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invoke_rejects_disallowed_subcommand() {
        let plugin = GitPlugin::new("git", PathBuf::from("."));
        let err = plugin.invoke("git_reset", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, Error::AccessDenied(_)));
    }

    #[tokio::test]
    async fn invoke_rejects_tool_name_without_git_prefix() {
        let plugin = GitPlugin::new("git", PathBuf::from("."));
        let err = plugin.invoke("status", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, Error::MethodNotFound { .. }));
    }

    #[tokio::test]
    async fn init_fails_when_path_is_not_a_repo() {
        let plugin = GitPlugin::new("git", std::env::temp_dir());
        let err = plugin.init().await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn allowed_subcommands_cover_the_eight_required_operations() {
        for required in ["status", "diff", "add", "commit", "push", "pull", "branch", "log"] {
            assert!(ALLOWED_SUBCOMMANDS.contains(&required));
        }
    }

    #[tokio::test]
    async fn capabilities_are_named_with_git_prefix() {
        let plugin = GitPlugin::new("git", PathBuf::from("."));
        let caps = plugin.capabilities().await.unwrap();
        assert!(caps.iter().any(|c| c.name == "git_commit"));
        assert!(caps.iter().any(|c| c.name == "git_push"));
    }
}
