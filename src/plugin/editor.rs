//! Built-in plugin for filesystem read/write access scoped to a base
//! directory, with allow/deny glob-like prefix lists enforced after path
//! canonicalization so `..` traversal and symlink escapes cannot bypass them.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use gateway_core::{CapabilityDescriptor, CapabilityKind};
use serde_json::Value;

use super::{Plugin, PluginHealth};
use crate::{Error, Result};

/// Default cap on file size `read`/`write` will operate on, if the caller
/// doesn't configure one explicitly.
const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Filesystem access plugin exposed as `editor.read` / `editor.write` / `editor.list`.
pub struct EditorPlugin {
    id: String,
    base_path: PathBuf,
    /// File extensions (without the leading dot) that are permitted; empty means "all".
    allow: Vec<String>,
    /// Path prefixes that are always rejected, checked after `allow`.
    deny: Vec<String>,
    /// Maximum file size, in bytes, `read`/`write` will operate on.
    max_file_size: u64,
}

impl EditorPlugin {
    /// Build a plugin scoped to `base_path`.
    #[must_use]
    pub fn new(id: impl Into<String>, base_path: PathBuf, allow: Vec<String>, deny: Vec<String>) -> Self {
        Self {
            id: id.into(),
            base_path,
            allow,
            deny,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }

    /// Override the max file size (default 10 MiB).
    #[must_use]
    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let candidate = self.base_path.join(relative);
        let canonical_base = self
            .base_path
            .canonicalize()
            .map_err(|e| Error::Config(format!("editor base path is invalid: {e}")))?;

        // The target need not exist yet (writes create new files), so we
        // canonicalize the nearest existing ancestor and re-append the tail.
        let canonical = canonicalize_with_missing_tail(&candidate)?;

        if !canonical.starts_with(&canonical_base) {
            return Err(Error::AccessDenied(format!("{relative} escapes the editor base path")));
        }

        let rel = canonical
            .strip_prefix(&canonical_base)
            .unwrap_or(&canonical)
            .to_string_lossy()
            .replace('\\', "/");

        if !self.allow.is_empty() {
            let extension = canonical.extension().and_then(|e| e.to_str()).unwrap_or("");
            if !self.allow.iter().any(|ext| ext.eq_ignore_ascii_case(extension)) {
                return Err(Error::AccessDenied(format!("{relative} has an extension that is not allowed")));
            }
        }
        if self.deny.iter().any(|p| rel.starts_with(p.as_str())) {
            return Err(Error::AccessDenied(format!("{relative} is under a denied path")));
        }

        Ok(candidate)
    }
}

fn canonicalize_with_missing_tail(path: &Path) -> Result<PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }
    let parent = path.parent().ok_or_else(|| Error::Config("path has no parent".to_string()))?;
    let file_name = path.file_name().ok_or_else(|| Error::Config("path has no file name".to_string()))?;
    let canonical_parent = canonicalize_with_missing_tail(parent)?;
    Ok(canonical_parent.join(file_name))
}

#[async_trait]
impl Plugin for EditorPlugin {
    fn id(&self) -> &str {
        &self.id
    }

    async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_path).await?;
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> PluginHealth {
        if self.base_path.exists() {
            PluginHealth::Healthy
        } else {
            PluginHealth::Unhealthy("base path no longer exists".to_string())
        }
    }

    async fn capabilities(&self) -> Result<Vec<CapabilityDescriptor>> {
        let path_schema = serde_json::json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path"],
        });
        Ok(vec![
            CapabilityDescriptor {
                name: "read".to_string(),
                kind: CapabilityKind::Tool,
                input_schema: Some(path_schema.clone()),
                output_hint: None,
                version: Some("1.0.0".to_string()),
                tags: vec!["editor".to_string()],
                description: None,
            },
            CapabilityDescriptor {
                name: "write".to_string(),
                kind: CapabilityKind::Tool,
                input_schema: Some(serde_json::json!({
                    "type": "object",
                    "properties": {"path": {"type": "string"}, "content": {"type": "string"}},
                    "required": ["path", "content"],
                })),
                output_hint: None,
                version: Some("1.0.0".to_string()),
                tags: vec!["editor".to_string()],
                description: None,
            },
            CapabilityDescriptor {
                name: "list".to_string(),
                kind: CapabilityKind::Tool,
                input_schema: Some(path_schema),
                output_hint: None,
                version: Some("1.0.0".to_string()),
                tags: vec!["editor".to_string()],
                description: None,
            },
        ])
    }

    async fn invoke(&self, tool: &str, args: Value) -> Result<Value> {
        let path_arg = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_params("missing required field 'path'"))?;

        match tool {
            "read" => {
                let path = self.resolve(path_arg)?;
                let metadata = tokio::fs::metadata(&path).await?;
                if metadata.len() > self.max_file_size {
                    return Err(Error::invalid_params(format!(
                        "{path_arg} is {} bytes, exceeding the {} byte limit",
                        metadata.len(),
                        self.max_file_size
                    )));
                }
                let content = tokio::fs::read_to_string(&path).await?;
                Ok(Value::String(content))
            }
            "write" => {
                let content = args
                    .get("content")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::invalid_params("missing required field 'content'"))?;
                if content.len() as u64 > self.max_file_size {
                    return Err(Error::invalid_params(format!(
                        "content is {} bytes, exceeding the {} byte limit",
                        content.len(),
                        self.max_file_size
                    )));
                }
                let path = self.resolve(path_arg)?;
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, content).await?;
                Ok(Value::Bool(true))
            }
            "list" => {
                let path = self.resolve(path_arg)?;
                let mut entries = tokio::fs::read_dir(&path).await?;
                let mut names = Vec::new();
                while let Some(entry) = entries.next_entry().await? {
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
                Ok(Value::Array(names.into_iter().map(Value::String).collect()))
            }
            other => Err(Error::method_not_found(format!("editor.{other}"))),
        }
    }

    fn version(&self) -> &str {
        "1.0.0"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mcp-gateway-editor-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let plugin = EditorPlugin::new("editor", tmp_dir(), vec![], vec![]);
        plugin.init().await.unwrap();
        plugin.invoke("write", serde_json::json!({"path": "notes.txt", "content": "hello"})).await.unwrap();
        let content = plugin.invoke("read", serde_json::json!({"path": "notes.txt"})).await.unwrap();
        assert_eq!(content, Value::String("hello".to_string()));
    }

    #[tokio::test]
    async fn path_traversal_outside_base_is_denied() {
        let plugin = EditorPlugin::new("editor", tmp_dir(), vec![], vec![]);
        plugin.init().await.unwrap();
        let err = plugin.invoke("read", serde_json::json!({"path": "../../etc/passwd"})).await.unwrap_err();
        assert!(matches!(err, Error::AccessDenied(_)));
    }

    #[tokio::test]
    async fn deny_list_blocks_matching_prefix() {
        let base = tmp_dir();
        std::fs::create_dir_all(base.join("secrets")).unwrap();
        let plugin = EditorPlugin::new("editor", base, vec![], vec!["secrets".to_string()]);
        plugin.init().await.unwrap();
        let err = plugin.invoke("write", serde_json::json!({"path": "secrets/key.txt", "content": "x"})).await.unwrap_err();
        assert!(matches!(err, Error::AccessDenied(_)));
    }

    #[tokio::test]
    async fn allow_list_restricts_to_named_extension() {
        let plugin = EditorPlugin::new("editor", tmp_dir(), vec!["md".to_string()], vec![]);
        plugin.init().await.unwrap();
        let err = plugin.invoke("write", serde_json::json!({"path": "notes.txt", "content": "x"})).await.unwrap_err();
        assert!(matches!(err, Error::AccessDenied(_)));
        plugin.invoke("write", serde_json::json!({"path": "notes.md", "content": "x"})).await.unwrap();
    }

    #[tokio::test]
    async fn write_rejects_content_over_max_file_size() {
        let plugin = EditorPlugin::new("editor", tmp_dir(), vec![], vec![]).with_max_file_size(4);
        plugin.init().await.unwrap();
        let err = plugin.invoke("write", serde_json::json!({"path": "big.txt", "content": "hello"})).await.unwrap_err();
        assert!(matches!(err, Error::InvalidParams { .. }));
    }

    #[tokio::test]
    async fn read_rejects_file_over_max_file_size() {
        let dir = tmp_dir();
        let writer = EditorPlugin::new("editor", dir.clone(), vec![], vec![]);
        writer.init().await.unwrap();
        writer.invoke("write", serde_json::json!({"path": "big.txt", "content": "hello"})).await.unwrap();

        let reader = EditorPlugin::new("editor", dir, vec![], vec![]).with_max_file_size(2);
        let err = reader.invoke("read", serde_json::json!({"path": "big.txt"})).await.unwrap_err();
        assert!(matches!(err, Error::InvalidParams { .. }));
    }

    #[tokio::test]
    async fn list_returns_directory_entries() {
        let plugin = EditorPlugin::new("editor", tmp_dir(), vec![], vec![]);
        plugin.init().await.unwrap();
        plugin.invoke("write", serde_json::json!({"path": "a.txt", "content": "1"})).await.unwrap();
        let listed = plugin.invoke("list", serde_json::json!({"path": "."})).await.unwrap();
        let names = listed.as_array().unwrap();
        assert!(names.iter().any(|n| n == "a.txt"));
    }
}
