//! Built-in key-value store plugin, persisted as a single JSON file with
//! atomic (write-temp-then-rename) replacement and a per-key mutex to
//! serialize concurrent writers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use gateway_core::{CapabilityDescriptor, CapabilityKind};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use super::{Plugin, PluginHealth};
use crate::{Error, Result};

/// Keys longer than this are rejected.
const MAX_KEY_BYTES: usize = 1024;
/// Values larger than this (serialized) are rejected.
const MAX_VALUE_BYTES: usize = 1024 * 1024;

/// In-process KV store exposed as `memory_store`/`memory_retrieve`/
/// `memory_list`/`memory_delete`/`memory_clear` tools and `memory://stats`/
/// `memory://dump` resources.
pub struct MemoryPlugin {
    id: String,
    path: PathBuf,
    data: RwLock<HashMap<String, Value>>,
    key_locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
    stores: AtomicU64,
    retrievals: AtomicU64,
    deletes: AtomicU64,
}

impl MemoryPlugin {
    /// Build a plugin persisting to `path` (created empty if absent).
    #[must_use]
    pub fn new(id: impl Into<String>, path: PathBuf) -> Self {
        Self {
            id: id.into(),
            path,
            data: RwLock::new(HashMap::new()),
            key_locks: RwLock::new(HashMap::new()),
            stores: AtomicU64::new(0),
            retrievals: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    async fn lock_for_key(&self, key: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.key_locks.read().await.get(key) {
            return Arc::clone(lock);
        }
        let mut locks = self.key_locks.write().await;
        Arc::clone(locks.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))))
    }

    async fn persist(&self) -> Result<()> {
        let snapshot = self.data.read().await.clone();
        let serialized = serde_json::to_vec_pretty(&snapshot)?;

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &serialized).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    fn check_key(key: &str) -> Result<()> {
        if key.len() > MAX_KEY_BYTES {
            return Err(Error::invalid_params(format!("key exceeds {MAX_KEY_BYTES} bytes")));
        }
        Ok(())
    }

    fn check_value(value: &Value) -> Result<()> {
        let size = serde_json::to_vec(value)?.len();
        if size > MAX_VALUE_BYTES {
            return Err(Error::invalid_params(format!("value exceeds {MAX_VALUE_BYTES} bytes")));
        }
        Ok(())
    }

    async fn store(&self, key: String, value: Value) -> Result<Value> {
        Self::check_key(&key)?;
        Self::check_value(&value)?;
        let _guard = self.lock_for_key(&key).await.lock_owned().await;
        self.data.write().await.insert(key, value);
        self.persist().await?;
        self.stores.fetch_add(1, Ordering::Relaxed);
        Ok(Value::Bool(true))
    }

    async fn retrieve(&self, key: &str) -> Result<Value> {
        self.retrievals.fetch_add(1, Ordering::Relaxed);
        Ok(self.data.read().await.get(key).cloned().unwrap_or(Value::Null))
    }

    async fn list(&self) -> Result<Value> {
        let mut keys: Vec<String> = self.data.read().await.keys().cloned().collect();
        keys.sort();
        Ok(serde_json::json!({ "keys": keys }))
    }

    async fn delete(&self, key: &str) -> Result<Value> {
        let _guard = self.lock_for_key(key).await.lock_owned().await;
        let existed = self.data.write().await.remove(key).is_some();
        if existed {
            self.persist().await?;
        }
        self.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(Value::Bool(existed))
    }

    async fn clear(&self) -> Result<Value> {
        let count = {
            let mut data = self.data.write().await;
            let count = data.len();
            data.clear();
            count
        };
        self.persist().await?;
        Ok(serde_json::json!({ "cleared": count }))
    }

    async fn stats(&self) -> Result<Value> {
        Ok(serde_json::json!({
            "keys": self.data.read().await.len(),
            "stores": self.stores.load(Ordering::Relaxed),
            "retrievals": self.retrievals.load(Ordering::Relaxed),
            "deletes": self.deletes.load(Ordering::Relaxed),
        }))
    }

    async fn dump(&self) -> Result<Value> {
        Ok(Value::Object(self.data.read().await.iter().map(|(k, v)| (k.clone(), v.clone())).collect()))
    }
}

#[async_trait]
impl Plugin for MemoryPlugin {
    fn id(&self) -> &str {
        &self.id
    }

    async fn init(&self) -> Result<()> {
        if self.path.exists() {
            let contents = tokio::fs::read(&self.path).await?;
            let loaded: HashMap<String, Value> = serde_json::from_slice(&contents)?;
            *self.data.write().await = loaded;
        }
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.persist().await
    }

    async fn health_check(&self) -> PluginHealth {
        PluginHealth::Healthy
    }

    async fn capabilities(&self) -> Result<Vec<CapabilityDescriptor>> {
        let tool = |name: &str, schema: Value| CapabilityDescriptor {
            name: name.to_string(),
            kind: CapabilityKind::Tool,
            input_schema: Some(schema),
            output_hint: None,
            version: Some("1.0.0".to_string()),
            tags: vec!["memory".to_string()],
            description: None,
        };
        let resource = |uri: &str, description: &str| CapabilityDescriptor {
            name: uri.to_string(),
            kind: CapabilityKind::Resource,
            input_schema: None,
            output_hint: None,
            version: Some("1.0.0".to_string()),
            tags: vec!["memory".to_string()],
            description: Some(description.to_string()),
        };
        Ok(vec![
            tool(
                "memory_store",
                serde_json::json!({"type": "object", "properties": {"key": {"type": "string"}, "value": {}}, "required": ["key", "value"]}),
            ),
            tool("memory_retrieve", serde_json::json!({"type": "object", "properties": {"key": {"type": "string"}}, "required": ["key"]})),
            tool("memory_list", serde_json::json!({"type": "object", "properties": {}})),
            tool("memory_delete", serde_json::json!({"type": "object", "properties": {"key": {"type": "string"}}, "required": ["key"]})),
            tool("memory_clear", serde_json::json!({"type": "object", "properties": {}})),
            resource("memory://stats", "Store statistics: key count and operation counters."),
            resource("memory://dump", "Full key-value snapshot."),
        ])
    }

    async fn invoke(&self, tool: &str, args: Value) -> Result<Value> {
        match tool {
            "memory_store" => {
                let key = args.get("key").and_then(Value::as_str).ok_or_else(|| Error::invalid_params("missing required field 'key'"))?.to_string();
                let value = args.get("value").cloned().ok_or_else(|| Error::invalid_params("missing required field 'value'"))?;
                self.store(key, value).await
            }
            "memory_retrieve" => {
                let key = args.get("key").and_then(Value::as_str).ok_or_else(|| Error::invalid_params("missing required field 'key'"))?;
                self.retrieve(key).await
            }
            "memory_list" => self.list().await,
            "memory_delete" => {
                let key = args.get("key").and_then(Value::as_str).ok_or_else(|| Error::invalid_params("missing required field 'key'"))?;
                self.delete(key).await
            }
            "memory_clear" => self.clear().await,
            "memory://stats" => self.stats().await,
            "memory://dump" => self.dump().await,
            other => Err(Error::method_not_found(format!("memory.{other}"))),
        }
    }

    fn version(&self) -> &str {
        "1.0.0"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_path() -> PathBuf {
        std::env::temp_dir().join(format!("mcp-gateway-memory-test-{}.json", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn store_then_retrieve_round_trips() {
        let plugin = MemoryPlugin::new("memory", tmp_path());
        plugin.init().await.unwrap();
        plugin.invoke("memory_store", serde_json::json!({"key": "a", "value": 42})).await.unwrap();
        let fetched = plugin.invoke("memory_retrieve", serde_json::json!({"key": "a"})).await.unwrap();
        assert_eq!(fetched, serde_json::json!(42));
    }

    #[tokio::test]
    async fn retrieve_missing_key_returns_null() {
        let plugin = MemoryPlugin::new("memory", tmp_path());
        plugin.init().await.unwrap();
        let fetched = plugin.invoke("memory_retrieve", serde_json::json!({"key": "ghost"})).await.unwrap();
        assert_eq!(fetched, Value::Null);
    }

    #[tokio::test]
    async fn list_returns_sorted_keys() {
        let plugin = MemoryPlugin::new("memory", tmp_path());
        plugin.init().await.unwrap();
        plugin.invoke("memory_store", serde_json::json!({"key": "b", "value": 1})).await.unwrap();
        plugin.invoke("memory_store", serde_json::json!({"key": "a", "value": 2})).await.unwrap();
        let result = plugin.invoke("memory_list", serde_json::json!({})).await.unwrap();
        assert_eq!(result["keys"], serde_json::json!(["a", "b"]));
    }

    #[tokio::test]
    async fn delete_reports_whether_key_existed() {
        let plugin = MemoryPlugin::new("memory", tmp_path());
        plugin.init().await.unwrap();
        plugin.invoke("memory_store", serde_json::json!({"key": "a", "value": 1})).await.unwrap();
        let first = plugin.invoke("memory_delete", serde_json::json!({"key": "a"})).await.unwrap();
        let second = plugin.invoke("memory_delete", serde_json::json!({"key": "a"})).await.unwrap();
        assert_eq!(first, Value::Bool(true));
        assert_eq!(second, Value::Bool(false));
    }

    #[tokio::test]
    async fn clear_removes_all_keys() {
        let plugin = MemoryPlugin::new("memory", tmp_path());
        plugin.init().await.unwrap();
        plugin.invoke("memory_store", serde_json::json!({"key": "a", "value": 1})).await.unwrap();
        plugin.invoke("memory_store", serde_json::json!({"key": "b", "value": 2})).await.unwrap();
        let result = plugin.invoke("memory_clear", serde_json::json!({})).await.unwrap();
        assert_eq!(result["cleared"], 2);
        let listed = plugin.invoke("memory_list", serde_json::json!({})).await.unwrap();
        assert_eq!(listed["keys"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn stats_resource_reports_counters() {
        let plugin = MemoryPlugin::new("memory", tmp_path());
        plugin.init().await.unwrap();
        plugin.invoke("memory_store", serde_json::json!({"key": "a", "value": 1})).await.unwrap();
        plugin.invoke("memory_retrieve", serde_json::json!({"key": "a"})).await.unwrap();
        let stats = plugin.invoke("memory://stats", serde_json::json!({})).await.unwrap();
        assert_eq!(stats["keys"], 1);
        assert_eq!(stats["stores"], 1);
        assert_eq!(stats["retrievals"], 1);
    }

    #[tokio::test]
    async fn dump_resource_returns_full_snapshot() {
        let plugin = MemoryPlugin::new("memory", tmp_path());
        plugin.init().await.unwrap();
        plugin.invoke("memory_store", serde_json::json!({"key": "a", "value": "x"})).await.unwrap();
        let dump = plugin.invoke("memory://dump", serde_json::json!({})).await.unwrap();
        assert_eq!(dump["a"], "x");
    }

    #[tokio::test]
    async fn store_rejects_oversized_value() {
        let plugin = MemoryPlugin::new("memory", tmp_path());
        plugin.init().await.unwrap();
        let big = Value::String("x".repeat(MAX_VALUE_BYTES + 1));
        let err = plugin.invoke("memory_store", serde_json::json!({"key": "a", "value": big})).await.unwrap_err();
        assert!(matches!(err, Error::InvalidParams { .. }));
    }

    #[tokio::test]
    async fn persisted_state_survives_reinit() {
        let path = tmp_path();
        let plugin = MemoryPlugin::new("memory", path.clone());
        plugin.init().await.unwrap();
        plugin.invoke("memory_store", serde_json::json!({"key": "a", "value": "persisted"})).await.unwrap();

        let reloaded = MemoryPlugin::new("memory", path);
        reloaded.init().await.unwrap();
        let fetched = reloaded.invoke("memory_retrieve", serde_json::json!({"key": "a"})).await.unwrap();
        assert_eq!(fetched, serde_json::json!("persisted"));
    }

    #[tokio::test]
    async fn invoke_missing_key_field_is_invalid_params() {
        let plugin = MemoryPlugin::new("memory", tmp_path());
        plugin.init().await.unwrap();
        let err = plugin.invoke("memory_retrieve", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, Error::InvalidParams { .. }));
    }

    #[tokio::test]
    async fn capabilities_lists_five_tools_and_two_resources() {
        let plugin = MemoryPlugin::new("memory", tmp_path());
        let caps = plugin.capabilities().await.unwrap();
        assert_eq!(caps.iter().filter(|c| c.kind == CapabilityKind::Tool).count(), 5);
        assert_eq!(caps.iter().filter(|c| c.kind == CapabilityKind::Resource).count(), 2);
    }
}
