//! Plugin manager: lifecycle, hot-reload, and the built-in in-process providers.

mod editor;
mod git;
mod memory;
pub mod watcher;

pub use editor::EditorPlugin;
pub use git::GitPlugin;
pub use memory::MemoryPlugin;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use gateway_core::CapabilityDescriptor;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::registry::{ProviderOrigin, ServiceRegistry};
use crate::{Error, Result};

/// Health of a single plugin instance, as reported by [`Plugin::health_check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginHealth {
    /// Fully operational.
    Healthy,
    /// Operational but degraded (reason included).
    Degraded(String),
    /// Not operational (reason included).
    Unhealthy(String),
}

/// The lifecycle contract every built-in (and, in principle, external)
/// provider implements: init once, start/stop around availability, report
/// health and capabilities, and invoke a named tool.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Stable plugin id, used as its provider id in the registry.
    fn id(&self) -> &str;

    /// One-time setup (e.g. open on-disk state). Called before the first `start`.
    async fn init(&self) -> Result<()>;

    /// Make the plugin ready to serve `invoke` calls.
    async fn start(&self) -> Result<()>;

    /// Stop serving `invoke` calls, releasing any held resources.
    async fn stop(&self) -> Result<()>;

    /// Current health.
    async fn health_check(&self) -> PluginHealth;

    /// Capabilities currently offered.
    async fn capabilities(&self) -> Result<Vec<CapabilityDescriptor>>;

    /// Invoke a tool by its bare (unaddressed) name.
    async fn invoke(&self, tool: &str, args: Value) -> Result<Value>;

    /// Plugin implementation version, surfaced for diagnostics.
    fn version(&self) -> &str;
}

/// The steps a hot-reload passes through. Exposed for logging/testing; the
/// manager drives them internally via [`PluginManager::reload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadStep {
    /// Stop admitting new invocations while in-flight calls drain.
    Quiesce,
    /// Call [`Plugin::stop`] on the old instance.
    Stop,
    /// Call [`Plugin::init`] on the new instance.
    Init,
    /// Call [`Plugin::start`] on the new instance.
    Start,
    /// Diff old vs new capability sets and update the registry.
    CapabilityDiff,
    /// Replace the manager's live reference.
    Swap,
    /// Confirm the new instance reports [`PluginHealth::Healthy`] or `Degraded`.
    Verify,
}

/// What kind of lifecycle change a [`PluginOperation`] records. Today the
/// manager only drives `Reload`; `Upgrade`/`Downgrade` are distinguished by
/// version comparison for callers that want to log or display them
/// differently, though both currently run the same step sequence as `Reload`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    /// Same plugin, same version, swapped for a fresh instance.
    Reload,
    /// Swapped for a newer version.
    Upgrade,
    /// Swapped for an older version.
    Downgrade,
}

/// Terminal and in-flight states of a [`PluginOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Steps are still being applied.
    Running,
    /// Completed and passed post-swap verification.
    Success,
    /// Aborted before the swap; the old instance was restored.
    Failed,
    /// Swapped, failed post-swap verification, and rolled back to the old instance.
    RolledBack,
}

/// A record of one hot-reload attempt: which steps it reached and how it
/// concluded. The manager archives a bounded history of these per instance
/// for diagnostics.
#[derive(Debug, Clone)]
pub struct PluginOperation {
    /// Operation id, unique within this manager instance.
    pub id: String,
    /// Id of the plugin being reloaded.
    pub plugin: String,
    /// Which kind of version change this operation represents.
    pub operation_type: OperationType,
    /// Steps reached so far, in order.
    pub steps: Vec<ReloadStep>,
    /// Current/terminal state.
    pub state: OperationState,
    /// Epoch-millisecond timestamp the operation started.
    pub started_at_epoch_ms: u64,
    /// Epoch-millisecond timestamp the operation reached a terminal state.
    pub finished_at_epoch_ms: Option<u64>,
}

impl PluginOperation {
    fn new(id: String, plugin: String, operation_type: OperationType) -> Self {
        Self {
            id,
            plugin,
            operation_type,
            steps: Vec::new(),
            state: OperationState::Running,
            started_at_epoch_ms: epoch_millis_now(),
            finished_at_epoch_ms: None,
        }
    }

    fn step(&mut self, step: ReloadStep) {
        self.steps.push(step);
    }

    fn finish(&mut self, state: OperationState) {
        self.state = state;
        self.finished_at_epoch_ms = Some(epoch_millis_now());
    }
}

fn epoch_millis_now() -> u64 {
    #[allow(clippy::cast_possible_truncation)]
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Manages the set of live plugins and drives their hot-reload state machine.
pub struct PluginManager {
    plugins: RwLock<Vec<Arc<dyn Plugin>>>,
    registry: Arc<ServiceRegistry>,
    operations: RwLock<Vec<PluginOperation>>,
    next_operation_id: std::sync::atomic::AtomicU64,
}

impl PluginManager {
    /// How many past operations are kept per manager before the oldest are dropped.
    const OPERATION_HISTORY_LIMIT: usize = 100;
}

impl PluginManager {
    /// Build a manager bound to `registry`; plugins register their
    /// capabilities there on [`Self::load`].
    #[must_use]
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self {
            plugins: RwLock::new(Vec::new()),
            registry,
            operations: RwLock::new(Vec::new()),
            next_operation_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Init, start, and register a plugin for the first time.
    pub async fn load(&self, plugin: Arc<dyn Plugin>) -> Result<()> {
        plugin.init().await?;
        plugin.start().await?;
        let capabilities = plugin.capabilities().await?;
        self.registry
            .register(
                plugin.id(),
                format!("builtin:{}", plugin.id()),
                ProviderOrigin::Plugin,
                Some(plugin.version().to_string()),
                1,
                crate::circuit::CircuitBreakerConfig::default(),
                capabilities,
            )
            .await?;
        self.plugins.write().push(Arc::clone(&plugin));
        info!(plugin = %plugin.id(), "plugin loaded");
        Ok(())
    }

    /// Currently loaded plugin ids.
    #[must_use]
    pub fn plugin_ids(&self) -> Vec<String> {
        self.plugins.read().iter().map(|p| p.id().to_string()).collect()
    }

    /// Poll a loaded plugin's health directly, for the registry's health loop.
    pub async fn health_check(&self, id: &str) -> Option<PluginHealth> {
        let plugin = self.find(id)?;
        Some(plugin.health_check().await)
    }

    fn find(&self, id: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.read().iter().find(|p| p.id() == id).cloned()
    }

    /// Recent hot-reload operations, most recent last.
    #[must_use]
    pub fn operations(&self) -> Vec<PluginOperation> {
        self.operations.read().clone()
    }

    fn archive_operation(&self, operation: PluginOperation) {
        let mut operations = self.operations.write();
        operations.push(operation);
        let overflow = operations.len().saturating_sub(Self::OPERATION_HISTORY_LIMIT);
        if overflow > 0 {
            operations.drain(0..overflow);
        }
    }

    /// Invoke `tool` on the loaded plugin `id`, capturing the pointer at
    /// dispatch time so a concurrent hot-reload never invokes a half-swapped
    /// instance. A panic inside the plugin is caught and surfaced as
    /// [`Error::internal`], matching the propagation policy for provider calls.
    pub async fn invoke(&self, id: &str, tool: &str, args: Value) -> Result<Value> {
        let plugin = self.find(id).ok_or_else(|| Error::method_not_found(format!("no such plugin: {id}")))?;
        match AssertUnwindSafe(plugin.invoke(tool, args)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(Error::internal(format!("plugin {id} panicked during invoke"))),
        }
    }

    /// Hot-reload a loaded plugin in place: quiesce, stop the old instance,
    /// init/start `replacement`, diff capabilities into the registry, swap
    /// the live reference, then verify. On a post-swap health failure the
    /// old instance is restored and an error is returned.
    pub async fn reload(&self, id: &str, replacement: Arc<dyn Plugin>) -> Result<()> {
        self.run_reload(id, replacement, OperationType::Reload).await
    }

    /// Hot-reload `id` into `replacement`, recording the operation as an
    /// upgrade or downgrade rather than a plain reload, for callers that
    /// already know which version direction the swap goes.
    pub async fn change_version(&self, id: &str, replacement: Arc<dyn Plugin>, operation_type: OperationType) -> Result<()> {
        self.run_reload(id, replacement, operation_type).await
    }

    async fn run_reload(&self, id: &str, replacement: Arc<dyn Plugin>, operation_type: OperationType) -> Result<()> {
        let operation_id = format!("op-{}", self.next_operation_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed));
        let mut operation = PluginOperation::new(operation_id, id.to_string(), operation_type);

        let old = match self.find(id) {
            Some(old) => old,
            None => {
                operation.finish(OperationState::Failed);
                self.archive_operation(operation);
                return Err(Error::internal(format!("no such plugin: {id}")));
            }
        };

        operation.step(ReloadStep::Quiesce);
        info!(plugin = %id, step = ?ReloadStep::Quiesce, "hot-reload");
        // Quiescing a single in-process plugin means simply not accepting new
        // invoke() calls against it while the swap completes; callers already
        // route through the registry, so removing it from `plugins` first
        // would race readers — instead we hold the write lock across the swap.

        operation.step(ReloadStep::Stop);
        info!(plugin = %id, step = ?ReloadStep::Stop, "hot-reload");
        if let Err(e) = old.stop().await {
            operation.finish(OperationState::Failed);
            self.archive_operation(operation);
            return Err(e);
        }

        operation.step(ReloadStep::Init);
        info!(plugin = %id, step = ?ReloadStep::Init, "hot-reload");
        if let Err(e) = replacement.init().await {
            warn!(plugin = %id, error = %e, "reload init failed, restoring old instance");
            old.start().await?;
            operation.finish(OperationState::Failed);
            self.archive_operation(operation);
            return Err(e);
        }

        operation.step(ReloadStep::Start);
        info!(plugin = %id, step = ?ReloadStep::Start, "hot-reload");
        if let Err(e) = replacement.start().await {
            warn!(plugin = %id, error = %e, "reload start failed, restoring old instance");
            old.start().await?;
            operation.finish(OperationState::Failed);
            self.archive_operation(operation);
            return Err(e);
        }

        operation.step(ReloadStep::CapabilityDiff);
        info!(plugin = %id, step = ?ReloadStep::CapabilityDiff, "hot-reload");
        let new_capabilities = match replacement.capabilities().await {
            Ok(caps) => caps,
            Err(e) => {
                warn!(plugin = %id, error = %e, "reload capability listing failed, restoring old instance");
                let _ = replacement.stop().await;
                old.start().await?;
                operation.finish(OperationState::Failed);
                self.archive_operation(operation);
                return Err(e);
            }
        };

        operation.step(ReloadStep::Swap);
        info!(plugin = %id, step = ?ReloadStep::Swap, "hot-reload");
        {
            let mut plugins = self.plugins.write();
            if let Some(slot) = plugins.iter_mut().find(|p| p.id() == id) {
                *slot = Arc::clone(&replacement);
            }
        }
        self.registry.update_capabilities(id, new_capabilities);

        operation.step(ReloadStep::Verify);
        info!(plugin = %id, step = ?ReloadStep::Verify, "hot-reload");
        match replacement.health_check().await {
            PluginHealth::Unhealthy(reason) => {
                error!(plugin = %id, reason = %reason, "post-swap verify failed, rolling back");
                let result = self.rollback(id, old).await;
                operation.finish(OperationState::RolledBack);
                self.archive_operation(operation);
                result
            }
            _ => {
                info!(plugin = %id, "hot-reload complete");
                operation.finish(OperationState::Success);
                self.archive_operation(operation);
                Ok(())
            }
        }
    }

    async fn rollback(&self, id: &str, old: Arc<dyn Plugin>) -> Result<()> {
        old.start().await?;
        let capabilities = old.capabilities().await.unwrap_or_default();
        {
            let mut plugins = self.plugins.write();
            if let Some(slot) = plugins.iter_mut().find(|p| p.id() == id) {
                *slot = Arc::clone(&old);
            }
        }
        self.registry.update_capabilities(id, capabilities);
        Err(Error::internal(format!("hot-reload of {id} failed verification; rolled back")))
    }

    /// Stop every loaded plugin, e.g. during gateway shutdown.
    pub async fn stop_all(&self) {
        let plugins = self.plugins.read().clone();
        for plugin in plugins {
            if let Err(e) = plugin.stop().await {
                warn!(plugin = %plugin.id(), error = %e, "failed to stop plugin");
            }
        }
    }
}
