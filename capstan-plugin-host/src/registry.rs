//! Plugin registry
//!
//! Tracks registered plugins and the capability table the host enforces
//! for each of them. This is the identity anchor the command registry
//! keys against: a handle that does not resolve here is never trusted.

use capstan_plugin_api::{CapabilityTable, HandleMinter, HandlerTable, PluginHandle, API_VERSION};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Registration failure surfaced to the boundary as the null handle.
///
/// The observed surface does not distinguish failure causes, so this is
/// a single generic error; the cause lives in the message and the audit
/// trail.
#[derive(Debug, Error)]
#[error("plugin registration failed: {reason}")]
pub struct RegistrationError {
    pub reason: String,
}

/// A snapshot of one registered plugin, safe to hold outside the lock.
#[derive(Debug, Clone)]
pub struct PluginInfo {
    pub handle: PluginHandle,
    pub name: Arc<str>,
    pub capabilities: CapabilityTable,
}

/// A thread-safe registry of plugin identities.
///
/// Registration happens at load time (rare writes); handle resolution
/// happens on every dispatch (frequent reads), so lookups take the read
/// side of the lock and never block each other.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    inner: RwLock<HashMap<PluginHandle, PluginInfo>>,
    minter: HandleMinter,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a new identity for `name` and store its capability table.
    ///
    /// Fails only on an API version mismatch in the presented handler
    /// table; identity minting itself always succeeds. The name is kept
    /// for diagnostics and is not required to be unique.
    pub fn register(
        &self,
        name: &str,
        table: HandlerTable,
    ) -> Result<PluginHandle, RegistrationError> {
        if table.api_version != API_VERSION {
            return Err(RegistrationError {
                reason: format!(
                    "API version mismatch: expected {}, got {}",
                    API_VERSION, table.api_version
                ),
            });
        }

        let handle = self.minter.mint();
        let info = PluginInfo {
            handle,
            name: Arc::from(name),
            capabilities: table.capabilities,
        };

        // A registration in progress is never observable half-done: the
        // entry appears atomically under the write lock.
        self.inner.write().unwrap().insert(handle, info);

        tracing::info!(plugin = %name, handle = handle.into_raw(), "Plugin registered");
        Ok(handle)
    }

    /// Validate a handle before trusting it. Returns a snapshot so the
    /// caller holds no lock while using it.
    pub fn resolve(&self, handle: PluginHandle) -> Option<PluginInfo> {
        self.inner.read().unwrap().get(&handle).cloned()
    }

    /// Number of registered plugins.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }
}
