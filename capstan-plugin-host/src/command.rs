//! Command registry
//!
//! Maps `(plugin, command name)` to the callback entry point and the
//! privilege/input contract the dispatcher enforces before invoking it.
//! Names collide freely across plugins; within one plugin the namespace
//! is unique with last-write-wins overwrite semantics.

use crate::registry::PluginRegistry;
use capstan_plugin_api::{CommandHandler, PluginHandle};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Errors from command registration
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown plugin handle passed to init_command")]
    InvalidPlugin,

    #[error("command {0:?} is not declared in the plugin's capability table")]
    NotDeclared(String),

    #[error("plugin is not granted the privilege to register needs_root commands")]
    PrivilegeNotGranted,
}

/// One registered command. Callback and flags are immutable once
/// registered; re-registration replaces the whole entry.
#[derive(Clone)]
pub struct Command {
    pub(crate) handler: Arc<dyn CommandHandler>,
    pub(crate) needs_root: bool,
    pub(crate) takes_input: bool,
}

impl Command {
    pub fn needs_root(&self) -> bool {
        self.needs_root
    }

    pub fn takes_input(&self) -> bool {
        self.takes_input
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("needs_root", &self.needs_root)
            .field("takes_input", &self.takes_input)
            .finish()
    }
}

/// A thread-safe registry of dispatchable commands.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    inner: RwLock<HashMap<(PluginHandle, String), Command>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or overwrite a command for `plugin`.
    ///
    /// The handle is validated against the plugin registry and the
    /// registration is checked against the plugin's capability table
    /// before anything becomes visible. Overwrite is atomic: readers see
    /// either the old entry or the new one, never a half-updated state.
    pub fn init_command(
        &self,
        plugins: &PluginRegistry,
        plugin: PluginHandle,
        name: &str,
        handler: Arc<dyn CommandHandler>,
        needs_root: bool,
        takes_input: bool,
    ) -> Result<(), RegistryError> {
        let info = plugins.resolve(plugin).ok_or(RegistryError::InvalidPlugin)?;

        if !info.capabilities.allows_command(name) {
            return Err(RegistryError::NotDeclared(name.to_string()));
        }
        if needs_root && !info.capabilities.allows_privileged() {
            return Err(RegistryError::PrivilegeNotGranted);
        }

        let command = Command {
            handler,
            needs_root,
            takes_input,
        };

        let replaced = self
            .inner
            .write()
            .unwrap()
            .insert((plugin, name.to_string()), command)
            .is_some();

        tracing::info!(
            plugin = %info.name,
            command = %name,
            needs_root,
            takes_input,
            replaced,
            "Command registered"
        );
        Ok(())
    }

    /// Pure read used by the dispatcher. Name comparison is exact
    /// byte-equality.
    pub fn lookup(&self, plugin: PluginHandle, name: &str) -> Option<Command> {
        self.inner
            .read()
            .unwrap()
            .get(&(plugin, name.to_string()))
            .cloned()
    }

    /// Command names registered by one plugin, for diagnostics.
    pub fn commands_of(&self, plugin: PluginHandle) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .read()
            .unwrap()
            .keys()
            .filter(|(owner, _)| *owner == plugin)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Total number of registered commands across all plugins.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }
}
