//! Host facade
//!
//! Bundles the two registries, the dispatcher, and an audit sink behind
//! the operations the boundary exposes. The transport layer drives this
//! type directly; the C boundary (`ffi`) wraps a process-global one.

use crate::audit::{AuditEvent, AuditEventType, AuditSink, NullAuditSink};
use crate::command::{CommandRegistry, RegistryError};
use crate::dispatch::{DispatchError, Dispatcher};
use crate::registry::{PluginRegistry, RegistrationError};
use capstan_plugin_api::{CallerIdentity, CommandHandler, HandlerTable, PluginHandle};
use std::sync::Arc;

/// The capability-mediation core, assembled.
pub struct Host {
    plugins: Arc<PluginRegistry>,
    commands: Arc<CommandRegistry>,
    dispatcher: Dispatcher,
    audit: Arc<dyn AuditSink>,
}

impl Host {
    pub fn new() -> Self {
        Self::with_audit(Arc::new(NullAuditSink))
    }

    pub fn with_audit(audit: Arc<dyn AuditSink>) -> Self {
        let plugins = Arc::new(PluginRegistry::new());
        let commands = Arc::new(CommandRegistry::new());
        let dispatcher = Dispatcher::with_audit(
            Arc::clone(&plugins),
            Arc::clone(&commands),
            Arc::clone(&audit),
        );
        Self {
            plugins,
            commands,
            dispatcher,
            audit,
        }
    }

    /// Mint an identity for a plugin presenting `table`.
    pub fn register_plugin(
        &self,
        name: &str,
        table: HandlerTable,
    ) -> Result<PluginHandle, RegistrationError> {
        match self.plugins.register(name, table) {
            Ok(handle) => {
                self.record(AuditEvent::new(AuditEventType::PluginRegistered, name));
                Ok(handle)
            }
            Err(error) => {
                tracing::warn!(plugin = %name, %error, "Plugin registration rejected");
                self.record(
                    AuditEvent::new(AuditEventType::RegistrationRejected, name)
                        .with_detail(error.to_string()),
                );
                Err(error)
            }
        }
    }

    /// Register or overwrite a command for a plugin.
    pub fn init_command(
        &self,
        plugin: PluginHandle,
        name: &str,
        handler: Arc<dyn CommandHandler>,
        needs_root: bool,
        takes_input: bool,
    ) -> Result<(), RegistryError> {
        let plugin_name = self
            .plugins
            .resolve(plugin)
            .map(|info| info.name.to_string())
            .unwrap_or_else(|| format!("#{}", plugin.into_raw()));

        match self.commands.init_command(
            &self.plugins,
            plugin,
            name,
            handler,
            needs_root,
            takes_input,
        ) {
            Ok(()) => {
                self.record(
                    AuditEvent::new(AuditEventType::CommandRegistered, &plugin_name)
                        .with_command(name),
                );
                Ok(())
            }
            Err(error) => {
                tracing::warn!(
                    plugin = %plugin_name,
                    command = %name,
                    %error,
                    "Command registration rejected"
                );
                self.record(
                    AuditEvent::new(AuditEventType::CommandRejected, &plugin_name)
                        .with_command(name)
                        .with_detail(error.to_string()),
                );
                Err(error)
            }
        }
    }

    /// Validate and execute one invocation.
    pub fn dispatch(
        &self,
        plugin: PluginHandle,
        command: &str,
        caller: CallerIdentity,
        input: Option<&[u8]>,
    ) -> Result<Option<String>, DispatchError> {
        self.dispatcher.dispatch(plugin, command, caller, input)
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    fn record(&self, event: AuditEvent) {
        if let Err(error) = self.audit.record(event) {
            tracing::warn!(%error, "Audit sink failed to record event");
        }
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::new()
    }
}
