//! The dispatch state machine
//!
//! Every invocation funnels through the same checkpoint sequence, so the
//! privilege and input gates are centralized and cannot be bypassed by an
//! individual command implementation. The dispatcher itself is stateless
//! across invocations; all state lives in the two registries.
//!
//! Checkpoints, in order:
//! `Received -> Resolved -> AuthorizationChecked -> InputValidated -> Executing -> Completed | Rejected`

use crate::audit::{AuditEvent, AuditEventType, AuditSink, NullAuditSink};
use crate::command::CommandRegistry;
use crate::registry::PluginRegistry;
use capstan_plugin_api::{CallerIdentity, PluginHandle};
use std::sync::Arc;
use thiserror::Error;

/// A structured rejection, reported back to the invocation's caller.
/// All variants are recoverable; none are fatal to the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("no such command for this plugin")]
    UnknownCommand,

    #[error("command requires the privileged identity")]
    PermissionDenied,

    #[error("command requires input but none was provided")]
    MissingInput,
}

/// Validates and executes command invocations.
///
/// Callbacks are trusted to be total over their documented input domain;
/// a callback fault is a fatal defect in plugin code and is deliberately
/// not caught here. The registries stay consistent regardless, since the
/// callback runs outside any lock.
#[derive(Clone)]
pub struct Dispatcher {
    plugins: Arc<PluginRegistry>,
    commands: Arc<CommandRegistry>,
    audit: Arc<dyn AuditSink>,
}

impl Dispatcher {
    pub fn new(plugins: Arc<PluginRegistry>, commands: Arc<CommandRegistry>) -> Self {
        Self::with_audit(plugins, commands, Arc::new(NullAuditSink))
    }

    pub fn with_audit(
        plugins: Arc<PluginRegistry>,
        commands: Arc<CommandRegistry>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            plugins,
            commands,
            audit,
        }
    }

    /// Run one invocation through the checkpoint sequence.
    ///
    /// On success the callback's output passes through uninterpreted;
    /// `None` means the command produced no output.
    pub fn dispatch(
        &self,
        plugin: PluginHandle,
        command: &str,
        caller: CallerIdentity,
        input: Option<&[u8]>,
    ) -> Result<Option<String>, DispatchError> {
        // Diagnostic label only; an unresolvable handle falls out at the
        // command lookup below since nothing can be registered under it.
        let plugin_name = self
            .plugins
            .resolve(plugin)
            .map(|info| info.name.to_string())
            .unwrap_or_else(|| format!("#{}", plugin.into_raw()));

        // 1. Received -> Resolved
        let entry = match self.commands.lookup(plugin, command) {
            Some(entry) => entry,
            None => {
                return Err(self.reject(
                    &plugin_name,
                    command,
                    caller,
                    DispatchError::UnknownCommand,
                ));
            }
        };

        // 2. Resolved -> AuthorizationChecked. The sole privilege gate:
        // callbacks are never trusted to re-check.
        if entry.needs_root && !caller.is_root() {
            return Err(self.reject(
                &plugin_name,
                command,
                caller,
                DispatchError::PermissionDenied,
            ));
        }

        // 3. AuthorizationChecked -> InputValidated. Strict only on
        // missing required input; extra input on a no-input command is
        // ignored, and a present zero-length buffer satisfies the gate.
        if entry.takes_input && input.is_none() {
            return Err(self.reject(&plugin_name, command, caller, DispatchError::MissingInput));
        }

        // 4. InputValidated -> Executing -> Completed
        let output = entry.handler.call(caller, input);

        tracing::debug!(
            plugin = %plugin_name,
            command = %command,
            caller = caller.uid(),
            has_output = output.is_some(),
            "Command invoked"
        );
        self.record(
            AuditEvent::new(AuditEventType::CommandInvoked, &plugin_name)
                .with_command(command)
                .with_caller(caller),
        );

        Ok(output)
    }

    fn reject(
        &self,
        plugin: &str,
        command: &str,
        caller: CallerIdentity,
        error: DispatchError,
    ) -> DispatchError {
        tracing::warn!(
            plugin = %plugin,
            command = %command,
            caller = caller.uid(),
            %error,
            "Dispatch rejected"
        );
        self.record(
            AuditEvent::new(AuditEventType::DispatchRejected, plugin)
                .with_command(command)
                .with_caller(caller)
                .with_detail(error.to_string()),
        );
        error
    }

    fn record(&self, event: AuditEvent) {
        if let Err(error) = self.audit.record(event) {
            tracing::warn!(%error, "Audit sink failed to record event");
        }
    }
}
