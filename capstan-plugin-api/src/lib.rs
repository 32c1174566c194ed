//! capstan-plugin-api: Shared types for the capstan plugin system
//!
//! This crate defines the contract between the host core and plugins:
//! handles, caller identity, capability tables, the command callback
//! trait, and response values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

pub mod response;

pub use response::{Header, Response};

/// API version for compatibility checking
pub const API_VERSION: u32 = 1;

/// Opaque identity minted by the host for a registered plugin.
///
/// Handles are strictly monotonically increasing and never reused within
/// a process lifetime. The raw value `0` is reserved as the null sentinel
/// at the C boundary and is never minted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginHandle(u64);

impl PluginHandle {
    /// Reconstruct a handle from its raw value. Returns `None` for the
    /// null sentinel.
    pub fn from_raw(raw: u64) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self(raw))
        }
    }

    /// The raw value, as passed across the C boundary.
    pub fn into_raw(self) -> u64 {
        self.0
    }

    pub(crate) fn from_value(value: u64) -> Self {
        Self(value)
    }
}

/// Mints plugin handles. Only the host's plugin registry should hold one.
#[derive(Debug)]
pub struct HandleMinter {
    next: std::sync::atomic::AtomicU64,
}

impl Default for HandleMinter {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleMinter {
    pub fn new() -> Self {
        Self {
            // 0 is the null sentinel and must never be minted
            next: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Mint the next handle. Atomic: concurrent callers never observe the
    /// same freshly minted identity.
    pub fn mint(&self) -> PluginHandle {
        let value = self
            .next
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        PluginHandle::from_value(value)
    }
}

/// The identity on whose behalf a command invocation executes.
///
/// Modeled as a numeric uid; uid 0 is the privileged identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity(u32);

impl CallerIdentity {
    /// The privileged (root) identity.
    pub const ROOT: CallerIdentity = CallerIdentity(0);

    pub fn new(uid: u32) -> Self {
        Self(uid)
    }

    pub fn uid(&self) -> u32 {
        self.0
    }

    /// Whether this identity passes the `needs_root` gate.
    pub fn is_root(&self) -> bool {
        self.0 == 0
    }
}

/// The set of operations a plugin is permitted to expose.
///
/// An undeclared command set (the default) allows any command name,
/// mirroring the permissive empty-capabilities default. Declaring at
/// least one command restricts registration to the declared set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityTable {
    /// Whether the plugin may register `needs_root` commands
    #[serde(default)]
    privileged: bool,

    /// Declared command names; `None` means any name is allowed
    #[serde(default)]
    commands: Option<BTreeSet<String>>,
}

impl CapabilityTable {
    /// An unprivileged table allowing any command name.
    pub fn new() -> Self {
        Self::default()
    }

    /// A table granting everything, including privileged commands.
    pub fn permissive() -> Self {
        Self {
            privileged: true,
            commands: None,
        }
    }

    /// Grant registration of `needs_root` commands.
    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    /// Declare a command name the plugin intends to expose. The first
    /// declaration switches the table from allow-any to allow-listed.
    pub fn declare(mut self, name: impl Into<String>) -> Self {
        self.commands
            .get_or_insert_with(BTreeSet::new)
            .insert(name.into());
        self
    }

    /// Whether a command with this name may be registered.
    pub fn allows_command(&self, name: &str) -> bool {
        match &self.commands {
            Some(declared) => declared.contains(name),
            None => true,
        }
    }

    /// Whether `needs_root` commands may be registered.
    pub fn allows_privileged(&self) -> bool {
        self.privileged
    }
}

/// What a plugin presents at registration time: its API version and the
/// capability table the host will enforce for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerTable {
    /// API version for compatibility
    pub api_version: u32,

    /// Operations the plugin is permitted to expose
    pub capabilities: CapabilityTable,
}

impl HandlerTable {
    /// Create a handler table at the current API version.
    pub fn new(capabilities: CapabilityTable) -> Self {
        Self {
            api_version: API_VERSION,
            capabilities,
        }
    }
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new(CapabilityTable::new())
    }
}

/// The callback contract every registered command must satisfy.
///
/// Given the caller identity and the invocation input, produce an owned
/// output string or `None` to signal "no output". Implementations must
/// not retain the input buffer beyond the call and are trusted to be
/// total over their documented input domain; the dispatcher does not
/// catch faults.
pub trait CommandHandler: Send + Sync {
    fn call(&self, caller: CallerIdentity, input: Option<&[u8]>) -> Option<String>;
}

impl<F> CommandHandler for F
where
    F: Fn(CallerIdentity, Option<&[u8]>) -> Option<String> + Send + Sync,
{
    fn call(&self, caller: CallerIdentity, input: Option<&[u8]>) -> Option<String> {
        self(caller, input)
    }
}

/// Wrap a closure as a shareable command handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn CommandHandler>
where
    F: Fn(CallerIdentity, Option<&[u8]>) -> Option<String> + Send + Sync + 'static,
{
    Arc::new(f)
}
