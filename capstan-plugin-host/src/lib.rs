//! capstan-plugin-host: command dispatch and capability mediation core
//!
//! This crate is the heart of the capstan plugin host: plugins register
//! an identity and named commands against it, and every invocation is
//! funneled through a single dispatcher that enforces the privilege and
//! input contracts before any callback runs. Socket I/O and response
//! construction are brokered so plugins never touch raw OS resources.
//!
//! Plugin loading, transports, and wire encoding live outside this
//! crate; they drive it through [`Host`] or the C boundary in [`ffi`].

pub mod audit;
pub mod command;
pub mod dispatch;
#[cfg(unix)]
pub mod ffi;
pub mod host;
pub mod registry;
pub mod socket;

pub use command::{Command, CommandRegistry, RegistryError};
pub use dispatch::{DispatchError, Dispatcher};
pub use host::Host;
pub use registry::{PluginInfo, PluginRegistry, RegistrationError};
pub use socket::{ByteStream, SocketError, SocketHandle};

pub use capstan_plugin_api::{
    handler_fn, CallerIdentity, CapabilityTable, CommandHandler, HandlerTable, Header,
    PluginHandle, Response, API_VERSION,
};
