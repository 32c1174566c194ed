//! C ABI boundary
//!
//! The flat `extern "C"` surface plugins link against. Internally every
//! operation uses discriminated results; this layer alone speaks the
//! sentinel conventions of the boundary: a null handle (`0`) for failed
//! registration, negative byte counts for socket failures, and a null
//! pointer for "no output" from a callback.
//!
//! Output strings returned by plugin callbacks are owned by the plugin's
//! allocator and are released here with `libc::free`, so plugins must
//! allocate them with `malloc` (or a compatible allocator).

use crate::host::Host;
use crate::socket::{SocketError, SocketHandle};
use capstan_plugin_api::{
    CallerIdentity, CapabilityTable, CommandHandler, HandlerTable, Header, PluginHandle, Response,
};
use libc::{c_char, c_void, uid_t};
use std::ffi::{CStr, CString};
use std::sync::{Arc, OnceLock};

/// Generic I/O failure sentinel for `write_socket` / `read_socket`
pub const SENTINEL_IO_ERROR: isize = -1;

/// Use-after-close (invalid handle) sentinel
pub const SENTINEL_INVALID_HANDLE: isize = -2;

/// The callback entry-point shape every registered command satisfies:
/// (caller uid, input buffer, input length) -> owned nul-terminated
/// output string, or null for "no output".
pub type RawCallback = unsafe extern "C" fn(uid_t, *const c_char, usize) -> *const c_char;

/// C view of a header pair
#[repr(C)]
pub struct RawHeader {
    pub key: *const c_char,
    pub value: *const c_char,
}

/// C view of the handler table a plugin presents at registration
#[repr(C)]
pub struct RawHandlerTable {
    pub api_version: u32,
    pub privileged: bool,
}

/// The process-global host. Initialized at first registration, lives
/// until process teardown; there is no reset operation.
static HOST: OnceLock<Host> = OnceLock::new();

/// Access the process-global host. The transport layer uses this to
/// dispatch invocations against plugins registered through the C
/// boundary.
pub fn host() -> &'static Host {
    HOST.get_or_init(Host::default)
}

/// Adapts a C callback pointer into the internal capability value. The
/// dispatcher is the only caller, so the checkpoint sequence has always
/// run by the time the raw pointer is invoked.
struct CCallback(RawCallback);

impl CommandHandler for CCallback {
    fn call(&self, caller: CallerIdentity, input: Option<&[u8]>) -> Option<String> {
        // Interior nul bytes cannot cross the boundary; filter them the
        // way the input is documented to be treated.
        let bytes: Vec<u8> = input
            .unwrap_or_default()
            .iter()
            .copied()
            .filter(|&b| b != 0)
            .collect();
        let len = bytes.len();
        let c_input = CString::new(bytes).ok()?;

        // SAFETY: the callback contract is (uid, buffer, length) with the
        // buffer valid for the duration of the call only.
        let out_ptr = unsafe { (self.0)(caller.uid(), c_input.as_ptr(), len) };
        if out_ptr.is_null() {
            return None;
        }

        // SAFETY: a non-null return is an owned, nul-terminated string
        // that the host releases exactly once.
        let out = unsafe { CStr::from_ptr(out_ptr) }
            .to_string_lossy()
            .into_owned();
        unsafe { libc::free(out_ptr as *mut c_void) };

        Some(out)
    }
}

/// Mint an identity for a plugin.
///
/// Returns the new handle, or `0` on failure (null/invalid name, or an
/// unacceptable handler table). A null `table` is accepted and treated
/// as an unprivileged table allowing any command name.
///
/// # Safety
/// `name` must be null or a valid nul-terminated string; `table` must be
/// null or point to a valid `RawHandlerTable`.
#[no_mangle]
pub unsafe extern "C" fn register_plugin(
    name: *const c_char,
    table: *const RawHandlerTable,
) -> u64 {
    if name.is_null() {
        tracing::error!("register_plugin: null name pointer");
        return 0;
    }
    let name = match CStr::from_ptr(name).to_str() {
        Ok(s) => s,
        Err(error) => {
            tracing::error!(%error, "register_plugin: name is not valid UTF-8");
            return 0;
        }
    };

    let table = if table.is_null() {
        HandlerTable::default()
    } else {
        let raw = &*table;
        let capabilities = if raw.privileged {
            CapabilityTable::new().privileged()
        } else {
            CapabilityTable::new()
        };
        HandlerTable {
            api_version: raw.api_version,
            capabilities,
        }
    };

    match host().register_plugin(name, table) {
        Ok(handle) => handle.into_raw(),
        Err(_) => 0,
    }
}

/// Register or overwrite a command for a plugin.
///
/// Failures (null pointers, unknown handle, capability violations) are
/// logged and audited, never fatal; the observed surface gives this
/// operation no return channel.
///
/// # Safety
/// `name` must be null or a valid nul-terminated string; `plugin` must
/// be a value previously returned by `register_plugin`.
#[no_mangle]
pub unsafe extern "C" fn init_command(
    plugin: u64,
    name: *const c_char,
    function: Option<RawCallback>,
    needs_root: bool,
    takes_input: bool,
) {
    if name.is_null() {
        tracing::error!("init_command: null name pointer");
        return;
    }
    let Some(function) = function else {
        tracing::error!("init_command: null callback pointer");
        return;
    };
    let name = match CStr::from_ptr(name).to_str() {
        Ok(s) => s,
        Err(error) => {
            tracing::error!(%error, "init_command: name is not valid UTF-8");
            return;
        }
    };
    let Some(plugin) = PluginHandle::from_raw(plugin) else {
        tracing::error!(command = %name, "init_command: null plugin handle");
        return;
    };

    // Rejections are logged and audited by the host
    let _ = host().init_command(
        plugin,
        name,
        Arc::new(CCallback(function)),
        needs_root,
        takes_input,
    );
}

/// Write up to `len` bytes to the socket.
///
/// Returns the number of bytes written (a short write is legal and must
/// be retried with the remainder), `-1` on I/O failure, `-2` if the
/// handle is null or already closed.
///
/// # Safety
/// `socket` must be null or a live `SocketHandle` owned by the current
/// invocation; `data` must be null or valid for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn write_socket(
    socket: *mut SocketHandle,
    data: *const c_char,
    len: usize,
) -> isize {
    if socket.is_null() {
        return SENTINEL_INVALID_HANDLE;
    }
    if data.is_null() && len > 0 {
        return SENTINEL_IO_ERROR;
    }
    let buf = if len == 0 {
        &[][..]
    } else {
        std::slice::from_raw_parts(data as *const u8, len)
    };
    match (*socket).write(buf) {
        Ok(written) => written as isize,
        Err(error) => sentinel_for(error),
    }
}

/// Read up to `len` bytes from the socket.
///
/// Returns the number of bytes read, `0` for orderly end-of-stream,
/// `-1` on I/O failure, `-2` if the handle is null or already closed.
/// A zero return must never be confused with an error.
///
/// # Safety
/// `socket` must be null or a live `SocketHandle` owned by the current
/// invocation; `buf` must be null or valid for `len` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn read_socket(
    socket: *mut SocketHandle,
    buf: *mut c_char,
    len: usize,
) -> isize {
    if socket.is_null() {
        return SENTINEL_INVALID_HANDLE;
    }
    if buf.is_null() && len > 0 {
        return SENTINEL_IO_ERROR;
    }
    let buf = if len == 0 {
        &mut [][..]
    } else {
        std::slice::from_raw_parts_mut(buf as *mut u8, len)
    };
    match (*socket).read(buf) {
        Ok(read) => read as isize,
        Err(error) => sentinel_for(error),
    }
}

/// Release the socket handle. Idempotent; a null handle is ignored.
///
/// # Safety
/// `socket` must be null or a live `SocketHandle` owned by the current
/// invocation.
#[no_mangle]
pub unsafe extern "C" fn close_socket(socket: *mut SocketHandle) {
    if socket.is_null() {
        return;
    }
    (*socket).close();
}

/// Build an opaque response value from status, headers, and body.
///
/// Header order is preserved verbatim; the body is copied, so the
/// caller's buffers may be reused immediately. Returns null only when a
/// required pointer is null. Ownership of the returned value passes to
/// the host side, which reclaims it with [`take_response`].
///
/// # Safety
/// `headers` must be null or valid for `headers_len` entries whose key
/// and value pointers are valid nul-terminated strings; `body` must be
/// null or valid for `body_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn create_response(
    status: u16,
    headers: *const RawHeader,
    headers_len: usize,
    body: *const c_char,
    body_len: usize,
) -> *const Response {
    if (headers.is_null() && headers_len > 0) || (body.is_null() && body_len > 0) {
        tracing::error!("create_response: null pointer with non-zero length");
        return std::ptr::null();
    }

    let mut owned_headers = Vec::with_capacity(headers_len);
    for i in 0..headers_len {
        let raw = &*headers.add(i);
        if raw.key.is_null() || raw.value.is_null() {
            tracing::error!(index = i, "create_response: null header component");
            return std::ptr::null();
        }
        owned_headers.push(Header::new(
            CStr::from_ptr(raw.key).to_string_lossy(),
            CStr::from_ptr(raw.value).to_string_lossy(),
        ));
    }

    let body = if body_len == 0 {
        &[][..]
    } else {
        std::slice::from_raw_parts(body as *const u8, body_len)
    };

    Box::into_raw(Box::new(Response::build(status, owned_headers, body)))
}

/// Reclaim ownership of a response created by [`create_response`]. Used
/// by the host-side encoder to consume the value exactly once.
///
/// # Safety
/// `response` must be null or a pointer previously returned by
/// `create_response` that has not already been taken.
pub unsafe fn take_response(response: *const Response) -> Option<Response> {
    if response.is_null() {
        None
    } else {
        Some(*Box::from_raw(response as *mut Response))
    }
}

/// Diagnostic no-op kept for link-time verification of the boundary.
#[no_mangle]
pub extern "C" fn test_api() {
    tracing::trace!("test_api called");
}

fn sentinel_for(error: SocketError) -> isize {
    match error {
        SocketError::Closed => SENTINEL_INVALID_HANDLE,
        SocketError::Io(e) => {
            tracing::debug!(error = %e, "Socket I/O failed");
            SENTINEL_IO_ERROR
        }
    }
}
