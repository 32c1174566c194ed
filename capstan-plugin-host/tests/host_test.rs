//! End-to-end tests for the mediation core

use capstan_plugin_host::audit::{AuditEventType, AuditSink, MemoryAuditSink};
use capstan_plugin_host::{
    handler_fn, CallerIdentity, CapabilityTable, DispatchError, HandlerTable, Header, Host,
    RegistryError, Response, SocketHandle,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn privileged_host() -> (Host, Arc<MemoryAuditSink>) {
    let audit = Arc::new(MemoryAuditSink::new());
    let host = Host::with_audit(Arc::clone(&audit) as Arc<dyn AuditSink>);
    (host, audit)
}

#[test]
fn test_full_plugin_lifecycle() {
    let (host, audit) = privileged_host();

    let plugin = host
        .register_plugin("sysinfo", HandlerTable::new(CapabilityTable::permissive()))
        .expect("registration should succeed");

    host.init_command(
        plugin,
        "status",
        handler_fn(|_, _| Some("uptime 3d".to_string())),
        false,
        false,
    )
    .unwrap();
    host.init_command(
        plugin,
        "set-hostname",
        handler_fn(|_, input| {
            input.map(|bytes| format!("hostname={}", String::from_utf8_lossy(bytes)))
        }),
        true,
        true,
    )
    .unwrap();

    // Unprivileged caller can run the open command
    let out = host
        .dispatch(plugin, "status", CallerIdentity::new(1000), None)
        .unwrap();
    assert_eq!(out.as_deref(), Some("uptime 3d"));

    // ...but not the privileged one
    let err = host
        .dispatch(plugin, "set-hostname", CallerIdentity::new(1000), Some(b"a"))
        .unwrap_err();
    assert_eq!(err, DispatchError::PermissionDenied);

    // Root with input passes every gate
    let out = host
        .dispatch(plugin, "set-hostname", CallerIdentity::ROOT, Some(b"web1"))
        .unwrap();
    assert_eq!(out.as_deref(), Some("hostname=web1"));

    // Root without required input is still rejected at the input gate
    let err = host
        .dispatch(plugin, "set-hostname", CallerIdentity::ROOT, None)
        .unwrap_err();
    assert_eq!(err, DispatchError::MissingInput);

    assert_eq!(
        audit.find_by_type(AuditEventType::PluginRegistered).len(),
        1
    );
    assert_eq!(
        audit.find_by_type(AuditEventType::CommandRegistered).len(),
        2
    );
    assert_eq!(audit.find_by_type(AuditEventType::CommandInvoked).len(), 2);
    assert_eq!(
        audit.find_by_type(AuditEventType::DispatchRejected).len(),
        2
    );
}

#[test]
fn test_overwrite_changes_contract_and_callback() {
    let (host, _) = privileged_host();
    let plugin = host
        .register_plugin("mutable", HandlerTable::new(CapabilityTable::permissive()))
        .unwrap();

    host.init_command(plugin, "x", handler_fn(|_, _| Some("one".into())), false, false)
        .unwrap();
    host.init_command(plugin, "x", handler_fn(|_, _| Some("two".into())), true, false)
        .unwrap();

    // Exactly one active entry remains: the second
    assert_eq!(host.commands().commands_of(plugin), vec!["x"]);
    let err = host
        .dispatch(plugin, "x", CallerIdentity::new(1000), None)
        .unwrap_err();
    assert_eq!(err, DispatchError::PermissionDenied);
    let out = host.dispatch(plugin, "x", CallerIdentity::ROOT, None).unwrap();
    assert_eq!(out.as_deref(), Some("two"));
}

#[test]
fn test_capability_violations_are_audited() {
    let (host, audit) = privileged_host();
    let plugin = host
        .register_plugin(
            "restricted",
            HandlerTable::new(CapabilityTable::new().declare("status")),
        )
        .unwrap();

    let err = host
        .init_command(
            plugin,
            "undeclared",
            handler_fn(|_, _| None),
            false,
            false,
        )
        .unwrap_err();
    assert!(matches!(err, RegistryError::NotDeclared(_)));

    let err = host
        .init_command(plugin, "status", handler_fn(|_, _| None), true, false)
        .unwrap_err();
    assert!(matches!(err, RegistryError::PrivilegeNotGranted));

    assert_eq!(audit.find_by_type(AuditEventType::CommandRejected).len(), 2);
}

#[test]
fn test_concurrent_dispatch_reads_do_not_interfere() {
    let (host, _) = privileged_host();
    let host = Arc::new(host);
    let plugin = host
        .register_plugin("parallel", HandlerTable::default())
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    host.init_command(
        plugin,
        "tick",
        handler_fn(move |caller, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(format!("uid={}", caller.uid()))
        }),
        false,
        false,
    )
    .unwrap();

    let mut workers = Vec::new();
    for uid in 0..8u32 {
        let host = Arc::clone(&host);
        workers.push(std::thread::spawn(move || {
            for _ in 0..100 {
                let out = host
                    .dispatch(plugin, "tick", CallerIdentity::new(uid), None)
                    .unwrap();
                assert_eq!(out.as_deref(), Some(format!("uid={}", uid).as_str()));
            }
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 800);
}

#[test]
fn test_callback_can_drive_a_brokered_socket() {
    // A callback writing a built response through its invocation's
    // socket handle, retrying short writes until the transfer completes.
    struct ShortWriter {
        received: Arc<std::sync::Mutex<Vec<u8>>>,
    }

    impl std::io::Read for ShortWriter {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }
    }

    impl std::io::Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let n = buf.len().min(3);
            self.received.lock().unwrap().extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let response = Response::build(
        200,
        vec![Header::new("Content-Type", "text/plain")],
        b"hello world",
    );

    let received = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut socket = SocketHandle::new(ShortWriter {
        received: Arc::clone(&received),
    });

    let payload = response.body();
    let mut offset = 0;
    while offset < payload.len() {
        let written = socket.write(&payload[offset..]).unwrap();
        assert!(written > 0);
        offset += written;
    }
    socket.close();

    // No byte lost, none duplicated
    assert_eq!(&*received.lock().unwrap(), b"hello world");

    assert!(matches!(
        socket.write(b"late"),
        Err(capstan_plugin_host::SocketError::Closed)
    ));
}
