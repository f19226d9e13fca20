//! Fuzz target: `Connection::recv`
//!
//! Feeds arbitrary bytes into an enabled connection with one request in
//! flight. Whatever arrives (short frames, bad sizes, stray responses,
//! requests of any type) must never panic, and the outstanding request
//! must still cancel cleanly afterwards.
//!
//! cargo fuzz run fuzz_recv

#![no_main]

use std::sync::{Arc, OnceLock};

use libfuzzer_sys::fuzz_target;
use oplink::engine::{LoopbackTransport, Operation, ProtocolHandler, Status};
use oplink::{EngineConfig, Host};

fn host() -> &'static Host {
    static HOST: OnceLock<Host> = OnceLock::new();
    HOST.get_or_init(|| {
        // Nothing is connected at the far end; sent frames are dropped.
        let transport = LoopbackTransport::new(256).expect("wire thread");
        let config = EngineConfig {
            completion_workers: 1,
            default_timeout_ms: 0,
        };
        Host::new(transport, config).expect("host")
    })
}

fuzz_target!(|data: &[u8]| {
    let host = host();
    let handler: Arc<dyn ProtocolHandler> = Arc::new(|_: u8, _: &Operation| Status::Success);
    let connection = host.connection_create(1, Some(handler)).expect("cport free");
    connection.enable();

    let pending = connection.operation_create(0x02, 4, 8).expect("fits");
    let _ = pending.request_send(|_| {});

    connection.recv(data);
    if let Some((split, rest)) = data.split_first() {
        connection.recv(&rest[..(*split as usize).min(rest.len())]);
    }

    pending.cancel(Status::Cancelled);
    assert!(!pending.is_active());
    connection.destroy();
});
