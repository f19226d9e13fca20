//! Oplink loopback demo — two hosts wired back to back in one process.
//!
//! ```text
//! ┌────────────── client host ──────────────┐      ┌────────────── server host ──────────────┐
//! │ cport 1 ── operation_sync(PING/ECHO) ───│─────▶│ cport 1 ── EchoHandler                  │
//! │                                         │◀─────│            (echo payload, status)       │
//! └─────────────────────────────────────────┘      └─────────────────────────────────────────┘
//!            LoopbackTransport (client → server) · LoopbackTransport (server → client)
//! ```
//!
//! Usage: `oplink-loopback [config.json]`. Set `RUST_LOG=debug` for the
//! engine's own logging.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{info, warn};

use oplink::engine::{LoopbackTransport, Operation, ProtocolHandler, Status};
use oplink::{EngineConfig, Host};

// ── Demo protocol ─────────────────────────────────────────────

const CPORT: u16 = 1;
const TYPE_PING: u8 = 0x01;
const TYPE_ECHO: u8 = 0x02;
const TYPE_UNSUPPORTED: u8 = 0x7f;

const BUFFER_SIZE_MAX: usize = 2048;

struct EchoHandler;

impl ProtocolHandler for EchoHandler {
    fn request_recv(&self, operation_type: u8, operation: &Operation) -> Status {
        match operation_type {
            TYPE_PING => Status::Success,
            TYPE_ECHO => {
                let request = operation.request().payload().to_vec();
                if operation.response_alloc(request.len()).is_err() {
                    return Status::NoMemory;
                }
                if let Some(response) = operation.response() {
                    response.payload().copy_from_slice(&request);
                }
                Status::Success
            }
            other => {
                warn!("server: unsupported request type {:#04x}", other);
                Status::ProtocolBad
            }
        }
    }
}

fn load_config() -> Result<EngineConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config from {path}"))?;
            EngineConfig::from_json(&json).with_context(|| format!("parsing {path}"))
        }
        None => Ok(EngineConfig::default()),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("╔══════════════════════════════════════╗");
    info!("║  oplink loopback v{}              ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    let config = load_config()?;

    // ── Wiring ────────────────────────────────────────────────
    let to_server = LoopbackTransport::new(BUFFER_SIZE_MAX)?;
    let to_client = LoopbackTransport::new(BUFFER_SIZE_MAX)?;

    let client = Host::new(to_server.clone(), config.clone())?;
    let server = Host::new(to_client.clone(), config)?;
    to_server.connect(&server);
    to_client.connect(&client);

    let server_conn = server.connection_create(CPORT, Some(Arc::new(EchoHandler)))?;
    let client_conn = client.connection_create(CPORT, None)?;
    server_conn.enable();
    client_conn.enable();

    // ── Exchanges ─────────────────────────────────────────────
    let started = Instant::now();
    client_conn.operation_sync(TYPE_PING, &[], &mut [], None)?;
    info!("ping: ok ({:?})", started.elapsed());

    let message = b"hello, oplink";
    let mut echoed = [0u8; 13];
    client_conn.operation_sync(TYPE_ECHO, message, &mut echoed, None)?;
    info!("echo: {:?}", String::from_utf8_lossy(&echoed));

    match client_conn.operation_sync(TYPE_UNSUPPORTED, &[], &mut [], Some(Duration::from_millis(200))) {
        Ok(()) => warn!("unsupported type unexpectedly succeeded"),
        Err(e) => info!("unsupported type rejected as expected: {}", e),
    }

    // Fire-and-forget batch, completed through callbacks.
    let (tx, rx) = std::sync::mpsc::channel();
    for i in 0..8u8 {
        let operation = client_conn.operation_create(TYPE_ECHO, 1, 1)?;
        operation.request().payload()[0] = i;
        let tx = tx.clone();
        operation.request_send(move |op| {
            let echoed = op.response().map(|m| m.payload()[0]);
            let _ = tx.send((op.id(), op.result().is_ok(), echoed));
        })?;
    }
    drop(tx);
    for (id, ok, echoed) in rx.iter().take(8) {
        info!("async op {}: ok={} echoed={:?}", id, ok, echoed);
    }

    // ── Teardown ──────────────────────────────────────────────
    client_conn.destroy();
    server_conn.destroy();
    info!("done in {:?}", started.elapsed());
    Ok(())
}
