//! Oplink — asynchronous operation engine for multiplexed message links.
//!
//! Correlates requests with responses over any message-oriented transport
//! (see [`engine::Transport`]) and delivers peer-initiated requests to
//! per-connection protocol handlers. Everything runs on std threads; no
//! async runtime is required.

#![deny(unused_must_use)]

pub mod config;
pub mod engine;

mod error;

pub use config::EngineConfig;
pub use engine::{Connection, Host, Operation, Status};
pub use error::{Error, Result};
