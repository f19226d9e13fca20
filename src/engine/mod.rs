//! Operation correlation engine.
//!
//! ```text
//!  ┌──────────────┐ operation_create ┌─────────────┐ send   ┌───────────┐
//!  │ Protocol     │─────────────────▶│ Connection  │───────▶│ Transport │
//!  │ driver       │◀─── callback ────│  op table   │◀───────│           │
//!  └──────────────┘                  └─────────────┘  recv  └───────────┘
//!         ▲                                │ finalize
//!         │ request_recv                   ▼
//!  ┌──────────────┐                  ┌─────────────┐
//!  │ Protocol     │◀─────────────────│ Dispatcher  │
//!  │ handler      │                  │ (workers)   │
//!  └──────────────┘                  └─────────────┘
//! ```
//!
//! Every outgoing request is matched to its response by a 16-bit id that
//! is unique among the connection's in-flight operations. Each operation
//! ends with exactly one final result, whichever of response, send
//! failure, cancellation or timeout gets there first.

pub mod completion;
pub mod connection;
pub mod dispatch;
pub mod handler;
pub mod header;
pub mod host;
pub mod loopback;
pub mod message;
pub mod operation;
pub mod result;
pub mod status;
pub mod transport;

pub use connection::{Connection, ConnectionState};
pub use handler::ProtocolHandler;
pub use header::{HEADER_SIZE, Header, MESSAGE_SIZE_MAX};
pub use host::{Host, WeakHost};
pub use loopback::LoopbackTransport;
pub use message::Message;
pub use operation::{Operation, OperationKind};
pub use result::ResultState;
pub use status::Status;
pub use transport::{MessageRole, OutboundMessage, Transport};
