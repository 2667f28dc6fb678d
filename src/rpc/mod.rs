//! Subprocess JSON-RPC transport.
//!
//! Launches a long-lived child server and speaks newline-delimited JSON-RPC
//! with it over stdio. Data flows one way per call:
//!
//! ```text
//! caller → client (correlation) → framer → child stdin
//!        → child → child stdout → router → inbox → client → caller
//! ```
//!
//! Submodules:
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based line framing.
//! - `envelope`: request, notification, and response envelopes.
//! - `framer`: writes one JSON value per line; classifies inbound lines.
//! - `supervisor`: spawns, polls, and terminates the child process.
//! - `inbox`: queue between the router and the waiting caller.
//! - `router`: background task feeding decoded stdout messages to the inbox.
//! - `session`: lifecycle states and handshake payloads.
//! - `client`: [`RpcTransport`], the correlation engine and lifecycle glue.
//! - `recovery`: restart-once retry policy.
//! - `registry`: one lazily created transport per server kind.

pub mod client;
pub mod codec;
pub mod envelope;
pub mod framer;
pub mod inbox;
pub mod recovery;
pub mod registry;
pub mod router;
pub mod session;
pub mod supervisor;

pub use client::RpcTransport;
pub use recovery::{ensure_and_call, RecoverableTransport};
pub use registry::TransportRegistry;
pub use session::SessionState;
