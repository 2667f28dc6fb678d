//! Session lifecycle state and the initialize handshake payloads.
//!
//! Every fresh child goes through a fixed two-message exchange before any
//! operation call is accepted:
//!
//! 1. **`initialize`** request carrying the protocol version, an empty
//!    capability set, and `clientInfo`; the child answers with its own
//!    capabilities.
//! 2. **`notifications/initialized`** one-way notification acknowledging
//!    readiness.
//!
//! ```json
//! {
//!   "jsonrpc": "2.0",
//!   "id": 1,
//!   "method": "initialize",
//!   "params": {
//!     "protocolVersion": "2024-11-05",
//!     "capabilities": {},
//!     "clientInfo": { "name": "tool-conduit", "version": "0.1.0" }
//!   }
//! }
//! ```

use std::fmt::{Display, Formatter};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::ClientConfig;

/// Method name of the handshake request.
pub const INITIALIZE_METHOD: &str = "initialize";

/// Method name of the post-handshake acknowledgment.
pub const INITIALIZED_NOTIFICATION: &str = "notifications/initialized";

/// Method name for invoking a named operation.
pub const CALL_OPERATION_METHOD: &str = "tools/call";

/// Method name for listing available operations.
pub const LIST_OPERATIONS_METHOD: &str = "tools/list";

/// Lifecycle of one transport.
///
/// ```text
/// NotStarted → Starting → AwaitingHandshake → Ready → Stopped
///                  └──────────┴──────────────────┴──→ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No process has been launched yet.
    NotStarted,
    /// The process is being spawned.
    Starting,
    /// The initialize request is outstanding.
    AwaitingHandshake,
    /// Operation calls are accepted.
    Ready,
    /// Stopped explicitly; a later `start()` is allowed.
    Stopped,
    /// Launch, handshake, or stream failure; a later `start()` is allowed.
    Failed,
}

impl SessionState {
    /// Whether a stream failure observed now should move the state to
    /// [`SessionState::Failed`].
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::AwaitingHandshake | Self::Ready)
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::NotStarted => "not started",
            Self::Starting => "starting",
            Self::AwaitingHandshake => "awaiting handshake",
            Self::Ready => "ready",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// `clientInfo` member of the initialize request.
#[derive(Debug, Serialize)]
pub struct ClientInfo<'a> {
    /// Client name.
    pub name: &'a str,
    /// Client version.
    pub version: &'a str,
}

/// Parameters of the initialize request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams<'a> {
    /// Protocol version offered to the child.
    pub protocol_version: &'a str,
    /// Client capabilities; none are advertised.
    pub capabilities: Map<String, Value>,
    /// Client self-description.
    pub client_info: ClientInfo<'a>,
}

impl<'a> InitializeParams<'a> {
    /// Build initialize parameters from the client config.
    #[must_use]
    pub fn from_config(client: &'a ClientConfig) -> Self {
        Self {
            protocol_version: &client.protocol_version,
            capabilities: Map::new(),
            client_info: ClientInfo {
                name: &client.name,
                version: &client.version,
            },
        }
    }
}
