//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering every transport failure mode.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Child executable missing or not spawnable.
    Launch(String),
    /// Initialize exchange failed or timed out.
    Handshake(String),
    /// Operation attempted while the session is not ready.
    NotInitialized(String),
    /// No matching response within the per-call budget.
    Timeout(String),
    /// Child exited or closed its stdout while a call was outstanding.
    ProcessDied(String),
    /// Malformed or schema-violating output from the child.
    Protocol(String),
    /// The child answered with an `error` object.
    Remote(serde_json::Value),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Whether the failure means "no response at all", the only condition
    /// under which the recovery policy restarts the child and retries.
    #[must_use]
    pub fn warrants_restart(&self) -> bool {
        matches!(self, Self::ProcessDied(_) | Self::NotInitialized(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Launch(msg) => write!(f, "launch: {msg}"),
            Self::Handshake(msg) => write!(f, "handshake: {msg}"),
            Self::NotInitialized(msg) => write!(f, "not initialized: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::ProcessDied(msg) => write!(f, "process died: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Remote(err) => write!(f, "remote: {err}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
