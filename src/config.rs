//! Global configuration parsing and validation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Largest accepted `call_timeout_seconds` / `handshake_timeout_seconds` (one week).
pub const MAX_TIMEOUT_SECONDS: u64 = 7 * 24 * 60 * 60;

fn default_call_timeout() -> u64 {
    90
}

fn default_handshake_timeout() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_stop_grace() -> u64 {
    5
}

fn default_max_line_bytes() -> usize {
    8 * 1024 * 1024
}

fn default_client_name() -> String {
    env!("CARGO_PKG_NAME").into()
}

fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}

fn default_protocol_version() -> String {
    "2024-11-05".into()
}

/// Self-description sent to every child during the initialize exchange.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ClientConfig {
    /// `clientInfo.name`.
    #[serde(default = "default_client_name")]
    pub name: String,
    /// `clientInfo.version`.
    #[serde(default = "default_client_version")]
    pub version: String,
    /// Protocol version string offered in `initialize`.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            version: default_client_version(),
            protocol_version: default_protocol_version(),
        }
    }
}

/// Launch and timing settings for one kind of child server.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Program followed by its arguments.
    pub command: Vec<String>,
    /// Working directory for the child; inherits ours when absent.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Default per-call budget.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_seconds: u64,
    /// Budget for the initialize request.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_seconds: u64,
    /// Wait slice between liveness checks while a call is outstanding.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Grace period between the terminate request and a forced kill.
    #[serde(default = "default_stop_grace")]
    pub stop_grace_seconds: u64,
    /// Longest stdout line accepted from the child.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Treat any non-JSON stdout line as a fatal protocol violation.
    #[serde(default)]
    pub strict_stdout: bool,
    /// Extra environment variables set on the child.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// When set, the child's environment is cleared and only these
    /// variables are inherited (plus `env`).
    #[serde(default)]
    pub env_allowlist: Option<Vec<String>>,
}

impl ServerConfig {
    /// Build a config for `command` with every other field at its default.
    #[must_use]
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            working_dir: None,
            call_timeout_seconds: default_call_timeout(),
            handshake_timeout_seconds: default_handshake_timeout(),
            poll_interval_ms: default_poll_interval_ms(),
            stop_grace_seconds: default_stop_grace(),
            max_line_bytes: default_max_line_bytes(),
            strict_stdout: false,
            env: HashMap::new(),
            env_allowlist: None,
        }
    }

    /// Default per-call budget.
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }

    /// Budget for the initialize request.
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_seconds)
    }

    /// Wait slice used by the correlation loop.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Grace period granted on stop before the child is killed.
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_seconds)
    }

    /// Check invariants that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        match self.command.first() {
            Some(program) if !program.trim().is_empty() => {}
            _ => return Err(AppError::Config("command must name a program".into())),
        }

        let positive = [
            ("call_timeout_seconds", self.call_timeout_seconds),
            ("handshake_timeout_seconds", self.handshake_timeout_seconds),
            ("poll_interval_ms", self.poll_interval_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(AppError::Config(format!(
                    "{field} must be greater than zero"
                )));
            }
        }

        let bounded = [
            ("call_timeout_seconds", self.call_timeout_seconds),
            ("handshake_timeout_seconds", self.handshake_timeout_seconds),
        ];
        for (field, value) in bounded {
            if value > MAX_TIMEOUT_SECONDS {
                return Err(AppError::Config(format!(
                    "{field} must not exceed {MAX_TIMEOUT_SECONDS}"
                )));
            }
        }

        if self.max_line_bytes == 0 {
            return Err(AppError::Config(
                "max_line_bytes must be greater than zero".into(),
            ));
        }

        Ok(())
    }

    fn canonicalize_working_dir(&mut self) -> Result<()> {
        if let Some(dir) = &self.working_dir {
            let canonical = dir
                .canonicalize()
                .map_err(|err| AppError::Config(format!("working_dir invalid: {err}")))?;
            self.working_dir = Some(canonical);
        }
        Ok(())
    }
}

/// Global configuration parsed from a TOML file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Client self-description used in every handshake.
    #[serde(default)]
    pub client: ClientConfig,
    /// Known child servers keyed by kind.
    #[serde(default)]
    pub servers: HashMap<String, ServerConfig>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Look up the settings for one server kind.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `kind` is not configured.
    pub fn server(&self, kind: &str) -> Result<&ServerConfig> {
        self.servers
            .get(kind)
            .ok_or_else(|| AppError::Config(format!("unknown server '{kind}'")))
    }

    fn validate(&mut self) -> Result<()> {
        if self.client.protocol_version.trim().is_empty() {
            return Err(AppError::Config(
                "client.protocol_version must not be empty".into(),
            ));
        }

        for (kind, server) in &mut self.servers {
            server.validate().map_err(|err| match err {
                AppError::Config(msg) => AppError::Config(format!("servers.{kind}: {msg}")),
                other => other,
            })?;
            server.canonicalize_working_dir()?;
        }

        Ok(())
    }
}
