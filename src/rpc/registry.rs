//! Registry of transports, one per child server kind.
//!
//! Owned by the application's composition root and handed to collaborators
//! by reference. Entries are created lazily on first use from a factory and
//! reused afterwards, so the spawn cost is paid once per kind.
//!
//! Each entry sits behind its own [`tokio::sync::Mutex`], held for the whole
//! [`ensure_and_call`]: concurrent callers of the same kind are serialised,
//! which keeps the one-call-in-flight invariant of the correlation loop.
//! Different kinds never contend.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::GlobalConfig;
use crate::rpc::client::RpcTransport;
use crate::rpc::recovery::{ensure_and_call, RecoverableTransport};
use crate::Result;

/// Builds the transport for a server kind on first use.
pub type TransportFactory<T> = Box<dyn Fn(&str) -> Result<T> + Send + Sync>;

/// Shared handle to one registry entry.
pub type SharedTransport<T> = Arc<Mutex<T>>;

/// Lazily populated map of server kind → transport.
pub struct TransportRegistry<T> {
    factory: TransportFactory<T>,
    entries: Mutex<HashMap<String, SharedTransport<T>>>,
}

impl<T> std::fmt::Debug for TransportRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportRegistry").finish_non_exhaustive()
    }
}

impl<T> TransportRegistry<T>
where
    T: RecoverableTransport,
{
    /// Create an empty registry using `factory` to build new entries.
    #[must_use]
    pub fn new(factory: TransportFactory<T>) -> Self {
        Self {
            factory,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Get the entry for `kind`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Propagates the factory's error; nothing is cached in that case.
    pub async fn get(&self, kind: &str) -> Result<SharedTransport<T>> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(kind) {
            return Ok(Arc::clone(entry));
        }

        let transport = (self.factory)(kind)?;
        let entry = Arc::new(Mutex::new(transport));
        entries.insert(kind.to_owned(), Arc::clone(&entry));
        debug!(server = kind, "transport registered");
        Ok(entry)
    }

    /// Call `name` on the `kind` server under the recovery policy.
    ///
    /// # Errors
    ///
    /// Factory errors, start failures, and call failures that survive the
    /// single restart-and-retry.
    pub async fn call(&self, kind: &str, name: &str, arguments: &Value) -> Result<Value> {
        let entry = self.get(kind).await?;
        let mut transport = entry.lock().await;
        ensure_and_call(&mut *transport, name, arguments).await
    }

    /// Number of transports created so far.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether no transport has been created yet.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Stop every transport and forget them.
    pub async fn shutdown(&self) {
        let entries: Vec<(String, SharedTransport<T>)> =
            self.entries.lock().await.drain().collect();

        for (kind, entry) in entries {
            entry.lock().await.stop().await;
            info!(server = kind.as_str(), "transport shut down");
        }
    }
}

impl TransportRegistry<RpcTransport> {
    /// Registry building [`RpcTransport`]s from configured servers.
    #[must_use]
    pub fn from_config(config: Arc<GlobalConfig>) -> Self {
        Self::new(Box::new(move |kind: &str| {
            let server = config.server(kind)?.clone();
            Ok(RpcTransport::new(kind, server, config.client.clone()))
        }))
    }

    /// List the operations of the `kind` server, starting it if needed.
    ///
    /// # Errors
    ///
    /// Factory, start, and call failures.
    pub async fn list_operations(&self, kind: &str) -> Result<Vec<Value>> {
        let entry = self.get(kind).await?;
        let mut transport = entry.lock().await;
        if !transport.is_running() {
            transport.start().await?;
        }
        transport.list_operations().await
    }
}
