//! Named broker connections, built once at startup and shared read-only.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use natsgate_nats::{ConnectError, NatsConfig, connect};
use tracing::info;

use crate::error::BridgeError;

#[derive(Debug, Clone)]
pub struct ServerRegistry<N> {
    servers: HashMap<String, N>,
}

impl<N> Default for ServerRegistry<N> {
    fn default() -> Self {
        Self {
            servers: HashMap::new(),
        }
    }
}

impl<N> ServerRegistry<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, alias: impl Into<String>, client: N) {
        self.servers.insert(alias.into(), client);
    }

    pub fn with(mut self, alias: impl Into<String>, client: N) -> Self {
        self.insert(alias, client);
        self
    }

    pub fn lookup(&self, alias: &str) -> Result<&N, BridgeError> {
        self.servers
            .get(alias)
            .ok_or_else(|| BridgeError::UnknownServerAlias(alias.to_string()))
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.servers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

impl<N, A: Into<String>> FromIterator<(A, N)> for ServerRegistry<N> {
    fn from_iter<I: IntoIterator<Item = (A, N)>>(iter: I) -> Self {
        Self {
            servers: iter.into_iter().map(|(alias, n)| (alias.into(), n)).collect(),
        }
    }
}

/// Connects every configured server; the first failure aborts startup.
pub async fn connect_all(
    servers: &BTreeMap<String, NatsConfig>,
    connect_timeout: Duration,
) -> Result<ServerRegistry<async_nats::Client>, ConnectError> {
    let mut registry = ServerRegistry::new();
    for (alias, config) in servers {
        let client = connect(config, connect_timeout).await?;
        info!(alias = %alias, servers = ?config.servers, "NATS server registered");
        registry.insert(alias.clone(), client);
    }
    Ok(registry)
}
