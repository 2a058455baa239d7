//! Configuration management for natsgate.
//!
//! Routes and servers come from a TOML file. When the file names no
//! servers, a `default` server is built from the `NATS_*` environment.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use natsgate_nats::auth::split_servers;
use natsgate_nats::{AuthSources, NatsAuth, NatsConfig, ReadEnv};
use serde::Deserialize;

use crate::delivery::{
    DEFAULT_AWAIT_RESPONSE_TIMEOUT, DEFAULT_REPLY_BUFFER, DEFAULT_SERVER_ALIAS, DeliveryConfig,
    ReplyFraming,
};
use crate::request::{DEFAULT_REQUEST_TIMEOUT, RequestConfig};
use crate::server::HEALTH_PATH;
use crate::subject::SubjectTemplate;
use crate::subscribe::{DEFAULT_METHOD, SubscribeConfig};

pub const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const ENV_CONNECT_TIMEOUT_SECS: &str = "NATSGATE_CONNECT_TIMEOUT_SECS";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub servers: BTreeMap<String, ServerSection>,
    #[serde(default)]
    pub publish: Vec<PublishRoute>,
    #[serde(default)]
    pub request: Vec<RequestRoute>,
    #[serde(default)]
    pub subscribe: Vec<SubscribeRoute>,
}

/// One `[servers.<alias>]` table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerSection {
    /// Comma-separated server list.
    pub url: Option<String>,
    pub credentials: Option<PathBuf>,
    pub nkey: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

/// One `[[publish]]` route.
#[derive(Debug, Clone, Deserialize)]
pub struct PublishRoute {
    pub path: String,
    #[serde(default = "default_server_alias")]
    pub server: String,
    pub subject: SubjectTemplate,
    #[serde(default)]
    pub await_response: bool,
    pub await_response_timeout_ms: Option<u64>,
    pub max_replies: Option<usize>,
    pub reply_buffer: Option<usize>,
    #[serde(default)]
    pub reply_framing: ReplyFraming,
}

/// One `[[request]]` route.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestRoute {
    pub path: String,
    #[serde(default = "default_server_alias")]
    pub server: String,
    pub subject: SubjectTemplate,
    pub timeout_ms: Option<u64>,
}

/// One `[[subscribe]]` reverse bridge.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeRoute {
    #[serde(default = "default_server_alias")]
    pub server: String,
    pub subject: String,
    pub queue_group: Option<String>,
    #[serde(default = "default_method")]
    pub method: String,
    pub url: SubjectTemplate,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            connect_timeout_secs: None,
            servers: BTreeMap::new(),
            publish: Vec::new(),
            request: Vec::new(),
            subscribe: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let paths = self
            .publish
            .iter()
            .map(|r| r.path.as_str())
            .chain(self.request.iter().map(|r| r.path.as_str()));
        let mut seen = HashSet::new();
        for path in paths {
            let shape = route_shape(path)?;
            if path == HEALTH_PATH || !seen.insert(shape) {
                bail!("route path is already in use: {path}");
            }
        }
        for route in &self.subscribe {
            if route.subject.is_empty() {
                bail!("subscribe subject must not be empty");
            }
        }
        Ok(())
    }

    /// Configured servers, or a `default` one from the environment.
    pub fn nats_servers<E: ReadEnv>(&self, env: &E) -> BTreeMap<String, NatsConfig> {
        if self.servers.is_empty() {
            return BTreeMap::from([(DEFAULT_SERVER_ALIAS.to_string(), NatsConfig::from_env(env))]);
        }
        self.servers
            .iter()
            .map(|(alias, section)| (alias.clone(), section.nats_config()))
            .collect()
    }

    /// `NATSGATE_CONNECT_TIMEOUT_SECS` wins over the file.
    pub fn connect_timeout<E: ReadEnv>(&self, env: &E) -> Duration {
        env.var(ENV_CONNECT_TIMEOUT_SECS)
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .or(self.connect_timeout_secs)
            .map_or(DEFAULT_CONNECT_TIMEOUT, Duration::from_secs)
    }

    /// Aliases that routes refer to but no server defines.
    pub fn unknown_aliases<E: ReadEnv>(&self, env: &E) -> Vec<String> {
        let servers = self.nats_servers(env);
        let mut missing: Vec<String> = self
            .publish
            .iter()
            .map(|r| &r.server)
            .chain(self.request.iter().map(|r| &r.server))
            .chain(self.subscribe.iter().map(|r| &r.server))
            .filter(|alias| !servers.contains_key(alias.as_str()))
            .cloned()
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }
}

impl ServerSection {
    pub fn nats_config(&self) -> NatsConfig {
        let servers = self
            .url
            .as_deref()
            .map(split_servers)
            .filter(|servers| !servers.is_empty())
            .unwrap_or_else(|| vec![natsgate_nats::DEFAULT_NATS_URL.to_string()]);
        let auth = NatsAuth::resolve(AuthSources {
            credentials: self.credentials.clone(),
            nkey: self.nkey.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            token: self.token.clone(),
        });
        NatsConfig::new(servers, auth)
    }
}

impl PublishRoute {
    pub fn delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            server_alias: self.server.clone(),
            subject: self.subject.clone(),
            await_response: self.await_response,
            await_response_timeout: self
                .await_response_timeout_ms
                .map_or(DEFAULT_AWAIT_RESPONSE_TIMEOUT, Duration::from_millis),
            max_replies: self.max_replies,
            reply_buffer: self.reply_buffer.unwrap_or(DEFAULT_REPLY_BUFFER),
            reply_framing: self.reply_framing,
        }
    }
}

impl RequestRoute {
    pub fn request_config(&self) -> RequestConfig {
        RequestConfig {
            server_alias: self.server.clone(),
            subject: self.subject.clone(),
            timeout: self
                .timeout_ms
                .map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_millis),
        }
    }
}

impl SubscribeRoute {
    pub fn subscribe_config(&self) -> SubscribeConfig {
        SubscribeConfig {
            server_alias: self.server.clone(),
            subject: self.subject.clone(),
            queue_group: self.queue_group.clone(),
            method: self.method.clone(),
            url: self.url.clone(),
        }
    }
}

/// Checks a route path against axum's path syntax and returns it with
/// capture names erased, so `/a/{id}` and `/a/{key}` compare equal.
fn route_shape(path: &str) -> Result<String> {
    if !path.starts_with('/') {
        bail!("route path must start with '/': {path}");
    }
    let segments: Vec<&str> = path[1..].split('/').collect();
    let mut shape = String::with_capacity(path.len());
    for (i, segment) in segments.iter().enumerate() {
        shape.push('/');
        if segment.starts_with(':') {
            bail!("route path uses ':' captures, write '{{name}}' instead: {path}");
        }
        if !segment.contains(['{', '}']) {
            shape.push_str(segment);
            continue;
        }
        let Some(name) = segment
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .filter(|name| !name.is_empty() && !name.contains(['{', '}']))
        else {
            bail!("route path has a malformed capture '{segment}': {path}");
        };
        match name.strip_prefix('*') {
            Some("") => bail!("route path has an unnamed catch-all: {path}"),
            Some(_) if i + 1 != segments.len() => {
                bail!("route path catch-all must be the last segment: {path}")
            }
            Some(_) => shape.push_str("{*}"),
            None => shape.push_str("{}"),
        }
    }
    Ok(shape)
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_server_alias() -> String {
    DEFAULT_SERVER_ALIAS.to_string()
}

fn default_method() -> String {
    DEFAULT_METHOD.to_string()
}
