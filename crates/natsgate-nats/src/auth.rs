use std::path::PathBuf;

use crate::env::ReadEnv;

const ENV_NATS_URL: &str = "NATS_URL";
const ENV_NATS_CREDS: &str = "NATS_CREDS";
const ENV_NATS_NKEY: &str = "NATS_NKEY";
const ENV_NATS_USER: &str = "NATS_USER";
const ENV_NATS_PASSWORD: &str = "NATS_PASSWORD";
const ENV_NATS_TOKEN: &str = "NATS_TOKEN";

pub const DEFAULT_NATS_URL: &str = "localhost:4222";

/// How a bridge connection authenticates against its NATS server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NatsAuth {
    Credentials(PathBuf),
    NKey(String),
    UserPassword { user: String, password: String },
    Token(String),
    None,
}

/// Raw, possibly partial, authentication settings as found in a config file
/// or the environment.
#[derive(Debug, Clone, Default)]
pub struct AuthSources {
    pub credentials: Option<PathBuf>,
    pub nkey: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

impl NatsAuth {
    /// Pick one method from the given sources.
    ///
    /// Priority: credentials file, NKey, user + password, token, none.
    /// A user without a password (or the reverse) is ignored.
    pub fn resolve(sources: AuthSources) -> Self {
        let AuthSources {
            credentials,
            nkey,
            user,
            password,
            token,
        } = sources;

        if let Some(path) = credentials {
            return Self::Credentials(path);
        }
        if let Some(seed) = nkey {
            return Self::NKey(seed);
        }
        if let (Some(user), Some(password)) = (user, password) {
            return Self::UserPassword { user, password };
        }
        token.map_or(Self::None, Self::Token)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Credentials(_) => "credentials file",
            Self::NKey(_) => "NKey",
            Self::UserPassword { .. } => "user/password",
            Self::Token(_) => "token",
            Self::None => "none",
        }
    }
}

/// Where and how to connect for one server alias.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    pub servers: Vec<String>,
    pub auth: NatsAuth,
}

impl NatsConfig {
    pub fn new(servers: Vec<String>, auth: NatsAuth) -> Self {
        Self { servers, auth }
    }

    pub fn from_url(url: impl Into<String>) -> Self {
        Self::new(vec![url.into()], NatsAuth::None)
    }

    /// `NATS_URL` is a comma-separated server list (default `localhost:4222`);
    /// auth comes from `NATS_CREDS`, `NATS_NKEY`, `NATS_USER`/`NATS_PASSWORD`
    /// and `NATS_TOKEN`, in that priority.
    pub fn from_env<E: ReadEnv>(env: &E) -> Self {
        let raw = env
            .var(ENV_NATS_URL)
            .unwrap_or_else(|_| DEFAULT_NATS_URL.to_string());
        let auth = NatsAuth::resolve(AuthSources {
            credentials: env.var(ENV_NATS_CREDS).ok().map(PathBuf::from),
            nkey: env.var(ENV_NATS_NKEY).ok(),
            user: env.var(ENV_NATS_USER).ok(),
            password: env.var(ENV_NATS_PASSWORD).ok(),
            token: env.var(ENV_NATS_TOKEN).ok(),
        });
        Self::new(split_servers(&raw), auth)
    }
}

/// Split a comma-separated server list, dropping blanks.
pub fn split_servers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::InMemoryEnv;

    #[test]
    fn from_env_defaults_to_localhost_without_auth() {
        let config = NatsConfig::from_env(&InMemoryEnv::new());

        assert_eq!(config.servers, vec!["localhost:4222"]);
        assert_eq!(config.auth, NatsAuth::None);
    }

    #[test]
    fn from_env_splits_server_list() {
        let env = InMemoryEnv::new();
        env.set("NATS_URL", "a:4222, ,b:4222 ");

        assert_eq!(NatsConfig::from_env(&env).servers, vec!["a:4222", "b:4222"]);
    }

    #[test]
    fn credentials_win_over_everything() {
        let env = InMemoryEnv::new();
        env.set("NATS_CREDS", "/etc/nats/bridge.creds");
        env.set("NATS_NKEY", "SU...");
        env.set("NATS_TOKEN", "t");

        assert_eq!(
            NatsConfig::from_env(&env).auth,
            NatsAuth::Credentials(PathBuf::from("/etc/nats/bridge.creds"))
        );
    }

    #[test]
    fn user_without_password_falls_through_to_token() {
        let auth = NatsAuth::resolve(AuthSources {
            user: Some("bridge".into()),
            token: Some("secret".into()),
            ..Default::default()
        });

        assert_eq!(auth, NatsAuth::Token("secret".into()));
    }

    #[test]
    fn user_password_over_token() {
        let auth = NatsAuth::resolve(AuthSources {
            user: Some("bridge".into()),
            password: Some("pw".into()),
            token: Some("secret".into()),
            ..Default::default()
        });

        assert_eq!(auth.description(), "user/password");
    }

    #[test]
    fn nothing_set_means_no_auth() {
        assert_eq!(NatsAuth::resolve(AuthSources::default()), NatsAuth::None);
    }
}
