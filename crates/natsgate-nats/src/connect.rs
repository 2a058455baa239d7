use std::time::Duration;

use async_nats::{Client, ConnectOptions, Event};
use tracing::{info, instrument, warn};

use crate::auth::{NatsAuth, NatsConfig};

const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum ConnectError {
    InvalidCredentials(std::io::Error),
    ConnectionFailed {
        servers: Vec<String>,
        error: async_nats::ConnectError,
    },
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCredentials(e) => write!(f, "failed to load credentials file: {}", e),
            Self::ConnectionFailed { servers, error } => {
                write!(f, "failed to connect to NATS servers {:?}: {}", servers, error)
            }
        }
    }
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidCredentials(e) => Some(e),
            Self::ConnectionFailed { error, .. } => Some(error),
        }
    }
}

/// 1s, 2s, 4s, ... capped at 30s.
fn reconnect_delay(attempts: usize) -> Duration {
    let exp = u32::try_from(attempts).unwrap_or(u32::MAX);
    let secs = 2u64.saturating_pow(exp).min(MAX_RECONNECT_DELAY.as_secs());
    Duration::from_secs(secs)
}

fn log_event(event: &Event) {
    match event {
        Event::Connected => info!("NATS connected"),
        Event::Disconnected => warn!("NATS disconnected, reconnecting"),
        Event::ServerError(err) => warn!(error = %err, "NATS server error"),
        Event::ClientError(err) => warn!(error = %err, "NATS client error"),
        Event::SlowConsumer(sid) => warn!(sid, "NATS slow consumer, messages dropped"),
        Event::LameDuckMode => warn!("NATS server entering lame duck mode"),
        Event::Closed => info!("NATS connection closed"),
        Event::Draining => info!("NATS connection draining"),
    }
}

async fn options_for(auth: &NatsAuth) -> Result<ConnectOptions, ConnectError> {
    let opts = match auth {
        NatsAuth::Credentials(path) => ConnectOptions::with_credentials_file(path.clone())
            .await
            .map_err(|e| {
                warn!(error = %e, path = %path.display(), "Failed to load credentials file");
                ConnectError::InvalidCredentials(e)
            })?,
        NatsAuth::NKey(seed) => ConnectOptions::with_nkey(seed.clone()),
        NatsAuth::UserPassword { user, password } => {
            ConnectOptions::with_user_and_password(user.clone(), password.clone())
        }
        NatsAuth::Token(token) => ConnectOptions::with_token(token.clone()),
        NatsAuth::None => ConnectOptions::new(),
    };
    Ok(opts)
}

/// Connect one bridge connection, retrying in the background on disconnect.
#[instrument(
    name = "nats.connect",
    skip(config),
    fields(servers = ?config.servers, auth = %config.auth.description())
)]
pub async fn connect(config: &NatsConfig, connect_timeout: Duration) -> Result<Client, ConnectError> {
    let opts = options_for(&config.auth)
        .await?
        .retry_on_initial_connect()
        .connection_timeout(connect_timeout)
        .reconnect_delay_callback(reconnect_delay)
        .event_callback(|event| async move { log_event(&event) });

    match opts.connect(&config.servers).await {
        Ok(client) => {
            info!("Connected to NATS");
            Ok(client)
        }
        Err(error) => {
            warn!(error = %error, "Failed to connect to NATS");
            Err(ConnectError::ConnectionFailed {
                servers: config.servers.clone(),
                error,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delay_doubles_then_caps() {
        let secs: Vec<u64> = (0..7).map(|n| reconnect_delay(n).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn reconnect_delay_survives_huge_attempt_counts() {
        assert_eq!(reconnect_delay(usize::MAX), MAX_RECONNECT_DELAY);
    }

    #[test]
    fn log_event_handles_every_variant() {
        use async_nats::{ClientError, ServerError};

        for event in [
            Event::Connected,
            Event::Disconnected,
            Event::ServerError(ServerError::Other("boom".to_string())),
            Event::ClientError(ClientError::Other("boom".to_string())),
            Event::SlowConsumer(7),
            Event::LameDuckMode,
            Event::Closed,
            Event::Draining,
        ] {
            log_event(&event);
        }
    }

    #[tokio::test]
    async fn missing_credentials_file_is_reported() {
        let config = NatsConfig::new(
            vec!["localhost:4222".to_string()],
            NatsAuth::Credentials("/definitely/not/here.creds".into()),
        );

        let err = connect(&config, Duration::from_secs(1)).await.unwrap_err();

        assert!(matches!(err, ConnectError::InvalidCredentials(_)));
        assert!(err.to_string().contains("credentials file"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
