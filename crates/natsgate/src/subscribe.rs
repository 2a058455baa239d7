//! NATS → HTTP: the reverse bridge.
//!
//! A [`ReverseBridge`] holds one subscription. Every message it receives is
//! turned into an upstream HTTP call in its own task; when the message has a
//! reply subject the upstream response (or the failure) is published back.

use std::sync::Arc;

use async_nats::Message;
use axum::http::header::HOST;
use futures_util::StreamExt;
use natsgate_nats::{PublishClient, SubscribeClient, inject_trace_context};
use tokio::sync::watch;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::delivery::DEFAULT_SERVER_ALIAS;
use crate::error::{BridgeError, DeliveryError};
use crate::http_request::{
    HEADER_ERROR, HEADER_METHOD, HEADER_STATUS, bridge_header, header_text, http_headers,
    nats_headers,
};
use crate::registry::ServerRegistry;
use crate::subject::{SubjectTemplate, subject_segments};
use crate::upstream::{UpstreamClient, UpstreamRequest};

pub const DEFAULT_METHOD: &str = "POST";
const UPSTREAM_FAILURE_STATUS: u16 = 502;

#[derive(Debug, Clone)]
pub struct SubscribeConfig {
    pub server_alias: String,
    /// Subject filter, wildcards allowed.
    pub subject: String,
    pub queue_group: Option<String>,
    /// Used when a message carries no `X-NatsBridge-Method`.
    pub method: String,
    /// Resolved against the `.`-separated segments of each message subject.
    pub url: SubjectTemplate,
}

impl SubscribeConfig {
    pub fn new(subject: impl Into<String>, url: impl Into<SubjectTemplate>) -> Self {
        Self {
            server_alias: DEFAULT_SERVER_ALIAS.to_string(),
            subject: subject.into(),
            queue_group: None,
            method: DEFAULT_METHOD.to_string(),
            url: url.into(),
        }
    }

    pub fn with_server_alias(mut self, alias: impl Into<String>) -> Self {
        self.server_alias = alias.into();
        self
    }

    pub fn with_queue_group(mut self, group: impl Into<String>) -> Self {
        self.queue_group = Some(group.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Idle,
    Subscribed,
    Closed,
}

pub struct ReverseBridge<N, U> {
    dispatcher: Dispatcher<N, U>,
    state: watch::Sender<BridgeState>,
}

impl<N, U> ReverseBridge<N, U>
where
    N: SubscribeClient + PublishClient,
    U: UpstreamClient,
{
    pub fn new(
        registry: &ServerRegistry<N>,
        upstream: U,
        config: SubscribeConfig,
    ) -> Result<Self, BridgeError> {
        let nats = registry.lookup(&config.server_alias)?.clone();
        let (state, _) = watch::channel(BridgeState::Idle);
        Ok(Self {
            dispatcher: Dispatcher {
                nats,
                upstream,
                config: Arc::new(config),
            },
            state,
        })
    }

    pub fn state(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    /// Subscribes and dispatches messages until the subscription ends.
    pub async fn run(self) -> Result<(), DeliveryError> {
        let config = &self.dispatcher.config;
        let nats = &self.dispatcher.nats;
        let subscribed = match &config.queue_group {
            Some(group) => nats.queue_subscribe(config.subject.clone(), group.clone()).await,
            None => nats.subscribe(config.subject.clone()).await,
        };
        let mut subscription = match subscribed {
            Ok(subscription) => subscription,
            Err(e) => {
                self.state.send_replace(BridgeState::Closed);
                return Err(DeliveryError::Subscribe {
                    subject: config.subject.clone(),
                    error: e.to_string(),
                });
            }
        };

        self.state.send_replace(BridgeState::Subscribed);
        info!(
            subject = %config.subject,
            queue_group = ?config.queue_group,
            url = %config.url,
            "Reverse bridge subscribed"
        );

        while let Some(message) = subscription.next().await {
            let dispatcher = self.dispatcher.clone();
            let span = info_span!("natsgate.reverse", subject = %message.subject);
            tokio::spawn(async move { dispatcher.dispatch(message).await }.instrument(span));
        }

        self.state.send_replace(BridgeState::Closed);
        warn!(subject = %config.subject, "Reverse bridge subscription ended");
        Ok(())
    }
}

struct Dispatcher<N, U> {
    nats: N,
    upstream: U,
    config: Arc<SubscribeConfig>,
}

impl<N: Clone, U: Clone> Clone for Dispatcher<N, U> {
    fn clone(&self) -> Self {
        Self {
            nats: self.nats.clone(),
            upstream: self.upstream.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<N, U> Dispatcher<N, U>
where
    N: PublishClient,
    U: UpstreamClient,
{
    async fn dispatch(self, message: Message) {
        let request = self.upstream_request(&message);
        let url = request.url.clone();
        let method = request.method.clone();

        let (headers, payload) = match self.upstream.send(request).await {
            Ok(response) => {
                info!(%method, %url, status = response.status.as_u16(), "Upstream responded");
                let mut headers = nats_headers(&response.headers);
                headers.insert(HEADER_STATUS, response.status.as_str());
                (headers, response.body)
            }
            Err(e) => {
                warn!(%method, %url, error = %e, "Upstream request failed");
                let mut headers = async_nats::HeaderMap::new();
                headers.insert(HEADER_STATUS, UPSTREAM_FAILURE_STATUS.to_string().as_str());
                headers.insert(HEADER_ERROR, header_text(&e.to_string()).as_str());
                (headers, Default::default())
            }
        };

        let Some(reply) = message.reply else {
            debug!("No reply subject, response discarded");
            return;
        };
        let mut headers = headers;
        inject_trace_context(&mut headers);
        if let Err(e) = self
            .nats
            .publish_with_headers(reply.to_string(), headers, payload)
            .await
        {
            warn!(reply = %reply, error = %e, "Failed to publish reply");
        }
    }

    fn upstream_request(&self, message: &Message) -> UpstreamRequest {
        let method = bridge_header(message.headers.as_ref(), HEADER_METHOD)
            .unwrap_or(&self.config.method)
            .to_string();
        let url = self.config.url.resolve(&subject_segments(&message.subject));
        let mut headers = http_headers(message.headers.as_ref());
        headers.remove(HOST);

        UpstreamRequest {
            method,
            url,
            headers,
            body: message.payload.clone(),
        }
    }
}
