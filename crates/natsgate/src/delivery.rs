//! Publish handler settings and delivery mode selection.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use serde::Deserialize;

use crate::subject::SubjectTemplate;

pub const DEFAULT_SERVER_ALIAS: &str = "default";
pub const DEFAULT_AWAIT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(300);
pub const DEFAULT_REPLY_BUFFER: usize = 10;

/// How a publish handler delivers one HTTP request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    FireAndForget,
    RequestReply,
}

impl DeliveryMode {
    pub fn select(config: &DeliveryConfig) -> Self {
        if config.await_response {
            Self::RequestReply
        } else {
            Self::FireAndForget
        }
    }
}

/// How collected replies are joined into one response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyFraming {
    /// Payloads back to back.
    #[default]
    Concatenated,
    /// One payload per line.
    Newline,
}

impl ReplyFraming {
    pub fn join(self, payloads: &[Bytes]) -> Bytes {
        let total: usize = payloads.iter().map(Bytes::len).sum();
        let mut body = BytesMut::with_capacity(total + payloads.len());
        for (i, payload) in payloads.iter().enumerate() {
            if self == Self::Newline && i > 0 {
                body.extend_from_slice(b"\n");
            }
            body.extend_from_slice(payload);
        }
        body.freeze()
    }
}

/// Settings of one publish handler. Immutable once built.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub server_alias: String,
    pub subject: SubjectTemplate,
    pub await_response: bool,
    /// The whole collection window, used as is.
    pub await_response_timeout: Duration,
    /// Stop waiting once this many replies arrived.
    pub max_replies: Option<usize>,
    /// Replies kept per request; later ones are dropped.
    pub reply_buffer: usize,
    pub reply_framing: ReplyFraming,
}

impl DeliveryConfig {
    pub fn new(subject: impl Into<SubjectTemplate>) -> Self {
        Self {
            server_alias: DEFAULT_SERVER_ALIAS.to_string(),
            subject: subject.into(),
            await_response: false,
            await_response_timeout: DEFAULT_AWAIT_RESPONSE_TIMEOUT,
            max_replies: None,
            reply_buffer: DEFAULT_REPLY_BUFFER,
            reply_framing: ReplyFraming::default(),
        }
    }

    pub fn with_server_alias(mut self, alias: impl Into<String>) -> Self {
        self.server_alias = alias.into();
        self
    }

    /// Switch to request/reply, collecting for `timeout`.
    pub fn awaiting_response(mut self, timeout: Duration) -> Self {
        self.await_response = true;
        self.await_response_timeout = timeout;
        self
    }

    pub fn with_max_replies(mut self, max: usize) -> Self {
        self.max_replies = Some(max);
        self
    }

    pub fn with_reply_buffer(mut self, capacity: usize) -> Self {
        self.reply_buffer = capacity;
        self
    }

    pub fn with_reply_framing(mut self, framing: ReplyFraming) -> Self {
        self.reply_framing = framing;
        self
    }

    pub fn mode(&self) -> DeliveryMode {
        DeliveryMode::select(self)
    }
}
