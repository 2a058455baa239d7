//! Reply collection for request/reply publishes.

use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use natsgate_nats::SubscribeClient;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::DeliveryError;

const INBOX_PREFIX: &str = "_INBOX";

/// A fresh, unique reply address.
pub fn inbox() -> String {
    format!("{}.{}", INBOX_PREFIX, Uuid::new_v4().simple())
}

/// What one collection window produced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Replies {
    /// Payloads in arrival order.
    pub payloads: Vec<Bytes>,
    /// Replies that arrived after the buffer was full.
    pub dropped: usize,
}

impl Replies {
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

/// Owns the reply subscription of one request. The subscription is released
/// exactly once: by [`ReplyCollector::cancel`], by the end of
/// [`ReplyCollector::collect`], or on drop, whichever comes first.
pub struct ReplyCollector<N: SubscribeClient> {
    inbox: String,
    subscription: Option<N::Subscription>,
}

impl<N: SubscribeClient> ReplyCollector<N> {
    /// Subscribes to a new inbox. Must happen before the request is published.
    pub async fn open(nats: &N) -> Result<Self, DeliveryError> {
        let inbox = inbox();
        let subscription = nats
            .subscribe(inbox.clone())
            .await
            .map_err(|e| DeliveryError::Subscribe {
                subject: inbox.clone(),
                error: e.to_string(),
            })?;
        debug!(inbox = %inbox, "Reply subscription opened");

        Ok(Self {
            inbox,
            subscription: Some(subscription),
        })
    }

    pub fn reply_to(&self) -> &str {
        &self.inbox
    }

    pub fn is_open(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn cancel(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            drop(subscription);
            debug!(inbox = %self.inbox, "Reply subscription cancelled");
        }
    }

    /// Waits until `window` elapses or `max_replies` replies arrived. At most
    /// `capacity` payloads are kept. Running out of time is not an error.
    pub async fn collect(
        &mut self,
        window: Duration,
        max_replies: Option<usize>,
        capacity: usize,
    ) -> Replies {
        let mut replies = Replies::default();
        let Some(subscription) = self.subscription.as_mut() else {
            return replies;
        };

        let deadline = Instant::now() + window;
        let mut received = 0usize;
        while max_replies.is_none_or(|max| received < max) {
            match timeout_at(deadline, subscription.next()).await {
                Ok(Some(message)) => {
                    received += 1;
                    if replies.payloads.len() < capacity {
                        replies.payloads.push(message.payload);
                    } else {
                        replies.dropped += 1;
                    }
                }
                Ok(None) => break,
                Err(_) => break,
            }
        }

        if replies.dropped > 0 {
            warn!(
                inbox = %self.inbox,
                dropped = replies.dropped,
                capacity,
                "Reply buffer full, replies dropped"
            );
        }
        self.cancel();
        replies
    }
}

impl<N: SubscribeClient> Drop for ReplyCollector<N> {
    fn drop(&mut self) {
        self.cancel();
    }
}
