//! In-process stand-in for a NATS server.
//!
//! Publishes are recorded and routed to live mock subscriptions (with `*` and
//! `>` wildcards and queue groups), so request/reply flows can be exercised
//! end to end without a broker.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_nats::subject::ToSubject;
use async_nats::{HeaderMap, Message};
use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc;

use crate::client::{FlushClient, PublishClient, RequestClient, SubscribeClient};

#[derive(Debug, Clone)]
pub struct MockError(pub String);

impl std::fmt::Display for MockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for MockError {}

#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub subject: String,
    pub reply: Option<String>,
    pub headers: HeaderMap,
    pub payload: Bytes,
}

/// Canned answer for [`RequestClient::request_with_headers`].
#[derive(Debug, Clone, Default)]
pub struct MockResponse {
    pub headers: HeaderMap,
    pub payload: Bytes,
    /// Simulated responder latency.
    pub delay: Duration,
}

#[derive(Debug)]
struct MockSubscriber {
    sid: u64,
    filter: String,
    queue_group: Option<String>,
    sender: mpsc::UnboundedSender<Message>,
}

#[derive(Debug, Default)]
struct MockState {
    published: Vec<PublishedMessage>,
    requests: Vec<PublishedMessage>,
    subscribers: Vec<MockSubscriber>,
    subscribed: Vec<String>,
    unsubscribed: Vec<String>,
    next_sid: u64,
    responses: HashMap<String, MockResponse>,
    publish_failures: u32,
    subscribe_failures: u32,
    request_failures: u32,
    flushes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MockNatsClient {
    state: Arc<Mutex<MockState>>,
}

impl MockNatsClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_publish(&self) {
        self.fail_publish_count(1);
    }

    pub fn fail_publish_count(&self, n: u32) {
        self.state.lock().unwrap().publish_failures = n;
    }

    pub fn fail_next_subscribe(&self) {
        self.state.lock().unwrap().subscribe_failures = 1;
    }

    pub fn fail_next_request(&self) {
        self.state.lock().unwrap().request_failures = 1;
    }

    pub fn set_response(&self, subject: &str, payload: impl Into<Bytes>) {
        self.set_response_with(
            subject,
            MockResponse {
                payload: payload.into(),
                ..Default::default()
            },
        );
    }

    pub fn set_response_with(&self, subject: &str, response: MockResponse) {
        self.state
            .lock()
            .unwrap()
            .responses
            .insert(subject.to_string(), response);
    }

    /// Every successfully published message, in publish order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn published_subjects(&self) -> Vec<String> {
        self.published().into_iter().map(|m| m.subject).collect()
    }

    /// Every request issued through [`RequestClient`], successful or not.
    pub fn requests(&self) -> Vec<PublishedMessage> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn subscribed_to(&self) -> Vec<String> {
        self.state.lock().unwrap().subscribed.clone()
    }

    /// Subjects whose subscriptions were dropped, one entry per drop.
    pub fn unsubscribed_from(&self) -> Vec<String> {
        self.state.lock().unwrap().unsubscribed.clone()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.state.lock().unwrap().subscribers.len()
    }

    pub fn flush_count(&self) -> usize {
        self.state.lock().unwrap().flushes
    }

    fn take_failure(counter: &mut u32) -> bool {
        if *counter > 0 {
            *counter -= 1;
            true
        } else {
            false
        }
    }

    fn publish_message(&self, message: PublishedMessage) -> Result<(), MockError> {
        let targets = {
            let mut state = self.state.lock().unwrap();
            if Self::take_failure(&mut state.publish_failures) {
                return Err(MockError("simulated publish failure".to_string()));
            }
            state.published.push(message.clone());

            let mut seen_groups: Vec<&str> = Vec::new();
            let mut targets = Vec::new();
            for sub in &state.subscribers {
                if !subject_matches(&sub.filter, &message.subject) {
                    continue;
                }
                if let Some(group) = sub.queue_group.as_deref() {
                    if seen_groups.contains(&group) {
                        continue;
                    }
                    seen_groups.push(group);
                }
                targets.push(sub.sender.clone());
            }
            targets
        };

        for sender in targets {
            let _ = sender.send(build_message(
                &message.subject,
                message.reply.as_deref(),
                message.headers.clone(),
                message.payload.clone(),
            ));
        }
        Ok(())
    }

    fn open_subscription(
        &self,
        filter: String,
        queue_group: Option<String>,
    ) -> Result<MockSubscription, MockError> {
        let mut state = self.state.lock().unwrap();
        if Self::take_failure(&mut state.subscribe_failures) {
            return Err(MockError("simulated subscribe failure".to_string()));
        }
        state.next_sid += 1;
        let sid = state.next_sid;
        let (sender, receiver) = mpsc::unbounded_channel();
        state.subscribers.push(MockSubscriber {
            sid,
            filter: filter.clone(),
            queue_group,
            sender,
        });
        state.subscribed.push(filter.clone());

        Ok(MockSubscription {
            sid,
            subject: filter,
            receiver,
            state: Arc::clone(&self.state),
        })
    }
}

/// Subscription handed out by [`MockNatsClient`]; unsubscribes on drop.
#[derive(Debug)]
pub struct MockSubscription {
    sid: u64,
    subject: String,
    receiver: mpsc::UnboundedReceiver<Message>,
    state: Arc<Mutex<MockState>>,
}

impl Stream for MockSubscription {
    type Item = Message;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for MockSubscription {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.subscribers.retain(|s| s.sid != self.sid);
            state.unsubscribed.push(self.subject.clone());
        }
    }
}

fn build_message(subject: &str, reply: Option<&str>, headers: HeaderMap, payload: Bytes) -> Message {
    Message {
        subject: subject.into(),
        reply: reply.map(Into::into),
        length: payload.len(),
        payload,
        headers: Some(headers),
        status: None,
        description: None,
    }
}

/// NATS subject matching: `*` matches one token, a trailing `>` one or more.
pub fn subject_matches(filter: &str, subject: &str) -> bool {
    let mut filter_tokens = filter.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (filter_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(f), Some(s)) if f == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

impl PublishClient for MockNatsClient {
    type PublishError = MockError;

    async fn publish_with_headers<S: ToSubject + Send>(
        &self,
        subject: S,
        headers: HeaderMap,
        payload: Bytes,
    ) -> Result<(), MockError> {
        self.publish_message(PublishedMessage {
            subject: subject.to_subject().to_string(),
            reply: None,
            headers,
            payload,
        })
    }

    async fn publish_with_reply_and_headers<S: ToSubject + Send, R: ToSubject + Send>(
        &self,
        subject: S,
        reply: R,
        headers: HeaderMap,
        payload: Bytes,
    ) -> Result<(), MockError> {
        self.publish_message(PublishedMessage {
            subject: subject.to_subject().to_string(),
            reply: Some(reply.to_subject().to_string()),
            headers,
            payload,
        })
    }
}

impl SubscribeClient for MockNatsClient {
    type SubscribeError = MockError;
    type Subscription = MockSubscription;

    async fn subscribe<S: ToSubject + Send>(&self, subject: S) -> Result<MockSubscription, MockError> {
        self.open_subscription(subject.to_subject().to_string(), None)
    }

    async fn queue_subscribe<S: ToSubject + Send>(
        &self,
        subject: S,
        queue_group: String,
    ) -> Result<MockSubscription, MockError> {
        self.open_subscription(subject.to_subject().to_string(), Some(queue_group))
    }
}

impl RequestClient for MockNatsClient {
    type RequestError = MockError;

    async fn request_with_headers<S: ToSubject + Send>(
        &self,
        subject: S,
        headers: HeaderMap,
        payload: Bytes,
    ) -> Result<Message, MockError> {
        let subject = subject.to_subject().to_string();
        let response = {
            let mut state = self.state.lock().unwrap();
            state.requests.push(PublishedMessage {
                subject: subject.clone(),
                reply: None,
                headers,
                payload,
            });
            if Self::take_failure(&mut state.request_failures) {
                return Err(MockError("simulated request failure".to_string()));
            }
            state.responses.get(&subject).cloned()
        };

        let Some(response) = response else {
            return Err(MockError(format!("no responders for subject: {}", subject)));
        };
        if !response.delay.is_zero() {
            tokio::time::sleep(response.delay).await;
        }
        Ok(build_message(&subject, None, response.headers, response.payload))
    }
}

impl FlushClient for MockNatsClient {
    type FlushError = MockError;

    async fn flush(&self) -> Result<(), MockError> {
        self.state.lock().unwrap().flushes += 1;
        Ok(())
    }
}
