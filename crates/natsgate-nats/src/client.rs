//! One trait per broker operation, so each bridge component depends only on
//! what it actually calls and tests can swap in [`crate::mocks`].

use std::error::Error;
use std::future::Future;

use async_nats::subject::ToSubject;
use async_nats::{Client as NatsAsyncClient, HeaderMap, Message, Subscriber};
use bytes::Bytes;
use futures_util::Stream;

pub trait PublishClient: Send + Sync + Clone + 'static {
    type PublishError: Error + Send + Sync;

    fn publish_with_headers<S: ToSubject + Send>(
        &self,
        subject: S,
        headers: HeaderMap,
        payload: Bytes,
    ) -> impl Future<Output = Result<(), Self::PublishError>> + Send;

    fn publish_with_reply_and_headers<S: ToSubject + Send, R: ToSubject + Send>(
        &self,
        subject: S,
        reply: R,
        headers: HeaderMap,
        payload: Bytes,
    ) -> impl Future<Output = Result<(), Self::PublishError>> + Send;
}

/// A live subscription is a stream of messages. Dropping it unsubscribes.
pub trait SubscribeClient: Send + Sync + Clone + 'static {
    type SubscribeError: Error + Send + Sync;
    type Subscription: Stream<Item = Message> + Send + Unpin + 'static;

    fn subscribe<S: ToSubject + Send>(
        &self,
        subject: S,
    ) -> impl Future<Output = Result<Self::Subscription, Self::SubscribeError>> + Send;

    fn queue_subscribe<S: ToSubject + Send>(
        &self,
        subject: S,
        queue_group: String,
    ) -> impl Future<Output = Result<Self::Subscription, Self::SubscribeError>> + Send;
}

pub trait RequestClient: Send + Sync + Clone + 'static {
    type RequestError: Error + Send + Sync;

    fn request_with_headers<S: ToSubject + Send>(
        &self,
        subject: S,
        headers: HeaderMap,
        payload: Bytes,
    ) -> impl Future<Output = Result<Message, Self::RequestError>> + Send;
}

pub trait FlushClient: Send + Sync + Clone + 'static {
    type FlushError: Error + Send + Sync;

    fn flush(&self) -> impl Future<Output = Result<(), Self::FlushError>> + Send;
}

impl PublishClient for NatsAsyncClient {
    type PublishError = async_nats::client::PublishError;

    async fn publish_with_headers<S: ToSubject + Send>(
        &self,
        subject: S,
        headers: HeaderMap,
        payload: Bytes,
    ) -> Result<(), Self::PublishError> {
        self.publish_with_headers(subject, headers, payload).await
    }

    async fn publish_with_reply_and_headers<S: ToSubject + Send, R: ToSubject + Send>(
        &self,
        subject: S,
        reply: R,
        headers: HeaderMap,
        payload: Bytes,
    ) -> Result<(), Self::PublishError> {
        self.publish_with_reply_and_headers(subject, reply, headers, payload)
            .await
    }
}

impl SubscribeClient for NatsAsyncClient {
    type SubscribeError = async_nats::client::SubscribeError;
    type Subscription = Subscriber;

    async fn subscribe<S: ToSubject + Send>(
        &self,
        subject: S,
    ) -> Result<Subscriber, Self::SubscribeError> {
        self.subscribe(subject).await
    }

    async fn queue_subscribe<S: ToSubject + Send>(
        &self,
        subject: S,
        queue_group: String,
    ) -> Result<Subscriber, Self::SubscribeError> {
        self.queue_subscribe(subject, queue_group).await
    }
}

impl RequestClient for NatsAsyncClient {
    type RequestError = async_nats::client::RequestError;

    async fn request_with_headers<S: ToSubject + Send>(
        &self,
        subject: S,
        headers: HeaderMap,
        payload: Bytes,
    ) -> Result<Message, Self::RequestError> {
        self.request_with_headers(subject, headers, payload).await
    }
}

impl FlushClient for NatsAsyncClient {
    type FlushError = async_nats::client::FlushError;

    async fn flush(&self) -> Result<(), Self::FlushError> {
        self.flush().await
    }
}
