//! HTTP → NATS publishing: fire-and-forget and request/reply.
//!
//! [`publish_middleware`] sits in front of a route. Both modes let the request
//! continue down the pipeline. Request/reply first waits for the window and
//! writes whatever replies arrived ahead of the downstream response body.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, header};
use axum::middleware::Next;
use axum::response::Response;
use bytes::Bytes;
use futures_util::{StreamExt, stream};
use natsgate_nats::{FlushClient, PublishClient, SubscribeClient};
use tracing::{Span, debug, info, instrument};

use crate::delivery::{DeliveryConfig, DeliveryMode, ReplyFraming};
use crate::error::{BridgeError, DeliveryError};
use crate::http_request::{BridgeRequest, HEADER_REPLY_COUNT};
use crate::registry::ServerRegistry;
use crate::reply::{ReplyCollector, Replies};

/// Outcome of one successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivered {
    Published { subject: String },
    Replies { subject: String, replies: Replies },
}

/// One configured publish route: a delivery config bound to the registry.
pub struct PublishHandler<N> {
    registry: Arc<ServerRegistry<N>>,
    config: Arc<DeliveryConfig>,
}

impl<N> Clone for PublishHandler<N> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.config),
        }
    }
}

impl<N> PublishHandler<N>
where
    N: PublishClient + SubscribeClient + FlushClient,
{
    pub fn new(registry: Arc<ServerRegistry<N>>, config: DeliveryConfig) -> Self {
        Self {
            registry,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    #[instrument(
        name = "natsgate.publish",
        skip_all,
        fields(
            method = %request.method(),
            path = request.path(),
            subject = tracing::field::Empty,
        )
    )]
    pub async fn deliver(&self, request: &BridgeRequest) -> Result<Delivered, BridgeError> {
        let nats = self.registry.lookup(&self.config.server_alias)?;
        let subject = self.config.subject.resolve(request.segments());
        Span::current().record("subject", subject.as_str());

        match self.config.mode() {
            DeliveryMode::FireAndForget => {
                publish(nats, &subject, request).await?;
                Ok(Delivered::Published { subject })
            }
            DeliveryMode::RequestReply => {
                let replies = self.request_reply(nats, &subject, request).await?;
                Ok(Delivered::Replies { subject, replies })
            }
        }
    }

    async fn request_reply(
        &self,
        nats: &N,
        subject: &str,
        request: &BridgeRequest,
    ) -> Result<Replies, DeliveryError> {
        let mut collector = ReplyCollector::open(nats).await?;

        if let Err(e) = nats
            .publish_with_reply_and_headers(
                subject.to_string(),
                collector.reply_to().to_string(),
                request.nats_headers(),
                request.body().clone(),
            )
            .await
        {
            collector.cancel();
            return Err(DeliveryError::Publish {
                subject: subject.to_string(),
                error: e.to_string(),
            });
        }
        debug!(subject, reply_to = collector.reply_to(), "Awaiting replies");

        let replies = collector
            .collect(
                self.config.await_response_timeout,
                self.config.max_replies,
                self.config.reply_buffer,
            )
            .await;
        info!(subject, replies = replies.len(), dropped = replies.dropped, "Request/reply finished");
        Ok(replies)
    }
}

async fn publish<N>(nats: &N, subject: &str, request: &BridgeRequest) -> Result<(), DeliveryError>
where
    N: PublishClient + FlushClient,
{
    nats.publish_with_headers(
        subject.to_string(),
        request.nats_headers(),
        request.body().clone(),
    )
    .await
    .map_err(|e| DeliveryError::Publish {
        subject: subject.to_string(),
        error: e.to_string(),
    })?;

    nats.flush().await.map_err(|e| DeliveryError::Flush {
        subject: subject.to_string(),
        error: e.to_string(),
    })?;

    info!(subject, bytes = request.body().len(), "Published");
    Ok(())
}

/// Puts the joined replies ahead of the downstream body and adds
/// `X-NatsBridge-Reply-Count`. Status and other headers stay as downstream
/// set them.
pub fn prepend_replies(response: Response, replies: &Replies, framing: ReplyFraming) -> Response {
    let (mut parts, body) = response.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    parts
        .headers
        .insert(HEADER_REPLY_COUNT, HeaderValue::from(replies.len()));

    let joined = framing.join(&replies.payloads);
    let body = stream::once(async move { Ok::<Bytes, axum::Error>(joined) })
        .chain(body.into_data_stream());
    Response::from_parts(parts, Body::from_stream(body))
}

/// Axum middleware for a publish route, installed with
/// `axum::middleware::from_fn_with_state`.
pub async fn publish_middleware<N>(
    State(handler): State<PublishHandler<N>>,
    request: Request,
    next: Next,
) -> Result<Response, BridgeError>
where
    N: PublishClient + SubscribeClient + FlushClient,
{
    let (parts, body) = request.into_parts();
    let body: Bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| BridgeError::ReadBody(e.to_string()))?;
    let snapshot = BridgeRequest::from_parts(&parts, body.clone());

    let delivered = handler.deliver(&snapshot).await?;
    let response = next.run(Request::from_parts(parts, Body::from(body))).await;
    Ok(match delivered {
        Delivered::Published { .. } => response,
        Delivered::Replies { replies, .. } => {
            prepend_replies(response, &replies, handler.config().reply_framing)
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use axum::Router;
    use axum::http::{Method, StatusCode, Uri};
    use axum::middleware::from_fn_with_state;
    use axum::routing::any;
    use natsgate_nats::MockNatsClient;
    use tower::ServiceExt;

    use crate::http_request::{HEADER_METHOD, HEADER_URL_PATH};

    fn handler(mock: &MockNatsClient, config: DeliveryConfig) -> PublishHandler<MockNatsClient> {
        let registry = ServerRegistry::new().with("default", mock.clone());
        PublishHandler::new(Arc::new(registry), config)
    }

    fn bridge_request(path: &str, body: &'static str) -> BridgeRequest {
        BridgeRequest::new(
            Method::POST,
            &path.parse::<Uri>().unwrap(),
            Default::default(),
            Bytes::from(body),
        )
    }

    /// Answers the first message on `subject` with one reply per `(delay, payload)`.
    async fn spawn_responder(mock: &MockNatsClient, subject: &str, replies: Vec<(u64, &'static str)>) {
        let mut requests = mock.subscribe(subject.to_string()).await.unwrap();
        let responder = mock.clone();
        tokio::spawn(async move {
            let message = requests.next().await.unwrap();
            let reply_to = message.reply.unwrap().to_string();
            for (delay, payload) in replies {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                responder
                    .publish_with_headers(reply_to.clone(), async_nats::HeaderMap::new(), Bytes::from(payload))
                    .await
                    .unwrap();
            }
        });
    }

    fn inbox_unsubscribes(mock: &MockNatsClient) -> usize {
        mock.unsubscribed_from()
            .iter()
            .filter(|s| s.starts_with("_INBOX."))
            .count()
    }

    #[tokio::test]
    async fn fire_and_forget_publishes_and_flushes() {
        let mock = MockNatsClient::new();
        let handler = handler(&mock, DeliveryConfig::new("events.{subject}"));

        let delivered = handler
            .deliver(&bridge_request("/orders/created?x=1", "payload"))
            .await
            .unwrap();

        assert_eq!(
            delivered,
            Delivered::Published {
                subject: "events.orders.created".to_string()
            }
        );
        let published = mock.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload, Bytes::from("payload"));
        assert_eq!(published[0].reply, None);
        assert_eq!(published[0].headers.get(HEADER_URL_PATH).unwrap().as_str(), "/orders/created");
        assert_eq!(mock.flush_count(), 1);
        assert!(mock.subscribed_to().is_empty());
    }

    #[tokio::test]
    async fn fire_and_forget_publish_failure_is_reported() {
        let mock = MockNatsClient::new();
        mock.fail_next_publish();
        let handler = handler(&mock, DeliveryConfig::new("events"));

        let err = handler.deliver(&bridge_request("/a", "")).await.unwrap_err();

        assert!(matches!(err, BridgeError::Delivery(DeliveryError::Publish { .. })));
        assert_eq!(mock.flush_count(), 0);
    }

    #[tokio::test]
    async fn unknown_alias_fails_before_any_network_call() {
        let mock = MockNatsClient::new();
        let config = DeliveryConfig::new("events")
            .with_server_alias("edge")
            .awaiting_response(Duration::from_millis(50));
        let handler = handler(&mock, config);

        let err = handler.deliver(&bridge_request("/a", "")).await.unwrap_err();

        assert!(matches!(err, BridgeError::UnknownServerAlias(ref alias) if alias == "edge"));
        assert!(mock.published().is_empty());
        assert!(mock.subscribed_to().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn collects_replies_arriving_within_the_window() {
        let mock = MockNatsClient::new();
        spawn_responder(&mock, "svc.echo", vec![(10, "a"), (20, "b"), (30, "c")]).await;
        let config = DeliveryConfig::new("svc.{subject}").awaiting_response(Duration::from_millis(50));
        let handler = handler(&mock, config);

        let delivered = handler.deliver(&bridge_request("/echo", "hi")).await.unwrap();

        let Delivered::Replies { subject, replies } = delivered else {
            panic!("expected replies");
        };
        assert_eq!(subject, "svc.echo");
        assert_eq!(ReplyFraming::Concatenated.join(&replies.payloads), Bytes::from("ab"));
        assert_eq!(inbox_unsubscribes(&mock), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_reply_is_not_lost() {
        let mock = MockNatsClient::new();
        spawn_responder(&mock, "svc.fast", vec![(0, "now")]).await;
        let config = DeliveryConfig::new("svc.fast").awaiting_response(Duration::from_millis(50));
        let handler = handler(&mock, config);

        let delivered = handler.deliver(&bridge_request("/", "")).await.unwrap();

        let Delivered::Replies { replies, .. } = delivered else {
            panic!("expected replies");
        };
        assert_eq!(replies.payloads, vec![Bytes::from("now")]);
    }

    #[tokio::test(start_paused = true)]
    async fn no_replies_yields_empty_result() {
        let mock = MockNatsClient::new();
        let config = DeliveryConfig::new("svc.silent").awaiting_response(Duration::from_millis(50));
        let handler = handler(&mock, config);

        let delivered = handler.deliver(&bridge_request("/", "")).await.unwrap();

        let Delivered::Replies { replies, .. } = delivered else {
            panic!("expected replies");
        };
        assert!(replies.is_empty());
        assert_eq!(inbox_unsubscribes(&mock), 1);
        assert_eq!(mock.active_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn max_replies_ends_the_wait_early() {
        let mock = MockNatsClient::new();
        spawn_responder(&mock, "svc.many", vec![(1, "1"), (1, "2"), (1, "3")]).await;
        let config = DeliveryConfig::new("svc.many")
            .awaiting_response(Duration::from_secs(60))
            .with_max_replies(2);
        let handler = handler(&mock, config);
        let started = tokio::time::Instant::now();

        let delivered = handler.deliver(&bridge_request("/", "")).await.unwrap();

        let Delivered::Replies { replies, .. } = delivered else {
            panic!("expected replies");
        };
        assert_eq!(replies.len(), 2);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(inbox_unsubscribes(&mock), 1);
    }

    #[tokio::test]
    async fn publish_failure_cancels_reply_subscription_once() {
        let mock = MockNatsClient::new();
        mock.fail_next_publish();
        let config = DeliveryConfig::new("svc").awaiting_response(Duration::from_millis(50));
        let handler = handler(&mock, config);

        let err = handler.deliver(&bridge_request("/", "")).await.unwrap_err();

        assert!(matches!(err, BridgeError::Delivery(DeliveryError::Publish { .. })));
        assert_eq!(mock.subscribed_to().len(), 1);
        assert_eq!(inbox_unsubscribes(&mock), 1);
        assert_eq!(mock.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn subscribe_failure_publishes_nothing() {
        let mock = MockNatsClient::new();
        mock.fail_next_subscribe();
        let config = DeliveryConfig::new("svc").awaiting_response(Duration::from_millis(50));
        let handler = handler(&mock, config);

        let err = handler.deliver(&bridge_request("/", "")).await.unwrap_err();

        assert!(matches!(err, BridgeError::Delivery(DeliveryError::Subscribe { .. })));
        assert!(mock.published().is_empty());
    }

    #[tokio::test]
    async fn middleware_continues_pipeline_after_publish() {
        let mock = MockNatsClient::new();
        let handler = handler(&mock, DeliveryConfig::new("audit.{subject}"));
        let app = Router::new()
            .route("/{*rest}", any(|body: Bytes| async move { (StatusCode::CREATED, body) }))
            .route_layer(from_fn_with_state(handler, publish_middleware::<MockNatsClient>));

        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/users/7")
                    .body(Body::from("data"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, Bytes::from("data"));
        let published = mock.published();
        assert_eq!(published[0].subject, "audit.users.7");
        assert_eq!(published[0].headers.get(HEADER_METHOD).unwrap().as_str(), "PUT");
    }

    #[tokio::test(start_paused = true)]
    async fn middleware_writes_replies_then_runs_downstream() {
        let mock = MockNatsClient::new();
        spawn_responder(&mock, "svc.quote", vec![(5, "x"), (5, "y")]).await;
        let config = DeliveryConfig::new("svc.{subject}")
            .awaiting_response(Duration::from_millis(50))
            .with_reply_framing(ReplyFraming::Newline);
        let calls = Arc::new(AtomicUsize::new(0));
        let downstream_calls = Arc::clone(&calls);
        let app = Router::new()
            .route(
                "/{*rest}",
                any(move |body: Bytes| {
                    let calls = Arc::clone(&downstream_calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        (StatusCode::CREATED, [("x-downstream", "yes")], format!("|{}", body.len()))
                    }
                }),
            )
            .route_layer(from_fn_with_state(handler(&mock, config), publish_middleware::<MockNatsClient>));

        let response = app
            .oneshot(Request::builder().uri("/quote").body(Body::from("abc")).unwrap())
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get(HEADER_REPLY_COUNT).unwrap(), "2");
        assert_eq!(response.headers().get("x-downstream").unwrap(), "yes");
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, Bytes::from("x\ny|3"));
        assert_eq!(inbox_unsubscribes(&mock), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn middleware_runs_downstream_when_nobody_replies() {
        let mock = MockNatsClient::new();
        let config = DeliveryConfig::new("svc.silent").awaiting_response(Duration::from_millis(50));
        let app = Router::new()
            .route("/{*rest}", any(|| async { "tail" }))
            .route_layer(from_fn_with_state(handler(&mock, config), publish_middleware::<MockNatsClient>));

        let response = app
            .oneshot(Request::builder().uri("/x").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(HEADER_REPLY_COUNT).unwrap(), "0");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, Bytes::from("tail"));
    }

    #[tokio::test]
    async fn middleware_maps_unknown_alias_to_server_error() {
        let mock = MockNatsClient::new();
        let handler = handler(&mock, DeliveryConfig::new("a").with_server_alias("nope"));
        let app = Router::new()
            .route("/{*rest}", any(|| async { StatusCode::OK }))
            .route_layer(from_fn_with_state(handler, publish_middleware::<MockNatsClient>));

        let response = app
            .oneshot(Request::builder().uri("/x").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
