//! Synchronous HTTP → NATS request: one reply becomes the HTTP response.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::Response;
use natsgate_nats::RequestClient;
use tracing::{Span, info, instrument};

use crate::delivery::DEFAULT_SERVER_ALIAS;
use crate::error::{BridgeError, DeliveryError};
use crate::http_request::{BridgeRequest, HEADER_STATUS, bridge_header, http_headers};
use crate::registry::ServerRegistry;
use crate::subject::SubjectTemplate;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub server_alias: String,
    pub subject: SubjectTemplate,
    pub timeout: Duration,
}

impl RequestConfig {
    pub fn new(subject: impl Into<SubjectTemplate>) -> Self {
        Self {
            server_alias: DEFAULT_SERVER_ALIAS.to_string(),
            subject: subject.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_server_alias(mut self, alias: impl Into<String>) -> Self {
        self.server_alias = alias.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub struct RequestHandler<N> {
    registry: Arc<ServerRegistry<N>>,
    config: Arc<RequestConfig>,
}

impl<N> Clone for RequestHandler<N> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.config),
        }
    }
}

impl<N: RequestClient> RequestHandler<N> {
    pub fn new(registry: Arc<ServerRegistry<N>>, config: RequestConfig) -> Self {
        Self {
            registry,
            config: Arc::new(config),
        }
    }

    #[instrument(
        name = "natsgate.request",
        skip_all,
        fields(
            method = %request.method(),
            path = request.path(),
            subject = tracing::field::Empty,
        )
    )]
    pub async fn request(&self, request: &BridgeRequest) -> Result<Response, BridgeError> {
        let nats = self.registry.lookup(&self.config.server_alias)?;
        let subject = self.config.subject.resolve(request.segments());
        Span::current().record("subject", subject.as_str());

        let reply = tokio::time::timeout(
            self.config.timeout,
            nats.request_with_headers(subject.clone(), request.nats_headers(), request.body().clone()),
        )
        .await
        .map_err(|_| DeliveryError::Timeout {
            subject: subject.clone(),
        })?
        .map_err(|e| DeliveryError::Request {
            subject: subject.clone(),
            error: e.to_string(),
        })?;

        let status = bridge_header(reply.headers.as_ref(), HEADER_STATUS)
            .and_then(|raw| raw.trim().parse::<u16>().ok())
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::OK);
        info!(subject = %subject, status = status.as_u16(), bytes = reply.payload.len(), "Request answered");

        let mut response = Response::new(Body::from(reply.payload));
        *response.status_mut() = status;
        *response.headers_mut() = http_headers(reply.headers.as_ref());
        Ok(response)
    }
}

/// Axum handler for a request route.
pub async fn handle_request<N: RequestClient>(
    State(handler): State<RequestHandler<N>>,
    request: Request,
) -> Result<Response, BridgeError> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| BridgeError::ReadBody(e.to_string()))?;
    handler.request(&BridgeRequest::from_parts(&parts, body)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::any;
    use bytes::Bytes;
    use natsgate_nats::{MockNatsClient, MockResponse};
    use tower::ServiceExt;

    use crate::http_request::{HEADER_METHOD, HEADER_URL_QUERY};

    fn app(mock: &MockNatsClient, config: RequestConfig) -> Router {
        let registry = Arc::new(ServerRegistry::new().with("default", mock.clone()));
        Router::new()
            .route("/", any(handle_request::<MockNatsClient>))
            .route("/{*rest}", any(handle_request::<MockNatsClient>))
            .with_state(RequestHandler::new(registry, config))
    }

    async fn body(response: Response) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap()
    }

    #[tokio::test]
    async fn reply_becomes_the_response() {
        let mock = MockNatsClient::new();
        let mut headers = async_nats::HeaderMap::new();
        headers.insert(HEADER_STATUS, "201");
        headers.insert("content-type", "application/json");
        mock.set_response_with(
            "rpc.users.create",
            MockResponse {
                headers,
                payload: Bytes::from(r#"{"id":7}"#),
                ..Default::default()
            },
        );

        let response = app(&mock, RequestConfig::new("rpc.{subject}"))
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/users/create?dry=false")
                    .body(Body::from("alice"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get("content-type").unwrap(), "application/json");
        assert!(response.headers().get(HEADER_STATUS).is_none());
        assert_eq!(body(response).await, Bytes::from(r#"{"id":7}"#));

        let sent = &mock.requests()[0];
        assert_eq!(sent.payload, Bytes::from("alice"));
        assert_eq!(sent.headers.get(HEADER_METHOD).unwrap().as_str(), "POST");
        assert_eq!(sent.headers.get(HEADER_URL_QUERY).unwrap().as_str(), "dry=false");
    }

    #[tokio::test]
    async fn missing_or_invalid_status_defaults_to_ok() {
        let mock = MockNatsClient::new();
        mock.set_response("rpc.plain", "hi");
        let mut headers = async_nats::HeaderMap::new();
        headers.insert(HEADER_STATUS, "abc");
        mock.set_response_with(
            "rpc.odd",
            MockResponse {
                headers,
                ..Default::default()
            },
        );
        let app = app(&mock, RequestConfig::new("rpc.{subject.0}"));

        for uri in ["/plain", "/odd"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{uri}");
        }
    }

    #[tokio::test]
    async fn no_responders_is_bad_gateway() {
        let mock = MockNatsClient::new();

        let response = app(&mock, RequestConfig::new("rpc.none"))
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_reply_is_gateway_timeout() {
        let mock = MockNatsClient::new();
        mock.set_response_with(
            "rpc.slow",
            MockResponse {
                delay: Duration::from_secs(5),
                ..Default::default()
            },
        );
        let config = RequestConfig::new("rpc.slow").with_timeout(Duration::from_millis(100));

        let response = app(&mock, config)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn unknown_alias_sends_nothing() {
        let mock = MockNatsClient::new();
        let config = RequestConfig::new("rpc.x").with_server_alias("elsewhere");

        let response = app(&mock, config)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(mock.requests().is_empty());
    }

    #[test]
    fn default_timeout_is_one_second() {
        assert_eq!(RequestConfig::new("a").timeout, Duration::from_secs(1));
    }
}
