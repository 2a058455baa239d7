//! Error types for the bridge.

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// A failure that ends one bridged HTTP request. Never affects the shared
/// connection or other in-flight requests.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("configuration error: NATS server alias '{0}' not found")]
    UnknownServerAlias(String),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("failed to read request body: {0}")]
    ReadBody(String),
}

/// The broker refused or failed an operation.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to subscribe to '{subject}': {error}")]
    Subscribe { subject: String, error: String },

    #[error("failed to publish to '{subject}': {error}")]
    Publish { subject: String, error: String },

    #[error("failed to flush after publishing to '{subject}': {error}")]
    Flush { subject: String, error: String },

    #[error("request to '{subject}' failed: {error}")]
    Request { subject: String, error: String },

    #[error("request to '{subject}' timed out")]
    Timeout { subject: String },
}

/// The reverse bridge could not complete an outbound HTTP call.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("invalid HTTP method '{0}'")]
    InvalidMethod(String),

    #[error("upstream request to {url} failed: {error}")]
    Transport { url: String, error: String },
}

impl BridgeError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnknownServerAlias(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Delivery(DeliveryError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            Self::Delivery(_) => StatusCode::BAD_GATEWAY,
            Self::ReadBody(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::error!(error = %self, status = status.as_u16(), "Bridge request failed");

        let mut response = Response::new(Body::from(self.to_string()));
        *response.status_mut() = status;
        response
    }
}
