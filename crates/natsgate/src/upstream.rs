//! Outbound HTTP used by the reverse bridge.

use std::future::Future;

use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;

use crate::error::UpstreamError;

#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: String,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub trait UpstreamClient: Send + Sync + Clone + 'static {
    fn send(
        &self,
        request: UpstreamRequest,
    ) -> impl Future<Output = Result<UpstreamResponse, UpstreamError>> + Send;
}

impl UpstreamClient for reqwest::Client {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| UpstreamError::InvalidMethod(request.method.clone()))?;
        let transport = |e: reqwest::Error| UpstreamError::Transport {
            url: request.url.clone(),
            error: e.to_string(),
        };

        let response = self
            .request(method, &request.url)
            .headers(request.headers.clone())
            .body(request.body.clone())
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(transport)?;
        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
