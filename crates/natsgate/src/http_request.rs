//! Read-only snapshot of an HTTP request and the header conventions used to
//! carry HTTP metadata across NATS.

use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use bytes::Bytes;
use natsgate_nats::inject_trace_context;

use crate::subject::path_segments;

pub const HEADER_METHOD: &str = "X-NatsBridge-Method";
pub const HEADER_URL_PATH: &str = "X-NatsBridge-UrlPath";
pub const HEADER_URL_QUERY: &str = "X-NatsBridge-UrlQuery";
pub const HEADER_STATUS: &str = "X-NatsBridge-Status";
pub const HEADER_ERROR: &str = "X-NatsBridge-Error";
pub const HEADER_REPLY_COUNT: &str = "X-NatsBridge-Reply-Count";

const BRIDGE_HEADER_PREFIX: &str = "x-natsbridge-";

/// Hop-by-hop headers, plus `content-length` which the payload carries itself.
const UNFORWARDED_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "content-length",
];

pub fn is_bridge_header(name: &str) -> bool {
    name.get(..BRIDGE_HEADER_PREFIX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(BRIDGE_HEADER_PREFIX))
}

fn is_forwarded(name: &str) -> bool {
    !is_bridge_header(name)
        && !UNFORWARDED_HEADERS
            .iter()
            .any(|skipped| skipped.eq_ignore_ascii_case(name))
}

/// Everything the bridge needs from one HTTP request, captured once.
#[derive(Debug, Clone)]
pub struct BridgeRequest {
    method: Method,
    path: String,
    query: Option<String>,
    segments: Vec<String>,
    headers: HeaderMap,
    body: Bytes,
}

impl BridgeRequest {
    pub fn new(method: Method, uri: &Uri, headers: HeaderMap, body: Bytes) -> Self {
        let path = uri.path().to_string();
        Self {
            segments: path_segments(&path),
            query: uri.query().map(str::to_string),
            method,
            path,
            headers,
            body,
        }
    }

    pub fn from_parts(parts: &Parts, body: Bytes) -> Self {
        Self::new(parts.method.clone(), &parts.uri, parts.headers.clone(), body)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Headers for the outbound NATS message: the forwardable HTTP headers
    /// (multi-valued headers stay multi-valued), the request line as
    /// `X-NatsBridge-*` headers, and the current trace context.
    pub fn nats_headers(&self) -> async_nats::HeaderMap {
        let mut headers = nats_headers(&self.headers);
        headers.insert(HEADER_METHOD, self.method.as_str());
        headers.insert(HEADER_URL_PATH, self.path.as_str());
        if let Some(query) = &self.query {
            headers.insert(HEADER_URL_QUERY, query.as_str());
        }
        inject_trace_context(&mut headers);
        headers
    }
}

/// Forwardable HTTP headers as NATS headers. Values that are not visible
/// ASCII are skipped.
pub fn nats_headers(http_headers: &HeaderMap) -> async_nats::HeaderMap {
    let mut headers = async_nats::HeaderMap::new();
    for (name, value) in http_headers {
        if !is_forwarded(name.as_str()) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            headers.append(name.as_str(), value);
        }
    }
    headers
}

/// HTTP headers carried by a NATS message, minus the bridge's own headers.
pub fn http_headers(nats_headers: Option<&async_nats::HeaderMap>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let Some(nats_headers) = nats_headers else {
        return headers;
    };

    for (name, values) in nats_headers.iter() {
        let name = name.to_string();
        if !is_forwarded(&name) {
            continue;
        }
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value.as_str()) {
                headers.append(name.clone(), value);
            }
        }
    }
    headers
}

/// Single-valued bridge header lookup. Names match case-insensitively.
pub fn bridge_header<'a>(headers: Option<&'a async_nats::HeaderMap>, name: &str) -> Option<&'a str> {
    headers?
        .iter()
        .find(|(candidate, _)| candidate.to_string().eq_ignore_ascii_case(name))
        .and_then(|(_, values)| values.first())
        .map(|value| value.as_str())
}

/// Free text made safe for a single header line.
pub fn header_text(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}
