//! HTTP ⇄ NATS bridge.
//!
//! # Architecture
//!
//! ```text
//! HTTP client → [publish route]  → publish on "events.{subject}"          (fire-and-forget)
//!             → [publish route]  → publish with reply inbox, collect N     (request/reply)
//!             → [request route]  → NATS request, first reply is the answer (single reply)
//!
//! NATS message → [reverse bridge] → HTTP call to "http://svc/{subject.asUrlPath}"
//!                                 → response published to the message's reply subject
//! ```
//!
//! Subjects and URLs are built from [`subject::SubjectTemplate`]s. Broker
//! connections live in a [`registry::ServerRegistry`] keyed by alias.

pub mod config;
pub mod delivery;
pub mod error;
pub mod http_request;
pub mod publish;
pub mod registry;
pub mod reply;
pub mod request;
pub mod server;
pub mod subject;
pub mod subscribe;
pub mod upstream;

pub use delivery::{DeliveryConfig, DeliveryMode, ReplyFraming};
pub use error::{BridgeError, DeliveryError, UpstreamError};
pub use http_request::BridgeRequest;
pub use publish::{Delivered, PublishHandler, publish_middleware};
pub use registry::ServerRegistry;
pub use reply::{ReplyCollector, Replies};
pub use request::{RequestConfig, RequestHandler, handle_request};
pub use subject::{SubjectTemplate, resolve};
pub use subscribe::{BridgeState, ReverseBridge, SubscribeConfig};
pub use upstream::{UpstreamClient, UpstreamRequest, UpstreamResponse};
