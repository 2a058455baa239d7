//! # natsgate-nats
//!
//! NATS plumbing shared by the natsgate bridge:
//! - per-operation client traits ([`PublishClient`], [`SubscribeClient`],
//!   [`RequestClient`], [`FlushClient`]) implemented for `async_nats::Client`
//! - connection with exponential reconnect backoff and event logging
//! - connection/auth settings resolved from the environment
//! - OpenTelemetry trace-context propagation into message headers
//! - an in-process mock broker (with the `test-support` feature)
//!
//! Components are generic over the traits they need:
//!
//! ```rust,no_run
//! use natsgate_nats::{PublishClient, SubscribeClient};
//!
//! pub struct Collector<N: PublishClient + SubscribeClient> {
//!     nats: N,
//! }
//! ```

pub mod auth;
pub mod client;
pub mod connect;
pub mod env;
pub mod trace;

#[cfg(any(test, feature = "test-support"))]
pub mod mocks;

pub use auth::{AuthSources, DEFAULT_NATS_URL, NatsAuth, NatsConfig};
pub use client::{FlushClient, PublishClient, RequestClient, SubscribeClient};
pub use connect::{ConnectError, connect};
pub use env::{ReadEnv, SystemEnv};
pub use trace::inject_trace_context;

#[cfg(feature = "test-support")]
pub use env::InMemoryEnv;
#[cfg(any(test, feature = "test-support"))]
pub use mocks::{MockError, MockNatsClient, MockResponse, MockSubscription, PublishedMessage};
