//! Adaptive, lag-driven load shedding which throttles only the hosts and clients responsible for
//! overload.

#![deny(missing_docs)]

#[cfg(doctest)]
use doc_comment::doctest;
#[cfg(doctest)]
doctest!("../README.md");

mod address;
mod config;
pub mod curve;
pub mod metrics;
pub mod middleware;
pub mod probe;
mod qos;
pub mod window;

pub use address::is_local_address;
pub use config::{ConfigError, QosConfig};
pub use middleware::{BeforeThrottle, Decision, Middleware, Request, Response};
pub use qos::{BadActor, Qos, QosError, UNKNOWN_KEY};
