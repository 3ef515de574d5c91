//! Common utilities and types shared across leaderless

pub mod config;
pub mod error;
pub mod metrics;
pub mod tracing_middleware;
pub mod utils;

pub use config::{ReadAgreement, ReplicaEndpoint, ServiceConfig};
pub use error::{Error, Result};
pub use metrics::MetricsRegistry;
pub use utils::{parse_duration, validate_identifier};
