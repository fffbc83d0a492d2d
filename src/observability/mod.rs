//! Observability module
//!
//! Logging, metrics, and the structured event journal used to follow phase
//! transitions on both sides of the replication link.

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{Event, EventEmitter};
pub use logging::{ColorChoice, LogFormat, LoggingConfig, init_logging};
pub use metrics::init_metrics;
