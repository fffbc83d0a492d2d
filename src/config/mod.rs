//! Configuration module
//!
//! Loads and validates the YAML file that describes how a phase subsystem
//! is built: its network role, the declared phase tags, and the phase that
//! is started when the session comes up.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{ConfigLimits, ConfigLoader, LoadResult, LoadWarning, LoaderOptions};
pub use schema::PhaseConfig;
pub use validation::{ValidationResult, Validator};
