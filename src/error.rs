//! Error types for `gephase`
//!
//! All phase-system failures are local, recoverable signals returned to the
//! requester. Nothing in this crate aborts the process or leaves the phase
//! stack partially mutated.

use std::path::PathBuf;
use thiserror::Error;

use crate::phase::{NetRole, PhaseHandle, SubscriptionId};

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `gephase` operations.
///
/// Aggregates the domain-specific errors so callers that load configuration
/// and drive the subsystem can use a single `?` chain.
#[derive(Debug, Error)]
pub enum GePhaseError {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Phase subsystem error
    #[error(transparent)]
    Phase(#[from] PhaseError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl GePhaseError {
    /// Returns a short, stable category name used as a metrics label.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::Yaml(_) => "config",
            Self::Phase(e) => e.category(),
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }
}

// ============================================================================
// Phase Errors
// ============================================================================

/// Phase subsystem errors.
///
/// Every variant is caller-correctable. The subsystem never changes state
/// when it returns one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhaseError {
    /// The raw tag string is empty or malformed
    #[error("invalid phase tag '{tag}': {reason}")]
    InvalidTagFormat {
        /// The rejected input
        tag: String,
        /// What was wrong with it
        reason: String,
    },

    /// The tag is well-formed but not declared in a strict registry
    #[error("phase tag '{0}' is not registered")]
    UnknownTag(String),

    /// No active entry carries this handle (already ended or never existed)
    #[error("unknown phase handle {0}")]
    UnknownHandle(PhaseHandle),

    /// No live subscription carries this id
    #[error("unknown subscription {0}")]
    UnknownSubscription(SubscriptionId),

    /// A sub-phase was requested under a parent that is not active
    #[error("parent phase '{0}' is not active")]
    ParentNotActive(String),

    /// No active entry carries this exact tag
    #[error("phase '{0}' is not active")]
    PhaseNotActive(String),

    /// The operation is reserved for the other network role
    #[error("{operation} is not permitted on a {role} subsystem")]
    WrongRole {
        /// Name of the rejected operation
        operation: &'static str,
        /// Role of the subsystem that rejected it
        role: NetRole,
    },
}

impl PhaseError {
    /// Returns a short, stable category name used as a metrics label.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::InvalidTagFormat { .. } => "invalid_tag",
            Self::UnknownTag(_) => "unknown_tag",
            Self::UnknownHandle(_) => "unknown_handle",
            Self::UnknownSubscription(_) => "unknown_subscription",
            Self::ParentNotActive(_) => "parent_not_active",
            Self::PhaseNotActive(_) => "phase_not_active",
            Self::WrongRole { .. } => "wrong_role",
        }
    }

    pub(crate) fn invalid_tag(tag: &str, reason: impl Into<String>) -> Self {
        Self::InvalidTagFormat {
            tag: tag.to_owned(),
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the configuration file (`<inline>` for string input)
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Configuration validation failed
    #[error("validation failed for {path}")]
    ValidationError {
        /// Path to the configuration file
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },

    /// Referenced configuration file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found during configuration validation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the problematic field (e.g. `"known_phases[2]"`)
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Prevents the configuration from being used
    Error,
    /// Informational, the configuration still loads
    Warning,
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for `gephase` operations.
pub type Result<T> = std::result::Result<T, GePhaseError>;

// ============================================================================
// Tests
// ============================================================================
