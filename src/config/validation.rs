//! Configuration validation
//!
//! Validation runs on the deserialized `PhaseConfig` and collects ALL
//! errors rather than stopping at the first one.

use std::collections::HashSet;

use crate::config::schema::PhaseConfig;
use crate::error::{Severity, ValidationIssue};
use crate::phase::NetRole;
use crate::tag::PhaseTag;

// ============================================================================
// Public API
// ============================================================================

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors (prevent loading).
    pub errors: Vec<ValidationIssue>,

    /// Validation warnings (informational).
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Configuration validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a configuration and returns every issue found.
    pub fn validate(&mut self, config: &PhaseConfig) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        let known = self.validate_known_phases(config);
        self.validate_initial_phase(config, &known);
        self.validate_option_key(config);
        self.validate_logging(config);

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Field Validation
    // ========================================================================

    /// Parses each declared tag and returns the set of valid ones together
    /// with their ancestors.
    fn validate_known_phases(&mut self, config: &PhaseConfig) -> HashSet<PhaseTag> {
        let mut seen = HashSet::new();
        let mut known = HashSet::new();

        for (i, raw) in config.known_phases.iter().enumerate() {
            let path = format!("known_phases[{i}]");
            match PhaseTag::parse(raw) {
                Ok(tag) => {
                    if !seen.insert(tag.clone()) {
                        self.add_warning(&path, &format!("Duplicate phase tag '{tag}'"));
                    }
                    known.extend(tag.self_and_ancestors());
                }
                Err(e) => self.add_error(&path, &e.to_string()),
            }
        }

        if config.strict_tags && config.known_phases.is_empty() {
            self.add_warning(
                "strict_tags",
                "Strict tags enabled with no known_phases; every tag will be rejected",
            );
        }
        known
    }

    fn validate_initial_phase(&mut self, config: &PhaseConfig, known: &HashSet<PhaseTag>) {
        let Some(raw) = &config.initial_phase else {
            return;
        };

        let tag = match PhaseTag::parse(raw) {
            Ok(tag) => tag,
            Err(e) => {
                self.add_error("initial_phase", &e.to_string());
                return;
            }
        };

        if config.strict_tags && !known.contains(&tag) {
            self.add_error(
                "initial_phase",
                &format!("Initial phase '{tag}' is not declared in known_phases"),
            );
        }

        if config.role == NetRole::Client {
            self.add_warning(
                "initial_phase",
                "Initial phase is ignored on clients; the authority replicates it",
            );
        }
    }

    fn validate_option_key(&mut self, config: &PhaseConfig) {
        let key = config.option_key.trim();
        if key.is_empty() {
            self.add_error("option_key", "Option key cannot be empty");
        } else if key.contains(['?', '=']) {
            self.add_error("option_key", "Option key cannot contain '?' or '='");
        } else if key.len() != config.option_key.len() {
            self.add_warning("option_key", "Option key has surrounding whitespace");
        }
    }

    fn validate_logging(&mut self, config: &PhaseConfig) {
        if let Err(err) = config.logging.filter() {
            self.add_error("logging.level", &format!("Invalid log filter: {err}"));
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Adds an error to the collection.
    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    /// Adds a warning to the collection.
    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}
