//! Configuration schema types
//!
//! These types are deserialized from YAML configuration files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::observability::logging::LoggingConfig;
use crate::phase::{DEFAULT_OPTION_KEY, NetRole};

/// Root configuration for a phase subsystem.
///
/// Every field is optional in YAML; an empty mapping yields an authority
/// with a permissive tag registry and no initial phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case", deny_unknown_fields)]
pub struct PhaseConfig {
    /// Which side of the replication link this subsystem runs on
    pub role: NetRole,

    /// Phase started with `set_phase` when the authority is built
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_phase: Option<String>,

    /// Key read from and written to game-mode option strings
    pub option_key: String,

    /// Reject tags that are not declared in `known_phases`
    pub strict_tags: bool,

    /// Declared phase tags, registered (with their ancestors) up front
    pub known_phases: Vec<String>,

    /// Optional JSONL journal of every transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events_file: Option<PathBuf>,

    /// Subscriber settings, installed with `observability::init_logging`
    pub logging: LoggingConfig,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            role: NetRole::Authority,
            initial_phase: None,
            option_key: DEFAULT_OPTION_KEY.to_owned(),
            strict_tags: false,
            known_phases: Vec::new(),
            events_file: None,
            logging: LoggingConfig::default(),
        }
    }
}
