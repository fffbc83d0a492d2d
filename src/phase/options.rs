//! Game-mode option strings.
//!
//! Sessions are often launched with a URL-style option string such as
//! `?Listen?GamePhase=Phase.Warmup?MaxPlayers=8`. The helpers here read the
//! initial phase from such a string and render the current root phase back
//! into one, so a server travel can carry the phase across.

use tracing::info;

use crate::error::PhaseError;

use super::entry::PhaseHandle;
use super::subsystem::PhaseSubsystem;

/// Option key used when none is configured.
pub const DEFAULT_OPTION_KEY: &str = "GamePhase";

/// Returns the value of `key` in a `?Key=Value?Key2=Value2` string.
///
/// Keys compare case-insensitively. A key present without `=` yields
/// `Some("")`.
#[must_use]
pub fn parse_option<'a>(options: &'a str, key: &str) -> Option<&'a str> {
    options
        .split('?')
        .filter(|pair| !pair.is_empty())
        .find_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            k.trim().eq_ignore_ascii_case(key).then_some(v.trim())
        })
}

/// Returns `true` if `key` appears in the option string.
#[must_use]
pub fn has_option(options: &str, key: &str) -> bool {
    parse_option(options, key).is_some()
}

impl PhaseSubsystem {
    /// Starts the phase named in `options` under this subsystem's option key.
    ///
    /// Returns `Ok(None)` when the key is absent or empty.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::WrongRole`] on a client, or a tag error when the
    /// option value is not a valid tag.
    pub fn initialize_from_options(&self, options: &str) -> Result<Option<PhaseHandle>, PhaseError> {
        self.require_authority("initialize_from_options")?;
        match parse_option(options, self.option_key()) {
            Some(value) if !value.is_empty() => {
                info!(key = self.option_key(), value, "initializing phase from game mode option");
                self.set_phase(value, None).map(Some)
            }
            _ => {
                info!(key = self.option_key(), "no game phase option");
                Ok(None)
            }
        }
    }

    /// Renders `?<key>=<tag>` for the most recently started root phase, or
    /// an empty string when no root phase is active.
    #[must_use]
    pub fn construct_option(&self) -> String {
        self.entries()
            .iter()
            .rev()
            .find(|e| !e.is_sub_phase())
            .map_or_else(String::new, |e| format!("?{}={}", self.option_key(), e.tag))
    }
}
