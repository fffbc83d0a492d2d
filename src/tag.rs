//! Hierarchical phase tags and the tag registry.
//!
//! A [`PhaseTag`] is a dot-segmented path such as `Phase.Match.Playing`.
//! Tags are validated once, when they are canonicalized, and afterwards
//! compared and queried without re-parsing. The [`TagRegistry`] interns
//! tags so repeated canonicalization of the same string hands back the same
//! shared allocation.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::PhaseError;

/// Segment separator.
pub const SEPARATOR: char = '.';

/// An immutable, hierarchical phase identifier.
///
/// Equality, ordering and hashing are by canonical string. Cloning is a
/// reference-count bump.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhaseTag(Arc<str>);

impl PhaseTag {
    /// Parses and validates a tag without interning it.
    ///
    /// Surrounding whitespace is trimmed. Prefer
    /// [`TagRegistry::canonicalize`] on hot paths so equal tags share one
    /// allocation.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::InvalidTagFormat`] when the input is empty,
    /// has an empty segment, or contains a character other than ASCII
    /// alphanumerics, `_` or `-` inside a segment.
    pub fn parse(raw: &str) -> Result<Self, PhaseError> {
        validate(raw).map(Self::from_canonical)
    }

    fn from_canonical(canonical: &str) -> Self {
        Self(Arc::from(canonical))
    }

    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the number of segments (`Phase.Match` has depth 2).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.matches(SEPARATOR).count() + 1
    }

    /// Iterates over the segments from root to leaf.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR)
    }

    /// Returns the direct parent, or `None` for a root tag.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0
            .rfind(SEPARATOR)
            .map(|idx| Self::from_canonical(&self.0[..idx]))
    }

    /// Iterates over this tag and then each ancestor up to the root.
    pub fn self_and_ancestors(&self) -> impl Iterator<Item = Self> {
        std::iter::successors(Some(self.clone()), Self::parent)
    }

    /// Returns `true` when `self == ancestor` or `ancestor`'s segments are a
    /// proper prefix of `self`'s.
    #[must_use]
    pub fn is_descendant_of(&self, ancestor: &Self) -> bool {
        if Arc::ptr_eq(&self.0, &ancestor.0) {
            return true;
        }
        let (me, other) = (self.as_str(), ancestor.as_str());
        me.starts_with(other)
            && (me.len() == other.len() || me.as_bytes()[other.len()] == SEPARATOR as u8)
    }

    /// Like [`is_descendant_of`](Self::is_descendant_of) but false for
    /// equal tags.
    #[must_use]
    pub fn is_strict_descendant_of(&self, ancestor: &Self) -> bool {
        self.0.len() > ancestor.0.len() && self.is_descendant_of(ancestor)
    }
}

/// How a pattern tag is compared against a candidate tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Only the pattern tag itself (`A.B` matches `A.B`, not `A.B.C`)
    #[default]
    Exact,
    /// The pattern tag and anything below it (`A.B` matches `A.B.C`)
    SelfAndDescendants,
}

impl MatchMode {
    /// Returns `true` if `candidate` satisfies `pattern` under this mode.
    #[must_use]
    pub fn matches(self, pattern: &PhaseTag, candidate: &PhaseTag) -> bool {
        match self {
            Self::Exact => candidate == pattern,
            Self::SelfAndDescendants => candidate.is_descendant_of(pattern),
        }
    }
}

/// Validates `raw` and returns the canonical (trimmed) slice.
fn validate(raw: &str) -> Result<&str, PhaseError> {
    let canonical = raw.trim();
    if canonical.is_empty() {
        return Err(PhaseError::invalid_tag(raw, "tag is empty"));
    }
    for (index, segment) in canonical.split(SEPARATOR).enumerate() {
        if segment.is_empty() {
            return Err(PhaseError::invalid_tag(
                raw,
                format!("segment {index} is empty"),
            ));
        }
        if let Some(bad) = segment
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(PhaseError::invalid_tag(
                raw,
                format!("illegal character {bad:?} in segment {index}"),
            ));
        }
    }
    Ok(canonical)
}

impl PartialEq for PhaseTag {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for PhaseTag {}

impl std::hash::Hash for PhaseTag {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl PartialOrd for PhaseTag {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PhaseTag {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Display for PhaseTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PhaseTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhaseTag({})", self.0)
    }
}

impl AsRef<str> for PhaseTag {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for PhaseTag {
    type Err = PhaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PhaseTag {
    type Error = PhaseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PhaseTag> for String {
    fn from(tag: PhaseTag) -> Self {
        tag.0.to_string()
    }
}

/// Interning registry for phase tags.
///
/// In permissive mode (the default) any well-formed tag is accepted and
/// interned on first sight. In strict mode only tags declared through
/// [`register`](Self::register) or [`strict`](Self::strict), plus their
/// ancestors, canonicalize.
///
/// All methods take `&self` and are safe to call concurrently.
#[derive(Debug, Default)]
pub struct TagRegistry {
    interned: DashMap<Arc<str>, PhaseTag>,
    strict: bool,
}

impl TagRegistry {
    /// Creates a permissive registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a strict registry pre-populated with `known` tags.
    ///
    /// # Errors
    ///
    /// Returns the first [`PhaseError::InvalidTagFormat`] among `known`.
    pub fn strict<I, S>(known: I) -> Result<Self, PhaseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let registry = Self {
            interned: DashMap::new(),
            strict: true,
        };
        for raw in known {
            registry.register(raw.as_ref())?;
        }
        Ok(registry)
    }

    /// Returns whether unknown tags are rejected.
    #[must_use]
    pub const fn is_strict(&self) -> bool {
        self.strict
    }

    /// Declares a tag (and its ancestors), returning the interned instance.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::InvalidTagFormat`] for malformed input.
    pub fn register(&self, raw: &str) -> Result<PhaseTag, PhaseError> {
        let tag = self.intern(validate(raw)?);
        let mut ancestor = tag.parent();
        while let Some(current) = ancestor {
            ancestor = current.parent();
            self.intern(current.as_str());
        }
        Ok(tag)
    }

    /// Validates `raw` and returns its interned tag.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::InvalidTagFormat`] for malformed input, or
    /// [`PhaseError::UnknownTag`] in strict mode when the tag was never
    /// registered.
    pub fn canonicalize(&self, raw: &str) -> Result<PhaseTag, PhaseError> {
        let canonical = validate(raw)?;
        if let Some(existing) = self.interned.get(canonical) {
            return Ok(existing.value().clone());
        }
        if self.strict {
            return Err(PhaseError::UnknownTag(canonical.to_owned()));
        }
        Ok(self.intern(canonical))
    }

    /// Returns `true` if `tag` has been interned.
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.interned.contains_key(tag.trim())
    }

    /// Number of interned tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.interned.len()
    }

    /// Returns `true` if nothing has been interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interned.is_empty()
    }

    fn intern(&self, canonical: &str) -> PhaseTag {
        if let Some(existing) = self.interned.get(canonical) {
            return existing.value().clone();
        }
        let tag = PhaseTag::from_canonical(canonical);
        self.interned
            .entry(Arc::clone(&tag.0))
            .or_insert(tag)
            .value()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tag(s: &str) -> PhaseTag {
        PhaseTag::parse(s).unwrap()
    }

    #[test]
    fn test_parse_valid_tags() {
        assert_eq!(tag("Phase").as_str(), "Phase");
        assert_eq!(tag("Phase.Match.Playing").as_str(), "Phase.Match.Playing");
        assert_eq!(tag("  Phase.Warmup \n").as_str(), "Phase.Warmup");
        assert_eq!(tag("Phase.Round_2.Sudden-Death").depth(), 3);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for raw in ["", "   ", ".Phase", "Phase.", "Phase..Match", "Phase/Match", "Phase Match"] {
            let err = PhaseTag::parse(raw).unwrap_err();
            assert!(
                matches!(err, PhaseError::InvalidTagFormat { .. }),
                "expected InvalidTagFormat for {raw:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_parent_and_ancestors() {
        let t = tag("Phase.Match.Playing");
        assert_eq!(t.parent(), Some(tag("Phase.Match")));
        assert_eq!(tag("Phase").parent(), None);

        let chain: Vec<String> = t.self_and_ancestors().map(String::from).collect();
        assert_eq!(chain, vec!["Phase.Match.Playing", "Phase.Match", "Phase"]);
    }

    #[test]
    fn test_descendant_requires_segment_boundary() {
        let playing = tag("Phase.Match.Playing");
        assert!(playing.is_descendant_of(&tag("Phase.Match")));
        assert!(playing.is_descendant_of(&tag("Phase")));
        assert!(playing.is_descendant_of(&playing));
        assert!(!tag("Phase.Matchmaking").is_descendant_of(&tag("Phase.Match")));
        assert!(!tag("Phase.Match").is_descendant_of(&playing));
    }

    #[test]
    fn test_strict_descendant_excludes_self() {
        let m = tag("Phase.Match");
        assert!(!m.is_strict_descendant_of(&m));
        assert!(tag("Phase.Match.Playing").is_strict_descendant_of(&m));
    }

    #[test]
    fn test_match_modes() {
        let pattern = tag("Phase.Match");
        let playing = tag("Phase.Match.Playing");
        assert!(MatchMode::Exact.matches(&pattern, &pattern));
        assert!(!MatchMode::Exact.matches(&pattern, &playing));
        assert!(MatchMode::SelfAndDescendants.matches(&pattern, &playing));
        assert!(!MatchMode::SelfAndDescendants.matches(&playing, &pattern));
    }

    #[test]
    fn test_registry_interns_equal_tags() {
        let registry = TagRegistry::new();
        let a = registry.canonicalize("Phase.Warmup").unwrap();
        let b = registry.canonicalize(" Phase.Warmup ").unwrap();
        assert!(Arc::ptr_eq(&a.0, &b.0));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_error_leaves_registry_untouched() {
        let registry = TagRegistry::new();
        assert!(registry.canonicalize("Phase..Bad").is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_strict_registry_rejects_undeclared() {
        let registry = TagRegistry::strict(["Phase.Match.Playing"]).unwrap();
        assert!(registry.is_strict());
        assert!(registry.canonicalize("Phase.Match.Playing").is_ok());
        // ancestors are registered implicitly
        assert!(registry.canonicalize("Phase.Match").is_ok());
        assert!(registry.canonicalize("Phase").is_ok());
        assert_eq!(
            registry.canonicalize("Phase.Warmup").unwrap_err(),
            PhaseError::UnknownTag("Phase.Warmup".to_string())
        );
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let t = tag("Phase.PostGame");
        assert_eq!(serde_json::to_string(&t).unwrap(), "\"Phase.PostGame\"");
        let back: PhaseTag = serde_json::from_str("\"Phase.PostGame\"").unwrap();
        assert_eq!(back, t);
        assert!(serde_json::from_str::<PhaseTag>("\"Phase..PostGame\"").is_err());
    }

    fn tag_strategy() -> impl Strategy<Value = String> {
        prop::collection::vec("[A-Za-z0-9_-]{1,6}", 1..5).prop_map(|s| s.join("."))
    }

    proptest! {
        #[test]
        fn canonical_input_round_trips(raw in tag_strategy()) {
            let registry = TagRegistry::new();
            prop_assert_eq!(registry.canonicalize(&raw).unwrap().to_string(), raw);
        }

        #[test]
        fn descendant_is_reflexive(raw in tag_strategy()) {
            let t = PhaseTag::parse(&raw).unwrap();
            prop_assert!(t.is_descendant_of(&t));
        }

        #[test]
        fn descendant_is_transitive(
            root in tag_strategy(),
            mid in tag_strategy(),
            leaf in tag_strategy(),
        ) {
            let a = PhaseTag::parse(&root).unwrap();
            let b = PhaseTag::parse(&format!("{root}.{mid}")).unwrap();
            let c = PhaseTag::parse(&format!("{root}.{mid}.{leaf}")).unwrap();
            prop_assert!(c.is_descendant_of(&b));
            prop_assert!(b.is_descendant_of(&a));
            prop_assert!(c.is_descendant_of(&a));
        }

        #[test]
        fn every_ancestor_is_an_ancestor(raw in tag_strategy()) {
            let t = PhaseTag::parse(&raw).unwrap();
            for ancestor in t.self_and_ancestors() {
                prop_assert!(t.is_descendant_of(&ancestor));
            }
        }
    }
}
