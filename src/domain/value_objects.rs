//! Value objects for evidence-based dependency identification

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::DomainError;

/// Confidence tier attached to evidence and identifiers.
///
/// Ordering is best-first: `Highest < High < Medium < Low`, so comparing two
/// tiers with `<=` answers "is the left tier at least as trustworthy?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Highest,
    High,
    Medium,
    Low,
}

impl Confidence {
    /// All tiers, best first. Resolution iterates these in order.
    pub fn tiers() -> [Confidence; 4] {
        [
            Confidence::Highest,
            Confidence::High,
            Confidence::Medium,
            Confidence::Low,
        ]
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Confidence::Highest => "highest",
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        };
        write!(f, "{}", s)
    }
}

/// What a piece of evidence asserts about a dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceKind {
    Vendor,
    Product,
    Version,
}

/// A single observation harvested from a dependency coordinate.
///
/// Evidence is a multiset: the same value may be recorded more than once,
/// from different origins or at different confidence tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub kind: EvidenceKind,
    /// Origin of the observation, e.g. `pom`
    pub source: String,
    /// Field the value was read from, e.g. `groupid`
    pub name: String,
    pub value: String,
    pub confidence: Confidence,
}

impl Evidence {
    pub fn new(
        kind: EvidenceKind,
        source: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
        confidence: Confidence,
    ) -> Self {
        Self {
            kind,
            source: source.into(),
            name: name.into(),
            value: value.into(),
            confidence,
        }
    }
}

/// Identifier namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    Cpe,
    Maven,
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierKind::Cpe => write!(f, "cpe"),
            IdentifierKind::Maven => write!(f, "maven"),
        }
    }
}

/// A resolved identifier attached to a dependency.
///
/// Identity is `(kind, value, url)`: confidence does not distinguish two
/// identifiers, which gives the dependency's identifier set its dedup
/// semantics. The URL is derived from the value, so in practice equal
/// values carry equal URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identifier {
    pub kind: IdentifierKind,
    pub value: String,
    pub url: Option<String>,
    pub confidence: Confidence,
}

impl Identifier {
    pub fn new(
        kind: IdentifierKind,
        value: impl Into<String>,
        url: Option<String>,
        confidence: Confidence,
    ) -> Self {
        Self {
            kind,
            value: value.into(),
            url,
            confidence,
        }
    }
}

impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.value == other.value && self.url == other.url
    }
}

impl Eq for Identifier {}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.kind
            .cmp(&other.kind)
            .then_with(|| self.value.cmp(&other.value))
            .then_with(|| self.url.cmp(&other.url))
    }
}

impl std::hash::Hash for Identifier {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.value.hash(state);
        self.url.hash(state);
    }
}

/// How well an identifier candidate matched the database.
///
/// Ordering is best-first: an exact version match outranks a synthesized
/// best guess, which outranks a version-less broad match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchQuality {
    ExactMatch,
    BestGuess,
    BroadMatch,
}

/// A dotted version split into components for prefix-aware comparison.
///
/// Plain string equality is too strict for database rows (`1.2.3` vs
/// `1.2.3.RELEASE`) and semantic-version parsing is too lenient, so versions
/// compare component-wise with an explicit partial-match rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentVersion {
    parts: Vec<String>,
}

impl ComponentVersion {
    /// Parses a version string into components.
    ///
    /// The string is lowercased, a leading `v` before a digit is dropped, and
    /// `-`/`_` qualifier separators are treated like dots, so
    /// `1.4.2-SNAPSHOT` becomes `[1, 4, 2, snapshot]`. Returns `None` when
    /// the string does not start with a numeric component.
    pub fn parse(value: &str) -> Option<Self> {
        let mut normalized = value.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }
        if normalized.starts_with('v')
            && normalized[1..].starts_with(|c: char| c.is_ascii_digit())
        {
            normalized.remove(0);
        }
        let parts: Vec<String> = normalized
            .split(['.', '-', '_'])
            .filter(|p| !p.is_empty())
            .map(str::to_owned)
            .collect();
        match parts.first() {
            Some(first) if first.chars().all(|c| c.is_ascii_digit()) => Some(Self { parts }),
            _ => None,
        }
    }

    /// The unversioned placeholder, rendered as `-` in identifier names.
    pub fn placeholder() -> Self {
        Self {
            parts: vec!["-".to_owned()],
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.parts.len() == 1 && self.parts[0] == "-"
    }

    /// Number of components; the specificity measure used when competing
    /// guesses are compared.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Partial-match rule: the versions must not differ in component count by
    /// three or more, and must agree on every component up to the first three
    /// levels (or fewer when either version is shorter).
    pub fn matches_at_least_three_levels(&self, other: &ComponentVersion) -> bool {
        if self.parts.len().abs_diff(other.parts.len()) >= 3 {
            return false;
        }
        let levels = self.parts.len().min(other.parts.len()).min(3);
        self.parts[..levels] == other.parts[..levels]
    }
}

impl fmt::Display for ComponentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.parts.join("."))
    }
}

/// Where projects are discovered from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitSource {
    Local,
    Github,
    Gitlab,
}

impl fmt::Display for GitSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GitSource::Local => "local",
            GitSource::Github => "github",
            GitSource::Gitlab => "gitlab",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for GitSource {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(GitSource::Local),
            "github" => Ok(GitSource::Github),
            "gitlab" => Ok(GitSource::Gitlab),
            other => Err(DomainError::InvalidSource {
                name: other.to_owned(),
            }),
        }
    }
}

/// Build tool a project is driven by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildSystem {
    Maven,
    Gradle,
    Unknown,
}

impl fmt::Display for BuildSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildSystem::Maven => "maven",
            BuildSystem::Gradle => "gradle",
            BuildSystem::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// CVSS score band for a persisted finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreRange {
    Low,
    Medium,
    High,
    Critical,
}

impl ScoreRange {
    /// Maps a CVSS base score into its band: 0.0–2.99 low, 3.0–6.99 medium,
    /// 7.0–8.99 high, 9.0–10.0 critical.
    pub fn from_score(score: f32) -> Self {
        if score >= 9.0 {
            ScoreRange::Critical
        } else if score >= 7.0 {
            ScoreRange::High
        } else if score >= 3.0 {
            ScoreRange::Medium
        } else {
            ScoreRange::Low
        }
    }
}

impl fmt::Display for ScoreRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScoreRange::Low => "low",
            ScoreRange::Medium => "medium",
            ScoreRange::High => "high",
            ScoreRange::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_ordering_is_best_first() {
        assert!(Confidence::Highest < Confidence::High);
        assert!(Confidence::High < Confidence::Medium);
        assert!(Confidence::Medium < Confidence::Low);
    }

    #[test]
    fn test_match_quality_ordering_is_best_first() {
        assert!(MatchQuality::ExactMatch < MatchQuality::BestGuess);
        assert!(MatchQuality::BestGuess < MatchQuality::BroadMatch);
    }

    #[test]
    fn test_version_parsing() {
        let v = ComponentVersion::parse("1.4.2").unwrap();
        assert_eq!(v.len(), 3);
        assert_eq!(v.to_string(), "1.4.2");

        let v = ComponentVersion::parse("1.4.2-SNAPSHOT").unwrap();
        assert_eq!(v.len(), 4);
        assert_eq!(v.to_string(), "1.4.2.snapshot");

        let v = ComponentVersion::parse("v2.0.1").unwrap();
        assert_eq!(v.to_string(), "2.0.1");

        assert!(ComponentVersion::parse("unknown").is_none());
        assert!(ComponentVersion::parse("").is_none());
        assert!(ComponentVersion::parse("-").is_none());
    }

    #[test]
    fn test_matches_at_least_three_levels() {
        let a = ComponentVersion::parse("1.2.3.9").unwrap();
        let b = ComponentVersion::parse("1.2.3").unwrap();
        assert!(a.matches_at_least_three_levels(&b));
        assert!(b.matches_at_least_three_levels(&a));

        let a = ComponentVersion::parse("1.2.4").unwrap();
        let b = ComponentVersion::parse("1.2.3").unwrap();
        assert!(!a.matches_at_least_three_levels(&b));

        // component counts three or more apart never match
        let a = ComponentVersion::parse("1.2.3.4.5.6").unwrap();
        let b = ComponentVersion::parse("1.2.3").unwrap();
        assert!(!a.matches_at_least_three_levels(&b));

        // short versions agree on their shared prefix
        let a = ComponentVersion::parse("1.2").unwrap();
        let b = ComponentVersion::parse("1.2.5").unwrap();
        assert!(a.matches_at_least_three_levels(&b));
    }

    #[test]
    fn test_identifier_identity_is_kind_value_url() {
        let a = Identifier::new(
            IdentifierKind::Cpe,
            "cpe:/a:example:widget:1.4.2",
            Some("https://example.org".into()),
            Confidence::Highest,
        );
        let same_but_low = Identifier::new(
            IdentifierKind::Cpe,
            "cpe:/a:example:widget:1.4.2",
            Some("https://example.org".into()),
            Confidence::Low,
        );
        assert_eq!(a, same_but_low);

        let no_url = Identifier::new(
            IdentifierKind::Cpe,
            "cpe:/a:example:widget:1.4.2",
            None,
            Confidence::Highest,
        );
        assert_ne!(a, no_url);
    }

    #[test]
    fn test_score_ranges() {
        assert_eq!(ScoreRange::from_score(0.0), ScoreRange::Low);
        assert_eq!(ScoreRange::from_score(2.99), ScoreRange::Low);
        assert_eq!(ScoreRange::from_score(3.0), ScoreRange::Medium);
        assert_eq!(ScoreRange::from_score(6.99), ScoreRange::Medium);
        assert_eq!(ScoreRange::from_score(7.0), ScoreRange::High);
        assert_eq!(ScoreRange::from_score(8.99), ScoreRange::High);
        assert_eq!(ScoreRange::from_score(9.0), ScoreRange::Critical);
        assert_eq!(ScoreRange::from_score(10.0), ScoreRange::Critical);
    }

    #[test]
    fn test_git_source_round_trip() {
        for s in ["local", "github", "gitlab"] {
            let parsed: GitSource = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
        let err = "bitbucket".parse::<GitSource>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid project source: bitbucket");
    }
}
