//! Domain entities representing core business concepts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::errors::DomainError;
use super::value_objects::*;

/// A build dependency discovered in one or more projects.
///
/// Carries the evidence harvested from its coordinate, the identifiers
/// resolved against the vulnerability database, and references back to every
/// project it was seen in. Identifier and project-reference collections are
/// sets with deterministic iteration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    /// Full coordinate string, e.g. `org.example:widget:jar:1.4.2:compile`
    pub display_name: String,
    pub build_system: BuildSystem,
    pub evidence: Vec<Evidence>,
    pub identifiers: BTreeSet<Identifier>,
    /// Qualified names of the projects this dependency belongs to
    pub project_refs: BTreeSet<String>,
    /// Display names of dependencies merged into this one
    pub related: BTreeSet<String>,
    pub findings: Vec<Vulnerability>,
}

impl Dependency {
    pub fn new(display_name: impl Into<String>, build_system: BuildSystem) -> Self {
        Self {
            display_name: display_name.into(),
            build_system,
            evidence: Vec::new(),
            identifiers: BTreeSet::new(),
            project_refs: BTreeSet::new(),
            related: BTreeSet::new(),
            findings: Vec::new(),
        }
    }

    pub fn add_evidence(&mut self, evidence: Evidence) {
        self.evidence.push(evidence);
    }

    /// Evidence values of a given kind, best confidence first, deduplicated.
    pub fn evidence_values(&self, kind: EvidenceKind) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        let mut values = Vec::new();
        for tier in Confidence::tiers() {
            for e in self
                .evidence
                .iter()
                .filter(|e| e.kind == kind && e.confidence == tier)
            {
                if seen.insert(e.value.as_str()) {
                    values.push(e.value.as_str());
                }
            }
        }
        values
    }

    /// Evidence values of a given kind at exactly one confidence tier.
    pub fn evidence_at(&self, kind: EvidenceKind, confidence: Confidence) -> Vec<&Evidence> {
        self.evidence
            .iter()
            .filter(|e| e.kind == kind && e.confidence == confidence)
            .collect()
    }

    /// Adds an identifier; returns false when an equal identifier (same
    /// kind, value and URL) was already present.
    pub fn add_identifier(&mut self, identifier: Identifier) -> bool {
        self.identifiers.insert(identifier)
    }

    pub fn cpe_identifiers(&self) -> impl Iterator<Item = &Identifier> {
        self.identifiers
            .iter()
            .filter(|i| i.kind == IdentifierKind::Cpe)
    }

    pub fn add_project_ref(&mut self, qualified_name: impl Into<String>) {
        self.project_refs.insert(qualified_name.into());
    }

    pub fn belongs_to(&self, qualified_name: &str) -> bool {
        self.project_refs.contains(qualified_name)
    }

    /// Absorbs another dependency during bundling: project references are
    /// unioned and the other dependency's name joins the related set.
    pub fn absorb(&mut self, other: Dependency) {
        self.project_refs.extend(other.project_refs);
        self.related.extend(other.related);
        self.related.insert(other.display_name);
    }
}

/// A project discovered from one of the configured sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Unique across all sources: `{source}/{name}`
    pub qualified_name: String,
    pub name: String,
    pub source: GitSource,
    pub build_system: BuildSystem,
    pub description: Option<String>,
    pub https_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
    /// Source-side numeric id, when the source exposes one
    #[serde(default)]
    pub internal_id: Option<i64>,
    pub vulnerabilities: Vec<Vulnerability>,
}

impl Project {
    /// Create a new project with validation
    pub fn new(
        name: impl Into<String>,
        source: GitSource,
        build_system: BuildSystem,
    ) -> Result<Self, DomainError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::InvalidInput {
                field: "name".to_owned(),
                message: "project name cannot be empty".to_owned(),
            });
        }
        let name = name.trim().to_owned();
        Ok(Self {
            qualified_name: Self::qualify(source, &name),
            name,
            source,
            build_system,
            description: None,
            https_url: None,
            created_at: None,
            last_update: None,
            internal_id: None,
            vulnerabilities: Vec::new(),
        })
    }

    pub fn qualify(source: GitSource, name: &str) -> String {
        format!("{}/{}", source, name)
    }

    /// Copies the source-side metadata that may drift between scans.
    pub fn refresh_from(&mut self, other: &Project) {
        self.last_update = other.last_update;
        self.created_at = other.created_at;
        self.description = other.description.clone();
        self.https_url = other.https_url.clone();
        self.internal_id = other.internal_id;
    }
}

/// A vulnerability finding persisted on a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vulnerability {
    pub cve: String,
    pub cwe: Option<String>,
    pub cvss_score: Option<f32>,
    /// Coordinate of the dependency the finding was traced to
    pub dependency: String,
}

impl Vulnerability {
    pub fn severity(&self) -> Option<ScoreRange> {
        self.cvss_score.map(ScoreRange::from_score)
    }
}

/// One row of the read-only vulnerability database: a vendor/product pair,
/// optionally pinned to a version, linked to a CVE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnerabilityRecord {
    pub vendor: String,
    pub product: String,
    /// `None` means the record applies to every version (a broad match)
    pub version: Option<String>,
    pub update_tag: Option<String>,
    pub cve_id: String,
    pub cwe: Option<String>,
    pub cvss_score: Option<f32>,
}

impl VulnerabilityRecord {
    /// Renders the record as a CPE-style identifier name, omitting version
    /// segments the record does not carry.
    pub fn identifier_name(&self) -> String {
        let mut name = format!("cpe:/a:{}:{}", self.vendor, self.product);
        if let Some(version) = &self.version {
            name.push(':');
            name.push_str(version);
            if let Some(update) = self.update_tag.as_deref().filter(|u| !u.is_empty()) {
                name.push(':');
                name.push_str(update);
            }
        }
        name
    }

    /// The record's version (with its update tag folded in) as components,
    /// or `None` when the record matches broadly.
    pub fn parsed_version(&self) -> Option<ComponentVersion> {
        let version = self.version.as_deref()?;
        let full = match self.update_tag.as_deref().filter(|u| !u.is_empty()) {
            Some(update) => format!("{}.{}", version, update),
            None => version.to_owned(),
        };
        ComponentVersion::parse(&full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_dependency() -> Dependency {
        let mut dep = Dependency::new("org.example:widget:jar:1.4.2:compile", BuildSystem::Maven);
        dep.add_evidence(Evidence::new(
            EvidenceKind::Version,
            "pom",
            "version",
            "1.4.2",
            Confidence::Highest,
        ));
        dep
    }

    #[test]
    fn test_project_qualified_name() {
        let project = Project::new("widget", GitSource::Github, BuildSystem::Maven).unwrap();
        assert_eq!(project.qualified_name, "github/widget");
    }

    #[test]
    fn test_project_name_validation() {
        assert!(Project::new("  ", GitSource::Local, BuildSystem::Unknown).is_err());
    }

    #[test]
    fn test_identifier_set_deduplicates() {
        let mut dep = create_test_dependency();
        let id = Identifier::new(
            IdentifierKind::Cpe,
            "cpe:/a:example:widget:1.4.2",
            None,
            Confidence::Highest,
        );
        assert!(dep.add_identifier(id.clone()));
        assert!(!dep.add_identifier(id));
        assert_eq!(dep.identifiers.len(), 1);
    }

    #[test]
    fn test_absorb_unions_refs_and_tracks_related() {
        let mut a = create_test_dependency();
        a.add_project_ref("local/p1");
        let mut b = create_test_dependency();
        b.add_project_ref("github/p2");

        a.absorb(b);
        assert!(a.belongs_to("local/p1"));
        assert!(a.belongs_to("github/p2"));
        assert!(a.related.contains("org.example:widget:jar:1.4.2:compile"));
    }

    #[test]
    fn test_record_identifier_name() {
        let record = VulnerabilityRecord {
            vendor: "example".into(),
            product: "widget".into(),
            version: Some("1.4.2".into()),
            update_tag: None,
            cve_id: "CVE-2020-0001".into(),
            cwe: None,
            cvss_score: Some(7.5),
        };
        assert_eq!(record.identifier_name(), "cpe:/a:example:widget:1.4.2");

        let broad = VulnerabilityRecord {
            version: None,
            ..record.clone()
        };
        assert_eq!(broad.identifier_name(), "cpe:/a:example:widget");
        assert!(broad.parsed_version().is_none());
    }

    #[test]
    fn test_record_version_includes_update_tag() {
        let record = VulnerabilityRecord {
            vendor: "example".into(),
            product: "widget".into(),
            version: Some("1.4.2".into()),
            update_tag: Some("sp1".into()),
            cve_id: "CVE-2020-0001".into(),
            cwe: None,
            cvss_score: None,
        };
        let parsed = record.parsed_version().unwrap();
        assert_eq!(parsed.to_string(), "1.4.2.sp1");
        assert_eq!(record.identifier_name(), "cpe:/a:example:widget:1.4.2:sp1");
    }

    #[test]
    fn test_evidence_values_best_confidence_first() {
        let mut dep = Dependency::new("a:b:1", BuildSystem::Maven);
        dep.add_evidence(Evidence::new(
            EvidenceKind::Vendor,
            "pom",
            "artifactid",
            "widget",
            Confidence::Low,
        ));
        dep.add_evidence(Evidence::new(
            EvidenceKind::Vendor,
            "pom",
            "groupid",
            "example",
            Confidence::Highest,
        ));
        assert_eq!(dep.evidence_values(EvidenceKind::Vendor), vec!["example", "widget"]);
    }
}
