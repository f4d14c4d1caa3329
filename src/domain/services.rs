//! Domain services containing the identifier resolution and bundling logic

use std::collections::BTreeSet;

use super::entities::{Dependency, VulnerabilityRecord};
use super::value_objects::{
    ComponentVersion, Confidence, EvidenceKind, Identifier, IdentifierKind, MatchQuality,
};

/// Base URL of the NVD advanced search, completed with an encoded CPE name
const NVD_SEARCH_URL: &str =
    "https://web.nvd.nist.gov/view/vuln/search-results?adv_search=true&cves=on&cpe_version=";

/// Renders the NVD search URL for a CPE identifier name.
pub fn nvd_search_url(identifier: &str) -> String {
    format!("{}{}", NVD_SEARCH_URL, form_url_encode(identifier))
}

/// Form-style URL encoding: alphanumerics and `.-*_` pass through, space
/// becomes `+`, everything else is percent-encoded.
fn form_url_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'-' | b'*' | b'_' => {
                encoded.push(byte as char)
            }
            b' ' => encoded.push('+'),
            other => {
                encoded.push('%');
                encoded.push_str(&format!("{:02X}", other));
            }
        }
    }
    encoded
}

/// Decides whether a resolved identifier should be discarded before it is
/// attached to a dependency.
pub trait SuppressionFilter: Send + Sync {
    fn should_suppress(&self, dependency: &Dependency, identifier: &Identifier) -> bool;
}

/// Filter that never suppresses anything; the default when no rules are
/// configured.
#[derive(Debug, Default)]
pub struct NoSuppression;

impl SuppressionFilter for NoSuppression {
    fn should_suppress(&self, _dependency: &Dependency, _identifier: &Identifier) -> bool {
        false
    }
}

/// An identifier candidate produced while walking the evidence, ranked by
/// match quality first and evidence confidence second.
#[derive(Debug, Clone)]
struct IdentifierMatch {
    quality: MatchQuality,
    evidence_confidence: Confidence,
    identifier: Identifier,
}

/// Resolves a dependency's version evidence against the database records of
/// one candidate vendor/product pair into confidence-weighted identifiers.
#[derive(Debug, Default)]
pub struct IdentifierResolver;

impl IdentifierResolver {
    pub fn new() -> Self {
        Self
    }

    /// Runs the resolution for one `(vendor, product)` candidate.
    ///
    /// Walks the confidence tiers best-first. Version-less records yield
    /// broad-match candidates at every tier. Each parseable VERSION evidence
    /// value is compared against each record version: equality yields an
    /// exact-match candidate, while a partial match (evidence no more
    /// specific than the record, agreeing on at least three levels) promotes
    /// the record version to the running best guess when its tier is no
    /// worse than the guess's tier and it is strictly more specific. The
    /// evidence value itself competes as a guess under the same rule.
    ///
    /// A synthesized best-guess candidate always joins the pool. Candidates
    /// are ranked by `(quality, evidence confidence)` and every candidate
    /// tied with the winner becomes an identifier, at confidence `Low` for
    /// best guesses and the evidence confidence otherwise. Identifiers the
    /// suppression filter rejects are dropped. Returns whether any
    /// identifier survived.
    pub fn resolve(
        &self,
        dependency: &mut Dependency,
        vendor: &str,
        product: &str,
        records: &[VulnerabilityRecord],
        suppression: &dyn SuppressionFilter,
    ) -> bool {
        if records.is_empty() {
            return false;
        }

        let parsed: Vec<Option<ComponentVersion>> =
            records.iter().map(|r| r.parsed_version()).collect();

        let mut best_guess = ComponentVersion::placeholder();
        let mut best_guess_confidence: Option<Confidence> = None;
        let mut has_broad_match = false;
        let mut candidates: Vec<IdentifierMatch> = Vec::new();

        for tier in Confidence::tiers() {
            for (record, db_version) in records.iter().zip(&parsed) {
                if db_version.is_none() {
                    has_broad_match = true;
                    let name = record.identifier_name();
                    let url = nvd_search_url(&name);
                    candidates.push(IdentifierMatch {
                        quality: MatchQuality::BroadMatch,
                        evidence_confidence: tier,
                        identifier: Identifier::new(IdentifierKind::Cpe, name, Some(url), tier),
                    });
                }
            }

            for evidence in dependency.evidence_at(EvidenceKind::Version, tier) {
                let Some(evidence_version) = ComponentVersion::parse(&evidence.value) else {
                    continue;
                };

                for (record, db_version) in records.iter().zip(&parsed) {
                    let Some(db_version) = db_version else { continue };

                    if evidence_version == *db_version {
                        let name = record.identifier_name();
                        let url = nvd_search_url(&name);
                        candidates.push(IdentifierMatch {
                            quality: MatchQuality::ExactMatch,
                            evidence_confidence: tier,
                            identifier: Identifier::new(
                                IdentifierKind::Cpe,
                                name,
                                Some(url),
                                tier,
                            ),
                        });
                    } else if evidence_version.len() <= db_version.len()
                        && evidence_version.matches_at_least_three_levels(db_version)
                        && best_guess_confidence.map_or(true, |current| tier <= current)
                        && db_version.len() > best_guess.len()
                    {
                        best_guess = db_version.clone();
                        best_guess_confidence = Some(tier);
                    }
                }

                if best_guess_confidence.map_or(true, |current| tier <= current)
                    && evidence_version.len() > best_guess.len()
                {
                    best_guess = evidence_version;
                    best_guess_confidence = Some(tier);
                }
            }
        }

        let guess_confidence = best_guess_confidence.unwrap_or(Confidence::Low);
        let guess_name = format!("cpe:/a:{}:{}:{}", vendor, product, best_guess);
        let guess_url = has_broad_match
            .then(|| nvd_search_url(&format!("cpe:/a:{}:{}", vendor, product)));
        candidates.push(IdentifierMatch {
            quality: MatchQuality::BestGuess,
            evidence_confidence: guess_confidence,
            identifier: Identifier::new(
                IdentifierKind::Cpe,
                guess_name,
                guess_url,
                guess_confidence,
            ),
        });

        candidates.sort_by(|a, b| {
            a.quality
                .cmp(&b.quality)
                .then_with(|| a.evidence_confidence.cmp(&b.evidence_confidence))
                .then_with(|| a.identifier.value.cmp(&b.identifier.value))
                .then_with(|| a.identifier.url.cmp(&b.identifier.url))
        });

        let winner = (candidates[0].quality, candidates[0].evidence_confidence);
        let mut identifier_added = false;
        for candidate in candidates
            .into_iter()
            .filter(|c| (c.quality, c.evidence_confidence) == winner)
        {
            let confidence = if candidate.quality == MatchQuality::BestGuess {
                Confidence::Low
            } else {
                candidate.evidence_confidence
            };
            let identifier = Identifier {
                confidence,
                ..candidate.identifier
            };
            if suppression.should_suppress(dependency, &identifier) {
                continue;
            }
            dependency.add_identifier(identifier);
            identifier_added = true;
        }

        identifier_added
    }
}

/// Merges dependencies that resolved to the same identifiers and carry the
/// same coordinate, bundling duplicates discovered across projects.
#[derive(Debug, Default)]
pub struct BundlingMerger;

impl BundlingMerger {
    pub fn new() -> Self {
        Self
    }

    /// Pairwise merge: the later dependency is absorbed into the earlier one
    /// when both the coordinate names and the full CPE identifier sets
    /// match. Output order follows input order; the operation is idempotent.
    pub fn merge(&self, dependencies: Vec<Dependency>) -> Vec<Dependency> {
        let mut deps = dependencies;
        let mut removed = vec![false; deps.len()];

        for i in 0..deps.len() {
            if removed[i] {
                continue;
            }
            for j in (i + 1)..deps.len() {
                if removed[j] {
                    continue;
                }
                if Self::names_match(&deps[i], &deps[j]) && Self::cpe_match(&deps[i], &deps[j]) {
                    let absorbed = deps[j].clone();
                    removed[j] = true;
                    deps[i].absorb(absorbed);
                }
            }
        }

        deps.into_iter()
            .zip(removed)
            .filter_map(|(dep, gone)| (!gone).then_some(dep))
            .collect()
    }

    fn names_match(a: &Dependency, b: &Dependency) -> bool {
        a.display_name == b.display_name
    }

    /// Both dependencies must hold the same nonzero number of CPE
    /// identifiers, and every CPE of the first must appear in the second.
    fn cpe_match(a: &Dependency, b: &Dependency) -> bool {
        let a_count = a.cpe_identifiers().count();
        let b_values: BTreeSet<&str> = b.cpe_identifiers().map(|i| i.value.as_str()).collect();
        if a_count == 0 || a_count != b_values.len() {
            return false;
        }
        a.cpe_identifiers().all(|i| b_values.contains(i.value.as_str()))
    }
}
