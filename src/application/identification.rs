//! Turns a dependency's evidence into identifiers and findings

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::domain::entities::{Dependency, Vulnerability};
use crate::domain::services::{IdentifierResolver, SuppressionFilter};
use crate::domain::value_objects::{ComponentVersion, Confidence, EvidenceKind, Identifier};
use crate::infrastructure::index::ProductIndex;
use crate::infrastructure::store::VulnerabilityStore;

/// Resolves one dependency at a time against the shared index and store.
///
/// Synchronous and internally immutable, so the engine can fan it out across
/// blocking workers without coordination.
pub struct IdentificationService {
    index: Arc<ProductIndex>,
    store: Arc<dyn VulnerabilityStore>,
    suppression: Arc<dyn SuppressionFilter>,
    resolver: IdentifierResolver,
}

impl IdentificationService {
    pub fn new(
        index: Arc<ProductIndex>,
        store: Arc<dyn VulnerabilityStore>,
        suppression: Arc<dyn SuppressionFilter>,
    ) -> Self {
        Self {
            index,
            store,
            suppression,
            resolver: IdentifierResolver::new(),
        }
    }

    /// Searches the index with the dependency's vendor/product evidence and
    /// runs identifier resolution for every candidate pair. Returns whether
    /// any identifier was attached; findings are populated alongside.
    pub fn identify(&self, dependency: &mut Dependency) -> bool {
        let vendor_terms = dependency.evidence_values(EvidenceKind::Vendor);
        let product_terms = dependency.evidence_values(EvidenceKind::Product);
        if vendor_terms.is_empty() && product_terms.is_empty() {
            return false;
        }

        let vendor_weights: Vec<String> = dependency
            .evidence_at(EvidenceKind::Vendor, Confidence::Highest)
            .iter()
            .map(|e| e.value.clone())
            .collect();
        let product_weights: Vec<String> = dependency
            .evidence_at(EvidenceKind::Product, Confidence::Highest)
            .iter()
            .map(|e| e.value.clone())
            .collect();

        let hits = self.index.search(
            &vendor_terms,
            &product_terms,
            &vendor_weights,
            &product_weights,
        );
        trace!(
            dependency = %dependency.display_name,
            candidates = hits.len(),
            "index search complete"
        );

        let mut identifier_added = false;
        for hit in hits {
            let records = self.store.find_records(&hit.vendor, &hit.product);
            identifier_added |= self.resolver.resolve(
                dependency,
                &hit.vendor,
                &hit.product,
                &records,
                self.suppression.as_ref(),
            );
        }

        if identifier_added {
            self.attach_findings(dependency);
            debug!(
                dependency = %dependency.display_name,
                identifiers = dependency.identifiers.len(),
                findings = dependency.findings.len(),
                "dependency identified"
            );
        }
        identifier_added
    }

    /// Maps the resolved CPE identifiers back onto database rows: rows
    /// pinned to the identifier's version plus the version-less rows,
    /// deduplicated by CVE.
    fn attach_findings(&self, dependency: &mut Dependency) {
        let display_name = dependency.display_name.clone();
        let identifiers: Vec<Identifier> = dependency.cpe_identifiers().cloned().collect();
        let mut seen: BTreeSet<String> = dependency
            .findings
            .iter()
            .map(|f| f.cve.clone())
            .collect();

        for identifier in identifiers {
            let Some((vendor, product, version)) = parse_cpe_name(&identifier.value) else {
                continue;
            };
            for record in self
                .store
                .records_for(&vendor, &product, version.as_ref())
            {
                if seen.insert(record.cve_id.clone()) {
                    dependency.findings.push(Vulnerability {
                        cve: record.cve_id,
                        cwe: record.cwe,
                        cvss_score: record.cvss_score,
                        dependency: display_name.clone(),
                    });
                }
            }
        }
    }
}

/// Splits a `cpe:/a:vendor:product[:version[:update]]` name. The `-`
/// placeholder counts as no version.
fn parse_cpe_name(value: &str) -> Option<(String, String, Option<ComponentVersion>)> {
    let rest = value.strip_prefix("cpe:/a:")?;
    let mut segments = rest.split(':');
    let vendor = segments.next()?.to_owned();
    let product = segments.next()?.to_owned();
    let version = match segments.next() {
        None | Some("-") | Some("") => None,
        Some(v) => {
            let full = match segments.next() {
                Some(update) if !update.is_empty() => format!("{}.{}", v, update),
                _ => v.to_owned(),
            };
            ComponentVersion::parse(&full)
        }
    };
    Some((vendor, product, version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::VulnerabilityRecord;
    use crate::domain::services::NoSuppression;
    use crate::domain::value_objects::BuildSystem;
    use crate::infrastructure::extractors::dependency_from_coordinate;
    use crate::infrastructure::index::IndexOptions;
    use crate::infrastructure::store::JsonVulnerabilityStore;

    fn record(version: Option<&str>, cve: &str) -> VulnerabilityRecord {
        VulnerabilityRecord {
            vendor: "example".into(),
            product: "widget".into(),
            version: version.map(str::to_owned),
            update_tag: None,
            cve_id: cve.into(),
            cwe: Some("CWE-79".into()),
            cvss_score: Some(7.5),
        }
    }

    fn create_test_service(records: Vec<VulnerabilityRecord>) -> IdentificationService {
        let store = Arc::new(JsonVulnerabilityStore::from_records(records));
        let index = Arc::new(ProductIndex::build(
            &store.distinct_products(),
            IndexOptions::default(),
        ));
        IdentificationService::new(index, store, Arc::new(NoSuppression))
    }

    #[test]
    fn test_identify_end_to_end_exact_match() {
        let service = create_test_service(vec![
            record(Some("1.4.2"), "CVE-2020-0001"),
            record(None, "CVE-2020-0002"),
        ]);
        let mut dep =
            dependency_from_coordinate("org.example:widget:jar:1.4.2", BuildSystem::Maven)
                .unwrap();

        assert!(service.identify(&mut dep));
        let cpes: Vec<&str> = dep.cpe_identifiers().map(|i| i.value.as_str()).collect();
        assert_eq!(cpes, vec!["cpe:/a:example:widget:1.4.2"]);

        let mut cves: Vec<&str> = dep.findings.iter().map(|f| f.cve.as_str()).collect();
        cves.sort();
        assert_eq!(cves, vec!["CVE-2020-0001", "CVE-2020-0002"]);
    }

    #[test]
    fn test_identify_without_matching_product() {
        let service = create_test_service(vec![record(Some("1.4.2"), "CVE-2020-0001")]);
        let mut dep =
            dependency_from_coordinate("io.acme:unrelated-thing:jar:3.0.0", BuildSystem::Maven)
                .unwrap();

        assert!(!service.identify(&mut dep));
        assert!(dep.cpe_identifiers().next().is_none());
        assert!(dep.findings.is_empty());
    }

    #[test]
    fn test_parse_cpe_name() {
        let (vendor, product, version) =
            parse_cpe_name("cpe:/a:example:widget:1.4.2").unwrap();
        assert_eq!(vendor, "example");
        assert_eq!(product, "widget");
        assert_eq!(version.unwrap().to_string(), "1.4.2");

        let (_, _, version) = parse_cpe_name("cpe:/a:example:widget:-").unwrap();
        assert!(version.is_none());

        let (_, _, version) = parse_cpe_name("cpe:/a:example:widget").unwrap();
        assert!(version.is_none());

        assert!(parse_cpe_name("maven:example:widget").is_none());
    }
}
