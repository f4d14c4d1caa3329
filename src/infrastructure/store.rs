//! Read-only vulnerability database access

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::domain::entities::VulnerabilityRecord;
use crate::domain::value_objects::ComponentVersion;

/// Errors loading or reading the vulnerability database
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error reading vulnerability database: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed vulnerability database: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Read-only access to the vulnerability records the scan resolves against
pub trait VulnerabilityStore: Send + Sync {
    /// Whether any records are loaded; a run refuses to analyze without data.
    fn data_exists(&self) -> bool;

    /// All records for one vendor/product pair (case-insensitive).
    fn find_records(&self, vendor: &str, product: &str) -> Vec<VulnerabilityRecord>;

    /// Records applying to a resolved identifier: rows pinned to the given
    /// version plus every version-less row. `None` selects only the
    /// version-less rows.
    fn records_for(
        &self,
        vendor: &str,
        product: &str,
        version: Option<&ComponentVersion>,
    ) -> Vec<VulnerabilityRecord>;

    /// Distinct vendor/product pairs, the feed for the in-memory index.
    fn distinct_products(&self) -> Vec<(String, String)>;
}

/// Vulnerability store backed by a JSON file loaded once at startup
pub struct JsonVulnerabilityStore {
    records: Vec<VulnerabilityRecord>,
    by_pair: HashMap<(String, String), Vec<usize>>,
}

impl JsonVulnerabilityStore {
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path)?;
        let records: Vec<VulnerabilityRecord> = serde_json::from_str(&raw)?;
        info!(
            records = records.len(),
            path = %path.display(),
            "loaded vulnerability database"
        );
        Ok(Self::from_records(records))
    }

    pub fn from_records(records: Vec<VulnerabilityRecord>) -> Self {
        let mut by_pair: HashMap<(String, String), Vec<usize>> = HashMap::new();
        for (i, record) in records.iter().enumerate() {
            by_pair
                .entry((record.vendor.to_lowercase(), record.product.to_lowercase()))
                .or_default()
                .push(i);
        }
        Self { records, by_pair }
    }
}

impl VulnerabilityStore for JsonVulnerabilityStore {
    fn data_exists(&self) -> bool {
        !self.records.is_empty()
    }

    fn find_records(&self, vendor: &str, product: &str) -> Vec<VulnerabilityRecord> {
        self.by_pair
            .get(&(vendor.to_lowercase(), product.to_lowercase()))
            .map(|indices| indices.iter().map(|&i| self.records[i].clone()).collect())
            .unwrap_or_default()
    }

    fn records_for(
        &self,
        vendor: &str,
        product: &str,
        version: Option<&ComponentVersion>,
    ) -> Vec<VulnerabilityRecord> {
        self.find_records(vendor, product)
            .into_iter()
            .filter(|record| match (record.parsed_version(), version) {
                (None, _) => true,
                (Some(db_version), Some(wanted)) => db_version == *wanted,
                (Some(_), None) => false,
            })
            .collect()
    }

    fn distinct_products(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .by_pair
            .values()
            .filter_map(|indices| indices.first())
            .map(|&i| (self.records[i].vendor.clone(), self.records[i].product.clone()))
            .collect();
        pairs.sort();
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(
        vendor: &str,
        product: &str,
        version: Option<&str>,
        cve: &str,
    ) -> VulnerabilityRecord {
        VulnerabilityRecord {
            vendor: vendor.into(),
            product: product.into(),
            version: version.map(str::to_owned),
            update_tag: None,
            cve_id: cve.into(),
            cwe: None,
            cvss_score: Some(5.0),
        }
    }

    fn create_test_store() -> JsonVulnerabilityStore {
        JsonVulnerabilityStore::from_records(vec![
            record("example", "widget", Some("1.4.2"), "CVE-2020-0001"),
            record("example", "widget", None, "CVE-2020-0002"),
            record("apache", "struts", Some("2.1.2"), "CVE-2020-0003"),
        ])
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let store = create_test_store();
        assert_eq!(store.find_records("Example", "Widget").len(), 2);
        assert!(store.find_records("example", "unknown").is_empty());
    }

    #[test]
    fn test_records_for_version_includes_broad_rows() {
        let store = create_test_store();
        let version = ComponentVersion::parse("1.4.2").unwrap();
        let matched = store.records_for("example", "widget", Some(&version));
        let cves: Vec<&str> = matched.iter().map(|r| r.cve_id.as_str()).collect();
        assert!(cves.contains(&"CVE-2020-0001"));
        assert!(cves.contains(&"CVE-2020-0002"));

        let other = ComponentVersion::parse("9.9.9").unwrap();
        let matched = store.records_for("example", "widget", Some(&other));
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].cve_id, "CVE-2020-0002");
    }

    #[test]
    fn test_distinct_products() {
        let store = create_test_store();
        let pairs = store.distinct_products();
        assert_eq!(pairs.len(), 2);
        assert!(pairs.contains(&("example".to_string(), "widget".to_string())));
    }

    #[test]
    fn test_empty_store_has_no_data() {
        let store = JsonVulnerabilityStore::from_records(Vec::new());
        assert!(!store.data_exists());
    }
}
