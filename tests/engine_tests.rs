//! Full scan runs against stubbed sources and extractors

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use sourcescan::application::{EngineError, IdentificationService, RunPhase, ScanEngine};
use sourcescan::domain::entities::{Project, VulnerabilityRecord};
use sourcescan::domain::services::NoSuppression;
use sourcescan::domain::value_objects::{BuildSystem, GitSource};
use sourcescan::infrastructure::extractors::{DependencyExtractor, ExtractionError};
use sourcescan::infrastructure::sources::{ProjectSource, SourceError};
use sourcescan::infrastructure::projects::{JsonProjectRepository, ProjectRepository};
use sourcescan::infrastructure::{IndexOptions, JsonVulnerabilityStore, ProductIndex};
use sourcescan::infrastructure::store::VulnerabilityStore;

mod fixtures {
    use super::*;

    /// Serves a fixed project list and materializes each project as a
    /// directory holding a `coords.txt` the stub extractor reads back.
    pub struct StubSource {
        root: PathBuf,
        projects: Vec<(String, String)>,
        sync_delay: Duration,
    }

    impl StubSource {
        pub fn new(root: &Path, projects: &[(&str, &str)]) -> Self {
            Self {
                root: root.to_path_buf(),
                projects: projects
                    .iter()
                    .map(|(name, coords)| (name.to_string(), coords.to_string()))
                    .collect(),
                sync_delay: Duration::ZERO,
            }
        }

        pub fn with_sync_delay(mut self, delay: Duration) -> Self {
            self.sync_delay = delay;
            self
        }
    }

    #[async_trait]
    impl ProjectSource for StubSource {
        fn source(&self) -> GitSource {
            GitSource::Local
        }

        async fn synchronize(&self) -> Result<(), SourceError> {
            if self.sync_delay > Duration::ZERO {
                tokio::time::sleep(self.sync_delay).await;
            }
            Ok(())
        }

        async fn enumerate(&self) -> Result<Vec<Project>, SourceError> {
            self.projects
                .iter()
                .map(|(name, _)| {
                    Project::new(name.clone(), GitSource::Local, BuildSystem::Maven)
                        .map_err(|e| SourceError::Configuration(e.to_string()))
                })
                .collect()
        }

        async fn materialize(&self, project: &Project) -> Result<PathBuf, SourceError> {
            let (_, coords) = self
                .projects
                .iter()
                .find(|(name, _)| *name == project.name)
                .ok_or_else(|| SourceError::NotFound(project.name.clone()))?;
            let dir = self.root.join(&project.name);
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(dir.join("coords.txt"), coords).await?;
            Ok(dir)
        }

        fn delete_after_scan(&self) -> bool {
            false
        }
    }

    /// A source whose discovery always fails with a network error.
    pub struct UnreachableSource;

    #[async_trait]
    impl ProjectSource for UnreachableSource {
        fn source(&self) -> GitSource {
            GitSource::Github
        }

        async fn synchronize(&self) -> Result<(), SourceError> {
            Err(SourceError::Network("connection refused".into()))
        }

        async fn enumerate(&self) -> Result<Vec<Project>, SourceError> {
            Err(SourceError::Network("connection refused".into()))
        }

        async fn materialize(&self, project: &Project) -> Result<PathBuf, SourceError> {
            Err(SourceError::NotFound(project.name.clone()))
        }

        fn delete_after_scan(&self) -> bool {
            false
        }
    }

    /// Reads coordinates from the materialized `coords.txt` instead of
    /// invoking a build tool. A file starting with `FAIL` simulates the
    /// build tool exiting with an error.
    pub struct StubExtractor;

    #[async_trait]
    impl DependencyExtractor for StubExtractor {
        fn build_system(&self) -> BuildSystem {
            BuildSystem::Maven
        }

        async fn dependency_coordinates(
            &self,
            project_dir: &Path,
        ) -> Result<Vec<String>, ExtractionError> {
            let content = tokio::fs::read_to_string(project_dir.join("coords.txt")).await?;
            if content.starts_with("FAIL") {
                return Err(ExtractionError::ToolFailed {
                    tool: "stub".to_owned(),
                    status: "exit status: 1".to_owned(),
                    stderr: "simulated build failure".to_owned(),
                });
            }
            Ok(content.lines().map(str::to_owned).collect())
        }
    }

    pub fn widget_records() -> Vec<VulnerabilityRecord> {
        vec![
            VulnerabilityRecord {
                vendor: "example".into(),
                product: "widget".into(),
                version: Some("1.4.2".into()),
                update_tag: None,
                cve_id: "CVE-2020-0001".into(),
                cwe: Some("CWE-79".into()),
                cvss_score: Some(7.5),
            },
            VulnerabilityRecord {
                vendor: "example".into(),
                product: "widget".into(),
                version: None,
                update_tag: None,
                cve_id: "CVE-2020-0002".into(),
                cwe: None,
                cvss_score: Some(4.0),
            },
        ]
    }

    pub async fn engine(
        sources: Vec<Arc<dyn ProjectSource>>,
        records: Vec<VulnerabilityRecord>,
        repository_path: &Path,
    ) -> (ScanEngine, Arc<JsonProjectRepository>) {
        let store = Arc::new(JsonVulnerabilityStore::from_records(records));
        let index = Arc::new(ProductIndex::build(
            &store.distinct_products(),
            IndexOptions::default(),
        ));
        let identification = Arc::new(IdentificationService::new(
            index,
            store.clone(),
            Arc::new(NoSuppression),
        ));
        let repository = Arc::new(
            JsonProjectRepository::open(repository_path)
                .await
                .expect("repository opens"),
        );
        let engine = ScanEngine::new(
            sources,
            vec![Arc::new(StubExtractor)],
            identification,
            store,
            repository.clone(),
            2,
        );
        (engine, repository)
    }
}

#[tokio::test]
async fn run_isolates_a_failing_project_and_persists_the_rest() {
    let workdir = tempfile::tempdir().unwrap();
    let source = Arc::new(fixtures::StubSource::new(
        workdir.path(),
        &[
            (
                "p1",
                "org.example:widget:jar:1.4.2\norg.junit:junit:jar:4.12",
            ),
            ("p2", "FAIL"),
            ("p3", "org.apache:commons-lang3:jar:3.12.0"),
        ],
    ));
    let (engine, repository) = fixtures::engine(
        vec![source],
        fixtures::widget_records(),
        &workdir.path().join("projects.json"),
    )
    .await;

    let report = engine.run().await.expect("run completes");

    assert_eq!(report.projects_scanned, 2);
    assert_eq!(report.dependencies_found, 3);
    assert_eq!(report.vulnerable_dependencies, 1);
    assert_eq!(report.projects_flagged, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].phase, RunPhase::Extracting);
    assert!(matches!(
        report.failures[0].error,
        EngineError::Extraction { ref project, .. } if project == "local/p2"
    ));

    let p1 = repository
        .find_by_qualified_name("local/p1")
        .await
        .unwrap()
        .expect("p1 persisted");
    let mut cves: Vec<&str> = p1.vulnerabilities.iter().map(|v| v.cve.as_str()).collect();
    cves.sort();
    assert_eq!(cves, vec!["CVE-2020-0001", "CVE-2020-0002"]);

    let p3 = repository
        .find_by_qualified_name("local/p3")
        .await
        .unwrap()
        .expect("p3 persisted");
    assert!(p3.vulnerabilities.is_empty());

    assert!(repository
        .find_by_qualified_name("local/p2")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn run_skips_a_failing_source_and_scans_the_rest() {
    let workdir = tempfile::tempdir().unwrap();
    let healthy = Arc::new(fixtures::StubSource::new(
        workdir.path(),
        &[("p1", "org.example:widget:jar:1.4.2")],
    ));
    let (engine, repository) = fixtures::engine(
        vec![Arc::new(fixtures::UnreachableSource), healthy],
        fixtures::widget_records(),
        &workdir.path().join("projects.json"),
    )
    .await;

    let report = engine.run().await.expect("run completes");

    assert_eq!(report.projects_scanned, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].phase, RunPhase::Scanning);
    assert!(matches!(
        report.failures[0].error,
        EngineError::Source { source: GitSource::Github, .. }
    ));

    let p1 = repository
        .find_by_qualified_name("local/p1")
        .await
        .unwrap()
        .expect("healthy source's project persisted");
    assert!(!p1.vulnerabilities.is_empty());
}

#[tokio::test]
async fn concurrent_run_is_rejected_not_queued() {
    let workdir = tempfile::tempdir().unwrap();
    let source = Arc::new(
        fixtures::StubSource::new(workdir.path(), &[("p1", "org.example:widget:jar:1.4.2")])
            .with_sync_delay(Duration::from_millis(400)),
    );
    let (engine, _repository) = fixtures::engine(
        vec![source],
        fixtures::widget_records(),
        &workdir.path().join("projects.json"),
    )
    .await;
    let engine = Arc::new(engine);

    let first = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(matches!(
        engine.run().await,
        Err(EngineError::AlreadyRunning)
    ));

    first.await.unwrap().expect("first run completes");
    assert_eq!(engine.current_phase(), RunPhase::Idle);

    // the flag is released, so a later run goes through
    engine.run().await.expect("subsequent run completes");
}

#[tokio::test]
async fn missing_database_aborts_the_run() {
    let workdir = tempfile::tempdir().unwrap();
    let source = Arc::new(fixtures::StubSource::new(
        workdir.path(),
        &[("p1", "org.example:widget:jar:1.4.2")],
    ));
    let (engine, repository) = fixtures::engine(
        vec![source],
        Vec::new(),
        &workdir.path().join("projects.json"),
    )
    .await;

    assert!(matches!(
        engine.run().await,
        Err(EngineError::DataUnavailable)
    ));
    assert_eq!(engine.current_phase(), RunPhase::Idle);
    assert!(repository
        .find_by_qualified_name("local/p1")
        .await
        .unwrap()
        .is_none());
}
