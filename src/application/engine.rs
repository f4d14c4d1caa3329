//! Scan orchestration across sources, extraction, resolution and persistence

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use super::errors::EngineError;
use super::identification::IdentificationService;
use crate::domain::entities::{Dependency, Project, Vulnerability};
use crate::domain::services::BundlingMerger;
use crate::domain::value_objects::BuildSystem;
use crate::infrastructure::extractors::{detect_build_system, DependencyExtractor, ExtractionError};
use crate::infrastructure::projects::ProjectRepository;
use crate::infrastructure::sources::ProjectSource;
use crate::infrastructure::store::VulnerabilityStore;

/// Phase the engine is currently in; `Idle` between runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Scanning,
    Extracting,
    Resolving,
    Aggregating,
    Persisting,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Idle => "idle",
            RunPhase::Scanning => "scanning",
            RunPhase::Extracting => "extracting",
            RunPhase::Resolving => "resolving",
            RunPhase::Aggregating => "aggregating",
            RunPhase::Persisting => "persisting",
        };
        write!(f, "{}", s)
    }
}

/// A non-fatal error recorded during a run
#[derive(Debug)]
pub struct ScanFailure {
    pub phase: RunPhase,
    pub error: EngineError,
}

/// Summary of a completed run
#[derive(Debug)]
pub struct RunReport {
    pub projects_scanned: usize,
    pub dependencies_found: usize,
    pub vulnerable_dependencies: usize,
    pub projects_flagged: usize,
    pub failures: Vec<ScanFailure>,
    pub duration: Duration,
}

/// Drives a full scan: discover projects, extract their dependencies,
/// resolve identifiers, bundle duplicates, aggregate findings per project
/// and persist the results.
///
/// At most one run executes at a time; a second concurrent `run` call is
/// rejected, not queued. A failing source or project is reported in the run
/// summary and skipped. A missing vulnerability database is the only error
/// that aborts a run that has started.
pub struct ScanEngine {
    sources: Vec<Arc<dyn ProjectSource>>,
    extractors: Arc<Vec<Arc<dyn DependencyExtractor>>>,
    identification: Arc<IdentificationService>,
    store: Arc<dyn VulnerabilityStore>,
    projects: Arc<dyn ProjectRepository>,
    merger: BundlingMerger,
    max_concurrent_projects: usize,
    running: AtomicBool,
    phase: Mutex<RunPhase>,
}

impl ScanEngine {
    pub fn new(
        sources: Vec<Arc<dyn ProjectSource>>,
        extractors: Vec<Arc<dyn DependencyExtractor>>,
        identification: Arc<IdentificationService>,
        store: Arc<dyn VulnerabilityStore>,
        projects: Arc<dyn ProjectRepository>,
        max_concurrent_projects: usize,
    ) -> Self {
        Self {
            sources,
            extractors: Arc::new(extractors),
            identification,
            store,
            projects,
            merger: BundlingMerger::new(),
            max_concurrent_projects: max_concurrent_projects.max(1),
            running: AtomicBool::new(false),
            phase: Mutex::new(RunPhase::Idle),
        }
    }

    pub fn current_phase(&self) -> RunPhase {
        self.phase.lock().map(|p| *p).unwrap_or(RunPhase::Idle)
    }

    fn set_phase(&self, phase: RunPhase) {
        if let Ok(mut current) = self.phase.lock() {
            *current = phase;
        }
    }

    /// Executes one full scan. Rejected when a run is already in flight.
    pub async fn run(&self) -> Result<RunReport, EngineError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyRunning);
        }
        let outcome = self.execute().await;
        // terminal cleanup runs on every path, aborted ones included
        self.set_phase(RunPhase::Idle);
        self.running.store(false, Ordering::SeqCst);
        outcome
    }

    #[instrument(skip(self))]
    async fn execute(&self) -> Result<RunReport, EngineError> {
        let started = Instant::now();
        let mut failures: Vec<ScanFailure> = Vec::new();

        self.set_phase(RunPhase::Scanning);
        let mut discovered: Vec<(Arc<dyn ProjectSource>, Project)> = Vec::new();
        for source in &self.sources {
            match Self::scan_source(source.as_ref()).await {
                Ok(projects) => {
                    info!(source = %source.source(), count = projects.len(), "source scanned");
                    discovered.extend(projects.into_iter().map(|p| (source.clone(), p)));
                }
                Err(error) => {
                    warn!(source = %source.source(), %error, "source failed; skipping");
                    failures.push(ScanFailure {
                        phase: RunPhase::Scanning,
                        error: EngineError::Source {
                            source: source.source(),
                            error,
                        },
                    });
                }
            }
        }

        self.set_phase(RunPhase::Extracting);
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_projects));
        let mut join_set: JoinSet<(Project, Result<Vec<Dependency>, EngineError>)> =
            JoinSet::new();
        for (source, project) in discovered {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let extractors = self.extractors.clone();
            join_set.spawn(async move {
                let _permit = permit;
                extract_project(source, extractors, project).await
            });
        }

        let mut scanned: Vec<Project> = Vec::new();
        let mut dependencies: Vec<Dependency> = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((project, Ok(deps))) => {
                    scanned.push(project);
                    dependencies.extend(deps);
                }
                Ok((project, Err(error))) => {
                    warn!(project = %project.qualified_name, %error, "project failed; skipping");
                    failures.push(ScanFailure {
                        phase: RunPhase::Extracting,
                        error,
                    });
                }
                Err(join_error) => {
                    failures.push(ScanFailure {
                        phase: RunPhase::Extracting,
                        error: EngineError::Task(join_error.to_string()),
                    });
                }
            }
        }
        scanned.sort_by(|a, b| a.qualified_name.cmp(&b.qualified_name));

        if !self.store.data_exists() {
            return Err(EngineError::DataUnavailable);
        }

        self.set_phase(RunPhase::Resolving);
        let dependencies = self.resolve_all(dependencies).await?;

        self.set_phase(RunPhase::Aggregating);
        let bundled = self.merger.merge(dependencies);
        let vulnerable_dependencies = bundled.iter().filter(|d| !d.findings.is_empty()).count();

        self.set_phase(RunPhase::Persisting);
        let mut projects_flagged = 0usize;
        for mut project in scanned.iter().cloned() {
            project.vulnerabilities = collect_findings(&bundled, &project.qualified_name);
            if !project.vulnerabilities.is_empty() {
                projects_flagged += 1;
            }
            if let Err(error) = self.projects.save(&project).await {
                warn!(project = %project.qualified_name, %error, "persist failed; skipping");
                failures.push(ScanFailure {
                    phase: RunPhase::Persisting,
                    error: EngineError::Persistence {
                        project: project.qualified_name.clone(),
                        error,
                    },
                });
            }
        }

        let report = RunReport {
            projects_scanned: scanned.len(),
            dependencies_found: bundled.len(),
            vulnerable_dependencies,
            projects_flagged,
            failures,
            duration: started.elapsed(),
        };
        info!(
            projects = report.projects_scanned,
            dependencies = report.dependencies_found,
            vulnerable = report.vulnerable_dependencies,
            flagged = report.projects_flagged,
            failures = report.failures.len(),
            duration_ms = report.duration.as_millis() as u64,
            "scan complete"
        );
        Ok(report)
    }

    async fn scan_source(
        source: &dyn ProjectSource,
    ) -> Result<Vec<Project>, crate::infrastructure::sources::SourceError> {
        source.synchronize().await?;
        source.enumerate().await
    }

    /// Resolution is read-only over the shared index and store, so the
    /// dependency list is split into chunks handed to blocking workers.
    async fn resolve_all(
        &self,
        dependencies: Vec<Dependency>,
    ) -> Result<Vec<Dependency>, EngineError> {
        if dependencies.is_empty() {
            return Ok(dependencies);
        }
        let workers = self.max_concurrent_projects;
        let chunk_size = dependencies.len().div_ceil(workers);

        let mut handles = Vec::new();
        let mut remaining = dependencies;
        while !remaining.is_empty() {
            let take = chunk_size.min(remaining.len());
            let rest = remaining.split_off(take);
            let mut batch = remaining;
            remaining = rest;
            let identification = self.identification.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                for dependency in &mut batch {
                    identification.identify(dependency);
                }
                batch
            }));
        }

        let mut resolved = Vec::new();
        for handle in handles {
            resolved.extend(
                handle
                    .await
                    .map_err(|e| EngineError::Task(e.to_string()))?,
            );
        }
        Ok(resolved)
    }
}

/// Findings of every bundled dependency referencing the project,
/// deduplicated by CVE.
fn collect_findings(dependencies: &[Dependency], qualified_name: &str) -> Vec<Vulnerability> {
    let mut findings: Vec<Vulnerability> = Vec::new();
    for dependency in dependencies {
        if dependency.identifiers.is_empty() || !dependency.belongs_to(qualified_name) {
            continue;
        }
        for finding in &dependency.findings {
            if !findings.iter().any(|f| f.cve == finding.cve) {
                findings.push(finding.clone());
            }
        }
    }
    findings
}

/// Materializes and extracts one project, returning the project together
/// with its dependencies (tagged with the project's qualified name). The
/// working directory is removed afterwards when the source asks for it,
/// whether extraction succeeded or not.
async fn extract_project(
    source: Arc<dyn ProjectSource>,
    extractors: Arc<Vec<Arc<dyn DependencyExtractor>>>,
    mut project: Project,
) -> (Project, Result<Vec<Dependency>, EngineError>) {
    let workdir = match source.materialize(&project).await {
        Ok(dir) => dir,
        Err(error) => {
            let failure = EngineError::ProjectSource {
                project: project.qualified_name.clone(),
                error,
            };
            return (project, Err(failure));
        }
    };

    let extraction: Result<Vec<Dependency>, ExtractionError> = async {
        let build_system = match project.build_system {
            BuildSystem::Unknown => detect_build_system(&workdir).await,
            known => known,
        };
        project.build_system = build_system;
        let extractor = extractors
            .iter()
            .find(|e| e.build_system() == build_system)
            .ok_or(ExtractionError::Unsupported(build_system))?;
        let mut dependencies = extractor.extract(&workdir).await?;
        for dependency in &mut dependencies {
            dependency.add_project_ref(&project.qualified_name);
        }
        Ok(dependencies)
    }
    .await;

    if source.delete_after_scan() {
        if let Err(error) = tokio::fs::remove_dir_all(&workdir).await {
            warn!(dir = %workdir.display(), %error, "failed to remove working directory");
        }
    }

    let result = extraction.map_err(|error| EngineError::Extraction {
        project: project.qualified_name.clone(),
        error,
    });
    (project, result)
}
