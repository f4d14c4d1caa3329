//! Sourcescan - Main application entry point

use std::{sync::Arc, time::Duration};

use tracing::{error, info, warn};

use sourcescan::{
    Config,
    application::{EngineError, IdentificationService, ScanEngine},
    domain::services::{NoSuppression, SuppressionFilter},
    infrastructure::{
        DependencyExtractor, GithubProjectSource, GitlabProjectSource, GradleExtractor,
        IndexOptions, JsonProjectRepository, JsonVulnerabilityStore, LocalProjectSource,
        MavenExtractor, PatternSuppressionFilter, ProductIndex, ProjectSource,
        VulnerabilityStore,
    },
    init_tracing,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    init_tracing(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        build_date = env!("VERGEN_BUILD_DATE"),
        "starting sourcescan"
    );

    let store = Arc::new(JsonVulnerabilityStore::load(&config.database.path)?);
    let index = Arc::new(ProductIndex::build(
        &store.distinct_products(),
        IndexOptions {
            relevance_floor: config.index.relevance_floor,
            max_results: config.index.max_results,
            weight_boost: config.index.weight_boost,
        },
    ));

    let projects = Arc::new(JsonProjectRepository::open(&config.projects.path).await?);

    let suppression: Arc<dyn SuppressionFilter> = match &config.suppression.file {
        Some(file) => Arc::new(PatternSuppressionFilter::from_file(file)?),
        None => Arc::new(NoSuppression),
    };

    let identification = Arc::new(IdentificationService::new(
        index,
        store.clone(),
        suppression,
    ));

    let mut sources: Vec<Arc<dyn ProjectSource>> = Vec::new();
    if config.sources.local.enabled {
        sources.push(Arc::new(LocalProjectSource::new(
            config.sources.local.path.clone(),
            projects.clone(),
        )));
    }
    if config.sources.github.enabled {
        sources.push(Arc::new(GithubProjectSource::from_config(
            &config.sources.github,
            projects.clone(),
        )?));
    }
    if config.sources.gitlab.enabled {
        sources.push(Arc::new(GitlabProjectSource::from_config(
            &config.sources.gitlab,
            projects.clone(),
        )?));
    }
    if sources.is_empty() {
        warn!("no project sources are enabled; nothing to scan");
    }

    let timeout = Duration::from_secs(config.scan.extraction_timeout_seconds);
    let extractors: Vec<Arc<dyn DependencyExtractor>> = vec![
        Arc::new(MavenExtractor::new(config.scan.maven_command.clone(), timeout)),
        Arc::new(GradleExtractor::new(config.scan.gradle_command.clone(), timeout)),
    ];

    let engine = ScanEngine::new(
        sources,
        extractors,
        identification,
        store,
        projects,
        config.scan.max_concurrent_projects,
    );

    match engine.run().await {
        Ok(report) => {
            for failure in &report.failures {
                warn!(phase = %failure.phase, error = %failure.error, "recorded failure");
            }
            info!(
                projects = report.projects_scanned,
                dependencies = report.dependencies_found,
                vulnerable = report.vulnerable_dependencies,
                flagged = report.projects_flagged,
                "scan finished"
            );
            Ok(())
        }
        Err(e @ EngineError::DataUnavailable) => {
            error!(%e, "scan aborted");
            Err(e.into())
        }
        Err(e) => {
            error!(%e, "scan failed");
            Err(e.into())
        }
    }
}
