//! Maven dependency extraction via `mvn dependency:tree`

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, instrument};

use super::{run_build_tool, DependencyExtractor, ExtractionError};
use crate::domain::value_objects::BuildSystem;

/// Matches a dependency line of the tree output; capture 2 is the coordinate
/// without its trailing scope.
fn tree_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\+-|\\-)(.*:.*)(:)").expect("maven tree pattern"))
}

pub struct MavenExtractor {
    command: String,
    timeout: Duration,
}

impl MavenExtractor {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

#[async_trait]
impl DependencyExtractor for MavenExtractor {
    fn build_system(&self) -> BuildSystem {
        BuildSystem::Maven
    }

    #[instrument(skip(self), fields(dir = %project_dir.display()))]
    async fn dependency_coordinates(
        &self,
        project_dir: &Path,
    ) -> Result<Vec<String>, ExtractionError> {
        let pom = project_dir.join("pom.xml");
        if !tokio::fs::try_exists(&pom).await.unwrap_or(false) {
            return Err(ExtractionError::MissingBuildFile(BuildSystem::Maven));
        }

        let stdout = run_build_tool(
            &self.command,
            &["-B", "dependency:tree", "-f", "pom.xml"],
            project_dir,
            self.timeout,
        )
        .await?;

        let coordinates = parse_tree_output(&stdout);
        debug!(count = coordinates.len(), "parsed maven dependency tree");
        Ok(coordinates)
    }
}

fn parse_tree_output(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| {
            tree_line_pattern()
                .captures(line)
                .and_then(|c| c.get(2))
                .map(|m| m.as_str().trim().to_owned())
        })
        .collect()
}
