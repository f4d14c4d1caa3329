//! Gradle dependency extraction via `gradle dependencies`

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, instrument};

use super::{run_build_tool, DependencyExtractor, ExtractionError};
use crate::domain::value_objects::BuildSystem;

/// Matches a dependency line of the configuration report; capture 2 is the
/// coordinate.
fn tree_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\+---|\\---)(.*:.*)").expect("gradle tree pattern"))
}

pub struct GradleExtractor {
    command: String,
    timeout: Duration,
}

impl GradleExtractor {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    /// Prefer the project's own wrapper when it is present.
    async fn command_for(&self, project_dir: &Path) -> String {
        let wrapper = project_dir.join("gradlew");
        if tokio::fs::try_exists(&wrapper).await.unwrap_or(false) {
            wrapper.to_string_lossy().into_owned()
        } else {
            self.command.clone()
        }
    }
}

#[async_trait]
impl DependencyExtractor for GradleExtractor {
    fn build_system(&self) -> BuildSystem {
        BuildSystem::Gradle
    }

    #[instrument(skip(self), fields(dir = %project_dir.display()))]
    async fn dependency_coordinates(
        &self,
        project_dir: &Path,
    ) -> Result<Vec<String>, ExtractionError> {
        let build_file = project_dir.join("build.gradle");
        if !tokio::fs::try_exists(&build_file).await.unwrap_or(false) {
            return Err(ExtractionError::MissingBuildFile(BuildSystem::Gradle));
        }

        let command = self.command_for(project_dir).await;
        let stdout =
            run_build_tool(&command, &["dependencies", "-q"], project_dir, self.timeout).await?;

        let coordinates = parse_dependency_report(&stdout);
        debug!(count = coordinates.len(), "parsed gradle dependency report");
        Ok(coordinates)
    }
}

/// Lines with `->` (conflict-resolved versions) or `(*)` (already printed
/// subtrees) would duplicate or misreport dependencies, so they are dropped.
fn parse_dependency_report(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| {
            tree_line_pattern()
                .captures(line)
                .and_then(|c| c.get(2))
                .map(|m| m.as_str().trim().to_owned())
        })
        .filter(|coordinate| !coordinate.contains("->") && !coordinate.contains("(*)"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_OUTPUT: &str = "\
compileClasspath - Compile classpath for source set 'main'.
+--- org.codehaus.groovy:groovy:2.5.4
+--- org.springframework:spring-core:5.1.6.RELEASE
|    \\--- org.springframework:spring-jcl:5.1.6.RELEASE
+--- org.slf4j:slf4j-api:1.7.25 -> 1.7.26
\\--- junit:junit:4.12 (*)";

    #[test]
    fn test_parse_dependency_report() {
        let coordinates = parse_dependency_report(SAMPLE_OUTPUT);
        assert_eq!(
            coordinates,
            vec![
                "org.codehaus.groovy:groovy:2.5.4",
                "org.springframework:spring-core:5.1.6.RELEASE",
                "org.springframework:spring-jcl:5.1.6.RELEASE",
            ]
        );
    }

    #[test]
    fn test_conflict_and_repeat_markers_are_filtered() {
        let report = "+--- a:b:1.0 -> 2.0\n\\--- c:d:3.0 (*)";
        assert!(parse_dependency_report(report).is_empty());
    }

    #[tokio::test]
    async fn test_missing_build_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = GradleExtractor::new("gradle", Duration::from_secs(5));
        let result = extractor.dependency_coordinates(dir.path()).await;
        assert!(matches!(result, Err(ExtractionError::MissingBuildFile(_))));
    }
}
