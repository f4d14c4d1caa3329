//! Infrastructure Layer - External concerns and implementations
//!
//! This module handles project sources, build tool invocation, the
//! vulnerability database and the project repository.

pub mod extractors;
pub mod index;
pub mod projects;
pub mod sources;
pub mod store;
pub mod suppression;

// Re-export specific items to avoid ambiguous glob conflicts
pub use extractors::{DependencyExtractor, GradleExtractor, MavenExtractor};
pub use index::{IndexOptions, ProductIndex};
pub use projects::{JsonProjectRepository, ProjectRepository};
pub use sources::{GithubProjectSource, GitlabProjectSource, LocalProjectSource, ProjectSource};
pub use store::{JsonVulnerabilityStore, VulnerabilityStore};
pub use suppression::PatternSuppressionFilter;
