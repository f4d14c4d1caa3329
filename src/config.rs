//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub projects: ProjectStoreConfig,
    pub index: IndexConfig,
    pub scan: ScanConfig,
    pub sources: SourcesConfig,
    pub suppression: SuppressionConfig,
    pub logging: LoggingConfig,
}

/// Read-only vulnerability database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// JSON file holding the vulnerability records
    pub path: PathBuf,
}

/// Project repository configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectStoreConfig {
    /// JSON file the scanned projects are persisted to
    pub path: PathBuf,
}

/// Vendor/product index tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Hits scoring below this relevance are dropped
    pub relevance_floor: f32,
    /// Maximum candidate pairs returned per query
    pub max_results: usize,
    /// Score multiplier for tokens backed by highest-confidence evidence
    pub weight_boost: f32,
}

/// Scan orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Upper bound on projects processed concurrently
    pub max_concurrent_projects: usize,
    /// Per-project build tool timeout in seconds
    pub extraction_timeout_seconds: u64,
    pub maven_command: String,
    pub gradle_command: String,
}

/// Project source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    pub local: LocalSourceConfig,
    pub github: GithubSourceConfig,
    pub gitlab: GitlabSourceConfig,
}

/// Local directory source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSourceConfig {
    pub enabled: bool,
    /// Directory whose immediate subdirectories are treated as projects
    pub path: PathBuf,
}

/// GitHub source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubSourceConfig {
    pub enabled: bool,
    pub username: String,
    pub token: Option<String>,
    pub base_url: Option<String>,
    pub timeout_seconds: u64,
}

/// GitLab source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitlabSourceConfig {
    pub enabled: bool,
    pub base_url: String,
    pub token: Option<String>,
    pub timeout_seconds: u64,
}

/// Identifier suppression configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressionConfig {
    /// File with one identifier regex per line; `#` starts a comment
    pub file: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                path: PathBuf::from("data/vulnerabilities.json"),
            },
            projects: ProjectStoreConfig {
                path: PathBuf::from("data/projects.json"),
            },
            index: IndexConfig {
                relevance_floor: 0.08,
                max_results: 25,
                weight_boost: 1.5,
            },
            scan: ScanConfig {
                max_concurrent_projects: 4,
                extraction_timeout_seconds: 300,
                maven_command: "mvn".to_string(),
                gradle_command: "gradle".to_string(),
            },
            sources: SourcesConfig {
                local: LocalSourceConfig {
                    enabled: true,
                    path: PathBuf::from("projects"),
                },
                github: GithubSourceConfig {
                    enabled: false,
                    username: String::new(),
                    token: None,
                    base_url: None,
                    timeout_seconds: 30,
                },
                gitlab: GitlabSourceConfig {
                    enabled: false,
                    base_url: "https://gitlab.com".to_string(),
                    token: None,
                    timeout_seconds: 30,
                },
            },
            suppression: SuppressionConfig { file: None },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("SOURCESCAN").separator("__"));

        // Override with environment-specific config if ENV is set
        if let Ok(env) = std::env::var("ENV") {
            builder = builder
                .add_source(config::File::with_name(&format!("config/{}", env)).required(false));
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if !(0.0..=1.0).contains(&self.index.relevance_floor) {
            return Err(config::ConfigError::Message(
                "index.relevance_floor must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.index.max_results == 0 {
            return Err(config::ConfigError::Message(
                "index.max_results must be positive".to_string(),
            ));
        }
        if self.scan.max_concurrent_projects == 0 {
            return Err(config::ConfigError::Message(
                "scan.max_concurrent_projects must be positive".to_string(),
            ));
        }
        if self.sources.github.enabled && self.sources.github.username.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "sources.github.username is required when the GitHub source is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.index.relevance_floor, 0.08);
        assert_eq!(config.index.max_results, 25);
    }

    #[test]
    fn test_enabled_github_source_requires_username() {
        let mut config = Config::default();
        config.sources.github.enabled = true;
        assert!(config.validate().is_err());
        config.sources.github.username = "octocat".to_string();
        assert!(config.validate().is_ok());
    }
}
