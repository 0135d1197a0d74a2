use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub github: GitHubConfig,
    #[serde(default)]
    pub reporter: ReporterConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())
            .with_context(|| format!("Failed to open config file {}", path.as_ref().display()))?;
        serde_yaml::from_reader(std::io::BufReader::new(file)).context("Failed to parse config")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitHubConfig {
    pub token: String,
    pub app: Option<GitHubAppConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitHubAppConfig {
    pub id: u64,
    pub webhook_secret: String,
    pub private_key: String,
}

/// Behavior of the build report pipeline.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReporterConfig {
    /// Workflow names to report on. Runs of any other workflow are ignored.
    #[serde(default)]
    pub monitored_workflows: Vec<String>,
    /// Log generated comments instead of posting them.
    #[serde(default)]
    pub dry_run: bool,
    /// Create a check run with per-test-failure annotations.
    #[serde(default = "default_true")]
    pub create_check_run: bool,
    /// Flaky tests (full test name or class name) to leave out of reports.
    #[serde(default)]
    pub ignored_flaky_tests: Vec<String>,
    /// Job conclusions that get full artifact analysis. Jobs with any other
    /// conclusion (queued, skipped, neutral, stale...) are kept in the report
    /// as placeholders only. The historical rule varied, so it's data here.
    #[serde(default = "default_processed_conclusions")]
    pub processed_conclusions: Vec<String>,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            monitored_workflows: Vec::new(),
            dry_run: false,
            create_check_run: true,
            ignored_flaky_tests: Vec::new(),
            processed_conclusions: default_processed_conclusions(),
        }
    }
}

fn default_true() -> bool { true }

fn default_processed_conclusions() -> Vec<String> {
    vec!["success".to_string(), "failure".to_string(), "cancelled".to_string()]
}
