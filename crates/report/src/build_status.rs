//! The build status file (`target/build-report.json`) written by the build
//! tool extension: one entry per module with its outcome and error text.

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    #[serde(alias = "success")]
    Success,
    #[serde(alias = "failure")]
    Failure,
    #[serde(alias = "skipped")]
    Skipped,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectReport {
    #[serde(default)]
    pub name: Option<String>,
    pub status: BuildStatus,
    /// Module base directory relative to the checkout root. Blank for the
    /// root module.
    #[serde(default)]
    pub basedir: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub artifact_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    #[serde(default)]
    pub project_reports: Vec<ProjectReport>,
}

impl BuildReport {
    /// Deserialize the build status file. A missing or malformed file
    /// degrades to an empty report so the rest of the job still gets
    /// analyzed.
    pub fn read_or_empty(path: &Path) -> BuildReport {
        let contents = match std::fs::read(path) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::error!("Unable to read {}: {}", path.display(), e);
                return BuildReport::default();
            }
        };
        match serde_json::from_slice(&contents) {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("Unable to deserialize {}: {}", path.display(), e);
                BuildReport::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_project_reports() {
        let json = r#"{
            "projectReports": [
                {"name": "Core", "status": "SUCCESS", "basedir": "core",
                 "groupId": "org.acme", "artifactId": "acme-core"},
                {"name": "HTTP", "status": "FAILURE", "basedir": "extensions/http",
                 "error": "Compilation failure\nsymbol not found"},
                {"name": "Docs", "status": "SKIPPED", "basedir": "docs"}
            ]
        }"#;
        let report: BuildReport = serde_json::from_str(json).unwrap();
        assert_eq!(report.project_reports.len(), 3);
        assert_eq!(report.project_reports[0].status, BuildStatus::Success);
        assert_eq!(report.project_reports[1].status, BuildStatus::Failure);
        assert_eq!(report.project_reports[1].error.as_deref(), Some("Compilation failure\nsymbol not found"));
        assert_eq!(report.project_reports[2].basedir.as_deref(), Some("docs"));
    }

    #[test]
    fn malformed_file_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build-report.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(BuildReport::read_or_empty(&path).project_reports.is_empty());
        // missing file behaves the same
        assert!(BuildReport::read_or_empty(&dir.path().join("nope.json")).project_reports.is_empty());
    }
}
