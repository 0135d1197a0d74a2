pub mod analyze;
pub mod archive;
pub mod build_status;
pub mod classify;
pub mod format;
pub mod junit;
pub mod model;
pub mod render;
pub mod stack_trace;

/// Artifact names produced by the build start with this prefix, optionally
/// followed by the run attempt number and `-`, then the job name.
pub const BUILD_REPORTS_ARTIFACT_PREFIX: &str = "build-reports-";

/// Relative path of the machine-readable build status file within a job
/// artifact.
pub const BUILD_REPORT_PATH: &str = "target/build-report.json";

/// Relative path of the file carrying the Gradle build scan URL.
pub const GRADLE_BUILD_SCAN_URL_PATH: &str = "target/gradle-build-scan-url.txt";

/// Artifacts named with this prefix carry the pull request number for runs
/// triggered from forks.
pub const PULL_REQUEST_NUMBER_PREFIX: &str = "pull-request-number-";

/// Artifacts named with this prefix designate an issue to report to when the
/// run has no associated pull request.
pub const REPORT_ISSUE_NUMBER_PREFIX: &str = "report-issue-number-";

/// Check run name prefix; the head SHA is appended.
pub const BUILD_SUMMARY_CHECK_RUN_PREFIX: &str = "Build summary for ";

/// Hidden marker identifying report comments posted by this service.
pub const MESSAGE_ID_ACTIVE: &str = "<!-- CI-Reporter/msg-id:workflow-run-status-active -->";

pub fn workflow_run_id_marker(run_id: u64) -> String {
    format!("<!-- CI-Reporter/workflow-run-id:{run_id} -->")
}
