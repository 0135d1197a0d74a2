//! Build reports artifact discovery and acquisition: waiting for artifacts
//! to appear after a run completes, matching artifact names to jobs, and
//! downloading with bounded retry.

use std::{
    collections::HashMap,
    path::Path,
    sync::{
        atomic::{AtomicU32, Ordering},
        OnceLock,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use ci_reporter_core::retry::{poll_until, PollConfig};
use ci_reporter_report::{
    archive,
    classify::{BuildReports, BuildReportsBuilder},
    BUILD_REPORTS_ARTIFACT_PREFIX, PULL_REQUEST_NUMBER_PREFIX, REPORT_ISSUE_NUMBER_PREFIX,
};
use octocrab::{
    models::{ArtifactId, RunId},
    params::actions::ArchiveFormat,
    Octocrab,
};
use regex::Regex;
use serde::{Deserialize, Serialize};

// Artifacts trickle in after the run completes; poll the listing for a while
// before giving up.
const READINESS_INITIAL_DELAY: Duration = Duration::from_secs(5);
const READINESS_INTERVAL: Duration = Duration::from_secs(30);
const READINESS_TIMEOUT: Duration = Duration::from_secs(300);

// Freshly uploaded artifacts can 404 or arrive truncated; retry downloads on
// a slower cadence within the same overall budget.
const DOWNLOAD_INITIAL_DELAY: Duration = Duration::from_secs(5);
const DOWNLOAD_INTERVAL: Duration = Duration::from_secs(60);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct RunArtifact {
    pub id: ArtifactId,
    pub name: String,
}

/// Artifacts of interest found on a workflow run.
#[derive(Debug, Default)]
pub struct RunArtifacts {
    /// Build reports artifacts keyed by the job name encoded in their name.
    pub build_reports: HashMap<String, RunArtifact>,
    /// Pull request number uploaded by fork-triggered runs.
    pub pull_request_number: Option<u64>,
    /// Issue designated to receive the report when the run has no pull
    /// request, e.g. scheduled builds.
    pub report_issue_number: Option<u64>,
}

/// Match a build reports artifact name and yield the job name it encodes.
/// Two naming forms exist: the legacy `build-reports-<job>` and the
/// attempt-numbered `build-reports-<attempt>-<job>`; the latter only matches
/// its own run attempt.
pub fn matching_job_name(artifact_name: &str, run_attempt: u64) -> Option<&str> {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = REGEX.get_or_init(|| {
        Regex::new(&format!(
            "^{}(?:(?P<attempt>[0-9]+)-)?(?P<job>.+)$",
            regex::escape(BUILD_REPORTS_ARTIFACT_PREFIX)
        ))
        .expect("artifact name regex")
    });
    let caps = regex.captures(artifact_name)?;
    if let Some(attempt) = caps.name("attempt") {
        if attempt.as_str().parse::<u64>().ok()? != run_attempt {
            return None;
        }
    }
    caps.name("job").map(|m| m.as_str())
}

pub fn pull_request_number(artifact_name: &str) -> Option<u64> {
    artifact_name.strip_prefix(PULL_REQUEST_NUMBER_PREFIX)?.parse().ok()
}

pub fn report_issue_number(artifact_name: &str) -> Option<u64> {
    artifact_name.strip_prefix(REPORT_ISSUE_NUMBER_PREFIX)?.parse().ok()
}

async fn list_run_artifacts(
    client: &Octocrab,
    owner: &str,
    repo: &str,
    run_id: RunId,
) -> Result<Vec<RunArtifact>> {
    let artifacts = client
        .all_pages(
            client
                .actions()
                .list_workflow_run_artifacts(owner, repo, run_id)
                .send()
                .await
                .context("Failed to fetch artifacts")?
                .value
                .unwrap_or_default(),
        )
        .await?;
    Ok(artifacts
        .into_iter()
        .filter(|a| !a.expired)
        .map(|a| RunArtifact { id: a.id, name: a.name })
        .collect())
}

fn collect_artifacts(artifacts: Vec<RunArtifact>, run_attempt: u64) -> RunArtifacts {
    let mut result = RunArtifacts::default();
    for artifact in artifacts {
        if let Some(number) = pull_request_number(&artifact.name) {
            result.pull_request_number = Some(number);
            continue;
        }
        if let Some(number) = report_issue_number(&artifact.name) {
            result.report_issue_number = Some(number);
            continue;
        }
        if let Some(job) = matching_job_name(&artifact.name, run_attempt) {
            result.build_reports.insert(job.to_string(), artifact);
        }
    }
    result
}

/// Wait until the run's build reports artifacts are listed. Transient API
/// errors count as not-ready. On timeout a warning is logged (unless the run
/// was cancelled, where no artifacts are expected) and the listing is taken
/// one last time: a run that failed before uploading build reports may still
/// have uploaded its pull request or report issue number.
pub async fn wait_for_artifacts(
    client: &Octocrab,
    owner: &str,
    repo: &str,
    run_id: RunId,
    run_attempt: u64,
    run_cancelled: bool,
) -> Result<RunArtifacts> {
    let config = PollConfig {
        initial_delay: READINESS_INITIAL_DELAY,
        interval: READINESS_INTERVAL,
        timeout: READINESS_TIMEOUT,
        ignore_errors: true,
    };
    let found = poll_until(config, || async move {
        let artifacts = list_run_artifacts(client, owner, repo, run_id).await?;
        let collected = collect_artifacts(artifacts, run_attempt);
        if collected.build_reports.is_empty() {
            Ok(None)
        } else {
            Ok(Some(collected))
        }
    })
    .await?;
    match found {
        Some(collected) => Ok(collected),
        None => {
            if !run_cancelled {
                tracing::warn!(
                    "Workflow run {} - no build reports artifacts appeared within {:?}",
                    run_id,
                    READINESS_TIMEOUT
                );
            }
            let artifacts = match list_run_artifacts(client, owner, repo, run_id).await {
                Ok(artifacts) => artifacts,
                Err(e) => {
                    tracing::warn!("Final artifact listing failed: {:?}", e);
                    Vec::new()
                }
            };
            Ok(collect_artifacts(artifacts, run_attempt))
        }
    }
}

/// Download and extract one job's build reports artifact, retrying within a
/// bounded budget. Each attempt extracts into a fresh `retry-N` subdirectory
/// of `destination` so a half-written tree never pollutes the next attempt.
///
/// `Ok(None)` means the artifact never became usable; the caller records the
/// job as having a download error. Only a failure to create the attempt
/// directory aborts outright.
pub async fn download_build_reports(
    client: &Octocrab,
    owner: &str,
    repo: &str,
    artifact: &RunArtifact,
    destination: &Path,
) -> Result<Option<BuildReports>> {
    let config = PollConfig {
        initial_delay: DOWNLOAD_INITIAL_DELAY,
        interval: DOWNLOAD_INTERVAL,
        timeout: DOWNLOAD_TIMEOUT,
        ignore_errors: false,
    };
    let attempt = AtomicU32::new(0);
    poll_until(config, || {
        let attempt = attempt.fetch_add(1, Ordering::SeqCst);
        async move {
            let dir = destination.join(format!("retry-{attempt}"));
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
            match try_download(client, owner, repo, artifact.id, &dir).await {
                Ok(reports) => Ok(Some(reports)),
                Err(e) => {
                    tracing::warn!(
                        "Unable to download and extract artifact {}, will retry: {:?}",
                        artifact.name,
                        e
                    );
                    Ok(None)
                }
            }
        }
    })
    .await
}

async fn try_download(
    client: &Octocrab,
    owner: &str,
    repo: &str,
    artifact_id: ArtifactId,
    destination: &Path,
) -> Result<BuildReports> {
    let bytes = client
        .actions()
        .download_artifact(owner, repo, artifact_id, ArchiveFormat::Zip)
        .await
        .context("Failed to download artifact")?;
    let mut builder = BuildReportsBuilder::new(destination.to_path_buf());
    archive::unzip_into(&bytes, destination, &mut builder)?;
    Ok(builder.build())
}

#[derive(Debug, Deserialize)]
pub struct WorkflowJobs {
    pub total_count: u64,
    pub jobs: Vec<WorkflowJob>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowJob {
    pub id: u64,
    pub name: String,
    pub conclusion: Option<String>,
    pub html_url: Option<String>,
    #[serde(default)]
    pub steps: Vec<WorkflowJobStep>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowJobStep {
    pub name: String,
    pub conclusion: Option<String>,
}

#[derive(Serialize)]
struct JobsParams {
    filter: &'static str,
    per_page: u8,
    page: u32,
}

/// List the jobs of the run's latest attempt.
pub async fn list_jobs(
    client: &Octocrab,
    owner: &str,
    repo: &str,
    run_id: RunId,
) -> Result<Vec<WorkflowJob>> {
    let mut jobs = Vec::new();
    let mut page = 1;
    loop {
        let response: WorkflowJobs = client
            .get(
                format!("/repos/{owner}/{repo}/actions/runs/{run_id}/jobs"),
                Some(&JobsParams { filter: "latest", per_page: 100, page }),
            )
            .await
            .context("Failed to fetch workflow jobs")?;
        if response.jobs.is_empty() {
            break;
        }
        jobs.extend(response.jobs);
        if jobs.len() >= response.total_count as usize {
            break;
        }
        page += 1;
    }
    Ok(jobs)
}
