//! Completed-workflow-run processing: download build reports, analyze them,
//! and surface the result as a comment (on the pull request, or on a
//! designated issue for runs without one) and a check run.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use ci_reporter_core::config::Config;
use ci_reporter_report::{
    analyze::{Analyzer, WorkflowJobInfo, WorkflowRunInfo, WorkflowStepInfo},
    classify::BuildReports,
    format,
    render::{render_within, GITHUB_FIELD_LENGTH_HARD_LIMIT},
    workflow_run_id_marker, MESSAGE_ID_ACTIVE,
};
use octocrab::{
    models::{InstallationId, RunId},
    Octocrab,
};
use serde::Deserialize;

use crate::{artifacts, checks, GitHub};

/// The `workflow_run` webhook payload fields we consume. Deserialized from
/// the raw event value; the fields beyond what octocrab models carry
/// (run attempt, pull requests) matter here.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub name: String,
    pub head_sha: String,
    #[serde(default)]
    pub head_branch: Option<String>,
    #[serde(default = "default_run_attempt")]
    pub run_attempt: u64,
    pub conclusion: Option<String>,
    pub html_url: String,
    pub repository: RunRepository,
    /// Repository the head commit lives in; differs from `repository` for
    /// fork pull requests.
    pub head_repository: Option<RunRepository>,
    #[serde(default)]
    pub pull_requests: Vec<RunPullRequest>,
}

fn default_run_attempt() -> u64 { 1 }

#[derive(Debug, Clone, Deserialize)]
pub struct RunRepository {
    pub full_name: String,
    pub html_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunPullRequest {
    pub number: u64,
}

/// Where a run's report gets posted: its pull request, or a designated
/// issue for runs without one (scheduled and push builds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportTarget {
    PullRequest(u64),
    Issue(u64),
}

impl ReportTarget {
    fn number(self) -> u64 {
        match self {
            Self::PullRequest(number) | Self::Issue(number) => number,
        }
    }
}

/// Analyze a completed workflow run and report on its pull request, or on
/// the designated report issue when the run has none. Runs of workflows
/// outside the monitored list are ignored.
pub async fn process_workflow_run(
    github: &GitHub,
    config: &Config,
    installation_id: Option<InstallationId>,
    run: &WorkflowRun,
) -> Result<()> {
    if !config.reporter.monitored_workflows.contains(&run.name) {
        tracing::debug!("Ignoring run of unmonitored workflow {}", run.name);
        return Ok(());
    }
    let (owner, repo) = run
        .repository
        .full_name
        .split_once('/')
        .context("Malformed repository full name")?;
    let client = github.client_for(installation_id).await?;
    let run_id = RunId(run.id);
    let run_cancelled = run.conclusion.as_deref() == Some("cancelled");

    let run_artifacts =
        artifacts::wait_for_artifacts(&client, owner, repo, run_id, run.run_attempt, run_cancelled)
            .await?;

    let mut jobs = artifacts::list_jobs(&client, owner, repo, run_id).await?;
    jobs.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));

    // Scratch directory for the run's artifacts; removed on every exit path
    // when the guard drops.
    let workdir = tempfile::tempdir().context("Failed to create working directory")?;
    let mut bundles: HashMap<String, Option<BuildReports>> = HashMap::new();
    for (job_name, artifact) in &run_artifacts.build_reports {
        let destination = workdir.path().join(artifact.id.to_string());
        let bundle =
            match artifacts::download_build_reports(&client, owner, repo, artifact, &destination)
                .await
            {
                Ok(Some(bundle)) => Some(bundle),
                Ok(None) => {
                    tracing::error!(
                        "Workflow run {} - build reports artifact for job {} never became available",
                        run.id,
                        job_name
                    );
                    None
                }
                Err(e) => {
                    tracing::error!(
                        "Workflow run {} - unable to acquire build reports for job {}: {:?}",
                        run.id,
                        job_name,
                        e
                    );
                    None
                }
            };
        bundles.insert(job_name.clone(), bundle);
    }

    let head_repository =
        run.head_repository.as_ref().unwrap_or(&run.repository).full_name.clone();
    let run_info = WorkflowRunInfo {
        workflow_name: run.name.clone(),
        repository: head_repository,
        repository_url: run.repository.html_url.clone(),
        sha: run.head_sha.clone(),
        conclusion: run.conclusion.as_deref().and_then(|c| c.parse().ok()),
        run_url: run.html_url.clone(),
    };
    let job_infos: Vec<WorkflowJobInfo> = jobs
        .iter()
        .map(|job| WorkflowJobInfo {
            id: job.id,
            name: job.name.clone(),
            conclusion: job.conclusion.as_deref().and_then(|c| c.parse().ok()),
            url: job.html_url.clone(),
            steps: job
                .steps
                .iter()
                .map(|step| WorkflowStepInfo {
                    name: step.name.clone(),
                    conclusion: step.conclusion.as_deref().and_then(|c| c.parse().ok()),
                })
                .collect(),
        })
        .collect();

    let ignored_flaky_tests: HashSet<String> =
        config.reporter.ignored_flaky_tests.iter().cloned().collect();
    let analyzer = Analyzer {
        context_repository: &run.repository.full_name,
        ignored_flaky_tests: &ignored_flaky_tests,
        processed_conclusions: &config.reporter.processed_conclusions,
    };
    let Some(report) = analyzer.analyze(&run_info, &job_infos, &bundles) else {
        tracing::info!("Workflow run {} - nothing to report", run.id);
        return Ok(());
    };

    if config.reporter.create_check_run && !config.reporter.dry_run {
        if let Err(e) = checks::create_build_summary(&client, owner, repo, &report).await {
            tracing::error!("Workflow run {} - unable to create check run: {:?}", run.id, e);
        }
    }

    let Some(target) = resolve_report_target(&client, owner, repo, run, &run_artifacts).await
    else {
        tracing::info!(
            "Workflow run {} - no associated pull request or report issue",
            run.id
        );
        return Ok(());
    };
    let issue_number = target.number();

    if report.is_failure()
        || report.has_flaky_tests()
        || report.has_error_downloading_build_reports()
    {
        let body = render_within(GITHUB_FIELD_LENGTH_HARD_LIMIT, |level| {
            Ok(format::comment_report(&report, run.id, level))
        })?;
        if config.reporter.dry_run {
            tracing::info!("Dry run - comment for #{issue_number}:\n{body}");
            return Ok(());
        }
        if let Err(e) =
            minimize_outdated_comments(&client, owner, repo, issue_number, run.id).await
        {
            tracing::warn!("Unable to minimize outdated report comments: {:?}", e);
        }
        client
            .issues(owner, repo)
            .create_comment(issue_number, body)
            .await
            .context("Failed to post report comment")?;
    } else if !config.reporter.dry_run {
        // Healthy run: hide stale failure reports, and leave a short note so
        // the thread shows the recovery.
        let hidden = minimize_outdated_comments(&client, owner, repo, issue_number, run.id)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Unable to minimize outdated report comments: {:?}", e);
                0
            });
        if hidden > 0 {
            if let ReportTarget::PullRequest(number) = target {
                if is_draft_pull_request(&client, owner, repo, number).await {
                    tracing::debug!("Pull request #{} is a draft, skipping comment", number);
                    return Ok(());
                }
            }
            let body = format!(
                "{MESSAGE_ID_ACTIVE}\n{}\n:white_check_mark: Workflow `{}` is passing again on commit {}.",
                workflow_run_id_marker(run.id),
                run.name,
                run.head_sha
            );
            client
                .issues(owner, repo)
                .create_comment(issue_number, body)
                .await
                .context("Failed to post recovery comment")?;
        }
    }
    Ok(())
}

/// Pull request number known without any extra API call: the payload's
/// `pull_requests` (empty for fork runs), else the number artifact the run
/// uploaded.
fn known_pull_request(run: &WorkflowRun, run_artifacts: &artifacts::RunArtifacts) -> Option<u64> {
    run.pull_requests
        .first()
        .map(|pr| pr.number)
        .or(run_artifacts.pull_request_number)
}

/// Decide where the report goes: a known pull request, an open pull request
/// for the run's head branch, or the designated report issue.
async fn resolve_report_target(
    client: &Octocrab,
    owner: &str,
    repo: &str,
    run: &WorkflowRun,
    run_artifacts: &artifacts::RunArtifacts,
) -> Option<ReportTarget> {
    if let Some(number) = known_pull_request(run, run_artifacts) {
        return Some(ReportTarget::PullRequest(number));
    }
    if let Some(number) = open_pull_request_by_branch(client, owner, repo, run).await {
        return Some(ReportTarget::PullRequest(number));
    }
    run_artifacts.report_issue_number.map(ReportTarget::Issue)
}

/// Last-resort pull request lookup by head branch, for runs whose payload
/// carries no pull request and whose artifacts carry no number.
async fn open_pull_request_by_branch(
    client: &Octocrab,
    owner: &str,
    repo: &str,
    run: &WorkflowRun,
) -> Option<u64> {
    let branch = run.head_branch.as_deref()?;
    let head_owner = run
        .head_repository
        .as_ref()
        .unwrap_or(&run.repository)
        .full_name
        .split('/')
        .next()?;
    match client
        .pulls(owner, repo)
        .list()
        .state(octocrab::params::State::Open)
        .head(format!("{head_owner}:{branch}"))
        .send()
        .await
    {
        Ok(page) => page.items.first().map(|pr| pr.number),
        Err(e) => {
            tracing::warn!(
                "Unable to look up open pull requests for branch {}: {:?}",
                branch,
                e
            );
            None
        }
    }
}

/// Draft pull requests do not get the recovery note. Treated as non-draft
/// when the lookup fails.
async fn is_draft_pull_request(client: &Octocrab, owner: &str, repo: &str, number: u64) -> bool {
    match client.pulls(owner, repo).get(number).await {
        Ok(pr) => pr.draft.unwrap_or(false),
        Err(e) => {
            tracing::warn!("Unable to fetch pull request #{}: {:?}", number, e);
            false
        }
    }
}

/// Minimize previous report comments on the pull request or issue, skipping
/// any that already carry the current run's marker. Returns how many were
/// hidden.
async fn minimize_outdated_comments(
    client: &Octocrab,
    owner: &str,
    repo: &str,
    issue_number: u64,
    run_id: u64,
) -> Result<usize> {
    let current_marker = workflow_run_id_marker(run_id);
    let comments = client
        .all_pages(
            client
                .issues(owner, repo)
                .list_comments(issue_number)
                .send()
                .await
                .context("Failed to list comments")?,
        )
        .await?;
    let mut hidden = 0;
    for comment in comments {
        let Some(body) = comment.body else { continue };
        if !body.contains(MESSAGE_ID_ACTIVE) || body.contains(&current_marker) {
            continue;
        }
        let mutation = serde_json::json!({
            "query": "mutation($id: ID!) { minimizeComment(input: {subjectId: $id, classifier: OUTDATED}) { minimizedComment { isMinimized } } }",
            "variables": { "id": comment.node_id },
        });
        let _: serde_json::Value =
            client.graphql(&mutation).await.context("Failed to minimize comment")?;
        hidden += 1;
    }
    Ok(hidden)
}
