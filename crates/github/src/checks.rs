//! Check run creation: one "Build summary" check run per analyzed run, with
//! an annotation on every definite test failure.

use anyhow::{Context, Result};
use ci_reporter_report::{
    format,
    model::WorkflowReport,
    render::{render_within, GITHUB_FIELD_LENGTH_HARD_LIMIT},
    stack_trace, BUILD_SUMMARY_CHECK_RUN_PREFIX,
};
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};

/// The API caps annotations per request; the rest go in update calls.
const ANNOTATIONS_PER_REQUEST: usize = 50;
const ANNOTATION_TITLE_LIMIT: usize = 255;
const ANNOTATION_FRAME_BUDGET: usize = 3;
const FALLBACK_MESSAGE: &str = "The test failed.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckRunAnnotation {
    pub path: String,
    pub start_line: u64,
    pub end_line: u64,
    pub annotation_level: &'static str,
    pub message: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_details: Option<String>,
}

#[derive(Serialize)]
struct CheckRunOutput<'a> {
    title: &'a str,
    summary: &'a str,
    text: &'a str,
    annotations: &'a [CheckRunAnnotation],
}

#[derive(Serialize)]
struct CreateCheckRun<'a> {
    name: String,
    head_sha: &'a str,
    status: &'static str,
    conclusion: &'static str,
    output: CheckRunOutput<'a>,
}

#[derive(Serialize)]
struct UpdateCheckRun<'a> {
    output: CheckRunOutput<'a>,
}

#[derive(Deserialize)]
struct CreatedCheckRun {
    id: u64,
    html_url: Option<String>,
}

/// Create the build summary check run and return its URL. The check run is
/// always neutral; the workflow's own conclusion carries the red or green.
pub async fn create_build_summary(
    client: &Octocrab,
    owner: &str,
    repo: &str,
    report: &WorkflowReport,
) -> Result<Option<String>> {
    let annotations = failure_annotations(report);
    let text = render_within(GITHUB_FIELD_LENGTH_HARD_LIMIT, |level| {
        Ok(format::check_run_report(report, level))
    })?;
    let summary = format::check_run_summary(report);
    let name = format!("{BUILD_SUMMARY_CHECK_RUN_PREFIX}{}", report.sha);

    let (first, rest) = annotations.split_at(annotations.len().min(ANNOTATIONS_PER_REQUEST));
    let created: CreatedCheckRun = client
        .post(
            format!("/repos/{owner}/{repo}/check-runs"),
            Some(&CreateCheckRun {
                name: name.clone(),
                head_sha: &report.sha,
                status: "completed",
                conclusion: "neutral",
                output: CheckRunOutput {
                    title: &name,
                    summary: &summary,
                    text: &text,
                    annotations: first,
                },
            }),
        )
        .await
        .context("Failed to create check run")?;
    for chunk in rest.chunks(ANNOTATIONS_PER_REQUEST) {
        let _: serde_json::Value = client
            .patch(
                format!("/repos/{owner}/{repo}/check-runs/{}", created.id),
                Some(&UpdateCheckRun {
                    output: CheckRunOutput {
                        title: &name,
                        summary: &summary,
                        text: &text,
                        annotations: chunk,
                    },
                }),
            )
            .await
            .context("Failed to append check run annotations")?;
    }
    Ok(created.html_url)
}

fn failure_annotations(report: &WorkflowReport) -> Vec<CheckRunAnnotation> {
    let mut annotations = Vec::new();
    for job in &report.jobs {
        for module in &job.modules {
            for failure in &module.test_failures {
                let line = failure
                    .failure_error_line
                    .as_deref()
                    .and_then(|l| l.trim().parse().ok())
                    .unwrap_or(1);
                let message = stack_trace::shorten(
                    failure.failure_detail.as_deref(),
                    GITHUB_FIELD_LENGTH_HARD_LIMIT,
                    ANNOTATION_FRAME_BUDGET,
                )
                .unwrap_or_else(|| FALLBACK_MESSAGE.to_string());
                annotations.push(CheckRunAnnotation {
                    path: failure.class_path.clone(),
                    start_line: line,
                    end_line: line,
                    annotation_level: "failure",
                    message,
                    title: stack_trace::abbreviate(Some(&job.label), ANNOTATION_TITLE_LIMIT)
                        .unwrap_or_default(),
                    raw_details: stack_trace::abbreviate(
                        failure.failure_detail.as_deref(),
                        GITHUB_FIELD_LENGTH_HARD_LIMIT,
                    ),
                });
            }
        }
    }
    annotations
}

#[cfg(test)]
mod tests {
    use ci_reporter_report::model::{
        Conclusion, WorkflowReportJob, WorkflowReportModule, WorkflowReportTestCase,
    };

    use super::*;

    fn failure(line: Option<&str>, detail: Option<&str>) -> WorkflowReportTestCase {
        WorkflowReportTestCase {
            class_path: "core/src/test/java/org/acme/FooTest.java".to_string(),
            full_name: "org.acme.FooTest.breaks".to_string(),
            full_class_name: "org.acme.FooTest".to_string(),
            name: "breaks".to_string(),
            failure_type: None,
            failure_error_line: line.map(str::to_string),
            abbreviated_failure_detail: detail.map(str::to_string),
            failure_detail: detail.map(str::to_string),
            failure_url: String::new(),
        }
    }

    fn report_with_failures(failures: Vec<WorkflowReportTestCase>) -> WorkflowReport {
        WorkflowReport {
            workflow_name: "CI".to_string(),
            sha: "deadbeef".to_string(),
            jobs: vec![WorkflowReportJob {
                name: "build".to_string(),
                label: "b".repeat(300),
                failures_anchor: None,
                conclusion: Some(Conclusion::Failure),
                placeholder: false,
                failing_step: None,
                url: None,
                raw_logs_url: None,
                gradle_build_scan_url: None,
                failing_modules: Vec::new(),
                skipped_modules: Vec::new(),
                modules: vec![WorkflowReportModule {
                    name: "core".to_string(),
                    build_status: None,
                    build_report_error: None,
                    test_count: failures.len(),
                    success_count: 0,
                    failure_count: failures.len(),
                    error_count: 0,
                    skipped_count: 0,
                    test_failures: failures,
                    flaky_tests: Vec::new(),
                }],
                error_downloading_build_reports: false,
            }],
            same_repository: true,
            conclusion: Some(Conclusion::Failure),
            workflow_run_url: String::new(),
        }
    }

    #[test]
    fn annotation_defaults_and_truncation() {
        let report = report_with_failures(vec![failure(None, None)]);
        let annotations = failure_annotations(&report);
        assert_eq!(annotations.len(), 1);
        let annotation = &annotations[0];
        assert_eq!(annotation.start_line, 1);
        assert_eq!(annotation.end_line, 1);
        assert_eq!(annotation.message, FALLBACK_MESSAGE);
        assert_eq!(annotation.title.chars().count(), ANNOTATION_TITLE_LIMIT);
        assert_eq!(annotation.raw_details, None);
    }

    #[test]
    fn annotation_uses_failure_line_and_detail() {
        let detail = "boom\n\tat org.acme.FooTest.breaks(FooTest.java:42)";
        let report = report_with_failures(vec![failure(Some("42"), Some(detail))]);
        let annotations = failure_annotations(&report);
        assert_eq!(annotations[0].start_line, 42);
        assert!(annotations[0].message.contains("FooTest.java:42"));
        assert_eq!(annotations[0].raw_details.as_deref(), Some(detail));
    }

    #[test]
    fn non_numeric_line_falls_back_to_one() {
        let report = report_with_failures(vec![failure(Some("forty-two"), None)]);
        assert_eq!(failure_annotations(&report)[0].start_line, 1);
    }
}
