//! Markdown formatting of a [`WorkflowReport`] for pull request comments and
//! check run output.

use std::fmt::Write;

use crate::{
    model::{WorkflowReport, WorkflowReportJob, WorkflowReportModule},
    render::DetailLevel,
    workflow_run_id_marker, MESSAGE_ID_ACTIVE,
};

/// Escape text interpolated into markdown that GitHub renders as HTML.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// The pull request comment body, with the hidden markers that let us find
/// and minimize our own comments later.
pub fn comment_report(report: &WorkflowReport, run_id: u64, level: DetailLevel) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{MESSAGE_ID_ACTIVE}");
    let _ = writeln!(out, "{}", workflow_run_id_marker(run_id));
    let _ = writeln!(out, "## Status for workflow `{}`", report.workflow_name);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "This is the status report for running `{}` on commit {}.",
        report.workflow_name, report.sha
    );
    let _ = writeln!(out);
    report_body(report, level, true, &mut out);
    let _ = writeln!(out);
    let _ = writeln!(out, "[Full information is available in the workflow run.]({})", report.workflow_run_url);
    out
}

/// Short check run summary: status only, details go in the report text.
pub fn check_run_summary(report: &WorkflowReport) -> String {
    let mut out = String::new();
    status_line(report, &mut out);
    let failing = report.jobs.iter().filter(|j| j.is_failing()).count();
    if failing > 0 {
        let _ = writeln!(out);
        let _ = writeln!(out, "{failing} of {} jobs reported a problem.", report.jobs.len());
    }
    out
}

/// The check run report text. Check run output does not support HTML
/// anchors, so in-page failure links are left out.
pub fn check_run_report(report: &WorkflowReport, level: DetailLevel) -> String {
    let mut out = String::new();
    report_body(report, level, false, &mut out);
    out
}

fn report_body(report: &WorkflowReport, level: DetailLevel, anchors: bool, out: &mut String) {
    status_line(report, out);
    if report.has_error_downloading_build_reports() {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            ":warning: Errors occurred while downloading the build reports. This report may be incomplete."
        );
    }

    if report.has_jobs_failing() {
        let _ = writeln!(out);
        let _ = writeln!(out, "### Failing Jobs");
        let _ = writeln!(out);
        let _ = writeln!(out, "| Status | Name | Step | Failures | Logs | Raw logs | Build scan |");
        let _ = writeln!(out, "| :-: | -- | -- | :-: | :-: | :-: | :-: |");
        for job in report.jobs.iter().filter(|j| j.is_failing()) {
            job_row(job, anchors, out);
        }
        for job in report.jobs.iter().filter(|j| j.is_failing()) {
            module_status_lines(job, out);
        }
    }

    let jobs_with_failures: Vec<_> = report
        .jobs
        .iter()
        .filter(|j| j.modules.iter().any(WorkflowReportModule::has_reported_failures))
        .collect();
    if !jobs_with_failures.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "### Failures");
        for job in jobs_with_failures {
            let _ = writeln!(out);
            if anchors {
                if let Some(anchor) = &job.failures_anchor {
                    let _ = writeln!(out, "<a id=\"{anchor}\"></a>");
                }
            }
            let _ = writeln!(out, "#### :gear: {}", escape_html(&job.label));
            for module in
                job.modules.iter().filter(|m| m.has_reported_failures())
            {
                module_failures(module, level, out);
            }
        }
    }

    if report.has_flaky_tests() {
        let _ = writeln!(out);
        let _ = writeln!(out, "### Flaky tests");
        for job in report.jobs.iter().filter(|j| j.has_flaky_tests()) {
            let _ = writeln!(out);
            let _ = writeln!(out, "#### :gear: {}", escape_html(&job.label));
            for module in job.modules.iter().filter(|m| m.has_flaky_tests()) {
                flaky_tests(module, level, out);
            }
        }
    }
}

fn status_line(report: &WorkflowReport, out: &mut String) {
    if report.is_cancelled() {
        let _ = writeln!(out, ":hourglass: The workflow run was cancelled.");
    } else if report.is_failure() {
        let _ = writeln!(out, ":x: The overall status of the workflow run is failing.");
    } else {
        let _ = writeln!(out, ":white_check_mark: The overall status of the workflow run is passing.");
    }
}

fn job_row(job: &WorkflowReportJob, anchors: bool, out: &mut String) {
    let name = match &job.url {
        Some(url) => format!("[{}]({})", escape_html(&job.label), url),
        None => escape_html(&job.label),
    };
    let step = job.failing_step.as_deref().map(escape_html).unwrap_or_default();
    let failures = match (&job.failures_anchor, job.has_reported_failures()) {
        (Some(anchor), true) if anchors => format!("[Failures](#user-content-{anchor})"),
        (_, true) => ":warning:".to_string(),
        _ => String::new(),
    };
    let logs = match &job.url {
        Some(url) => format!("[Logs]({url})"),
        None => String::new(),
    };
    let raw_logs = match &job.raw_logs_url {
        Some(url) => format!("[Raw logs]({url})"),
        None => String::new(),
    };
    let build_scan = match &job.gradle_build_scan_url {
        Some(url) => format!("[Build scan]({url})"),
        None => String::new(),
    };
    let _ = writeln!(
        out,
        "| {} | {} | {} | {} | {} | {} | {} |",
        job.conclusion_emoji(),
        name,
        step,
        failures,
        logs,
        raw_logs,
        build_scan
    );
}

fn module_status_lines(job: &WorkflowReportJob, out: &mut String) {
    if !job.failing_modules.is_empty() {
        let _ = writeln!(out);
        let _ = write!(out, ":x: `{}`: build failed in", escape_html(&job.label));
        list_modules(job.first_failing_modules(), job.more_failing_modules_count(), out);
    }
    if !job.skipped_modules.is_empty() {
        let _ = writeln!(out);
        let _ = write!(out, ":no_entry_sign: `{}`: build skipped for", escape_html(&job.label));
        list_modules(job.first_skipped_modules(), job.more_skipped_modules_count(), out);
    }
}

fn list_modules(first: &[String], more: usize, out: &mut String) {
    for (i, module) in first.iter().enumerate() {
        let _ = write!(out, "{} `{}`", if i == 0 { "" } else { "," }, escape_html(module));
    }
    if more > 0 {
        let _ = write!(out, " and {more} more");
    }
    let _ = writeln!(out, ".");
}

fn module_failures(module: &WorkflowReportModule, level: DetailLevel, out: &mut String) {
    let _ = writeln!(out);
    let _ = writeln!(out, "##### :package: {}", escape_html(&module.name));
    if let Some(error) = &module.build_report_error {
        let _ = writeln!(out);
        let _ = writeln!(out, "```");
        let _ = writeln!(out, "{error}");
        let _ = writeln!(out, "```");
    }
    if module.test_count > 0 {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{} tests, {} failed, {} errored, {} skipped",
            module.test_count, module.failure_count, module.error_count, module.skipped_count
        );
    }
    for failure in &module.test_failures {
        let _ = writeln!(out);
        let name = escape_html(&failure.full_name);
        let line = failure
            .failure_error_line
            .as_deref()
            .map(|l| format!(" (line {l})"))
            .unwrap_or_default();
        if level.include_failure_links {
            let _ = writeln!(out, "- [`{}`]({}){}", name, failure.failure_url, line);
        } else {
            let _ = writeln!(out, "- `{name}`{line}");
        }
        if level.include_stack_traces {
            if let Some(detail) = &failure.abbreviated_failure_detail {
                failure_details(detail, out);
            }
        }
    }
}

fn flaky_tests(module: &WorkflowReportModule, level: DetailLevel, out: &mut String) {
    let _ = writeln!(out);
    let _ = writeln!(out, "##### :package: {}", escape_html(&module.name));
    for flaky in &module.flaky_tests {
        let _ = writeln!(out);
        let _ = writeln!(out, "- `{}`", escape_html(&flaky.full_name));
        for flake in &flaky.flakes {
            if let Some(message) = &flake.message {
                let _ = writeln!(out, "  - `{}`", escape_html(message.lines().next().unwrap_or("")));
            }
            if level.include_stack_traces {
                if let Some(trace) = &flake.abbreviated_stack_trace {
                    failure_details(trace, out);
                }
            }
        }
    }
}

fn failure_details(detail: &str, out: &mut String) {
    let _ = writeln!(out);
    let _ = writeln!(out, "  <details>");
    let _ = writeln!(out, "  <summary>Failure details</summary>");
    let _ = writeln!(out);
    let _ = writeln!(out, "  ```");
    for line in detail.lines() {
        let _ = writeln!(out, "  {line}");
    }
    let _ = writeln!(out, "  ```");
    let _ = writeln!(out, "  </details>");
}

#[cfg(test)]
mod tests {
    use crate::model::{Conclusion, Flake, WorkflowReportFlakyTestCase, WorkflowReportTestCase};

    use super::*;

    fn failing_report() -> WorkflowReport {
        WorkflowReport {
            workflow_name: "CI".to_string(),
            sha: "deadbeef".to_string(),
            jobs: vec![WorkflowReportJob {
                name: "build (17)".to_string(),
                label: "build (17)".to_string(),
                failures_anchor: Some("test-failures-job-7".to_string()),
                conclusion: Some(Conclusion::Failure),
                placeholder: false,
                failing_step: Some("Run tests".to_string()),
                url: Some("https://example.test/job/7".to_string()),
                raw_logs_url: Some("https://example.test/raw/7".to_string()),
                gradle_build_scan_url: None,
                failing_modules: vec!["core".to_string()],
                skipped_modules: vec!["docs".to_string()],
                modules: vec![WorkflowReportModule {
                    name: "core".to_string(),
                    build_status: None,
                    build_report_error: None,
                    test_count: 3,
                    success_count: 2,
                    failure_count: 1,
                    error_count: 0,
                    skipped_count: 0,
                    test_failures: vec![WorkflowReportTestCase {
                        class_path: "core/src/test/java/org/acme/FooTest.java".to_string(),
                        full_name: "org.acme.FooTest.breaks<T>".to_string(),
                        full_class_name: "org.acme.FooTest".to_string(),
                        name: "breaks<T>".to_string(),
                        failure_type: Some("java.lang.AssertionError".to_string()),
                        failure_error_line: Some("42".to_string()),
                        abbreviated_failure_detail: Some("boom\n\tat org.acme".to_string()),
                        failure_detail: Some("boom".to_string()),
                        failure_url: "https://example.test/blob#L42".to_string(),
                    }],
                    flaky_tests: vec![WorkflowReportFlakyTestCase {
                        class_path: "core/src/test/java/org/acme/WobblyTest.java".to_string(),
                        full_name: "org.acme.WobblyTest.wobbles".to_string(),
                        full_class_name: "org.acme.WobblyTest".to_string(),
                        flakes: vec![Flake {
                            message: Some("timed out".to_string()),
                            failure_type: None,
                            stack_trace: Some("trace".to_string()),
                            abbreviated_stack_trace: Some("trace".to_string()),
                        }],
                    }],
                }],
                error_downloading_build_reports: false,
            }],
            same_repository: true,
            conclusion: Some(Conclusion::Failure),
            workflow_run_url: "https://example.test/runs/1".to_string(),
        }
    }

    #[test]
    fn comment_carries_markers_and_sections() {
        let report = failing_report();
        let comment = comment_report(&report, 1234, DetailLevel::default());
        assert!(comment.starts_with(MESSAGE_ID_ACTIVE));
        assert!(comment.contains(&workflow_run_id_marker(1234)));
        assert!(comment.contains("### Failing Jobs"));
        assert!(comment.contains("[Failures](#user-content-test-failures-job-7)"));
        assert!(comment.contains("build failed in `core`."));
        assert!(comment.contains("build skipped for `docs`."));
        assert!(comment.contains("<a id=\"test-failures-job-7\"></a>"));
        assert!(comment.contains("### Flaky tests"));
        // angle brackets in test names must not break the markup
        assert!(comment.contains("org.acme.FooTest.breaks&lt;T&gt;"));
        assert!(comment.contains("<details>"));
    }

    #[test]
    fn detail_level_drops_traces_then_links() {
        let report = failing_report();
        let no_traces = comment_report(
            &report,
            1,
            DetailLevel { include_stack_traces: false, include_failure_links: true },
        );
        assert!(!no_traces.contains("<details>"));
        assert!(no_traces.contains("https://example.test/blob#L42"));

        let tersest = comment_report(
            &report,
            1,
            DetailLevel { include_stack_traces: false, include_failure_links: false },
        );
        assert!(!tersest.contains("https://example.test/blob#L42"));
        assert!(tersest.contains("(line 42)"));
    }

    #[test]
    fn check_run_report_skips_anchors() {
        let report = failing_report();
        let output = check_run_report(&report, DetailLevel::default());
        assert!(!output.contains("<a id="));
        assert!(!output.contains("#user-content-"));
        assert!(output.contains(":warning:"));
        assert!(!output.contains(MESSAGE_ID_ACTIVE));
    }

    #[test]
    fn summary_counts_failing_jobs() {
        let report = failing_report();
        let summary = check_run_summary(&report);
        assert!(summary.contains(":x:"));
        assert!(summary.contains("1 of 1 jobs reported a problem."));
    }

    #[test]
    fn passing_report_is_quiet() {
        let mut report = failing_report();
        report.conclusion = Some(Conclusion::Success);
        report.jobs[0].conclusion = Some(Conclusion::Success);
        report.jobs[0].modules.clear();
        report.jobs[0].failing_modules.clear();
        report.jobs[0].skipped_modules.clear();
        let comment = comment_report(&report, 1, DetailLevel::default());
        assert!(comment.contains(":white_check_mark:"));
        assert!(!comment.contains("### Failing Jobs"));
        assert!(!comment.contains("### Failures"));
    }
}
