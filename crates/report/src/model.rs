//! The aggregated workflow report model: immutable value objects built once
//! per run, plus the derived predicates the renderers and posting layer
//! consume.

use std::{cmp::Ordering, fmt, str::FromStr};

use crate::build_status::BuildStatus;

/// Terminal (or not-yet-terminal) conclusion of a run, job or step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conclusion {
    Success,
    Failure,
    Cancelled,
    Skipped,
    Neutral,
    Stale,
    TimedOut,
    ActionRequired,
    Other(String),
}

impl Conclusion {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
            Self::Skipped => "skipped",
            Self::Neutral => "neutral",
            Self::Stale => "stale",
            Self::TimedOut => "timed_out",
            Self::ActionRequired => "action_required",
            Self::Other(s) => s,
        }
    }
}

impl FromStr for Conclusion {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "success" => Self::Success,
            "failure" => Self::Failure,
            "cancelled" => Self::Cancelled,
            "skipped" => Self::Skipped,
            "neutral" => Self::Neutral,
            "stale" => Self::Stale,
            "timed_out" => Self::TimedOut,
            "action_required" => Self::ActionRequired,
            other => Self::Other(other.to_string()),
        })
    }
}

impl fmt::Display for Conclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// One definite test failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowReportTestCase {
    /// Conventional source path of the test class within the repository.
    pub class_path: String,
    pub full_name: String,
    pub full_class_name: String,
    pub name: String,
    pub failure_type: Option<String>,
    pub failure_error_line: Option<String>,
    /// Shortened detail for inline display; the raw detail stays separate.
    pub abbreviated_failure_detail: Option<String>,
    pub failure_detail: Option<String>,
    /// Link to the failing line on GitHub.
    pub failure_url: String,
}

impl Ord for WorkflowReportTestCase {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_name = self.full_name.cmp(&other.full_name);
        if by_name != Ordering::Equal {
            return by_name;
        }
        // tie-break numerically, but only when both lines parse
        match (parse_line(&self.failure_error_line), parse_line(&other.failure_error_line)) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => by_name,
        }
    }
}

impl PartialOrd for WorkflowReportTestCase {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

fn parse_line(line: &Option<String>) -> Option<u64> {
    line.as_deref().and_then(|l| l.trim().parse().ok())
}

/// One flaky occurrence: a failed attempt that later passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flake {
    pub message: Option<String>,
    pub failure_type: Option<String>,
    pub stack_trace: Option<String>,
    pub abbreviated_stack_trace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowReportFlakyTestCase {
    pub class_path: String,
    pub full_name: String,
    pub full_class_name: String,
    pub flakes: Vec<Flake>,
}

impl Ord for WorkflowReportFlakyTestCase {
    fn cmp(&self, other: &Self) -> Ordering { self.full_name.cmp(&other.full_name) }
}

impl PartialOrd for WorkflowReportFlakyTestCase {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

#[derive(Debug, Clone)]
pub struct WorkflowReportModule {
    pub name: String,
    pub build_status: Option<BuildStatus>,
    /// First lines of the build error, for display.
    pub build_report_error: Option<String>,
    pub test_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub error_count: usize,
    pub skipped_count: usize,
    pub test_failures: Vec<WorkflowReportTestCase>,
    pub flaky_tests: Vec<WorkflowReportFlakyTestCase>,
}

impl WorkflowReportModule {
    pub fn has_test_failures(&self) -> bool { self.failure_count > 0 || self.error_count > 0 }

    pub fn has_build_report_failures(&self) -> bool {
        self.build_status == Some(BuildStatus::Failure)
    }

    pub fn has_reported_failures(&self) -> bool {
        self.has_test_failures() || self.has_build_report_failures()
    }

    pub fn has_flaky_tests(&self) -> bool { !self.flaky_tests.is_empty() }
}

const MODULES_LIMIT: usize = 3;

#[derive(Debug, Clone)]
pub struct WorkflowReportJob {
    pub name: String,
    pub label: String,
    pub failures_anchor: Option<String>,
    pub conclusion: Option<Conclusion>,
    /// True for jobs with a non-processed conclusion (queued, skipped...):
    /// kept for ordering, never counted as failing.
    pub placeholder: bool,
    pub failing_step: Option<String>,
    pub url: Option<String>,
    pub raw_logs_url: Option<String>,
    pub gradle_build_scan_url: Option<String>,
    /// Module base directories the build status file marks as failed.
    pub failing_modules: Vec<String>,
    pub skipped_modules: Vec<String>,
    pub modules: Vec<WorkflowReportModule>,
    pub error_downloading_build_reports: bool,
}

impl WorkflowReportJob {
    pub fn conclusion_emoji(&self) -> &'static str {
        match self.conclusion {
            Some(Conclusion::Success) => ":heavy_check_mark:",
            Some(Conclusion::Failure) => ":x:",
            Some(Conclusion::Cancelled) => ":hourglass:",
            Some(Conclusion::Skipped) => ":no_entry_sign:",
            _ => ":question:",
        }
    }

    pub fn is_failing(&self) -> bool {
        if self.placeholder {
            return false;
        }
        let conclusion_failing = !matches!(
            self.conclusion,
            Some(Conclusion::Success)
                | Some(Conclusion::Skipped)
                | Some(Conclusion::Stale)
                | Some(Conclusion::Neutral)
        );
        conclusion_failing || self.has_reported_failures()
    }

    pub fn has_reported_failures(&self) -> bool {
        self.has_build_report_failures() || self.has_test_failures()
    }

    pub fn has_build_report_failures(&self) -> bool {
        self.modules.iter().any(|m| m.has_build_report_failures())
    }

    pub fn has_test_failures(&self) -> bool { self.modules.iter().any(|m| m.has_test_failures()) }

    pub fn has_flaky_tests(&self) -> bool { self.modules.iter().any(|m| m.has_flaky_tests()) }

    pub fn first_failing_modules(&self) -> &[String] {
        &self.failing_modules[..self.failing_modules.len().min(MODULES_LIMIT)]
    }

    pub fn more_failing_modules_count(&self) -> usize {
        self.failing_modules.len().saturating_sub(MODULES_LIMIT)
    }

    pub fn first_skipped_modules(&self) -> &[String] {
        &self.skipped_modules[..self.skipped_modules.len().min(MODULES_LIMIT)]
    }

    pub fn more_skipped_modules_count(&self) -> usize {
        self.skipped_modules.len().saturating_sub(MODULES_LIMIT)
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowReport {
    pub workflow_name: String,
    pub sha: String,
    pub jobs: Vec<WorkflowReportJob>,
    /// False when the triggering context lives in a fork of the workflow's
    /// repository.
    pub same_repository: bool,
    pub conclusion: Option<Conclusion>,
    pub workflow_run_url: String,
}

impl WorkflowReport {
    pub fn has_jobs_failing(&self) -> bool { self.jobs.iter().any(|j| j.is_failing()) }

    pub fn has_reported_failures(&self) -> bool {
        self.jobs.iter().any(|j| j.has_reported_failures())
    }

    pub fn has_test_failures(&self) -> bool { self.jobs.iter().any(|j| j.has_test_failures()) }

    pub fn has_flaky_tests(&self) -> bool { self.jobs.iter().any(|j| j.has_flaky_tests()) }

    pub fn has_error_downloading_build_reports(&self) -> bool {
        self.jobs.iter().any(|j| j.error_downloading_build_reports)
    }

    /// Cancelled outright, or no job ever got past cancelled/skipped/neutral.
    pub fn is_cancelled(&self) -> bool {
        if self.conclusion == Some(Conclusion::Cancelled) {
            return true;
        }
        self.jobs.iter().all(|j| {
            matches!(
                j.conclusion,
                Some(Conclusion::Cancelled) | Some(Conclusion::Skipped) | Some(Conclusion::Neutral)
            )
        })
    }

    pub fn is_failure(&self) -> bool {
        self.conclusion == Some(Conclusion::Failure) || self.has_jobs_failing()
    }
}
