//! Aggregation of one workflow run: merges the build status data and the
//! classified test result directories of every job into a single
//! [`WorkflowReport`].

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::Path,
};

use crate::{
    build_status::{BuildReport, BuildStatus, ProjectReport},
    classify::{normalize_module_name, BuildReports, TestResultsPath, ROOT_MODULE},
    junit,
    model::{
        Conclusion, Flake, WorkflowReport, WorkflowReportFlakyTestCase, WorkflowReportJob,
        WorkflowReportModule, WorkflowReportTestCase,
    },
    stack_trace,
};

const ABBREVIATION_CHAR_BUDGET: usize = 1000;
const FAILURE_FRAME_BUDGET: usize = 8;
const FLAKE_MESSAGE_FRAME_BUDGET: usize = 5;
const BUILD_ERROR_LINES: usize = 5;

/// Run-level facts needed to build the report.
#[derive(Debug, Clone)]
pub struct WorkflowRunInfo {
    pub workflow_name: String,
    /// Full name (`owner/repo`) of the repository the run executed in.
    pub repository: String,
    /// HTML URL of that repository, used for raw log links.
    pub repository_url: String,
    pub sha: String,
    pub conclusion: Option<Conclusion>,
    pub run_url: String,
}

#[derive(Debug, Clone)]
pub struct WorkflowJobInfo {
    pub id: u64,
    pub name: String,
    pub conclusion: Option<Conclusion>,
    pub url: Option<String>,
    pub steps: Vec<WorkflowStepInfo>,
}

#[derive(Debug, Clone)]
pub struct WorkflowStepInfo {
    pub name: String,
    pub conclusion: Option<Conclusion>,
}

pub struct Analyzer<'a> {
    /// Full name of the repository the triggering context (PR, issue) lives
    /// in; differs from the run's repository for forks.
    pub context_repository: &'a str,
    /// Flaky tests (full name or class name) to leave out of reports.
    pub ignored_flaky_tests: &'a HashSet<String>,
    /// Conclusions that get full artifact analysis; anything else becomes a
    /// placeholder job.
    pub processed_conclusions: &'a [String],
}

impl Analyzer<'_> {
    /// Build the workflow report. Jobs are processed in the given order,
    /// which the caller has already sorted. Yields `None` when there is
    /// nothing to report on.
    pub fn analyze(
        &self,
        run: &WorkflowRunInfo,
        jobs: &[WorkflowJobInfo],
        build_reports: &HashMap<String, Option<BuildReports>>,
    ) -> Option<WorkflowReport> {
        if jobs.is_empty() {
            tracing::error!("Workflow run {} - no jobs found", run.run_url);
            return None;
        }

        let mut report_jobs = Vec::with_capacity(jobs.len());
        for job in jobs {
            if !self.is_processed(job.conclusion.as_ref()) {
                report_jobs.push(placeholder_job(job));
                continue;
            }

            let mut gradle_build_scan_url = None;
            let mut build_report = BuildReport::default();
            let mut modules = Vec::new();
            let mut error_downloading_build_reports = false;
            match build_reports.get(&job.name) {
                Some(Some(reports)) => {
                    if let Some(path) = &reports.build_report_path {
                        build_report = BuildReport::read_or_empty(path);
                    }
                    if let Some(path) = &reports.gradle_build_scan_url_path {
                        match std::fs::read_to_string(path) {
                            Ok(url) => gradle_build_scan_url = Some(url.trim().to_string()),
                            Err(e) => {
                                tracing::warn!("Unable to read Gradle build scan URL: {}", e)
                            }
                        }
                    }
                    modules = self.modules(
                        run,
                        &build_report,
                        &reports.job_directory,
                        &reports.test_results_paths,
                    );
                }
                Some(None) => {
                    error_downloading_build_reports = true;
                    tracing::error!(
                        "Workflow run {} - unable to analyze build reports for job {}",
                        run.run_url,
                        job.name
                    );
                }
                // no artifact was expected for this job
                None => {}
            }

            report_jobs.push(WorkflowReportJob {
                name: job.name.clone(),
                label: job.name.clone(),
                failures_anchor: Some(format!("test-failures-job-{}", job.id)),
                conclusion: job.conclusion.clone(),
                placeholder: false,
                failing_step: failing_step(&job.steps),
                url: job.url.clone(),
                raw_logs_url: Some(format!(
                    "{}/commit/{}/checks/{}/logs",
                    run.repository_url, run.sha, job.id
                )),
                gradle_build_scan_url,
                failing_modules: modules_with_status(&build_report, BuildStatus::Failure),
                skipped_modules: modules_with_status(&build_report, BuildStatus::Skipped),
                modules,
                error_downloading_build_reports,
            });
        }

        if report_jobs.is_empty() {
            tracing::warn!("Workflow run {} - report jobs empty", run.run_url);
            return None;
        }

        Some(WorkflowReport {
            workflow_name: run.workflow_name.clone(),
            sha: run.sha.clone(),
            jobs: report_jobs,
            same_repository: run.repository == self.context_repository,
            conclusion: run.conclusion.clone(),
            workflow_run_url: run.run_url.clone(),
        })
    }

    fn is_processed(&self, conclusion: Option<&Conclusion>) -> bool {
        conclusion
            .is_some_and(|c| self.processed_conclusions.iter().any(|p| p == c.as_str()))
    }

    /// Merge build status entries and test result paths into per-module
    /// reports. The module set is the union of both sources; modules without
    /// anything to report are dropped.
    fn modules(
        &self,
        run: &WorkflowRunInfo,
        build_report: &BuildReport,
        job_directory: &Path,
        test_results_paths: &std::collections::BTreeSet<TestResultsPath>,
    ) -> Vec<WorkflowReportModule> {
        let mut by_module: BTreeMap<String, (Option<&ProjectReport>, Vec<&TestResultsPath>)> =
            BTreeMap::new();
        for project_report in &build_report.project_reports {
            let name = normalize_module_name(project_report.basedir.as_deref());
            by_module.entry(name).or_default().0.get_or_insert(project_report);
        }
        for path in test_results_paths {
            let name = normalize_module_name(path.module_name(job_directory).as_deref());
            by_module.entry(name).or_default().1.push(path);
        }

        let mut modules = Vec::new();
        for (module_name, (project_report, paths)) in by_module {
            let mut suites = Vec::new();
            for path in paths {
                match junit::parse_test_results_dir(&path.path) {
                    Ok(parsed) => suites.extend(parsed),
                    Err(e) => {
                        tracing::error!(
                            "Unable to parse test results under {}: {:?}",
                            path.path.display(),
                            e
                        );
                    }
                }
            }

            let mut test_failures = Vec::new();
            let mut flaky_tests = Vec::new();
            for case in suites.iter().flat_map(|s| &s.test_cases) {
                if case.is_definite_failure() {
                    let class_path = class_file_path(&module_name, &case.full_class_name);
                    test_failures.push(WorkflowReportTestCase {
                        failure_url: failure_url(run, &class_path, case),
                        class_path,
                        full_name: case.full_name(),
                        full_class_name: case.full_class_name.clone(),
                        name: case.name.clone(),
                        failure_type: case.failure_type.clone(),
                        failure_error_line: case.failure_error_line.clone(),
                        abbreviated_failure_detail: stack_trace::shorten(
                            case.failure_detail.as_deref(),
                            ABBREVIATION_CHAR_BUDGET,
                            FAILURE_FRAME_BUDGET,
                        ),
                        failure_detail: case.failure_detail.clone(),
                    });
                }
                // a case with rerun history only counts as flaky when it
                // neither failed outright nor was skipped
                if case.has_flakes()
                    && !case.is_definite_failure()
                    && case.outcome != junit::TestOutcome::Skipped
                    && !self.ignored_flaky_tests.contains(&case.full_name())
                    && !self.ignored_flaky_tests.contains(&case.full_class_name)
                {
                    flaky_tests.push(WorkflowReportFlakyTestCase {
                        class_path: class_file_path(&module_name, &case.full_class_name),
                        full_name: case.full_name(),
                        full_class_name: case.full_class_name.clone(),
                        flakes: case
                            .flakes
                            .iter()
                            .map(|flake| Flake {
                                message: stack_trace::shorten(
                                    flake.message.as_deref(),
                                    ABBREVIATION_CHAR_BUDGET,
                                    FLAKE_MESSAGE_FRAME_BUDGET,
                                ),
                                failure_type: flake.ty.clone(),
                                stack_trace: flake.stack_trace.clone(),
                                abbreviated_stack_trace: stack_trace::shorten(
                                    flake.stack_trace.as_deref(),
                                    ABBREVIATION_CHAR_BUDGET,
                                    FAILURE_FRAME_BUDGET,
                                ),
                            })
                            .collect(),
                    });
                }
            }
            test_failures.sort();
            flaky_tests.sort();

            let module = WorkflowReportModule {
                build_status: project_report.map(|pr| pr.status),
                build_report_error: project_report
                    .and_then(|pr| first_lines(pr.error.as_deref(), BUILD_ERROR_LINES)),
                test_count: suites.iter().map(|s| s.test_count()).sum(),
                success_count: suites.iter().map(|s| s.success_count()).sum(),
                failure_count: suites.iter().map(|s| s.failure_count()).sum(),
                error_count: suites.iter().map(|s| s.error_count()).sum(),
                skipped_count: suites.iter().map(|s| s.skipped_count()).sum(),
                test_failures,
                flaky_tests,
                name: module_name,
            };

            if module.has_reported_failures() || module.has_flaky_tests() {
                modules.push(module);
            }
        }
        modules
    }
}

fn placeholder_job(job: &WorkflowJobInfo) -> WorkflowReportJob {
    WorkflowReportJob {
        name: job.name.clone(),
        label: job.name.clone(),
        failures_anchor: None,
        conclusion: job.conclusion.clone(),
        placeholder: true,
        failing_step: None,
        url: None,
        raw_logs_url: None,
        gradle_build_scan_url: None,
        failing_modules: Vec::new(),
        skipped_modules: Vec::new(),
        modules: Vec::new(),
        error_downloading_build_reports: false,
    }
}

fn failing_step(steps: &[WorkflowStepInfo]) -> Option<String> {
    steps
        .iter()
        .find(|step| {
            !matches!(
                step.conclusion,
                Some(Conclusion::Success) | Some(Conclusion::Skipped) | Some(Conclusion::Neutral)
            )
        })
        .map(|step| step.name.clone())
}

fn modules_with_status(build_report: &BuildReport, status: BuildStatus) -> Vec<String> {
    let mut names: Vec<String> = build_report
        .project_reports
        .iter()
        .filter(|pr| pr.status == status)
        .map(|pr| normalize_module_name(pr.basedir.as_deref()))
        .collect();
    names.sort();
    names
}

/// Conventional source path of a test class: module base directory plus the
/// Maven test source root, with any nested class suffix stripped.
fn class_file_path(module_name: &str, full_class_name: &str) -> String {
    let mut class_path = full_class_name.replace('.', "/");
    if let Some(dollar) = class_path.find('$') {
        class_path.truncate(dollar);
    }
    if module_name == ROOT_MODULE {
        format!("src/test/java/{class_path}.java")
    } else {
        format!("{module_name}/src/test/java/{class_path}.java")
    }
}

fn failure_url(run: &WorkflowRunInfo, class_path: &str, case: &junit::TestCase) -> String {
    let mut url =
        format!("https://github.com/{}/blob/{}/{}", run.repository, run.sha, class_path);
    if let Some(line) = case.failure_error_line.as_deref().filter(|l| !l.trim().is_empty()) {
        url.push_str("#L");
        url.push_str(line);
    }
    url
}

fn first_lines(text: Option<&str>, count: usize) -> Option<String> {
    let text = text?.trim();
    if text.is_empty() {
        return None;
    }
    Some(text.lines().take(count).collect::<Vec<_>>().join("\n"))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use crate::classify::BuildReportsBuilder;

    use super::*;

    const FAILING_SUITE: &str = r#"<testsuite name="org.acme.FooTest">
  <testcase name="breaks" classname="org.acme.FooTest">
    <failure message="boom" type="java.lang.AssertionError">java.lang.AssertionError: boom
	at org.acme.FooTest.breaks(FooTest.java:42)</failure>
  </testcase>
</testsuite>"#;

    const PASSING_SUITE: &str = r#"<testsuite name="org.acme.OkTest">
  <testcase name="works" classname="org.acme.OkTest"/>
</testsuite>"#;

    fn run_info() -> WorkflowRunInfo {
        WorkflowRunInfo {
            workflow_name: "CI".to_string(),
            repository: "acme/widgets".to_string(),
            repository_url: "https://github.com/acme/widgets".to_string(),
            sha: "deadbeef".to_string(),
            conclusion: Some(Conclusion::Failure),
            run_url: "https://github.com/acme/widgets/actions/runs/1".to_string(),
        }
    }

    fn job_info(id: u64, name: &str, conclusion: Option<&str>) -> WorkflowJobInfo {
        WorkflowJobInfo {
            id,
            name: name.to_string(),
            conclusion: conclusion.map(|c| c.parse().unwrap()),
            url: Some(format!("https://github.com/acme/widgets/runs/{id}")),
            steps: Vec::new(),
        }
    }

    fn analyzer<'a>(
        ignored: &'a HashSet<String>,
        processed: &'a [String],
    ) -> Analyzer<'a> {
        Analyzer {
            context_repository: "acme/widgets",
            ignored_flaky_tests: ignored,
            processed_conclusions: processed,
        }
    }

    fn processed_conclusions() -> Vec<String> {
        vec!["success".to_string(), "failure".to_string(), "cancelled".to_string()]
    }

    fn bundle_with_suites(suites: &[(&str, &str)]) -> (tempfile::TempDir, BuildReports) {
        let tmp = tempfile::tempdir().unwrap();
        let mut builder = BuildReportsBuilder::new(tmp.path().to_path_buf());
        for (dir, xml) in suites {
            let results = tmp.path().join(dir);
            std::fs::create_dir_all(&results).unwrap();
            let file = results.join("TEST-suite.xml");
            std::fs::write(&file, xml).unwrap();
            builder.add_path(&file);
        }
        (tmp, builder.build())
    }

    #[test]
    fn failing_surefire_module_is_reported() {
        let (_tmp, bundle) =
            bundle_with_suites(&[("m/target/surefire-reports", FAILING_SUITE)]);
        let ignored = HashSet::new();
        let processed = processed_conclusions();
        let mut build_reports = HashMap::new();
        build_reports.insert("build".to_string(), Some(bundle));

        let report = analyzer(&ignored, &processed)
            .analyze(&run_info(), &[job_info(7, "build", Some("failure"))], &build_reports)
            .unwrap();

        assert!(report.has_test_failures());
        let job = &report.jobs[0];
        assert!(job.has_test_failures());
        assert_eq!(job.modules.len(), 1);
        let module = &job.modules[0];
        assert_eq!(module.name, "m");
        assert_eq!(module.failure_count, 1);
        let failure = &module.test_failures[0];
        assert_eq!(failure.failure_error_line.as_deref(), Some("42"));
        assert_eq!(failure.class_path, "m/src/test/java/org/acme/FooTest.java");
        assert!(failure.failure_url.ends_with("#L42"));
    }

    #[test]
    fn download_error_marks_job_without_failures() {
        let ignored = HashSet::new();
        let processed = processed_conclusions();
        let mut build_reports = HashMap::new();
        build_reports.insert("build".to_string(), None);

        let report = analyzer(&ignored, &processed)
            .analyze(&run_info(), &[job_info(7, "build", Some("success"))], &build_reports)
            .unwrap();

        let job = &report.jobs[0];
        assert!(job.error_downloading_build_reports);
        assert!(job.modules.is_empty());
        assert!(!job.has_reported_failures());
        assert!(!report.has_reported_failures());
    }

    #[test]
    fn queued_job_becomes_placeholder_in_order() {
        let ignored = HashSet::new();
        let processed = processed_conclusions();
        let build_reports = HashMap::new();

        let report = analyzer(&ignored, &processed)
            .analyze(
                &run_info(),
                &[job_info(1, "a-queued", None), job_info(2, "b-built", Some("success"))],
                &build_reports,
            )
            .unwrap();

        assert_eq!(report.jobs.len(), 2);
        assert!(report.jobs[0].placeholder);
        assert_eq!(report.jobs[0].name, "a-queued");
        assert!(!report.jobs[0].is_failing());
        assert!(!report.jobs[1].placeholder);
    }

    #[test]
    fn clean_modules_are_dropped() {
        let (_tmp, bundle) =
            bundle_with_suites(&[("clean/target/surefire-reports", PASSING_SUITE)]);
        let ignored = HashSet::new();
        let processed = processed_conclusions();
        let mut build_reports = HashMap::new();
        build_reports.insert("build".to_string(), Some(bundle));

        let report = analyzer(&ignored, &processed)
            .analyze(&run_info(), &[job_info(7, "build", Some("success"))], &build_reports)
            .unwrap();

        assert!(report.jobs[0].modules.is_empty());
    }

    #[test]
    fn build_status_failure_retains_module_without_tests() {
        let tmp = tempfile::tempdir().unwrap();
        let status_path = tmp.path().join("build-report.json");
        std::fs::write(
            &status_path,
            r#"{"projectReports":[
                {"status":"FAILURE","basedir":"broken","error":"e1\ne2\ne3\ne4\ne5\ne6\ne7"},
                {"status":"SUCCESS","basedir":"fine"}
            ]}"#,
        )
        .unwrap();
        let bundle = BuildReports {
            job_directory: tmp.path().to_path_buf(),
            build_report_path: Some(status_path),
            gradle_build_scan_url_path: None,
            test_results_paths: BTreeSet::new(),
        };
        let ignored = HashSet::new();
        let processed = processed_conclusions();
        let mut build_reports = HashMap::new();
        build_reports.insert("build".to_string(), Some(bundle));

        let report = analyzer(&ignored, &processed)
            .analyze(&run_info(), &[job_info(7, "build", Some("failure"))], &build_reports)
            .unwrap();

        let job = &report.jobs[0];
        assert_eq!(job.failing_modules, vec!["broken".to_string()]);
        assert_eq!(job.modules.len(), 1);
        let module = &job.modules[0];
        assert!(module.has_build_report_failures());
        // error text truncated to its first lines
        assert_eq!(module.build_report_error.as_deref(), Some("e1\ne2\ne3\ne4\ne5"));
    }

    #[test]
    fn ignored_flaky_tests_are_filtered() {
        let flaky_suite = r#"<testsuite name="org.acme.FlakyTest">
  <testcase name="wobbles" classname="org.acme.FlakyTest">
    <flakyFailure message="timeout" type="java.util.concurrent.TimeoutException">
      <stackTrace>boom</stackTrace>
    </flakyFailure>
  </testcase>
</testsuite>"#;
        let (_tmp, bundle) =
            bundle_with_suites(&[("m/target/surefire-reports", flaky_suite)]);
        let ignored: HashSet<String> =
            ["org.acme.FlakyTest.wobbles".to_string()].into_iter().collect();
        let processed = processed_conclusions();
        let mut build_reports = HashMap::new();
        build_reports.insert("build".to_string(), Some(bundle));

        let report = analyzer(&ignored, &processed)
            .analyze(&run_info(), &[job_info(7, "build", Some("success"))], &build_reports)
            .unwrap();

        // the only flaky test is ignored, so the module has nothing to report
        assert!(report.jobs[0].modules.is_empty());
        assert!(!report.has_flaky_tests());
    }
}
