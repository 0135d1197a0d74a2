//! Classification of paths discovered in an extracted job artifact: the
//! build status file, the build scan URL marker, and per-module test result
//! directories in the three layouts we understand.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use crate::{BUILD_REPORT_PATH, GRADLE_BUILD_SCAN_URL_PATH};

/// Display name for the module living at the checkout root.
pub const ROOT_MODULE: &str = "Root module";

/// The recognized test result directory layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TestResultsKind {
    /// Maven Surefire: `<module>/target/surefire-reports*`
    Surefire,
    /// Maven Failsafe: `<module>/target/failsafe-reports*`
    Failsafe,
    /// Gradle: `<module>/build/test-results/test`
    Gradle,
}

impl TestResultsKind {
    /// Trailing path segments between the module directory and the result
    /// directory. Gradle nests one level deeper than the Maven layouts.
    pub const fn strip_depth(self) -> usize {
        match self {
            TestResultsKind::Surefire | TestResultsKind::Failsafe => 2,
            TestResultsKind::Gradle => 3,
        }
    }
}

/// A classified test result directory. Ordered by path so processing order
/// is deterministic regardless of discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResultsPath {
    pub kind: TestResultsKind,
    pub path: PathBuf,
}

impl TestResultsPath {
    /// Module directory owning these results, relative to the job directory.
    /// `None` when the results sit at the job directory root (root module).
    pub fn module_name(&self, job_directory: &Path) -> Option<String> {
        let relative = self.path.strip_prefix(job_directory).ok()?;
        let components: Vec<_> = relative.components().collect();
        let strip = self.kind.strip_depth();
        if components.len() <= strip {
            return None;
        }
        let module: PathBuf = components[..components.len() - strip].iter().collect();
        Some(module.to_string_lossy().into_owned())
    }
}

impl Ord for TestResultsPath {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.path.cmp(&other.path).then_with(|| self.kind.cmp(&other.kind))
    }
}

impl PartialOrd for TestResultsPath {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> { Some(self.cmp(other)) }
}

/// Canonical module name: blank base directories collapse to the root module
/// sentinel and separators are normalized so Windows-built artifacts match.
pub fn normalize_module_name(name: Option<&str>) -> String {
    match name {
        Some(name) if !name.trim().is_empty() => name.replace('\\', "/"),
        _ => ROOT_MODULE.to_string(),
    }
}

/// One job's classified artifact contents. Immutable once built.
#[derive(Debug)]
pub struct BuildReports {
    pub job_directory: PathBuf,
    pub build_report_path: Option<PathBuf>,
    pub gradle_build_scan_url_path: Option<PathBuf>,
    pub test_results_paths: BTreeSet<TestResultsPath>,
}

/// Accumulator fed with every path materialized during extraction. One
/// instance per job, used single-threaded.
#[derive(Debug)]
pub struct BuildReportsBuilder {
    job_directory: PathBuf,
    build_report_path: Option<PathBuf>,
    gradle_build_scan_url_path: Option<PathBuf>,
    test_results_paths: BTreeSet<TestResultsPath>,
    already_classified: BTreeSet<PathBuf>,
}

impl BuildReportsBuilder {
    pub fn new(job_directory: PathBuf) -> Self {
        Self {
            job_directory,
            build_report_path: None,
            gradle_build_scan_url_path: None,
            test_results_paths: BTreeSet::new(),
            already_classified: BTreeSet::new(),
        }
    }

    pub fn add_path(&mut self, path: &Path) {
        if path.ends_with(BUILD_REPORT_PATH) {
            self.build_report_path = Some(path.to_path_buf());
            return;
        }
        if path.ends_with(GRADLE_BUILD_SCAN_URL_PATH) {
            self.gradle_build_scan_url_path = Some(path.to_path_buf());
            return;
        }

        // Archives built with upload-artifact contain directory entries, so
        // the path itself may be a result directory.
        if self.try_add_test_path(path) {
            return;
        }

        // Archives built with the zip command only contain file leaves; the
        // result directory is then the parent. Result files are flat within
        // it, there is no nesting to worry about.
        if let Some(parent) = path.parent() {
            self.try_add_test_path(parent);
        }
    }

    fn try_add_test_path(&mut self, path: &Path) -> bool {
        if self.already_classified.contains(path) {
            return true;
        }
        if !path.is_dir() {
            return false;
        }
        let Some(kind) = classify_dir(path) else {
            return false;
        };
        self.already_classified.insert(path.to_path_buf());
        self.test_results_paths.insert(TestResultsPath { kind, path: path.to_path_buf() });
        true
    }

    pub fn build(self) -> BuildReports {
        BuildReports {
            job_directory: self.job_directory,
            build_report_path: self.build_report_path,
            gradle_build_scan_url_path: self.gradle_build_scan_url_path,
            test_results_paths: self.test_results_paths,
        }
    }
}

fn classify_dir(path: &Path) -> Option<TestResultsKind> {
    let file_name = path.file_name()?.to_str()?;
    let parent_name = path.parent().and_then(|p| p.file_name()).and_then(|n| n.to_str());
    if parent_name == Some("target") {
        if file_name.starts_with("surefire-reports") {
            return Some(TestResultsKind::Surefire);
        }
        if file_name.starts_with("failsafe-reports") {
            return Some(TestResultsKind::Failsafe);
        }
    }
    if path.ends_with("build/test-results/test") {
        return Some(TestResultsKind::Gradle);
    }
    None
}
