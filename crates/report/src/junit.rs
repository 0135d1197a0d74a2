//! JUnit/Surefire XML test result parsing.
//!
//! Both Maven plugins and Gradle write one XML file per test suite. Surefire
//! additionally records rerun history: `flakyFailure`/`flakyError` entries
//! are failed attempts that were ultimately superseded by a pass within the
//! same run.

use std::path::Path;

use anyhow::{bail, Context, Result};
use quick_xml::events::Event;
use regex::Regex;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Skipped,
    Failure,
    Error,
}

/// A failed attempt that was superseded by a pass.
#[derive(Debug, Clone)]
pub struct FlakeAttempt {
    pub message: Option<String>,
    pub ty: Option<String>,
    pub stack_trace: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    pub full_class_name: String,
    pub outcome: TestOutcome,
    pub failure_message: Option<String>,
    pub failure_type: Option<String>,
    pub failure_detail: Option<String>,
    /// Line in the test source the failure points at, extracted from the
    /// stack trace. Kept as text: not every trace yields a number.
    pub failure_error_line: Option<String>,
    pub flakes: Vec<FlakeAttempt>,
}

impl TestCase {
    pub fn full_name(&self) -> String { format!("{}.{}", self.full_class_name, self.name) }

    pub fn is_definite_failure(&self) -> bool {
        matches!(self.outcome, TestOutcome::Failure | TestOutcome::Error)
    }

    pub fn has_flakes(&self) -> bool { !self.flakes.is_empty() }
}

#[derive(Debug, Clone)]
pub struct TestSuite {
    pub name: String,
    pub test_cases: Vec<TestCase>,
}

impl TestSuite {
    pub fn test_count(&self) -> usize { self.test_cases.len() }

    pub fn success_count(&self) -> usize {
        self.test_cases.iter().filter(|c| c.outcome == TestOutcome::Passed).count()
    }

    pub fn failure_count(&self) -> usize {
        self.test_cases.iter().filter(|c| c.outcome == TestOutcome::Failure).count()
    }

    pub fn error_count(&self) -> usize {
        self.test_cases.iter().filter(|c| c.outcome == TestOutcome::Error).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.test_cases.iter().filter(|c| c.outcome == TestOutcome::Skipped).count()
    }
}

/// Parse every `.xml` file in a classified test results directory, in path
/// order. A file that fails to parse is logged and skipped; the suites that
/// could be salvaged are still returned.
pub fn parse_test_results_dir(dir: &Path) -> Result<Vec<TestSuite>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read test results directory {}", dir.display()))?
    {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "xml") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut suites = Vec::new();
    for path in paths {
        match parse_file(&path) {
            Ok(parsed) => suites.extend(parsed),
            Err(e) => {
                tracing::error!("Unable to parse test results file {}: {:?}", path.display(), e);
            }
        }
    }
    Ok(suites)
}

pub fn parse_file(path: &Path) -> Result<Vec<TestSuite>> {
    let contents = std::fs::read_to_string(path)?;
    parse_str(&contents)
}

pub fn parse_str(xml: &str) -> Result<Vec<TestSuite>> {
    match root_element_name(xml)?.as_str() {
        "testsuite" => {
            let suite: XmlTestSuite = quick_xml::de::from_str(xml)?;
            Ok(vec![convert_suite(suite)])
        }
        "testsuites" => {
            let suites: XmlTestSuites = quick_xml::de::from_str(xml)?;
            Ok(suites.test_suites.into_iter().map(convert_suite).collect())
        }
        other => bail!("Unexpected root element <{other}>"),
    }
}

fn root_element_name(xml: &str) -> Result<String> {
    let mut reader = quick_xml::Reader::from_str(xml);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => {
                return Ok(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Event::Eof => bail!("No root element found"),
            _ => {}
        }
    }
}

#[derive(Debug, Deserialize)]
struct XmlTestSuites {
    #[serde(rename = "testsuite", default)]
    test_suites: Vec<XmlTestSuite>,
}

#[derive(Debug, Deserialize)]
struct XmlTestSuite {
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "testcase", default)]
    test_cases: Vec<XmlTestCase>,
}

#[derive(Debug, Deserialize)]
struct XmlTestCase {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@classname", default)]
    classname: Option<String>,
    #[serde(default)]
    failure: Vec<XmlProblem>,
    #[serde(default)]
    error: Vec<XmlProblem>,
    #[serde(default)]
    skipped: Option<XmlSkipped>,
    #[serde(rename = "flakyFailure", default)]
    flaky_failures: Vec<XmlRerun>,
    #[serde(rename = "flakyError", default)]
    flaky_errors: Vec<XmlRerun>,
    #[serde(rename = "rerunFailure", default)]
    rerun_failures: Vec<XmlRerun>,
    #[serde(rename = "rerunError", default)]
    rerun_errors: Vec<XmlRerun>,
}

#[derive(Debug, Deserialize)]
struct XmlProblem {
    #[serde(rename = "@message", default)]
    message: Option<String>,
    #[serde(rename = "@type", default)]
    ty: Option<String>,
    #[serde(rename = "$text", default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct XmlSkipped {
    #[serde(rename = "@message", default)]
    _message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct XmlRerun {
    #[serde(rename = "@message", default)]
    message: Option<String>,
    #[serde(rename = "@type", default)]
    ty: Option<String>,
    #[serde(rename = "stackTrace", default)]
    stack_trace: Option<String>,
}

fn convert_suite(suite: XmlTestSuite) -> TestSuite {
    let suite_name = suite.name;
    let test_cases = suite
        .test_cases
        .into_iter()
        .map(|case| convert_case(case, &suite_name))
        .collect();
    TestSuite { name: suite_name.clone(), test_cases }
}

fn convert_case(case: XmlTestCase, suite_name: &str) -> TestCase {
    let full_class_name =
        case.classname.filter(|c| !c.is_empty()).unwrap_or_else(|| suite_name.to_string());
    let (outcome, problem) = if let Some(problem) = case.failure.into_iter().next() {
        (TestOutcome::Failure, Some(problem))
    } else if let Some(problem) = case.error.into_iter().next() {
        (TestOutcome::Error, Some(problem))
    } else if case.skipped.is_some() {
        (TestOutcome::Skipped, None)
    } else {
        (TestOutcome::Passed, None)
    };
    let (failure_message, failure_type, failure_detail) = match problem {
        Some(problem) => (problem.message, problem.ty, problem.text),
        None => (None, None, None),
    };
    let failure_error_line = failure_detail
        .as_deref()
        .and_then(|detail| extract_error_line(&full_class_name, detail));
    // Surefire writes flaky* entries when the case eventually passed and
    // rerun* entries when it kept failing; both are attempt history.
    let flakes = case
        .flaky_failures
        .into_iter()
        .chain(case.flaky_errors)
        .chain(case.rerun_failures)
        .chain(case.rerun_errors)
        .map(|rerun| FlakeAttempt {
            message: rerun.message,
            ty: rerun.ty,
            stack_trace: rerun.stack_trace,
        })
        .collect();
    TestCase {
        name: case.name,
        full_class_name,
        outcome,
        failure_message,
        failure_type,
        failure_detail,
        failure_error_line,
        flakes,
    }
}

/// Find the line number of the first stack frame inside the test's own
/// class. Nested classes share the top-level source file.
fn extract_error_line(full_class_name: &str, detail: &str) -> Option<String> {
    let class_name = full_class_name.rsplit('.').next()?;
    let class_name = class_name.split('$').next()?;
    let pattern = format!(r"{}\.java:(\d+)", regex::escape(class_name));
    let regex = Regex::new(&pattern).ok()?;
    regex.captures(detail).map(|caps| caps[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUITE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<testsuite name="org.acme.FooTest" tests="4" failures="1" errors="0" skipped="1">
  <testcase name="works" classname="org.acme.FooTest" time="0.01"/>
  <testcase name="breaks" classname="org.acme.FooTest" time="0.02">
    <failure message="expected 1 but was 2" type="java.lang.AssertionError">java.lang.AssertionError: expected 1 but was 2
	at org.acme.FooTest.breaks(FooTest.java:42)</failure>
  </testcase>
  <testcase name="ignored" classname="org.acme.FooTest">
    <skipped message="disabled"/>
  </testcase>
  <testcase name="unstable" classname="org.acme.FooTest">
    <flakyFailure message="timed out" type="java.util.concurrent.TimeoutException">
      <stackTrace>java.util.concurrent.TimeoutException: timed out
	at org.acme.FooTest.unstable(FooTest.java:55)</stackTrace>
    </flakyFailure>
  </testcase>
</testsuite>"#;

    #[test]
    fn parses_outcomes_and_flakes() {
        let suites = parse_str(SUITE_XML).unwrap();
        assert_eq!(suites.len(), 1);
        let suite = &suites[0];
        assert_eq!(suite.test_count(), 4);
        assert_eq!(suite.success_count(), 2);
        assert_eq!(suite.failure_count(), 1);
        assert_eq!(suite.skipped_count(), 1);

        let failed = &suite.test_cases[1];
        assert!(failed.is_definite_failure());
        assert_eq!(failed.full_name(), "org.acme.FooTest.breaks");
        assert_eq!(failed.failure_type.as_deref(), Some("java.lang.AssertionError"));
        assert_eq!(failed.failure_error_line.as_deref(), Some("42"));

        let flaky = &suite.test_cases[3];
        assert_eq!(flaky.outcome, TestOutcome::Passed);
        assert!(flaky.has_flakes());
        assert_eq!(flaky.flakes[0].message.as_deref(), Some("timed out"));
        assert!(flaky.flakes[0].stack_trace.as_deref().unwrap().contains("FooTest.java:55"));
    }

    #[test]
    fn parses_testsuites_wrapper() {
        let xml = r#"<testsuites>
          <testsuite name="org.acme.ATest">
            <testcase name="a" classname="org.acme.ATest"/>
          </testsuite>
          <testsuite name="org.acme.BTest">
            <testcase name="b" classname="org.acme.BTest"/>
          </testsuite>
        </testsuites>"#;
        let suites = parse_str(xml).unwrap();
        assert_eq!(suites.len(), 2);
        assert_eq!(suites[1].test_cases[0].full_name(), "org.acme.BTest.b");
    }

    #[test]
    fn rerun_history_kept_on_failing_case() {
        let xml = r#"<testsuite name="org.acme.StubbornTest">
          <testcase name="keeps_failing" classname="org.acme.StubbornTest">
            <failure message="final" type="java.lang.AssertionError">final attempt</failure>
            <rerunFailure message="first retry" type="java.lang.AssertionError">
              <stackTrace>retry trace</stackTrace>
            </rerunFailure>
          </testcase>
        </testsuite>"#;
        let suites = parse_str(xml).unwrap();
        let case = &suites[0].test_cases[0];
        assert!(case.is_definite_failure());
        assert!(case.has_flakes());
        assert_eq!(case.flakes[0].message.as_deref(), Some("first retry"));
    }

    #[test]
    fn nested_class_shares_source_file() {
        let line = extract_error_line(
            "org.acme.FooTest$Nested",
            "java.lang.AssertionError\n\tat org.acme.FooTest$Nested.breaks(FooTest.java:17)",
        );
        assert_eq!(line.as_deref(), Some("17"));
    }

    #[test]
    fn missing_line_is_none() {
        let line = extract_error_line("org.acme.FooTest", "some error without a trace");
        assert_eq!(line, None);
    }

    #[test]
    fn bad_directory_entry_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("TEST-good.xml"), SUITE_XML).unwrap();
        std::fs::write(tmp.path().join("TEST-bad.xml"), "<testsuite").unwrap();
        let suites = parse_test_results_dir(tmp.path()).unwrap();
        assert_eq!(suites.len(), 1);
    }
}
