// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! JUnit-style XML reports, one file per suite.

use crate::{
    errors::ReportError,
    outcome::{ActionResult, Outcome},
};
use camino::Utf8PathBuf;
use indexmap::IndexMap;
use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus, TestSuite};
use std::fs;

/// Emits final reports for a run's outcomes.
pub trait ReportPrinter: Send + Sync {
    /// Writes reports for the given outcomes, returning the number of files
    /// written.
    fn generate_reports(&self, outcomes: &[Outcome]) -> Result<usize, ReportError>;
}

/// A [`ReportPrinter`] that writes one JUnit XML file per suite.
#[derive(Clone, Debug)]
pub struct JunitReportPrinter {
    output_dir: Utf8PathBuf,
}

impl JunitReportPrinter {
    /// Creates a printer writing into `output_dir`. The directory is created
    /// on demand.
    pub fn new(output_dir: Utf8PathBuf) -> Self {
        Self { output_dir }
    }

    fn test_case(outcome: &Outcome) -> TestCase {
        let status = match outcome.result() {
            ActionResult::Success => TestCaseStatus::success(),
            ActionResult::Unsupported => TestCaseStatus::skipped(),
            ActionResult::ExecFailed | ActionResult::CompileFailed => {
                let mut status = TestCaseStatus::non_success(NonSuccessKind::Failure);
                status.set_type(outcome.result().as_static_str());
                status
            }
            ActionResult::ExecTimeout | ActionResult::Error => {
                let mut status = TestCaseStatus::non_success(NonSuccessKind::Error);
                status.set_type(outcome.result().as_static_str());
                status
            }
        };

        let case_name = match outcome.name().split_once('#') {
            Some((_, method)) => method,
            None => outcome.name(),
        };
        let mut test_case = TestCase::new(case_name, status);
        test_case.set_classname(outcome.suite_name());
        if !outcome.output_lines().is_empty() {
            test_case.set_system_out(outcome.output_lines().join("\n"));
        }
        test_case
    }
}

impl ReportPrinter for JunitReportPrinter {
    fn generate_reports(&self, outcomes: &[Outcome]) -> Result<usize, ReportError> {
        let mut suites: IndexMap<String, Vec<&Outcome>> = IndexMap::new();
        for outcome in outcomes {
            suites
                .entry(outcome.suite_name().to_owned())
                .or_default()
                .push(outcome);
        }

        fs::create_dir_all(&self.output_dir).map_err(|error| ReportError::Write {
            path: self.output_dir.clone(),
            error,
        })?;

        let mut files_written = 0;
        for (suite_name, suite_outcomes) in suites {
            let mut suite = TestSuite::new(suite_name.clone());
            for outcome in suite_outcomes {
                suite.add_test_case(Self::test_case(outcome));
            }

            let mut report = Report::new(suite_name.clone());
            report.add_test_suite(suite);
            let xml = report.to_string().map_err(|error| ReportError::Serialize {
                suite: suite_name.clone(),
                error,
            })?;

            let path = self.output_dir.join(format!("TEST-{suite_name}.xml"));
            fs::write(&path, xml).map_err(|error| ReportError::Write { path, error })?;
            files_written += 1;
        }
        Ok(files_written)
    }
}
