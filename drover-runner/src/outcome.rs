// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outcomes: the named verdicts an action produces while it runs.
//!
//! A single action usually produces one outcome, but an action that is itself
//! a suite produces one outcome per method, named `action#method`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The result carried by an [`Outcome`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionResult {
    /// The action completed and its monitor stream ended cleanly.
    Success,
    /// Reported by the action itself, or inferred from a non-zero exit with
    /// captured output.
    ExecFailed,
    /// The kill timer fired before the action finished.
    ExecTimeout,
    /// Building or installing the action failed.
    CompileFailed,
    /// The action is not supported by the expectations file or runner spec.
    Unsupported,
    /// A driver-level or monitor-connection failure.
    Error,
}

impl ActionResult {
    /// Returns true if this result represents a successful run.
    pub fn is_success(self) -> bool {
        self == ActionResult::Success
    }

    /// Returns a static string representation, suitable for reports.
    pub fn as_static_str(self) -> &'static str {
        match self {
            ActionResult::Success => "SUCCESS",
            ActionResult::ExecFailed => "EXEC_FAILED",
            ActionResult::ExecTimeout => "EXEC_TIMEOUT",
            ActionResult::CompileFailed => "COMPILE_FAILED",
            ActionResult::Unsupported => "UNSUPPORTED",
            ActionResult::Error => "ERROR",
        }
    }
}

impl fmt::Display for ActionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_static_str())
    }
}

/// A single named verdict, with the output captured alongside it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    name: String,
    result: ActionResult,
    #[serde(default)]
    output_lines: Vec<String>,
    #[serde(default = "default_true")]
    matters: bool,
}

fn default_true() -> bool {
    true
}

impl Outcome {
    /// Creates an outcome carrying the given output lines.
    pub fn new(
        name: impl Into<String>,
        result: ActionResult,
        output_lines: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            result,
            output_lines,
            matters: true,
        }
    }

    /// Creates an outcome whose output is a single message line.
    pub fn with_message(
        name: impl Into<String>,
        result: ActionResult,
        message: impl Into<String>,
    ) -> Self {
        Self::new(name, result, vec![message.into()])
    }

    /// Creates an informational outcome that is never counted against
    /// expectations.
    pub fn informational(
        name: impl Into<String>,
        result: ActionResult,
        output_lines: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            result,
            output_lines,
            matters: false,
        }
    }

    /// The hierarchical outcome name (`action` or `action#method`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The suite this outcome belongs to: the name up to the first `#`.
    pub fn suite_name(&self) -> &str {
        match self.name.split_once('#') {
            Some((suite, _)) => suite,
            None => &self.name,
        }
    }

    /// The result recorded for this outcome.
    pub fn result(&self) -> ActionResult {
        self.result
    }

    /// The output captured for this outcome, in delivery order.
    pub fn output_lines(&self) -> &[String] {
        &self.output_lines
    }

    /// False for purely informational outcomes, which are skipped rather than
    /// evaluated.
    pub fn matters(&self) -> bool {
        self.matters
    }
}

/// The classification of an outcome against its expectation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Verdict {
    /// The outcome matched its expectation.
    Ok,
    /// The outcome did not match its expectation.
    Fail,
    /// The outcome was informational and is not counted.
    Ignore,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Ok => "OK",
            Verdict::Fail => "FAIL",
            Verdict::Ignore => "SKIP",
        };
        f.write_str(s)
    }
}
