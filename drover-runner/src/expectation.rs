// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Expectations: the pre-declared expected outcome for each action name,
//! loaded from expectation files and queried while outcomes are recorded.

use crate::{
    errors::ExpectationParseError,
    outcome::{ActionResult, Outcome, Verdict},
};
use camino::Utf8Path;
use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use std::{collections::BTreeSet, fs, sync::OnceLock};

/// The tag that selects the large timeout for an action.
pub const LARGE_TAG: &str = "large";

/// The expected outcome for a name, plus tags controlling the timeout class.
#[derive(Clone, Debug)]
pub struct Expectation {
    result: ActionResult,
    pattern: Option<Regex>,
    tags: BTreeSet<String>,
}

impl Expectation {
    /// Creates an expectation for the given result, matching any output.
    pub fn new(result: ActionResult) -> Self {
        Self {
            result,
            pattern: None,
            tags: BTreeSet::new(),
        }
    }

    /// Restricts the expectation to outcomes whose output matches `pattern`.
    pub fn with_pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Adds a tag to this expectation.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// The result this expectation demands.
    pub fn result(&self) -> ActionResult {
        self.result
    }

    /// The tags attached to this expectation.
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Returns true if the `large` tag is present, selecting the large
    /// timeout.
    pub fn is_large(&self) -> bool {
        self.tags.contains(LARGE_TAG)
    }

    /// Compares an outcome against this expectation: the result must be equal
    /// and the output must match the pattern, if one is set.
    pub fn matches(&self, outcome: &Outcome) -> bool {
        if outcome.result() != self.result {
            return false;
        }
        match &self.pattern {
            Some(pattern) => pattern.is_match(&outcome.output_lines().join("\n")),
            None => true,
        }
    }
}

/// The catch-all expectation applied to names with no entry: a clean success.
fn default_expectation() -> &'static Expectation {
    static DEFAULT: OnceLock<Expectation> = OnceLock::new();
    DEFAULT.get_or_init(|| Expectation::new(ActionResult::Success))
}

/// One entry in an expectations file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExpectationEntry {
    name: String,
    result: ActionResult,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

/// A queryable map from action or outcome name to its [`Expectation`].
///
/// Lookup walks the name hierarchy: the exact name first, then the name with
/// any `#method` qualifier removed, then each dotted prefix, and finally the
/// catch-all default.
#[derive(Debug, Default)]
pub struct ExpectationStore {
    by_name: IndexMap<String, Expectation>,
}

impl ExpectationStore {
    /// Creates an empty store; every lookup returns the default expectation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses expectation files, later files overriding earlier ones.
    pub fn parse<'a>(
        paths: impl IntoIterator<Item = &'a Utf8Path>,
    ) -> Result<Self, ExpectationParseError> {
        let mut store = Self::new();
        for path in paths {
            let content = fs::read_to_string(path)
                .map_err(|error| ExpectationParseError::read(path, error))?;
            let entries: Vec<ExpectationEntry> = serde_json::from_str(&content)
                .map_err(|error| ExpectationParseError::parse(path, error))?;
            for entry in entries {
                let mut expectation = Expectation::new(entry.result);
                if let Some(pattern) = entry.pattern {
                    let pattern = Regex::new(&pattern)
                        .map_err(|error| ExpectationParseError::pattern(path, error))?;
                    expectation = expectation.with_pattern(pattern);
                }
                for tag in entry.tags {
                    expectation = expectation.with_tag(tag);
                }
                store.add(entry.name, expectation);
            }
        }
        Ok(store)
    }

    /// Adds or replaces the expectation for a name.
    pub fn add(&mut self, name: impl Into<String>, expectation: Expectation) {
        self.by_name.insert(name.into(), expectation);
    }

    /// Looks up the expectation for a name, walking the name hierarchy.
    pub fn get(&self, name: &str) -> &Expectation {
        if let Some(expectation) = self.by_name.get(name) {
            return expectation;
        }

        // Trim a trailing `#method` qualifier, then dotted suffixes, most
        // specific first.
        let mut prefix = match name.split_once('#') {
            Some((suite, _)) => suite,
            None => name,
        };
        loop {
            if let Some(expectation) = self.by_name.get(prefix) {
                return expectation;
            }
            match prefix.rsplit_once('.') {
                Some((shorter, _)) => prefix = shorter,
                None => return default_expectation(),
            }
        }
    }

    /// Looks up the expectation governing an outcome.
    pub fn get_for_outcome(&self, outcome: &Outcome) -> &Expectation {
        self.get(outcome.name())
    }
}

/// Classifies an outcome against its expectation. Informational outcomes are
/// ignored; otherwise a match is OK and a mismatch is a failure.
pub fn evaluate(outcome: &Outcome, expectation: &Expectation) -> Verdict {
    if !outcome.matters() {
        Verdict::Ignore
    } else if expectation.matches(outcome) {
        Verdict::Ok
    } else {
        Verdict::Fail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lookup_walks_name_hierarchy() {
        let mut store = ExpectationStore::new();
        store.add("org.example", Expectation::new(ActionResult::ExecFailed));
        store.add(
            "org.example.FooTest",
            Expectation::new(ActionResult::Unsupported),
        );

        assert_eq!(
            store.get("org.example.FooTest").result(),
            ActionResult::Unsupported
        );
        // `#method` qualifiers resolve through the suite name.
        assert_eq!(
            store.get("org.example.FooTest#slow").result(),
            ActionResult::Unsupported
        );
        // Unknown leaves fall back to the closest dotted prefix.
        assert_eq!(
            store.get("org.example.BarTest").result(),
            ActionResult::ExecFailed
        );
        // Names outside the map get the catch-all default.
        assert_eq!(store.get("net.other.Baz").result(), ActionResult::Success);
    }

    #[test]
    fn matches_compares_result_and_pattern() {
        let expectation = Expectation::new(ActionResult::ExecFailed)
            .with_pattern(Regex::new("out of memory").expect("valid regex"));

        let matching = Outcome::new(
            "a.B",
            ActionResult::ExecFailed,
            vec!["error:".into(), "out of memory".into()],
        );
        assert!(expectation.matches(&matching));

        let wrong_output = Outcome::with_message("a.B", ActionResult::ExecFailed, "panic");
        assert!(!expectation.matches(&wrong_output));

        let wrong_result = Outcome::with_message("a.B", ActionResult::Success, "out of memory");
        assert!(!expectation.matches(&wrong_result));
    }

    #[test]
    fn evaluate_ignores_informational_outcomes() {
        let expectation = Expectation::new(ActionResult::Success);
        let info = Outcome::informational("a.B", ActionResult::ExecFailed, Vec::new());
        assert_eq!(evaluate(&info, &expectation), Verdict::Ignore);

        let pass = Outcome::new("a.B", ActionResult::Success, Vec::new());
        assert_eq!(evaluate(&pass, &expectation), Verdict::Ok);

        let fail = Outcome::new("a.B", ActionResult::ExecFailed, Vec::new());
        assert_eq!(evaluate(&fail, &expectation), Verdict::Fail);
    }

    #[test]
    fn parse_reads_entries_and_tags() {
        let temp = camino_tempfile::Utf8TempDir::new().expect("created temp dir");
        let path = temp.path().join("expectations.json");
        fs::write(
            &path,
            r#"[
                {"name": "org.example.SlowTest", "result": "SUCCESS", "tags": ["large"]},
                {"name": "org.example.Broken", "result": "UNSUPPORTED"},
                {"name": "org.example.Flaky", "result": "EXEC_FAILED", "pattern": "timed out"}
            ]"#,
        )
        .expect("wrote expectations");

        let store = ExpectationStore::parse([path.as_path()]).expect("parsed expectations");
        assert!(store.get("org.example.SlowTest").is_large());
        assert_eq!(
            store.get("org.example.Broken").result(),
            ActionResult::Unsupported
        );
        assert!(store
            .get("org.example.Flaky")
            .matches(&Outcome::with_message(
                "org.example.Flaky",
                ActionResult::ExecFailed,
                "request timed out"
            )));
    }
}
