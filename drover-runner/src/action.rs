// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Actions: the units of test work the driver builds and runs.

use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;

/// A unit of test work, discovered from a source tree or named directly by
/// class name. Uniquely identified by its name; immutable once discovered.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Action {
    name: String,
    class_name: String,
    source_path: Option<Utf8PathBuf>,
    resource_path: Option<Utf8PathBuf>,
    runner_kind: RunnerKind,
}

impl Action {
    /// Creates an action discovered from a source file.
    pub fn new(
        name: impl Into<String>,
        class_name: impl Into<String>,
        source_path: Option<Utf8PathBuf>,
        resource_path: Option<Utf8PathBuf>,
        runner_kind: RunnerKind,
    ) -> Self {
        Self {
            name: name.into(),
            class_name: class_name.into(),
            source_path,
            resource_path,
            runner_kind,
        }
    }

    /// Creates an action from a bare class name. Such actions have no source
    /// or resource paths; the mode is expected to find the class on its
    /// classpath.
    pub fn from_class_name(class_name: impl Into<String>) -> Self {
        let class_name = class_name.into();
        let runner_kind = RunnerKind::for_class_name(&class_name);
        Self {
            name: class_name.clone(),
            class_name,
            source_path: None,
            resource_path: None,
            runner_kind,
        }
    }

    /// The unique name of this action.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The fully-qualified class the action exercises.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// The source root the action was found under, if any.
    pub fn source_path(&self) -> Option<&Utf8Path> {
        self.source_path.as_deref()
    }

    /// The directory holding resources for this action, if any.
    pub fn resource_path(&self) -> Option<&Utf8Path> {
        self.resource_path.as_deref()
    }

    /// The runner kind that will exercise this action on the target.
    pub fn runner_kind(&self) -> RunnerKind {
        self.runner_kind
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The kind of runner an action needs on the target.
///
/// Runner dispatch is a tagged variant rather than a type hierarchy: action
/// discovery and command construction both match on it.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RunnerKind {
    /// A class with a `main` entry point.
    Main,
    /// A test-framework suite; one outcome per test method.
    Suite,
}

impl RunnerKind {
    /// Chooses a runner kind from a qualified class name by naming pattern:
    /// classes ending in `Test` or `Tests` are suites, everything else is a
    /// main class.
    pub fn for_class_name(class_name: &str) -> Self {
        let unqualified = class_name.rsplit('.').next().unwrap_or(class_name);
        if unqualified.ends_with("Test") || unqualified.ends_with("Tests") {
            RunnerKind::Suite
        } else {
            RunnerKind::Main
        }
    }

    /// Returns true if this runner can exercise the named class.
    pub fn supports(self, class_name: &str) -> bool {
        match self {
            RunnerKind::Main => true,
            RunnerKind::Suite => RunnerKind::for_class_name(class_name) == RunnerKind::Suite,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runner_kind_by_naming_pattern() {
        assert_eq!(
            RunnerKind::for_class_name("org.example.FooTest"),
            RunnerKind::Suite
        );
        assert_eq!(
            RunnerKind::for_class_name("org.example.FooTests"),
            RunnerKind::Suite
        );
        assert_eq!(
            RunnerKind::for_class_name("org.example.Benchmark"),
            RunnerKind::Main
        );
        // Only the unqualified name participates in the pattern.
        assert_eq!(
            RunnerKind::for_class_name("org.test.Main"),
            RunnerKind::Main
        );
    }

    #[test]
    fn class_name_actions_have_no_paths() {
        let action = Action::from_class_name("org.example.FooTest");
        assert_eq!(action.name(), "org.example.FooTest");
        assert!(action.source_path().is_none());
        assert!(action.resource_path().is_none());
        assert_eq!(action.runner_kind(), RunnerKind::Suite);
    }
}
