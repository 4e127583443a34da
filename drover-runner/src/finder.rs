// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Action discovery: traverses source trees looking for matching naming
//! patterns and injects actions (and discovery-time failures) into the
//! driver's maps.

use crate::{
    action::{Action, RunnerKind},
    outcome::{ActionResult, Outcome},
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use regex::Regex;
use std::{fs, sync::LazyLock};
use tracing::debug;

static PACKAGE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*package\s+(\S+)\s*;").expect("valid regex"));

static TYPE_DECLARATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)\b(?:public|private)\s+(?:final\s+)?(?:interface|class|enum)\b")
        .expect("valid regex")
});

/// Discovers actions from files and directories.
///
/// Implementations inject discovered [`Action`]s into `actions` and may also
/// inject pre-computed early [`Outcome`]s (for files that could not be
/// parsed) into `outcomes`.
pub trait ActionFinder: Send + Sync {
    /// Walks `path` and records what it finds.
    fn find_actions(
        &self,
        path: &Utf8Path,
        actions: &mut IndexMap<String, Action>,
        outcomes: &mut IndexMap<String, Outcome>,
    );
}

/// A finder that traverses directory trees looking for source files matching
/// a naming pattern, deriving the qualified class name from the package
/// declaration inside each file.
#[derive(Clone, Debug, Default)]
pub struct NamingPatternFinder {}

impl NamingPatternFinder {
    /// Creates a finder with the default naming patterns.
    pub fn new() -> Self {
        Self {}
    }

    /// Returns true if `file` looks like a source file containing an action
    /// class: not a dotfile, with a `.java` suffix.
    fn matches(&self, file: &Utf8Path) -> bool {
        let Some(name) = file.file_name() else {
            return false;
        };
        !name.starts_with('.') && name.ends_with(".java")
    }

    fn find_recursive(
        &self,
        file: &Utf8Path,
        actions: &mut IndexMap<String, Action>,
        outcomes: &mut IndexMap<String, Outcome>,
    ) {
        if file.is_dir() {
            let entries = match file.read_dir_utf8() {
                Ok(entries) => entries,
                Err(error) => {
                    debug!("could not read directory {file}: {error}");
                    return;
                }
            };
            let mut children: Vec<Utf8PathBuf> =
                entries.flatten().map(|entry| entry.into_path()).collect();
            children.sort();
            for child in children {
                self.find_recursive(&child, actions, outcomes);
            }
            return;
        }

        if !self.matches(file) {
            return;
        }

        match self.file_to_class(file) {
            Ok(class_name) => {
                let source_path = file_and_class_to_source_path(file, &class_name);
                let runner_kind = RunnerKind::for_class_name(&class_name);
                let action = Action::new(
                    class_name.clone(),
                    class_name.clone(),
                    source_path,
                    Some(file.to_owned()),
                    runner_kind,
                );
                actions.insert(class_name, action);
            }
            Err(message) => {
                // Surface the broken file as an action with an early failure
                // rather than silently dropping it.
                let name = file.as_str().to_owned();
                actions.insert(name.clone(), Action::from_class_name(name.clone()));
                outcomes.insert(
                    name.clone(),
                    Outcome::with_message(name, ActionResult::Error, message),
                );
            }
        }
    }

    /// Returns the qualified class name for the given source file. The
    /// unqualified name comes from the file name; the package comes from the
    /// package declaration inside the file.
    fn file_to_class(&self, file: &Utf8Path) -> Result<String, String> {
        let file_name = file.file_name().unwrap_or_default();
        let class_name = file_name
            .strip_suffix(".java")
            .ok_or_else(|| format!("not a source file: {file}"))?;

        let content = fs::read_to_string(file)
            .map_err(|error| format!("couldn't read {file}: {error}"))?;

        match PACKAGE_PATTERN.captures(&content) {
            Some(captures) => Ok(format!("{}.{class_name}", &captures[1])),
            None => {
                // Without a package there must at least be a type
                // declaration, otherwise we're reading the wrong kind of
                // file.
                if TYPE_DECLARATION_PATTERN.is_match(&content) {
                    Ok(class_name.to_owned())
                } else {
                    Err(format!("no class declaration found in {file}"))
                }
            }
        }
    }
}

impl ActionFinder for NamingPatternFinder {
    fn find_actions(
        &self,
        path: &Utf8Path,
        actions: &mut IndexMap<String, Action>,
        outcomes: &mut IndexMap<String, Outcome>,
    ) {
        self.find_recursive(path, actions, outcomes);
    }
}

/// Returns the source root for a class found in the given file: the file path
/// with the class-derived suffix removed. For `luni/src/org/example/Foo.java`
/// holding `org.example.Foo`, this returns `luni/src`.
fn file_and_class_to_source_path(file: &Utf8Path, class_name: &str) -> Option<Utf8PathBuf> {
    let short_path = format!("{}.java", class_name.replace('.', "/"));
    file.as_str()
        .strip_suffix(&short_path)
        .map(|prefix| Utf8PathBuf::from(prefix.trim_end_matches('/')))
}
