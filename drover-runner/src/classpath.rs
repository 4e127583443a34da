// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Classpaths and the classpath-suggestion index consulted for failed
//! actions.

use camino::{Utf8Path, Utf8PathBuf};
use std::{collections::BTreeSet, fmt};

/// An ordered, de-duplicated list of classpath elements.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Classpath {
    elements: Vec<Utf8PathBuf>,
}

impl Classpath {
    /// Creates an empty classpath.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a classpath from the given elements.
    pub fn of(elements: impl IntoIterator<Item = Utf8PathBuf>) -> Self {
        let mut classpath = Self::new();
        classpath.extend(elements);
        classpath
    }

    /// Appends an element, unless it is already present.
    pub fn add(&mut self, element: Utf8PathBuf) {
        if !self.elements.contains(&element) {
            self.elements.push(element);
        }
    }

    /// Appends each element in order.
    pub fn extend(&mut self, elements: impl IntoIterator<Item = Utf8PathBuf>) {
        for element in elements {
            self.add(element);
        }
    }

    /// Returns true if `element` is on this classpath.
    pub fn contains(&self, element: &Utf8Path) -> bool {
        self.elements.iter().any(|e| e == element)
    }

    /// The elements, in insertion order.
    pub fn elements(&self) -> &[Utf8PathBuf] {
        &self.elements
    }

    /// Returns true if the classpath has no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl fmt::Display for Classpath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for element in &self.elements {
            if !first {
                f.write_str(":")?;
            }
            first = false;
            f.write_str(element.as_str())?;
        }
        Ok(())
    }
}

/// An index from class names seen in failure output to the archives that
/// provide them.
pub trait ClassFileIndex: Send + Sync {
    /// Suggests classpath elements that may fix the failure whose output is
    /// given.
    fn suggest_classpaths(&self, output_lines: &[String]) -> BTreeSet<Utf8PathBuf>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupes_and_preserves_order() {
        let mut classpath = Classpath::of([
            Utf8PathBuf::from("a.jar"),
            Utf8PathBuf::from("b.jar"),
        ]);
        classpath.add(Utf8PathBuf::from("a.jar"));
        classpath.add(Utf8PathBuf::from("c.jar"));

        assert_eq!(classpath.elements().len(), 3);
        assert_eq!(classpath.to_string(), "a.jar:b.jar:c.jar");
        assert!(classpath.contains(Utf8Path::new("b.jar")));
    }
}
