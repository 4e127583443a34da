// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The outcome ledger: a thread-safe, insertion-ordered record of every
//! outcome seen during a run, with the aggregate tally derived from the
//! verdicts.

use crate::outcome::{Outcome, Verdict};
use indexmap::IndexMap;
use std::sync::Mutex;

/// Aggregate counters over all classified outcomes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunTally {
    /// Outcomes that matched their expectation.
    pub successes: usize,
    /// Outcomes that did not match their expectation.
    pub failures: usize,
    /// Skipped and informational outcomes.
    pub skipped: usize,
}

impl RunTally {
    /// The total number of classified outcomes.
    pub fn total(&self) -> usize {
        self.successes + self.failures + self.skipped
    }

    /// Returns true if every classified outcome matched its expectation.
    pub fn all_successful(&self) -> bool {
        self.failures == 0 && self.skipped == 0
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    outcomes: IndexMap<String, Outcome>,
    tally: RunTally,
    failure_names: Vec<String>,
    skipped_names: Vec<String>,
}

/// The shared outcome ledger. All fields sit behind one mutex, held only
/// across small critical sections; iteration happens after the worker pools
/// have terminated.
#[derive(Debug, Default)]
pub struct Ledger {
    state: Mutex<LedgerState>,
}

impl Ledger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an outcome into the map without classifying it. Used for
    /// build-stage failures that the runner stage later observes and records
    /// through the early-result path.
    pub fn insert(&self, outcome: Outcome) {
        let mut state = self.state.lock().expect("ledger lock poisoned");
        state.outcomes.insert(outcome.name().to_owned(), outcome);
    }

    /// Returns the outcome recorded under `name`, if any.
    pub fn get(&self, name: &str) -> Option<Outcome> {
        let state = self.state.lock().expect("ledger lock poisoned");
        state.outcomes.get(name).cloned()
    }

    /// Returns true if an outcome is recorded under `name`.
    pub fn contains(&self, name: &str) -> bool {
        let state = self.state.lock().expect("ledger lock poisoned");
        state.outcomes.contains_key(name)
    }

    /// Records a classified outcome: inserts it and updates the tally and the
    /// failure/skip name lists according to the verdict.
    pub fn record(&self, outcome: Outcome, verdict: Verdict) {
        let mut state = self.state.lock().expect("ledger lock poisoned");
        let name = outcome.name().to_owned();
        state.outcomes.insert(name.clone(), outcome);
        match verdict {
            Verdict::Ok => state.tally.successes += 1,
            Verdict::Fail => {
                state.tally.failures += 1;
                state.failure_names.push(name);
            }
            Verdict::Ignore => {
                state.tally.skipped += 1;
                state.skipped_names.push(name);
            }
        }
    }

    /// Records an unsupported action as skipped without evaluating it against
    /// expectations.
    pub fn record_skip(&self, outcome: Outcome) {
        let mut state = self.state.lock().expect("ledger lock poisoned");
        let name = outcome.name().to_owned();
        state.outcomes.insert(name.clone(), outcome);
        state.tally.skipped += 1;
        state.skipped_names.push(name);
    }

    /// The current tally.
    pub fn tally(&self) -> RunTally {
        self.state.lock().expect("ledger lock poisoned").tally
    }

    /// The names of failing outcomes, in record order.
    pub fn failure_names(&self) -> Vec<String> {
        let state = self.state.lock().expect("ledger lock poisoned");
        state.failure_names.clone()
    }

    /// The names of skipped outcomes, in record order.
    pub fn skipped_names(&self) -> Vec<String> {
        let state = self.state.lock().expect("ledger lock poisoned");
        state.skipped_names.clone()
    }

    /// A snapshot of every recorded outcome, in insertion order.
    pub fn outcomes(&self) -> Vec<Outcome> {
        let state = self.state.lock().expect("ledger lock poisoned");
        state.outcomes.values().cloned().collect()
    }
}
