// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The console sink the driver reports through.
//!
//! There is no process-wide console singleton: a [`Console`] value is
//! injected into the driver and torn down with it.

use crate::outcome::{ActionResult, Verdict};
use owo_colors::{OwoColorize, Style};
use std::{
    io::{self, Write},
    sync::Mutex,
};

/// Styles for console result lines.
#[derive(Clone, Debug, Default)]
struct Styles {
    pass: Style,
    fail: Style,
    skip: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.pass = Style::new().green().bold();
        self.fail = Style::new().red().bold();
        self.skip = Style::new().yellow().bold();
    }
}

struct ConsoleInner {
    writer: Box<dyn Write + Send>,
    verbose: bool,
    styles: Styles,
    // The last outcome name a line was streamed for, to avoid repeating the
    // header for every line.
    streaming_name: Option<String>,
}

/// A synchronized sink for driver output.
pub struct Console {
    inner: Mutex<ConsoleInner>,
}

impl Console {
    /// Creates a console writing to the given sink.
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            inner: Mutex::new(ConsoleInner {
                writer,
                verbose: false,
                styles: Styles::default(),
                streaming_name: None,
            }),
        }
    }

    /// Creates a console writing to stdout.
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    /// Enables verbose output.
    pub fn set_verbose(self, verbose: bool) -> Self {
        self.inner.lock().expect("console lock poisoned").verbose = verbose;
        self
    }

    /// Enables colored result lines.
    pub fn set_color(self, color: bool) -> Self {
        {
            let mut inner = self.inner.lock().expect("console lock poisoned");
            if color {
                inner.styles.colorize();
            } else {
                inner.styles = Styles::default();
            }
        }
        self
    }

    /// Prints an informational line.
    pub fn info(&self, message: &str) {
        let mut inner = self.inner.lock().expect("console lock poisoned");
        inner.streaming_name = None;
        let _ = writeln!(inner.writer, "{message}");
    }

    /// Prints a line only in verbose mode.
    pub fn verbose(&self, message: &str) {
        let mut inner = self.inner.lock().expect("console lock poisoned");
        if inner.verbose {
            inner.streaming_name = None;
            let _ = writeln!(inner.writer, "{message}");
        }
    }

    /// Prints a warning followed by an indented list of items.
    pub fn warn(&self, message: &str, items: &[String]) {
        let mut inner = self.inner.lock().expect("console lock poisoned");
        inner.streaming_name = None;
        let _ = writeln!(inner.writer, "warning: {message}");
        for item in items {
            let _ = writeln!(inner.writer, "  {item}");
        }
    }

    /// Streams one line of output for the named outcome, printing the name as
    /// a header whenever it changes.
    pub fn stream_output(&self, outcome_name: &str, line: &str) {
        let mut inner = self.inner.lock().expect("console lock poisoned");
        if inner.streaming_name.as_deref() != Some(outcome_name) {
            inner.streaming_name = Some(outcome_name.to_owned());
            let _ = writeln!(inner.writer, "{outcome_name}:");
        }
        let _ = writeln!(inner.writer, "    {line}");
    }

    /// Prints the classified result for one outcome.
    pub fn result_line(&self, outcome_name: &str, result: ActionResult, verdict: Verdict) {
        let mut inner = self.inner.lock().expect("console lock poisoned");
        inner.streaming_name = None;
        let style = match verdict {
            Verdict::Ok => inner.styles.pass,
            Verdict::Fail => inner.styles.fail,
            Verdict::Ignore => inner.styles.skip,
        };
        let verdict = verdict.style(style);
        let _ = writeln!(inner.writer, "{outcome_name}: {verdict} ({result})");
    }

    /// Prints the sorted list of failing outcome names.
    pub fn summarize_failures(&self, names: &[String]) {
        let mut inner = self.inner.lock().expect("console lock poisoned");
        inner.streaming_name = None;
        let _ = writeln!(inner.writer, "Failures summary:");
        for name in names {
            let style = inner.styles.fail;
            let _ = writeln!(inner.writer, "  {}", name.style(style));
        }
    }

    /// Prints the sorted list of skipped outcome names.
    pub fn summarize_skips(&self, names: &[String]) {
        let mut inner = self.inner.lock().expect("console lock poisoned");
        inner.streaming_name = None;
        let _ = writeln!(inner.writer, "Skips summary:");
        for name in names {
            let style = inner.styles.skip;
            let _ = writeln!(inner.writer, "  {}", name.style(style));
        }
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::stdout()
    }
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console").finish_non_exhaustive()
    }
}
