// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by drover.

use camino::Utf8PathBuf;
use std::{error, fmt, io, sync::Arc};

/// An error that occurred while constructing a
/// [`Driver`](crate::driver::Driver).
#[derive(Debug)]
#[non_exhaustive]
pub enum DriverBuildError {
    /// Creating the Tokio runtime failed.
    TokioRuntimeCreate(io::Error),
}

impl fmt::Display for DriverBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TokioRuntimeCreate(_) => write!(f, "error creating Tokio runtime"),
        }
    }
}

impl error::Error for DriverBuildError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::TokioRuntimeCreate(error) => Some(error),
        }
    }
}

/// An error returned by [`Driver::build_and_run`](crate::driver::Driver::build_and_run).
#[derive(Debug)]
#[non_exhaustive]
pub enum DriverError {
    /// The driver has already performed a run; drivers are single-use.
    AlreadyUsed,
    /// The working directory could not be created.
    Workdir {
        /// The directory that could not be created.
        path: Utf8PathBuf,
        /// The underlying error.
        error: io::Error,
    },
    /// The mode failed to prepare the target environment.
    Prepare(ModeError),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyUsed => write!(f, "drivers are not reusable"),
            Self::Workdir { path, .. } => {
                write!(f, "failed to create working directory `{path}`")
            }
            Self::Prepare(_) => write!(f, "mode failed to prepare the target environment"),
        }
    }
}

impl error::Error for DriverError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::AlreadyUsed => None,
            Self::Workdir { error, .. } => Some(error),
            Self::Prepare(error) => Some(error),
        }
    }
}

/// An error raised by a [`Mode`](crate::mode::Mode) operation.
///
/// Mode implementations wrap whatever backend error they hit; the driver
/// never lets these cross a task boundary, converting them to `ERROR`
/// outcomes instead.
#[derive(Debug)]
pub struct ModeError {
    inner: Box<dyn error::Error + Send + Sync>,
}

impl ModeError {
    /// Wraps a backend error.
    pub fn new(inner: impl Into<Box<dyn error::Error + Send + Sync>>) -> Self {
        Self {
            inner: inner.into(),
        }
    }

    /// Creates a mode error from a plain message.
    pub fn message(message: impl Into<String>) -> Self {
        Self::new(message.into())
    }
}

impl fmt::Display for ModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl error::Error for ModeError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.inner.source()
    }
}

/// An error produced while executing a child command.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum CommandError {
    /// The child process could not be spawned.
    Spawn(Arc<io::Error>),
    /// Waiting on the child process failed.
    Wait(Arc<io::Error>),
    /// The child exited with a non-zero status. The output captured up to
    /// that point is carried along.
    Failed {
        /// Captured stdout and stderr lines.
        output_lines: Vec<String>,
        /// The exit code, if the child exited rather than being signalled.
        exit_code: Option<i32>,
    },
    /// The command was destroyed before it completed.
    Killed,
}

impl CommandError {
    /// The output lines captured before the failure, if any.
    pub fn output_lines(&self) -> Option<&[String]> {
        match self {
            Self::Failed { output_lines, .. } => Some(output_lines),
            _ => None,
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn(_) => write!(f, "failed to spawn child process"),
            Self::Wait(_) => write!(f, "failed to wait on child process"),
            Self::Failed { exit_code, .. } => match exit_code {
                Some(code) => write!(f, "command failed with exit code {code}"),
                None => write!(f, "command terminated by signal"),
            },
            Self::Killed => write!(f, "command was destroyed before it completed"),
        }
    }
}

impl error::Error for CommandError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Spawn(error) | Self::Wait(error) => Some(error),
            Self::Failed { .. } | Self::Killed => None,
        }
    }
}

/// An error that occurred while parsing an expectations file.
#[derive(Debug)]
#[non_exhaustive]
pub enum ExpectationParseError {
    /// The file could not be read.
    Read {
        /// The expectations file.
        path: Utf8PathBuf,
        /// The underlying error.
        error: io::Error,
    },
    /// The file was not valid expectations JSON.
    Parse {
        /// The expectations file.
        path: Utf8PathBuf,
        /// The underlying error.
        error: serde_json::Error,
    },
    /// An entry carried an invalid output pattern.
    Pattern {
        /// The expectations file.
        path: Utf8PathBuf,
        /// The underlying error.
        error: regex::Error,
    },
}

impl ExpectationParseError {
    pub(crate) fn read(path: &camino::Utf8Path, error: io::Error) -> Self {
        Self::Read {
            path: path.to_owned(),
            error,
        }
    }

    pub(crate) fn parse(path: &camino::Utf8Path, error: serde_json::Error) -> Self {
        Self::Parse {
            path: path.to_owned(),
            error,
        }
    }

    pub(crate) fn pattern(path: &camino::Utf8Path, error: regex::Error) -> Self {
        Self::Pattern {
            path: path.to_owned(),
            error,
        }
    }
}

impl fmt::Display for ExpectationParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { path, .. } => write!(f, "failed to read expectations file `{path}`"),
            Self::Parse { path, .. } => write!(f, "failed to parse expectations file `{path}`"),
            Self::Pattern { path, .. } => {
                write!(f, "invalid output pattern in expectations file `{path}`")
            }
        }
    }
}

impl error::Error for ExpectationParseError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Read { error, .. } => Some(error),
            Self::Parse { error, .. } => Some(error),
            Self::Pattern { error, .. } => Some(error),
        }
    }
}

/// An error that occurred while writing XML reports.
#[derive(Debug)]
#[non_exhaustive]
pub enum ReportError {
    /// Serializing a report failed.
    Serialize {
        /// The suite whose report failed to serialize.
        suite: String,
        /// The underlying error.
        error: quick_junit::SerializeError,
    },
    /// Writing a report file failed.
    Write {
        /// The report file.
        path: Utf8PathBuf,
        /// The underlying error.
        error: io::Error,
    },
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serialize { suite, .. } => {
                write!(f, "failed to serialize report for suite `{suite}`")
            }
            Self::Write { path, .. } => write!(f, "failed to write report file `{path}`"),
        }
    }
}

impl error::Error for ReportError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Serialize { error, .. } => Some(error),
            Self::Write { error, .. } => Some(error),
        }
    }
}
