// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The mode: the pluggable backend that knows how to build, install, run and
//! clean up actions for a target environment (local host, device, activity).

use crate::{
    action::Action, classpath::Classpath, command::Command, errors::ModeError, outcome::Outcome,
};
use async_trait::async_trait;
use std::sync::Arc;

/// A target-environment backend.
///
/// Modes are shared read-only across the builder and runner pools and must be
/// internally synchronized.
#[async_trait]
pub trait Mode: Send + Sync {
    /// Prepares the target environment. Called exactly once, before any
    /// action is built.
    async fn prepare(&self) -> Result<(), ModeError>;

    /// Builds and installs one action. A `Some` return is a failure outcome
    /// (typically `COMPILE_FAILED` or `UNSUPPORTED`) that short-circuits the
    /// run stage; `None` means the action is ready to run. An `Err` is logged
    /// and the action never reaches the ready queue.
    async fn build_and_install(&self, action: &Action) -> Result<Option<Outcome>, ModeError>;

    /// Creates the child command that runs `action`, reporting outcomes back
    /// on `monitor_port`.
    fn create_action_command(&self, action: &Action, monitor_port: u16) -> Arc<dyn Command>;

    /// Releases per-action resources after a run.
    async fn cleanup(&self, action: &Action);

    /// Tears down the target environment at the end of the run.
    async fn shutdown(&self);

    /// The classpath the mode runs actions with. Used to filter classpath
    /// suggestions that are already present.
    fn classpath(&self) -> Classpath;
}
