// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Driver configuration.

use camino::Utf8PathBuf;
use serde::Deserialize;
use std::{num::NonZeroUsize, time::Duration};

/// Configuration for a [`Driver`](crate::driver::Driver).
///
/// Timeouts are expressed in whole seconds; a zero kill timeout means "no
/// timeout".
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct DriverConfig {
    /// The working directory for builds.
    pub local_temp: Utf8PathBuf,
    /// The number of runner workers, controlling parallelism and monitor-port
    /// fan-out.
    pub num_runner_threads: NonZeroUsize,
    /// The base TCP port for per-worker monitor endpoints.
    pub first_monitor_port: u16,
    /// How long to wait for an action's child to connect to its monitor.
    pub monitor_timeout_seconds: u64,
    /// The kill budget for ordinary actions. Zero disables the kill timer.
    pub small_timeout_seconds: u64,
    /// The kill budget for actions tagged `large`. Zero disables the kill
    /// timer.
    pub large_timeout_seconds: u64,
}

impl DriverConfig {
    /// The monitor accept timeout as a [`Duration`].
    pub fn monitor_timeout(&self) -> Duration {
        Duration::from_secs(self.monitor_timeout_seconds)
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            local_temp: Utf8PathBuf::from(".drover/tmp"),
            num_runner_threads: NonZeroUsize::new(1).expect("1 is non-zero"),
            first_monitor_port: 8788,
            monitor_timeout_seconds: 30,
            small_timeout_seconds: 60,
            large_timeout_seconds: 600,
        }
    }
}
