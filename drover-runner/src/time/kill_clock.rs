// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The renewable kill deadline armed for each running action.
//!
//! The runner pushes the deadline back on progress events instead of
//! cancelling and re-arming a timer: the timer task reads the current
//! deadline when it wakes, and reschedules itself if the deadline has moved.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

/// A shared, monotonically non-decreasing absolute deadline.
///
/// The owning runner writes it on progress events; the kill-timer task reads
/// it. Stored as milliseconds since the clock's epoch so updates are a single
/// atomic `fetch_max`.
#[derive(Debug)]
pub(crate) struct KillClock {
    epoch: Instant,
    deadline_millis: AtomicU64,
}

impl KillClock {
    /// Creates a clock whose deadline is the current instant; callers arm it
    /// with [`push_back`](Self::push_back) before spawning the timer.
    pub(crate) fn new() -> Self {
        Self {
            epoch: Instant::now(),
            deadline_millis: AtomicU64::new(0),
        }
    }

    /// Moves the deadline to `timeout` from now, unless it is already later.
    pub(crate) fn push_back(&self, timeout: std::time::Duration) {
        let new_deadline = self
            .epoch
            .elapsed()
            .saturating_add(timeout)
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX);
        self.deadline_millis
            .fetch_max(new_deadline, Ordering::AcqRel);
    }

    /// The current absolute deadline.
    pub(crate) fn deadline(&self) -> Instant {
        let millis = self.deadline_millis.load(Ordering::Acquire);
        self.epoch + std::time::Duration::from_millis(millis)
    }

    /// Sleeps until the deadline stops moving, then returns. Progress events
    /// that push the deadline back cause another sleep rather than a fire.
    pub(crate) async fn expired(&self) {
        loop {
            let deadline = self.deadline();
            tokio::time::sleep_until(deadline).await;
            if Instant::now() >= self.deadline() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::Duration,
    };

    #[tokio::test(start_paused = true)]
    async fn push_back_reschedules_the_timer() {
        let clock = Arc::new(KillClock::new());
        clock.push_back(Duration::from_millis(100));

        let fired = Arc::new(AtomicBool::new(false));
        let task = {
            let clock = Arc::clone(&clock);
            let fired = Arc::clone(&fired);
            tokio::spawn(async move {
                clock.expired().await;
                fired.store(true, Ordering::Release);
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        clock.push_back(Duration::from_millis(150));

        // The original deadline passes without firing.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!fired.load(Ordering::Acquire));

        // The pushed-back deadline fires.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(fired.load(Ordering::Acquire));
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_never_moves_backwards() {
        let clock = KillClock::new();
        clock.push_back(Duration::from_millis(500));
        let first = clock.deadline();
        clock.push_back(Duration::from_millis(100));
        assert_eq!(clock.deadline(), first);
    }
}
