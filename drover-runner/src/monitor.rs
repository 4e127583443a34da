// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The monitor: the out-of-band TCP channel an action's child uses to stream
//! per-test outcomes and output back to the driver.
//!
//! The wire format is newline-delimited JSON frames. Each frame is one of:
//!
//! ```json
//! {"type": "output", "outcome": "a.b.C#method", "line": "..."}
//! {"type": "outcome", "outcome": {"name": "a.b.C#method", "result": "SUCCESS"}}
//! {"type": "completed"}
//! ```
//!
//! [`HostMonitor`] is the driver half; [`TargetMonitor`] is the writer half
//! used by child processes (and tests) to emit frames.

use crate::outcome::Outcome;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    time::{timeout, Instant},
};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MonitorFrame {
    Output { outcome: String, line: String },
    Outcome { outcome: Outcome },
    Completed,
}

/// Receives [`HostMonitor`] callbacks on the consuming task, in delivery
/// order.
pub trait Handler: Send {
    /// An output line streamed by the child for the named outcome.
    fn output(&mut self, outcome_name: &str, line: &str);

    /// A completed outcome reported by the child.
    fn outcome(&mut self, outcome: Outcome);
}

/// The driver-side monitor endpoint for one action run.
#[derive(Clone, Copy, Debug)]
pub struct HostMonitor {
    accept_timeout: Duration,
}

impl HostMonitor {
    /// Creates a monitor that waits up to `accept_timeout` for the child to
    /// connect.
    pub fn new(accept_timeout: Duration) -> Self {
        Self { accept_timeout }
    }

    /// Accepts one connection on `port` and dispatches frames to `handler`
    /// until the child signals completion or the connection drops.
    ///
    /// Returns true if the stream ended cleanly with a `completed` frame;
    /// false on accept timeout, connection loss, or protocol error.
    pub async fn monitor(&self, port: u16, handler: &mut dyn Handler) -> bool {
        let listener = match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => listener,
            Err(error) => {
                debug!(port, "could not bind monitor port: {error}");
                return false;
            }
        };

        let stream = match timeout(self.accept_timeout, listener.accept()).await {
            Ok(Ok((stream, _addr))) => stream,
            Ok(Err(error)) => {
                debug!(port, "monitor accept failed: {error}");
                return false;
            }
            Err(_elapsed) => {
                debug!(port, "timed out waiting for the action to connect");
                return false;
            }
        };

        let mut lines = BufReader::new(stream).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!(port, "monitor stream ended without completion");
                    return false;
                }
                Err(error) => {
                    debug!(port, "monitor connection lost: {error}");
                    return false;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MonitorFrame>(&line) {
                Ok(MonitorFrame::Output { outcome, line }) => handler.output(&outcome, &line),
                Ok(MonitorFrame::Outcome { outcome }) => handler.outcome(outcome),
                Ok(MonitorFrame::Completed) => return true,
                Err(error) => {
                    debug!(port, "bad monitor frame: {error}");
                    return false;
                }
            }
        }
    }
}

/// The child-side writer half of the monitor channel.
#[derive(Debug)]
pub struct TargetMonitor {
    stream: TcpStream,
}

impl TargetMonitor {
    /// Connects to the host monitor on `port`.
    pub async fn connect(port: u16) -> std::io::Result<Self> {
        let stream = TcpStream::connect(("127.0.0.1", port)).await?;
        Ok(Self { stream })
    }

    /// Connects to the host monitor, retrying until `deadline` elapses. The
    /// child usually starts before the host side is listening, so a few
    /// refused connections are expected.
    pub async fn connect_with_retries(port: u16, deadline: Duration) -> std::io::Result<Self> {
        let give_up = Instant::now() + deadline;
        loop {
            match Self::connect(port).await {
                Ok(monitor) => return Ok(monitor),
                Err(error) => {
                    if Instant::now() >= give_up {
                        return Err(error);
                    }
                    tokio::time::sleep(Duration::from_millis(25)).await;
                }
            }
        }
    }

    /// Streams an output line for the named outcome.
    pub async fn output(&mut self, outcome_name: &str, line: &str) -> std::io::Result<()> {
        self.send(&MonitorFrame::Output {
            outcome: outcome_name.to_owned(),
            line: line.to_owned(),
        })
        .await
    }

    /// Reports a completed outcome.
    pub async fn outcome(&mut self, outcome: &Outcome) -> std::io::Result<()> {
        self.send(&MonitorFrame::Outcome {
            outcome: outcome.clone(),
        })
        .await
    }

    /// Signals that the run completed normally and flushes the stream.
    pub async fn completed(&mut self) -> std::io::Result<()> {
        self.send(&MonitorFrame::Completed).await?;
        self.stream.flush().await
    }

    async fn send(&mut self, frame: &MonitorFrame) -> std::io::Result<()> {
        let mut payload = serde_json::to_string(frame).expect("monitor frames serialize");
        payload.push('\n');
        self.stream.write_all(payload.as_bytes()).await
    }
}
