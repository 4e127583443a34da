// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The driver: compiles, installs, runs and reports on actions.
//!
//! A [`Driver`] runs a two-stage pipeline. The builder stage builds and
//! installs actions in parallel and feeds a small bounded ready queue, so
//! builders block when runners stall. The runner stage is a fixed pool of
//! workers, each with a stable index that selects its monitor port; a worker
//! launches the action's child, listens for streamed outcomes, and enforces a
//! renewable kill deadline so one slow method does not kill a whole suite.

use crate::{
    action::Action,
    classpath::ClassFileIndex,
    config::DriverConfig,
    console::Console,
    errors::{DriverBuildError, DriverError},
    expectation::{evaluate, ExpectationStore},
    finder::ActionFinder,
    helpers::format_duration,
    ledger::{Ledger, RunTally},
    mode::Mode,
    monitor::{Handler, HostMonitor},
    outcome::{ActionResult, Outcome},
    report::ReportPrinter,
    time::KillClock,
};
use camino::Utf8PathBuf;
use futures::future;
use indexmap::IndexMap;
use std::{
    collections::BTreeSet,
    fs,
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, OnceLock,
    },
    time::Duration,
};
use tokio::{
    runtime::Runtime,
    sync::{mpsc, Mutex as AsyncMutex, Semaphore},
    time::timeout,
};
use tracing::{debug, warn};

/// The name driver-level outcomes are recorded under.
pub const DRIVER_OUTCOME_NAME: &str = "drover";

/// The reason recorded for actions the expectations file marks unsupported.
pub const UNSUPPORTED_REASON: &str = "Unsupported according to expectations file";

/// Ready-queue capacity. Small, so builders block when runners stall and the
/// target never accumulates a pile of installed-but-unrun actions.
const READY_QUEUE_CAPACITY: usize = 4;

/// If a built action doesn't show up for this long, something upstream is
/// broken and all runners give up.
const STARVATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Upper bound on the whole runner stage. Effectively infinite.
const RUNNER_POOL_DEADLINE: Duration = Duration::from_secs(60 * 60 * 24 * 28);

/// Extra time granted past an action's own timeout, so the child can
/// self-report its timeout before being killed.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Bound on waiting for console output after a child has been destroyed.
const CONSOLE_OUTPUT_WAIT: Duration = Duration::from_secs(10);

/// A single-writer-wins slot for the final result of one action run.
///
/// The runner, the monitor path and the kill timer all race to decide the
/// final state; the first write wins and later writes are discarded.
#[derive(Debug, Default)]
struct ResultSlot(OnceLock<ActionResult>);

impl ResultSlot {
    fn new() -> Self {
        Self::default()
    }

    /// Attempts to set the final result. Returns true if this call won.
    fn set(&self, result: ActionResult) -> bool {
        self.0.set(result).is_ok()
    }

    fn get(&self) -> Option<ActionResult> {
        self.0.get().copied()
    }
}

/// Driver options.
///
/// Collaborators with sensible defaults (console) or that are optional
/// (report printer, classpath index, action finder) are set here; the mode
/// and expectations store are passed to [`build`](Self::build).
pub struct DriverBuilder {
    config: DriverConfig,
    console: Option<Console>,
    report_printer: Option<Box<dyn ReportPrinter>>,
    class_file_index: Option<Box<dyn ClassFileIndex>>,
    action_finder: Option<Box<dyn ActionFinder>>,
}

impl DriverBuilder {
    /// Creates a builder with the given configuration.
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            console: None,
            report_printer: None,
            class_file_index: None,
            action_finder: None,
        }
    }

    /// Sets the console sink. Defaults to stdout.
    pub fn set_console(&mut self, console: Console) -> &mut Self {
        self.console = Some(console);
        self
    }

    /// Sets the report printer invoked at the end of the run.
    pub fn set_report_printer(&mut self, printer: Box<dyn ReportPrinter>) -> &mut Self {
        self.report_printer = Some(printer);
        self
    }

    /// Sets the classpath-suggestion index consulted for failed actions.
    pub fn set_class_file_index(&mut self, index: Box<dyn ClassFileIndex>) -> &mut Self {
        self.class_file_index = Some(index);
        self
    }

    /// Sets the finder that discovers actions from files.
    pub fn set_action_finder(&mut self, finder: Box<dyn ActionFinder>) -> &mut Self {
        self.action_finder = Some(finder);
        self
    }

    /// Creates a driver.
    pub fn build(
        self,
        mode: Arc<dyn Mode>,
        expectations: Arc<ExpectationStore>,
    ) -> Result<Driver, DriverBuildError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(DriverBuildError::TokioRuntimeCreate)?;

        Ok(Driver {
            runtime,
            inner: Arc::new(DriverInner {
                config: self.config,
                mode,
                expectations,
                console: self.console.unwrap_or_default(),
                report_printer: self.report_printer,
                class_file_index: self.class_file_index,
                action_finder: self.action_finder,
                ledger: Ledger::new(),
                record_lock: Mutex::new(()),
                suggested: Mutex::new(BTreeSet::new()),
                used: AtomicBool::new(false),
                starvation: AtomicBool::new(false),
            }),
        })
    }
}

/// Compiles, installs, runs and reports on actions.
///
/// Created using [`DriverBuilder::build`]. Drivers are single-use: a second
/// [`build_and_run`](Self::build_and_run) fails with
/// [`DriverError::AlreadyUsed`].
#[derive(Debug)]
pub struct Driver {
    runtime: Runtime,
    inner: Arc<DriverInner>,
}

impl Driver {
    /// Builds and executes the actions discovered in `files` and named in
    /// `class_names`, returning the final tally.
    pub fn build_and_run(
        &self,
        files: &[Utf8PathBuf],
        class_names: &[String],
    ) -> Result<RunTally, DriverError> {
        if self.inner.used.swap(true, Ordering::AcqRel) {
            return Err(DriverError::AlreadyUsed);
        }
        let inner = Arc::clone(&self.inner);
        self.runtime.block_on(inner.execute(files, class_names))
    }
}

struct DriverInner {
    config: DriverConfig,
    mode: Arc<dyn Mode>,
    expectations: Arc<ExpectationStore>,
    console: Console,
    report_printer: Option<Box<dyn ReportPrinter>>,
    class_file_index: Option<Box<dyn ClassFileIndex>>,
    action_finder: Option<Box<dyn ActionFinder>>,
    ledger: Ledger,
    // Serializes outcome classification, console reporting and classpath
    // suggestions, so interleaved workers produce coherent output.
    record_lock: Mutex<()>,
    suggested: Mutex<BTreeSet<Utf8PathBuf>>,
    used: AtomicBool,
    // Set once by the first runner that waits out the starvation timeout;
    // every other runner exits quietly once it is up.
    starvation: AtomicBool,
}

impl std::fmt::Debug for DriverInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverInner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DriverInner {
    async fn execute(
        self: Arc<Self>,
        files: &[Utf8PathBuf],
        class_names: &[String],
    ) -> Result<RunTally, DriverError> {
        fs::create_dir_all(&self.config.local_temp).map_err(|error| DriverError::Workdir {
            path: self.config.local_temp.clone(),
            error,
        })?;

        let mut actions: IndexMap<String, Action> = IndexMap::new();
        let mut early: IndexMap<String, Outcome> = IndexMap::new();
        if let Some(finder) = &self.action_finder {
            for file in files {
                finder.find_actions(file, &mut actions, &mut early);
            }
        }
        for class_name in class_names {
            let action = Action::from_class_name(class_name.clone());
            actions.insert(action.name().to_owned(), action);
        }

        if actions.is_empty() {
            self.console.info("Nothing to do.");
            return Ok(RunTally::default());
        }
        for (_, outcome) in early {
            self.ledger.insert(outcome);
        }

        self.console.info(&format!("Actions: {}", actions.len()));
        let stopwatch = crate::time::stopwatch();

        // Prepare before building: packaging an action may need the runner
        // alongside the action-specific files.
        self.mode.prepare().await.map_err(DriverError::Prepare)?;

        let (ready_tx, ready_rx) = mpsc::channel::<Action>(READY_QUEUE_CAPACITY);
        let build_permits = Arc::new(Semaphore::new(
            std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
        ));

        let mut total_to_run = 0usize;
        for action in actions.values() {
            let name = action.name();
            if let Some(existing) = self.ledger.get(name) {
                self.add_early_result(existing);
                continue;
            }
            if self.expectations.get(name).result() == ActionResult::Unsupported {
                self.add_early_result(Outcome::with_message(
                    name,
                    ActionResult::Unsupported,
                    UNSUPPORTED_REASON,
                ));
                continue;
            }

            let run_index = total_to_run;
            total_to_run += 1;

            let driver = Arc::clone(&self);
            let action = action.clone();
            let ready_tx = ready_tx.clone();
            let build_permits = Arc::clone(&build_permits);
            tokio::spawn(async move {
                let Ok(_permit) = build_permits.acquire_owned().await else {
                    return;
                };
                driver
                    .console
                    .verbose(&format!("installing action {run_index}"));
                match driver.mode.build_and_install(&action).await {
                    Ok(Some(outcome)) => driver.ledger.insert(outcome),
                    Ok(None) => {}
                    Err(error) => {
                        warn!("unexpected failure! {error}");
                        driver.console.info(&format!("unexpected failure! {error}"));
                        return;
                    }
                }
                // Enqueue even when the build failed: the runner stage must
                // observe exactly the number of actions submitted, and it
                // short-circuits on the recorded outcome.
                let _ = ready_tx.send(action).await;
                driver
                    .console
                    .verbose(&format!("installed action {run_index}"));
            });
        }
        drop(ready_tx);

        let threads = self.config.num_runner_threads.get();
        self.console.verbose(if threads > 1 {
            "running actions in parallel"
        } else {
            "running actions in serial"
        });

        let queue = Arc::new(AsyncMutex::new(ready_rx));
        let remaining = Arc::new(AtomicUsize::new(total_to_run));
        let mut workers = Vec::with_capacity(threads);
        for worker_index in 0..threads {
            workers.push(tokio::spawn(Arc::clone(&self).run_worker(
                worker_index,
                Arc::clone(&queue),
                Arc::clone(&remaining),
            )));
        }

        match timeout(RUNNER_POOL_DEADLINE, future::join_all(workers)).await {
            Ok(results) => {
                for result in results {
                    if let Err(join_error) = result {
                        self.record_outcome(Outcome::with_message(
                            DRIVER_OUTCOME_NAME,
                            ActionResult::Error,
                            format!("runner worker failed: {join_error}"),
                        ));
                    }
                }
            }
            Err(_elapsed) => {
                self.record_outcome(Outcome::with_message(
                    DRIVER_OUTCOME_NAME,
                    ActionResult::Error,
                    "timed out waiting for runner workers to finish",
                ));
            }
        }

        if self.starvation.load(Ordering::Acquire) {
            self.record_outcome(Outcome::with_message(
                DRIVER_OUTCOME_NAME,
                ActionResult::Error,
                format!("Expected {} actions but found fewer.", actions.len()),
            ));
        }

        if let Some(printer) = &self.report_printer {
            self.console.info("Printing XML Reports... ");
            match printer.generate_reports(&self.ledger.outcomes()) {
                Ok(files) => self.console.info(&format!("{files} XML files written.")),
                Err(error) => self
                    .console
                    .warn(&format!("failed to write XML reports: {error}"), &[]),
            }
        }

        self.mode.shutdown().await;

        let snapshot = stopwatch.snapshot();
        debug!(
            start_time = %snapshot.start_time,
            "run finished in {:?}", snapshot.duration
        );
        let elapsed = snapshot.duration;
        let tally = self.ledger.tally();
        if tally.failures > 0 {
            let mut names = self.ledger.failure_names();
            names.sort_unstable();
            self.console.summarize_failures(&names);
        }
        if tally.skipped > 0 {
            let mut names = self.ledger.skipped_names();
            names.sort_unstable();
            self.console.summarize_skips(&names);
        }
        {
            let suggested = self.suggested.lock().expect("suggestion lock poisoned");
            if !suggested.is_empty() {
                let items: Vec<String> =
                    suggested.iter().map(|path| path.to_string()).collect();
                self.console
                    .warn("consider adding the following to the classpath:", &items);
            }
        }

        if tally.all_successful() {
            self.console.info(&format!(
                "Outcomes: {}. All successful. Took {}.",
                tally.successes,
                format_duration(elapsed)
            ));
        } else {
            self.console.info(&format!(
                "Outcomes: {}. Passed: {}, Failed: {}, Skipped: {}. Took {}.",
                tally.total(),
                tally.successes,
                tally.failures,
                tally.skipped,
                format_duration(elapsed)
            ));
        }

        Ok(tally)
    }

    /// One runner worker. Claims run slots until the submitted total is
    /// consumed; a queue poll that waits out the starvation timeout (or sees
    /// the queue close early) trips the shared flag and ends every worker.
    async fn run_worker(
        self: Arc<Self>,
        worker_index: usize,
        queue: Arc<AsyncMutex<mpsc::Receiver<Action>>>,
        remaining: Arc<AtomicUsize>,
    ) {
        loop {
            if self.starvation.load(Ordering::Acquire) {
                return;
            }
            if !claim_slot(&remaining) {
                return;
            }

            let polled = {
                let mut ready = queue.lock().await;
                if self.starvation.load(Ordering::Acquire) {
                    return;
                }
                timeout(STARVATION_TIMEOUT, ready.recv()).await
            };
            let action = match polled {
                Ok(Some(action)) => action,
                Ok(None) | Err(_) => {
                    self.starvation.store(true, Ordering::Release);
                    return;
                }
            };

            self.console
                .verbose(&format!("worker {worker_index} executing {action}"));
            self.run_action(&action, worker_index).await;
            self.mode.cleanup(&action).await;
        }
    }

    /// Executes a single action and records its result.
    async fn run_action(&self, action: &Action, worker_index: usize) {
        let expectation = self.expectations.get(action.name());
        let timeout_seconds = if expectation.is_large() {
            self.config.large_timeout_seconds
        } else {
            self.config.small_timeout_seconds
        };

        if let Some(early) = self.ledger.get(action.name()) {
            self.add_early_result(early);
            return;
        }

        let port = self.monitor_port(worker_index, self.config.first_monitor_port);
        let command = self.mode.create_action_command(action, port);
        let console_out = tokio::spawn(command.execute_later());

        let slot = Arc::new(ResultSlot::new());
        let clock = Arc::new(KillClock::new());
        if timeout_seconds != 0 {
            clock.push_back(Duration::from_secs(timeout_seconds) + KILL_GRACE);
            let clock = Arc::clone(&clock);
            let slot = Arc::clone(&slot);
            let command = Arc::clone(&command);
            tokio::spawn(async move {
                clock.expired().await;
                if slot.set(ActionResult::ExecTimeout) {
                    debug!(timeout_seconds, "killing command that timed out");
                    command.destroy();
                }
            });
        }

        let monitor = HostMonitor::new(self.config.monitor_timeout());
        let mut handler = RunnerHandler {
            driver: self,
            clock: &clock,
            renewal: Duration::from_secs(self.config.small_timeout_seconds) + KILL_GRACE,
        };
        let completed_normally = monitor.monitor(port, &mut handler).await;

        if completed_normally {
            if slot.set(ActionResult::Success) {
                // The child has already exited; destroy is idempotent.
                command.destroy();
            }
            return; // outcomes were reported through the handler
        }

        if slot.set(ActionResult::Error) {
            self.console
                .verbose(&format!("killing {action} because it could not be monitored"));
            command.destroy();
        }
        let result = slot.get().expect("result slot was just written");

        // The child is dead or dying; don't wait on its console forever.
        let outcome = match timeout(CONSOLE_OUTPUT_WAIT, console_out).await {
            Ok(Ok(Ok(lines))) => Outcome::new(action.name(), result, lines),
            Ok(Ok(Err(error))) => match error.output_lines() {
                Some(lines) => Outcome::new(action.name(), result, lines.to_vec()),
                None if result == ActionResult::ExecTimeout => {
                    Outcome::with_message(action.name(), result, timeout_message(timeout_seconds))
                }
                None => Outcome::with_message(action.name(), result, error.to_string()),
            },
            Ok(Err(join_error)) => Outcome::with_message(
                action.name(),
                result,
                format!("console output task failed: {join_error}"),
            ),
            Err(_elapsed) if result == ActionResult::ExecTimeout => {
                Outcome::with_message(action.name(), result, timeout_message(timeout_seconds))
            }
            Err(_elapsed) => Outcome::with_message(
                action.name(),
                result,
                "gave up waiting for console output",
            ),
        };
        self.add_early_result(outcome);
    }

    /// Selects this worker's monitor port. With a single worker the
    /// caller-supplied default wins; otherwise ports fan out from the
    /// configured base so no two workers share one.
    fn monitor_port(&self, worker_index: usize, default_value: u16) -> u16 {
        select_monitor_port(
            self.config.num_runner_threads.get(),
            self.config.first_monitor_port,
            worker_index,
            default_value,
        )
    }

    /// Records an outcome that did not come through a monitor stream:
    /// discovery-time failures, build failures, unsupported skips and
    /// run-stage classifications.
    fn add_early_result(&self, outcome: Outcome) {
        if outcome.result() == ActionResult::Unsupported {
            self.console.verbose(&format!("skipped {}", outcome.name()));
            self.ledger.record_skip(outcome);
        } else {
            for line in outcome.output_lines() {
                self.console.stream_output(outcome.name(), line);
            }
            self.record_outcome(outcome);
        }
    }

    /// Classifies an outcome against its expectation, records it, reports it
    /// and collects classpath suggestions.
    fn record_outcome(&self, outcome: Outcome) {
        let _gate = self.record_lock.lock().expect("record lock poisoned");
        let expectation = self.expectations.get_for_outcome(&outcome);
        let verdict = evaluate(&outcome, expectation);
        self.console
            .result_line(outcome.name(), outcome.result(), verdict);
        self.suggest_classpaths(&outcome);
        self.ledger.record(outcome, verdict);
    }

    fn suggest_classpaths(&self, outcome: &Outcome) {
        if !matches!(
            outcome.result(),
            ActionResult::CompileFailed | ActionResult::ExecFailed
        ) {
            return;
        }
        let Some(index) = &self.class_file_index else {
            return;
        };
        let mut suggested = index.suggest_classpaths(outcome.output_lines());

        // Don't suggest anything that's already on the classpath.
        let classpath = self.mode.classpath();
        suggested.retain(|path| !classpath.contains(path));
        if suggested.is_empty() {
            return;
        }

        let items: Vec<String> = suggested.iter().map(|path| path.to_string()).collect();
        self.suggested
            .lock()
            .expect("suggestion lock poisoned")
            .extend(suggested);
        self.console.warn(
            "may have failed because some of these are missing from the classpath:",
            &items,
        );
    }
}

/// Monitor callbacks for one action run: output lines stream straight to the
/// console, and every completed outcome pushes the kill deadline back before
/// it is recorded.
struct RunnerHandler<'a> {
    driver: &'a DriverInner,
    clock: &'a KillClock,
    renewal: Duration,
}

impl Handler for RunnerHandler<'_> {
    fn output(&mut self, outcome_name: &str, line: &str) {
        self.driver.console.stream_output(outcome_name, line);
    }

    fn outcome(&mut self, outcome: Outcome) {
        self.clock.push_back(self.renewal);
        self.driver.record_outcome(outcome);
    }
}

fn timeout_message(timeout_seconds: u64) -> String {
    format!("killed because it timed out after {timeout_seconds} seconds")
}

fn select_monitor_port(
    threads: usize,
    first_monitor_port: u16,
    worker_index: usize,
    default_value: u16,
) -> u16 {
    if threads == 1 {
        default_value
    } else {
        first_monitor_port + (worker_index % threads) as u16
    }
}

fn claim_slot(remaining: &AtomicUsize) -> bool {
    let mut current = remaining.load(Ordering::Acquire);
    loop {
        if current == 0 {
            return false;
        }
        match remaining.compare_exchange_weak(
            current,
            current - 1,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => return true,
            Err(observed) => current = observed,
        }
    }
}
