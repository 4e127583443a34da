// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests for the driver pipeline, using a scripted mode whose
//! commands connect to the real monitor port and stream real frames.

use camino::Utf8PathBuf;
use camino_tempfile::Utf8TempDir;
use drover_runner::{
    action::Action,
    classpath::{ClassFileIndex, Classpath},
    command::{Command, OutputFuture},
    config::DriverConfig,
    console::Console,
    driver::{Driver, DriverBuilder, DRIVER_OUTCOME_NAME, UNSUPPORTED_REASON},
    errors::{CommandError, DriverError, ModeError, ReportError},
    expectation::{Expectation, ExpectationStore},
    mode::Mode,
    monitor::TargetMonitor,
    outcome::{ActionResult, Outcome},
    report::ReportPrinter,
};
use pretty_assertions::assert_eq;
use std::{
    collections::{BTreeSet, HashMap, HashSet},
    io::{self, Write},
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::sync::Notify;

// ---
// Test doubles
// ---

/// A console sink handing its bytes to a shared buffer.
#[derive(Clone, Default)]
struct BufferSink(Arc<Mutex<Vec<u8>>>);

impl BufferSink {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for BufferSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A report printer that captures the outcomes handed to it, so tests can
/// assert on the ledger contents.
#[derive(Clone, Default)]
struct CapturingPrinter {
    outcomes: Arc<Mutex<Vec<Outcome>>>,
}

impl CapturingPrinter {
    fn outcome_for(&self, name: &str) -> Option<Outcome> {
        self.outcomes
            .lock()
            .unwrap()
            .iter()
            .find(|outcome| outcome.name() == name)
            .cloned()
    }
}

impl ReportPrinter for CapturingPrinter {
    fn generate_reports(&self, outcomes: &[Outcome]) -> Result<usize, ReportError> {
        *self.outcomes.lock().unwrap() = outcomes.to_vec();
        Ok(0)
    }
}

#[derive(Clone, Debug)]
enum ChildStep {
    Output { name: String, line: String },
    Outcome(Outcome),
}

/// What an action's simulated child does once started.
#[derive(Clone, Debug)]
struct ScriptSpec {
    /// Connect to the monitor port at all.
    connect: bool,
    /// Frames to send, each after its own delay.
    steps: Vec<(Duration, ChildStep)>,
    /// Send the completion frame at the end.
    complete: bool,
    /// After the steps, hold the connection open until destroyed.
    hang: bool,
    /// What the console-output future yields if the child is not destroyed.
    console: Result<Vec<String>, CommandError>,
}

impl ScriptSpec {
    fn reports(outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        Self {
            connect: true,
            steps: outcomes
                .into_iter()
                .map(|outcome| (Duration::ZERO, ChildStep::Outcome(outcome)))
                .collect(),
            complete: true,
            hang: false,
            console: Ok(Vec::new()),
        }
    }

    fn hangs() -> Self {
        Self {
            connect: true,
            steps: Vec::new(),
            complete: false,
            hang: true,
            console: Ok(Vec::new()),
        }
    }
}

#[derive(Default)]
struct KillFlag {
    destroyed: AtomicBool,
    notify: Notify,
}

impl KillFlag {
    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::AcqRel) {
            self.notify.notify_one();
        }
    }

    async fn killed(&self) {
        if self.destroyed.load(Ordering::Acquire) {
            return;
        }
        self.notify.notified().await;
    }
}

/// A command whose "child" is an in-process task following a [`ScriptSpec`].
struct ScriptedCommand {
    spec: ScriptSpec,
    port: u16,
    kill: Arc<KillFlag>,
    destroy_calls: AtomicUsize,
}

impl ScriptedCommand {
    fn new(spec: ScriptSpec, port: u16) -> Self {
        Self {
            spec,
            port,
            kill: Arc::new(KillFlag::default()),
            destroy_calls: AtomicUsize::new(0),
        }
    }

    fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::Acquire)
    }
}

impl Command for ScriptedCommand {
    fn execute_later(&self) -> OutputFuture {
        let spec = self.spec.clone();
        let port = self.port;
        let kill = Arc::clone(&self.kill);
        Box::pin(async move {
            if !spec.connect {
                // A child that never reaches the monitor; it lingers until
                // the driver destroys it.
                kill.killed().await;
                return Err(CommandError::Killed);
            }

            let mut target =
                match TargetMonitor::connect_with_retries(port, Duration::from_secs(5)).await {
                    Ok(target) => target,
                    Err(error) => return Err(CommandError::Spawn(Arc::new(error))),
                };

            for (delay, step) in spec.steps {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = kill.killed() => return Err(CommandError::Killed),
                }
                let sent = match step {
                    ChildStep::Output { name, line } => target.output(&name, &line).await,
                    ChildStep::Outcome(outcome) => target.outcome(&outcome).await,
                };
                if sent.is_err() {
                    return Err(CommandError::Killed);
                }
            }

            if spec.complete {
                let _ = target.completed().await;
                return spec.console;
            }
            if spec.hang {
                kill.killed().await;
                return Err(CommandError::Killed);
            }
            // Drop the connection without completing.
            drop(target);
            spec.console
        })
    }

    fn destroy(&self) {
        self.destroy_calls.fetch_add(1, Ordering::AcqRel);
        self.kill.destroy();
    }
}

/// A mode whose builds and commands are driven by per-action scripts.
#[derive(Default)]
struct FakeMode {
    scripts: Mutex<HashMap<String, ScriptSpec>>,
    build_failures: Mutex<HashSet<String>>,
    build_outcomes: Mutex<HashMap<String, Outcome>>,
    classpath: Mutex<Classpath>,
    prepare_calls: AtomicUsize,
    shutdown_calls: AtomicUsize,
    build_calls: Mutex<Vec<String>>,
    cleanup_calls: Mutex<Vec<String>>,
    spawned: Mutex<Vec<(String, Arc<ScriptedCommand>)>>,
}

impl FakeMode {
    fn script(&self, action_name: &str, spec: ScriptSpec) {
        self.scripts
            .lock()
            .unwrap()
            .insert(action_name.to_owned(), spec);
    }

    fn fail_build(&self, action_name: &str) {
        self.build_failures
            .lock()
            .unwrap()
            .insert(action_name.to_owned());
    }

    fn build_outcome(&self, action_name: &str, outcome: Outcome) {
        self.build_outcomes
            .lock()
            .unwrap()
            .insert(action_name.to_owned(), outcome);
    }

    fn spawned_commands(&self) -> Vec<(String, Arc<ScriptedCommand>)> {
        self.spawned.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Mode for FakeMode {
    async fn prepare(&self) -> Result<(), ModeError> {
        self.prepare_calls.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn build_and_install(&self, action: &Action) -> Result<Option<Outcome>, ModeError> {
        self.build_calls
            .lock()
            .unwrap()
            .push(action.name().to_owned());
        if self.build_failures.lock().unwrap().contains(action.name()) {
            return Err(ModeError::message("simulated build crash"));
        }
        Ok(self.build_outcomes.lock().unwrap().get(action.name()).cloned())
    }

    fn create_action_command(&self, action: &Action, monitor_port: u16) -> Arc<dyn Command> {
        let spec = self
            .scripts
            .lock()
            .unwrap()
            .get(action.name())
            .cloned()
            .unwrap_or_else(|| panic!("no script registered for {}", action.name()));
        let command = Arc::new(ScriptedCommand::new(spec, monitor_port));
        self.spawned
            .lock()
            .unwrap()
            .push((action.name().to_owned(), Arc::clone(&command)));
        command
    }

    async fn cleanup(&self, action: &Action) {
        self.cleanup_calls
            .lock()
            .unwrap()
            .push(action.name().to_owned());
    }

    async fn shutdown(&self) {
        self.shutdown_calls.fetch_add(1, Ordering::AcqRel);
    }

    fn classpath(&self) -> Classpath {
        self.classpath.lock().unwrap().clone()
    }
}

struct Fixture {
    driver: Driver,
    sink: BufferSink,
    printer: CapturingPrinter,
    _temp: Utf8TempDir,
}

fn fixture(mode: Arc<FakeMode>, store: ExpectationStore, config: DriverConfig) -> Fixture {
    fixture_with(mode, store, config, None)
}

fn fixture_with(
    mode: Arc<FakeMode>,
    store: ExpectationStore,
    mut config: DriverConfig,
    index: Option<Box<dyn ClassFileIndex>>,
) -> Fixture {
    let temp = Utf8TempDir::new().expect("created temp dir");
    config.local_temp = temp.path().join("work");

    let sink = BufferSink::default();
    let printer = CapturingPrinter::default();

    let mut builder = DriverBuilder::new(config);
    builder
        .set_console(Console::new(Box::new(sink.clone())))
        .set_report_printer(Box::new(printer.clone()));
    if let Some(index) = index {
        builder.set_class_file_index(index);
    }
    let driver = builder
        .build(Arc::clone(&mode) as Arc<dyn Mode>, Arc::new(store))
        .expect("driver built");

    Fixture {
        driver,
        sink,
        printer,
        _temp: temp,
    }
}

fn config(threads: usize, first_monitor_port: u16, small: u64, large: u64) -> DriverConfig {
    DriverConfig {
        num_runner_threads: NonZeroUsize::new(threads).expect("non-zero threads"),
        first_monitor_port,
        monitor_timeout_seconds: 5,
        small_timeout_seconds: small,
        large_timeout_seconds: large,
        ..DriverConfig::default()
    }
}

fn run_classes(fixture: &Fixture, class_names: &[&str]) -> drover_runner::ledger::RunTally {
    let class_names: Vec<String> = class_names.iter().map(|name| (*name).to_owned()).collect();
    fixture
        .driver
        .build_and_run(&[], &class_names)
        .expect("run completed")
}

// ---
// Scenarios
// ---

#[test]
fn happy_path_records_a_success() {
    let mode = Arc::new(FakeMode::default());
    let mut spec = ScriptSpec::reports([Outcome::new(
        "org.sample.AlphaTest",
        ActionResult::Success,
        Vec::new(),
    )]);
    spec.steps.insert(
        0,
        (
            Duration::ZERO,
            ChildStep::Output {
                name: "org.sample.AlphaTest".to_owned(),
                line: "hello from the target".to_owned(),
            },
        ),
    );
    mode.script("org.sample.AlphaTest", spec);

    let fx = fixture(
        Arc::clone(&mode),
        ExpectationStore::new(),
        config(2, 47011, 30, 600),
    );
    let tally = run_classes(&fx, &["org.sample.AlphaTest"]);

    assert_eq!(tally.successes, 1);
    assert_eq!(tally.failures, 0);
    assert_eq!(tally.skipped, 0);

    let recorded = fx
        .printer
        .outcome_for("org.sample.AlphaTest")
        .expect("outcome recorded");
    assert_eq!(recorded.result(), ActionResult::Success);

    assert_eq!(mode.prepare_calls.load(Ordering::Acquire), 1);
    assert_eq!(mode.shutdown_calls.load(Ordering::Acquire), 1);
    assert_eq!(
        mode.cleanup_calls.lock().unwrap().as_slice(),
        ["org.sample.AlphaTest"]
    );

    // Every started child is destroyed before the run returns, even on
    // success.
    for (_, command) in mode.spawned_commands() {
        assert!(command.destroy_calls() >= 1);
    }

    let output = fx.sink.contents();
    assert!(output.contains("hello from the target"));
    assert!(output.contains("OK (SUCCESS)"));
}

#[test]
fn expectation_mismatch_is_a_failure() {
    let mode = Arc::new(FakeMode::default());
    mode.script(
        "org.sample.Beta",
        ScriptSpec::reports([Outcome::with_message(
            "org.sample.Beta",
            ActionResult::ExecFailed,
            "assertion failed",
        )]),
    );

    let fx = fixture(
        Arc::clone(&mode),
        ExpectationStore::new(),
        config(1, 47021, 30, 600),
    );
    let tally = run_classes(&fx, &["org.sample.Beta"]);

    assert_eq!(tally.failures, 1);
    assert_eq!(tally.successes, 0);

    let output = fx.sink.contents();
    assert!(output.contains("FAIL (EXEC_FAILED)"));
    assert!(output.contains("Failures summary:"));
    assert!(output.contains("org.sample.Beta"));
}

#[test]
fn unsupported_expectation_skips_without_building() {
    let mode = Arc::new(FakeMode::default());
    let mut store = ExpectationStore::new();
    store.add("org.sample.Gamma", Expectation::new(ActionResult::Unsupported));

    let fx = fixture(Arc::clone(&mode), store, config(1, 47031, 30, 600));
    let tally = run_classes(&fx, &["org.sample.Gamma"]);

    assert_eq!(tally.skipped, 1);
    assert_eq!(tally.total(), 1);
    assert!(mode.build_calls.lock().unwrap().is_empty());
    assert!(mode.spawned_commands().is_empty());

    let recorded = fx
        .printer
        .outcome_for("org.sample.Gamma")
        .expect("skip recorded in the ledger");
    assert_eq!(recorded.result(), ActionResult::Unsupported);
    assert_eq!(recorded.output_lines(), [UNSUPPORTED_REASON]);
}

#[test]
fn progress_events_push_the_kill_deadline_back() {
    let mode = Arc::new(FakeMode::default());
    // With a 1-second budget the initial deadline is 3 seconds; the second
    // outcome arrives after that and only survives because the first one
    // renewed the deadline.
    mode.script(
        "org.sample.SlowTest",
        ScriptSpec {
            connect: true,
            steps: vec![
                (
                    Duration::from_millis(1000),
                    ChildStep::Outcome(Outcome::new(
                        "org.sample.SlowTest#m1",
                        ActionResult::Success,
                        Vec::new(),
                    )),
                ),
                (
                    Duration::from_millis(2500),
                    ChildStep::Outcome(Outcome::new(
                        "org.sample.SlowTest#m2",
                        ActionResult::Success,
                        Vec::new(),
                    )),
                ),
            ],
            complete: true,
            hang: false,
            console: Ok(Vec::new()),
        },
    );

    let fx = fixture(
        Arc::clone(&mode),
        ExpectationStore::new(),
        config(1, 47041, 1, 600),
    );
    let tally = run_classes(&fx, &["org.sample.SlowTest"]);

    assert_eq!(tally.successes, 2);
    assert_eq!(tally.failures, 0);
    assert!(fx.printer.outcome_for("org.sample.SlowTest#m2").is_some());
    // No timeout was recorded for the suite itself.
    assert!(fx.printer.outcome_for("org.sample.SlowTest").is_none());
}

#[test]
fn silent_child_is_killed_on_timeout() {
    let mode = Arc::new(FakeMode::default());
    mode.script("org.sample.Hang", ScriptSpec::hangs());

    let fx = fixture(
        Arc::clone(&mode),
        ExpectationStore::new(),
        config(1, 47051, 1, 600),
    );
    let tally = run_classes(&fx, &["org.sample.Hang"]);

    let recorded = fx
        .printer
        .outcome_for("org.sample.Hang")
        .expect("timeout recorded");
    assert_eq!(recorded.result(), ActionResult::ExecTimeout);
    assert_eq!(
        recorded.output_lines(),
        ["killed because it timed out after 1 seconds"]
    );
    assert_eq!(tally.failures, 1);

    let spawned = mode.spawned_commands();
    assert_eq!(spawned.len(), 1);
    assert!(spawned[0].1.destroy_calls() >= 1);
}

#[test]
fn zero_timeout_disables_the_kill_timer() {
    let mode = Arc::new(FakeMode::default());
    mode.script(
        "org.sample.Unhurried",
        ScriptSpec {
            connect: true,
            steps: vec![(
                Duration::from_millis(400),
                ChildStep::Outcome(Outcome::new(
                    "org.sample.Unhurried",
                    ActionResult::Success,
                    Vec::new(),
                )),
            )],
            complete: true,
            hang: false,
            console: Ok(Vec::new()),
        },
    );

    let fx = fixture(
        Arc::clone(&mode),
        ExpectationStore::new(),
        config(1, 47061, 0, 0),
    );
    let tally = run_classes(&fx, &["org.sample.Unhurried"]);

    assert_eq!(tally.successes, 1);
    let recorded = fx.printer.outcome_for("org.sample.Unhurried").unwrap();
    assert_eq!(recorded.result(), ActionResult::Success);
}

#[test]
fn premature_builder_exhaustion_records_a_driver_error() {
    let mode = Arc::new(FakeMode::default());
    mode.script(
        "org.sample.One",
        ScriptSpec::reports([Outcome::new(
            "org.sample.One",
            ActionResult::Success,
            Vec::new(),
        )]),
    );
    mode.fail_build("org.sample.Two");
    mode.fail_build("org.sample.Three");

    let fx = fixture(
        Arc::clone(&mode),
        ExpectationStore::new(),
        config(2, 47071, 30, 600),
    );
    let tally = run_classes(&fx, &["org.sample.One", "org.sample.Two", "org.sample.Three"]);

    let driver_error = fx
        .printer
        .outcome_for(DRIVER_OUTCOME_NAME)
        .expect("driver error recorded");
    assert_eq!(driver_error.result(), ActionResult::Error);
    assert_eq!(
        driver_error.output_lines(),
        ["Expected 3 actions but found fewer."]
    );

    // The surviving action still ran to completion.
    assert_eq!(
        fx.printer
            .outcome_for("org.sample.One")
            .expect("surviving action recorded")
            .result(),
        ActionResult::Success
    );
    assert!(tally.failures >= 1);
    assert!(fx.sink.contents().contains("unexpected failure!"));
}

#[test]
fn build_failure_outcome_short_circuits_the_runner() {
    let mode = Arc::new(FakeMode::default());
    mode.build_outcome(
        "org.sample.Delta",
        Outcome::with_message(
            "org.sample.Delta",
            ActionResult::CompileFailed,
            "error: cannot find symbol Widget",
        ),
    );

    struct WidgetIndex;
    impl ClassFileIndex for WidgetIndex {
        fn suggest_classpaths(&self, output_lines: &[String]) -> BTreeSet<Utf8PathBuf> {
            let mut suggestions = BTreeSet::new();
            if output_lines.iter().any(|line| line.contains("Widget")) {
                suggestions.insert(Utf8PathBuf::from("lib/widgets.jar"));
                suggestions.insert(Utf8PathBuf::from("lib/present.jar"));
            }
            suggestions
        }
    }

    let mode_classpath = Classpath::of([Utf8PathBuf::from("lib/present.jar")]);
    *mode.classpath.lock().unwrap() = mode_classpath;

    let fx = fixture_with(
        Arc::clone(&mode),
        ExpectationStore::new(),
        config(1, 47081, 30, 600),
        Some(Box::new(WidgetIndex)),
    );
    let tally = run_classes(&fx, &["org.sample.Delta"]);

    assert_eq!(tally.failures, 1);
    // The runner never starts a child for an action that already failed.
    assert!(mode.spawned_commands().is_empty());

    let recorded = fx.printer.outcome_for("org.sample.Delta").unwrap();
    assert_eq!(recorded.result(), ActionResult::CompileFailed);

    let output = fx.sink.contents();
    assert!(output.contains("missing from the classpath"));
    assert!(output.contains("lib/widgets.jar"));
    // Elements already on the mode's classpath are not suggested again.
    assert!(output.contains("consider adding the following to the classpath:"));
    let final_suggestions = output
        .split("consider adding the following to the classpath:")
        .nth(1)
        .expect("final suggestion block");
    assert!(!final_suggestions.contains("lib/present.jar"));
}

#[test]
fn actions_run_in_parallel_across_workers() {
    let mode = Arc::new(FakeMode::default());
    for name in ["org.sample.P1", "org.sample.P2", "org.sample.P3"] {
        mode.script(
            name,
            ScriptSpec::reports([Outcome::new(name, ActionResult::Success, Vec::new())]),
        );
    }

    let fx = fixture(
        Arc::clone(&mode),
        ExpectationStore::new(),
        config(2, 47091, 30, 600),
    );
    let tally = run_classes(&fx, &["org.sample.P1", "org.sample.P2", "org.sample.P3"]);

    assert_eq!(tally.successes, 3);
    assert_eq!(mode.cleanup_calls.lock().unwrap().len(), 3);

    // Ports only ever come from the two-port window assigned to the two
    // workers.
    for (_, command) in mode.spawned_commands() {
        assert!((47091..47093).contains(&command.port));
    }
}

#[test]
fn drivers_are_single_use() {
    let mode = Arc::new(FakeMode::default());
    let fx = fixture(
        Arc::clone(&mode),
        ExpectationStore::new(),
        config(1, 47101, 30, 600),
    );

    let tally = fx
        .driver
        .build_and_run(&[], &[])
        .expect("first run completes");
    assert_eq!(tally.total(), 0);
    assert!(fx.sink.contents().contains("Nothing to do."));
    // Nothing to do: the mode is never prepared.
    assert_eq!(mode.prepare_calls.load(Ordering::Acquire), 0);

    let error = fx
        .driver
        .build_and_run(&[], &[])
        .expect_err("drivers are not reusable");
    assert!(matches!(error, DriverError::AlreadyUsed));
}

#[test]
fn large_tag_selects_the_large_timeout() {
    let mode = Arc::new(FakeMode::default());
    // The child stays silent past the small budget's 3-second deadline; only
    // the `large` tag keeps it alive.
    mode.script(
        "org.sample.BigTest",
        ScriptSpec {
            connect: true,
            steps: vec![(
                Duration::from_millis(4000),
                ChildStep::Outcome(Outcome::new(
                    "org.sample.BigTest",
                    ActionResult::Success,
                    Vec::new(),
                )),
            )],
            complete: true,
            hang: false,
            console: Ok(Vec::new()),
        },
    );

    let mut store = ExpectationStore::new();
    store.add(
        "org.sample.BigTest",
        Expectation::new(ActionResult::Success).with_tag("large"),
    );

    let fx = fixture(Arc::clone(&mode), store, config(1, 47111, 1, 30));
    let tally = run_classes(&fx, &["org.sample.BigTest"]);

    assert_eq!(tally.successes, 1);
    assert_eq!(tally.failures, 0);
    let recorded = fx.printer.outcome_for("org.sample.BigTest").unwrap();
    assert_eq!(recorded.result(), ActionResult::Success);
}
