//! Scheduler / Executor (spec §4.E) — the heart of the engine.
//!
//! Drives the per-iteration state machine (`Pending -> Ready -> Running ->
//! Completed(ok|fail)`, with `Waiting` for human input) over the closure
//! built by [`crate::graph`]: a bounded-parallelism worker pool, retry with
//! backoff, `on_success`/`on_fail`/`on_finish` routing, `forEach` fan-out,
//! loop-budget enforcement, fail-fast, and criticality propagation.

use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use visor_expr::{EvalContextBuilder, ExprEngine};
use visor_providers::{ProviderDispatcher, ResolvedInputs};
use visor_types::check::{CheckCatalog, CheckSpec, CheckType, Criticality, RouteSpec};
use visor_types::error::{EngineErrorValue, ErrorKind};
use visor_types::event::{EngineEvent, IterationState};
use visor_types::iteration::{Issue, SkipReason};
use visor_types::result::{ResultEntry, RunResult, RunStatus, Statistics};
use visor_types::trigger::{CheckSelection, EventKind, RunOptions, RunTrigger};

use crate::bus::EventBus;
use crate::graph::build_closure;
use crate::history::OutputHistory;
use crate::human_input::{HumanInputCoordinator, HumanInputOutcome};
use crate::render::{render, TemplateContext};

const DEFAULT_MAX_PARALLELISM: usize = 3;
const DEFAULT_LOOP_BUDGET: u64 = 1000;
const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default)]
struct TerminalInfo {
    succeeded: bool,
    critical_failed: bool,
}

/// What one spawned iteration reports back to the driver loop once it
/// reaches a terminal state.
struct IterationReport {
    check_name: String,
    succeeded: bool,
    critical_failed: bool,
    /// Set when this iteration failed because the run itself was
    /// cancelled (loop-budget exceeded), as opposed to a genuine provider
    /// or expression failure. Gates whether `on_fail` routing fires for
    /// it (`RunOptions::route_on_fail_for_cancellation`).
    cancelled: bool,
    /// Set when this iteration is a fanned-out `forEach` child; names the
    /// parent so the driver can credit the right [`ForEachTracker`].
    for_each_parent: Option<String>,
    /// Set when this iteration is itself a `forEach` parent: the items its
    /// `forEach` expression produced.
    for_each_items: Option<Vec<Value>>,
    output: Option<Value>,
    content: Option<String>,
    issues: Vec<Issue>,
    duration_ms: u64,
}

pub struct SchedulerState {
    pub catalog: Arc<CheckCatalog>,
    pub dispatcher: ProviderDispatcher,
    pub expr: ExprEngine,
    pub bus: EventBus,
    pub human_input: HumanInputCoordinator,
    pub run_id: String,
}

/// Runs one full invocation of `run(trigger, options)` (spec §6.1).
pub async fn execute(
    state: &SchedulerState,
    trigger: RunTrigger,
    options: RunOptions,
    declared_order: &[String],
) -> RunResult {
    state.bus.publish(EngineEvent::run_started(&state.run_id));

    let requested = requested_names(&state.catalog, &trigger, &options, declared_order);

    let closure = match build_closure(&state.catalog, &requested, declared_order) {
        Ok(closure) => closure,
        Err(err) => return abort_on_config_error(state, err).await,
    };

    let history = OutputHistory::new();
    let max_parallelism = options.max_parallelism.unwrap_or(DEFAULT_MAX_PARALLELISM).max(1);
    let loop_budget = options.loop_budget.unwrap_or(DEFAULT_LOOP_BUDGET);
    let cancellation = CancellationToken::new();
    let semaphore = Arc::new(Semaphore::new(max_parallelism));
    let fail_fast_tripped = Arc::new(AtomicBool::new(false));
    let budget_exceeded = Arc::new(AtomicBool::new(false));

    let mut terminal: HashMap<String, TerminalInfo> = HashMap::new();
    let mut iteration_counts: HashMap<String, u32> = HashMap::new();
    let mut statistics = Statistics::default();
    let mut run_result = RunResult::default();
    let mut scheduled_total: u64 = 0;
    let mut for_each_pending: HashMap<String, ForEachTracker> = HashMap::new();

    let (report_tx, mut report_rx) = mpsc::unbounded_channel::<IterationReport>();

    let mut not_started: VecDeque<String> = closure
        .order
        .iter()
        .filter(|name| !closure.deferred.contains(*name))
        .cloned()
        .collect();

    let mut in_flight = 0usize;

    loop {
        // Drain everything currently startable before waiting on a result,
        // so siblings at the same depth all get queued before we block.
        let mut progressed = true;
        while progressed {
            progressed = false;
            let mut still_pending = VecDeque::new();
            while let Some(name) = not_started.pop_front() {
                if budget_exceeded.load(Ordering::SeqCst) {
                    continue;
                }
                let Some(spec) = state.catalog.get(&name) else { continue };

                if fail_fast_tripped.load(Ordering::SeqCst) {
                    skip_and_record(&mut statistics, &name, SkipReason::FailFastTripped);
                    terminal.insert(name.clone(), TerminalInfo::default());
                    progressed = true;
                    continue;
                }

                match dependency_verdict(spec, &terminal) {
                    DependencyVerdict::Waiting => still_pending.push_back(name),
                    DependencyVerdict::Skip(reason) => {
                        skip_and_record(&mut statistics, &name, reason);
                        terminal.insert(name.clone(), TerminalInfo::default());
                        progressed = true;
                    }
                    DependencyVerdict::Ready => {
                        match evaluate_if(state, &history, spec).await {
                            Ok(true) => {}
                            Ok(false) => {
                                skip_and_record(&mut statistics, &name, SkipReason::ConditionFalse);
                                terminal.insert(name.clone(), TerminalInfo::default());
                                progressed = true;
                                continue;
                            }
                            Err(kind) => {
                                // A broken `if` expression is an iteration
                                // failure, not a condition-false skip (no
                                // retry, routes through `on_fail`).
                                state.bus.publish(EngineEvent::check_errored(
                                    &state.run_id,
                                    &name,
                                    0,
                                    kind,
                                    "if expression failed to evaluate",
                                ));
                                let critical_failed = spec.criticality == Criticality::Critical;
                                terminal.insert(
                                    name.clone(),
                                    TerminalInfo {
                                        succeeded: false,
                                        critical_failed,
                                    },
                                );
                                let stats = statistics.per_check.entry(name.clone()).or_default();
                                stats.total_runs += 1;
                                stats.failed_runs += 1;
                                if critical_failed && options.fail_fast {
                                    fail_fast_tripped.store(true, Ordering::SeqCst);
                                }
                                enqueue_route(
                                    state,
                                    &history,
                                    &mut not_started,
                                    &mut scheduled_total,
                                    loop_budget,
                                    &budget_exceeded,
                                    &cancellation,
                                    spec,
                                    &spec.on_fail,
                                )
                                .await;
                                progressed = true;
                                continue;
                            }
                        }
                        if scheduled_total >= loop_budget {
                            budget_exceeded.store(true, Ordering::SeqCst);
                            cancellation.cancel();
                            progressed = true;
                            continue;
                        }
                        scheduled_total += 1;
                        let index = *iteration_counts.entry(name.clone()).or_insert(0);
                        iteration_counts.insert(name.clone(), index + 1);
                        in_flight += 1;
                        spawn_iteration(
                            state,
                            history.clone(),
                            semaphore.clone(),
                            cancellation.clone(),
                            report_tx.clone(),
                            trigger.clone(),
                            spec.clone(),
                            index,
                            None,
                            None,
                        );
                        progressed = true;
                    }
                }
            }
            not_started = still_pending;
        }

        if in_flight == 0 && not_started.is_empty() && for_each_pending.values().all(|t| t.complete()) {
            break;
        }
        if budget_exceeded.load(Ordering::SeqCst) && in_flight == 0 {
            break;
        }

        let Some(report) = report_rx.recv().await else { break };
        in_flight -= 1;

        terminal.insert(
            report.check_name.clone(),
            TerminalInfo {
                succeeded: report.succeeded,
                critical_failed: report.critical_failed,
            },
        );
        record_result(&state.catalog, &mut statistics, &mut run_result, &report);

        if let Some(items) = report.for_each_items.clone() {
            handle_for_each_fanout(
                state,
                &history,
                &mut not_started,
                &mut for_each_pending,
                &mut in_flight,
                &mut scheduled_total,
                loop_budget,
                &budget_exceeded,
                &cancellation,
                &semaphore,
                &report_tx,
                &trigger,
                &report.check_name,
                &items,
            )
            .await;
        } else if let Some(parent_name) = report.for_each_parent.clone() {
            let fire = for_each_pending
                .get_mut(&parent_name)
                .map(|tracker| {
                    tracker.note_child_done();
                    tracker.complete()
                })
                .unwrap_or(false);
            if fire {
                for_each_pending.remove(&parent_name);
                if let Some(spec) = state.catalog.get(&parent_name).cloned() {
                    enqueue_route(
                        state,
                        &history,
                        &mut not_started,
                        &mut scheduled_total,
                        loop_budget,
                        &budget_exceeded,
                        &cancellation,
                        &spec,
                        &spec.on_finish,
                    )
                    .await;
                }
            }
        }

        if let Some(spec) = state.catalog.get(&report.check_name).cloned() {
            // A cancellation-induced failure only routes through `on_fail`
            // when the caller opted in; otherwise it's left unrouted
            // (spec default: cancellation is not a routable failure).
            let skip_on_fail = report.cancelled && !options.route_on_fail_for_cancellation;
            if report.succeeded {
                enqueue_route(
                    state,
                    &history,
                    &mut not_started,
                    &mut scheduled_total,
                    loop_budget,
                    &budget_exceeded,
                    &cancellation,
                    &spec,
                    &spec.on_success,
                )
                .await;
            } else if !skip_on_fail {
                enqueue_route(
                    state,
                    &history,
                    &mut not_started,
                    &mut scheduled_total,
                    loop_budget,
                    &budget_exceeded,
                    &cancellation,
                    &spec,
                    &spec.on_fail,
                )
                .await;
            }
        }

        if report.critical_failed && options.fail_fast {
            fail_fast_tripped.store(true, Ordering::SeqCst);
        }
    }

    let total_checks = terminal.len() as u32;
    finish_run(state, &mut statistics, &mut run_result, total_checks, scheduled_total, &budget_exceeded, &terminal)
}

fn finish_run(
    state: &SchedulerState,
    statistics: &mut Statistics,
    run_result: &mut RunResult,
    total_checks: u32,
    scheduled_total: u64,
    budget_exceeded: &AtomicBool,
    terminal: &HashMap<String, TerminalInfo>,
) -> RunResult {
    let status = if budget_exceeded.load(Ordering::SeqCst) {
        state.bus.publish(EngineEvent::check_errored(
            &state.run_id,
            "<scheduler>",
            0,
            &ErrorKind::LoopBudgetExceeded.as_str(),
            "loop budget exceeded",
        ));
        RunStatus::Failed
    } else if terminal.values().any(|t| t.critical_failed) {
        RunStatus::Failed
    } else {
        RunStatus::Ok
    };

    statistics.total_checks = total_checks;
    statistics.total_iterations = scheduled_total as u32;
    run_result.status = Some(status);
    run_result.statistics = statistics.clone();

    info!(
        run_id = %state.run_id,
        status = ?status,
        total_checks = statistics.total_checks,
        total_iterations = statistics.total_iterations,
        "execution summary"
    );

    state.bus.publish(EngineEvent::run_completed(
        &state.run_id,
        match status {
            RunStatus::Ok => "ok",
            RunStatus::Failed => "failed",
            RunStatus::Error => "error",
        },
    ));
    state.bus.publish(EngineEvent::shutdown(&state.run_id));

    run_result.clone()
}

async fn abort_on_config_error(state: &SchedulerState, err: EngineErrorValue) -> RunResult {
    state.bus.publish(EngineEvent::check_errored(
        &state.run_id,
        "<config>",
        0,
        &err.kind,
        &err.message,
    ));
    state.bus.publish(EngineEvent::run_completed(&state.run_id, "error"));
    state.bus.publish(EngineEvent::shutdown(&state.run_id));
    let mut result = RunResult::default();
    result.status = Some(RunStatus::Error);
    result
}

fn record_result(
    catalog: &CheckCatalog,
    statistics: &mut Statistics,
    run_result: &mut RunResult,
    report: &IterationReport,
) {
    let group = catalog
        .get(&report.check_name)
        .and_then(|s| s.group.clone())
        .unwrap_or_else(|| "default".to_string());

    run_result.push(
        &group,
        ResultEntry {
            check_name: report.check_name.clone(),
            content: report.content.clone(),
            issues: report.issues.clone(),
            output: report.output.clone(),
        },
    );

    let stats = statistics.per_check.entry(report.check_name.clone()).or_default();
    stats.total_runs += 1;
    if report.succeeded {
        stats.successful_runs += 1;
    } else {
        stats.failed_runs += 1;
    }
    stats.total_duration_ms += report.duration_ms;
    stats.provider_duration_ms = Some(report.duration_ms);
    stats.record_issues(&report.issues);
    if let Some(items) = &report.for_each_items {
        stats.for_each_preview = Some(items.clone());
    }
}

struct ForEachTracker {
    expected: usize,
    completed: usize,
}

impl ForEachTracker {
    fn new(expected: usize) -> Self {
        Self { expected, completed: 0 }
    }
    fn note_child_done(&mut self) {
        self.completed += 1;
    }
    fn complete(&self) -> bool {
        self.completed >= self.expected
    }
}

enum DependencyVerdict {
    Ready,
    Waiting,
    Skip(SkipReason),
}

fn dependency_verdict(spec: &CheckSpec, terminal: &HashMap<String, TerminalInfo>) -> DependencyVerdict {
    if spec.depends_on.is_empty() {
        return DependencyVerdict::Ready;
    }
    for group in spec.depends_on.groups() {
        let infos: Vec<Option<&TerminalInfo>> = group.names().iter().map(|n| terminal.get(n)).collect();
        let any_succeeded = infos.iter().any(|i| i.map(|t| t.succeeded).unwrap_or(false));
        if any_succeeded {
            continue;
        }
        let all_terminal = infos.iter().all(|i| i.is_some());
        if !all_terminal {
            return DependencyVerdict::Waiting;
        }
        let any_critical_failed = infos.iter().any(|i| i.map(|t| t.critical_failed).unwrap_or(false));
        if any_critical_failed {
            return DependencyVerdict::Skip(SkipReason::DependencyFailed);
        }
        // Every alternative is terminal, none succeeded, none critical-failed:
        // a non-critical failure never blocks a dependent (invariant 3).
    }
    DependencyVerdict::Ready
}

/// Evaluates a check's `if` condition. `Err` carries the `ExprError` kind
/// string (`expr/timeout`, `expr/runtime`, `expr/type`) for a broken
/// expression, which the caller must treat as an iteration failure, not a
/// `SkipReason::ConditionFalse` skip.
async fn evaluate_if(
    state: &SchedulerState,
    history: &OutputHistory,
    spec: &CheckSpec,
) -> Result<bool, &'static str> {
    let Some(expr) = &spec.if_expr else { return Ok(true) };
    let ctx = EvalContextBuilder::new(spec.name.clone(), 0)
        .outputs(history.snapshot_latest().await)
        .build();
    state.expr.eval_bool(expr, &ctx).await.map_err(|err| err.kind())
}

fn skip_and_record(statistics: &mut Statistics, name: &str, reason: SkipReason) {
    debug!(check = name, ?reason, "check skipped");
    let stats = statistics.per_check.entry(name.to_string()).or_default();
    stats.skipped += 1;
    stats.skip_reason = Some(reason);
}

#[allow(clippy::too_many_arguments)]
fn spawn_iteration(
    state: &SchedulerState,
    history: OutputHistory,
    semaphore: Arc<Semaphore>,
    cancellation: CancellationToken,
    report_tx: mpsc::UnboundedSender<IterationReport>,
    trigger: RunTrigger,
    spec: CheckSpec,
    index: u32,
    item: Option<Value>,
    for_each_parent: Option<String>,
) {
    let dispatcher = state.dispatcher.clone();
    let expr = state.expr.clone();
    let bus = state.bus.clone();
    let human_input = state.human_input.clone();
    let run_id = state.run_id.clone();

    tokio::spawn(async move {
        let Ok(permit) = semaphore.acquire_owned().await else {
            return;
        };

        let timeout = spec
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_CHECK_TIMEOUT);

        let outputs_snapshot = history.snapshot_latest().await;
        let template_ctx = TemplateContext {
            pr: trigger
                .pull_request
                .as_ref()
                .map(|p| serde_json::to_value(p).unwrap_or(Value::Null))
                .unwrap_or(Value::Null),
            outputs: outputs_snapshot.clone(),
            env: trigger.environment.clone(),
            item: item.clone(),
        };
        let rendered_args = render(&spec.with, &template_ctx);

        let mut attempt: u32 = 1;
        let mut report = IterationReport {
            check_name: spec.name.clone(),
            succeeded: false,
            critical_failed: spec.criticality == Criticality::Critical,
            cancelled: false,
            for_each_parent: for_each_parent.clone(),
            for_each_items: None,
            output: None,
            content: None,
            issues: Vec::new(),
            duration_ms: 0,
        };

        if spec.check_type == CheckType::HttpInput {
            // Waiting on a human reply holds no parallelism slot (spec:
            // the slot is released while the iteration is `Waiting`); a
            // human-input check never dispatches to a provider, so there
            // is nothing left in this task that needs the permit.
            drop(permit);
            run_human_input_iteration(
                &bus,
                &human_input,
                &cancellation,
                &history,
                &run_id,
                &spec,
                index,
                &rendered_args,
                &mut report,
            )
            .await;
            let _ = report_tx.send(report);
            return;
        }

        'attempts: loop {
            bus.publish(EngineEvent::check_started(
                &run_id,
                &spec.name,
                index,
                &format!("{}#{attempt}", spec.name),
            ));

            if cancellation.is_cancelled() {
                bus.publish(EngineEvent::check_errored(
                    &run_id,
                    &spec.name,
                    index,
                    &ErrorKind::Cancelled.as_str(),
                    "run cancelled",
                ));
                history.append(&spec.name, Value::Null).await;
                report.cancelled = true;
                break 'attempts;
            }

            let inputs = ResolvedInputs {
                pr: template_ctx.pr.clone(),
                env: trigger.environment.clone(),
                args: rendered_args.clone(),
                item: item.clone(),
            };

            let (outcome, duration) = dispatcher
                .dispatch(&trigger, &inputs, &spec, &outputs_snapshot, timeout)
                .await;
            report.duration_ms = duration.as_millis() as u64;

            if let Some(error) = outcome.error.clone() {
                bus.publish(EngineEvent::check_errored(&run_id, &spec.name, index, &error.kind, &error.message));
                if spec.retry.should_retry(&error.kind, attempt) {
                    let delay = backoff_delay(&spec, attempt);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                    continue 'attempts;
                }
                history.append(&spec.name, Value::Null).await;
                break 'attempts;
            }

            let output = outcome.output.clone().unwrap_or(Value::Null);

            if let Some(fail_if_expr) = &spec.fail_if {
                let ctx = EvalContextBuilder::new(spec.name.clone(), index)
                    .output(output.clone())
                    .outputs(outputs_snapshot.clone())
                    .build();
                match expr.eval_bool(fail_if_expr, &ctx).await {
                    Ok(true) => {
                        let kind = ErrorKind::FailIf(spec.name.clone()).as_str();
                        bus.publish(EngineEvent::check_errored(&run_id, &spec.name, index, &kind, "fail_if evaluated true"));
                        history.append(&spec.name, output.clone()).await;
                        report.output = Some(output);
                        break 'attempts;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        // A broken fail_if expression is itself an iteration
                        // failure (no retry), not a silent pass-through.
                        bus.publish(EngineEvent::check_errored(&run_id, &spec.name, index, err.kind(), "fail_if expression failed to evaluate"));
                        history.append(&spec.name, output.clone()).await;
                        report.output = Some(output);
                        break 'attempts;
                    }
                }
            }

            // A `forEach` expression is validated before the iteration is
            // declared complete: an invalid result is an iteration failure
            // (kind `forEach/invalid`, no retry), not a success with an
            // empty fan-out, so it must be decided before `CheckCompleted`
            // is published.
            let mut for_each_items = None;
            if let Some(for_each_expr) = &spec.for_each {
                let ctx = EvalContextBuilder::new(spec.name.clone(), index)
                    .output(output.clone())
                    .outputs(outputs_snapshot.clone())
                    .build();
                match expr.eval_value(for_each_expr, &ctx).await {
                    Ok(Value::Array(items)) => for_each_items = Some(items),
                    _ => {
                        let kind = ErrorKind::ForEachInvalid.as_str();
                        bus.publish(EngineEvent::check_errored(
                            &run_id,
                            &spec.name,
                            index,
                            &kind,
                            "forEach expression did not yield an array",
                        ));
                        history.append(&spec.name, output.clone()).await;
                        report.output = Some(output);
                        break 'attempts;
                    }
                }
            }

            history.append(&spec.name, output.clone()).await;
            bus.publish(EngineEvent::check_completed(
                &run_id,
                &spec.name,
                index,
                &output,
                outcome.content.as_deref(),
                report.duration_ms,
            ));

            report.succeeded = true;
            report.critical_failed = false;
            report.output = Some(output.clone());
            report.content = outcome.content.clone();
            report.issues = outcome.issues.clone();
            report.for_each_items = for_each_items;

            break 'attempts;
        }

        let _ = report_tx.send(report);
    });
}

/// `type: http_input` checks never reach the provider dispatcher: the
/// engine itself suspends the iteration on the Human-Input Coordinator
/// (spec §4.I) instead of calling out for a result.
#[allow(clippy::too_many_arguments)]
async fn run_human_input_iteration(
    bus: &EventBus,
    human_input: &HumanInputCoordinator,
    cancellation: &CancellationToken,
    history: &OutputHistory,
    run_id: &str,
    spec: &CheckSpec,
    index: u32,
    rendered_args: &Value,
    report: &mut IterationReport,
) {
    let prompt = rendered_args.get("prompt").and_then(Value::as_str).unwrap_or("").to_string();
    let placeholder = rendered_args.get("placeholder").and_then(Value::as_str).map(String::from);
    let multiline = rendered_args.get("multiline").and_then(Value::as_bool).unwrap_or(false);
    let default = rendered_args.get("default").and_then(Value::as_str).map(String::from);
    let allow_empty = rendered_args.get("allow_empty").and_then(Value::as_bool).unwrap_or(false);
    let request_id = format!("{}#{index}", spec.name);

    human_input.register(&request_id).await;
    bus.publish(EngineEvent::human_input_requested(
        run_id,
        &spec.name,
        &prompt,
        placeholder.as_deref(),
        multiline,
        spec.timeout_ms,
        default.as_deref(),
        allow_empty,
    ));
    bus.publish(EngineEvent::state_transition(run_id, &spec.name, index, IterationState::Waiting));

    let outcome = human_input
        .wait(&request_id, spec.timeout_ms, default, cancellation.clone())
        .await;

    match outcome {
        HumanInputOutcome::Answered(value) | HumanInputOutcome::Defaulted(value) => {
            let output = serde_json::json!({ "value": value });
            history.append(&spec.name, output.clone()).await;
            bus.publish(EngineEvent::check_completed(run_id, &spec.name, index, &output, None, report.duration_ms));
            report.succeeded = true;
            report.critical_failed = false;
            report.output = Some(output);
        }
        HumanInputOutcome::TimedOut | HumanInputOutcome::Cancelled => {
            let kind = outcome.error_kind().expect("timeout/cancelled always carry a kind");
            bus.publish(EngineEvent::check_errored(run_id, &spec.name, index, &kind.as_str(), "human input not provided"));
            history.append(&spec.name, Value::Null).await;
        }
    }
}

fn backoff_delay(spec: &CheckSpec, attempt: u32) -> u64 {
    let base = spec.retry.delay_ms(attempt);
    if !spec.retry.jitter {
        return base;
    }
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    spec.name.hash(&mut hasher);
    attempt.hash(&mut hasher);
    let jitter_span = (base / 4).max(1);
    base + (hasher.finish() % jitter_span)
}

#[allow(clippy::too_many_arguments)]
async fn handle_for_each_fanout(
    state: &SchedulerState,
    history: &OutputHistory,
    not_started: &mut VecDeque<String>,
    for_each_pending: &mut HashMap<String, ForEachTracker>,
    in_flight: &mut usize,
    scheduled_total: &mut u64,
    loop_budget: u64,
    budget_exceeded: &AtomicBool,
    cancellation: &CancellationToken,
    semaphore: &Arc<Semaphore>,
    report_tx: &mpsc::UnboundedSender<IterationReport>,
    trigger: &RunTrigger,
    parent_name: &str,
    items: &[Value],
) {
    let Some(spec) = state.catalog.get(parent_name).cloned() else { return };

    if items.is_empty() || spec.children.is_empty() {
        enqueue_route(
            state,
            history,
            not_started,
            scheduled_total,
            loop_budget,
            budget_exceeded,
            cancellation,
            &spec,
            &spec.on_finish,
        )
        .await;
        return;
    }

    let expected = items.len() * spec.children.len();
    for_each_pending.insert(parent_name.to_string(), ForEachTracker::new(expected));

    'items: for (item_index, item_value) in items.iter().enumerate() {
        for child_name in &spec.children {
            if *scheduled_total >= loop_budget {
                budget_exceeded.store(true, Ordering::SeqCst);
                cancellation.cancel();
                break 'items;
            }
            let Some(child_spec) = state.catalog.get(child_name) else { continue };
            *scheduled_total += 1;
            *in_flight += 1;
            spawn_iteration(
                state,
                history.clone(),
                semaphore.clone(),
                cancellation.clone(),
                report_tx.clone(),
                trigger.clone(),
                child_spec.clone(),
                item_index as u32,
                Some(item_value.clone()),
                Some(parent_name.to_string()),
            );
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn enqueue_route(
    state: &SchedulerState,
    history: &OutputHistory,
    not_started: &mut VecDeque<String>,
    scheduled_total: &mut u64,
    loop_budget: u64,
    budget_exceeded: &AtomicBool,
    cancellation: &CancellationToken,
    spec: &CheckSpec,
    route: &RouteSpec,
) {
    if route.is_empty() {
        return;
    }
    let mut targets: Vec<String> = route.run.clone();
    if let Some(expr) = &route.run_js {
        let ctx = EvalContextBuilder::new(spec.name.clone(), 0)
            .outputs(history.snapshot_latest().await)
            .build();
        match state.expr.eval_string_list(expr, &ctx).await {
            Ok(dynamic_targets) => {
                for t in dynamic_targets {
                    if !targets.contains(&t) {
                        targets.push(t);
                    }
                }
            }
            Err(err) => {
                state.bus.publish(EngineEvent::check_errored(
                    &state.run_id,
                    &spec.name,
                    0,
                    err.kind(),
                    "run_js expression failed to evaluate",
                ));
            }
        }
    }
    for target in targets {
        if !state.catalog.contains_key(&target) {
            continue;
        }
        if *scheduled_total >= loop_budget {
            budget_exceeded.store(true, Ordering::SeqCst);
            cancellation.cancel();
            return;
        }
        if !not_started.contains(&target) {
            not_started.push_back(target);
        }
    }
}

fn requested_names(
    catalog: &CheckCatalog,
    trigger: &RunTrigger,
    options: &RunOptions,
    declared_order: &[String],
) -> Vec<String> {
    let candidates: Vec<String> = match &options.checks {
        CheckSelection::All => declared_order.to_vec(),
        CheckSelection::Named(names) => names.clone(),
    };

    candidates
        .into_iter()
        .filter(|name| {
            catalog
                .get(name)
                .map(|spec| crate::filter::is_eligible(spec, trigger.event, &options.tag_filter))
                .unwrap_or(false)
        })
        .collect()
}

pub fn event_kind_for(trigger: &RunTrigger) -> EventKind {
    trigger.event
}
