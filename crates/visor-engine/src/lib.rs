//! Check Execution Engine: dependency graph, scheduler, event bus, sessions.
//!
//! [`Engine::run`] is the single primary operation (spec §6.1): given a
//! [`RunTrigger`] and [`RunOptions`], it builds the dependency closure,
//! drives the scheduler to completion, and returns a [`RunResult`]. Progress
//! is observable only through the event bus (spec §4.F) — `run` itself
//! returns once, at the end.

pub mod bus;
pub mod filter;
pub mod graph;
pub mod history;
pub mod human_input;
pub mod render;
pub mod scheduler;
pub mod session;

use std::sync::Arc;

use visor_expr::ExprEngine;
use visor_providers::{ProviderDispatcher, ProviderRegistry};
use visor_types::check::CheckCatalog;
use visor_types::result::RunResult;
use visor_types::trigger::{RunOptions, RunTrigger};

use bus::{EventBus, FrontendContext, FrontendHost};
use human_input::HumanInputCoordinator;
use scheduler::SchedulerState;
use session::SessionRegistry;

/// Everything the engine needs to execute a catalog that outlives any
/// single run: the provider registry, expression sandbox, event bus,
/// session registry, and human-input coordinator are all process-wide
/// (per engine instance), while [`scheduler::execute`] owns the
/// per-run state (iteration bookkeeping, loop budget, cancellation).
pub struct Engine {
    catalog: Arc<CheckCatalog>,
    declared_order: Vec<String>,
    dispatcher: ProviderDispatcher,
    expr: ExprEngine,
    bus: EventBus,
    sessions: SessionRegistry,
    human_input: HumanInputCoordinator,
    frontends: FrontendHost,
}

impl Engine {
    /// Builds an engine over a resolved catalog (no `extends` merging —
    /// that happens upstream, e.g. in `visor-config`) and its declaration
    /// order (for deterministic tie-breaking in the dependency closure).
    pub fn new(catalog: CheckCatalog, declared_order: Vec<String>) -> Self {
        Self {
            catalog: Arc::new(catalog),
            declared_order,
            dispatcher: ProviderDispatcher::new(ProviderRegistry::with_builtins()),
            expr: ExprEngine::default(),
            bus: EventBus::new(),
            sessions: SessionRegistry::new(),
            human_input: HumanInputCoordinator::new(),
            frontends: FrontendHost::default(),
        }
    }

    /// Swaps in a non-default provider registry, e.g. to register test
    /// doubles or additional capability tags before the first run.
    pub fn with_provider_registry(mut self, registry: ProviderRegistry) -> Self {
        self.dispatcher = ProviderDispatcher::new(registry);
        self
    }

    pub fn with_frontends(mut self, frontends: FrontendHost) -> Self {
        self.frontends = frontends;
        self
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<visor_types::event::EngineEvent> {
        self.bus.subscribe()
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn human_input(&self) -> &HumanInputCoordinator {
        &self.human_input
    }

    /// Executes one run to completion (spec §6.1). `run_id` identifies the
    /// run across the bus, logs, and any frontend rendering it.
    pub async fn run(&self, run_id: impl Into<String>, trigger: RunTrigger, options: RunOptions) -> RunResult {
        let run_id = run_id.into();

        self.frontends
            .start_all(FrontendContext {
                bus: self.bus.clone(),
                run_id: run_id.clone(),
            })
            .await;

        let state = SchedulerState {
            catalog: self.catalog.clone(),
            dispatcher: self.dispatcher.clone(),
            expr: self.expr.clone(),
            bus: self.bus.clone(),
            human_input: self.human_input.clone(),
            run_id: run_id.clone(),
        };

        let result = scheduler::execute(&state, trigger, options, &self.declared_order).await;

        self.frontends.stop_all().await;
        self.sessions.shutdown().await;

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use visor_types::check::catalog_from_map;
    use visor_types::result::RunStatus;
    use visor_types::trigger::{RepositoryCoordinates, RunTrigger};

    fn trigger() -> RunTrigger {
        RunTrigger::manual(
            RepositoryCoordinates {
                owner: "acme".into(),
                name: "widgets".into(),
                default_branch: Some("main".into()),
            },
            "octocat",
        )
    }

    fn catalog(yaml_like: serde_json::Value) -> (CheckCatalog, Vec<String>) {
        let map: HashMap<String, serde_json::Value> = serde_json::from_value(yaml_like).unwrap();
        let order: Vec<String> = map.keys().cloned().collect();
        let mut specs = HashMap::new();
        for (name, value) in map {
            specs.insert(name, serde_json::from_value(value).unwrap());
        }
        (catalog_from_map(specs), order)
    }

    #[tokio::test]
    async fn linear_chain_runs_to_ok() {
        let (catalog, order) = catalog(serde_json::json!({
            "fetch": { "type": "noop" },
            "build": { "type": "noop", "depends_on": "fetch" },
            "test": { "type": "noop", "depends_on": "build" },
        }));
        let engine = Engine::new(catalog, order);
        let result = engine.run("run-1", trigger(), RunOptions::default()).await;
        assert_eq!(result.status, Some(RunStatus::Ok));
        assert_eq!(result.statistics.total_checks, 3);
    }

    #[tokio::test]
    async fn critical_failure_marks_run_failed_and_skips_dependent() {
        let (catalog, order) = catalog(serde_json::json!({
            "lint": { "type": "command", "with": { "command": "exit 1" } },
            "deploy": { "type": "noop", "depends_on": "lint" },
        }));
        let engine = Engine::new(catalog, order);
        let result = engine.run("run-2", trigger(), RunOptions::default()).await;
        assert_eq!(result.status, Some(RunStatus::Failed));
    }

    #[tokio::test]
    async fn non_critical_failure_does_not_block_dependents() {
        let (catalog, order) = catalog(serde_json::json!({
            "lint": {
                "type": "command",
                "with": { "command": "exit 1" },
                "criticality": "non-critical",
            },
            "report": { "type": "noop", "depends_on": "lint" },
        }));
        let engine = Engine::new(catalog, order);
        let result = engine.run("run-3", trigger(), RunOptions::default()).await;
        assert_eq!(result.status, Some(RunStatus::Ok));
        let report_stats = result.statistics.per_check.get("report").unwrap();
        assert_eq!(report_stats.successful_runs, 1);
    }
}
