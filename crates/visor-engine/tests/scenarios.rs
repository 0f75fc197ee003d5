//! End-to-end scenario coverage over the public `Engine::run` contract,
//! exercising the cross-component behaviors a single unit test can't:
//! OR-dependency satisfaction, forEach fan-out + on_finish, fail-fast's
//! stop-scheduling-not-cancel semantics, retry/backoff, human-input
//! suspension, and the loop-budget guard.

use std::collections::HashMap;

use serde_json::json;

use visor_engine::Engine;
use visor_types::check::{catalog_from_map, CheckCatalog, CheckSpec};
use visor_types::result::RunStatus;
use visor_types::trigger::{CheckSelection, RepositoryCoordinates, RunOptions, RunTrigger};

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
    let mut specs: HashMap<String, CheckSpec> = HashMap::new();
    for (name, value) in map {
        specs.insert(name, serde_json::from_value(value).unwrap());
    }
    (catalog_from_map(specs), order)
}

#[tokio::test]
async fn or_dependency_is_satisfied_by_whichever_branch_succeeds() {
    let (cat, order) = catalog(json!({
        "primary": { "type": "command", "with": { "command": "exit 1" } },
        "fallback": { "type": "noop" },
        "deploy": { "type": "noop", "depends_on": "primary|fallback" },
    }));
    let engine = Engine::new(cat, order);
    let result = engine.run("s1", trigger(), RunOptions::default()).await;

    assert_eq!(result.status, Some(RunStatus::Ok));
    let deploy_stats = result.statistics.per_check.get("deploy").unwrap();
    assert_eq!(deploy_stats.successful_runs, 1);
}

#[tokio::test]
async fn for_each_fan_out_runs_every_child_then_on_finish() {
    let (cat, order) = catalog(json!({
        "discover": {
            "type": "noop",
            "forEach": "[1, 2, 3]",
            "children": ["process"],
            "on_finish": { "run": ["summarize"] },
        },
        "process": { "type": "noop" },
        "summarize": { "type": "noop" },
    }));
    let engine = Engine::new(cat, order);
    let options = RunOptions {
        checks: CheckSelection::Named(vec!["discover".to_string()]),
        ..Default::default()
    };
    let result = engine.run("s2", trigger(), options).await;

    assert_eq!(result.status, Some(RunStatus::Ok));
    let process_stats = result.statistics.per_check.get("process").unwrap();
    assert_eq!(process_stats.total_runs, 3);
    assert_eq!(process_stats.successful_runs, 3);
    assert!(result.statistics.per_check.contains_key("summarize"));
}

#[tokio::test]
async fn fail_fast_stops_newly_routed_work_after_a_critical_failure() {
    let (cat, order) = catalog(json!({
        "lint": {
            "type": "command",
            "with": { "command": "exit 1" },
            "on_fail": { "run": ["followup"] },
        },
        "followup": { "type": "noop" },
    }));
    let engine = Engine::new(cat, order);
    let options = RunOptions {
        checks: CheckSelection::Named(vec!["lint".to_string()]),
        fail_fast: true,
        ..Default::default()
    };
    let result = engine.run("s3", trigger(), options).await;

    assert_eq!(result.status, Some(RunStatus::Failed));
    let followup_stats = result.statistics.per_check.get("followup").unwrap();
    assert_eq!(followup_stats.skipped, 1);
}

#[tokio::test]
async fn a_retryable_provider_error_succeeds_on_the_second_attempt() {
    let marker = std::env::temp_dir().join(format!("visor-scenario-retry-{}", std::process::id()));
    let marker_path = marker.to_string_lossy().to_string();
    let _ = std::fs::remove_file(&marker_path);
    let command = format!("if [ -f {0} ]; then exit 0; else touch {0}; exit 1; fi", marker_path);

    let (cat, order) = catalog(json!({
        "flaky": {
            "type": "command",
            "with": { "command": command },
            "retry": { "max": 2, "base_ms": 5, "cap_ms": 50, "retry_on": ["provider/fatal"] },
        },
    }));
    let engine = Engine::new(cat, order);
    let result = engine.run("s4", trigger(), RunOptions::default()).await;

    let _ = std::fs::remove_file(&marker_path);
    assert_eq!(result.status, Some(RunStatus::Ok));
    // One IterationReport covers the whole attempts loop, so `total_runs`
    // counts the iteration once even though the command ran twice inside it.
    let stats = result.statistics.per_check.get("flaky").unwrap();
    assert_eq!(stats.total_runs, 1);
    assert_eq!(stats.successful_runs, 1);
}

#[tokio::test]
async fn human_input_timeout_without_a_default_fails_the_check() {
    let (cat, order) = catalog(json!({
        "confirm": {
            "type": "http_input",
            "timeout_ms": 20,
            "with": { "prompt": "Proceed?" },
        },
    }));
    let engine = Engine::new(cat, order);
    let result = engine.run("s5a", trigger(), RunOptions::default()).await;

    assert_eq!(result.status, Some(RunStatus::Failed));
    let stats = result.statistics.per_check.get("confirm").unwrap();
    assert_eq!(stats.failed_runs, 1);
}

#[tokio::test]
async fn human_input_timeout_with_a_default_succeeds() {
    let (cat, order) = catalog(json!({
        "confirm": {
            "type": "http_input",
            "timeout_ms": 20,
            "with": { "prompt": "Proceed?", "default": "yes" },
        },
    }));
    let engine = Engine::new(cat, order);
    let result = engine.run("s5b", trigger(), RunOptions::default()).await;

    assert_eq!(result.status, Some(RunStatus::Ok));
    let entries = result.results.get("default").expect("confirm recorded under the default group");
    let entry = entries.iter().find(|e| e.check_name == "confirm").unwrap();
    assert_eq!(entry.output, Some(json!({ "value": "yes" })));
}

#[tokio::test]
async fn loop_budget_guard_stops_a_self_routing_cycle() {
    let (cat, order) = catalog(json!({
        "looper": {
            "type": "noop",
            "on_success": { "run": ["looper"] },
        },
    }));
    let engine = Engine::new(cat, order);
    let options = RunOptions {
        loop_budget: Some(5),
        ..Default::default()
    };
    let result = engine.run("s6", trigger(), options).await;

    assert_eq!(result.status, Some(RunStatus::Failed));
    assert!(result.statistics.total_iterations >= 5);
}
