//! Dependency Graph Builder (spec §4.A).
//!
//! Checks are nodes identified by string name in the flat catalog map
//! (arena + index by name, spec §9); the closure is built by DFS over
//! `depends_on`, with a visiting set to catch cycles mid-traversal rather
//! than only after the fact.

use std::collections::{HashMap, HashSet};

use visor_types::check::CheckCatalog;
use visor_types::error::{EngineErrorValue, ErrorKind};

#[derive(Debug, Clone, Default)]
pub struct ClosureGraph {
    /// Check names in the order they should be first considered —
    /// (graph depth, then stable declaration order), spec §4.E "Ordering".
    pub order: Vec<String>,
    /// name -> direct dependency names (flattened OR-groups).
    pub adjacency: HashMap<String, Vec<String>>,
    /// Names present in the requested set whose initial scheduling is
    /// deferred because they are also an `on_finish` target of a check
    /// that is itself in the set (spec §4.A).
    pub deferred: HashSet<String>,
}

/// Builds the transitive dependency closure of `requested` over `catalog`.
///
/// Declaration order is taken from `declaration_order` (typically the
/// catalog's insertion/YAML order) so ties within a depth level are
/// deterministic rather than HashMap-iteration-order dependent.
pub fn build_closure(
    catalog: &CheckCatalog,
    requested: &[String],
    declaration_order: &[String],
) -> Result<ClosureGraph, EngineErrorValue> {
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut depth: HashMap<String, u32> = HashMap::new();
    let mut visiting: HashSet<String> = HashSet::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut closure: HashSet<String> = HashSet::new();

    for name in requested {
        visit(catalog, name, &mut adjacency, &mut depth, &mut visiting, &mut visited, &mut closure)?;
    }

    let declared_index: HashMap<&str, usize> = declaration_order
        .iter()
        .enumerate()
        .map(|(i, n)| (n.as_str(), i))
        .collect();

    let mut order: Vec<String> = closure.into_iter().collect();
    order.sort_by(|a, b| {
        let depth_a = depth.get(a).copied().unwrap_or(0);
        let depth_b = depth.get(b).copied().unwrap_or(0);
        depth_a
            .cmp(&depth_b)
            .then_with(|| {
                let ia = declared_index.get(a.as_str()).copied().unwrap_or(usize::MAX);
                let ib = declared_index.get(b.as_str()).copied().unwrap_or(usize::MAX);
                ia.cmp(&ib)
            })
            .then_with(|| a.cmp(b))
    });

    let deferred = compute_deferred_on_finish_targets(catalog, &order);

    Ok(ClosureGraph {
        order,
        adjacency,
        deferred,
    })
}

#[allow(clippy::too_many_arguments)]
fn visit(
    catalog: &CheckCatalog,
    name: &str,
    adjacency: &mut HashMap<String, Vec<String>>,
    depth: &mut HashMap<String, u32>,
    visiting: &mut HashSet<String>,
    visited: &mut HashSet<String>,
    closure: &mut HashSet<String>,
) -> Result<u32, EngineErrorValue> {
    if let Some(&d) = depth.get(name) {
        if visited.contains(name) {
            return Ok(d);
        }
    }
    if visiting.contains(name) {
        return Err(EngineErrorValue::new(
            ErrorKind::ConfigCycle,
            format!("dependency cycle detected involving `{name}`"),
        ));
    }
    let Some(spec) = catalog.get(name) else {
        return Err(EngineErrorValue::new(
            ErrorKind::ConfigUnknownCheck,
            format!("check `{name}` is not present in the catalog"),
        ));
    };

    visiting.insert(name.to_string());
    closure.insert(name.to_string());

    let deps = spec.depends_on.all_names();
    adjacency.entry(name.to_string()).or_insert_with(|| deps.clone());

    let mut max_child_depth = 0u32;
    for dep in &deps {
        let dep_depth = visit(catalog, dep, adjacency, depth, visiting, visited, closure)?;
        max_child_depth = max_child_depth.max(dep_depth + 1);
    }

    visiting.remove(name);
    visited.insert(name.to_string());
    depth.insert(name.to_string(), max_child_depth);
    Ok(max_child_depth)
}

/// spec §4.A: "When a check declares `on_finish.run: [T]` and both the
/// declaring check and T are in the initial set, T is deferred."
fn compute_deferred_on_finish_targets(
    catalog: &CheckCatalog,
    closure_order: &[String],
) -> HashSet<String> {
    let in_closure: HashSet<&str> = closure_order.iter().map(String::as_str).collect();
    let mut deferred = HashSet::new();
    for name in closure_order {
        let Some(spec) = catalog.get(name) else { continue };
        for target in &spec.on_finish.run {
            if in_closure.contains(target.as_str()) {
                deferred.insert(target.clone());
            }
        }
    }
    deferred
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use visor_types::check::catalog_from_map;

    fn spec(yaml_like: serde_json::Value) -> visor_types::check::CheckSpec {
        serde_json::from_value(yaml_like).unwrap()
    }

    fn catalog() -> visor_types::check::CheckCatalog {
        let mut map = Map::new();
        map.insert("a".to_string(), spec(serde_json::json!({ "type": "command" })));
        map.insert(
            "b".to_string(),
            spec(serde_json::json!({ "type": "command", "depends_on": "a" })),
        );
        map.insert(
            "c".to_string(),
            spec(serde_json::json!({ "type": "command", "depends_on": "b" })),
        );
        catalog_from_map(map)
    }

    #[test]
    fn linear_chain_orders_by_depth_then_declaration() {
        let catalog = catalog();
        let declared = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let closure = build_closure(&catalog, &["c".to_string()], &declared).unwrap();
        assert_eq!(closure.order, vec!["a", "b", "c"]);
    }

    #[test]
    fn closure_building_is_deterministic_across_calls() {
        let catalog = catalog();
        let declared = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let first = build_closure(&catalog, &["c".to_string()], &declared).unwrap();
        let second = build_closure(&catalog, &["c".to_string()], &declared).unwrap();
        assert_eq!(first.order, second.order);
    }

    #[test]
    fn cycle_is_detected() {
        let mut map = Map::new();
        map.insert(
            "a".to_string(),
            spec(serde_json::json!({ "type": "command", "depends_on": "b" })),
        );
        map.insert(
            "b".to_string(),
            spec(serde_json::json!({ "type": "command", "depends_on": "a" })),
        );
        let catalog = catalog_from_map(map);
        let declared = vec!["a".to_string(), "b".to_string()];
        let err = build_closure(&catalog, &["a".to_string()], &declared).unwrap_err();
        assert_eq!(err.kind, "config/cycle");
    }

    #[test]
    fn unknown_dependency_is_reported() {
        let mut map = Map::new();
        map.insert(
            "a".to_string(),
            spec(serde_json::json!({ "type": "command", "depends_on": "missing" })),
        );
        let catalog = catalog_from_map(map);
        let declared = vec!["a".to_string()];
        let err = build_closure(&catalog, &["a".to_string()], &declared).unwrap_err();
        assert_eq!(err.kind, "config/unknown-check");
    }

    #[test]
    fn on_finish_target_present_in_initial_set_is_deferred() {
        let mut map = Map::new();
        map.insert(
            "extract".to_string(),
            spec(serde_json::json!({
                "type": "command",
                "on_finish": { "run": ["aggregate"] },
            })),
        );
        map.insert("aggregate".to_string(), spec(serde_json::json!({ "type": "command" })));
        let catalog = catalog_from_map(map);
        let declared = vec!["extract".to_string(), "aggregate".to_string()];
        let closure = build_closure(
            &catalog,
            &["extract".to_string(), "aggregate".to_string()],
            &declared,
        )
        .unwrap();
        assert!(closure.deferred.contains("aggregate"));
        assert!(!closure.deferred.contains("extract"));
    }
}
