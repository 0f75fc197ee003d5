//! Typed configuration the engine consumes (spec §6.6): deserialization
//! only, no `extends` merging and no schema validation beyond what serde's
//! `#[serde(default)]` gives for free — that machinery is explicitly out of
//! scope and lives upstream of this crate.

use std::collections::HashMap;
use std::path::Path;

use serde::de::Error as _;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use visor_types::check::{catalog_from_map, CheckCatalog, CheckSpec};
use visor_types::trigger::{CheckSelection, RunOptions, TagFilter};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("check `{name}`: {source}")]
    Check {
        name: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// `frontends: [ { name, config? } ]` (spec §6.6) — wiring a name to an
/// actual `Frontend` implementation is a host concern, not this crate's.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FrontendSpec {
    pub name: String,
    #[serde(default)]
    pub config: Value,
}

/// The subset of the on-disk config the engine reads (spec §6.6). `checks`
/// is kept as a `serde_yaml::Mapping` rather than a `HashMap<String,
/// CheckSpec>` so that declaration order can still be recovered by
/// [`EngineConfig::into_catalog`] — the flat map the engine itself consumes
/// has no ordering of its own.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    checks: serde_yaml::Mapping,
    #[serde(default)]
    pub max_parallelism: Option<usize>,
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default)]
    pub tag_filter: TagFilter,
    #[serde(default)]
    pub frontends: Vec<FrontendSpec>,
    #[serde(default)]
    pub policy: Option<Value>,
    #[serde(default)]
    pub ai_provider: Option<String>,
    #[serde(default)]
    pub ai_model: Option<String>,
}

impl EngineConfig {
    /// Resolves `checks` into the catalog the engine consumes, plus the
    /// declaration order `graph::build_closure` uses to break ties
    /// deterministically (spec §4.A "Ordering").
    pub fn into_catalog(self) -> Result<(CheckCatalog, Vec<String>), ConfigError> {
        let mut declared_order = Vec::with_capacity(self.checks.len());
        let mut specs = HashMap::with_capacity(self.checks.len());

        for (key, value) in self.checks {
            let name = key.as_str().ok_or_else(|| ConfigError::Check {
                name: "<non-string check name>".to_string(),
                source: serde_yaml::Error::custom("check names must be strings"),
            })?;
            let spec: CheckSpec = serde_yaml::from_value(value).map_err(|source| ConfigError::Check {
                name: name.to_string(),
                source,
            })?;
            declared_order.push(name.to_string());
            specs.insert(name.to_string(), spec);
        }

        Ok((catalog_from_map(specs), declared_order))
    }

    /// Builds the `RunOptions` half of a run from this config's engine-wide
    /// settings, layering in the caller's check selection (spec §6.1 —
    /// `options.checks` comes from the run request, not the static config).
    pub fn to_run_options(&self, checks: CheckSelection) -> RunOptions {
        RunOptions {
            checks,
            tag_filter: self.tag_filter.clone(),
            max_parallelism: self.max_parallelism,
            timeout_ms: None,
            fail_fast: self.fail_fast,
            debug: false,
            loop_budget: None,
            route_on_fail_for_cancellation: false,
        }
    }
}

pub fn from_yaml_str(yaml: &str) -> Result<EngineConfig, ConfigError> {
    Ok(serde_yaml::from_str(yaml)?)
}

pub async fn load_from_path(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
    let path_ref = path.as_ref();
    let raw = tokio::fs::read_to_string(path_ref)
        .await
        .map_err(|source| ConfigError::Io {
            path: path_ref.display().to_string(),
            source,
        })?;
    from_yaml_str(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
max_parallelism: 4
fail_fast: true
tag_filter:
  include: ["fast"]
checks:
  fetch:
    type: command
    with:
      command: "git fetch"
  build:
    type: command
    depends_on: fetch
    with:
      command: "cargo build"
  test:
    type: command
    depends_on: build
    with:
      command: "cargo test"
"#;

    #[test]
    fn parses_engine_wide_settings() {
        let config = from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.max_parallelism, Some(4));
        assert!(config.fail_fast);
        assert_eq!(config.tag_filter.include, vec!["fast".to_string()]);
    }

    #[test]
    fn into_catalog_preserves_declaration_order() {
        let config = from_yaml_str(SAMPLE).unwrap();
        let (catalog, order) = config.into_catalog().unwrap();
        assert_eq!(order, vec!["fetch", "build", "test"]);
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog["build"].name, "build");
        assert_eq!(catalog["build"].depends_on.all_names(), vec!["fetch"]);
    }

    #[test]
    fn unknown_check_name_type_is_rejected() {
        let yaml = "checks:\n  123: { type: command }\n";
        let config = from_yaml_str(yaml).unwrap();
        let err = config.into_catalog().unwrap_err();
        assert!(matches!(err, ConfigError::Check { .. }));
    }
}
