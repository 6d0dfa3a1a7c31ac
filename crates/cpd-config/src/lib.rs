//! Layered YAML configuration for CopyDesk.
//!
//! Documents merge in argument order — earlier files are the base, later
//! files override (deep merge on objects, replace on everything else). The
//! merged document is canonicalized and SHA-256 hashed so two operators can
//! compare effective configs by hash alone (`cpd config hash`).

mod model;
mod validate;

pub use model::{
    Config, ExecutionMode, GatewayConfig, LoggingConfig, RunConfig, SourceConfig, StateConfig,
    TargetConfig,
};
pub use validate::validate;

use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// A merged, typed, hashed configuration.
#[derive(Clone, Debug)]
pub struct LoadedConfig {
    pub config: Config,
    /// SHA-256 of the canonical merged JSON.
    pub config_hash: String,
    pub canonical_json: String,
    /// Raw merged document, kept for checks the typed model cannot express.
    pub merged: Value,
}

impl LoadedConfig {
    /// Run semantic validation; empty when the config is usable.
    pub fn validation_errors(&self) -> Vec<String> {
        validate(&self.config, &self.merged)
    }
}

/// Load and merge YAML documents from `paths`, in order.
pub fn load_layered_yaml(paths: &[impl AsRef<Path>]) -> Result<LoadedConfig> {
    let mut docs = Vec::with_capacity(paths.len());
    for p in paths {
        let p = p.as_ref();
        let raw = fs::read_to_string(p)
            .with_context(|| format!("failed to read config: {}", p.display()))?;
        docs.push(raw);
    }
    let refs: Vec<&str> = docs.iter().map(String::as_str).collect();
    load_layered_yaml_from_strings(&refs)
}

/// String-input variant of [`load_layered_yaml`], for tests and embedding.
pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = serde_json::json!({});
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        merged = deep_merge(merged, v_json);
    }

    let config: Config =
        serde_json::from_value(merged.clone()).context("config shape invalid")?;

    let canonical_json = serde_json::to_string(&merged).context("canonical json failed")?;
    let config_hash = sha256_hex(canonical_json.as_bytes());

    Ok(LoadedConfig {
        config,
        config_hash,
        canonical_json,
        merged,
    })
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpd_schemas::TargetFailurePolicy;

    const BASE: &str = r#"
source:
  server: Broker-A
  account: 111
  password_env: CPD_SOURCE_PASSWORD
targets:
  - name: t1
    server: Broker-B
    account: 222
    password_env: CPD_T1_PASSWORD
    policy:
      lot_multiplier: 0.5
      min_lot: 0.01
      max_lot: 10.0
      allowed_order_types: [BUY_LIMIT, SELL_LIMIT]
      symbol_map:
        EURUSD: EURUSD.x
      kill_orphan_orders: true
      max_orphan_checks: 3
      max_pending_orders:
        enabled: true
        limit: 30
gateway:
  kind: sim
  fixture: fixtures/book.json
"#;

    #[test]
    fn base_document_loads_and_validates_clean() {
        let loaded = load_layered_yaml_from_strings(&[BASE]).unwrap();
        assert!(loaded.validation_errors().is_empty());

        let cfg = &loaded.config;
        assert_eq!(cfg.source.name, "source");
        assert_eq!(cfg.targets.len(), 1);
        assert_eq!(cfg.targets[0].policy.symbol_map["EURUSD"], "EURUSD.x");
        assert_eq!(cfg.run.mode, ExecutionMode::Once);
        assert_eq!(cfg.run.on_target_failure, TargetFailurePolicy::Isolate);
    }

    #[test]
    fn later_documents_override_earlier() {
        let overlay = r#"
run:
  mode: interval
  interval_secs: 30
  on_target_failure: fail-fast
"#;
        let loaded = load_layered_yaml_from_strings(&[BASE, overlay]).unwrap();
        assert_eq!(loaded.config.run.mode, ExecutionMode::Interval);
        assert_eq!(loaded.config.run.interval_secs, 30);
        assert_eq!(
            loaded.config.run.on_target_failure,
            TargetFailurePolicy::FailFast
        );
        // Untouched sections survive the overlay.
        assert_eq!(loaded.config.targets[0].credentials.account, 222);
    }

    #[test]
    fn hash_is_stable_and_overlay_sensitive() {
        let a = load_layered_yaml_from_strings(&[BASE]).unwrap();
        let b = load_layered_yaml_from_strings(&[BASE]).unwrap();
        assert_eq!(a.config_hash, b.config_hash);

        let c = load_layered_yaml_from_strings(&[BASE, "logging:\n  level: debug\n"]).unwrap();
        assert_ne!(a.config_hash, c.config_hash);
    }

    #[test]
    fn validation_enumerates_every_violation() {
        let bad = r#"
source:
  server: ""
  account: 0
  password_env: CPD_SOURCE_PASSWORD
targets:
  - name: t1
    server: Broker-B
    account: 222
    password_env: CPD_T1_PASSWORD
    policy:
      lot_multiplier: -2.0
      min_lot: 5.0
      max_lot: 1.0
      allowed_order_types: []
      max_orphan_checks: 0
gateway:
  kind: sim
"#;
        let loaded = load_layered_yaml_from_strings(&[bad]).unwrap();
        let errors = loaded.validation_errors();
        let text = errors.join("\n");
        assert!(text.contains("source: server is required"), "{text}");
        assert!(text.contains("source: account is required"), "{text}");
        assert!(text.contains("lot_multiplier"), "{text}");
        assert!(text.contains("min_lot must be less than max_lot"), "{text}");
        assert!(text.contains("max_orphan_checks"), "{text}");
        assert!(text.contains("gateway.fixture is required"), "{text}");
        assert!(errors.len() >= 6, "expected every violation listed: {errors:?}");
    }

    #[test]
    fn literal_password_is_rejected() {
        let leaky = BASE.replace(
            "password_env: CPD_SOURCE_PASSWORD",
            "password_env: CPD_SOURCE_PASSWORD\n  password: hunter2",
        );
        let loaded = load_layered_yaml_from_strings(&[leaky.as_str()]).unwrap();
        let errors = loaded.validation_errors();
        assert!(
            errors.iter().any(|e| e.contains("literal password")),
            "{errors:?}"
        );
    }

    #[test]
    fn duplicate_target_names_are_rejected() {
        let doc = r#"
source:
  server: Broker-A
  account: 111
  password_env: CPD_SOURCE_PASSWORD
targets:
  - name: t1
    server: Broker-B
    account: 222
    password_env: CPD_T1_PASSWORD
    policy: { lot_multiplier: 1.0, min_lot: 0.01, max_lot: 10.0, allowed_order_types: [BUY_LIMIT], max_orphan_checks: 1 }
  - name: t1
    server: Broker-C
    account: 333
    password_env: CPD_T2_PASSWORD
    policy: { lot_multiplier: 1.0, min_lot: 0.01, max_lot: 10.0, allowed_order_types: [BUY_LIMIT], max_orphan_checks: 1 }
gateway: { kind: sim, fixture: book.json }
"#;
        let loaded = load_layered_yaml_from_strings(&[doc]).unwrap();
        assert!(loaded
            .validation_errors()
            .iter()
            .any(|e| e.contains("duplicate target name")));
    }
}
