//! Semantic validation of a merged configuration.
//!
//! Rules accumulate into a `Vec<String>` of human-readable messages rather
//! than failing on the first violation, so an operator fixes a config in one
//! pass. Shape errors (wrong types, unknown enum names) are caught earlier,
//! at deserialization.

use std::collections::BTreeSet;

use cpd_schemas::TerminalCredentials;
use serde_json::Value;

use crate::model::{Config, ExecutionMode};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate `config` against the raw merged document (`merged` is consulted
/// only for checks the typed model cannot express, like literal-password
/// detection). Returns an empty vector when the config is usable.
pub fn validate(config: &Config, merged: &Value) -> Vec<String> {
    let mut errors = Vec::new();

    validate_credentials(&mut errors, &config.source.credentials, "source");

    if config.targets.is_empty() {
        errors.push("at least one target terminal must be configured".to_string());
    }

    let mut seen_names = BTreeSet::new();
    for target in &config.targets {
        let label = format!("target '{}'", target.name);
        if target.name.trim().is_empty() {
            errors.push("target name must not be empty".to_string());
        } else if !seen_names.insert(target.name.as_str()) {
            errors.push(format!("duplicate target name '{}'", target.name));
        }
        if target.name == config.source.name {
            errors.push(format!(
                "{label}: name collides with the source terminal"
            ));
        }

        validate_credentials(&mut errors, &target.credentials, &label);

        let p = &target.policy;
        if !p.lot_multiplier.is_finite() || p.lot_multiplier <= 0.0 {
            errors.push(format!(
                "{label}: lot_multiplier must be a finite positive number"
            ));
        }
        if !p.min_lot.is_finite() || p.min_lot <= 0.0 {
            errors.push(format!("{label}: min_lot must be a positive number"));
        }
        if !p.max_lot.is_finite() || p.max_lot <= 0.0 {
            errors.push(format!("{label}: max_lot must be a positive number"));
        }
        if p.min_lot >= p.max_lot {
            errors.push(format!("{label}: min_lot must be less than max_lot"));
        }
        if p.max_orphan_checks == 0 {
            errors.push(format!("{label}: max_orphan_checks must be at least 1"));
        }
        if let Some(cap) = &p.max_pending_orders {
            if cap.enabled && cap.limit == 0 {
                errors.push(format!(
                    "{label}: max_pending_orders.limit must be positive when enabled"
                ));
            }
        }
    }

    match config.run.mode {
        ExecutionMode::Interval => {
            if config.run.interval_secs == 0 {
                errors.push("run.interval_secs must be positive in interval mode".to_string());
            }
        }
        ExecutionMode::Continuous => {
            if config.run.max_runtime_hours < 0.0 {
                errors.push("run.max_runtime_hours must not be negative".to_string());
            }
        }
        ExecutionMode::Once => {}
    }

    match config.gateway.kind.as_str() {
        "sim" => {
            if config.gateway.fixture.is_none() {
                errors.push("gateway.fixture is required when gateway.kind is 'sim'".to_string());
            }
        }
        other => errors.push(format!("unknown gateway.kind '{other}'")),
    }

    if !LOG_LEVELS.contains(&config.logging.level.as_str()) {
        errors.push(format!(
            "logging.level must be one of {}, got '{}'",
            LOG_LEVELS.join("/"),
            config.logging.level
        ));
    }

    find_literal_passwords(merged, "", &mut errors);

    errors
}

fn validate_credentials(errors: &mut Vec<String>, creds: &TerminalCredentials, label: &str) {
    if creds.server.trim().is_empty() {
        errors.push(format!("{label}: server is required"));
    }
    if creds.account == 0 {
        errors.push(format!("{label}: account is required"));
    }
    if creds.password_env.trim().is_empty() {
        errors.push(format!("{label}: password_env is required"));
    }
}

/// Reject literal credentials anywhere in the document. Passwords reach the
/// gateway through environment variables named by `password_env`; a
/// `password:` key means someone pasted a secret into a config file.
fn find_literal_passwords(value: &Value, path: &str, errors: &mut Vec<String>) {
    if let Value::Object(map) = value {
        for (key, child) in map {
            let child_path = format!("{path}/{key}");
            if key == "password" {
                errors.push(format!(
                    "literal password at {child_path}: use password_env naming an environment variable"
                ));
            }
            find_literal_passwords(child, &child_path, errors);
        }
    }
}
