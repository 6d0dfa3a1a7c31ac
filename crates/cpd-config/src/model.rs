use std::path::PathBuf;

use cpd_schemas::{TargetFailurePolicy, TerminalCredentials, TerminalPolicy};
use serde::{Deserialize, Serialize};

/// The authoritative source terminal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_name")]
    pub name: String,
    #[serde(flatten)]
    pub credentials: TerminalCredentials,
}

fn default_source_name() -> String {
    "source".to_string()
}

/// One target terminal: credentials plus its risk policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    #[serde(flatten)]
    pub credentials: TerminalCredentials,
    pub policy: TerminalPolicy,
}

/// Execution mode selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Once,
    Interval,
    Continuous,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Once => "once",
            ExecutionMode::Interval => "interval",
            ExecutionMode::Continuous => "continuous",
        }
    }
}

/// Scheduling parameters for the cycle controller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub mode: ExecutionMode,
    /// Interval mode: seconds between cycle starts.
    pub interval_secs: u64,
    /// Interval mode: 0 = unlimited iterations.
    pub max_iterations: u64,
    /// Continuous mode: delay between back-to-back cycles.
    pub delay_secs: u64,
    /// Continuous mode: 0 = unlimited runtime.
    pub max_runtime_hours: f64,
    pub on_target_failure: TargetFailurePolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Once,
            interval_secs: 60,
            max_iterations: 0,
            delay_secs: 5,
            max_runtime_hours: 0.0,
            on_target_failure: TargetFailurePolicy::Isolate,
        }
    }
}

/// Which gateway implementation the CLI wires in. `sim` is the in-repo
/// deterministic simulator; real venue adapters register additional kinds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub kind: String,
    /// `sim` only: path to the venue-book fixture.
    pub fixture: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            kind: "sim".to_string(),
            fixture: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/state.json"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// The fully-merged, typed configuration document.
///
/// `targets` is a list, not a map: target order is configuration order and
/// the engine processes targets in exactly this order every cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub targets: Vec<TargetConfig>,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}
