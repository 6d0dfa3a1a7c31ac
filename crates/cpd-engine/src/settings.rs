use cpd_schemas::{TargetFailurePolicy, TerminalCredentials, TerminalPolicy};

/// One target terminal as the engine sees it.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetSpec {
    pub name: String,
    pub credentials: TerminalCredentials,
    pub policy: TerminalPolicy,
}

/// Everything the engine needs for a cycle. Built once from config by the
/// caller; immutable for the lifetime of the engine.
///
/// `targets` order is processing order — the engine never reorders it, so
/// policy interactions are reproducible across runs.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineSettings {
    pub source_name: String,
    pub source_credentials: TerminalCredentials,
    pub targets: Vec<TargetSpec>,
    pub on_target_failure: TargetFailurePolicy,
}
