//! `cpd state` — operator escape hatches over the reconciliation state file.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use cpd_state::StateStore;

pub fn show(state_path: &str) -> Result<ExitCode> {
    super::init_tracing("warn");
    let store = StateStore::load(state_path);
    let summary = store.summary();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(ExitCode::SUCCESS)
}

pub fn export(state_path: &str, to: &str) -> Result<ExitCode> {
    super::init_tracing("warn");
    let store = StateStore::load(state_path);
    store.export(Path::new(to))?;
    println!("exported {state_path} -> {to}");
    Ok(ExitCode::SUCCESS)
}

pub fn import(state_path: &str, from: &str) -> Result<ExitCode> {
    super::init_tracing("warn");
    let mut store = StateStore::load(state_path);
    store.import(Path::new(from))?;
    store.save()?;
    println!("imported {from} -> {state_path}");
    Ok(ExitCode::SUCCESS)
}
