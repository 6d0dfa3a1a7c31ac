//! `cpd` — CopyDesk command-line interface.
//!
//! Exit codes follow CLI convention: 0 on success, 1 on initialization or
//! run failure.

mod commands;

use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "cpd")]
#[command(about = "CopyDesk: mirror pending orders and positions across terminals", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reconciliation loop against the configured terminals
    Run {
        /// Config paths in merge order (base -> overrides)
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,

        /// Override the config's run.mode
        #[arg(long)]
        mode: Option<ModeArg>,
    },

    /// Configuration utilities
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },

    /// Reconciliation-state utilities
    State {
        #[command(subcommand)]
        cmd: StateCmd,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Once,
    Interval,
    Continuous,
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Validate the layered config; lists every violation
    Validate {
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,
    },

    /// Print the canonical merged JSON and its hash
    Hash {
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum StateCmd {
    /// Print a summary of the state file
    Show {
        #[arg(long)]
        state: String,
    },

    /// Copy the state file to a recovery location
    Export {
        #[arg(long)]
        state: String,
        #[arg(long)]
        to: String,
    },

    /// Replace the state file with a previously exported document
    Import {
        #[arg(long)]
        state: String,
        #[arg(long)]
        from: String,
    },
}

fn main() -> ExitCode {
    // Dev-time env bootstrap for *_PASSWORD variables; absence is fine.
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let outcome = match cli.cmd {
        Commands::Run { config_paths, mode } => {
            commands::run::execute(&config_paths, mode.map(Into::into))
        }
        Commands::Config { cmd } => match cmd {
            ConfigCmd::Validate { config_paths } => commands::config::validate(&config_paths),
            ConfigCmd::Hash { config_paths } => commands::config::hash(&config_paths),
        },
        Commands::State { cmd } => match cmd {
            StateCmd::Show { state } => commands::state::show(&state),
            StateCmd::Export { state, to } => commands::state::export(&state, &to),
            StateCmd::Import { state, from } => commands::state::import(&state, &from),
        },
    };

    match outcome {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

impl From<ModeArg> for cpd_config::ExecutionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Once => cpd_config::ExecutionMode::Once,
            ModeArg::Interval => cpd_config::ExecutionMode::Interval,
            ModeArg::Continuous => cpd_config::ExecutionMode::Continuous,
        }
    }
}
