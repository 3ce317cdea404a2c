use std::{io::Write, path::Path};

use clap::{Parser, Subcommand};

use crate::config::loader::{CONFIG_PATH_ENV, load_config};

#[derive(Parser, Debug)]
#[command(name = "gatehouse")]
#[command(about = "Gatehouse: OpenID Connect provider and forward-auth gateway")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file (overrides GATEHOUSE_CONFIG)
    #[arg(short, long, global = true, env = CONFIG_PATH_ENV)]
    pub config: Option<String>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the gateway (default)
    Serve,
    /// Load a configuration file and report problems
    ValidateConfig {
        /// File to check
        file: String,
    },
}

/// Checks one configuration file and reports to `out`.
///
/// Returns the process exit code: 0 when the file loads and validates.
pub fn validate_config(file: &str, out: &mut impl Write) -> i32 {
    if !Path::new(file).exists() {
        let _ = writeln!(out, "Error Loading Configuration");
        let _ = writeln!(out, "  configuration file '{file}' does not exist");
        return 1;
    }

    let cfg = match load_config(Some(file)) {
        Ok(cfg) => cfg,
        Err(e) => {
            let _ = writeln!(out, "Error Loading Configuration");
            let _ = writeln!(out, "  {e}");
            return 1;
        }
    };

    let report = cfg.validate();
    if !report.warnings.is_empty() {
        let _ = writeln!(out, "Warnings occurred while loading the configuration:");
        for warning in &report.warnings {
            tracing::warn!(path = %file, "{warning}");
            let _ = writeln!(out, "  {warning}");
        }
    }
    if !report.errors.is_empty() {
        let _ = writeln!(out, "Errors occurred while loading the configuration:");
        for error in &report.errors {
            let _ = writeln!(out, "  {error}");
        }
        return 1;
    }

    let _ = writeln!(out, "Configuration parsed successfully without errors.");
    0
}
