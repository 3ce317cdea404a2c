use std::env;

use clap::Parser;
use gatehouse_server::{
    ServerBuilder,
    cli::{self, Cli, Commands},
    config::loader::{CONFIG_PATH_ENV, DEFAULT_CONFIG_FILE, load_config},
};

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    CliArgument,
    EnvironmentVariable,
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable ({CONFIG_PATH_ENV})"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() {
    // .env is optional
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    gatehouse_server::observability::init_tracing();

    let cli = Cli::parse();
    let code = match cli.command {
        Some(Commands::ValidateConfig { ref file }) => {
            cli::validate_config(file, &mut std::io::stdout())
        }
        Some(Commands::Serve) | None => match serve(&cli).await {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("{e:#}");
                1
            }
        },
    };
    std::process::exit(code);
}

async fn serve(cli: &Cli) -> anyhow::Result<()> {
    let (config_path, source) = resolve_config_path(cli);

    let cfg = match source {
        ConfigSource::Default => load_config(None),
        _ => load_config(Some(&config_path)),
    }
    .map_err(|e| anyhow::anyhow!("Configuration error: {e}"))?;

    tracing::info!(path = %config_path, source = %source, "Configuration loaded");
    gatehouse_server::observability::apply_logging_level(&cfg.logging.level);

    let report = cfg.validate();
    for warning in &report.warnings {
        tracing::warn!("{warning}");
    }
    if !report.is_ok() {
        for error in &report.errors {
            tracing::error!("{error}");
        }
        anyhow::bail!("configuration has {} error(s)", report.errors.len());
    }

    let server = ServerBuilder::new().with_config(cfg).build()?;
    server.run().await
}

/// Resolves the configuration file path.
///
/// Priority order:
/// 1. `--config <path>`
/// 2. `GATEHOUSE_CONFIG`
/// 3. `gatehouse.toml`
fn resolve_config_path(cli: &Cli) -> (String, ConfigSource) {
    // clap fills `config` from the environment too; tell the two apart.
    let from_env = env::var(CONFIG_PATH_ENV).ok().filter(|p| !p.is_empty());
    match (&cli.config, from_env) {
        (Some(path), Some(env_path)) if *path == env_path => {
            (path.clone(), ConfigSource::EnvironmentVariable)
        }
        (Some(path), _) if !path.is_empty() => (path.clone(), ConfigSource::CliArgument),
        _ => (DEFAULT_CONFIG_FILE.to_string(), ConfigSource::Default),
    }
}
