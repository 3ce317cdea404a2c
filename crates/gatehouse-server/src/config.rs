use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use gatehouse_auth::{AuthConfig, ValidationReport};
use serde::{Deserialize, Serialize};

/// Top-level configuration file.
///
/// ```toml
/// [server]
/// host = "0.0.0.0"
/// port = 9091
///
/// [logging]
/// level = "info"
///
/// [auth.session]
/// domain = "example.com"
/// portal_url = "https://auth.example.com"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Gateway settings: sessions, OIDC, access control.
    #[serde(default)]
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Validates the listener, logging and gateway settings together.
    pub fn validate(&self) -> ValidationReport {
        let mut report = self.auth.validate();

        if self.server.port == 0 {
            report.errors.push("server.port must be > 0".into());
        }
        if self.server.host.parse::<IpAddr>().is_err() {
            report
                .errors
                .push(format!("server.host '{}' is not an IP address", self.server.host));
        }
        if self.server.body_limit_bytes == 0 {
            report.errors.push("server.body_limit_bytes must be > 0".into());
        }

        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            report
                .errors
                .push(format!("logging.level must be one of {valid_levels:?}"));
        }

        report
    }

    pub fn addr(&self) -> SocketAddr {
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    9091
}
fn default_body_limit() -> usize {
    64 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use std::path::{Path, PathBuf};

    use config::{Config, Environment, File, FileFormat};

    use super::AppConfig;

    /// Default configuration file, relative to the working directory.
    pub const DEFAULT_CONFIG_FILE: &str = "gatehouse.toml";

    /// Environment variable naming the configuration file.
    pub const CONFIG_PATH_ENV: &str = "GATEHOUSE_CONFIG";

    /// Prefix of environment overrides, e.g. `GATEHOUSE__SERVER__PORT=9090`.
    pub const ENV_PREFIX: &str = "GATEHOUSE";

    /// Loads the configuration file merged with environment overrides.
    ///
    /// An explicit path must exist; the default file is optional.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if !pathbuf.exists() {
                    return Err(format!("configuration file '{p}' does not exist"));
                }
                builder = builder.add_source(File::from(pathbuf).format(FileFormat::Toml));
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path).format(FileFormat::Toml));
                }
            }
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        cfg.try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))
    }

    pub fn load_config_with_default_path<P: AsRef<Path>>(
        path: Option<P>,
    ) -> Result<AppConfig, String> {
        let p = path
            .as_ref()
            .map(|p| p.as_ref().to_string_lossy().to_string());
        load_config(p.as_deref())
    }
}
