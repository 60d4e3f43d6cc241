use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::attestation::AttestationMode;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub attestation: AttestationConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AttestationConfig {
    pub mode: AttestationMode,
    pub gateway_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub contract_address: Option<String>,
    /// Key for the local hash chain kept in simulation mode.
    pub signing_key: SecretString,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub attestation_mode: Option<AttestationMode>,
    pub attestation_gateway_url: Option<String>,
    pub attestation_api_key: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://stockflow.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            attestation: AttestationConfig {
                mode: AttestationMode::Simulation,
                gateway_url: None,
                api_key: None,
                contract_address: None,
                signing_key: secret_value("stockflow-local-attestation".to_string()),
                timeout_secs: 10,
                max_retries: 2,
                retry_base_delay_ms: 200,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for AttestationMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "simulation" => Ok(Self::Simulation),
            "gateway" => Ok(Self::Gateway),
            other => Err(ConfigError::Validation(format!(
                "unsupported attestation mode `{other}` (expected simulation|gateway)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("stockflow.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Effective configuration as JSON with every secret replaced by a marker.
    pub fn redacted(&self) -> serde_json::Value {
        let redact = |present: bool| if present { "<redacted>" } else { "<unset>" };
        serde_json::json!({
            "database": {
                "url": self.database.url,
                "max_connections": self.database.max_connections,
                "timeout_secs": self.database.timeout_secs,
            },
            "server": {
                "bind_address": self.server.bind_address,
                "port": self.server.port,
                "graceful_shutdown_secs": self.server.graceful_shutdown_secs,
            },
            "attestation": {
                "mode": self.attestation.mode.as_str(),
                "gateway_url": self.attestation.gateway_url,
                "api_key": redact(self.attestation.api_key.is_some()),
                "contract_address": self.attestation.contract_address,
                "signing_key": redact(true),
                "timeout_secs": self.attestation.timeout_secs,
                "max_retries": self.attestation.max_retries,
                "retry_base_delay_ms": self.attestation.retry_base_delay_ms,
            },
            "logging": {
                "level": self.logging.level,
                "format": self.logging.format,
            },
        })
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(attestation) = patch.attestation {
            if let Some(mode) = attestation.mode {
                self.attestation.mode = mode;
            }
            if let Some(gateway_url) = attestation.gateway_url {
                self.attestation.gateway_url = Some(gateway_url);
            }
            if let Some(api_key_value) = attestation.api_key {
                self.attestation.api_key = Some(secret_value(api_key_value));
            }
            if let Some(contract_address) = attestation.contract_address {
                self.attestation.contract_address = Some(contract_address);
            }
            if let Some(signing_key_value) = attestation.signing_key {
                self.attestation.signing_key = secret_value(signing_key_value);
            }
            if let Some(timeout_secs) = attestation.timeout_secs {
                self.attestation.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = attestation.max_retries {
                self.attestation.max_retries = max_retries;
            }
            if let Some(retry_base_delay_ms) = attestation.retry_base_delay_ms {
                self.attestation.retry_base_delay_ms = retry_base_delay_ms;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("STOCKFLOW_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("STOCKFLOW_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("STOCKFLOW_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("STOCKFLOW_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("STOCKFLOW_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("STOCKFLOW_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("STOCKFLOW_SERVER_PORT") {
            self.server.port = parse_u16("STOCKFLOW_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("STOCKFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("STOCKFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("STOCKFLOW_ATTESTATION_MODE") {
            self.attestation.mode = value.parse()?;
        }
        if let Some(value) = read_env("STOCKFLOW_ATTESTATION_GATEWAY_URL") {
            self.attestation.gateway_url = Some(value);
        }
        if let Some(value) = read_env("STOCKFLOW_ATTESTATION_API_KEY") {
            self.attestation.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("STOCKFLOW_ATTESTATION_CONTRACT_ADDRESS") {
            self.attestation.contract_address = Some(value);
        }
        if let Some(value) = read_env("STOCKFLOW_ATTESTATION_SIGNING_KEY") {
            self.attestation.signing_key = secret_value(value);
        }
        if let Some(value) = read_env("STOCKFLOW_ATTESTATION_TIMEOUT_SECS") {
            self.attestation.timeout_secs =
                parse_u64("STOCKFLOW_ATTESTATION_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("STOCKFLOW_ATTESTATION_MAX_RETRIES") {
            self.attestation.max_retries = parse_u32("STOCKFLOW_ATTESTATION_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("STOCKFLOW_ATTESTATION_RETRY_BASE_DELAY_MS") {
            self.attestation.retry_base_delay_ms =
                parse_u64("STOCKFLOW_ATTESTATION_RETRY_BASE_DELAY_MS", &value)?;
        }

        let log_level =
            read_env("STOCKFLOW_LOGGING_LEVEL").or_else(|| read_env("STOCKFLOW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("STOCKFLOW_LOGGING_FORMAT").or_else(|| read_env("STOCKFLOW_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(mode) = overrides.attestation_mode {
            self.attestation.mode = mode;
        }
        if let Some(gateway_url) = overrides.attestation_gateway_url {
            self.attestation.gateway_url = Some(gateway_url);
        }
        if let Some(api_key) = overrides.attestation_api_key {
            self.attestation.api_key = Some(secret_value(api_key));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_attestation(&self.attestation)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("stockflow.toml"), PathBuf::from("config/stockflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_attestation(attestation: &AttestationConfig) -> Result<(), ConfigError> {
    if attestation.timeout_secs == 0 || attestation.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "attestation.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    if attestation.max_retries > 10 {
        return Err(ConfigError::Validation(
            "attestation.max_retries must be at most 10".to_string(),
        ));
    }

    match attestation.mode {
        AttestationMode::Simulation => {
            if attestation.signing_key.expose_secret().trim().is_empty() {
                return Err(ConfigError::Validation(
                    "attestation.signing_key must not be empty in simulation mode".to_string(),
                ));
            }
        }
        AttestationMode::Gateway => {
            let url = attestation.gateway_url.as_deref().map(str::trim).unwrap_or("");
            if url.is_empty() {
                return Err(ConfigError::Validation(
                    "attestation.gateway_url is required for gateway mode".to_string(),
                ));
            }
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::Validation(
                    "attestation.gateway_url must start with http:// or https://".to_string(),
                ));
            }

            let missing_key = attestation
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing_key {
                return Err(ConfigError::Validation(
                    "attestation.api_key is required for gateway mode".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    attestation: Option<AttestationPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AttestationPatch {
    mode: Option<AttestationMode>,
    gateway_url: Option<String>,
    api_key: Option<String>,
    contract_address: Option<String>,
    signing_key: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
