use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value as JsonValue};
use stockflow_core::config::{AppConfig, LoadOptions};
use toml::Value;

use crate::commands::CommandResult;

/// Older short env names still honoured by the config loader.
const ENV_ALIASES: &[(&str, &str)] =
    &[("logging.level", "STOCKFLOW_LOG_LEVEL"), ("logging.format", "STOCKFLOW_LOG_FORMAT")];

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            )
        }
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let effective = config.redacted();

    let mut sources = Map::new();
    collect_sources(
        &effective,
        "",
        config_file_doc.as_ref(),
        config_file_path.as_deref(),
        &mut sources,
    );

    let payload = serde_json::json!({
        "command": "config",
        "status": "ok",
        "precedence": "env > file > default",
        "config_file": config_file_path.map(|path| path.display().to_string()),
        "config": effective,
        "sources": sources,
    });

    match serde_json::to_string_pretty(&payload) {
        Ok(output) => CommandResult { exit_code: 0, output },
        Err(error) => CommandResult::failure("config", "serialization", error.to_string(), 1),
    }
}

fn collect_sources(
    node: &JsonValue,
    prefix: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
    sources: &mut Map<String, JsonValue>,
) {
    let JsonValue::Object(fields) = node else {
        sources.insert(
            prefix.to_string(),
            JsonValue::String(field_source(prefix, config_file_doc, config_file_path)),
        );
        return;
    };

    for (key, child) in fields {
        let key_path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
        collect_sources(child, &key_path, config_file_doc, config_file_path, sources);
    }
}

fn env_key_for(key_path: &str) -> String {
    format!("STOCKFLOW_{}", key_path.replace('.', "_").to_ascii_uppercase())
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("stockflow.toml"), PathBuf::from("config/stockflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    let primary = env_key_for(key_path);
    let alias =
        ENV_ALIASES.iter().find(|(path, _)| *path == key_path).map(|(_, env_key)| *env_key);

    for env_key in std::iter::once(primary.as_str()).chain(alias) {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}
