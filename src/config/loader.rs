//! Configuration loader with layered sources
//!
//! Loads configuration from multiple sources with the following precedence
//! (highest to lowest):
//! 1. Environment variables (SITE_GATE__*)
//! 2. Configuration file (TOML)
//! 3. Default values

use crate::access_control::policy::PolicySet;
use crate::access_control::PatternMatcher;
use crate::config::types::AppConfig;
use crate::error::ConfigError;
use config::{Config, Environment, File, FileFormat};
use std::collections::HashMap;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Default configuration file paths to check (in order)
const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "site-gate.toml",
    ".site-gate.toml",
    "~/.config/site-gate/config.toml",
    "/etc/site-gate/config.toml",
];

/// Keys whose environment values are comma-separated lists
const LIST_KEYS: &[&str] = &[
    "access.default_scopes",
    "access.allowed_scopes",
    "access.config_only_allowed_write_kinds",
    "resources.content",
    "resources.ops",
    "resources.structure",
];

/// Load configuration from a TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::from_str(toml_str, FileFormat::Toml))
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let app_config: AppConfig = config
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    validate_config(&app_config)?;

    Ok(app_config)
}

/// Load configuration from files and environment
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();

    // 1. Start with defaults (handled by serde defaults on AppConfig)

    // 2. Add configuration file
    if let Some(path) = config_path {
        // Explicit path provided - must exist
        if !Path::new(path).exists() {
            return Err(ConfigError::Load(format!(
                "Configuration file not found: {}",
                path
            )));
        }
        builder = builder.add_source(File::new(path, FileFormat::Toml));
    } else {
        // Try default paths (first existing one wins)
        for path in DEFAULT_CONFIG_PATHS {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                builder = builder.add_source(File::new(&expanded, FileFormat::Toml));
                break;
            }
        }
    }

    // 3. Environment, e.g. SITE_GATE__ACCESS__READ_ONLY_MODE=true
    // Double underscore (__) maps to nested keys (access.read_only_mode)
    let mut env = Environment::with_prefix("SITE_GATE")
        .separator("__")
        .try_parsing(true)
        .list_separator(",");
    for key in LIST_KEYS {
        env = env.with_list_parse_key(key);
    }
    builder = builder.add_source(env);

    let config = builder
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let app_config: AppConfig = config
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    validate_config(&app_config)?;

    Ok(app_config)
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.dashboard.port == 0 {
        return Err(ConfigError::Invalid {
            message: "dashboard.port must be greater than 0".to_string(),
        });
    }

    if config.audit.capacity == 0 {
        return Err(ConfigError::Invalid {
            message: "audit.capacity must be greater than 0".to_string(),
        });
    }

    if EnvFilter::try_new(&config.logging.level).is_err() {
        return Err(ConfigError::Invalid {
            message: format!("logging.level is not a valid filter: {}", config.logging.level),
        });
    }

    validate_all_patterns(config)?;

    Ok(())
}

/// Validate all regex patterns in config
fn validate_all_patterns(config: &AppConfig) -> Result<(), ConfigError> {
    let families = [
        ("resources.content", &config.resources.content),
        ("resources.ops", &config.resources.ops),
        ("resources.structure", &config.resources.structure),
    ];
    for (field_path, patterns) in families {
        PatternMatcher::new(patterns).map_err(|e| in_field(e, field_path))?;
    }

    for (name, table) in &config.policies {
        let single = HashMap::from([(name.clone(), table.clone())]);
        PolicySet::from_config(&single).map_err(|e| in_field(e, &format!("policies.{}", name)))?;
    }

    Ok(())
}

fn in_field(error: ConfigError, field_path: &str) -> ConfigError {
    match error {
        ConfigError::InvalidPattern { pattern, reason } => ConfigError::InvalidPattern {
            pattern,
            reason: format!("in {}: {}", field_path, reason),
        },
        other => other,
    }
}
