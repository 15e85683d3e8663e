use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub logging: Option<LoggingSection>,
    #[serde(default)]
    pub service: Option<ServiceSection>,
    #[serde(default)]
    pub jobs: Option<JobsSection>,
}

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub json: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ServiceSection {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JobsSection {
    #[serde(default)]
    pub max_parallel: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Load a RawConfigFile from a path. The format is inferred from the extension: .toml, .yaml/.yml, .json
pub fn load_raw_from_file<P: AsRef<Path>>(path: P) -> Result<RawConfigFile, ConfigError> {
    let path = path.as_ref();
    let s = fs::read_to_string(path)?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase());
    parse_config_str(&s, ext.as_deref())
}

#[inline]
fn parse_config_str(s: &str, ext: Option<&str>) -> Result<RawConfigFile, ConfigError> {
    match ext {
        #[cfg(feature = "toml")]
        Some("toml") => toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string())),
        #[cfg(feature = "yaml")]
        Some("yaml" | "yml") => {
            serde_yaml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
        }
        #[cfg(feature = "json")]
        Some("json") => serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string())),
        _ => parse_config_auto(s),
    }
}

/// Try each enabled format in turn.
#[inline]
fn parse_config_auto(s: &str) -> Result<RawConfigFile, ConfigError> {
    #[cfg(feature = "toml")]
    if let Ok(cfg) = toml::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(feature = "json")]
    if let Ok(cfg) = serde_json::from_str(s) {
        return Ok(cfg);
    }

    // YAML last: almost any text is valid YAML
    #[cfg(feature = "yaml")]
    if let Ok(cfg) = serde_yaml::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(any(feature = "yaml", feature = "toml", feature = "json"))]
    {
        Err(ConfigError::Parse(
            "failed to parse config as any supported format".into(),
        ))
    }

    #[cfg(not(any(feature = "yaml", feature = "toml", feature = "json")))]
    {
        let _ = s;
        Err(ConfigError::Parse("no config format enabled".into()))
    }
}

/// Concrete client configuration with defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub logging: LoggingConfig,
    pub service: ServiceConfig,
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceConfig {
    pub base_url: Option<String>,
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobsConfig {
    pub max_parallel: usize,
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub format: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
            service: ServiceConfig {
                base_url: None,
                user_agent: concat!("tapjobs/", env!("CARGO_PKG_VERSION")).to_string(),
            },
            jobs: JobsConfig {
                max_parallel: 5,
                timeout_secs: 300,
                poll_interval_ms: 1000,
                format: None,
            },
        }
    }
}

#[inline]
fn parse_bool(s: &str) -> Result<bool, ()> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Ok(true),
        "0" | "false" | "no" | "n" => Ok(false),
        _ => Err(()),
    }
}

macro_rules! apply_opt {
    ($target:expr, $source:expr) => {
        if let Some(v) = $source {
            $target = v;
        }
    };
    ($target:expr, $source:expr, wrap) => {
        if let Some(v) = $source {
            $target = Some(v);
        }
    };
}

/// Load concrete `Config` from optional file and environment variables.
/// Environment variables take precedence over file values and defaults.
pub fn load_config<P: AsRef<Path>>(path: Option<P>) -> Result<Config, ConfigError> {
    let mut cfg = Config::default();

    if let Some(p) = path {
        let raw = load_raw_from_file(p)?;
        if let Some(logging) = raw.logging {
            apply_opt!(cfg.logging.level, logging.level);
            apply_opt!(cfg.logging.json, logging.json);
        }
        if let Some(service) = raw.service {
            apply_opt!(cfg.service.base_url, service.base_url, wrap);
            apply_opt!(cfg.service.user_agent, service.user_agent);
        }
        if let Some(jobs) = raw.jobs {
            apply_opt!(cfg.jobs.max_parallel, jobs.max_parallel);
            apply_opt!(cfg.jobs.timeout_secs, jobs.timeout_secs);
            apply_opt!(cfg.jobs.poll_interval_ms, jobs.poll_interval_ms);
            apply_opt!(cfg.jobs.format, jobs.format, wrap);
        }
    }

    apply_env_overrides(&mut cfg)?;

    Ok(cfg)
}

#[inline]
fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Parse(format!("invalid {}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

#[inline]
fn env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(key) {
        Ok(v) => parse_bool(&v)
            .map(Some)
            .map_err(|_| ConfigError::Parse(format!("invalid {}", key))),
        Err(_) => Ok(None),
    }
}

#[inline]
fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn apply_env_overrides(cfg: &mut Config) -> Result<(), ConfigError> {
    // Logging
    if let Some(v) = env_str("TAPJOBS_LOG_LEVEL") {
        cfg.logging.level = v;
    }
    if let Some(v) = env_bool("TAPJOBS_LOG_JSON")? {
        cfg.logging.json = v;
    }

    // Service
    if let Some(v) = env_str("TAPJOBS_SERVICE_URL") {
        cfg.service.base_url = Some(v);
    }
    if let Some(v) = env_str("TAPJOBS_USER_AGENT") {
        cfg.service.user_agent = v;
    }

    // Jobs
    if let Some(v) = env_parse::<usize>("TAPJOBS_MAX_PARALLEL")? {
        cfg.jobs.max_parallel = v;
    }
    if let Some(v) = env_parse::<u64>("TAPJOBS_JOB_TIMEOUT_SECS")? {
        cfg.jobs.timeout_secs = v;
    }
    if let Some(v) = env_parse::<u64>("TAPJOBS_POLL_INTERVAL_MS")? {
        cfg.jobs.poll_interval_ms = v;
    }
    if let Some(v) = env_str("TAPJOBS_FORMAT") {
        cfg.jobs.format = Some(v);
    }

    Ok(())
}

/// Validate higher-level constraints on the resolved configuration.
pub fn validate_config(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.jobs.max_parallel == 0 {
        return Err(ConfigError::Validation(
            "jobs.max_parallel must be > 0".into(),
        ));
    }
    if cfg.jobs.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "jobs.timeout_secs must be > 0".into(),
        ));
    }
    if cfg.jobs.poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "jobs.poll_interval_ms must be > 0".into(),
        ));
    }
    if cfg.service.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "service.user_agent must not be empty".into(),
        ));
    }

    if let Some(base) = &cfg.service.base_url {
        match url::Url::parse(base) {
            Ok(u) => {
                let scheme = u.scheme();
                if scheme != "http" && scheme != "https" {
                    return Err(ConfigError::Validation(format!(
                        "service.base_url must be http or https: {}",
                        base
                    )));
                }
            }
            Err(_) => {
                return Err(ConfigError::Validation(format!(
                    "invalid service.base_url: {}",
                    base
                )))
            }
        }
    }
    Ok(())
}
