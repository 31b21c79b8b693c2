use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};
use serde::Deserialize;

use publisher::SchedulerConfig;

use super::error::FilePublisherError;

// ═══════════════════════════════════════════════════════════════
//  Enumerated settings
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Error,
    Info,
    Warn,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Error => "error",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NodeEnv {
    Development,
    Production,
    Staging,
    Test,
}

// ═══════════════════════════════════════════════════════════════
//  Config file (TOML)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    pub initial_delay: Option<f64>,
    pub log_level: Option<LogLevel>,
    pub mqtt_broker_url: Option<String>,
    pub mqtt_topic: Option<String>,
    pub name: Option<String>,
    pub node_env: Option<NodeEnv>,
    pub value_file: Option<PathBuf>,
    pub value_interval: Option<f64>,
}

pub fn load_config(path: &str) -> Result<Config, FilePublisherError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| FilePublisherError::Config(format!("cannot read config {path}: {e}")))?;
    toml::from_str(&content).map_err(|e| FilePublisherError::Config(format!("bad config {path}: {e}")))
}

// ═══════════════════════════════════════════════════════════════
//  CLI args / environment
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug, Default)]
pub struct PublisherArgs {
    /// Path to an optional TOML config file
    #[arg(long, default_value = "file-publisher.toml", env = "FILE_PUBLISHER_CONFIG")]
    pub config: String,

    /// Seconds between connecting and publishing the first value (>= 1)
    #[arg(long, env = "INITIAL_DELAY")]
    pub initial_delay: Option<f64>,

    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Broker url, e.g. mqtt://localhost:1883
    #[arg(long, env = "MQTT_BROKER_URL")]
    pub mqtt_broker_url: Option<String>,

    /// Topic every value is published to
    #[arg(long, env = "MQTT_TOPIC")]
    pub mqtt_topic: Option<String>,

    /// Publisher name, used as the MQTT client id
    #[arg(long, env = "NAME")]
    pub name: Option<String>,

    #[arg(long, env = "NODE_ENV")]
    pub node_env: Option<NodeEnv>,

    /// JSON file with the recorded values
    #[arg(long, env = "VALUE_FILE")]
    pub value_file: Option<PathBuf>,

    /// Seconds between two published values (>= 1)
    #[arg(long, env = "VALUE_INTERVAL")]
    pub value_interval: Option<f64>,
}

// ═══════════════════════════════════════════════════════════════
//  Effective — merged config
// ═══════════════════════════════════════════════════════════════

/// Settings after merging config file < env/CLI, all validated.
#[derive(Debug, Clone)]
pub struct Effective {
    pub initial_delay: Duration,
    pub log_level: LogLevel,
    pub broker_url: String,
    pub topic: String,
    pub name: String,
    pub node_env: NodeEnv,
    pub value_file: PathBuf,
    pub value_interval: Duration,
}

impl Effective {
    pub fn new(args: &PublisherArgs) -> Result<Self, FilePublisherError> {
        let cfg = match load_config(&args.config) {
            Ok(c) => c,
            Err(e) => {
                if std::path::Path::new(&args.config).exists() {
                    return Err(e);
                }
                Config::default()
            }
        };

        let initial_delay = required("INITIAL_DELAY", args.initial_delay.or(cfg.initial_delay))?;
        let value_interval = required("VALUE_INTERVAL", args.value_interval.or(cfg.value_interval))?;

        Ok(Self {
            initial_delay: whole_seconds("INITIAL_DELAY", initial_delay)?,
            log_level: required("LOG_LEVEL", args.log_level.or(cfg.log_level))?,
            broker_url: non_empty("MQTT_BROKER_URL", args.mqtt_broker_url.clone().or(cfg.mqtt_broker_url))?,
            topic: non_empty("MQTT_TOPIC", args.mqtt_topic.clone().or(cfg.mqtt_topic))?,
            name: non_empty("NAME", args.name.clone().or(cfg.name))?,
            node_env: required("NODE_ENV", args.node_env.or(cfg.node_env))?,
            value_file: required("VALUE_FILE", args.value_file.clone().or(cfg.value_file))?,
            value_interval: whole_seconds("VALUE_INTERVAL", value_interval)?,
        })
    }

    /// `NODE_ENV=test` silences logging.
    pub fn log_filter(&self) -> &'static str {
        match self.node_env {
            NodeEnv::Test => "off",
            _ => self.log_level.as_filter(),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::new(
            self.broker_url.clone(),
            self.topic.clone(),
            self.name.clone(),
            self.initial_delay,
            self.value_interval,
        )
    }
}

fn required<T>(key: &str, value: Option<T>) -> Result<T, FilePublisherError> {
    value.ok_or_else(|| FilePublisherError::Config(format!("\"{key}\" is required")))
}

fn non_empty(key: &str, value: Option<String>) -> Result<String, FilePublisherError> {
    let value = required(key, value)?;
    if value.trim().is_empty() {
        return Err(FilePublisherError::Config(format!("\"{key}\" is not allowed to be empty")));
    }
    Ok(value)
}

/// Any number >= 1 is accepted; the fraction is dropped (`1.5` runs as 1s).
fn whole_seconds(key: &str, value: f64) -> Result<Duration, FilePublisherError> {
    if !value.is_finite() {
        return Err(FilePublisherError::Config(format!("\"{key}\" must be a number")));
    }
    if value < 1.0 {
        return Err(FilePublisherError::Config(format!("\"{key}\" must be larger than or equal to 1")));
    }
    Ok(Duration::from_secs(value.trunc() as u64))
}

/// Log filter used when the arguments could not even be parsed.
pub fn parse_failure_filter(node_env: Option<&str>) -> &'static str {
    match node_env {
        Some("test") => "off",
        _ => LogLevel::Info.as_filter(),
    }
}

/// First line of a clap error, without clap's `error: ` prefix.
pub fn invalid_args(e: &clap::Error) -> FilePublisherError {
    let rendered = e.to_string();
    let first = rendered.lines().next().unwrap_or_default();
    FilePublisherError::Config(first.trim_start_matches("error: ").trim().to_string())
}
