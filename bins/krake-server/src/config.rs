use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use krake_api::{ConfigValues, ParamValue};
use krake_storage_file::FileStorageConfig;
use serde::Deserialize;

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "krake-server", about = "Partitioned segmented log broker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the broker with the configured topics
    Serve(ServeArgs),
    /// List segment files found in a log directory
    Segments(SegmentsArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Path to TOML configuration file
    #[arg(long, default_value = "config.toml", env = "KRAKE_CONFIG")]
    pub config: String,
}

#[derive(Args, Clone, Debug)]
pub struct SegmentsArgs {
    /// Directory holding `{topic}-{partition}-{base}.log` files
    #[arg(long, env = "KRAKE_LOG_DIR")]
    pub dir: PathBuf,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    /// Broker options by their dotted names, e.g. `"log.segment.bytes" = 1048576`.
    #[serde(default)]
    pub broker: toml::Table,
    #[serde(default)]
    pub topics: Vec<TopicEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    Memory,
    File(FileStorageConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::File(FileStorageConfig::default())
    }
}

#[derive(Debug, Deserialize)]
pub struct TopicEntry {
    pub name: String,
    #[serde(default = "default_partitions")]
    pub partitions: u32,
    #[serde(default = "default_retention_ms")]
    pub retention_ms: u64,
}

fn default_partitions() -> u32 {
    1
}
fn default_retention_ms() -> u64 {
    7 * 24 * 60 * 60 * 1000
}

impl TopicEntry {
    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path).map_err(|e| ServerError::Config {
            context: "read",
            detail: format!("'{path}': {e}"),
        })?;
        Self::parse(&content).map_err(|e| match e {
            ServerError::Config { context, detail } => ServerError::Config {
                context,
                detail: format!("'{path}': {detail}"),
            },
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<Self, ServerError> {
        toml::from_str(content).map_err(|e| ServerError::Config {
            context: "parse",
            detail: e.to_string(),
        })
    }

    /// `[broker]` as engine options. Nested tables are flattened with `.`,
    /// so `log.segment.bytes = 1` and `"log.segment.bytes" = 1` agree.
    pub fn broker_values(&self) -> ConfigValues {
        let mut values = ConfigValues::new();
        flatten_into(&mut values, None, &self.broker);
        values
    }
}

fn flatten_into(values: &mut ConfigValues, prefix: Option<&str>, table: &toml::Table) {
    for (name, value) in table {
        let key = match prefix {
            Some(p) => format!("{p}.{name}"),
            None => name.clone(),
        };
        let param = match value {
            toml::Value::Boolean(b) => ParamValue::Bool(*b),
            toml::Value::Integer(i) => ParamValue::I64(*i),
            toml::Value::Float(f) => ParamValue::F64(*f),
            toml::Value::String(s) => ParamValue::Str(s.clone()),
            toml::Value::Table(nested) => {
                flatten_into(values, Some(&key), nested);
                continue;
            }
            other => {
                tracing::warn!(key = %key, kind = other.type_str(), "unsupported broker option type, skipping");
                continue;
            }
        };
        values.set(key, param);
    }
}
