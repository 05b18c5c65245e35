//! Broker-wide defaults and the option keys `configure` understands.

use std::path::PathBuf;

use krake_api::ConfigValues;

use crate::consumer::AutoOffsetReset;
use crate::segment::SegmentSettings;

pub const DEFAULT_SEGMENT_BYTES: u64 = 1_000_000;

pub const LOG_DIRS: &str = "log.dirs";
pub const LOG_SEGMENT_BYTES: &str = "log.segment.bytes";
pub const AUTO_OFFSET_RESET: &str = "auto.offset.reset";
pub const ENABLE_AUTO_COMMIT: &str = "enable.auto.commit";

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerSettings {
    /// Capacity of newly created segments, in framed bytes.
    pub segment_bytes: u64,
    /// Directory handed to file-backed storage. `None` lets the backend decide.
    pub log_dir: Option<PathBuf>,
    pub auto_offset_reset: AutoOffsetReset,
    pub enable_auto_commit: bool,
    /// Options with no meaning to the engine, kept for backends and tooling.
    pub extra: ConfigValues,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            segment_bytes: DEFAULT_SEGMENT_BYTES,
            log_dir: None,
            auto_offset_reset: AutoOffsetReset::Earliest,
            enable_auto_commit: true,
            extra: ConfigValues::new(),
        }
    }
}

impl BrokerSettings {
    pub fn from_values(values: &ConfigValues) -> Self {
        let mut settings = Self::default();
        settings.apply(values);
        settings
    }

    /// Merge recognised keys over the current values.
    ///
    /// A recognised key with an unusable value is logged and skipped, so an
    /// option written for a newer broker never stops an older one.
    pub fn apply(&mut self, values: &ConfigValues) {
        for (name, value) in values.iter() {
            match name {
                LOG_SEGMENT_BYTES => match values.get_u64(name) {
                    Some(bytes) if bytes > 0 => self.segment_bytes = bytes,
                    _ => tracing::warn!(key = name, value = ?value, "ignoring invalid segment size"),
                },
                LOG_DIRS => {
                    let first = values
                        .get_str(name)
                        .and_then(|dirs| dirs.split(',').map(str::trim).find(|d| !d.is_empty()));
                    match first {
                        Some(dir) => self.log_dir = Some(PathBuf::from(dir)),
                        None => tracing::warn!(key = name, value = ?value, "ignoring invalid log directory"),
                    }
                }
                AUTO_OFFSET_RESET => match values.get_str(name).map(str::parse::<AutoOffsetReset>) {
                    Some(Ok(reset)) => self.auto_offset_reset = reset,
                    Some(Err(e)) => tracing::warn!(key = name, error = %e, "ignoring offset reset policy"),
                    None => tracing::warn!(key = name, value = ?value, "ignoring offset reset policy"),
                },
                ENABLE_AUTO_COMMIT => match values.get_bool(name) {
                    Some(enabled) => self.enable_auto_commit = enabled,
                    None => tracing::warn!(key = name, value = ?value, "ignoring auto commit flag"),
                },
                other => self.extra.set(other, value.clone()),
            }
        }
    }

    pub fn segment_settings(&self) -> SegmentSettings {
        SegmentSettings {
            capacity: self.segment_bytes,
            log_dir: self.log_dir.clone(),
        }
    }
}
