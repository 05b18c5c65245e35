mod config;
mod storage;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use krake_api::{SegmentId, SegmentStorage, StorageContext, StorageError, StorageFactory};

pub use config::FileStorageConfig;
pub use storage::FileStorage;

// ════════════════════════════════════════════════════════════════
//  FileStorageFactory
// ════════════════════════════════════════════════════════════════

/// Allocates one pre-sized file per segment:
/// `{log_dir}/{topic}-{partition}-{base_offset:020}.log`.
pub struct FileStorageFactory {
    config: FileStorageConfig,
}

impl FileStorageFactory {
    pub fn new(config: FileStorageConfig) -> Self {
        Self { config }
    }

    pub fn with_dir(data_dir: impl Into<String>) -> Self {
        Self::new(FileStorageConfig {
            data_dir: data_dir.into(),
            ..Default::default()
        })
    }

    pub fn segment_path(&self, ctx: &StorageContext) -> PathBuf {
        let dir = ctx
            .log_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.config.data_dir));
        dir.join(ctx.id.file_name())
    }
}

impl StorageFactory for FileStorageFactory {
    fn name(&self) -> &'static str {
        "file"
    }

    fn create(&self, ctx: &StorageContext) -> Result<Arc<dyn SegmentStorage>, StorageError> {
        let path = self.segment_path(ctx);
        tracing::debug!(segment = %ctx.id, path = %path.display(), capacity = ctx.capacity, "allocating segment file");
        let storage = FileStorage::create(&path, ctx.capacity, self.config.preallocate, self.config.sync_writes)
            .map_err(|e| e.with_context(format!("segment {}", ctx.id)))?;
        Ok(Arc::new(storage))
    }
}

/// List segment files found in `dir`, ordered by (topic, partition, base offset).
///
/// A missing directory yields an empty list.
pub fn discover(dir: &Path) -> Result<Vec<SegmentId>, StorageError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::unavailable(format!("read_dir {}: {e}", dir.display()))),
    };

    let mut ids = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let name = entry.file_name();
        if let Some(id) = SegmentId::parse_file_name(&name.to_string_lossy()) {
            ids.push(id);
        }
    }
    ids.sort();
    Ok(ids)
}
