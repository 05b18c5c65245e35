// ════════════════════════════════════════════════════════════════
//  Configuration
// ════════════════════════════════════════════════════════════════

fn default_data_dir() -> String {
    "/tmp/krake".to_string()
}

fn default_preallocate() -> bool {
    true
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct FileStorageConfig {
    /// Root directory for segment files, used when `log.dirs` is not set.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Size new segment files to their full capacity up front.
    #[serde(default = "default_preallocate")]
    pub preallocate: bool,
    /// fsync after every write instead of only on close.
    #[serde(default)]
    pub sync_writes: bool,
}

impl Default for FileStorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            preallocate: default_preallocate(),
            sync_writes: false,
        }
    }
}
