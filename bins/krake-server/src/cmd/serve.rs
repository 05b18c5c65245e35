use std::path::PathBuf;
use std::sync::Arc;

use krake_api::StorageFactory;
use krake_engine::{Broker, BrokerSettings, TopicConfig};
use krake_storage_file::FileStorageFactory;
use krake_storage_memory::MemoryStorageFactory;

use crate::config::{ServeArgs, ServerConfig, StorageConfig};
use crate::error::ServerError;

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!(config = %args.config, "loading configuration");
    let config = ServerConfig::load(&args.config)?;

    let broker = bootstrap(&config)?;
    tracing::info!(
        topics = ?broker.topic_names(),
        "krake-server started, press Ctrl+C to stop"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");
    Ok(())
}

/// Build a broker from a parsed config and create its topics.
pub fn bootstrap(config: &ServerConfig) -> Result<Broker, ServerError> {
    let values = config.broker_values();
    let settings = BrokerSettings::from_values(&values);

    let factory: Arc<dyn StorageFactory> = match &config.storage {
        StorageConfig::Memory => Arc::new(MemoryStorageFactory),
        StorageConfig::File(file) => {
            let dir = settings
                .log_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(&file.data_dir));
            let existing = krake_storage_file::discover(&dir)?;
            if !existing.is_empty() {
                // Nothing reopens old segments yet; a reused name is truncated.
                tracing::warn!(
                    dir = %dir.display(),
                    segments = existing.len(),
                    "log directory holds segments from a previous run, they are not recovered"
                );
            }
            Arc::new(FileStorageFactory::new(file.clone()))
        }
    };

    let broker = Broker::new(settings, factory);
    for topic in &config.topics {
        broker.create_topic(TopicConfig::new(&topic.name, topic.partitions, topic.retention()))?;
    }
    Ok(broker)
}
