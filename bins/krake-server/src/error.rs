#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("broker: {0}")]
    Broker(#[from] krake_engine::BrokerError),

    #[error("storage: {0}")]
    Storage(#[from] krake_api::StorageError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
