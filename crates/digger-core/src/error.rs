/// Errors surfaced by consumers, the engine, and processor construction.
///
/// Record-level problems (undecodable payloads, unmatched paths) are never
/// errors; they are counted under the sentinel keys instead.
#[derive(Debug, thiserror::Error)]
pub enum DiggerError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid range string: {0}")]
    InvalidRange(String),

    #[error("could not parse {0} as either timestamp or duration")]
    InvalidTime(String),

    #[error("invalid filter: {0}")]
    Filter(#[from] regex::Error),

    #[error(transparent)]
    Schema(#[from] digger_proto::SchemaError),

    #[error("record in {key} exceeds the maximum size of {max} bytes")]
    RecordTooLarge { key: String, max: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Walk(#[from] walkdir::Error),

    #[error(transparent)]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("object store error: {0}")]
    ObjectStore(String),

    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),

    #[error("cancelled")]
    Cancelled,
}
