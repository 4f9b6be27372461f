use chrono::{DateTime, Utc};

/// A single record pulled from a source.
///
/// The partition is source-defined parallelism: a queue partition, a file
/// index, or an object index. Offsets are monotone within a partition, and
/// `time` is whatever timestamp the source assigned (broker time, file
/// mtime, object last-modified), if any.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    pub partition: i32,
    pub offset: i64,
    pub key: String,
    pub time: Option<DateTime<Utc>>,
    pub value: Vec<u8>,
}
