//! Counters backing the digger live-stats view.
//!
//! Everything in this crate is shared between the record-processing path and
//! the progress renderer, so each counter guards its state with a single
//! mutex and is handed around behind an `Arc`.

mod bucket;
mod messages;
mod table;
mod time_bucket;
mod topk;

pub use bucket::Bucket;
pub use messages::{MessageCounter, MessageCounterSummary, PartitionCounter};
pub use time_bucket::TimeBucketCounter;
pub use topk::{TopKCounter, TopKCounterSummary};

/// Special bucket key that represents all possible values.
pub const ALL_VALUE: &str = "__all__";

/// Special bucket key that represents an invalid message.
pub const INVALID_VALUE: &str = "__invalid__";

/// Special bucket key that represents a missing value in a message.
pub const MISSING_VALUE: &str = "__missing__";

/// Separator between dimensions in multi-dimensional bucket keys. Callers
/// parsing digger output should split on this exact string.
pub const DIM_SEPARATOR: &str = "∪∪";
