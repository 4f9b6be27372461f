//! Core of the digger: source consumers, the engine that pumps records
//! through processors, and the live-stats processor itself.
//!
//! The data flow is `Consumer -> record channel -> Digger -> Processor`,
//! with cooperative cancellation threaded through every task via a
//! [`tokio_util::sync::CancellationToken`].

pub mod consumer;
pub mod engine;
mod error;
pub mod paths;
pub mod processor;
mod progress;
mod record;
pub mod util;

pub use error::DiggerError;
pub use record::Record;
