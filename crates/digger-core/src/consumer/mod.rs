//! Source consumers.
//!
//! A consumer delivers a uniform record stream from one back-end into the
//! engine's record channel. Consumers must honor cancellation promptly,
//! never close channels they do not own, and emit records no larger than
//! [`MAX_RECORD_SIZE`].

mod file;
mod kafka;
mod s3;

use std::io::BufRead;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{DiggerError, Record};

pub use file::FileConsumer;
pub use kafka::KafkaConsumer;
pub use s3::S3Consumer;

/// Maximum size of a single scanned record line.
pub const MAX_RECORD_SIZE: usize = 512 * 1024;

/// Types that consume records from a source and feed them into a channel for
/// downstream processing.
#[async_trait]
pub trait Consumer: Send + Sync {
    async fn run(
        &self,
        shutdown: CancellationToken,
        records: mpsc::Sender<Record>,
    ) -> Result<(), DiggerError>;
}

/// Scan newline-delimited records out of `reader` and send them to the
/// record channel, assigning per-line offsets. Runs on a blocking thread:
/// sends block until the engine accepts each record, which is how source
/// backpressure works.
pub(crate) fn scan_records<R: BufRead>(
    reader: &mut R,
    partition: i32,
    key: &str,
    time: Option<DateTime<Utc>>,
    shutdown: &CancellationToken,
    records: &mpsc::Sender<Record>,
) -> Result<(), DiggerError> {
    let mut offset = 0i64;
    let mut line = Vec::with_capacity(4096);

    loop {
        if shutdown.is_cancelled() {
            return Err(DiggerError::Cancelled);
        }

        line.clear();
        let read = reader.read_until(b'\n', &mut line)?;
        if read == 0 {
            return Ok(());
        }

        if line.last() == Some(&b'\n') {
            line.pop();
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }

        if line.len() > MAX_RECORD_SIZE {
            return Err(DiggerError::RecordTooLarge {
                key: key.to_string(),
                max: MAX_RECORD_SIZE,
            });
        }

        let record = Record {
            partition,
            offset,
            key: key.to_string(),
            time,
            value: line.clone(),
        };

        // The receiver only goes away when the engine has stopped.
        if records.blocking_send(record).is_err() {
            return Err(DiggerError::Cancelled);
        }
        offset += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn collect_lines(input: &[u8]) -> Result<Vec<Record>, DiggerError> {
        let (tx, mut rx) = mpsc::channel(100);
        let shutdown = CancellationToken::new();

        let mut reader = Cursor::new(input.to_vec());
        scan_records(&mut reader, 3, "some-key", None, &shutdown, &tx)?;
        drop(tx);

        let mut out = Vec::new();
        while let Ok(record) = rx.try_recv() {
            out.push(record);
        }
        Ok(out)
    }

    #[test]
    fn test_scan_records() {
        let records = collect_lines(b"line1\nline2\nline3").unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].value, b"line1");
        assert_eq!(records[0].offset, 0);
        assert_eq!(records[0].partition, 3);
        assert_eq!(records[0].key, "some-key");
        assert_eq!(records[2].value, b"line3");
        assert_eq!(records[2].offset, 2);
    }

    #[test]
    fn test_scan_records_crlf_and_trailing_newline() {
        let records = collect_lines(b"a\r\nb\n").unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value, b"a");
        assert_eq!(records[1].value, b"b");
    }

    #[test]
    fn test_scan_records_too_large() {
        let big = vec![b'x'; MAX_RECORD_SIZE + 1];
        let err = collect_lines(&big).unwrap_err();

        assert!(matches!(err, DiggerError::RecordTooLarge { .. }));
    }

    #[test]
    fn test_scan_records_cancelled() {
        let (tx, _rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let mut reader = Cursor::new(b"line1\n".to_vec());
        let err = scan_records(&mut reader, 0, "key", None, &shutdown, &tx).unwrap_err();
        assert!(matches!(err, DiggerError::Cancelled));
    }
}
