use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::consumer::Consumer;
use crate::processor::Processor;
use crate::{DiggerError, Record};

/// Digs through JSON or binary formatted record streams: binds one consumer
/// to a list of processors and pumps the record channel between them.
pub struct Digger {
    pub consumer: Arc<dyn Consumer>,
    pub processors: Vec<Box<dyn Processor>>,
}

impl Digger {
    pub fn new(consumer: Arc<dyn Consumer>, processors: Vec<Box<dyn Processor>>) -> Self {
        Digger {
            consumer,
            processors,
        }
    }

    /// Run until all data has been consumed, a fatal error is encountered,
    /// or the shutdown token is cancelled (in which case the result is
    /// [`DiggerError::Cancelled`], which callers treat as a clean stop).
    ///
    /// The record channel has capacity one, so a slow processor throttles
    /// every producer. Records are served serially through every processor
    /// on this task; processor errors are logged and never stop the engine.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), DiggerError> {
        let (record_tx, mut record_rx) = mpsc::channel::<Record>(1);

        let consumer = Arc::clone(&self.consumer);
        let consumer_shutdown = shutdown.clone();
        let mut consumer_task =
            tokio::spawn(async move { consumer.run(consumer_shutdown, record_tx).await });

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    return Err(DiggerError::Cancelled);
                }
                result = &mut consumer_task => {
                    // Serve anything the consumer handed off before it
                    // finished, then report its result.
                    while let Ok(record) = record_rx.try_recv() {
                        self.dispatch(&record);
                    }
                    return result?;
                }
                Some(record) = record_rx.recv() => {
                    self.dispatch(&record);
                }
            }
        }
    }

    fn dispatch(&mut self, record: &Record) {
        for processor in &mut self.processors {
            if let Err(err) = processor.process(record) {
                warn!(%err, "failed to process record");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StaticConsumer {
        records: Vec<Record>,
    }

    #[async_trait]
    impl Consumer for StaticConsumer {
        async fn run(
            &self,
            _shutdown: CancellationToken,
            records: mpsc::Sender<Record>,
        ) -> Result<(), DiggerError> {
            for record in &self.records {
                if records.send(record.clone()).await.is_err() {
                    return Err(DiggerError::Cancelled);
                }
            }
            Ok(())
        }
    }

    struct EndlessConsumer;

    #[async_trait]
    impl Consumer for EndlessConsumer {
        async fn run(
            &self,
            _shutdown: CancellationToken,
            records: mpsc::Sender<Record>,
        ) -> Result<(), DiggerError> {
            let mut offset = 0;
            loop {
                let record = Record {
                    offset,
                    ..Record::default()
                };
                if records.send(record).await.is_err() {
                    return Err(DiggerError::Cancelled);
                }
                offset += 1;
            }
        }
    }

    #[derive(Default)]
    struct RecordingProcessor {
        seen: Arc<Mutex<Vec<Record>>>,
    }

    #[async_trait]
    impl Processor for RecordingProcessor {
        fn process(&mut self, record: &Record) -> Result<(), DiggerError> {
            self.seen.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn stop(&mut self) -> Result<(), DiggerError> {
            Ok(())
        }

        fn summary(&self) -> String {
            String::new()
        }
    }

    fn test_records(n: i64) -> Vec<Record> {
        (0..n)
            .map(|offset| Record {
                partition: 0,
                offset,
                value: format!("{{\"n\":{offset}}}").into_bytes(),
                ..Record::default()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_engine_serves_all_records_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let processor = RecordingProcessor { seen: seen.clone() };

        let mut digger = Digger::new(
            Arc::new(StaticConsumer {
                records: test_records(25),
            }),
            vec![Box::new(processor)],
        );

        digger.run(CancellationToken::new()).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 25);
        let offsets: Vec<i64> = seen.iter().map(|r| r.offset).collect();
        assert_eq!(offsets, (0..25).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_engine_cancellation() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let processor = RecordingProcessor { seen: seen.clone() };

        let mut digger = Digger::new(Arc::new(EndlessConsumer), vec![Box::new(processor)]);

        let shutdown = CancellationToken::new();
        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = digger.run(shutdown).await.unwrap_err();
        assert!(matches!(err, DiggerError::Cancelled));
        assert!(!seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_engine_propagates_consumer_error() {
        struct FailingConsumer;

        #[async_trait]
        impl Consumer for FailingConsumer {
            async fn run(
                &self,
                _shutdown: CancellationToken,
                _records: mpsc::Sender<Record>,
            ) -> Result<(), DiggerError> {
                Err(DiggerError::Config("broken source".to_string()))
            }
        }

        let mut digger = Digger::new(Arc::new(FailingConsumer), vec![]);
        let err = digger.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, DiggerError::Config(_)));
    }
}
