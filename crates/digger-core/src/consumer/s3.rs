use std::io::BufReader;
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use tokio::sync::{mpsc, Mutex};
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{scan_records, Consumer};
use crate::{DiggerError, Record};

/// Consumer that reads newline-delimited records from one or more prefixes
/// in an S3 bucket.
///
/// A lister task paginates each prefix and feeds object descriptors into a
/// bounded work channel; `num_workers` workers fetch and scan the objects.
/// The partition is the object index in enumeration order across all
/// prefixes, the offset is the line index within the object, the key is the
/// object key, and the time is the object's last-modified timestamp. Keys
/// ending in `.gz` are decompressed while scanning.
pub struct S3Consumer {
    pub client: Client,
    pub bucket: String,
    pub prefixes: Vec<String>,
    pub num_workers: usize,
}

#[derive(Clone, Debug)]
struct ObjectTask {
    key: String,
    last_modified: Option<DateTime<Utc>>,
    index: i32,
}

#[async_trait]
impl Consumer for S3Consumer {
    async fn run(
        &self,
        shutdown: CancellationToken,
        records: mpsc::Sender<Record>,
    ) -> Result<(), DiggerError> {
        let num_workers = self.num_workers.max(1);

        let (object_tx, object_rx) = mpsc::channel::<ObjectTask>(num_workers);
        let object_rx = Arc::new(Mutex::new(object_rx));
        let (err_tx, mut err_rx) = mpsc::channel(num_workers + 1);

        for _ in 0..num_workers {
            let worker = WorkerContext {
                client: self.client.clone(),
                bucket: self.bucket.clone(),
                shutdown: shutdown.clone(),
                records: records.clone(),
                objects: Arc::clone(&object_rx),
            };
            let err_tx = err_tx.clone();
            tokio::spawn(async move {
                let _ = err_tx.send(worker.run().await).await;
            });
        }

        {
            let client = self.client.clone();
            let bucket = self.bucket.clone();
            let prefixes = self.prefixes.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let result = list_prefixes(&client, &bucket, &prefixes, &shutdown, object_tx).await;
                let _ = err_tx.send(result).await;
            });
        }

        for _ in 0..num_workers + 1 {
            if let Some(Err(err)) = err_rx.recv().await {
                return Err(err);
            }
        }

        Ok(())
    }
}

/// Paginate every prefix, handing object descriptors to the workers. The
/// object channel is closed when this returns, which is what lets the
/// workers drain and exit cleanly.
async fn list_prefixes(
    client: &Client,
    bucket: &str,
    prefixes: &[String],
    shutdown: &CancellationToken,
    object_tx: mpsc::Sender<ObjectTask>,
) -> Result<(), DiggerError> {
    let mut keys_read = 0i32;

    for prefix in prefixes {
        let mut pages = client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|err| DiggerError::ObjectStore(err.to_string()))?;

            for object in page.contents() {
                let task = ObjectTask {
                    key: object.key().unwrap_or_default().to_string(),
                    last_modified: object
                        .last_modified()
                        .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos())),
                    index: keys_read,
                };

                tokio::select! {
                    _ = shutdown.cancelled() => return Err(DiggerError::Cancelled),
                    sent = object_tx.send(task) => {
                        if sent.is_err() {
                            return Ok(());
                        }
                    }
                }

                keys_read += 1;
            }
        }
    }

    Ok(())
}

struct WorkerContext {
    client: Client,
    bucket: String,
    shutdown: CancellationToken,
    records: mpsc::Sender<Record>,
    objects: Arc<Mutex<mpsc::Receiver<ObjectTask>>>,
}

impl WorkerContext {
    async fn run(&self) -> Result<(), DiggerError> {
        loop {
            let task = {
                let mut objects = self.objects.lock().await;
                tokio::select! {
                    _ = self.shutdown.cancelled() => return Err(DiggerError::Cancelled),
                    task = objects.recv() => task,
                }
            };

            let Some(task) = task else {
                return Ok(());
            };

            let key = task.key.clone();
            self.process_object(task).await.map_err(|err| {
                DiggerError::ObjectStore(format!("error processing key {key}: {err}"))
            })?;
        }
    }

    async fn process_object(&self, task: ObjectTask) -> Result<(), DiggerError> {
        debug!(key = %task.key, "processing object");

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&task.key)
            .send()
            .await
            .map_err(|err| DiggerError::ObjectStore(err.to_string()))?;

        let body = SyncIoBridge::new(response.body.into_async_read());
        let gzipped = task.key.ends_with(".gz");

        let shutdown = self.shutdown.clone();
        let records = self.records.clone();

        tokio::task::spawn_blocking(move || {
            if gzipped {
                let mut reader = BufReader::new(GzDecoder::new(body));
                scan_records(
                    &mut reader,
                    task.index,
                    &task.key,
                    task.last_modified,
                    &shutdown,
                    &records,
                )
            } else {
                let mut reader = BufReader::new(body);
                scan_records(
                    &mut reader,
                    task.index,
                    &task.key,
                    task.last_modified,
                    &shutdown,
                    &records,
                )
            }
        })
        .await?
    }
}
