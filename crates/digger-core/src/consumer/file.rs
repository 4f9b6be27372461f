use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use walkdir::WalkDir;

use super::{scan_records, Consumer};
use crate::{DiggerError, Record};

/// Consumer that reads newline-delimited records from local files.
///
/// Directories are walked in lexical order; without `recursive`,
/// subdirectories of a listed directory are skipped. `.gz` files are
/// transparently decompressed. Partition numbers are assigned per file,
/// monotonically across the whole run; the offset is the line index within
/// the file, the key is the file path, and the time is the file mtime.
#[derive(Clone, Debug, Default)]
pub struct FileConsumer {
    pub paths: Vec<String>,
    pub recursive: bool,
}

#[async_trait]
impl Consumer for FileConsumer {
    async fn run(
        &self,
        shutdown: CancellationToken,
        records: mpsc::Sender<Record>,
    ) -> Result<(), DiggerError> {
        let consumer = self.clone();
        tokio::task::spawn_blocking(move || consumer.run_blocking(&shutdown, &records)).await?
    }
}

impl FileConsumer {
    fn run_blocking(
        &self,
        shutdown: &CancellationToken,
        records: &mpsc::Sender<Record>,
    ) -> Result<(), DiggerError> {
        let mut num_files = 0i32;

        for path in &self.paths {
            let metadata = std::fs::metadata(path)?;

            if metadata.is_dir() {
                let max_depth = if self.recursive { usize::MAX } else { 1 };

                for entry in WalkDir::new(path)
                    .max_depth(max_depth)
                    .sort_by_file_name()
                {
                    let entry = entry?;
                    if entry.file_type().is_file() {
                        self.process_file(entry.path(), num_files, shutdown, records)?;
                        num_files += 1;
                    }
                }
            } else {
                self.process_file(Path::new(path), num_files, shutdown, records)?;
                num_files += 1;
            }
        }

        Ok(())
    }

    fn process_file(
        &self,
        path: &Path,
        index: i32,
        shutdown: &CancellationToken,
        records: &mpsc::Sender<Record>,
    ) -> Result<(), DiggerError> {
        debug!(path = %path.display(), "processing file");

        let file = File::open(path)?;
        let mtime: Option<DateTime<Utc>> = file
            .metadata()?
            .modified()
            .ok()
            .map(DateTime::<Utc>::from);
        let key = path.to_string_lossy().into_owned();

        if path.extension().is_some_and(|ext| ext == "gz") {
            let mut reader = BufReader::new(GzDecoder::new(file));
            scan_records(&mut reader, index, &key, mtime, shutdown, records)
        } else {
            let mut reader = BufReader::new(file);
            scan_records(&mut reader, index, &key, mtime, shutdown, records)
        }
    }
}
