//! Append-only, newline-delimited observation log
//!
//! The log is both the persistence for aggregated readings and the source of
//! truth for the dedup gate. Writers serialize on one mutex that belongs to the
//! log alone; readers do not take it and may miss a record that is being
//! written concurrently.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{instrument, trace};

use super::error::StorageResult;
use super::schema::AggregatedSample;

/// File-backed durable log
#[derive(Debug)]
pub struct DurableLog {
    path: PathBuf,

    /// Single-writer lock
    write_lock: Mutex<()>,
}

impl DurableLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, creating the file on first use.
    #[instrument(skip_all, fields(topic = %sample.topic, zip = %sample.zip, date = %sample.date))]
    pub async fn append(&self, sample: &AggregatedSample) -> StorageResult<()> {
        let mut line = serde_json::to_vec(sample)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        trace!("appended record to {}", self.path.display());
        Ok(())
    }

    /// Scan the log front to back until `predicate` matches.
    ///
    /// Lines that do not decode are skipped. A missing file reads as empty.
    pub async fn find<F>(&self, mut predicate: F) -> StorageResult<Option<AggregatedSample>>
    where
        F: FnMut(&AggregatedSample) -> bool,
    {
        let Some(mut lines) = self.open_lines().await? else {
            return Ok(None);
        };

        while let Some(line) = lines.next_line().await? {
            let Ok(sample) = serde_json::from_str::<AggregatedSample>(&line) else {
                trace!("skipping undecodable log line");
                continue;
            };
            if predicate(&sample) {
                return Ok(Some(sample));
            }
        }

        Ok(None)
    }

    /// Read every decodable record in log order.
    pub async fn read_all(&self) -> StorageResult<Vec<AggregatedSample>> {
        let mut samples = Vec::new();
        let Some(mut lines) = self.open_lines().await? else {
            return Ok(samples);
        };

        while let Some(line) = lines.next_line().await? {
            if let Ok(sample) = serde_json::from_str::<AggregatedSample>(&line) {
                samples.push(sample);
            }
        }

        Ok(samples)
    }

    async fn open_lines(&self) -> StorageResult<Option<tokio::io::Lines<BufReader<File>>>> {
        match File::open(&self.path).await {
            Ok(file) => Ok(Some(BufReader::new(file).lines())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
