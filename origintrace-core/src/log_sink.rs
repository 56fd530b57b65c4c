//! Time-batched persistence of log entries.
//!
//! [`OperationLog`](crate::oplog::OperationLog) pushes every appended entry
//! into an unbounded channel without waiting. A [`LogBatcher`] task drains
//! that channel on a fixed interval and hands each non-empty batch to a
//! [`LogSink`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::Result;
use crate::oplog::OperationLogEntry;

/// Destination for batches of log entries.
#[async_trait]
pub trait LogSink: Send {
    async fn store(&mut self, batch: &[OperationLogEntry]) -> Result<()>;
}

/// Appends entries to a file, one JSON object per line.
pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LogSink for JsonLinesSink {
    async fn store(&mut self, batch: &[OperationLogEntry]) -> Result<()> {
        let mut buf = Vec::new();
        for entry in batch {
            serde_json::to_writer(&mut buf, entry)?;
            buf.push(b'\n');
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&buf).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Collects batches in memory. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    batches: Arc<Mutex<Vec<Vec<OperationLogEntry>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<OperationLogEntry>> {
        self.batches
            .lock()
            .map(|b| b.clone())
            .unwrap_or_default()
    }

    pub fn entries(&self) -> Vec<OperationLogEntry> {
        self.batches().into_iter().flatten().collect()
    }
}

#[async_trait]
impl LogSink for MemorySink {
    async fn store(&mut self, batch: &[OperationLogEntry]) -> Result<()> {
        if let Ok(mut batches) = self.batches.lock() {
            batches.push(batch.to_vec());
        }
        Ok(())
    }
}

pub struct LogBatcher;

impl LogBatcher {
    /// Drain `receiver` every `interval` into `sink`. The task ends after
    /// flushing whatever is left once every sender is dropped, returning
    /// the number of entries stored.
    pub fn spawn(
        mut receiver: mpsc::UnboundedReceiver<OperationLogEntry>,
        mut sink: Box<dyn LogSink>,
        interval: Duration,
    ) -> JoinHandle<Result<usize>> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut stored = 0;
            let mut batch = Vec::new();
            loop {
                ticker.tick().await;
                let mut closed = false;
                loop {
                    match receiver.try_recv() {
                        Ok(entry) => batch.push(entry),
                        Err(mpsc::error::TryRecvError::Empty) => break,
                        Err(mpsc::error::TryRecvError::Disconnected) => {
                            closed = true;
                            break;
                        }
                    }
                }
                if !batch.is_empty() {
                    sink.store(&batch).await?;
                    stored += batch.len();
                    debug!(entries = batch.len(), total = stored, "flushed log batch");
                    batch.clear();
                }
                if closed {
                    info!(total = stored, "log producers closed, batcher stopping");
                    return Ok(stored);
                }
            }
        })
    }
}
