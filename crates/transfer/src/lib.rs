//! Streaming export and import of whole runs as gzip-compressed,
//! newline-delimited JSON.

use std::io;
use std::thread::JoinHandle;

use store_sqlite::StoreError;

pub mod export;
pub mod framing;
pub mod import;
pub mod record;

pub use export::{ExportSummary, PAGE_SIZE, export_run, spawn_export};
pub use framing::{Frame, LineFramer, MAX_LINE_BYTES};
pub use import::{CHUNK_SIZE, FramingPolicy, ImportOptions, ImportSummary, import_run, spawn_import};
pub use record::{Decoded, Record, RecordCounts, RecordKind, decode_line};

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("malformed record on line {line}: {reason}")]
    Framing { line: u64, reason: String },
    #[error("pipeline i/o failed: {0}")]
    PipelineIo(#[from] io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("pipeline worker panicked")]
    WorkerPanicked,
}

pub type TransferResult<T> = Result<T, TransferError>;

/// Completion signal of a pipeline running on a background thread.
pub struct PipelineHandle<T> {
    join: JoinHandle<TransferResult<T>>,
}

pub type ExportHandle = PipelineHandle<ExportSummary>;
pub type ImportHandle = PipelineHandle<ImportSummary>;

impl<T> PipelineHandle<T> {
    pub(crate) fn new(join: JoinHandle<TransferResult<T>>) -> Self {
        Self { join }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Blocks until the pipeline completes and returns its outcome.
    pub fn wait(self) -> TransferResult<T> {
        self.join
            .join()
            .map_err(|_| TransferError::WorkerPanicked)?
    }
}
