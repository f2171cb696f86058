use std::io::Write;
use std::sync::Arc;
use std::thread;

use flate2::{Compression, write::GzEncoder};
use store_sqlite::{SqliteStore, StoreResult};
use tracing::{error, info};

use crate::record::{Record, RecordCounts};
use crate::{ExportHandle, PipelineHandle, TransferError, TransferResult};

/// Rows fetched from the store per query while exporting.
pub const PAGE_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub run_id: i64,
    pub records: RecordCounts,
    /// Uncompressed length of the line stream.
    pub bytes: u64,
    /// BLAKE3 of the uncompressed line stream.
    pub digest: String,
}

/// Writes records through the compressor, tallying what went out.
struct RecordWriter<W: Write> {
    inner: W,
    line: Vec<u8>,
    hasher: blake3::Hasher,
    counts: RecordCounts,
    bytes: u64,
}

impl<W: Write> RecordWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            line: Vec::with_capacity(4096),
            hasher: blake3::Hasher::new(),
            counts: RecordCounts::default(),
            bytes: 0,
        }
    }

    fn write(&mut self, record: &Record) -> TransferResult<()> {
        self.line.clear();
        record.encode_into(&mut self.line)?;
        self.inner.write_all(&self.line)?;
        self.hasher.update(&self.line);
        self.bytes += self.line.len() as u64;
        self.counts.bump(record.kind());
        Ok(())
    }
}

/// Streams one run as gzip-compressed NDJSON into `sink`: the run, its cards,
/// their evidence, its threads, then their messages. Owners always precede
/// the rows that reference them.
///
/// Fails with `NotFound` before writing anything when the run does not exist.
pub fn export_run<W: Write>(
    store: &SqliteStore,
    run_id: i64,
    sink: W,
) -> TransferResult<ExportSummary> {
    let run = store.require_run(run_id)?;
    info!(run_id, "export started");

    let mut writer = RecordWriter::new(GzEncoder::new(sink, Compression::default()));
    writer.write(&Record::Run(run))?;
    drain_pages(
        |after| store.cards_after(run_id, after, PAGE_SIZE),
        |card| card.id,
        |card| writer.write(&Record::Card(card)),
    )?;
    drain_pages(
        |after| store.evidence_for_run_after(run_id, after, PAGE_SIZE),
        |evidence| evidence.id,
        |evidence| writer.write(&Record::Evidence(evidence)),
    )?;
    drain_pages(
        |after| store.threads_after(run_id, after, PAGE_SIZE),
        |thread| thread.id,
        |thread| writer.write(&Record::Thread(thread)),
    )?;
    drain_pages(
        |after| store.messages_for_run_after(run_id, after, PAGE_SIZE),
        |message| message.id,
        |message| writer.write(&Record::Message(message)),
    )?;

    let mut sink = writer.inner.finish()?;
    sink.flush()?;

    let summary = ExportSummary {
        run_id,
        records: writer.counts,
        bytes: writer.bytes,
        digest: writer.hasher.finalize().to_hex().to_string(),
    };
    info!(
        run_id,
        records = summary.records.total(),
        bytes = summary.bytes,
        "export finished"
    );
    Ok(summary)
}

/// Checks the run exists, then runs [`export_run`] on a worker thread and
/// returns at once. The outcome is observed through the handle; failures are
/// also logged.
pub fn spawn_export<W>(
    store: Arc<SqliteStore>,
    run_id: i64,
    sink: W,
) -> TransferResult<ExportHandle>
where
    W: Write + Send + 'static,
{
    store.require_run(run_id)?;
    let join = thread::Builder::new()
        .name(format!("export-run-{run_id}"))
        .spawn(move || {
            let result = export_run(&store, run_id, sink);
            if let Err(err) = &result {
                error!(run_id, error = %err, "export pipeline failed");
            }
            result
        })?;
    Ok(PipelineHandle::new(join))
}

fn drain_pages<T>(
    mut fetch: impl FnMut(i64) -> StoreResult<Vec<T>>,
    id_of: impl Fn(&T) -> i64,
    mut emit: impl FnMut(T) -> TransferResult<()>,
) -> TransferResult<()> {
    let mut after = i64::MIN;
    loop {
        let page = fetch(after)?;
        let Some(last) = page.last() else {
            return Ok(());
        };
        after = id_of(last);
        let exhausted = page.len() < PAGE_SIZE;
        for item in page {
            emit(item)?;
        }
        if exhausted {
            return Ok(());
        }
    }
}
