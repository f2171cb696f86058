use std::io::{self, Read};
use std::sync::Arc;
use std::thread;

use flate2::read::GzDecoder;
use store_sqlite::{InsertOutcome, SqliteStore, StoreError};
use tracing::{error, info, warn};

use crate::framing::{Frame, LineFramer, MAX_LINE_BYTES};
use crate::record::{Decoded, Record, RecordCounts, decode_line};
use crate::{ImportHandle, PipelineHandle, TransferError, TransferResult};

/// Decompressed bytes pulled from the source per read.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// What to do with a line that is not a valid record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FramingPolicy {
    /// Log it, count it, carry on with the next line.
    #[default]
    Skip,
    /// Stop the import. Records applied so far stay applied.
    Abort,
}

#[derive(Debug, Clone, Copy)]
pub struct ImportOptions {
    pub on_malformed: FramingPolicy,
    pub max_line_bytes: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            on_malformed: FramingPolicy::Skip,
            max_line_bytes: MAX_LINE_BYTES,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Newly inserted rows per kind.
    pub applied: RecordCounts,
    /// Records whose id already existed.
    pub ignored: u64,
    pub malformed: u64,
    /// Records whose owner row was absent when they arrived.
    pub orphaned: u64,
    /// Records the store refused, such as oversized evidence.
    pub rejected: u64,
    pub unknown: u64,
    /// Bytes after the last newline, dropped as an incomplete line.
    pub trailing_bytes: usize,
    /// Decompressed length of the stream.
    pub bytes: u64,
    /// BLAKE3 of the decompressed stream; matches the export digest when the
    /// stream arrived intact.
    pub digest: String,
}

/// Decompresses `source` in fixed-size chunks, frames complete lines and
/// applies each record with insert-or-ignore, preserving ids.
///
/// Records are applied in stream order and never reordered, so a dependent
/// that arrives before its owner is rejected as orphaned. An I/O failure ends
/// the import with `PipelineIo`; rows applied before it are kept.
pub fn import_run<R: Read>(
    store: &SqliteStore,
    source: R,
    options: ImportOptions,
) -> TransferResult<ImportSummary> {
    let mut decoder = GzDecoder::new(source);
    let mut framer = LineFramer::with_max_line(options.max_line_bytes);
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut hasher = blake3::Hasher::new();
    let mut summary = ImportSummary::default();

    loop {
        let n = match decoder.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(
                    applied = summary.applied.total(),
                    error = %err,
                    "import stream failed"
                );
                return Err(err.into());
            }
        };
        hasher.update(&chunk[..n]);
        summary.bytes += n as u64;
        for frame in framer.push(&chunk[..n]) {
            apply_frame(store, frame, &options, &mut summary)?;
        }
    }

    summary.trailing_bytes = framer.pending();
    if summary.trailing_bytes > 0 {
        warn!(
            bytes = summary.trailing_bytes,
            "dropping unterminated final line"
        );
    }
    summary.digest = hasher.finalize().to_hex().to_string();
    info!(
        applied = summary.applied.total(),
        ignored = summary.ignored,
        malformed = summary.malformed,
        orphaned = summary.orphaned,
        rejected = summary.rejected,
        unknown = summary.unknown,
        "import finished"
    );
    Ok(summary)
}

/// Runs [`import_run`] on a worker thread and returns at once.
pub fn spawn_import<R>(
    store: Arc<SqliteStore>,
    source: R,
    options: ImportOptions,
) -> TransferResult<ImportHandle>
where
    R: Read + Send + 'static,
{
    let join = thread::Builder::new()
        .name("import-run".to_string())
        .spawn(move || {
            let result = import_run(&store, source, options);
            if let Err(err) = &result {
                error!(error = %err, "import pipeline failed");
            }
            result
        })?;
    Ok(PipelineHandle::new(join))
}

fn apply_frame(
    store: &SqliteStore,
    frame: Frame,
    options: &ImportOptions,
    summary: &mut ImportSummary,
) -> TransferResult<()> {
    let (line, bytes) = match frame {
        Frame::Line { number, bytes } => (number, bytes),
        Frame::Oversized { number } => {
            let reason = format!("line exceeds {} bytes", options.max_line_bytes);
            return malformed(options.on_malformed, summary, number, reason);
        }
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(());
    }
    match decode_line(&bytes) {
        Ok(Decoded::Record(record)) => apply_record(store, line, record, summary),
        Ok(Decoded::Unknown(kind)) => {
            warn!(line, kind = %kind, "skipping record of unknown type");
            summary.unknown += 1;
            Ok(())
        }
        Err(err) => malformed(options.on_malformed, summary, line, err.to_string()),
    }
}

fn malformed(
    policy: FramingPolicy,
    summary: &mut ImportSummary,
    line: u64,
    reason: String,
) -> TransferResult<()> {
    match policy {
        FramingPolicy::Skip => {
            warn!(line, reason = %reason, "skipping malformed record");
            summary.malformed += 1;
            Ok(())
        }
        FramingPolicy::Abort => Err(TransferError::Framing { line, reason }),
    }
}

fn apply_record(
    store: &SqliteStore,
    line: u64,
    record: Record,
    summary: &mut ImportSummary,
) -> TransferResult<()> {
    let result = match &record {
        Record::Run(run) => store.insert_run_if_absent(run),
        Record::Card(card) => store.insert_card_if_absent(card),
        Record::Evidence(evidence) => store.insert_evidence_if_absent(evidence),
        Record::Thread(thread) => store.insert_thread_if_absent(thread),
        Record::Message(message) => store.insert_message_if_absent(message),
    };
    match result {
        Ok(InsertOutcome::Inserted) => summary.applied.bump(record.kind()),
        Ok(InsertOutcome::Ignored) => summary.ignored += 1,
        Err(err @ StoreError::MissingOwner { .. }) => {
            warn!(line, error = %err, "skipping record without owner");
            summary.orphaned += 1;
        }
        Err(err @ StoreError::PayloadTooLarge { .. }) => {
            warn!(line, kind = %record.kind(), id = record.id(), error = %err, "rejecting record");
            summary.rejected += 1;
        }
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use core_model::MAX_EVIDENCE_BYTES;

    use super::*;
    use crate::export::export_run;
    use crate::fixtures;

    fn exported(store: &SqliteStore, run_id: i64) -> Vec<u8> {
        let mut out = Vec::new();
        export_run(store, run_id, &mut out).unwrap();
        out
    }

    /// Hands out at most `step` bytes per read.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    /// Serves `data`, then fails instead of reporting end of stream.
    struct Severed {
        data: Cursor<Vec<u8>>,
    }

    impl Read for Severed {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.data.read(buf)? {
                0 => Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer closed")),
                n => Ok(n),
            }
        }
    }

    fn assert_same_graph(source: &SqliteStore, target: &SqliteStore, run_id: i64) {
        assert_eq!(target.get_run(run_id).unwrap(), source.get_run(run_id).unwrap());
        let cards = source.list_cards(run_id).unwrap();
        assert_eq!(target.list_cards(run_id).unwrap(), cards);
        for card in &cards {
            assert_eq!(
                target.list_evidence(card.id).unwrap(),
                source.list_evidence(card.id).unwrap()
            );
        }
        let threads = source.list_threads(run_id).unwrap();
        assert_eq!(target.list_threads(run_id).unwrap(), threads);
        for thread in &threads {
            assert_eq!(
                target.list_messages(thread.id).unwrap(),
                source.list_messages(thread.id).unwrap()
            );
        }
    }

    #[test]
    fn round_trip_reproduces_rows() {
        let source = fixtures::store();
        let run = fixtures::populated_run(&source);
        let bytes = exported(&source, run.id);

        let target = fixtures::store();
        let summary = import_run(&target, bytes.as_slice(), ImportOptions::default()).unwrap();
        assert_eq!(summary.applied.total(), 1 + 3 + 6 + 2 + 4);
        assert_eq!(summary.malformed + summary.orphaned + summary.ignored, 0);
        assert_eq!(summary.trailing_bytes, 0);
        assert_same_graph(&source, &target, run.id);
    }

    #[test]
    fn digest_matches_export() {
        let source = fixtures::store();
        let run = fixtures::populated_run(&source);
        let mut out = Vec::new();
        let exported = export_run(&source, run.id, &mut out).unwrap();
        let imported = import_run(&fixtures::store(), out.as_slice(), ImportOptions::default()).unwrap();
        assert_eq!(imported.digest, exported.digest);
        assert_eq!(imported.bytes, exported.bytes);
    }

    #[test]
    fn second_import_adds_nothing() {
        let source = fixtures::store();
        let run = fixtures::populated_run(&source);
        let bytes = exported(&source, run.id);

        let target = fixtures::store();
        import_run(&target, bytes.as_slice(), ImportOptions::default()).unwrap();
        let after_first = target.counts().unwrap();
        let again = import_run(&target, bytes.as_slice(), ImportOptions::default()).unwrap();
        assert_eq!(again.applied.total(), 0);
        assert_eq!(again.ignored, 16);
        assert_eq!(target.counts().unwrap(), after_first);
    }

    #[test]
    fn import_does_not_overwrite_existing_rows() {
        let store = fixtures::store();
        let run = fixtures::populated_run(&store);
        let bytes = exported(&store, run.id);
        let card = store.list_cards(run.id).unwrap().remove(0);
        store
            .upsert_card(run.id, &card.kind, &serde_json::json!("edited"))
            .unwrap();

        let summary = import_run(&store, bytes.as_slice(), ImportOptions::default()).unwrap();
        assert_eq!(summary.ignored, 16);
        assert_eq!(
            store.get_card(card.id).unwrap().unwrap().data,
            serde_json::json!("edited")
        );
    }

    #[test]
    fn byte_at_a_time_source_gives_same_rows() {
        let source = fixtures::store();
        let run = fixtures::populated_run(&source);
        let bytes = exported(&source, run.id);

        let target = fixtures::store();
        let trickle = Trickle {
            data: &bytes,
            step: 1,
        };
        let summary = import_run(&target, trickle, ImportOptions::default()).unwrap();
        assert_eq!(summary.applied.total(), 16);
        assert_same_graph(&source, &target, run.id);
    }

    #[test]
    fn malformed_line_is_skipped() {
        let ndjson = concat!(
            r#"{"type":"run","data":{"id":5,"status":"done","createdAt":"2026-10-01T00:00:00.000000Z"}}"#,
            "\n{not json\n",
            r#"{"type":"card","data":{"id":8,"runId":5,"type":"links","data":[1]}}"#,
            "\n",
        );
        let store = fixtures::store();
        let summary = import_run(
            &store,
            fixtures::gzip(ndjson.as_bytes()).as_slice(),
            ImportOptions::default(),
        )
        .unwrap();
        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.applied.runs, 1);
        assert_eq!(summary.applied.cards, 1);
        assert_eq!(store.list_cards(5).unwrap()[0].data, serde_json::json!([1]));
    }

    #[test]
    fn malformed_line_aborts_when_asked() {
        let ndjson = concat!(
            r#"{"type":"run","data":{"id":5,"status":"done","createdAt":"2026-10-01T00:00:00.000000Z"}}"#,
            "\n{not json\n",
            r#"{"type":"card","data":{"id":8,"runId":5,"type":"links","data":[1]}}"#,
            "\n",
        );
        let store = fixtures::store();
        let options = ImportOptions {
            on_malformed: FramingPolicy::Abort,
            ..ImportOptions::default()
        };
        let err = import_run(&store, fixtures::gzip(ndjson.as_bytes()).as_slice(), options)
            .unwrap_err();
        assert!(matches!(err, TransferError::Framing { line: 2, .. }));
        // Applied before the bad line, nothing after it.
        assert!(store.get_run(5).unwrap().is_some());
        assert_eq!(store.counts().unwrap().cards, 0);
    }

    #[test]
    fn dependents_before_owner_are_orphaned() {
        let ndjson = concat!(
            r#"{"type":"evidence","data":{"id":3,"cardId":8,"raw":"x","createdAt":"2026-10-01T00:00:00.000000Z"}}"#,
            "\n",
            r#"{"type":"run","data":{"id":5,"status":"done","createdAt":"2026-10-01T00:00:00.000000Z"}}"#,
            "\n",
            r#"{"type":"card","data":{"id":8,"runId":5,"type":"links","data":{}}}"#,
            "\n",
        );
        let store = fixtures::store();
        let summary = import_run(
            &store,
            fixtures::gzip(ndjson.as_bytes()).as_slice(),
            ImportOptions::default(),
        )
        .unwrap();
        assert_eq!(summary.orphaned, 1);
        assert_eq!(summary.applied.total(), 2);
        assert!(store.list_evidence(8).unwrap().is_empty());
    }

    #[test]
    fn unknown_kinds_and_blank_lines_are_skipped() {
        let ndjson = concat!(
            "\n",
            r#"{"type":"file","data":{"id":1,"runId":5,"name":"a"}}"#,
            "\n   \n",
            r#"{"type":"run","data":{"id":5,"status":"pending","createdAt":"2026-10-01T00:00:00.000000Z"}}"#,
            "\n",
        );
        let store = fixtures::store();
        let summary = import_run(
            &store,
            fixtures::gzip(ndjson.as_bytes()).as_slice(),
            ImportOptions::default(),
        )
        .unwrap();
        assert_eq!(summary.unknown, 1);
        assert_eq!(summary.malformed, 0);
        assert_eq!(summary.applied.runs, 1);
    }

    #[test]
    fn unterminated_tail_is_not_applied() {
        let ndjson = concat!(
            r#"{"type":"run","data":{"id":5,"status":"pending","createdAt":"2026-10-01T00:00:00.000000Z"}}"#,
            "\n",
            r#"{"type":"run","data":{"id":6,"status":"pending","createdAt":"2026-10-01T00:00:00.000000Z"}}"#,
        );
        let store = fixtures::store();
        let summary = import_run(
            &store,
            fixtures::gzip(ndjson.as_bytes()).as_slice(),
            ImportOptions::default(),
        )
        .unwrap();
        assert_eq!(summary.applied.runs, 1);
        assert!(summary.trailing_bytes > 0);
        assert!(store.get_run(6).unwrap().is_none());
    }

    #[test]
    fn oversized_evidence_is_rejected() {
        let evidence = serde_json::json!({
            "type": "evidence",
            "data": {
                "id": 3,
                "cardId": 8,
                "raw": "a".repeat(MAX_EVIDENCE_BYTES + 1),
                "createdAt": "2026-10-01T00:00:00.000000Z"
            }
        });
        let ndjson = format!(
            "{}\n{}\n{}\n",
            r#"{"type":"run","data":{"id":5,"status":"done","createdAt":"2026-10-01T00:00:00.000000Z"}}"#,
            r#"{"type":"card","data":{"id":8,"runId":5,"type":"links","data":{}}}"#,
            evidence
        );
        let store = fixtures::store();
        let summary = import_run(
            &store,
            fixtures::gzip(ndjson.as_bytes()).as_slice(),
            ImportOptions::default(),
        )
        .unwrap();
        assert_eq!(summary.rejected, 1);
        assert_eq!(store.counts().unwrap().evidence, 0);
    }

    #[test]
    fn overlong_line_is_malformed() {
        let ndjson = format!(
            "{}\n{}\n",
            r#"{"type":"run","data":{"id":5,"status":"done","createdAt":"2026-10-01T00:00:00.000000Z"}}"#,
            "x".repeat(512)
        );
        let store = fixtures::store();
        let options = ImportOptions {
            max_line_bytes: 256,
            ..ImportOptions::default()
        };
        let summary = import_run(&store, fixtures::gzip(ndjson.as_bytes()).as_slice(), options)
            .unwrap();
        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.applied.runs, 1);
    }

    #[test]
    fn severed_source_keeps_applied_rows() {
        let source = fixtures::store();
        let run = fixtures::populated_run(&source);
        let bytes = exported(&source, run.id);

        // Whole compressed stream, but the reader errors instead of ending.
        let target = fixtures::store();
        let err = import_run(
            &target,
            Severed {
                data: Cursor::new(bytes.clone()),
            },
            ImportOptions::default(),
        );
        match err {
            // The decoder may finish the gzip member before asking for more.
            Ok(summary) => assert_eq!(summary.applied.total(), 16),
            Err(err) => assert!(matches!(err, TransferError::PipelineIo(_))),
        }

        // Truncated stream: fails, and only whole lines were applied.
        let target = fixtures::store();
        let cut = &bytes[..bytes.len() / 2];
        let err = import_run(&target, cut, ImportOptions::default()).unwrap_err();
        assert!(matches!(err, TransferError::PipelineIo(_)));
        assert_eq!(target.integrity_check().unwrap(), "ok");
        let counts = target.counts().unwrap();
        assert!(counts.runs <= 1);
        assert!(counts.evidence <= 6);
    }

    #[test]
    fn spawned_import_reports_completion() {
        let source = fixtures::store();
        let run = fixtures::populated_run(&source);
        let bytes = exported(&source, run.id);

        let target = Arc::new(fixtures::store());
        let handle = spawn_import(Arc::clone(&target), Cursor::new(bytes), ImportOptions::default())
            .unwrap();
        let summary = handle.wait().unwrap();
        assert_eq!(summary.applied.total(), 16);
        assert_same_graph(&source, &target, run.id);
    }
}
