//! Write-Ahead Log Module
//!
//! Append-only durability journal. Every mutating operation is appended
//! and flushed before the engine acknowledges it; startup replays all
//! retained segments in order to rebuild state. Only the newest segment
//! is ever writable, and the active file handle lives exclusively inside
//! this module.

mod record;
mod segment;

pub use record::{WalOp, WalRecord};
pub use segment::{SegmentHeader, WAL_FORMAT, WAL_VERSION};

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::current_timestamp_ms;
use crate::config::WalConfig;
use crate::error::Result;
use segment::{list_segments, segment_file_name};

// == Replay Outcome ==
/// Everything startup replay learned from the retained segments.
#[derive(Debug, Default)]
pub struct ReplayOutcome {
    /// Valid records in journal order
    pub records: Vec<WalRecord>,
    /// Non-trailing records dropped for failing integrity checks;
    /// non-zero means the rebuilt state is flagged partial
    pub corrupt_records: u64,
    /// Whether crash residue was cut off the active segment's tail
    pub truncated_tail: bool,
}

// == Writer State ==
struct WalWriter {
    file: tokio::fs::File,
    segment_index: u64,
    segment_bytes: u64,
    next_seq: u64,
}

// == Write-Ahead Log ==
/// The durability journal. All appends are serialized through one writer
/// so sequence numbers come out strictly monotonic and gapless.
pub struct WriteAheadLog {
    dir: PathBuf,
    segment_max_bytes: u64,
    retention: Duration,
    writer: Mutex<WalWriter>,
}

impl std::fmt::Debug for WriteAheadLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteAheadLog")
            .field("dir", &self.dir)
            .field("segment_max_bytes", &self.segment_max_bytes)
            .field("retention", &self.retention)
            .finish()
    }
}

impl WriteAheadLog {
    // == Open ==
    /// Opens (or creates) the journal and scans every retained segment.
    ///
    /// The caller applies the returned records against an empty store via
    /// the replay-only entry points; this function never re-appends
    /// anything it read. The active segment is repaired in place: a torn
    /// trailing record is truncated away so later appends start clean.
    pub async fn open(config: &WalConfig) -> Result<(Self, ReplayOutcome)> {
        tokio::fs::create_dir_all(&config.dir).await?;
        let segments = list_segments(&config.dir).await?;

        let mut outcome = ReplayOutcome::default();
        let mut last_seq = 0u64;
        let mut active_fix = None;

        let (active_index, active_path) = match segments.last() {
            Some((index, path)) => (*index, path.clone()),
            None => (1, config.dir.join(segment_file_name(1))),
        };

        for (index, path) in &segments {
            let mut scan = scan_segment(path).await?;
            outcome.corrupt_records += scan.corrupt;
            for record in &scan.records {
                last_seq = last_seq.max(record.seq);
            }
            if *index == active_index {
                outcome.truncated_tail = scan.truncated_tail;
                active_fix = Some((scan.valid_len, scan.needs_newline, scan.header_ok));
            }
            outcome.records.append(&mut scan.records);
        }

        let header_line = format!("{}\n", SegmentHeader::new().encode());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&active_path)
            .await?;

        let segment_bytes = match active_fix {
            // Brand-new journal: stamp the first segment.
            None => {
                file.write_all(header_line.as_bytes()).await?;
                header_line.len() as u64
            }
            // Active segment never got a usable header (crash during
            // creation); start it over.
            Some((_, _, false)) => {
                file.set_len(0).await?;
                file.write_all(header_line.as_bytes()).await?;
                header_line.len() as u64
            }
            Some((valid_len, needs_newline, true)) => {
                if outcome.truncated_tail {
                    file.set_len(valid_len).await?;
                }
                let mut bytes = valid_len;
                if needs_newline {
                    file.write_all(b"\n").await?;
                    bytes += 1;
                }
                bytes
            }
        };
        file.sync_data().await?;

        if !outcome.records.is_empty() || outcome.corrupt_records > 0 {
            info!(
                records = outcome.records.len(),
                corrupt = outcome.corrupt_records,
                truncated_tail = outcome.truncated_tail,
                "WAL scan complete"
            );
        }

        let wal = Self {
            dir: config.dir.clone(),
            segment_max_bytes: config.segment_max_bytes,
            retention: config.retention,
            writer: Mutex::new(WalWriter {
                file,
                segment_index: active_index,
                segment_bytes,
                next_seq: last_seq + 1,
            }),
        };
        Ok((wal, outcome))
    }

    // == Appends ==
    /// Journals a SET durably; returns its sequence number only after the
    /// bytes reached disk.
    pub async fn append_set(&self, key: &str, value: Value, ttl: Option<u64>) -> Result<u64> {
        let mut w = self.writer.lock().await;
        let record = WalRecord::set(w.next_seq, key, value, ttl, current_timestamp_ms());
        self.write_record(&mut w, &record).await?;
        self.commit(&mut w).await?;
        Ok(record.seq)
    }

    /// Journals a DELETE durably.
    pub async fn append_delete(&self, key: &str) -> Result<u64> {
        let mut w = self.writer.lock().await;
        let record = WalRecord::delete(w.next_seq, key, current_timestamp_ms());
        self.write_record(&mut w, &record).await?;
        self.commit(&mut w).await?;
        Ok(record.seq)
    }

    /// Journals a sweep expiry durably.
    pub async fn append_expire(&self, key: &str) -> Result<u64> {
        let mut w = self.writer.lock().await;
        let record = WalRecord::expire(w.next_seq, key, current_timestamp_ms());
        self.write_record(&mut w, &record).await?;
        self.commit(&mut w).await?;
        Ok(record.seq)
    }

    /// Journals many SETs with a single flush, for restore paths that
    /// re-log an entire state baseline.
    pub async fn append_set_batch(&self, items: Vec<(String, Value, Option<u64>)>) -> Result<()> {
        let mut w = self.writer.lock().await;
        for (key, value, ttl) in items {
            let record = WalRecord::set(w.next_seq, &key, value, ttl, current_timestamp_ms());
            self.write_record(&mut w, &record).await?;
        }
        self.commit(&mut w).await?;
        Ok(())
    }

    /// Writes one record, rotating the segment first if it would overflow.
    /// The sequence number is consumed only once the write succeeds.
    async fn write_record(&self, w: &mut WalWriter, record: &WalRecord) -> Result<()> {
        let line = format!("{}\n", record.encode());
        let header_len = format!("{}\n", SegmentHeader::new().encode()).len() as u64;
        if w.segment_bytes > header_len
            && w.segment_bytes + line.len() as u64 > self.segment_max_bytes
        {
            self.rotate(w).await?;
        }
        w.file.write_all(line.as_bytes()).await?;
        w.segment_bytes += line.len() as u64;
        w.next_seq = record.seq + 1;
        Ok(())
    }

    /// Flushes and syncs the active segment; the durability barrier every
    /// acknowledgment waits behind.
    async fn commit(&self, w: &mut WalWriter) -> Result<()> {
        w.file.flush().await?;
        w.file.sync_data().await?;
        Ok(())
    }

    // == Rotation ==
    async fn rotate(&self, w: &mut WalWriter) -> Result<()> {
        w.file.flush().await?;
        w.file.sync_data().await?;

        let next_index = w.segment_index + 1;
        let path = self.dir.join(segment_file_name(next_index));
        let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;
        let header_line = format!("{}\n", SegmentHeader::new().encode());
        file.write_all(header_line.as_bytes()).await?;
        file.sync_data().await?;

        debug!(segment = next_index, "rotated WAL segment");
        w.file = file;
        w.segment_index = next_index;
        w.segment_bytes = header_line.len() as u64;
        Ok(())
    }

    // == Reset ==
    /// Starts a fresh segment and drops all prior history.
    ///
    /// Used after `clear` and `restore`: the new baseline makes older
    /// records unreplayable, so keeping them would let a crash resurrect
    /// state the caller was told is gone. Sequence numbering continues
    /// monotonically across the reset.
    pub async fn reset(&self) -> Result<()> {
        let mut w = self.writer.lock().await;
        let old_active = w.segment_index;
        self.rotate(&mut w).await?;

        if let Ok(segments) = list_segments(&self.dir).await {
            for (index, path) in segments {
                if index <= old_active {
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        warn!(segment = index, error = %e, "failed to remove superseded WAL segment");
                    }
                }
            }
        }
        Ok(())
    }

    // == Retention ==
    /// Removes superseded segments older than the retention window.
    ///
    /// Purging is advisory: failures are logged and correctness never
    /// depends on it. Returns how many segments were removed.
    pub async fn purge_stale_segments(&self) -> u64 {
        let active_index = self.writer.lock().await.segment_index;

        let segments = match list_segments(&self.dir).await {
            Ok(segments) => segments,
            Err(e) => {
                warn!(error = %e, "failed to list WAL segments for retention");
                return 0;
            }
        };

        let mut purged = 0;
        for (index, path) in segments {
            if index >= active_index {
                continue;
            }
            if !segment_is_stale(&path, self.retention).await {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(segment = index, "purged WAL segment past retention");
                    purged += 1;
                }
                Err(e) => warn!(segment = index, error = %e, "failed to purge WAL segment"),
            }
        }
        purged
    }

    // == Sync ==
    /// Full flush of the active segment, used at shutdown.
    pub async fn sync(&self) -> Result<()> {
        let mut w = self.writer.lock().await;
        w.file.flush().await?;
        w.file.sync_all().await?;
        Ok(())
    }

    /// Sequence number the next append will receive.
    pub async fn next_seq(&self) -> u64 {
        self.writer.lock().await.next_seq
    }

    /// Overrides sequence bookkeeping, used when a restore establishes a
    /// new baseline.
    pub async fn set_next_seq(&self, next_seq: u64) {
        self.writer.lock().await.next_seq = next_seq;
    }
}

/// Whether a superseded segment has aged past the retention window.
async fn segment_is_stale(path: &Path, retention: Duration) -> bool {
    let modified = match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(_) => return false,
    };
    modified
        .elapsed()
        .map(|age| age >= retention)
        .unwrap_or(false)
}

// == Segment Scan ==
struct SegmentScan {
    records: Vec<WalRecord>,
    /// Byte length of the segment up to the end of its last valid record
    valid_len: u64,
    /// Last record was valid but missing its newline
    needs_newline: bool,
    header_ok: bool,
    corrupt: u64,
    truncated_tail: bool,
}

/// Reads one segment, separating valid records from crash residue.
///
/// A failure on the trailing record is expected after a crash and is
/// reported for silent truncation; a failure anywhere else is logged and
/// skipped so the remaining records still apply.
async fn scan_segment(path: &Path) -> Result<SegmentScan> {
    let data = tokio::fs::read_to_string(path).await?;
    let mut scan = SegmentScan {
        records: Vec::new(),
        valid_len: 0,
        needs_newline: false,
        header_ok: false,
        corrupt: 0,
        truncated_tail: false,
    };
    if data.is_empty() {
        return Ok(scan);
    }

    let chunks: Vec<&str> = data.split_inclusive('\n').collect();
    let mut offset = 0u64;

    for (i, chunk) in chunks.iter().enumerate() {
        let complete = chunk.ends_with('\n');
        let line = chunk.trim_end_matches('\n');
        let is_last = i == chunks.len() - 1;

        if i == 0 {
            match SegmentHeader::decode(line) {
                Ok(_) => {
                    scan.header_ok = true;
                    offset += chunk.len() as u64;
                    scan.valid_len = offset;
                }
                // A torn header with nothing after it is crash residue on
                // a segment that never got going; anything else is an
                // incompatible journal and is refused.
                Err(_) if is_last && !complete => {
                    scan.truncated_tail = true;
                    return Ok(scan);
                }
                Err(e) => return Err(e),
            }
            continue;
        }

        if line.is_empty() {
            offset += chunk.len() as u64;
            continue;
        }

        match WalRecord::decode(line) {
            Ok(record) => {
                offset += chunk.len() as u64;
                scan.valid_len = offset;
                if !complete {
                    scan.needs_newline = true;
                }
                scan.records.push(record);
            }
            Err(e) => {
                if is_last {
                    debug!(path = %path.display(), "dropping torn trailing WAL record");
                    scan.truncated_tail = true;
                    break;
                }
                warn!(path = %path.display(), error = %e, "skipping corrupt WAL record");
                scan.corrupt += 1;
                offset += chunk.len() as u64;
            }
        }
    }

    Ok(scan)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn wal_config(dir: &Path, segment_max_bytes: u64) -> WalConfig {
        WalConfig {
            enabled: true,
            dir: dir.to_path_buf(),
            segment_max_bytes,
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }

    #[tokio::test]
    async fn test_append_and_replay_roundtrip() {
        let dir = tempdir().unwrap();
        let config = wal_config(dir.path(), 10 * 1024 * 1024);

        {
            let (wal, outcome) = WriteAheadLog::open(&config).await.unwrap();
            assert!(outcome.records.is_empty());

            assert_eq!(wal.append_set("a", json!(1), Some(60)).await.unwrap(), 1);
            assert_eq!(wal.append_set("b", json!(2), None).await.unwrap(), 2);
            assert_eq!(wal.append_delete("a").await.unwrap(), 3);
            assert_eq!(wal.append_expire("b").await.unwrap(), 4);
        }

        let (wal, outcome) = WriteAheadLog::open(&config).await.unwrap();
        assert_eq!(outcome.corrupt_records, 0);
        assert!(!outcome.truncated_tail);

        let ops: Vec<(u64, WalOp)> = outcome.records.iter().map(|r| (r.seq, r.op)).collect();
        assert_eq!(
            ops,
            vec![
                (1, WalOp::Set),
                (2, WalOp::Set),
                (3, WalOp::Delete),
                (4, WalOp::Expire)
            ]
        );
        assert_eq!(wal.next_seq().await, 5);
    }

    #[tokio::test]
    async fn test_segment_rotation_and_cross_segment_replay() {
        let dir = tempdir().unwrap();
        // Tiny ceiling forces a rotation every couple of records.
        let config = wal_config(dir.path(), 256);

        {
            let (wal, _) = WriteAheadLog::open(&config).await.unwrap();
            for i in 0..20 {
                wal.append_set(&format!("key_{}", i), json!(i), Some(60))
                    .await
                    .unwrap();
            }
        }

        let segments = list_segments(dir.path()).await.unwrap();
        assert!(segments.len() > 1, "expected rotation to produce segments");

        let (_, outcome) = WriteAheadLog::open(&config).await.unwrap();
        assert_eq!(outcome.records.len(), 20);
        let seqs: Vec<u64> = outcome.records.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, (1..=20).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_torn_trailing_record_is_truncated_silently() {
        let dir = tempdir().unwrap();
        let config = wal_config(dir.path(), 10 * 1024 * 1024);

        {
            let (wal, _) = WriteAheadLog::open(&config).await.unwrap();
            for i in 0..5 {
                wal.append_set(&format!("key_{}", i), json!(i), None).await.unwrap();
            }
        }

        // Tear the tail mid-record, as a crash during append would.
        let path = dir.path().join(segment_file_name(1));
        let data = std::fs::read(&path).unwrap();
        std::fs::write(&path, &data[..data.len() - 7]).unwrap();

        let (wal, outcome) = WriteAheadLog::open(&config).await.unwrap();
        assert_eq!(outcome.records.len(), 4, "torn record dropped");
        assert!(outcome.truncated_tail);
        assert_eq!(outcome.corrupt_records, 0, "crash residue is not corruption");

        // The journal keeps working and numbering stays gapless.
        assert_eq!(wal.append_set("after", json!("crash"), None).await.unwrap(), 5);
        drop(wal);

        let (_, outcome) = WriteAheadLog::open(&config).await.unwrap();
        assert_eq!(outcome.records.len(), 5);
        assert!(!outcome.truncated_tail);
    }

    #[tokio::test]
    async fn test_corrupt_middle_record_is_skipped_and_counted() {
        let dir = tempdir().unwrap();
        let config = wal_config(dir.path(), 10 * 1024 * 1024);

        {
            let (wal, _) = WriteAheadLog::open(&config).await.unwrap();
            for i in 0..5 {
                wal.append_set(&format!("key_{}", i), json!(i), None).await.unwrap();
            }
        }

        // Garble the middle record (line 0 is the header).
        let path = dir.path().join(segment_file_name(1));
        let data = std::fs::read_to_string(&path).unwrap();
        let mut lines: Vec<String> = data.lines().map(String::from).collect();
        lines[3] = lines[3].replace("key_2", "key_X");
        std::fs::write(&path, lines.join("\n") + "\n").unwrap();

        let (_, outcome) = WriteAheadLog::open(&config).await.unwrap();
        assert_eq!(outcome.corrupt_records, 1);
        assert!(!outcome.truncated_tail);
        let keys: Vec<&str> = outcome.records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["key_0", "key_1", "key_3", "key_4"]);
    }

    #[tokio::test]
    async fn test_unknown_version_is_refused() {
        let dir = tempdir().unwrap();
        let config = wal_config(dir.path(), 10 * 1024 * 1024);

        let bogus = format!("{{\"format\":\"{}\",\"version\":99}}\n", WAL_FORMAT);
        std::fs::write(dir.path().join(segment_file_name(1)), bogus).unwrap();

        let err = WriteAheadLog::open(&config).await.unwrap_err();
        assert!(matches!(err, crate::error::CacheError::Corruption(_)));
    }

    #[tokio::test]
    async fn test_reset_drops_history() {
        let dir = tempdir().unwrap();
        let config = wal_config(dir.path(), 10 * 1024 * 1024);

        let (wal, _) = WriteAheadLog::open(&config).await.unwrap();
        wal.append_set("a", json!(1), None).await.unwrap();
        wal.append_set("b", json!(2), None).await.unwrap();
        wal.reset().await.unwrap();
        wal.append_set("c", json!(3), None).await.unwrap();
        drop(wal);

        let (_, outcome) = WriteAheadLog::open(&config).await.unwrap();
        let keys: Vec<&str> = outcome.records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["c"]);
        // Numbering continued across the reset.
        assert_eq!(outcome.records[0].seq, 3);
    }

    #[tokio::test]
    async fn test_purge_respects_retention_window() {
        let dir = tempdir().unwrap();
        let mut config = wal_config(dir.path(), 200);

        {
            let (wal, _) = WriteAheadLog::open(&config).await.unwrap();
            for i in 0..10 {
                wal.append_set(&format!("key_{}", i), json!(i), None).await.unwrap();
            }
            // Long retention: nothing is old enough to purge.
            assert_eq!(wal.purge_stale_segments().await, 0);
        }

        // Zero retention: everything superseded is immediately stale.
        config.retention = Duration::from_secs(0);
        let (wal, outcome) = WriteAheadLog::open(&config).await.unwrap();
        let before = list_segments(dir.path()).await.unwrap().len();
        assert!(before > 1);
        let purged = wal.purge_stale_segments().await;
        assert_eq!(purged as usize, before - 1, "all but the active segment purged");

        // Purging never touches replayed correctness going forward.
        assert!(!outcome.records.is_empty());
    }

    #[tokio::test]
    async fn test_append_batch_is_single_sync() {
        let dir = tempdir().unwrap();
        let config = wal_config(dir.path(), 10 * 1024 * 1024);

        let (wal, _) = WriteAheadLog::open(&config).await.unwrap();
        wal.append_set_batch(vec![
            ("a".to_string(), json!(1), Some(10)),
            ("b".to_string(), json!(2), None),
        ])
        .await
        .unwrap();
        assert_eq!(wal.next_seq().await, 3);
        drop(wal);

        let (_, outcome) = WriteAheadLog::open(&config).await.unwrap();
        assert_eq!(outcome.records.len(), 2);
    }
}
