//! Append-only persistence of upload batches.
//!
//! [`FileRecordStore`] keeps one JSON document per batch under its data
//! directory (`batch-<id>.json`). Each document is written and fsynced to a
//! temporary file, then linked into place without replacing an existing
//! batch, so readers see either the whole batch or nothing. Appends within
//! one handle are serialized by a mutex; reads take no lock.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use pulse_core::formatting::format_bytes;
use pulse_core::models::{HealthRecord, UploadBatch};
use pulse_core::{PulseError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// File-name prefix of a stored batch.
const BATCH_PREFIX: &str = "batch-";

/// Ids tried before an append gives up when other writers keep taking them.
const MAX_ID_ATTEMPTS: usize = 16;

/// Metadata supplied by the caller when appending a batch.
#[derive(Debug, Clone)]
pub struct NewBatch {
    /// Source file name.
    pub name: String,
    /// Size of the uploaded file in bytes.
    pub size_bytes: u64,
    /// Ingestion time.
    pub time: DateTime<Utc>,
}

impl NewBatch {
    pub fn new(name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            name: name.into(),
            size_bytes,
            time: Utc::now(),
        }
    }
}

/// Batch metadata and records taken from a single read of the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    /// Most recent first.
    pub batches: Vec<UploadBatch>,
    /// Oldest batch first, batch order preserved.
    pub records: Vec<HealthRecord>,
}

impl StoreSnapshot {
    /// Build from batches ordered oldest first.
    fn from_batches(batches: impl IntoIterator<Item = StoredBatch>) -> Self {
        let mut snapshot = StoreSnapshot::default();
        for batch in batches {
            snapshot.records.extend(batch.records);
            snapshot.batches.push(batch.meta);
        }
        snapshot.batches.reverse();
        snapshot
    }
}

/// Durable, append-only storage of normalized batches.
///
/// Implementations must make each [`append`](RecordStore::append) atomic,
/// must serialize concurrent appends and must never replace a stored batch.
pub trait RecordStore: Send + Sync {
    /// Persist `records` as one batch and return its id.
    fn append(&self, batch: &NewBatch, records: &[HealthRecord]) -> Result<String>;

    /// Batches and records from one consistent pass over the store.
    fn snapshot(&self) -> Result<StoreSnapshot>;

    /// Every stored record, oldest batch first, batch order preserved.
    fn all_records(&self) -> Result<Vec<HealthRecord>> {
        Ok(self.snapshot()?.records)
    }

    /// Batch metadata, most recent first.
    fn list_batches(&self) -> Result<Vec<UploadBatch>> {
        Ok(self.snapshot()?.batches)
    }
}

/// On-disk form of one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredBatch {
    #[serde(flatten)]
    meta: UploadBatch,
    records: Vec<HealthRecord>,
}

impl StoredBatch {
    fn new(id: String, batch: &NewBatch, records: &[HealthRecord]) -> Self {
        Self {
            meta: UploadBatch {
                id,
                name: batch.name.clone(),
                size: format_bytes(batch.size_bytes),
                time: batch.time,
                record_count: records.len(),
            },
            records: records.to_vec(),
        }
    }
}

/// Next batch id: the batch time in milliseconds, bumped past `last` so ids
/// strictly increase even when two batches land in the same millisecond.
fn next_id(time: DateTime<Utc>, last: Option<u64>) -> u64 {
    let millis = time.timestamp_millis().max(0) as u64;
    match last {
        Some(prev) if millis <= prev => prev + 1,
        _ => millis,
    }
}

/// Zero-padded so lexicographic and numeric order agree.
fn format_id(id: u64) -> String {
    format!("{:015}", id)
}

// ── FileRecordStore ───────────────────────────────────────────────────────────

/// One JSON file per batch under `data_dir`.
pub struct FileRecordStore {
    data_dir: PathBuf,
    /// Last id handed out; `None` until the directory has been scanned.
    append_lock: Mutex<Option<u64>>,
}

impl FileRecordStore {
    /// Open a store rooted at `data_dir`. The directory is created lazily on
    /// the first append.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            append_lock: Mutex::new(None),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Stored batch files, sorted by name (= by id, oldest first).
    ///
    /// A data directory that does not exist yet is an empty store; any other
    /// failure to list it is an error.
    fn batch_files(&self) -> Result<Vec<PathBuf>> {
        match std::fs::metadata(&self.data_dir) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::read_error(&self.data_dir, e)),
            Ok(meta) if !meta.is_dir() => {
                return Err(Self::read_error(&self.data_dir, io::Error::other("not a directory")))
            }
            Ok(_) => {}
        }

        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(&self.data_dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                let path = e
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| self.data_dir.clone());
                PulseError::FileRead {
                    path,
                    source: e.into(),
                }
            })?;
            if entry.file_type().is_file() && is_batch_file(entry.path()) {
                files.push(entry.into_path());
            }
        }

        files.sort();
        Ok(files)
    }

    /// Load every batch, oldest first. Documents that are not valid JSON are
    /// skipped; I/O failures are returned.
    fn load_batches(&self) -> Result<Vec<StoredBatch>> {
        let files = self.batch_files()?;
        let mut batches = Vec::with_capacity(files.len());

        for path in &files {
            match read_batch(path) {
                Ok(batch) => batches.push(batch),
                Err(PulseError::JsonParse(e)) => {
                    warn!("Skipping corrupt batch {}: {}", path.display(), e)
                }
                Err(e) => return Err(e),
            }
        }

        debug!(
            "Loaded {} batches from {}",
            batches.len(),
            self.data_dir.display()
        );
        Ok(batches)
    }

    /// Highest id on disk. Called only from `append`, so a failed scan is a
    /// persistence failure.
    fn highest_stored_id(&self) -> Result<Option<u64>> {
        let files = self.batch_files().map_err(|e| match e {
            PulseError::FileRead { path, source } => PulseError::Persistence { path, source },
            other => other,
        })?;
        Ok(files.iter().filter_map(|p| batch_id_from_path(p)).max())
    }

    /// Write `stored` to `path` unless a batch already exists there.
    ///
    /// Returns `false` when the id is taken. The document is fsynced before
    /// it becomes visible.
    fn write_new(&self, path: &Path, stored: &StoredBatch) -> Result<bool> {
        let json = serde_json::to_vec(stored)
            .map_err(|e| Self::persist_error(path, io::Error::other(e)))?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".batch-")
            .suffix(".tmp")
            .tempfile_in(&self.data_dir)
            .map_err(|e| Self::persist_error(&self.data_dir, e))?;
        tmp.write_all(&json)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| Self::persist_error(tmp.path(), e))?;

        match tmp.persist_noclobber(path) {
            Ok(_) => Ok(true),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(Self::persist_error(path, e.error)),
        }
    }

    fn persist_error(path: &Path, source: io::Error) -> PulseError {
        PulseError::Persistence {
            path: path.to_path_buf(),
            source,
        }
    }

    fn read_error(path: &Path, source: io::Error) -> PulseError {
        PulseError::FileRead {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl RecordStore for FileRecordStore {
    fn append(&self, batch: &NewBatch, records: &[HealthRecord]) -> Result<String> {
        let mut last = self
            .append_lock
            .lock()
            .map_err(|_| PulseError::Other(anyhow::anyhow!("record store lock poisoned")))?;

        std::fs::create_dir_all(&self.data_dir)
            .map_err(|e| Self::persist_error(&self.data_dir, e))?;

        if last.is_none() {
            *last = self.highest_stored_id()?;
        }

        for _ in 0..MAX_ID_ATTEMPTS {
            let id = next_id(batch.time, *last);
            let id_str = format_id(id);
            let path = self.data_dir.join(format!("{}{}.json", BATCH_PREFIX, id_str));

            let stored = StoredBatch::new(id_str.clone(), batch, records);
            if !self.write_new(&path, &stored)? {
                // Another handle on this directory committed the id first.
                warn!(batch_id = %id_str, "Batch id already taken, rescanning");
                *last = (*last).max(Some(id)).max(self.highest_stored_id()?);
                continue;
            }
            *last = Some(id);

            sync_dir(&self.data_dir).map_err(|e| Self::persist_error(&self.data_dir, e))?;
            debug!(
                batch_id = %id_str,
                records = records.len(),
                "Appended batch {}",
                path.display()
            );
            return Ok(id_str);
        }

        Err(Self::persist_error(
            &self.data_dir,
            io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("no free batch id after {} attempts", MAX_ID_ATTEMPTS),
            ),
        ))
    }

    fn snapshot(&self) -> Result<StoreSnapshot> {
        Ok(StoreSnapshot::from_batches(self.load_batches()?))
    }
}

/// Flush the directory entry of a newly linked batch.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

fn is_batch_file(path: &Path) -> bool {
    let is_json = path.extension().map(|ext| ext == "json").unwrap_or(false);
    let has_prefix = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(BATCH_PREFIX))
        .unwrap_or(false);
    is_json && has_prefix
}

fn batch_id_from_path(path: &Path) -> Option<u64> {
    path.file_stem()?
        .to_str()?
        .strip_prefix(BATCH_PREFIX)?
        .parse()
        .ok()
}

fn read_batch(path: &Path) -> Result<StoredBatch> {
    let bytes = std::fs::read(path).map_err(|source| PulseError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

// ── MemoryRecordStore ─────────────────────────────────────────────────────────

/// In-process store; contents are lost when dropped.
#[derive(Default)]
pub struct MemoryRecordStore {
    batches: RwLock<Vec<StoredBatch>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> PulseError {
        PulseError::Other(anyhow::anyhow!("record store lock poisoned"))
    }
}

impl RecordStore for MemoryRecordStore {
    fn append(&self, batch: &NewBatch, records: &[HealthRecord]) -> Result<String> {
        let mut batches = self.batches.write().map_err(|_| Self::poisoned())?;
        let last = batches
            .last()
            .and_then(|b| b.meta.id.parse::<u64>().ok());
        let id = format_id(next_id(batch.time, last));
        batches.push(StoredBatch::new(id.clone(), batch, records));
        Ok(id)
    }

    fn snapshot(&self) -> Result<StoreSnapshot> {
        let batches = self.batches.read().map_err(|_| Self::poisoned())?;
        Ok(StoreSnapshot::from_batches(batches.iter().cloned()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn record(ts: &str, hr: f64, device: &str) -> HealthRecord {
        HealthRecord {
            timestamp: Some(ts.to_string()),
            heart_rate: Some(hr),
            device: device.to_string(),
            ..Default::default()
        }
    }

    fn batch_at(name: &str, millis: i64) -> NewBatch {
        NewBatch {
            name: name.to_string(),
            size_bytes: 2048,
            time: DateTime::from_timestamp_millis(millis).unwrap(),
        }
    }

    // ── ids ───────────────────────────────────────────────────────────────────

    #[test]
    fn test_next_id_uses_time_then_bumps() {
        let t = DateTime::from_timestamp_millis(1_000).unwrap();
        assert_eq!(next_id(t, None), 1_000);
        assert_eq!(next_id(t, Some(999)), 1_000);
        assert_eq!(next_id(t, Some(1_000)), 1_001);
        assert_eq!(next_id(t, Some(5_000)), 5_001);
    }

    #[test]
    fn test_format_id_sorts_lexicographically() {
        assert!(format_id(999) < format_id(1_000));
        assert_eq!(format_id(42).len(), 15);
    }

    // ── FileRecordStore ───────────────────────────────────────────────────────

    #[test]
    fn test_file_store_empty_directory() {
        let dir = TempDir::new().unwrap();
        let store = FileRecordStore::new(dir.path().join("missing"));
        assert!(store.all_records().unwrap().is_empty());
        assert!(store.list_batches().unwrap().is_empty());
    }

    #[test]
    fn test_file_store_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let store = FileRecordStore::new(dir.path());
        let records = vec![
            record("2024-01-01T00:00:00Z", 105.0, "Fitbit"),
            record("2024-01-01T00:05:00Z", 95.0, "Fitbit"),
        ];

        let id = store.append(&batch_at("hr.csv", 1_700_000_000_000), &records).unwrap();
        assert_eq!(id, "001700000000000");
        assert!(dir.path().join("batch-001700000000000.json").exists());

        assert_eq!(store.all_records().unwrap(), records);

        let batches = store.list_batches().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].name, "hr.csv");
        assert_eq!(batches[0].size, "2.00 KB");
        assert_eq!(batches[0].record_count, 2);
    }

    #[test]
    fn test_file_store_orders_batches() {
        let dir = TempDir::new().unwrap();
        let store = FileRecordStore::new(dir.path());

        store
            .append(&batch_at("first.csv", 1_000), &[record("a", 60.0, "A")])
            .unwrap();
        store
            .append(&batch_at("second.json", 2_000), &[record("b", 70.0, "B"), record("c", 80.0, "B")])
            .unwrap();

        let hrs: Vec<f64> = store
            .all_records()
            .unwrap()
            .iter()
            .filter_map(|r| r.heart_rate)
            .collect();
        assert_eq!(hrs, vec![60.0, 70.0, 80.0]);

        let names: Vec<String> = store
            .list_batches()
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["second.json", "first.csv"]);
    }

    #[test]
    fn test_file_store_same_millisecond_does_not_collide() {
        let dir = TempDir::new().unwrap();
        let store = FileRecordStore::new(dir.path());
        let batch = batch_at("dup.csv", 5_000);

        let a = store.append(&batch, &[record("a", 60.0, "A")]).unwrap();
        let b = store.append(&batch, &[record("a", 60.0, "A")]).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.all_records().unwrap().len(), 2);
        assert_eq!(store.list_batches().unwrap().len(), 2);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileRecordStore::new(dir.path());
            store
                .append(&batch_at("day1.csv", 10_000), &[record("a", 61.0, "A")])
                .unwrap();
        }

        let reopened = FileRecordStore::new(dir.path());
        assert_eq!(reopened.all_records().unwrap().len(), 1);

        // A fresh handle must not reuse an id that already exists on disk.
        let id = reopened
            .append(&batch_at("day0.csv", 9_000), &[record("b", 62.0, "B")])
            .unwrap();
        assert_eq!(id, format_id(10_001));
        assert_eq!(reopened.all_records().unwrap().len(), 2);
    }

    #[test]
    fn test_file_store_ignores_temp_and_foreign_files() {
        let dir = TempDir::new().unwrap();
        let store = FileRecordStore::new(dir.path());
        store
            .append(&batch_at("ok.csv", 1_000), &[record("a", 60.0, "A")])
            .unwrap();

        std::fs::write(dir.path().join("batch-000000000002000.json.tmp"), b"{partial").unwrap();
        std::fs::write(dir.path().join("notes.json"), b"[]").unwrap();

        assert_eq!(store.all_records().unwrap().len(), 1);
    }

    #[test]
    fn test_file_store_skips_corrupt_batch() {
        let dir = TempDir::new().unwrap();
        let store = FileRecordStore::new(dir.path());
        store
            .append(&batch_at("ok.csv", 1_000), &[record("a", 60.0, "A")])
            .unwrap();
        std::fs::write(dir.path().join("batch-000000000000500.json"), b"{corrupt").unwrap();

        assert_eq!(store.all_records().unwrap().len(), 1);
        assert_eq!(store.list_batches().unwrap().len(), 1);
    }

    #[test]
    fn test_file_store_write_failure_is_persistence_error() {
        let dir = TempDir::new().unwrap();
        // The data directory path is occupied by a regular file.
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let store = FileRecordStore::new(&blocker);

        let err = store
            .append(&batch_at("x.csv", 1_000), &[record("a", 60.0, "A")])
            .unwrap_err();
        assert_eq!(err.kind(), "PersistenceError");
    }

    #[test]
    fn test_file_store_unreadable_directory_is_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let store = FileRecordStore::new(&blocker);

        let err = store.all_records().unwrap_err();
        assert_eq!(err.kind(), "IoError");
        assert_eq!(store.list_batches().unwrap_err().kind(), "IoError");
        assert_eq!(store.snapshot().unwrap_err().kind(), "IoError");
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_unreadable_batch_is_error() {
        let dir = TempDir::new().unwrap();
        // A directory named like a batch cannot be read as one.
        let path = dir.path().join("batch-000000000000500.json");
        std::fs::create_dir(&path).unwrap();
        assert_eq!(read_batch(&path).unwrap_err().kind(), "IoError");
    }

    #[test]
    fn test_file_store_two_handles_never_overwrite() {
        let dir = TempDir::new().unwrap();
        let server = FileRecordStore::new(dir.path());
        let cli = FileRecordStore::new(dir.path());

        let first = server
            .append(&batch_at("server-1.csv", 1_000), &[record("a", 60.0, "A")])
            .unwrap();
        let second = cli
            .append(&batch_at("cli.csv", 2_000), &[record("b", 70.0, "B")])
            .unwrap();
        // The server handle last saw id 1000; 2000 is now taken on disk.
        let third = server
            .append(&batch_at("server-2.csv", 2_000), &[record("c", 80.0, "C")])
            .unwrap();

        assert_eq!(first, format_id(1_000));
        assert_eq!(second, format_id(2_000));
        assert_eq!(third, format_id(2_001));

        let names: Vec<String> = server
            .list_batches()
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["server-2.csv", "cli.csv", "server-1.csv"]);
        assert_eq!(cli.all_records().unwrap().len(), 3);
    }

    #[test]
    fn test_file_store_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = FileRecordStore::new(dir.path());
        for t in [1_000, 1_000, 3_000] {
            store
                .append(&batch_at("hr.csv", t), &[record("a", 60.0, "A")])
                .unwrap();
        }

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "batch-000000000001000.json",
                "batch-000000000001001.json",
                "batch-000000000003000.json",
            ]
        );
    }

    #[test]
    fn test_snapshot_counts_agree() {
        let dir = TempDir::new().unwrap();
        let store = FileRecordStore::new(dir.path());
        store
            .append(&batch_at("a.csv", 1_000), &[record("a", 60.0, "A"), record("b", 61.0, "A")])
            .unwrap();
        store
            .append(&batch_at("b.csv", 2_000), &[record("c", 62.0, "B")])
            .unwrap();

        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.batches.len(), 2);
        assert_eq!(snapshot.batches[0].name, "b.csv");
        let counted: usize = snapshot.batches.iter().map(|b| b.record_count).sum();
        assert_eq!(counted, snapshot.records.len());
        assert_eq!(snapshot.records[2].device, "B");
    }

    #[test]
    fn test_file_store_concurrent_appends_are_serialized() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileRecordStore::new(dir.path()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let records: Vec<HealthRecord> = (0..10)
                        .map(|j| record(&format!("t{}-{}", i, j), 60.0 + j as f64, "Dev"))
                        .collect();
                    store.append(&NewBatch::new(format!("{}.csv", i), 100), &records)
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap().unwrap();
        }

        let batches = store.list_batches().unwrap();
        assert_eq!(batches.len(), 8);
        let mut ids: Vec<&str> = batches.iter().map(|b| b.id.as_str()).collect();
        ids.dedup();
        assert_eq!(ids.len(), 8);

        // Every batch is contiguous in the concatenated read.
        let records = store.all_records().unwrap();
        assert_eq!(records.len(), 80);
        for chunk in records.chunks(10) {
            let prefix = chunk[0].timestamp.as_ref().unwrap().split('-').next().unwrap().to_string();
            assert!(chunk
                .iter()
                .all(|r| r.timestamp.as_ref().unwrap().starts_with(&format!("{}-", prefix))));
        }
    }

    // ── MemoryRecordStore ─────────────────────────────────────────────────────

    #[test]
    fn test_memory_store_append_and_list() {
        let store = MemoryRecordStore::new();
        store
            .append(&batch_at("a.csv", 1_000), &[record("a", 60.0, "A")])
            .unwrap();
        store
            .append(&batch_at("b.csv", 1_000), &[record("b", 70.0, "B")])
            .unwrap();

        let batches = store.list_batches().unwrap();
        assert_eq!(batches[0].name, "b.csv");
        assert_eq!(batches[0].id, format_id(1_001));
        assert_eq!(store.all_records().unwrap()[0].device, "A");
    }
}
