//! Disk-backed container
//!
//! Directory layout:
//!
//! ```text
//! <dir>/CONTAINER   manifest (JSON: format version, creation time)
//! <dir>/LOCK        advisory lock, held exclusively by the single writer
//! <dir>/data.seg    compacted segment written by optimize_for_read
//! <dir>/data.log    append-only write batches
//! ```
//!
//! Both data files use the same record framing:
//!
//! ```text
//! [4 bytes: payload length (little-endian u32)]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [1 byte:  codec id (0 = plain)]
//! [N bytes: bincode-serialized WriteBatch, possibly compressed]
//! ```
//!
//! On open the segment and then the log are replayed into an ordered map. A
//! record that fails its CRC check at the tail of the log is a torn write and
//! is dropped; a bad record followed by more data means the store is corrupt.

use super::{lock_unpoisoned, scan_prefix, Container, ContainerOptions, SyncMode, WriteBatch};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, warn};

const MANIFEST_FILE: &str = "CONTAINER";
const LOCK_FILE: &str = "LOCK";
const LOG_FILE: &str = "data.log";
const SEGMENT_FILE: &str = "data.seg";
const SEGMENT_TMP_FILE: &str = "data.seg.tmp";

/// On-disk format understood by this build.
pub const FORMAT_VERSION: u32 = 1;

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

const CODEC_PLAIN: u8 = 0;

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    created_at: DateTime<Utc>,
}

/// Records recovered from one data file.
struct Recovered {
    batches: Vec<WriteBatch>,
    /// Byte length of the valid prefix of the file
    valid_len: u64,
    file_len: u64,
}

/// Append target of the log file.
trait LogSink: Send + std::fmt::Debug {
    fn append(&mut self, record: &[u8]) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LogSink for File {
    fn append(&mut self, record: &[u8]) -> io::Result<()> {
        self.write_all(record)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Log writer that never leaves a partial record behind a complete one.
#[derive(Debug)]
struct LogWriter {
    sink: Box<dyn LogSink>,
    /// Length of the log up to the last complete record
    valid_len: u64,
    /// A failed append could not be rolled back
    poisoned: bool,
}

impl LogWriter {
    fn new(sink: Box<dyn LogSink>, valid_len: u64) -> Self {
        Self {
            sink,
            valid_len,
            poisoned: false,
        }
    }

    /// Append one framed record. On failure the log is cut back to its last
    /// complete record; if that fails too the writer refuses further appends.
    fn append(&mut self, path: &Path, record: &[u8], sync: bool) -> Result<()> {
        if self.poisoned {
            return Err(Error::BackendUnavailable(format!(
                "log of {} holds an unrecoverable partial record",
                path.display()
            )));
        }
        let written = self
            .sink
            .append(record)
            .and_then(|()| if sync { self.sink.sync() } else { Ok(()) });
        match written {
            Ok(()) => {
                self.valid_len += record.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.sink.truncate(self.valid_len) {
                    warn!(
                        path = %path.display(),
                        valid_len = self.valid_len,
                        error = %rollback,
                        "failed to drop partial record"
                    );
                    self.poisoned = true;
                }
                Err(e.into())
            }
        }
    }
}

/// Ordered key-value container persisted in a directory.
///
/// Read-write opens hold an exclusive advisory lock on `LOCK` until
/// [`Container::close`] (or drop). Read-only opens take no lock and serve a
/// snapshot of the data as of open time.
#[derive(Debug)]
pub struct DiskContainer {
    path: PathBuf,
    read_only: bool,
    options: ContainerOptions,
    memtable: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    log: Mutex<Option<LogWriter>>,
    lock_file: Mutex<Option<File>>,
    closed: AtomicBool,
    txn: Mutex<()>,
}

impl DiskContainer {
    /// Open the container stored in directory `path`.
    ///
    /// A writable open creates the directory and manifest when missing.
    ///
    /// # Errors
    /// - `BackendUnavailable` if another writer holds the lock, or a
    ///   read-only open targets a missing directory
    /// - `CorruptStore` if the manifest or a non-trailing record is unreadable
    pub fn open<P: AsRef<Path>>(path: P, read_only: bool, options: ContainerOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let lock_file = if read_only {
            if !path.is_dir() {
                return Err(Error::BackendUnavailable(format!(
                    "no container at {}",
                    path.display()
                )));
            }
            read_manifest(&path)?;
            None
        } else {
            fs::create_dir_all(&path)?;
            let lock_file = acquire_writer_lock(&path)?;
            if path.join(MANIFEST_FILE).exists() {
                read_manifest(&path)?;
            } else {
                write_manifest(&path)?;
            }
            Some(lock_file)
        };

        let mut memtable = BTreeMap::new();
        load_file(&path.join(SEGMENT_FILE), &mut memtable, false)?;
        let log_len = load_file(&path.join(LOG_FILE), &mut memtable, !read_only)?;

        let log = if read_only {
            None
        } else {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path.join(LOG_FILE))?;
            Some(LogWriter::new(Box::new(file), log_len))
        };

        debug!(
            path = %path.display(),
            read_only,
            entries = memtable.len(),
            "container opened"
        );

        Ok(Self {
            path,
            read_only,
            options,
            memtable: RwLock::new(memtable),
            log: Mutex::new(log),
            lock_file: Mutex::new(lock_file),
            closed: AtomicBool::new(false),
            txn: Mutex::new(()),
        })
    }

    /// Whether `path` holds an initialized container.
    #[must_use]
    pub fn exists_at(path: &Path) -> bool {
        path.join(MANIFEST_FILE).is_file()
    }

    /// Directory backing this container.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether [`Container::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.memtable.read().map_or(0, |m| m.len())
    }

    /// Whether the container holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the log has been folded into the segment.
    #[must_use]
    pub fn is_optimized(&self) -> bool {
        fs::metadata(self.path.join(LOG_FILE)).map_or(true, |m| m.len() == 0)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::BackendUnavailable(format!(
                "container {} is closed",
                self.path.display()
            )));
        }
        Ok(())
    }

    #[cfg(test)]
    fn set_log_sink(&self, sink: Box<dyn LogSink>) {
        if let Some(writer) = lock_unpoisoned(&self.log).as_mut() {
            writer.sink = sink;
        }
    }

    fn memtable_read(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>>> {
        self.memtable
            .read()
            .map_err(|_| Error::Other("container memtable lock poisoned".to_string()))
    }
}

impl Container for DiskContainer {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.memtable_read()?.get(key).cloned())
    }

    fn prefix_items(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.ensure_open()?;
        let memtable = self.memtable_read()?;
        Ok(scan_prefix(&memtable, prefix))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.ensure_open()?;
        if self.read_only {
            return Err(Error::InvalidMode(format!(
                "container {} is read-only",
                self.path.display()
            )));
        }
        if batch.is_empty() {
            return Ok(());
        }

        let record = frame(&encode_payload(&batch, &self.options)?)?;

        let mut log = lock_unpoisoned(&self.log);
        let writer = log.as_mut().ok_or_else(|| {
            Error::BackendUnavailable(format!("container {} is closed", self.path.display()))
        })?;
        writer.append(&self.path, &record, self.options.sync == SyncMode::EveryWrite)?;

        let mut memtable = self
            .memtable
            .write()
            .map_err(|_| Error::Other("container memtable lock poisoned".to_string()))?;
        batch.apply_to(&mut memtable);

        debug!(ops = batch.len(), bytes = record.len(), "container batch written");
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn optimize_for_read(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.read_only {
            return Err(Error::InvalidMode(
                "optimize_for_read requires a read-only container".to_string(),
            ));
        }
        if self.is_optimized() {
            debug!(path = %self.path.display(), "container already optimized");
            return Ok(());
        }

        let lock = acquire_writer_lock(&self.path)?;

        let mut merged = BTreeMap::new();
        load_file(&self.path.join(SEGMENT_FILE), &mut merged, false)?;
        load_file(&self.path.join(LOG_FILE), &mut merged, false)?;

        let mut batch = WriteBatch::new();
        for (key, value) in &merged {
            batch.put(key.clone(), value.clone());
        }
        let record = frame(&encode_payload(&batch, &self.options)?)?;

        let tmp = self.path.join(SEGMENT_TMP_FILE);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&record)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, self.path.join(SEGMENT_FILE))?;
        match fs::remove_file(self.path.join(LOG_FILE)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let entries = merged.len();
        *self
            .memtable
            .write()
            .map_err(|_| Error::Other("container memtable lock poisoned".to_string()))? = merged;

        FileExt::unlock(&lock)?;
        debug!(path = %self.path.display(), entries, "container compacted");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let flushed = lock_unpoisoned(&self.log)
            .take()
            .map_or(Ok(()), |mut writer| writer.sink.sync());

        if let Some(lock) = lock_unpoisoned(&self.lock_file).take() {
            if let Err(e) = FileExt::unlock(&lock) {
                warn!(path = %self.path.display(), error = %e, "failed to unlock container");
            }
        }

        if let Ok(mut memtable) = self.memtable.write() {
            memtable.clear();
        }

        debug!(path = %self.path.display(), "container closed");
        flushed.map_err(Error::from)
    }

    fn transaction(&self) -> MutexGuard<'_, ()> {
        lock_unpoisoned(&self.txn)
    }
}

impl Drop for DiskContainer {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(path = %self.path.display(), error = %e, "container close on drop failed");
        }
    }
}

fn acquire_writer_lock(dir: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(dir.join(LOCK_FILE))?;
    FileExt::try_lock_exclusive(&file).map_err(|e| {
        Error::BackendUnavailable(format!(
            "container {} is locked by another writer: {e}",
            dir.display()
        ))
    })?;
    Ok(file)
}

fn read_manifest(dir: &Path) -> Result<Manifest> {
    let raw = fs::read(dir.join(MANIFEST_FILE)).map_err(|e| {
        Error::CorruptStore(format!("cannot read manifest in {}: {e}", dir.display()))
    })?;
    let manifest: Manifest = serde_json::from_slice(&raw).map_err(|e| {
        Error::CorruptStore(format!("unparseable manifest in {}: {e}", dir.display()))
    })?;
    if manifest.format_version != FORMAT_VERSION {
        return Err(Error::CorruptStore(format!(
            "unsupported container format {} in {} (expected {FORMAT_VERSION})",
            manifest.format_version,
            dir.display()
        )));
    }
    Ok(manifest)
}

fn write_manifest(dir: &Path) -> Result<()> {
    let manifest = Manifest {
        format_version: FORMAT_VERSION,
        created_at: Utc::now(),
    };
    fs::write(dir.join(MANIFEST_FILE), serde_json::to_vec_pretty(&manifest)?)?;
    Ok(())
}

/// Replay a data file into `memtable`, returning the valid length.
///
/// With `repair` set, a torn tail is truncated away so later appends start
/// on a record boundary.
fn load_file(path: &Path, memtable: &mut BTreeMap<Vec<u8>, Vec<u8>>, repair: bool) -> Result<u64> {
    let buf = match fs::read(path) {
        Ok(buf) => buf,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let recovered = recover_records(path, &buf)?;
    for batch in &recovered.batches {
        batch.apply_to(memtable);
    }

    if repair && recovered.valid_len < recovered.file_len {
        warn!(
            path = %path.display(),
            valid_len = recovered.valid_len,
            file_len = recovered.file_len,
            "truncating torn record"
        );
        OpenOptions::new().write(true).open(path)?.set_len(recovered.valid_len)?;
    }
    Ok(recovered.valid_len)
}

fn recover_records(path: &Path, buf: &[u8]) -> Result<Recovered> {
    let file_len = buf.len();
    let mut batches = Vec::new();
    let mut offset = 0usize;

    while offset < file_len {
        if file_len - offset < HEADER_SIZE {
            warn!(path = %path.display(), offset, "truncated record header; dropping tail");
            break;
        }
        let length = u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]]) as usize;
        let expected_crc =
            u32::from_le_bytes([buf[offset + 4], buf[offset + 5], buf[offset + 6], buf[offset + 7]]);
        let end = offset + HEADER_SIZE + length;

        if length == 0 || end > file_len {
            warn!(path = %path.display(), offset, length, file_len, "truncated record; dropping tail");
            break;
        }

        let payload = &buf[offset + HEADER_SIZE..end];
        if crc32fast::hash(payload) != expected_crc {
            if end == file_len {
                warn!(path = %path.display(), offset, "CRC mismatch on final record; dropping tail");
                break;
            }
            return Err(Error::CorruptStore(format!(
                "CRC mismatch at offset {offset} in {}",
                path.display()
            )));
        }

        batches.push(decode_payload(payload)?);
        offset = end;
    }

    Ok(Recovered {
        batches,
        valid_len: offset as u64,
        file_len: file_len as u64,
    })
}

fn frame(payload: &[u8]) -> Result<Vec<u8>> {
    let length = u32::try_from(payload.len())
        .map_err(|_| Error::InvalidInput(format!("write batch too large: {} bytes", payload.len())))?;
    let mut record = Vec::with_capacity(HEADER_SIZE + payload.len());
    record.extend_from_slice(&length.to_le_bytes());
    record.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    record.extend_from_slice(payload);
    Ok(record)
}

fn encode_payload(batch: &WriteBatch, options: &ContainerOptions) -> Result<Vec<u8>> {
    let (codec, body) = compress_body(bincode::serialize(batch)?, options)?;
    let mut payload = Vec::with_capacity(body.len() + 1);
    payload.push(codec);
    payload.extend_from_slice(&body);
    Ok(payload)
}

fn decode_payload(payload: &[u8]) -> Result<WriteBatch> {
    let (&codec, body) = payload
        .split_first()
        .ok_or_else(|| Error::CorruptStore("empty record payload".to_string()))?;
    let body = decompress_body(codec, body)?;
    bincode::deserialize(&body).map_err(|e| Error::CorruptStore(format!("undecodable record: {e}")))
}

#[cfg(feature = "compression")]
fn compress_body(bytes: Vec<u8>, options: &ContainerOptions) -> Result<(u8, Vec<u8>)> {
    match options.compression {
        Some(compression) => Ok((compression.codec_id(), compression.compress(&bytes)?)),
        None => Ok((CODEC_PLAIN, bytes)),
    }
}

#[cfg(not(feature = "compression"))]
#[allow(clippy::unnecessary_wraps)]
fn compress_body(bytes: Vec<u8>, _options: &ContainerOptions) -> Result<(u8, Vec<u8>)> {
    Ok((CODEC_PLAIN, bytes))
}

#[cfg(feature = "compression")]
fn decompress_body(codec: u8, body: &[u8]) -> Result<Vec<u8>> {
    if codec == CODEC_PLAIN {
        return Ok(body.to_vec());
    }
    let compression = super::Compression::from_codec_id(codec)
        .ok_or_else(|| Error::CorruptStore(format!("unknown record codec {codec}")))?;
    compression.decompress(body)
}

#[cfg(not(feature = "compression"))]
fn decompress_body(codec: u8, body: &[u8]) -> Result<Vec<u8>> {
    if codec == CODEC_PLAIN {
        return Ok(body.to_vec());
    }
    Err(Error::CorruptStore(format!(
        "record uses codec {codec}; rebuild with the `compression` feature"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn put_one(container: &DiskContainer, key: &str, value: &str) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key.as_bytes().to_vec(), value.as_bytes().to_vec());
        container.write(batch)
    }

    #[test]
    fn test_reopen_replays_log() {
        let dir = TempDir::new().unwrap();
        {
            let c = DiskContainer::open(dir.path(), false, ContainerOptions::default()).unwrap();
            put_one(&c, "a", "1").unwrap();
            put_one(&c, "b", "2").unwrap();
            put_one(&c, "a", "3").unwrap();
            c.close().unwrap();
        }
        let c = DiskContainer::open(dir.path(), true, ContainerOptions::default()).unwrap();
        assert_eq!(c.get(b"a").unwrap(), Some(b"3".to_vec()));
        assert_eq!(c.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn test_second_writer_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let first = DiskContainer::open(dir.path(), false, ContainerOptions::default()).unwrap();
        let err = DiskContainer::open(dir.path(), false, ContainerOptions::default()).unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));

        // Readers coexist with the writer.
        DiskContainer::open(dir.path(), true, ContainerOptions::default()).unwrap();

        first.close().unwrap();
        DiskContainer::open(dir.path(), false, ContainerOptions::default()).unwrap();
    }

    #[test]
    fn test_read_only_missing_dir() {
        let dir = TempDir::new().unwrap();
        let err =
            DiskContainer::open(dir.path().join("nope"), true, ContainerOptions::default()).unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));
    }

    #[test]
    fn test_corrupt_manifest() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), b"{not json").unwrap();
        let err = DiskContainer::open(dir.path(), true, ContainerOptions::default()).unwrap_err();
        assert!(matches!(err, Error::CorruptStore(_)));
        let err = DiskContainer::open(dir.path(), false, ContainerOptions::default()).unwrap_err();
        assert!(matches!(err, Error::CorruptStore(_)));
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let dir = TempDir::new().unwrap();
        DiskContainer::open(dir.path(), false, ContainerOptions::default()).unwrap();
        let c = DiskContainer::open(dir.path(), true, ContainerOptions::default()).unwrap();
        assert!(matches!(put_one(&c, "k", "v"), Err(Error::InvalidMode(_))));
    }

    #[test]
    fn test_torn_tail_is_dropped_and_repaired() {
        let dir = TempDir::new().unwrap();
        {
            let c = DiskContainer::open(dir.path(), false, ContainerOptions::default()).unwrap();
            put_one(&c, "a", "1").unwrap();
        }
        let log = dir.path().join(LOG_FILE);
        let valid = fs::metadata(&log).unwrap().len();
        let mut file = OpenOptions::new().append(true).open(&log).unwrap();
        file.write_all(&[42, 0, 0, 0, 1, 2]).unwrap();
        drop(file);

        let c = DiskContainer::open(dir.path(), false, ContainerOptions::default()).unwrap();
        assert_eq!(fs::metadata(&log).unwrap().len(), valid);
        put_one(&c, "b", "2").unwrap();
        c.close().unwrap();

        let c = DiskContainer::open(dir.path(), true, ContainerOptions::default()).unwrap();
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn test_mid_log_corruption_is_fatal() {
        let dir = TempDir::new().unwrap();
        {
            let c = DiskContainer::open(dir.path(), false, ContainerOptions::default()).unwrap();
            put_one(&c, "a", "1").unwrap();
            put_one(&c, "b", "2").unwrap();
        }
        let log = dir.path().join(LOG_FILE);
        let mut bytes = fs::read(&log).unwrap();
        bytes[HEADER_SIZE + 2] ^= 0xFF;
        fs::write(&log, bytes).unwrap();

        let err = DiskContainer::open(dir.path(), true, ContainerOptions::default()).unwrap_err();
        assert!(matches!(err, Error::CorruptStore(_)));
    }

    /// Writes half of the next record, then fails.
    #[derive(Debug)]
    struct TornSink {
        file: File,
        tear_next: bool,
        fail_truncate: bool,
    }

    impl TornSink {
        fn open(dir: &Path, fail_truncate: bool) -> Box<dyn LogSink> {
            let file = OpenOptions::new().append(true).open(dir.join(LOG_FILE)).unwrap();
            Box::new(Self {
                file,
                tear_next: true,
                fail_truncate,
            })
        }
    }

    impl LogSink for TornSink {
        fn append(&mut self, record: &[u8]) -> io::Result<()> {
            if std::mem::take(&mut self.tear_next) {
                self.file.write_all(&record[..record.len() / 2])?;
                return Err(io::Error::other("no space left on device"));
            }
            self.file.write_all(record)
        }

        fn sync(&mut self) -> io::Result<()> {
            self.file.sync_data()
        }

        fn truncate(&mut self, len: u64) -> io::Result<()> {
            if self.fail_truncate {
                return Err(io::Error::other("read-only file system"));
            }
            self.file.set_len(len)
        }
    }

    #[test]
    fn test_failed_append_is_rolled_back() {
        let dir = TempDir::new().unwrap();
        {
            let container = DiskContainer::open(dir.path(), false, ContainerOptions::default()).unwrap();
            put_one(&container, "a", "1").unwrap();
            container.set_log_sink(TornSink::open(dir.path(), false));

            assert!(matches!(put_one(&container, "b", "2"), Err(Error::Io(_))));
            assert_eq!(container.get(b"b").unwrap(), None);
            put_one(&container, "c", "3").unwrap();
            container.close().unwrap();
        }

        let container = DiskContainer::open(dir.path(), true, ContainerOptions::default()).unwrap();
        assert_eq!(container.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(container.get(b"b").unwrap(), None);
        assert_eq!(container.get(b"c").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn test_unrecoverable_append_stops_writes() {
        let dir = TempDir::new().unwrap();
        {
            let container = DiskContainer::open(dir.path(), false, ContainerOptions::default()).unwrap();
            put_one(&container, "a", "1").unwrap();
            container.set_log_sink(TornSink::open(dir.path(), true));

            assert!(matches!(put_one(&container, "b", "2"), Err(Error::Io(_))));
            assert!(matches!(
                put_one(&container, "c", "3"),
                Err(Error::BackendUnavailable(_))
            ));
        }

        // The torn record is the tail, so a reopen drops it
        let container = DiskContainer::open(dir.path(), false, ContainerOptions::default()).unwrap();
        assert_eq!(container.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(container.get(b"c").unwrap(), None);
        put_one(&container, "d", "4").unwrap();
    }

    #[test]
    fn test_optimize_for_read() {
        let dir = TempDir::new().unwrap();
        {
            let c = DiskContainer::open(dir.path(), false, ContainerOptions::default()).unwrap();
            for i in 0..20 {
                put_one(&c, &format!("k{i:02}"), "v").unwrap();
            }
            let mut batch = WriteBatch::new();
            batch.delete_prefix(b"k1".to_vec());
            c.write(batch).unwrap();
            assert!(matches!(c.optimize_for_read(), Err(Error::InvalidMode(_))));
        }

        let c = DiskContainer::open(dir.path(), true, ContainerOptions::default()).unwrap();
        assert!(!c.is_optimized());
        c.optimize_for_read().unwrap();
        assert!(c.is_optimized());
        assert!(!dir.path().join(LOG_FILE).exists());
        assert_eq!(c.len(), 10);
        // Second call is a no-op.
        c.optimize_for_read().unwrap();

        let reopened = DiskContainer::open(dir.path(), true, ContainerOptions::default()).unwrap();
        assert_eq!(reopened.prefix_items(b"k0").unwrap().len(), 10);
    }

    #[test]
    fn test_optimize_blocked_by_writer() {
        let dir = TempDir::new().unwrap();
        let writer = DiskContainer::open(dir.path(), false, ContainerOptions::default()).unwrap();
        put_one(&writer, "a", "1").unwrap();

        let reader = DiskContainer::open(dir.path(), true, ContainerOptions::default()).unwrap();
        assert!(matches!(
            reader.optimize_for_read(),
            Err(Error::BackendUnavailable(_))
        ));
    }

    #[test]
    fn test_closed_container_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let c = DiskContainer::open(dir.path(), false, ContainerOptions::default()).unwrap();
        c.close().unwrap();
        c.close().unwrap();
        assert!(c.is_closed());
        assert!(matches!(c.get(b"a"), Err(Error::BackendUnavailable(_))));
        assert!(matches!(put_one(&c, "a", "1"), Err(Error::BackendUnavailable(_))));
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_compressed_records_round_trip() {
        let dir = TempDir::new().unwrap();
        let options = ContainerOptions {
            compression: Some(super::super::Compression::Zstd),
            ..ContainerOptions::default()
        };
        {
            let c = DiskContainer::open(dir.path(), false, options).unwrap();
            put_one(&c, "blob", &"x".repeat(4096)).unwrap();
        }
        assert!(fs::metadata(dir.path().join(LOG_FILE)).unwrap().len() < 1024);
        let c = DiskContainer::open(dir.path(), true, ContainerOptions::default()).unwrap();
        assert_eq!(c.get(b"blob").unwrap().map(|v| v.len()), Some(4096));
    }
}
