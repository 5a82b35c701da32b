//! Durable per-device record cache for store-and-forward delivery.
//!
//! Records that could not be delivered are appended to a per-device, per-day
//! log on local disk and replayed later by the [`crate::drain`] module.
//!
//! # Storage Format
//!
//! The cache is a flat directory of files named
//! `<device_key>_<YYYY-MM-DD>.cache`. The device key is everything before the
//! first `_`, so a device's files can be selected from their names alone.
//! Each file holds one [`Record`] per line, UTF-8, newline terminated.
//!
//! Files are append-only while in use and are only ever removed whole, once
//! every line has been acknowledged by the endpoint. They are never rewritten.
//!
//! A crash during an append can leave a torn last line without its `\n`. The
//! next append terminates that fragment first, so the torn line stays a
//! single malformed line and the new record is kept whole. A file whose valid
//! lines have all been acknowledged but which still holds malformed lines is
//! renamed to `<name>.cache.rejected`. It then no longer counts as a cache
//! file and stays on disk for inspection.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, PoisonError};

use chrono::{Local, NaiveDate};
use log::{debug, warn};
use thiserror::Error;

use crate::record::Record;

/// File extension of cache files (without the dot).
pub const CACHE_EXTENSION: &str = "cache";

/// Suffix appended to a cache file that was set aside with malformed lines.
pub const REJECTED_EXTENSION: &str = "rejected";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Errors raised by [`CacheStore`] operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache directory (or a file in it) cannot be written or listed.
    #[error("cache storage unavailable at {}: {source}", path.display())]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// A specific cache file could not be read or removed.
    #[error("cache file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The key cannot be encoded in a cache file name.
    #[error("invalid device key {0:?}: must be non-empty and free of '_', path separators and whitespace")]
    InvalidDeviceKey(String),
}

/// Check that a device key survives the `<key>_<date>.cache` encoding.
pub fn validate_device_key(key: &str) -> Result<(), CacheError> {
    let bad = key.is_empty()
        || key == "."
        || key == ".."
        || key
            .chars()
            .any(|c| c == '_' || c == '/' || c == '\\' || c.is_whitespace() || c.is_control());
    if bad {
        return Err(CacheError::InvalidDeviceKey(key.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Cache files
// ---------------------------------------------------------------------------

/// Handle to one cache file: the records of one device for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheFile {
    device_key: String,
    date: NaiveDate,
    path: PathBuf,
}

impl CacheFile {
    /// File name for a device and day, e.g. `abc123_2024-01-01.cache`.
    pub fn file_name(device_key: &str, date: NaiveDate) -> String {
        format!(
            "{device_key}_{}.{CACHE_EXTENSION}",
            date.format(DATE_FORMAT)
        )
    }

    /// Decode a cache file path. Returns `None` for names that do not follow
    /// the `<device_key>_<YYYY-MM-DD>.cache` scheme.
    pub fn parse(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let stem = name.strip_suffix(CACHE_EXTENSION)?.strip_suffix('.')?;
        let (device_key, date) = stem.split_once('_')?;
        if device_key.is_empty() {
            return None;
        }
        let date = NaiveDate::parse_from_str(date, DATE_FORMAT).ok()?;
        Some(Self {
            device_key: device_key.to_string(),
            date,
            path: path.to_path_buf(),
        })
    }

    pub fn device_key(&self) -> &str {
        &self.device_key
    }

    /// Day the file was created on (local time).
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// One line read back from a cache file.
#[derive(Debug)]
pub struct CachedLine {
    /// 1-based line number within the file.
    pub line_no: usize,
    /// The line as stored, without its terminator.
    pub raw: String,
    /// The decoded record, or why it could not be decoded.
    pub record: Result<Record, serde_json::Error>,
}

/// Lazy iterator over the lines of one cache file.
///
/// Blank lines are skipped. Reading a file again yields the same sequence
/// because files are never modified while they are being drained.
pub struct CacheRecords {
    path: PathBuf,
    lines: io::Lines<BufReader<File>>,
    line_no: usize,
}

impl Iterator for CacheRecords {
    type Item = Result<CachedLine, CacheError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(source) => {
                    return Some(Err(CacheError::Io {
                        path: self.path.clone(),
                        source,
                    }));
                }
            };
            self.line_no += 1;
            let raw = line.trim_end_matches('\r').to_string();
            if raw.trim().is_empty() {
                continue;
            }
            let record = Record::from_line(&raw);
            return Some(Ok(CachedLine {
                line_no: self.line_no,
                raw,
                record,
            }));
        }
    }
}

// ---------------------------------------------------------------------------
// Cache status
// ---------------------------------------------------------------------------

/// File and record counts for one device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceCacheStatus {
    pub files: usize,
    pub records: usize,
}

/// Snapshot of everything waiting in the cache directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStatus {
    pub files: usize,
    pub records: usize,
    pub per_device: BTreeMap<String, DeviceCacheStatus>,
}

impl CacheStatus {
    pub fn is_empty(&self) -> bool {
        self.files == 0
    }
}

// ---------------------------------------------------------------------------
// Per-device locking
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DeviceLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

/// Exclusive access to one device's cache files. Released on drop.
pub struct DeviceGuard<'a> {
    locks: &'a DeviceLocks,
    key: String,
}

impl DeviceGuard<'_> {
    pub fn device_key(&self) -> &str {
        &self.key
    }
}

impl Drop for DeviceGuard<'_> {
    fn drop(&mut self) {
        let mut held = self
            .locks
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        held.remove(&self.key);
        drop(held);
        self.locks.released.notify_all();
    }
}

// ---------------------------------------------------------------------------
// Cache store
// ---------------------------------------------------------------------------

/// The on-disk record cache.
///
/// Safe to share between threads. Appends and drains of the same device are
/// serialized through [`CacheStore::lock_device`]; different devices never
/// contend.
pub struct CacheStore {
    dir: PathBuf,
    locks: DeviceLocks,
}

impl CacheStore {
    /// Create a store rooted at `dir`. The directory is created lazily on the
    /// first append.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: DeviceLocks::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Block until no other append or drain holds `device_key`, then hold it.
    pub fn lock_device(&self, device_key: &str) -> DeviceGuard<'_> {
        let mut held = self
            .locks
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while held.contains(device_key) {
            held = self
                .locks
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(device_key.to_string());
        DeviceGuard {
            locks: &self.locks,
            key: device_key.to_string(),
        }
    }

    /// Path of the file holding `device_key`'s records for `date`.
    pub fn path_for(&self, device_key: &str, date: NaiveDate) -> PathBuf {
        self.dir.join(CacheFile::file_name(device_key, date))
    }

    /// Append a record to today's file for `device_key`.
    ///
    /// The line is written with a single write call and synced to disk before
    /// returning, so a crash afterwards cannot lose it.
    pub fn append(&self, device_key: &str, record: &Record) -> Result<(), CacheError> {
        self.append_for_date(device_key, Local::now().date_naive(), record)
    }

    /// Append a record to the file for `device_key` and an explicit `date`.
    pub fn append_for_date(
        &self,
        device_key: &str,
        date: NaiveDate,
        record: &Record,
    ) -> Result<(), CacheError> {
        validate_device_key(device_key)?;
        let _guard = self.lock_device(device_key);

        fs::create_dir_all(&self.dir).map_err(|source| CacheError::StorageUnavailable {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.path_for(device_key, date);
        let unavailable = |source| CacheError::StorageUnavailable {
            path: path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(unavailable)?;

        let mut line = String::new();
        if !ends_with_newline(&mut file).map_err(unavailable)? {
            warn!(
                "{}: last line is unterminated, closing it before appending",
                path.display()
            );
            line.push('\n');
        }
        line.push_str(&record.to_line());
        line.push('\n');

        file.write_all(line.as_bytes()).map_err(unavailable)?;
        file.flush().map_err(unavailable)?;
        file.sync_data().map_err(unavailable)?;

        debug!("cached record for {device_key} in {}", path.display());
        Ok(())
    }

    /// All cache files of `device_key`, oldest first.
    ///
    /// A missing cache directory is an empty cache.
    pub fn list_files(&self, device_key: &str) -> Result<Vec<CacheFile>, CacheError> {
        let mut files: Vec<CacheFile> = self
            .scan()?
            .into_iter()
            .filter(|f| f.device_key == device_key)
            .collect();
        files.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.path.cmp(&b.path)));
        Ok(files)
    }

    /// Lazily read the lines of `file` in order.
    pub fn read_all(&self, file: &CacheFile) -> Result<CacheRecords, CacheError> {
        let handle = File::open(&file.path).map_err(|source| CacheError::Io {
            path: file.path.clone(),
            source,
        })?;
        Ok(CacheRecords {
            path: file.path.clone(),
            lines: BufReader::new(handle).lines(),
            line_no: 0,
        })
    }

    /// Remove `file`. Only call once every line has been acknowledged.
    pub fn delete(&self, file: &CacheFile) -> Result<(), CacheError> {
        fs::remove_file(&file.path).map_err(|source| CacheError::Io {
            path: file.path.clone(),
            source,
        })
    }

    /// Rename `file` to `<name>.rejected` so drains stop seeing it.
    ///
    /// Used for files that still hold malformed lines after every valid line
    /// was acknowledged. Returns the new path.
    pub fn set_aside(&self, file: &CacheFile) -> Result<PathBuf, CacheError> {
        let mut name = file.path.as_os_str().to_owned();
        name.push(".");
        name.push(REJECTED_EXTENSION);
        let target = PathBuf::from(name);
        fs::rename(&file.path, &target).map_err(|source| CacheError::Io {
            path: file.path.clone(),
            source,
        })?;
        Ok(target)
    }

    /// Device keys that currently have at least one cache file.
    pub fn devices(&self) -> Result<Vec<String>, CacheError> {
        let keys: BTreeSet<String> = self.scan()?.into_iter().map(|f| f.device_key).collect();
        Ok(keys.into_iter().collect())
    }

    /// Count files and records across the whole cache directory.
    pub fn status(&self) -> Result<CacheStatus, CacheError> {
        let mut status = CacheStatus::default();
        for file in self.scan()? {
            let records = self.read_all(&file)?.count();
            status.files += 1;
            status.records += records;
            let entry = status.per_device.entry(file.device_key).or_default();
            entry.files += 1;
            entry.records += records;
        }
        Ok(status)
    }

    /// Every well-named cache file in the directory, unordered.
    fn scan(&self) -> Result<Vec<CacheFile>, CacheError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(CacheError::StorageUnavailable {
                    path: self.dir.clone(),
                    source,
                });
            }
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| CacheError::StorageUnavailable {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(file) = CacheFile::parse(&path) {
                files.push(file);
            }
        }
        Ok(files)
    }
}

/// `true` for an empty file or one whose last byte is `\n`.
fn ends_with_newline(file: &mut File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
