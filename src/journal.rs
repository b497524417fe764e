//! Append-only journal of committed cache updates.
//!
//! Each entry holds one cache's serialized update stream for one committed
//! transaction. On restart the journal is replayed through the
//! [`CacheRegistry`](crate::registry::CacheRegistry) to rebuild cache state.
//!
//! Layout: a 5-byte header (`TCJ\0` + version) followed by frames of
//! `cache_id u64 | commit_ts u64 | len u32 | updates | crc32 u32`, all
//! big-endian. The checksum covers everything in the frame before it.

use crate::error::{CacheError, Result};
use crate::types::{CacheId, Timestamp};
use fs2::FileExt;
use memmap2::Mmap;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for journal file.
const JOURNAL_MAGIC: &[u8; 4] = b"TCJ\0";

/// Current journal format version.
const JOURNAL_VERSION: u8 = 1;

const HEADER_SIZE: usize = 5;

/// cache id + commit timestamp + length.
const FRAME_HEADER_SIZE: usize = 8 + 8 + 4;

const CHECKSUM_SIZE: usize = 4;

/// Sanity bound on a single entry.
const MAX_ENTRY_SIZE: usize = 64 * 1024 * 1024;

/// Journal configuration.
#[derive(Clone, Debug)]
pub struct JournalConfig {
    /// Path of the journal file.
    pub path: PathBuf,

    /// Sync to disk every N appends (0 is treated as 1).
    pub sync_interval: u64,

    /// Whether to create the journal if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./txcache.journal"),
            sync_interval: 1,
            create_if_missing: true,
        }
    }
}

impl JournalConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_sync_interval(mut self, sync_interval: u64) -> Self {
        self.sync_interval = sync_interval;
        self
    }

    pub fn with_create_if_missing(mut self, create_if_missing: bool) -> Self {
        self.create_if_missing = create_if_missing;
        self
    }
}

/// One cache's updates from one committed transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JournalEntry {
    pub cache_id: CacheId,
    pub commit_timestamp: Timestamp,
    /// Serialized `opcode arg` records.
    pub updates: Vec<u8>,
}

/// Result of scanning the frames of a journal.
struct Scan {
    entries: Vec<JournalEntry>,
    /// Bytes (after the header) covered by complete frames.
    valid_len: usize,
}

/// File-backed update journal.
pub struct UpdateJournal {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    writes_since_sync: Mutex<u64>,
    sync_interval: u64,
    _lock_file: File,
}

impl UpdateJournal {
    /// Open an existing journal or create a new one.
    ///
    /// A torn frame at the end of an existing journal is cut off so new
    /// entries can follow the last complete one.
    pub fn open(config: JournalConfig) -> Result<Self> {
        let path = config.path;
        let exists = path.exists();
        if !exists && !config.create_if_missing {
            return Err(CacheError::NotInitialized);
        }

        let lock_file = Self::acquire_lock(&path)?;

        if exists {
            let file = OpenOptions::new().read(true).write(true).open(&path)?;
            let scan = Self::scan_file(&file, &path)?;
            let valid = (HEADER_SIZE + scan.valid_len) as u64;
            if file.metadata()?.len() > valid {
                tracing::warn!(
                    "truncating torn tail of journal {} at offset {}",
                    path.display(),
                    valid
                );
                file.set_len(valid)?;
                file.sync_all()?;
            }
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;
            file.write_all(JOURNAL_MAGIC)?;
            file.write_all(&[JOURNAL_VERSION])?;
            file.sync_all()?;
        }

        let file = OpenOptions::new().append(true).open(&path)?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
            writes_since_sync: Mutex::new(0),
            sync_interval: config.sync_interval.max(1),
            _lock_file: lock_file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry.
    pub fn append(&self, entry: &JournalEntry) -> Result<()> {
        let frame = Self::encode_frame(entry)?;

        let mut writer = self.writer.lock();
        writer.write_all(&frame)?;
        writer.flush()?;

        let mut writes = self.writes_since_sync.lock();
        *writes += 1;
        if *writes >= self.sync_interval {
            writer.get_ref().sync_data()?;
            *writes = 0;
        }
        Ok(())
    }

    /// Force all appended entries to disk.
    pub fn sync(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.flush()?;
        writer.get_ref().sync_all()?;
        *self.writes_since_sync.lock() = 0;
        Ok(())
    }

    /// Read every entry, oldest first.
    pub fn entries(&self) -> Result<Vec<JournalEntry>> {
        // Hold the writer so nothing appends or truncates while mapped.
        let mut writer = self.writer.lock();
        writer.flush()?;
        let file = File::open(&self.path)?;
        Ok(Self::scan_file(&file, &self.path)?.entries)
    }

    /// Drop every entry, keeping the header.
    ///
    /// Only safe once every cache has been saved past the last entry.
    pub fn clear(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.flush()?;
        writer.get_ref().set_len(HEADER_SIZE as u64)?;
        writer.get_ref().sync_all()?;
        *self.writes_since_sync.lock() = 0;
        Ok(())
    }

    /// Current file size in bytes, header included.
    pub fn size(&self) -> Result<u64> {
        self.writer.lock().flush()?;
        Ok(std::fs::metadata(&self.path)?.len())
    }

    fn encode_frame(entry: &JournalEntry) -> Result<Vec<u8>> {
        let len = entry.updates.len();
        if len > MAX_ENTRY_SIZE {
            return Err(CacheError::ArgumentTooLarge {
                len,
                max: MAX_ENTRY_SIZE,
            });
        }

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + len + CHECKSUM_SIZE);
        frame.extend_from_slice(&entry.cache_id.0.to_be_bytes());
        frame.extend_from_slice(&entry.commit_timestamp.0.to_be_bytes());
        frame.extend_from_slice(&(len as u32).to_be_bytes());
        frame.extend_from_slice(&entry.updates);

        let checksum = crc32fast::hash(&frame);
        frame.extend_from_slice(&checksum.to_be_bytes());
        Ok(frame)
    }

    fn scan_file(file: &File, path: &Path) -> Result<Scan> {
        let len = file.metadata()?.len();
        if len < HEADER_SIZE as u64 {
            return Err(CacheError::InvalidFormat("Journal header truncated".into()));
        }

        // SAFETY: the file is under this process's exclusive lock, and every
        // append or truncate goes through the writer mutex that callers hold
        // (or have not yet created) while the map is alive.
        let map = unsafe { Mmap::map(file)? };

        if &map[..4] != JOURNAL_MAGIC {
            return Err(CacheError::InvalidFormat("Invalid journal magic".into()));
        }
        if map[4] != JOURNAL_VERSION {
            return Err(CacheError::InvalidFormat(format!(
                "Unsupported journal version: {}",
                map[4]
            )));
        }

        Self::scan_frames(&map[HEADER_SIZE..], path)
    }

    fn scan_frames(buf: &[u8], path: &Path) -> Result<Scan> {
        let mut entries = Vec::new();
        let mut pos = 0;

        while pos < buf.len() {
            let rest = &buf[pos..];
            if rest.len() < FRAME_HEADER_SIZE {
                Self::warn_torn(path, pos, rest.len());
                break;
            }

            let len = be_u32(&rest[16..20]) as usize;
            if len > MAX_ENTRY_SIZE {
                return Err(CacheError::corrupt(
                    HEADER_SIZE + pos,
                    format!("journal entry too large: {} bytes", len),
                ));
            }

            let body_len = FRAME_HEADER_SIZE + len;
            if rest.len() < body_len + CHECKSUM_SIZE {
                Self::warn_torn(path, pos, rest.len());
                break;
            }

            let body = &rest[..body_len];
            let stored = be_u32(&rest[body_len..body_len + CHECKSUM_SIZE]);
            let computed = crc32fast::hash(body);
            if stored != computed {
                return Err(CacheError::ChecksumMismatch {
                    expected: stored,
                    got: computed,
                });
            }

            entries.push(JournalEntry {
                cache_id: CacheId(be_u64(&rest[0..8])),
                commit_timestamp: Timestamp(be_u64(&rest[8..16])),
                updates: rest[FRAME_HEADER_SIZE..body_len].to_vec(),
            });
            pos += body_len + CHECKSUM_SIZE;
        }

        Ok(Scan {
            entries,
            valid_len: pos,
        })
    }

    fn warn_torn(path: &Path, pos: usize, remaining: usize) {
        tracing::warn!(
            "journal {} ends with a torn entry at offset {} ({} bytes ignored)",
            path.display(),
            HEADER_SIZE + pos,
            remaining
        );
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let mut lock_path = path.as_os_str().to_owned();
        lock_path.push(".lock");
        let lock_file = File::create(PathBuf::from(lock_path))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| CacheError::Locked)?;

        Ok(lock_file)
    }
}

impl Drop for UpdateJournal {
    fn drop(&mut self) {
        // Best-effort flush on drop
        let _ = self.writer.lock().flush();
    }
}

fn be_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_be_bytes(buf)
}

fn be_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}
