//! redb cache store implementation.
//!
//! Each subject lives in its own [redb](https://docs.rs/redb) database file
//! under `<root>/<area>/`.
//!
//! # Write Protocol
//!
//! 1. Take an exclusive advisory lock on `<record>.lock`
//! 2. Write the full record to `<record>.tmp` and commit
//! 3. Rename `<record>.tmp` over `<record>`
//!
//! A reader therefore sees either no record or a complete one, and two
//! writers of the same subject run one after the other. Deleting a record
//! takes the same lock.
//!
//! # Damaged Records
//!
//! A record damaged after it was written (truncated, overwritten) is
//! reported as [`CacheError::Corrupted`]. redb asserts on some truncated
//! files while opening them; that panic is caught and reported the same way.

use std::any::Any;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use ::redb::{Database, Durability, ReadableTable};
use bincode::Options;
use fs2::FileExt;
use tracing::{debug, info, instrument, warn};

use super::record::{decode_subject, encode_subject, FieldValue};
use super::schema::{
    codec, RecordMetadata, DFF_KEY, FIELDS_TABLE, METADATA_KEY, METADATA_TABLE, SCHEMA_VERSION,
    TENSORS_TABLE,
};
use super::CacheStore;
use crate::config::SyncMode;
use crate::error::{CacheError, Result};
use crate::subject::{Subject, SubjectKey};

/// redb-backed subject cache.
#[derive(Clone, Debug)]
pub struct RedbCache {
    /// Cache root directory.
    root: PathBuf,

    /// Durability of record commits.
    sync_mode: SyncMode,
}

impl RedbCache {
    /// Opens a cache rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created.
    #[instrument(skip(root), fields(root = %root.as_ref().display()))]
    pub fn open(root: impl AsRef<Path>, sync_mode: SyncMode) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        debug!("Cache root ready");
        Ok(Self { root, sync_mode })
    }

    /// Creates `<root>/<area>` if missing and returns it.
    pub fn ensure_area_dir(&self, area: &str) -> Result<PathBuf> {
        let dir = self.root.join(area);
        if !dir.is_dir() {
            fs::create_dir_all(&dir)?;
            info!(area, "Area directory created");
        }
        Ok(dir)
    }

    fn write_record(&self, path: &Path, subject: &Subject) -> std::result::Result<(), CacheError> {
        let (fields, payload) = encode_subject(subject)?;
        let metadata = codec().serialize(&RecordMetadata::new())?;
        let encoded: Vec<(&str, Vec<u8>)> = fields
            .iter()
            .map(|(name, value)| Ok((*name, codec().serialize(value)?)))
            .collect::<std::result::Result<_, CacheError>>()?;

        let db = Database::create(path)?;
        let mut write_txn = db.begin_write()?;
        if self.sync_mode.is_fast() {
            write_txn.set_durability(Durability::None);
        }
        {
            let mut meta_table = write_txn.open_table(METADATA_TABLE)?;
            meta_table.insert(METADATA_KEY, metadata.as_slice())?;

            let mut fields_table = write_txn.open_table(FIELDS_TABLE)?;
            for (name, bytes) in &encoded {
                fields_table.insert(*name, bytes.as_slice())?;
            }

            let mut tensors_table = write_txn.open_table(TENSORS_TABLE)?;
            tensors_table.insert(DFF_KEY, payload.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

/// Reads and decodes one record file.
///
/// Every failure other than a concurrently open database is reported as
/// corruption, including a panic inside redb.
fn read_record(path: &Path) -> std::result::Result<Subject, CacheError> {
    panic::catch_unwind(AssertUnwindSafe(|| open_and_read(path))).unwrap_or_else(|cause| {
        Err(CacheError::corrupted(format!(
            "record {} unreadable: {}",
            path.display(),
            panic_message(cause.as_ref())
        )))
    })
}

fn open_and_read(path: &Path) -> std::result::Result<Subject, CacheError> {
    let db = Database::open(path).map_err(|e| match e {
        ::redb::DatabaseError::DatabaseAlreadyOpen => CacheError::Locked(path.to_path_buf()),
        other => CacheError::corrupted(format!("cannot open record: {}", other)),
    })?;
    read_tables(&db).map_err(|e| match e {
        CacheError::Redb(msg) => CacheError::corrupted(msg),
        other => other,
    })
}

fn panic_message(cause: &(dyn Any + Send)) -> &str {
    cause
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| cause.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("redb panicked")
}

fn read_tables(db: &Database) -> std::result::Result<Subject, CacheError> {
    let read_txn = db.begin_read()?;

    let meta_table = read_txn.open_table(METADATA_TABLE)?;
    let metadata_bytes = meta_table
        .get(METADATA_KEY)?
        .ok_or_else(|| CacheError::corrupted("missing record metadata"))?;
    let metadata: RecordMetadata = codec()
        .deserialize(metadata_bytes.value())
        .map_err(|e| CacheError::corrupted(format!("invalid metadata: {}", e)))?;
    if !metadata.is_compatible() {
        return Err(CacheError::SchemaVersionMismatch {
            expected: SCHEMA_VERSION,
            found: metadata.schema_version,
        });
    }

    let fields_table = read_txn.open_table(FIELDS_TABLE)?;
    let mut fields = BTreeMap::new();
    for entry in fields_table.iter()? {
        let (name, bytes) = entry?;
        let value: FieldValue = codec().deserialize(bytes.value()).map_err(|e| {
            CacheError::corrupted(format!("field '{}' undecodable: {}", name.value(), e))
        })?;
        fields.insert(name.value().to_string(), value);
    }

    let tensors_table = read_txn.open_table(TENSORS_TABLE)?;
    let payload = tensors_table
        .get(DFF_KEY)?
        .ok_or_else(|| CacheError::corrupted("missing dff tensor"))?;

    decode_subject(fields, payload.value())
}

/// Exclusive advisory lock on `<record>.lock`, released on drop.
struct RecordLock {
    file: File,
}

impl RecordLock {
    /// Blocks until the lock for `record` is held.
    fn acquire(record: &Path) -> Result<Self> {
        let lock_path = sibling(record, ".lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        file.lock_exclusive()
            .map_err(|_| CacheError::Locked(lock_path))?;
        Ok(Self { file })
    }
}

impl Drop for RecordLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

impl CacheStore for RedbCache {
    fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &SubjectKey) -> Result<PathBuf> {
        key.validate()?;
        Ok(key.path_in(&self.root))
    }

    fn contains(&self, key: &SubjectKey) -> bool {
        self.path_for(key).map(|p| p.is_file()).unwrap_or(false)
    }

    #[instrument(skip(self, key), fields(key = %key))]
    fn load(&self, key: &SubjectKey) -> Result<Option<Subject>> {
        let path = self.path_for(key)?;
        if !path.is_file() {
            return Ok(None);
        }

        let subject = read_record(&path)?;
        if subject.key() != *key {
            return Err(CacheError::corrupted(format!(
                "record at {} belongs to {}",
                path.display(),
                subject.key()
            ))
            .into());
        }

        debug!(cells = subject.cells().len(), "Cache record loaded");
        Ok(Some(subject))
    }

    #[instrument(skip(self, subject), fields(key = %subject.key()))]
    fn save(&self, subject: &Subject) -> Result<PathBuf> {
        let key = subject.key();
        let path = self.path_for(&key)?;
        self.ensure_area_dir(&key.area)?;

        let lock = RecordLock::acquire(&path)?;

        let tmp_path = sibling(&path, ".tmp");
        if tmp_path.exists() {
            fs::remove_file(&tmp_path)?;
        }

        let written = self
            .write_record(&tmp_path, subject)
            .map_err(crate::error::OphysError::from)
            .and_then(|()| fs::rename(&tmp_path, &path).map_err(Into::into));
        if written.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        drop(lock);
        written?;

        info!(path = %path.display(), "Subject cached");
        Ok(path)
    }

    fn remove(&self, key: &SubjectKey) -> Result<bool> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(false);
        }

        let _lock = RecordLock::acquire(&path)?;
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        debug!(path = %path.display(), "Cache record removed");
        Ok(true)
    }

    #[instrument(skip(self, key), fields(key = %key))]
    fn evict_corrupt(&self, key: &SubjectKey) -> Result<bool> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(false);
        }

        let _lock = RecordLock::acquire(&path)?;
        if !path.exists() {
            return Ok(false);
        }
        match read_record(&path) {
            Ok(subject) if subject.key() == *key => {
                debug!("Record replaced by a valid one, kept");
                return Ok(false);
            }
            Ok(_) => {}
            Err(err) if err.is_corrupt() => {}
            Err(err) => return Err(err.into()),
        }

        fs::remove_file(&path)?;
        warn!(path = %path.display(), "Corrupt cache record removed");
        Ok(true)
    }
}
