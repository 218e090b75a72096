use super::{MutateFn, NewSubrecord, PreconditionFn, Subrecord, SubrecordStore};
use crate::constants::{NEXT_ID_FILENAME, RECORD_FILE_EXTENSION, SUBRECORDS_DIR_NAME};
use crate::error::{SubrecordError, SubrecordResult};
use crate::ids::RecordId;
use opal_types::RecordTypeName;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

type RecordKey = (RecordTypeName, RecordId);

/// Subrecords persisted as JSON documents on the local filesystem.
///
/// ## Storage Layout
///
/// ```text
/// <data_dir>/subrecords/
///   next_id                 # next record id to allocate
///   <record_type>/
///     <id>.json             # one document per record
/// ```
///
/// Writes go to a temporary file that is renamed over the record, so readers never observe a
/// half-written document. Record locks live in this process: the data directory must not be
/// shared between running services.
#[derive(Debug)]
pub struct FileSubrecordStore {
    root: PathBuf,
    id_lock: Mutex<()>,
    record_locks: Mutex<HashMap<RecordKey, Arc<Mutex<()>>>>,
}

impl FileSubrecordStore {
    /// Opens (creating if needed) a file store under `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`SubrecordError::StorageDirCreation`] if the subrecords directory cannot be
    /// created.
    pub fn open(data_dir: &Path) -> SubrecordResult<Self> {
        let root = data_dir.join(SUBRECORDS_DIR_NAME);
        fs::create_dir_all(&root).map_err(SubrecordError::StorageDirCreation)?;
        Ok(Self {
            root,
            id_lock: Mutex::new(()),
            record_locks: Mutex::new(HashMap::new()),
        })
    }

    fn record_path(&self, record_type: &RecordTypeName, id: RecordId) -> PathBuf {
        self.root
            .join(record_type.as_str())
            .join(format!("{}.{}", id, RECORD_FILE_EXTENSION))
    }

    /// Runs `f` while holding the lock of one record.
    ///
    /// Lock entries only live while some caller holds or waits on them, so the map stays as small
    /// as the number of records being worked on concurrently.
    fn with_record_lock<T>(
        &self,
        record_type: &RecordTypeName,
        id: RecordId,
        f: impl FnOnce() -> SubrecordResult<T>,
    ) -> SubrecordResult<T> {
        let key = (record_type.clone(), id);
        let lock = {
            let mut locks = self
                .record_locks
                .lock()
                .map_err(|_| SubrecordError::LockPoisoned)?;
            Arc::clone(locks.entry(key.clone()).or_default())
        };

        let result = match lock.lock() {
            Ok(_guard) => f(),
            Err(_) => Err(SubrecordError::LockPoisoned),
        };

        self.release_lock(&key, lock)?;
        result
    }

    fn release_lock(&self, key: &RecordKey, lock: Arc<Mutex<()>>) -> SubrecordResult<()> {
        let mut locks = self
            .record_locks
            .lock()
            .map_err(|_| SubrecordError::LockPoisoned)?;
        drop(lock);
        // Clones are only taken under the map lock, so a count of one means nobody is waiting.
        if locks.get(key).is_some_and(|entry| Arc::strong_count(entry) == 1) {
            locks.remove(key);
        }
        Ok(())
    }

    fn allocate_id(&self) -> SubrecordResult<RecordId> {
        let _guard = self.id_lock.lock().map_err(|_| SubrecordError::LockPoisoned)?;
        let counter_path = self.root.join(NEXT_ID_FILENAME);

        let next = match fs::read_to_string(&counter_path) {
            Ok(contents) => contents.trim().parse::<u64>().map_err(|_| {
                SubrecordError::FileRead(std::io::Error::new(
                    ErrorKind::InvalidData,
                    format!("corrupt id counter at {}", counter_path.display()),
                ))
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => 1,
            Err(e) => return Err(SubrecordError::FileRead(e)),
        };

        write_atomically(&counter_path, (next + 1).to_string().as_bytes())?;
        Ok(RecordId::new(next))
    }

    fn read(&self, record_type: &RecordTypeName, id: RecordId) -> SubrecordResult<Option<Subrecord>> {
        let path = self.record_path(record_type, id);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SubrecordError::FileRead(e)),
        };
        let record = serde_json::from_str(&contents).map_err(SubrecordError::Deserialization)?;
        Ok(Some(record))
    }

    fn write(&self, record: &Subrecord) -> SubrecordResult<()> {
        let path = self.record_path(&record.record_type, record.id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(SubrecordError::StorageDirCreation)?;
        }
        let json = serde_json::to_vec_pretty(record).map_err(SubrecordError::Serialization)?;
        write_atomically(&path, &json)
    }
}

fn write_atomically(path: &Path, contents: &[u8]) -> SubrecordResult<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents).map_err(SubrecordError::FileWrite)?;
    fs::rename(&tmp, path).map_err(SubrecordError::FileWrite)
}

impl SubrecordStore for FileSubrecordStore {
    fn get(
        &self,
        record_type: &RecordTypeName,
        id: RecordId,
    ) -> SubrecordResult<Option<Subrecord>> {
        self.read(record_type, id)
    }

    fn create(&self, new: NewSubrecord) -> SubrecordResult<Subrecord> {
        let id = self.allocate_id()?;
        let record = new.into_subrecord(id);

        self.with_record_lock(&record.record_type, id, || self.write(&record))?;
        Ok(record)
    }

    fn update(
        &self,
        record_type: &RecordTypeName,
        id: RecordId,
        mutate: MutateFn<'_>,
    ) -> SubrecordResult<Option<Subrecord>> {
        self.with_record_lock(record_type, id, || {
            let Some(mut record) = self.read(record_type, id)? else {
                return Ok(None);
            };
            let mutation = mutate(&record)?;
            mutation.apply(&mut record);
            self.write(&record)?;
            Ok(Some(record))
        })
    }

    fn delete(
        &self,
        record_type: &RecordTypeName,
        id: RecordId,
        precondition: PreconditionFn<'_>,
    ) -> SubrecordResult<Option<Subrecord>> {
        self.with_record_lock(record_type, id, || {
            let Some(record) = self.read(record_type, id)? else {
                return Ok(None);
            };
            precondition(&record)?;
            fs::remove_file(self.record_path(record_type, id))
                .map_err(SubrecordError::FileRemove)?;
            Ok(Some(record))
        })
    }
}
