use super::{MutateFn, NewSubrecord, PreconditionFn, Subrecord, SubrecordStore};
use crate::error::{SubrecordError, SubrecordResult};
use crate::ids::RecordId;
use opal_types::RecordTypeName;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

type RecordKey = (RecordTypeName, RecordId);

/// A record slot. `None` once the record has been deleted, so a writer that fetched the slot
/// before the delete observes the deletion under the slot lock.
type Slot = Arc<Mutex<Option<Subrecord>>>;

/// Subrecords held in process memory.
///
/// The index lock is only held long enough to find or insert a slot; reads and writes of a
/// record happen under that record's own slot lock.
#[derive(Debug)]
pub struct InMemorySubrecordStore {
    slots: RwLock<HashMap<RecordKey, Slot>>,
    next_id: AtomicU64,
}

impl Default for InMemorySubrecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySubrecordStore {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn slot(&self, record_type: &RecordTypeName, id: RecordId) -> SubrecordResult<Option<Slot>> {
        let slots = self.slots.read().map_err(|_| SubrecordError::LockPoisoned)?;
        Ok(slots.get(&(record_type.clone(), id)).cloned())
    }

    fn forget(&self, record_type: &RecordTypeName, id: RecordId) -> SubrecordResult<()> {
        let mut slots = self.slots.write().map_err(|_| SubrecordError::LockPoisoned)?;
        slots.remove(&(record_type.clone(), id));
        Ok(())
    }
}

impl SubrecordStore for InMemorySubrecordStore {
    fn get(
        &self,
        record_type: &RecordTypeName,
        id: RecordId,
    ) -> SubrecordResult<Option<Subrecord>> {
        let Some(slot) = self.slot(record_type, id)? else {
            return Ok(None);
        };
        let record = slot.lock().map_err(|_| SubrecordError::LockPoisoned)?;
        Ok(record.clone())
    }

    fn create(&self, new: NewSubrecord) -> SubrecordResult<Subrecord> {
        let id = RecordId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let record = new.into_subrecord(id);

        let mut slots = self.slots.write().map_err(|_| SubrecordError::LockPoisoned)?;
        slots.insert(
            (record.record_type.clone(), id),
            Arc::new(Mutex::new(Some(record.clone()))),
        );
        Ok(record)
    }

    fn update(
        &self,
        record_type: &RecordTypeName,
        id: RecordId,
        mutate: MutateFn<'_>,
    ) -> SubrecordResult<Option<Subrecord>> {
        let Some(slot) = self.slot(record_type, id)? else {
            return Ok(None);
        };
        let mut guard = slot.lock().map_err(|_| SubrecordError::LockPoisoned)?;
        let Some(record) = guard.as_mut() else {
            return Ok(None);
        };

        let mutation = mutate(record)?;
        mutation.apply(record);
        Ok(Some(record.clone()))
    }

    fn delete(
        &self,
        record_type: &RecordTypeName,
        id: RecordId,
        precondition: PreconditionFn<'_>,
    ) -> SubrecordResult<Option<Subrecord>> {
        let Some(slot) = self.slot(record_type, id)? else {
            return Ok(None);
        };

        let removed = {
            let mut guard = slot.lock().map_err(|_| SubrecordError::LockPoisoned)?;
            match guard.as_ref() {
                None => return Ok(None),
                Some(record) => precondition(record)?,
            }
            guard.take()
        };

        self.forget(record_type, id)?;
        Ok(removed)
    }
}
