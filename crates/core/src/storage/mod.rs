//! Subrecord persistence.
//!
//! Storage is a collaborator behind the [`SubrecordStore`] trait. Every store must serialise the
//! read/compare/write sequence of [`SubrecordStore::update`] and [`SubrecordStore::delete`] per
//! record: the callback passed in runs while the store holds that record's lock, so two writers
//! presenting the same token cannot both commit. Different records never contend.
//!
//! Two implementations ship with the core:
//! - [`InMemorySubrecordStore`] for tests and ephemeral deployments.
//! - [`FileSubrecordStore`] persisting one JSON document per record.

mod file;
mod memory;

pub use file::FileSubrecordStore;
pub use memory::InMemorySubrecordStore;

use crate::error::SubrecordResult;
use crate::ids::{EpisodeId, RecordId};
use crate::validation::FieldMap;
use chrono::{DateTime, Utc};
use opal_token::ConsistencyToken;
use opal_types::RecordTypeName;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A typed, schema-validated entity attached to an episode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subrecord {
    pub id: RecordId,
    pub record_type: RecordTypeName,
    pub episode_id: EpisodeId,
    pub fields: FieldMap,
    pub consistency_token: ConsistencyToken,
    pub created: DateTime<Utc>,
    pub created_by: String,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_by: Option<String>,
}

impl Subrecord {
    /// Flattens the record into the JSON shape clients read and echo back.
    pub fn to_body(&self) -> Value {
        let mut body = FieldMap::new();
        body.insert("id".into(), json!(self.id));
        body.insert("episode_id".into(), json!(self.episode_id));
        for (key, value) in &self.fields {
            body.insert(key.clone(), value.clone());
        }
        body.insert(
            "consistency_token".into(),
            json!(self.consistency_token.as_str()),
        );
        body.insert("created".into(), json!(self.created.to_rfc3339()));
        body.insert("created_by".into(), json!(self.created_by));
        body.insert(
            "updated".into(),
            json!(self.updated.map(|dt| dt.to_rfc3339())),
        );
        body.insert("updated_by".into(), json!(self.updated_by));
        Value::Object(body)
    }
}

/// A subrecord about to be created. The store assigns the id.
#[derive(Clone, Debug)]
pub struct NewSubrecord {
    pub record_type: RecordTypeName,
    pub episode_id: EpisodeId,
    pub fields: FieldMap,
    pub consistency_token: ConsistencyToken,
    pub created: DateTime<Utc>,
    pub created_by: String,
}

impl NewSubrecord {
    fn into_subrecord(self, id: RecordId) -> Subrecord {
        Subrecord {
            id,
            record_type: self.record_type,
            episode_id: self.episode_id,
            fields: self.fields,
            consistency_token: self.consistency_token,
            created: self.created,
            created_by: self.created_by,
            updated: None,
            updated_by: None,
        }
    }
}

/// The new state an update commits.
#[derive(Clone, Debug)]
pub struct Mutation {
    pub fields: FieldMap,
    pub consistency_token: ConsistencyToken,
    pub updated: DateTime<Utc>,
    pub updated_by: String,
}

impl Mutation {
    fn apply(self, record: &mut Subrecord) {
        record.fields = self.fields;
        record.consistency_token = self.consistency_token;
        record.updated = Some(self.updated);
        record.updated_by = Some(self.updated_by);
    }
}

/// Builds the next state of a record from its current state, or refuses.
pub type MutateFn<'a> = &'a dyn Fn(&Subrecord) -> SubrecordResult<Mutation>;

/// Decides whether a record may be deleted given its current state.
pub type PreconditionFn<'a> = &'a dyn Fn(&Subrecord) -> SubrecordResult<()>;

/// Persistent storage of subrecords, keyed by record type and id.
pub trait SubrecordStore: Send + Sync {
    /// Reads the current state of a record. `Ok(None)` when absent.
    fn get(&self, record_type: &RecordTypeName, id: RecordId)
        -> SubrecordResult<Option<Subrecord>>;

    /// Persists a new record, assigning its id.
    fn create(&self, new: NewSubrecord) -> SubrecordResult<Subrecord>;

    /// Atomically reads, mutates and writes a record.
    ///
    /// `mutate` runs under the record's lock against its current state; an error from it aborts
    /// the update with nothing written. `Ok(None)` when the record does not exist.
    fn update(
        &self,
        record_type: &RecordTypeName,
        id: RecordId,
        mutate: MutateFn<'_>,
    ) -> SubrecordResult<Option<Subrecord>>;

    /// Atomically checks and removes a record, returning its last state.
    ///
    /// `precondition` runs under the record's lock; an error from it aborts the delete.
    /// `Ok(None)` when the record does not exist.
    fn delete(
        &self,
        record_type: &RecordTypeName,
        id: RecordId,
        precondition: PreconditionFn<'_>,
    ) -> SubrecordResult<Option<Subrecord>>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    pub fn colour() -> RecordTypeName {
        RecordTypeName::new("colour").unwrap()
    }

    pub fn new_colour(name: &str, token: &str) -> NewSubrecord {
        let mut fields = FieldMap::new();
        fields.insert("name".into(), json!(name));
        NewSubrecord {
            record_type: colour(),
            episode_id: EpisodeId::new(1),
            fields,
            consistency_token: ConsistencyToken::from_stored(token),
            created: Utc::now(),
            created_by: "testuser".into(),
        }
    }

    pub fn rename(name: &str) -> impl Fn(&Subrecord) -> SubrecordResult<Mutation> + '_ {
        move |current: &Subrecord| {
            let mut fields = current.fields.clone();
            fields.insert("name".into(), json!(name));
            Ok(Mutation {
                fields,
                consistency_token: current.consistency_token.reissue(),
                updated: Utc::now(),
                updated_by: "testuser".into(),
            })
        }
    }

    /// Exercises the behaviour every store must share.
    pub fn exercise_store_contract(store: &dyn SubrecordStore) {
        let created = store
            .create(new_colour("blue", "frist"))
            .expect("create should succeed");
        let second = store
            .create(new_colour("red", "0a1b2c3d"))
            .expect("create should succeed");
        assert_ne!(created.id, second.id, "ids must be unique");

        let read = store
            .get(&colour(), created.id)
            .expect("get should succeed")
            .expect("record should exist");
        assert_eq!(read, created);

        let other_type = RecordTypeName::new("diagnosis").unwrap();
        assert!(store.get(&other_type, created.id).unwrap().is_none());

        let updated = store
            .update(&colour(), created.id, &rename("green"))
            .expect("update should succeed")
            .expect("record should exist");
        assert_eq!(updated.fields["name"], json!("green"));
        assert_ne!(updated.consistency_token, created.consistency_token);
        assert_eq!(updated.updated_by.as_deref(), Some("testuser"));

        let refused = store.update(&colour(), created.id, &|current: &Subrecord| {
            Err(crate::SubrecordError::Conflict {
                record_type: "colour".into(),
                id: current.id,
            })
        });
        assert!(refused.is_err());
        let unchanged = store.get(&colour(), created.id).unwrap().unwrap();
        assert_eq!(unchanged, updated, "refused update must not write");

        assert!(store
            .update(&colour(), RecordId::new(67757), &rename("green"))
            .unwrap()
            .is_none());

        let blocked = store.delete(&colour(), created.id, &|_: &Subrecord| {
            Err(crate::SubrecordError::InvalidInput("no".into()))
        });
        assert!(blocked.is_err());
        assert!(store.get(&colour(), created.id).unwrap().is_some());

        let removed = store
            .delete(&colour(), created.id, &|_: &Subrecord| Ok(()))
            .expect("delete should succeed")
            .expect("record should exist");
        assert_eq!(removed.id, created.id);
        assert!(store.get(&colour(), created.id).unwrap().is_none());
        assert!(store
            .delete(&colour(), created.id, &|_: &Subrecord| Ok(()))
            .unwrap()
            .is_none());

        let third = store
            .create(new_colour("yellow", "0a1b2c3e"))
            .expect("create should succeed");
        assert!(third.id > second.id, "ids are never reused");
    }

    /// Races `writers` updates that all present the record's original token.
    pub fn exercise_same_token_race(store: &dyn SubrecordStore, writers: usize) {
        let created = store
            .create(new_colour("blue", "frist"))
            .expect("create should succeed");
        let id = created.id;
        let barrier = Barrier::new(writers);

        let results: Vec<_> = thread::scope(|scope| {
            let handles: Vec<_> = (0..writers)
                .map(|n| {
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        let name = format!("writer-{n}");
                        store.update(&colour(), id, &|current: &Subrecord| {
                            crate::guard::check(current, Some("frist"))?;
                            rename(&name)(current)
                        })
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("writer thread should not panic"))
                .collect()
        });

        let committed = results.iter().filter(|r| matches!(r, Ok(Some(_)))).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(crate::SubrecordError::Conflict { .. })))
            .count();
        assert_eq!(committed, 1, "exactly one writer may commit");
        assert_eq!(conflicts, writers - 1);

        let stored = store.get(&colour(), id).unwrap().unwrap();
        assert_ne!(stored.consistency_token, created.consistency_token);
    }
}
