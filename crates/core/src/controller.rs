//! The generic subrecord controller.
//!
//! One controller serves every registered record type. Each operation follows the same
//! precondition ladder and stops at the first failure, with nothing written and nothing
//! notified:
//!
//! 1. authorization (401 unauthenticated, 403 denied)
//! 2. record type resolution (404)
//! 3. record lookup for retrieve/update/destroy (404) or episode lookup for create (400)
//! 4. body decoding and schema validation for create/update (400)
//! 5. consistency token check for update, and for destroy when a token is presented (409)
//!
//! Steps 5 and the write run inside the store's per-record critical section. The change event is
//! dispatched only after the store call returns, outside that section.

use crate::config::{CoreConfig, IntegrationMode};
use crate::episodes::{EpisodeDirectory, InMemoryEpisodeDirectory};
use crate::error::{SubrecordError, SubrecordResult};
use crate::guard;
use crate::ids::{EpisodeId, RecordId};
use crate::listings::Listings;
use crate::notify::{
    ChangeEvent, ChangeOperation, JsonLinesTransport, LogTransport, NotificationDispatcher,
};
use crate::outcome::{Outcome, StatusKind};
use crate::registry::RecordRegistry;
use crate::schema::{SchemaRegistry, StaticSchemaRegistry};
use crate::storage::{
    FileSubrecordStore, InMemorySubrecordStore, Mutation, NewSubrecord, Subrecord,
    SubrecordStore,
};
use crate::users::{
    Actor, Authorization, Authorizer, InMemoryUserDirectory, Operation, ProfileAuthorizer, User,
    UserDirectory,
};
use crate::validation::{self, FieldMap};
use chrono::Utc;
use opal_token::ConsistencyToken;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct RetrieveRequest {
    pub actor: Actor,
    pub record_type: String,
    pub id: RecordId,
}

/// A create request. `body` is the client mapping: schema fields plus `episode_id`.
#[derive(Clone, Debug)]
pub struct CreateRequest {
    pub actor: Actor,
    pub record_type: String,
    pub body: FieldMap,
}

/// An update request. `body` carries the schema fields to change plus the
/// `consistency_token` last read by the client.
#[derive(Clone, Debug)]
pub struct UpdateRequest {
    pub actor: Actor,
    pub record_type: String,
    pub id: RecordId,
    pub body: FieldMap,
}

/// A destroy request. A presented token makes the delete conditional on it.
#[derive(Clone, Debug)]
pub struct DestroyRequest {
    pub actor: Actor,
    pub record_type: String,
    pub id: RecordId,
    pub consistency_token: Option<String>,
}

/// The envelope keys of a request body, split from its candidate fields.
struct Envelope {
    id: Option<RecordId>,
    episode_id: Option<EpisodeId>,
    consistency_token: Option<String>,
    fields: FieldMap,
}

impl Envelope {
    fn parse(body: &FieldMap) -> SubrecordResult<Self> {
        let id = body
            .get("id")
            .filter(|v| !v.is_null())
            .map(RecordId::from_json)
            .transpose()?;
        let episode_id = body
            .get("episode_id")
            .filter(|v| !v.is_null())
            .map(EpisodeId::from_json)
            .transpose()?;
        let consistency_token = body
            .get("consistency_token")
            .and_then(Value::as_str)
            .map(str::to_owned);

        Ok(Self {
            id,
            episode_id,
            consistency_token,
            fields: validation::candidate_fields(body),
        })
    }
}

pub struct SubrecordController {
    records: RecordRegistry,
    episodes: Arc<dyn EpisodeDirectory>,
    users: Arc<dyn UserDirectory>,
    authorizer: Arc<dyn Authorizer>,
    dispatcher: NotificationDispatcher,
    listings: Listings,
}

impl SubrecordController {
    /// Creates a controller whose authorizer denies mutations to readonly profiles.
    pub fn new(
        records: RecordRegistry,
        episodes: Arc<dyn EpisodeDirectory>,
        users: Arc<dyn UserDirectory>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        let authorizer = Arc::new(ProfileAuthorizer::new(Arc::clone(&users)));
        Self {
            records,
            episodes,
            users,
            authorizer,
            dispatcher,
            listings: Listings::default(),
        }
    }

    /// Replaces the profile-based authorizer.
    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    /// Serves the given list and flow definitions.
    ///
    /// # Errors
    ///
    /// Returns [`SubrecordError::InvalidInput`] if a list column names an unregistered record
    /// type.
    pub fn with_listings(mut self, listings: Listings) -> SubrecordResult<Self> {
        listings.check(&self.records)?;
        self.listings = listings;
        Ok(self)
    }

    /// Wires a controller from startup configuration.
    ///
    /// # Errors
    ///
    /// Returns `SubrecordError` if the schema, user or listings file cannot be loaded or the
    /// data directory cannot be opened.
    pub fn from_config(cfg: &CoreConfig) -> SubrecordResult<Self> {
        let schemas = match cfg.schema_file() {
            Some(path) => StaticSchemaRegistry::load(path)?,
            None => StaticSchemaRegistry::builtin()?,
        };

        let store: Arc<dyn SubrecordStore> = match cfg.data_dir() {
            Some(dir) => Arc::new(FileSubrecordStore::open(dir)?),
            None => Arc::new(InMemorySubrecordStore::new()),
        };

        let users: Arc<dyn UserDirectory> = match cfg.users_file() {
            Some(path) => Arc::new(InMemoryUserDirectory::load(path)?),
            None => Arc::new(InMemoryUserDirectory::new()),
        };

        let dispatcher = match cfg.integration() {
            IntegrationMode::Off => NotificationDispatcher::disabled(),
            IntegrationMode::Log => NotificationDispatcher::new(Arc::new(LogTransport)),
            IntegrationMode::JsonLines(path) => {
                NotificationDispatcher::new(Arc::new(JsonLinesTransport::new(path.clone())))
            }
        };

        let episodes = Arc::new(InMemoryEpisodeDirectory::with_episodes(
            cfg.seed_episodes().iter().copied(),
        ));

        let listings = match cfg.listings_file() {
            Some(path) => Listings::load(path)?,
            None => Listings::default(),
        };

        Self::new(
            RecordRegistry::bind_all(&schemas, store),
            episodes,
            users,
            dispatcher,
        )
        .with_listings(listings)
    }

    pub fn records(&self) -> &RecordRegistry {
        &self.records
    }

    /// Reads one record.
    pub fn retrieve(&self, req: RetrieveRequest) -> Outcome {
        let record_type = req.record_type.clone();
        match self.try_retrieve(req) {
            Ok(record) => Outcome::success(StatusKind::Ok, record.to_body()),
            Err(e) => reject(Operation::Retrieve, &record_type, e),
        }
    }

    /// Creates a record attached to an existing episode.
    pub fn create(&self, req: CreateRequest) -> Outcome {
        let record_type = req.record_type.clone();
        match self.try_create(req) {
            Ok(record) => Outcome::success(StatusKind::Created, record.to_body()),
            Err(e) => reject(Operation::Create, &record_type, e),
        }
    }

    /// Applies field changes to a record, provided the client saw its latest version.
    pub fn update(&self, req: UpdateRequest) -> Outcome {
        let record_type = req.record_type.clone();
        match self.try_update(req) {
            Ok(record) => Outcome::success(StatusKind::Accepted, record.to_body()),
            Err(e) => reject(Operation::Update, &record_type, e),
        }
    }

    /// Deletes a record.
    pub fn destroy(&self, req: DestroyRequest) -> Outcome {
        let record_type = req.record_type.clone();
        match self.try_destroy(req) {
            Ok(record) => Outcome::success(
                StatusKind::Accepted,
                json!({"id": record.id, "deleted": true}),
            ),
            Err(e) => reject(Operation::Destroy, &record_type, e),
        }
    }

    /// The acting user's profile.
    pub fn profile(&self, actor: &Actor) -> Outcome {
        let profile = actor.user().and_then(|user| self.users.profile(user));
        match profile {
            Ok(profile) => match serde_json::to_value(profile) {
                Ok(body) => Outcome::success(StatusKind::Ok, body),
                Err(e) => Outcome::failure(&SubrecordError::Serialization(e)),
            },
            Err(e) => {
                tracing::warn!("profile request rejected: {}", e);
                Outcome::failure(&e)
            }
        }
    }

    /// Every registered record type with its legal fields.
    pub fn record_metadata(&self, actor: &Actor) -> Outcome {
        metadata(actor, "record metadata", || self.records.schemas())
    }

    /// Column schemas of every patient list.
    pub fn list_schemas(&self, actor: &Actor) -> Outcome {
        metadata(actor, "list schema", || {
            self.listings.list_schemas(&self.records)
        })
    }

    /// Client flow definitions.
    pub fn flows(&self, actor: &Actor) -> Outcome {
        metadata(actor, "flow", || self.listings.flows())
    }

    /// Checks that `actor` may perform `operation` on `record_type` without touching any record.
    ///
    /// Transports call this before rejecting input they cannot decode, so that an unauthorized
    /// caller learns nothing about what a well-formed request would have done.
    pub fn admit(
        &self,
        actor: &Actor,
        operation: Operation,
        record_type: &str,
    ) -> SubrecordResult<()> {
        self.authorize(actor, operation, record_type).map(|_| ())
    }

    fn authorize<'a>(
        &self,
        actor: &'a Actor,
        operation: Operation,
        record_type: &str,
    ) -> SubrecordResult<&'a User> {
        let user = actor.user()?;
        match self.authorizer.authorize(user, operation, record_type)? {
            Authorization::Allowed => Ok(user),
            Authorization::Denied => Err(SubrecordError::Forbidden {
                username: user.username.to_string(),
                operation,
                record_type: record_type.to_string(),
            }),
        }
    }

    fn try_retrieve(&self, req: RetrieveRequest) -> SubrecordResult<Subrecord> {
        self.authorize(&req.actor, Operation::Retrieve, &req.record_type)?;
        let descriptor = self.records.resolve(&req.record_type)?;

        descriptor
            .store()
            .get(descriptor.record_type(), req.id)?
            .ok_or_else(|| not_found(&req.record_type, req.id))
    }

    fn try_create(&self, req: CreateRequest) -> SubrecordResult<Subrecord> {
        let user = self.authorize(&req.actor, Operation::Create, &req.record_type)?;
        let descriptor = self.records.resolve(&req.record_type)?;
        let envelope = Envelope::parse(&req.body)?;

        let episode_id = envelope
            .episode_id
            .ok_or_else(|| SubrecordError::InvalidInput("episode_id is required".into()))?;
        if !self.episodes.exists(episode_id)? {
            return Err(SubrecordError::EpisodeNotFound(episode_id));
        }

        let fields = validation::validate(&self.records, &req.record_type, &envelope.fields)?;

        let record = descriptor.store().create(NewSubrecord {
            record_type: descriptor.record_type().clone(),
            episode_id,
            fields,
            consistency_token: ConsistencyToken::issue(),
            created: Utc::now(),
            created_by: user.username.to_string(),
        })?;

        tracing::info!(
            "created {} {} on episode {} by {}",
            record.record_type,
            record.id,
            record.episode_id,
            user.username
        );
        self.notify(&record, ChangeOperation::Created, user);
        Ok(record)
    }

    fn try_update(&self, req: UpdateRequest) -> SubrecordResult<Subrecord> {
        let user = self.authorize(&req.actor, Operation::Update, &req.record_type)?;
        let descriptor = self.records.resolve(&req.record_type)?;
        let store = descriptor.store();

        let current = store
            .get(descriptor.record_type(), req.id)?
            .ok_or_else(|| not_found(&req.record_type, req.id))?;

        let envelope = Envelope::parse(&req.body)?;
        let changes = validation::validate(&self.records, &req.record_type, &envelope.fields)?;

        if envelope.id.is_some_and(|id| id != req.id) {
            return Err(SubrecordError::InvalidInput(
                "body id does not match the record being updated".into(),
            ));
        }
        if envelope
            .episode_id
            .is_some_and(|episode_id| episode_id != current.episode_id)
        {
            return Err(SubrecordError::InvalidInput(
                "a subrecord cannot move to another episode".into(),
            ));
        }

        let presented = envelope.consistency_token;
        let username = user.username.to_string();
        let mutate = |stored: &Subrecord| -> SubrecordResult<Mutation> {
            guard::check(stored, presented.as_deref())?;

            let mut fields = stored.fields.clone();
            for (key, value) in &changes {
                fields.insert(key.clone(), value.clone());
            }
            Ok(Mutation {
                fields,
                consistency_token: guard::next_token(stored),
                updated: Utc::now(),
                updated_by: username.clone(),
            })
        };

        let record = store
            .update(descriptor.record_type(), req.id, &mutate)?
            .ok_or_else(|| not_found(&req.record_type, req.id))?;

        tracing::info!(
            "updated {} {} by {}",
            record.record_type,
            record.id,
            user.username
        );
        self.notify(&record, ChangeOperation::Updated, user);
        Ok(record)
    }

    fn try_destroy(&self, req: DestroyRequest) -> SubrecordResult<Subrecord> {
        let user = self.authorize(&req.actor, Operation::Destroy, &req.record_type)?;
        let descriptor = self.records.resolve(&req.record_type)?;

        let presented = req.consistency_token.as_deref();
        let precondition = |stored: &Subrecord| -> SubrecordResult<()> {
            match presented {
                Some(token) => guard::check(stored, Some(token)),
                None => Ok(()),
            }
        };

        let record = descriptor
            .store()
            .delete(descriptor.record_type(), req.id, &precondition)?
            .ok_or_else(|| not_found(&req.record_type, req.id))?;

        tracing::info!(
            "deleted {} {} by {}",
            record.record_type,
            record.id,
            user.username
        );
        self.notify(&record, ChangeOperation::Deleted, user);
        Ok(record)
    }

    fn notify(&self, record: &Subrecord, operation: ChangeOperation, user: &User) {
        self.dispatcher.dispatch(&ChangeEvent {
            record_type: record.record_type.to_string(),
            operation,
            episode_id: record.episode_id,
            record_id: record.id,
            username: user.username.to_string(),
            occurred_at: Utc::now(),
        });
    }
}

fn not_found(record_type: &str, id: RecordId) -> SubrecordError {
    SubrecordError::NotFound {
        record_type: record_type.to_string(),
        id,
    }
}

fn metadata<T: Serialize>(actor: &Actor, what: &str, body: impl FnOnce() -> T) -> Outcome {
    if let Err(e) = actor.user() {
        tracing::warn!("{} request rejected: {}", what, e);
        return Outcome::failure(&e);
    }
    match serde_json::to_value(body()) {
        Ok(body) => Outcome::success(StatusKind::Ok, body),
        Err(e) => Outcome::failure(&SubrecordError::Serialization(e)),
    }
}

fn reject(operation: Operation, record_type: &str, err: SubrecordError) -> Outcome {
    match err.status() {
        StatusKind::InternalError => {
            tracing::error!("{} {} failed: {:?}", operation, record_type, err)
        }
        _ => tracing::warn!("{} {} rejected: {}", operation, record_type, err),
    }
    Outcome::failure(&err)
}
