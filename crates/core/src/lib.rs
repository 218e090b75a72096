//! # OPAL Core
//!
//! Core business logic for generic subrecord management.
//!
//! This crate contains the pure record operations behind the subrecord API:
//! - Schema registry and field validation for each record type
//! - Optimistic concurrency via per-record consistency tokens
//! - File-backed and in-memory subrecord storage
//! - Change notification to an external integration after every committed mutation
//!
//! **No API concerns**: HTTP servers, header-based authentication, or OpenAPI documentation
//! belong in `api-rest` or `api-shared`.

pub mod config;
pub mod constants;
pub mod controller;
pub mod episodes;
pub mod error;
pub mod guard;
pub mod ids;
pub mod listings;
pub mod notify;
pub mod outcome;
pub mod registry;
pub mod schema;
pub mod storage;
pub mod users;
pub mod validation;

pub use config::{CoreConfig, IntegrationMode};
pub use controller::{
    CreateRequest, DestroyRequest, RetrieveRequest, SubrecordController, UpdateRequest,
};
pub use error::{SubrecordError, SubrecordResult};
pub use ids::{EpisodeId, RecordId};
pub use outcome::{ErrorDetail, Outcome, StatusKind};
pub use users::{Actor, User};
pub use validation::FieldMap;
