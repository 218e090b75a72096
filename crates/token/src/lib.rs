//! Consistency token utilities.
//!
//! Every mutable subrecord carries a consistency token: an opaque version stamp that a client
//! echoes back on update so the server can detect lost-update races.
//!
//! Tokens issued by this crate have a *canonical* form of **8 lowercase hexadecimal characters**
//! (for example `3fa9c01e`), taken from a freshly generated v4 UUID. Tokens read back from
//! storage are treated as opaque strings and are never re-validated: a record written by an older
//! system with a token such as `frist` still compares correctly.
//!
//! Uniqueness only has to hold per record per version. [`ConsistencyToken::reissue`] guarantees
//! the new token differs from the one it replaces; older tokens of the same record are not
//! tracked, so they are avoided only by the width of the random draw.

mod service;

pub use service::ConsistencyToken;
