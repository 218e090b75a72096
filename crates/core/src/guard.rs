//! Optimistic concurrency checks.
//!
//! [`check`] must run inside the store's per-record critical section, against the token the
//! store holds at that moment. Checking against a token read earlier would reopen the lost
//! update window.

use crate::error::{SubrecordError, SubrecordResult};
use crate::storage::Subrecord;
use opal_token::ConsistencyToken;

/// Compares the presented token against the stored one.
///
/// # Errors
///
/// Returns [`SubrecordError::Conflict`] unless `presented` equals the stored token exactly.
/// A missing or empty presented token is always a conflict.
pub fn check(stored: &Subrecord, presented: Option<&str>) -> SubrecordResult<()> {
    if stored.consistency_token.matches(presented) {
        return Ok(());
    }

    tracing::warn!(
        record_type = %stored.record_type,
        id = %stored.id,
        "stale consistency token presented"
    );
    Err(SubrecordError::Conflict {
        record_type: stored.record_type.to_string(),
        id: stored.id,
    })
}

/// Issues the token for the version that follows `stored`.
pub fn next_token(stored: &Subrecord) -> ConsistencyToken {
    stored.consistency_token.reissue()
}
