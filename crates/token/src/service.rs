//! Internal implementation of consistency token issuing.

use std::fmt;
use uuid::Uuid;

/// An opaque optimistic-concurrency version stamp.
///
/// # Construction
/// - [`ConsistencyToken::issue`] allocates a fresh canonical token for a new record.
/// - [`ConsistencyToken::reissue`] allocates the token for the next committed version.
/// - [`ConsistencyToken::from_stored`] wraps whatever string the store holds, without checks.
///
/// Comparison against a client-presented token is exact string equality.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ConsistencyToken(String);

impl ConsistencyToken {
    /// Length of an issued token in hex characters.
    pub const ISSUED_LEN: usize = 8;

    /// Issues a new canonical token.
    pub fn issue() -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        Self(simple[..Self::ISSUED_LEN].to_owned())
    }

    /// Issues the token for the next version of a record.
    ///
    /// The returned token never equals `self`. Eight hex characters give 2^32 values, so a
    /// collision with the previous token is rare; when it happens a new value is drawn.
    ///
    /// Only the immediately preceding token is excluded. A token from further back in the
    /// record's history can come round again with probability 2^-32 per update; a client holding
    /// that stale token would then pass the check.
    pub fn reissue(&self) -> Self {
        loop {
            let next = Self::issue();
            if next != *self {
                return next;
            }
        }
    }

    /// Wraps a token read back from storage.
    ///
    /// Stored tokens are opaque, so no format is enforced here.
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns true if a client-presented token refers to this exact version.
    ///
    /// An empty or missing presented token never matches.
    pub fn matches(&self, presented: Option<&str>) -> bool {
        match presented {
            Some(p) if !p.is_empty() => p == self.0,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ConsistencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ConsistencyToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
