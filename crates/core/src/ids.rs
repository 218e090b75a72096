//! Numeric identifiers for episodes and subrecords.
//!
//! Both are store-assigned and opaque to clients; they are carried as JSON numbers.

use crate::error::{SubrecordError, SubrecordResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            pub fn get(self) -> u64 {
                self.0
            }

            /// Reads an identifier from a JSON body value.
            ///
            /// Accepts a non-negative integer or a string of digits, since form-encoded clients
            /// send the latter.
            pub fn from_json(value: &serde_json::Value) -> SubrecordResult<Self> {
                match value {
                    serde_json::Value::Number(n) => n.as_u64().map(Self).ok_or_else(|| {
                        SubrecordError::InvalidInput(format!("{} must be a non-negative integer", $label))
                    }),
                    serde_json::Value::String(s) => s.parse(),
                    _ => Err(SubrecordError::InvalidInput(format!(
                        "{} must be an integer",
                        $label
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = SubrecordError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<u64>().map(Self).map_err(|_| {
                    SubrecordError::InvalidInput(format!("{} must be an integer, got '{}'", $label, s))
                })
            }
        }
    };
}

numeric_id!(
    /// Identifier of an episode of care.
    EpisodeId,
    "episode_id"
);

numeric_id!(
    /// Identifier of a subrecord, unique across all record types in one store.
    RecordId,
    "id"
);
