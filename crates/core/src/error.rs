use crate::ids::{EpisodeId, RecordId};
use crate::outcome::StatusKind;
use crate::users::Operation;

#[derive(Debug, thiserror::Error)]
pub enum SubrecordError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid text: {0}")]
    Text(#[from] opal_types::TextError),

    #[error("unknown record type: {0}")]
    UnknownRecordType(String),
    #[error("{record_type} {id} does not exist")]
    NotFound { record_type: String, id: RecordId },
    #[error("episode {0} does not exist")]
    EpisodeNotFound(EpisodeId),
    #[error(
        "unexpected fields for {record_type}: {}",
        fields.join(", ")
    )]
    UnknownFields {
        record_type: String,
        fields: Vec<String>,
    },
    #[error("{record_type} {id} has changed since it was read")]
    Conflict { record_type: String, id: RecordId },

    #[error("authentication required")]
    Unauthenticated,
    #[error("{username} may not {operation} {record_type}")]
    Forbidden {
        username: String,
        operation: Operation,
        record_type: String,
    },

    #[error("failed to read record file: {0}")]
    FileRead(std::io::Error),
    #[error("failed to write record file: {0}")]
    FileWrite(std::io::Error),
    #[error("failed to create storage directory: {0}")]
    StorageDirCreation(std::io::Error),
    #[error("failed to remove record file: {0}")]
    FileRemove(std::io::Error),
    #[error("failed to serialize record: {0}")]
    Serialization(serde_json::Error),
    #[error("failed to deserialize record: {0}")]
    Deserialization(serde_json::Error),
    #[error("failed to deserialize YAML: {0}")]
    YamlDeserialization(serde_yaml::Error),
    #[error("record lock poisoned")]
    LockPoisoned,
}

impl SubrecordError {
    /// The HTTP-level status this error surfaces as.
    pub fn status(&self) -> StatusKind {
        match self {
            SubrecordError::InvalidInput(_)
            | SubrecordError::Text(_)
            | SubrecordError::EpisodeNotFound(_)
            | SubrecordError::UnknownFields { .. } => StatusKind::BadRequest,
            SubrecordError::UnknownRecordType(_) | SubrecordError::NotFound { .. } => {
                StatusKind::NotFound
            }
            SubrecordError::Conflict { .. } => StatusKind::Conflict,
            SubrecordError::Unauthenticated => StatusKind::Unauthorized,
            SubrecordError::Forbidden { .. } => StatusKind::Forbidden,
            SubrecordError::FileRead(_)
            | SubrecordError::FileWrite(_)
            | SubrecordError::StorageDirCreation(_)
            | SubrecordError::FileRemove(_)
            | SubrecordError::Serialization(_)
            | SubrecordError::Deserialization(_)
            | SubrecordError::YamlDeserialization(_)
            | SubrecordError::LockPoisoned => StatusKind::InternalError,
        }
    }
}

pub type SubrecordResult<T> = std::result::Result<T, SubrecordError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_map_to_4xx() {
        let cases = [
            (
                SubrecordError::EpisodeNotFound(EpisodeId::new(56785)),
                StatusKind::BadRequest,
            ),
            (
                SubrecordError::UnknownFields {
                    record_type: "colour".into(),
                    fields: vec!["hue".into()],
                },
                StatusKind::BadRequest,
            ),
            (
                SubrecordError::NotFound {
                    record_type: "colour".into(),
                    id: RecordId::new(67757),
                },
                StatusKind::NotFound,
            ),
            (
                SubrecordError::Conflict {
                    record_type: "colour".into(),
                    id: RecordId::new(1),
                },
                StatusKind::Conflict,
            ),
            (SubrecordError::Unauthenticated, StatusKind::Unauthorized),
        ];

        for (err, expected) in cases {
            assert_eq!(err.status(), expected, "{err}");
        }
    }

    #[test]
    fn test_storage_errors_map_to_500() {
        let err = SubrecordError::FileRead(std::io::Error::other("disk gone"));
        assert_eq!(err.status(), StatusKind::InternalError);
        assert_eq!(
            SubrecordError::LockPoisoned.status(),
            StatusKind::InternalError
        );
    }

    #[test]
    fn test_unknown_fields_message_lists_keys() {
        let err = SubrecordError::UnknownFields {
            record_type: "colour".into(),
            fields: vec!["hue".into(), "shade".into()],
        };
        assert_eq!(err.to_string(), "unexpected fields for colour: hue, shade");
    }
}
