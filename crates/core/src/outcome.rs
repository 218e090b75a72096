//! Transport-neutral operation results.
//!
//! The controller never builds HTTP responses itself. Each operation returns an [`Outcome`] whose
//! [`StatusKind`] maps one-to-one onto an HTTP status code, so any API surface can render it.

use crate::error::SubrecordError;
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Ok,
    Created,
    Accepted,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    InternalError,
}

impl StatusKind {
    pub fn code(self) -> u16 {
        match self {
            StatusKind::Ok => 200,
            StatusKind::Created => 201,
            StatusKind::Accepted => 202,
            StatusKind::BadRequest => 400,
            StatusKind::Unauthorized => 401,
            StatusKind::Forbidden => 403,
            StatusKind::NotFound => 404,
            StatusKind::Conflict => 409,
            StatusKind::InternalError => 500,
        }
    }

    pub fn is_success(self) -> bool {
        self.code() < 300
    }
}

/// Structured failure detail carried by unsuccessful outcomes.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorDetail {
    pub error: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unknown_fields: Vec<String>,
}

/// The result of one controller operation.
#[derive(Clone, Debug, PartialEq)]
pub struct Outcome {
    pub status: StatusKind,
    pub body: Value,
    pub error: Option<ErrorDetail>,
}

impl Outcome {
    pub fn success(status: StatusKind, body: Value) -> Self {
        Self {
            status,
            body,
            error: None,
        }
    }

    /// Builds a failure outcome. Internal errors are reported generically so storage details
    /// never reach clients.
    pub fn failure(err: &SubrecordError) -> Self {
        let status = err.status();
        let message = match status {
            StatusKind::InternalError => "Internal error".to_string(),
            _ => err.to_string(),
        };
        let unknown_fields = match err {
            SubrecordError::UnknownFields { fields, .. } => fields.clone(),
            _ => Vec::new(),
        };
        let detail = ErrorDetail {
            error: message,
            code: status.code(),
            unknown_fields,
        };
        let body = serde_json::to_value(&detail).unwrap_or(Value::Null);

        Self {
            status,
            body,
            error: Some(detail),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failure_body_lists_unknown_fields() {
        let err = SubrecordError::UnknownFields {
            record_type: "colour".into(),
            fields: vec!["hue".into()],
        };
        let outcome = Outcome::failure(&err);

        assert_eq!(outcome.status.code(), 400);
        assert_eq!(outcome.body["unknown_fields"], json!(["hue"]));
        assert_eq!(outcome.body["code"], json!(400));
    }

    #[test]
    fn test_internal_failure_hides_details() {
        let err = SubrecordError::FileRead(std::io::Error::other("/srv/opal/secret path"));
        let outcome = Outcome::failure(&err);

        assert_eq!(outcome.status, StatusKind::InternalError);
        assert_eq!(outcome.body["error"], json!("Internal error"));
        assert!(outcome.body.get("unknown_fields").is_none());
    }
}
