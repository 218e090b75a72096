//! Field validation against record schemas.
//!
//! Validation is a hard boundary: a candidate mapping containing any key outside the record
//! type's legal field set is rejected whole. Nothing is silently dropped, except the envelope
//! and audit keys a client echoes back from a previous read.

use crate::constants::{AUDIT_KEYS, ENVELOPE_KEYS};
use crate::error::{SubrecordError, SubrecordResult};
use crate::schema::SchemaRegistry;
use serde_json::{Map, Value};

/// Ordered mapping of field name to value.
pub type FieldMap = Map<String, Value>;

/// Splits the envelope and audit keys out of a request body, returning the candidate fields.
pub fn candidate_fields(body: &FieldMap) -> FieldMap {
    body.iter()
        .filter(|(k, _)| !ENVELOPE_KEYS.contains(&k.as_str()) && !AUDIT_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Validates a candidate field mapping for `record_type`.
///
/// Returns the accepted fields, in the order presented.
///
/// # Errors
///
/// - [`SubrecordError::UnknownRecordType`] if the registry has no schema for the type.
/// - [`SubrecordError::UnknownFields`] listing every offending key, sorted, if any key falls
///   outside the legal set.
pub fn validate(
    registry: &dyn SchemaRegistry,
    record_type: &str,
    fields: &FieldMap,
) -> SubrecordResult<FieldMap> {
    let legal = registry
        .legal_fields(record_type)
        .ok_or_else(|| SubrecordError::UnknownRecordType(record_type.to_string()))?;

    let mut unknown: Vec<String> = fields
        .keys()
        .filter(|k| !legal.contains(k.as_str()))
        .cloned()
        .collect();

    if !unknown.is_empty() {
        unknown.sort();
        return Err(SubrecordError::UnknownFields {
            record_type: record_type.to_string(),
            fields: unknown,
        });
    }

    Ok(fields.clone())
}
