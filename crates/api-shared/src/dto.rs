//! Wire types for the subrecord API.
//!
//! Subrecord bodies are open-ended: schema fields sit alongside the envelope keys, so handlers
//! pass JSON objects through untyped. These structs document the fixed parts of each payload
//! for OpenAPI.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

/// Error body returned with every non-2xx status.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ErrorRes {
    pub error: String,
    pub code: u16,
    /// Offending keys, present only when validation rejected unknown fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unknown_fields: Vec<String>,
}

/// A stored subrecord. The record type's schema fields appear as additional top-level keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SubrecordRes {
    pub id: u64,
    pub episode_id: u64,
    /// Opaque version marker. Echo it back on update.
    pub consistency_token: String,
    pub created: String,
    pub created_by: String,
    pub updated: Option<String>,
    pub updated_by: Option<String>,
}

/// Body for creating a subrecord: `episode_id` plus schema fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CreateSubrecordReq {
    pub episode_id: u64,
}

/// Body for updating a subrecord: the last-read `consistency_token` plus changed schema fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UpdateSubrecordReq {
    pub consistency_token: String,
    pub id: Option<u64>,
    pub episode_id: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeletedRes {
    pub id: u64,
    pub deleted: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserProfileRes {
    pub readonly: bool,
    pub can_extract: bool,
    #[schema(value_type = Vec<Object>)]
    pub filters: Vec<serde_json::Value>,
    pub roles: BTreeMap<String, Vec<String>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FieldSchemaRes {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RecordSchemaRes {
    pub name: String,
    pub display_name: Option<String>,
    pub fields: Vec<FieldSchemaRes>,
}

/// Column schemas keyed by patient list name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct ListSchemasRes(pub BTreeMap<String, Vec<RecordSchemaRes>>);

/// Client flow definitions keyed by flow name. Each definition is passed through unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct FlowsRes(#[schema(value_type = Object)] pub BTreeMap<String, serde_json::Value>);
