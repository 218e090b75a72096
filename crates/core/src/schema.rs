//! Record schemas and the schema registry.
//!
//! A record schema names a subrecord type and enumerates the fields it may carry. The registry
//! is the single source of truth the validator consults; adding a record type means adding a
//! schema entry, never changing controller code.
//!
//! Schemas are loaded from YAML:
//!
//! ```yaml
//! - name: colour
//!   display_name: Colour
//!   fields:
//!     - name: name
//!       type: string
//! ```

use crate::constants::{AUDIT_KEYS, DEFAULT_SCHEMA_YAML, ENVELOPE_KEYS};
use crate::error::{SubrecordError, SubrecordResult};
use opal_types::RecordTypeName;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Declared value type of a field. Informational: clients use it to render forms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Text,
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    pub name: RecordTypeName,
    #[serde(default)]
    pub display_name: Option<String>,
    pub fields: Vec<FieldSchema>,
}

impl RecordSchema {
    /// Names of the fields a record of this type may persist.
    pub fn legal_fields(&self) -> BTreeSet<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}

/// Source of truth for which fields are legal per record type.
pub trait SchemaRegistry: Send + Sync {
    /// Looks up the schema of a record type.
    fn schema(&self, record_type: &str) -> Option<&RecordSchema>;

    /// All registered schemas, ordered by record type name.
    fn schemas(&self) -> Vec<&RecordSchema>;

    fn legal_fields(&self, record_type: &str) -> Option<BTreeSet<&str>> {
        self.schema(record_type).map(RecordSchema::legal_fields)
    }
}

/// A schema registry fixed at startup.
#[derive(Clone, Debug, Default)]
pub struct StaticSchemaRegistry {
    schemas: BTreeMap<RecordTypeName, RecordSchema>,
}

impl StaticSchemaRegistry {
    /// Builds a registry from a list of schemas.
    ///
    /// # Errors
    ///
    /// Returns [`SubrecordError::InvalidInput`] if a record type is declared twice, a field is
    /// declared twice within one type, or a field uses a reserved envelope/audit key.
    pub fn new(schemas: Vec<RecordSchema>) -> SubrecordResult<Self> {
        let mut by_name = BTreeMap::new();

        for schema in schemas {
            let mut seen = BTreeSet::new();
            for field in &schema.fields {
                let name = field.name.as_str();
                if ENVELOPE_KEYS.contains(&name) || AUDIT_KEYS.contains(&name) {
                    return Err(SubrecordError::InvalidInput(format!(
                        "record type {} declares reserved field '{}'",
                        schema.name, name
                    )));
                }
                if !seen.insert(name) {
                    return Err(SubrecordError::InvalidInput(format!(
                        "record type {} declares field '{}' twice",
                        schema.name, name
                    )));
                }
            }

            if by_name.contains_key(&schema.name) {
                return Err(SubrecordError::InvalidInput(format!(
                    "record type {} is declared twice",
                    schema.name
                )));
            }
            by_name.insert(schema.name.clone(), schema);
        }

        Ok(Self { schemas: by_name })
    }

    /// Parses a YAML list of record schemas.
    pub fn from_yaml(yaml: &str) -> SubrecordResult<Self> {
        let schemas: Vec<RecordSchema> =
            serde_yaml::from_str(yaml).map_err(SubrecordError::YamlDeserialization)?;
        Self::new(schemas)
    }

    /// Loads record schemas from a YAML file.
    pub fn load(path: &Path) -> SubrecordResult<Self> {
        let yaml = std::fs::read_to_string(path).map_err(SubrecordError::FileRead)?;
        let registry = Self::from_yaml(&yaml)?;
        tracing::info!(
            "loaded {} record schemas from {}",
            registry.schemas.len(),
            path.display()
        );
        Ok(registry)
    }

    /// The schema shipped with the service, used when no schema file is configured.
    pub fn builtin() -> SubrecordResult<Self> {
        Self::from_yaml(DEFAULT_SCHEMA_YAML)
    }
}

impl SchemaRegistry for StaticSchemaRegistry {
    fn schema(&self, record_type: &str) -> Option<&RecordSchema> {
        let name = RecordTypeName::new(record_type).ok()?;
        self.schemas.get(&name)
    }

    fn schemas(&self) -> Vec<&RecordSchema> {
        self.schemas.values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_schema_contains_colour() {
        let registry = StaticSchemaRegistry::builtin().expect("builtin schema should parse");
        let fields = registry
            .legal_fields("colour")
            .expect("colour should be registered");

        assert_eq!(fields, BTreeSet::from(["name"]));
    }

    #[test]
    fn test_schemas_are_ordered_by_name() {
        let registry = StaticSchemaRegistry::builtin().expect("builtin schema should parse");
        let names: Vec<_> = registry
            .schemas()
            .into_iter()
            .map(|s| s.name.as_str())
            .collect();

        assert_eq!(names, vec!["allergies", "colour", "diagnosis"]);
    }

    #[test]
    fn test_unknown_or_malformed_type_has_no_schema() {
        let registry = StaticSchemaRegistry::builtin().expect("builtin schema should parse");
        assert!(registry.schema("hue").is_none());
        assert!(registry.schema("../colour").is_none());
    }

    #[test]
    fn test_rejects_reserved_field_names() {
        let yaml = r#"
- name: colour
  fields:
    - name: consistency_token
      type: string
"#;
        let err = StaticSchemaRegistry::from_yaml(yaml).expect_err("should reject reserved key");
        assert!(matches!(err, SubrecordError::InvalidInput(msg) if msg.contains("reserved")));
    }

    #[test]
    fn test_rejects_duplicate_record_types() {
        let yaml = r#"
- name: colour
  fields: []
- name: colour
  fields: []
"#;
        assert!(StaticSchemaRegistry::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_invalid_record_type_name() {
        let yaml = r#"
- name: Not Valid
  fields: []
"#;
        assert!(matches!(
            StaticSchemaRegistry::from_yaml(yaml),
            Err(SubrecordError::YamlDeserialization(_))
        ));
    }

    #[test]
    fn test_load_reads_schema_file() {
        let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("schema.yaml");
        std::fs::write(
            &path,
            "- name: observation\n  fields:\n    - name: pulse\n      type: integer\n",
        )
        .expect("should write schema file");

        let registry = StaticSchemaRegistry::load(&path).expect("load should succeed");
        assert_eq!(
            registry.legal_fields("observation"),
            Some(BTreeSet::from(["pulse"]))
        );
    }
}
