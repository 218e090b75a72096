//! Constants used throughout the OPAL core crate.

/// Directory (under the data dir) holding file-backed subrecords.
pub const SUBRECORDS_DIR_NAME: &str = "subrecords";

/// File (under the subrecords dir) holding the next record id to allocate.
pub const NEXT_ID_FILENAME: &str = "next_id";

/// Extension of a stored subrecord file.
pub const RECORD_FILE_EXTENSION: &str = "json";

/// Body keys that describe the record envelope rather than schema fields.
pub const ENVELOPE_KEYS: &[&str] = &["id", "episode_id", "consistency_token"];

/// Body keys the server maintains; clients may echo them back but never set them.
pub const AUDIT_KEYS: &[&str] = &["created", "created_by", "updated", "updated_by"];

/// Record schema used when no schema file is configured.
pub const DEFAULT_SCHEMA_YAML: &str = r#"
- name: colour
  display_name: Colour
  fields:
    - name: name
      type: string
- name: diagnosis
  display_name: Diagnosis
  fields:
    - name: condition
      type: string
    - name: provisional
      type: boolean
    - name: details
      type: string
    - name: date_of_diagnosis
      type: date
- name: allergies
  display_name: Allergies
  fields:
    - name: drug
      type: string
    - name: provisional
      type: boolean
    - name: details
      type: string
"#;
