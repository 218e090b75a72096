//! Patient list column layouts and client flows.
//!
//! Both are read-only metadata served next to the record type listing. A list schema names the
//! record types shown as columns of a patient list; each column is rendered from the same
//! schema the validator uses. Flows are opaque client configuration passed through unchanged.
//!
//! ```yaml
//! lists:
//!   default: [diagnosis, allergies]
//! flows:
//!   default:
//!     enter: new_episode
//!     exit: discharge
//! ```

use crate::error::{SubrecordError, SubrecordResult};
use crate::schema::{RecordSchema, SchemaRegistry};
use opal_types::RecordTypeName;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// The list every registered record type appears in when no lists are configured.
pub const DEFAULT_LIST_NAME: &str = "default";

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct Listings {
    #[serde(default)]
    lists: BTreeMap<String, Vec<RecordTypeName>>,
    #[serde(default)]
    flows: BTreeMap<String, Value>,
}

impl Listings {
    /// Parses list and flow definitions from YAML.
    pub fn from_yaml(yaml: &str) -> SubrecordResult<Self> {
        serde_yaml::from_str(yaml).map_err(SubrecordError::YamlDeserialization)
    }

    pub fn load(path: &Path) -> SubrecordResult<Self> {
        let yaml = std::fs::read_to_string(path).map_err(SubrecordError::FileRead)?;
        let listings = Self::from_yaml(&yaml)?;
        tracing::info!(
            "loaded {} lists and {} flows from {}",
            listings.lists.len(),
            listings.flows.len(),
            path.display()
        );
        Ok(listings)
    }

    /// Checks that every list column names a registered record type.
    ///
    /// # Errors
    ///
    /// Returns [`SubrecordError::InvalidInput`] naming the first list with an unknown column.
    pub fn check(&self, schemas: &dyn SchemaRegistry) -> SubrecordResult<()> {
        for (list, columns) in &self.lists {
            if let Some(unknown) = columns
                .iter()
                .find(|column| schemas.schema(column.as_str()).is_none())
            {
                return Err(SubrecordError::InvalidInput(format!(
                    "list '{}' names unknown record type {}",
                    list, unknown
                )));
            }
        }
        Ok(())
    }

    /// Column schemas per list name.
    ///
    /// Without configured lists, a single default list carries every registered record type.
    pub fn list_schemas<'a>(
        &self,
        schemas: &'a dyn SchemaRegistry,
    ) -> BTreeMap<String, Vec<&'a RecordSchema>> {
        if self.lists.is_empty() {
            return BTreeMap::from([(DEFAULT_LIST_NAME.to_string(), schemas.schemas())]);
        }

        self.lists
            .iter()
            .map(|(list, columns)| {
                let columns = columns
                    .iter()
                    .filter_map(|column| schemas.schema(column.as_str()))
                    .collect();
                (list.clone(), columns)
            })
            .collect()
    }

    pub fn flows(&self) -> &BTreeMap<String, Value> {
        &self.flows
    }
}
