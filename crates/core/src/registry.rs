//! Record type registry.
//!
//! Maps each record type name to a descriptor binding its schema to the store that persists it.
//! The controller resolves every request through this registry; new record types register a
//! descriptor and need no controller change.

use crate::error::{SubrecordError, SubrecordResult};
use crate::schema::{RecordSchema, SchemaRegistry};
use crate::storage::SubrecordStore;
use opal_types::RecordTypeName;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A record type's schema and storage binding.
#[derive(Clone)]
pub struct RecordDescriptor {
    schema: RecordSchema,
    store: Arc<dyn SubrecordStore>,
}

impl RecordDescriptor {
    pub fn new(schema: RecordSchema, store: Arc<dyn SubrecordStore>) -> Self {
        Self { schema, store }
    }

    pub fn record_type(&self) -> &RecordTypeName {
        &self.schema.name
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    pub fn store(&self) -> &dyn SubrecordStore {
        self.store.as_ref()
    }
}

#[derive(Clone, Default)]
pub struct RecordRegistry {
    descriptors: BTreeMap<RecordTypeName, RecordDescriptor>,
}

impl RecordRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds every schema in `schemas` to `store`.
    pub fn bind_all(schemas: &dyn SchemaRegistry, store: Arc<dyn SubrecordStore>) -> Self {
        let mut registry = Self::new();
        for schema in schemas.schemas() {
            registry.register(RecordDescriptor::new(schema.clone(), Arc::clone(&store)));
        }
        registry
    }

    /// Registers a descriptor, replacing any earlier one for the same record type.
    pub fn register(&mut self, descriptor: RecordDescriptor) {
        tracing::debug!("registered record type {}", descriptor.record_type());
        self.descriptors
            .insert(descriptor.record_type().clone(), descriptor);
    }

    /// Looks up the descriptor for a record type named in a request.
    ///
    /// # Errors
    ///
    /// Returns [`SubrecordError::UnknownRecordType`] if nothing is registered under that name.
    pub fn resolve(&self, record_type: &str) -> SubrecordResult<&RecordDescriptor> {
        RecordTypeName::new(record_type)
            .ok()
            .and_then(|name| self.descriptors.get(&name))
            .ok_or_else(|| SubrecordError::UnknownRecordType(record_type.to_string()))
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &RecordDescriptor> {
        self.descriptors.values()
    }
}

impl SchemaRegistry for RecordRegistry {
    fn schema(&self, record_type: &str) -> Option<&RecordSchema> {
        self.resolve(record_type).ok().map(RecordDescriptor::schema)
    }

    fn schemas(&self) -> Vec<&RecordSchema> {
        self.descriptors().map(RecordDescriptor::schema).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StaticSchemaRegistry;
    use crate::storage::InMemorySubrecordStore;

    #[test]
    fn test_bind_all_registers_every_schema() {
        let schemas = StaticSchemaRegistry::builtin().unwrap();
        let registry = RecordRegistry::bind_all(&schemas, Arc::new(InMemorySubrecordStore::new()));

        let names: Vec<_> = registry
            .descriptors()
            .map(|d| d.record_type().as_str())
            .collect();
        assert_eq!(names, vec!["allergies", "colour", "diagnosis"]);
    }

    #[test]
    fn test_resolve_unknown_type_fails() {
        let registry = RecordRegistry::new();
        assert!(matches!(
            registry.resolve("colour"),
            Err(SubrecordError::UnknownRecordType(name)) if name == "colour"
        ));
        assert!(registry.resolve("../etc").is_err());
    }

    #[test]
    fn test_types_can_bind_to_separate_stores() {
        let schemas = StaticSchemaRegistry::builtin().unwrap();
        let shared: Arc<dyn SubrecordStore> = Arc::new(InMemorySubrecordStore::new());
        let mut registry = RecordRegistry::bind_all(&schemas, Arc::clone(&shared));

        let dedicated: Arc<dyn SubrecordStore> = Arc::new(InMemorySubrecordStore::new());
        let colour = schemas.schema("colour").unwrap().clone();
        registry.register(RecordDescriptor::new(colour, Arc::clone(&dedicated)));

        let colour_store = registry.resolve("colour").unwrap().store() as *const dyn SubrecordStore;
        let diagnosis_store =
            registry.resolve("diagnosis").unwrap().store() as *const dyn SubrecordStore;
        assert!(std::ptr::addr_eq(colour_store, Arc::as_ptr(&dedicated)));
        assert!(std::ptr::addr_eq(diagnosis_store, Arc::as_ptr(&shared)));
    }
}
