//! Insert hook for object-document mappers.
//!
//! A mapper registers [`AutoIncrement`] on a schema and calls
//! [`InsertHook::before_insert`] before persisting each document. New
//! documents get the next value of the sequence named after the schema's
//! collection; documents that already exist are left alone.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::contracts::{SequenceError, SequenceGenerator};
use crate::generator::OptionsOverride;

/// Field type as declared on a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Text,
    Other,
}

/// Declaration of one schema field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub kind: FieldKind,
    pub required: bool,
    pub unique: bool,
}

impl FieldSpec {
    /// A required, unique integer field.
    pub fn sequence() -> Self {
        Self {
            kind: FieldKind::Integer,
            required: true,
            unique: true,
        }
    }
}

/// What the hook needs to know about a mapper schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescriptor {
    collection: String,
    fields: BTreeMap<String, FieldSpec>,
    /// The mapper does not generate the identity field itself, so the
    /// sequence must declare it.
    manages_identity: bool,
}

impl SchemaDescriptor {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            fields: BTreeMap::new(),
            manages_identity: false,
        }
    }

    /// Lets the sequence own the identity field.
    pub fn managing_identity(mut self) -> Self {
        self.manages_identity = true;
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.insert(name.into(), spec);
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn manages_identity(&self) -> bool {
        self.manages_identity
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    pub fn declare(&mut self, name: &str, spec: FieldSpec) {
        self.fields.insert(name.to_string(), spec);
    }
}

/// A document about to be persisted.
pub trait InsertDocument: Send {
    /// True until the document has been persisted once.
    fn is_new(&self) -> bool;

    /// Assigns the generated sequence value.
    fn set_sequence(&mut self, field: &str, value: i64);
}

/// JSON document with a persisted flag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonDocument {
    pub body: Map<String, Value>,
    pub persisted: bool,
}

impl JsonDocument {
    pub fn new(body: Map<String, Value>) -> Self {
        Self {
            body,
            persisted: false,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }
}

impl InsertDocument for JsonDocument {
    fn is_new(&self) -> bool {
        !self.persisted
    }

    fn set_sequence(&mut self, field: &str, value: i64) {
        self.body.insert(field.to_string(), Value::from(value));
    }
}

/// Registers sequence numbering on schemas.
pub struct AutoIncrement;

impl AutoIncrement {
    /// Installs numbering on `schema`.
    ///
    /// When the schema lets the sequence manage its identity and the target
    /// field is undeclared, declares it as a required unique integer. The
    /// options are recorded for the sequence when the first new document
    /// passes through the hook, not here.
    pub fn register<G: SequenceGenerator>(
        generator: Arc<G>,
        schema: &mut SchemaDescriptor,
        options: OptionsOverride,
    ) -> Result<InsertHook<G>, SequenceError> {
        options.validate()?;

        let field = generator
            .settings()
            .resolve_with(schema.collection(), &options)?
            .field;
        if schema.manages_identity() && schema.field(&field).is_none() {
            tracing::debug!(collection = %schema.collection(), field = %field, "Declaring sequence field");
            schema.declare(&field, FieldSpec::sequence());
        }

        Ok(InsertHook {
            generator,
            sequence: schema.collection().to_string(),
            options,
        })
    }
}

/// Pre-persist hook numbering new documents of one collection.
pub struct InsertHook<G> {
    generator: Arc<G>,
    sequence: String,
    options: OptionsOverride,
}

impl<G: SequenceGenerator> InsertHook<G> {
    /// Name of the sequence this hook draws from.
    pub fn sequence(&self) -> &str {
        &self.sequence
    }

    /// Numbers a new document. Existing documents pass through untouched.
    ///
    /// Assumes the store connection is open, as it is for a mapper that is
    /// persisting documents.
    pub async fn before_insert<D: InsertDocument>(&self, doc: &mut D) -> Result<(), SequenceError> {
        if !doc.is_new() {
            return Ok(());
        }

        let settings = self.generator.settings();
        if settings.register_if_absent(&self.sequence, &self.options)? {
            tracing::debug!(sequence = %self.sequence, "Recorded hook options on first insert");
        }
        let field = settings.resolve_with(&self.sequence, &self.options)?.field;

        let value = self.generator.increment(&self.sequence, Some(&field)).await?;
        doc.set_sequence(&field, value);
        Ok(())
    }
}
