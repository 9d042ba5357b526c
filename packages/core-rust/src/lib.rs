//! Storefront Core: entity schemas, documents, and request context shared by
//! every business domain.

pub mod catalog;
pub mod context;
pub mod schema;
pub mod types;

pub use catalog::{entity_names, order_status, CatalogError, SchemaCatalog};
pub use context::RequestContext;
pub use schema::{EntitySchema, FieldDef, FieldType, ValidationResult};
pub use types::{now_millis, Document, EntityRecord, Principal};
