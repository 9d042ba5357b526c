//! Entity catalog: the set of entity types shared by every domain.
//!
//! Every domain exposes the same entities; only the connection they are
//! bound to differs. Entity names double as collection/table names, so they
//! are restricted to lowercase ASCII letters, digits and underscores.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::schema::{EntitySchema, FieldDef, FieldType};

/// Entity name constants for the built-in catalog.
pub mod entity_names {
    pub const USER: &str = "user";
    pub const PRODUCT: &str = "product";
    pub const ORDER: &str = "order";
    pub const CATEGORY: &str = "category";
}

/// Order status values written by handlers and the abandoned-order sweep.
pub mod order_status {
    pub const PENDING: &str = "pending";
    pub const PAID: &str = "paid";
    pub const SHIPPED: &str = "shipped";
    pub const ABANDONED: &str = "abandoned";
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("invalid entity name '{name}': use lowercase letters, digits and '_'")]
    InvalidName { name: String },
    #[error("entity '{name}' is already registered")]
    Duplicate { name: String },
}

/// Immutable-after-build lookup of entity schemas by name.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    schemas: BTreeMap<String, Arc<EntitySchema>>,
}

impl SchemaCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The storefront entities: users, products, orders and categories.
    #[must_use]
    pub fn storefront() -> Self {
        let mut catalog = Self::new();
        for schema in [
            EntitySchema::new(
                entity_names::USER,
                vec![
                    FieldDef::required("email", FieldType::String),
                    FieldDef::required("name", FieldType::String),
                    FieldDef::optional("role", FieldType::String),
                ],
            ),
            EntitySchema::new(
                entity_names::PRODUCT,
                vec![
                    FieldDef::required("name", FieldType::String),
                    FieldDef::required("price", FieldType::Number),
                    FieldDef::optional("stock", FieldType::Integer),
                    FieldDef::optional("category_id", FieldType::String),
                    FieldDef::optional("images", FieldType::Array),
                ],
            ),
            EntitySchema::new(
                entity_names::ORDER,
                vec![
                    FieldDef::required("user_id", FieldType::String),
                    FieldDef::required("items", FieldType::Array),
                    FieldDef::required("status", FieldType::String),
                    FieldDef::optional("total", FieldType::Number),
                    FieldDef::optional("shipping", FieldType::Object),
                ],
            ),
            EntitySchema::new(
                entity_names::CATEGORY,
                vec![
                    FieldDef::required("name", FieldType::String),
                    FieldDef::optional("parent_id", FieldType::String),
                ],
            ),
        ] {
            // Built-in names are valid and distinct.
            let _ = catalog.register(schema);
        }
        catalog
    }

    /// Adds a schema to the catalog.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidName`] for names unusable as a table
    /// name and [`CatalogError::Duplicate`] if the name is taken.
    pub fn register(&mut self, schema: EntitySchema) -> Result<(), CatalogError> {
        if !is_valid_entity_name(&schema.name) {
            return Err(CatalogError::InvalidName { name: schema.name });
        }
        if self.schemas.contains_key(&schema.name) {
            return Err(CatalogError::Duplicate { name: schema.name });
        }
        self.schemas.insert(schema.name.clone(), Arc::new(schema));
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<EntitySchema>> {
        self.schemas.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

/// Whether `name` is usable as an entity (and table) name.
#[must_use]
pub fn is_valid_entity_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
