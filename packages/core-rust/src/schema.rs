use serde::{Deserialize, Serialize};

use crate::types::Document;

/// JSON type a field value must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    /// Whether `value` conforms to this type. `Integer` values also satisfy `Number`.
    #[must_use]
    pub fn accepts(self, value: &serde_json::Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// Single field definition within an entity schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    /// Name of the field.
    pub name: String,
    /// Expected JSON type.
    pub field_type: FieldType,
    /// Whether the field must be present on create.
    pub required: bool,
}

impl FieldDef {
    #[must_use]
    pub fn required(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: true,
        }
    }

    #[must_use]
    pub fn optional(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: false,
        }
    }
}

/// Schema definition of one entity type, bound to a connection by the driver.
///
/// Fields not listed in the schema are accepted and stored as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Entity name, also the collection/table name in the backing store.
    pub name: String,
    /// Schema version for migrations and compatibility checks.
    pub version: u32,
    /// Declared fields.
    pub fields: Vec<FieldDef>,
}

/// Result of validating a document against a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// The document conforms to the schema.
    Valid,
    /// The document violates one or more schema constraints.
    Invalid {
        /// Human-readable descriptions of each validation failure.
        errors: Vec<String>,
    },
}

impl ValidationResult {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

impl EntitySchema {
    #[must_use]
    pub fn new(name: &str, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.to_string(),
            version: 1,
            fields,
        }
    }

    /// Validates a full document (create). Required fields must be present.
    #[must_use]
    pub fn validate(&self, doc: &Document) -> ValidationResult {
        self.check(doc, true)
    }

    /// Validates a partial document (update). Only present fields are type-checked.
    #[must_use]
    pub fn validate_patch(&self, doc: &Document) -> ValidationResult {
        self.check(doc, false)
    }

    fn check(&self, doc: &Document, require: bool) -> ValidationResult {
        let mut errors = Vec::new();
        for field in &self.fields {
            match doc.get(&field.name) {
                None | Some(serde_json::Value::Null) => {
                    if require && field.required {
                        errors.push(format!("missing required field '{}'", field.name));
                    }
                }
                Some(value) if !field.field_type.accepts(value) => {
                    errors.push(format!(
                        "field '{}' must be of type {}",
                        field.name,
                        field.field_type.as_str()
                    ));
                }
                Some(_) => {}
            }
        }
        if errors.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid { errors }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn schema() -> EntitySchema {
        EntitySchema::new(
            "product",
            vec![
                FieldDef::required("name", FieldType::String),
                FieldDef::required("price", FieldType::Number),
                FieldDef::optional("stock", FieldType::Integer),
            ],
        )
    }

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn valid_document_passes() {
        let result = schema().validate(&doc(json!({"name": "Tulip", "price": 3, "extra": true})));
        assert!(result.is_valid());
    }

    #[test]
    fn missing_required_and_wrong_type_are_reported() {
        let result = schema().validate(&doc(json!({"price": "free", "stock": 1.5})));
        let ValidationResult::Invalid { errors } = result else {
            panic!("expected invalid");
        };
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("'name'")));
        assert!(errors.iter().any(|e| e.contains("'price' must be of type number")));
        assert!(errors.iter().any(|e| e.contains("'stock' must be of type integer")));
    }

    #[test]
    fn patch_skips_required_check() {
        assert!(schema().validate_patch(&doc(json!({"stock": 4}))).is_valid());
        assert!(!schema().validate_patch(&doc(json!({"price": []}))).is_valid());
    }

    #[test]
    fn null_counts_as_missing() {
        let result = schema().validate(&doc(json!({"name": null, "price": 1})));
        assert_eq!(
            result,
            ValidationResult::Invalid {
                errors: vec!["missing required field 'name'".to_string()]
            }
        );
    }
}
