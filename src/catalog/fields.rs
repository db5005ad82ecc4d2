//! Translation of type descriptions into catalog field lists.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Fields every catalog carries.
pub const COMMON_FIELDS: [&str; 4] = ["id", "source", "seq", "type"];

/// Type of a property in a [`TypeSchema`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PropertyType {
    /// Full-text searchable string.
    String,
    /// Date, as RFC 3339 string or milliseconds since the unix epoch.
    Date,
    /// Anything else. Catalogs do not index these.
    #[serde(other)]
    Other,
}

/// A JSON-schema-like description of a record type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSchema {
    /// Type name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Properties by name.
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyType>,
}

impl TypeSchema {
    /// Create a type schema with the given string properties.
    pub fn with_strings<'a>(name: Option<&str>, props: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            name: name.map(ToString::to_string),
            properties: props
                .into_iter()
                .map(|p| (p.to_string(), PropertyType::String))
                .collect(),
        }
    }
}

/// Native type of a catalog field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Text.
    Text {
        /// Split into terms before indexing.
        tokenized: bool,
        /// Record term positions.
        positions: bool,
    },
    /// Date.
    Date {
        /// Keep a columnar copy for sorting and range filters.
        fast: bool,
    },
}

/// A field of a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field name.
    pub name: String,
    /// Native type.
    #[serde(rename = "type")]
    pub ty: FieldType,
    /// Keep the original value.
    pub stored: bool,
    /// Make the field searchable.
    pub indexed: bool,
}

impl FieldSchema {
    /// A tokenized, stored text field with positions.
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: FieldType::Text {
                tokenized: true,
                positions: true,
            },
            stored: true,
            indexed: true,
        }
    }

    /// An untokenized, stored text field.
    pub fn raw(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: FieldType::Text {
                tokenized: false,
                positions: false,
            },
            stored: true,
            indexed: true,
        }
    }

    /// An indexed, stored date field with a fast column.
    pub fn date(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: FieldType::Date { fast: true },
            stored: true,
            indexed: true,
        }
    }

    /// Whether the field is split into terms.
    pub fn is_tokenized(&self) -> bool {
        matches!(self.ty, FieldType::Text { tokenized: true, .. })
    }
}

/// Build the field list of a catalog for a type.
///
/// The common fields come first. With `prefix_common` set and a named schema they are
/// prefixed with `"<type>:"`, so that several types can share one catalog. Properties
/// of type [`PropertyType::Other`] are skipped.
pub fn to_fields(schema: &TypeSchema, prefix_common: bool) -> Vec<FieldSchema> {
    let prefix = match (&schema.name, prefix_common) {
        (Some(name), true) => format!("{name}:"),
        _ => String::new(),
    };
    let common = COMMON_FIELDS
        .iter()
        .map(|name| FieldSchema::raw(format!("{prefix}{name}")));
    let properties = schema
        .properties
        .iter()
        .filter_map(|(name, ty)| match ty {
            PropertyType::String => Some(FieldSchema::text(name)),
            PropertyType::Date => Some(FieldSchema::date(name)),
            PropertyType::Other => None,
        });
    common.chain(properties).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_types_from_json() {
        let schema: TypeSchema = serde_json::from_str(
            r#"{ "name": "doc", "properties": {
                "title": { "type": "string" },
                "created": { "type": "date" },
                "size": { "type": "number" }
            } }"#,
        )
        .unwrap();
        assert_eq!(schema.properties["title"], PropertyType::String);
        assert_eq!(schema.properties["created"], PropertyType::Date);
        assert_eq!(schema.properties["size"], PropertyType::Other);
    }

    #[test]
    fn unknown_property_types_are_skipped_silently() {
        let mut schema = TypeSchema::with_strings(Some("doc"), ["title"]);
        schema.properties.insert("size".into(), PropertyType::Other);
        schema.properties.insert("created".into(), PropertyType::Date);
        let fields = to_fields(&schema, false);
        let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "source", "seq", "type", "created", "title"]);
        assert!(fields.iter().all(|f| f.stored));
        assert!(fields[5].is_tokenized());
        assert!(!fields[0].is_tokenized());
        assert_eq!(fields[4].ty, FieldType::Date { fast: true });
    }

    #[test]
    fn common_fields_prefixed_for_merged_indexes() {
        let schema = TypeSchema::with_strings(Some("doc"), std::iter::empty());
        let names: Vec<_> = to_fields(&schema, true).into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["doc:id", "doc:source", "doc:seq", "doc:type"]);
        let unnamed = TypeSchema::default();
        assert_eq!(to_fields(&unnamed, true)[0].name, "id");
    }
}
