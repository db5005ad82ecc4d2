//! Record types and their fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    catalog::fields::{PropertyType, TypeSchema},
    error::{Error, Result},
};

/// Separates the type name from the field name in a field address.
pub const FIELD_SEPARATOR: char = '#';

/// Value kinds of fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Text.
    String,
    /// Floating point or integer number.
    Number,
    /// Boolean.
    Boolean,
    /// Date, as RFC 3339 string or milliseconds since the unix epoch.
    Date,
    /// Nested object, not indexable.
    Object,
    /// List of values.
    Array,
}

/// How a field is indexed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOpts {
    /// Derive range-queryable postings for this field.
    #[serde(default)]
    pub basic: bool,
    /// Add this field to full-text search catalogs.
    #[serde(default)]
    pub search: bool,
}

/// Definition of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Value kind.
    #[serde(rename = "type")]
    pub kind: FieldKind,
    /// Indexing options.
    #[serde(default)]
    pub index: IndexOpts,
    /// Human readable title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl FieldSpec {
    /// A field of `kind` that is not indexed.
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            index: IndexOpts::default(),
            title: None,
        }
    }

    /// Derive postings for this field.
    pub fn basic(mut self) -> Self {
        self.index.basic = true;
        self
    }

    /// Include this field in search catalogs.
    pub fn search(mut self) -> Self {
        self.index.search = true;
        self
    }
}

/// Definition of a record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSpec {
    /// Type name. Names without a `/` are placed in the schema namespace.
    pub name: String,
    /// Human readable title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Fields by name.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSpec>,
}

impl TypeSpec {
    /// Create an empty type.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            fields: Default::default(),
        }
    }

    /// Add a field.
    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.insert(name.into(), spec);
        self
    }

    /// Describe the searchable fields of this type for a search catalog.
    pub fn to_type_schema(&self) -> TypeSchema {
        let properties = self
            .fields
            .iter()
            .filter(|(_, field)| field.index.search)
            .map(|(name, field)| {
                let ty = match field.kind {
                    FieldKind::String => PropertyType::String,
                    FieldKind::Date => PropertyType::Date,
                    _ => PropertyType::Other,
                };
                (name.clone(), ty)
            })
            .collect();
        TypeSchema {
            name: Some(self.name.clone()),
            properties,
        }
    }
}

/// A resolved field: its address and definition.
#[derive(Debug, Clone, Copy)]
pub struct FieldRef<'a> {
    /// Namespaced type name.
    pub ty: &'a str,
    /// Field name.
    pub name: &'a str,
    /// Field definition.
    pub spec: &'a FieldSpec,
}

impl FieldRef<'_> {
    /// Address of the field, `<type>#<field>`.
    pub fn address(&self) -> String {
        field_address(self.ty, self.name)
    }
}

/// Registry of record types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    namespace: String,
    types: BTreeMap<String, TypeSpec>,
}

impl Schema {
    /// Create an empty schema. Unqualified type names are placed in `namespace`.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            types: Default::default(),
        }
    }

    /// The default namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Qualify a type name with the schema namespace, unless already qualified.
    pub fn resolve_type(&self, name: &str) -> String {
        if name.contains('/') || self.namespace.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.namespace, name)
        }
    }

    /// Add or replace a type. Returns the namespaced type name.
    pub fn add_type(&mut self, mut spec: TypeSpec) -> String {
        let name = self.resolve_type(&spec.name);
        spec.name.clone_from(&name);
        self.types.insert(name.clone(), spec);
        name
    }

    /// Get a type by (possibly unqualified) name.
    pub fn get_type(&self, name: &str) -> Option<&TypeSpec> {
        self.types.get(&self.resolve_type(name))
    }

    /// Iterate over all types.
    pub fn types(&self) -> impl Iterator<Item = &TypeSpec> {
        self.types.values()
    }

    /// Resolve a field from a field address (`<type>#<field>`).
    pub fn resolve_field(&self, address: &str) -> Result<FieldRef<'_>> {
        let unknown = || Error::UnknownField(address.to_string());
        let (ty, name) = address.rsplit_once(FIELD_SEPARATOR).ok_or_else(unknown)?;
        let spec = self.get_type(ty).ok_or_else(unknown)?;
        let (name, field) = spec.fields.get_key_value(name).ok_or_else(unknown)?;
        Ok(FieldRef {
            ty: &spec.name,
            name,
            spec: field,
        })
    }

    /// Resolve a field, optionally namespaced by a type name first.
    pub fn resolve_field_of(&self, ty: Option<&str>, field: &str) -> Result<FieldRef<'_>> {
        match ty {
            Some(ty) => self.resolve_field(&field_address(&self.resolve_type(ty), field)),
            None => self.resolve_field(field),
        }
    }

    /// Fields of a type that derive postings.
    pub fn basic_fields<'a>(&'a self, ty: &str) -> impl Iterator<Item = FieldRef<'a>> + 'a {
        self.get_type(ty)
            .into_iter()
            .flat_map(|spec| {
                spec.fields.iter().map(move |(name, field)| FieldRef {
                    ty: &spec.name,
                    name,
                    spec: field,
                })
            })
            .filter(|field| field.spec.index.basic)
    }
}

/// Build a field address.
pub fn field_address(ty: &str, field: &str) -> String {
    format!("{ty}{FIELD_SEPARATOR}{field}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        let mut schema = Schema::new("test");
        schema.add_type(
            TypeSpec::new("doc")
                .field("title", FieldSpec::new(FieldKind::String).basic().search())
                .field("size", FieldSpec::new(FieldKind::Number).basic())
                .field("meta", FieldSpec::new(FieldKind::Object)),
        );
        schema
    }

    #[test]
    fn type_names_are_namespaced() {
        let schema = schema();
        assert_eq!(schema.resolve_type("doc"), "test/doc");
        assert_eq!(schema.resolve_type("other/doc"), "other/doc");
        assert!(schema.get_type("doc").is_some());
        assert!(schema.get_type("test/doc").is_some());
    }

    #[test]
    fn field_resolution() {
        let schema = schema();
        let field = schema.resolve_field("test/doc#title").unwrap();
        assert_eq!(field.address(), "test/doc#title");
        let field = schema.resolve_field_of(Some("doc"), "size").unwrap();
        assert_eq!(field.address(), "test/doc#size");
        assert!(matches!(
            schema.resolve_field("test/doc#nope"),
            Err(Error::UnknownField(_))
        ));
        assert!(matches!(
            schema.resolve_field("title"),
            Err(Error::UnknownField(_))
        ));
    }

    #[test]
    fn basic_fields() {
        let schema = schema();
        let fields: Vec<_> = schema.basic_fields("doc").map(|f| f.address()).collect();
        assert_eq!(fields, vec!["test/doc#size", "test/doc#title"]);
        assert_eq!(schema.basic_fields("missing").count(), 0);
    }

    #[test]
    fn type_schema_only_has_searchable_fields() {
        let schema = schema();
        let ts = schema.get_type("doc").unwrap().to_type_schema();
        assert_eq!(ts.name.as_deref(), Some("test/doc"));
        assert_eq!(ts.properties.len(), 1);
        assert_eq!(ts.properties["title"], PropertyType::String);
    }
}
