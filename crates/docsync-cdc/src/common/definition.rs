//! # Dataset Definitions
//!
//! A [`Definition`] is the compiled mapping from one source dataset to its
//! sink table: target table name, the ordered field list with conversion
//! rules, the identifier field and the qualified source namespace
//! (`database.dataset`) the change log uses.
//!
//! The [`DefinitionRegistry`] is a pure function of configuration. It is
//! consulted once per reconciliation and once more per restart, and every
//! call produces fresh, immutable Definitions.
//!
//! ```rust
//! use docsync_cdc::common::{DatasetMap, DefinitionRegistry, FieldCase};
//!
//! let yaml = "users:\n  _id: VARCHAR(24)\n  firstName: VARCHAR(255)\n";
//! let datasets: DatasetMap = serde_yaml::from_str(yaml).unwrap();
//!
//! let registry = DefinitionRegistry::new("app", "mirror_", FieldCase::SnakeCase);
//! let defs = registry.definitions(&datasets);
//! assert_eq!(defs[0].namespace, "app.users");
//! assert_eq!(defs[0].target_name, "mirror_users");
//! assert_eq!(defs[0].fields[1].target_name, "first_name");
//! ```

use crate::common::{ColumnValue, Conversion, DatasetShape, FieldCase, FieldDescriptor};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Field name → declared sink column type, in declaration order.
pub type FieldMap = IndexMap<String, String>;

/// Dataset name → fields, in declaration order.
pub type DatasetMap = IndexMap<String, FieldMap>;

/// Default identifier field of source documents.
pub const DEFAULT_ID_FIELD: &str = "_id";

/// How the identifier is addressed in the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdType {
    Number,
    String,
}

/// One mapped field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Field path in the source document (`a.b` reads `doc.a.b`)
    pub source_name: String,
    /// Sink column name
    pub target_name: String,
    /// Declared sink column type
    pub column_type: String,
    /// Value conversion rule
    pub conversion: Conversion,
    /// Whether this is the identifier column
    pub primary: bool,
}

impl FieldDefinition {
    /// Convert this field's value as found in `document`.
    pub fn extract(&self, document: &Value) -> ColumnValue {
        self.conversion.convert(lookup_path(document, &self.source_name))
    }
}

/// Compiled mapping for one logical dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    /// Dataset name as configured
    pub name: String,
    /// Qualified change log namespace (`database.dataset`)
    pub namespace: String,
    /// Sink table name (prefix + dataset name)
    pub target_name: String,
    /// Mapped fields, in declaration order
    pub fields: Vec<FieldDefinition>,
    /// Identifier field in the source document
    pub id_source_field: String,
    /// Identifier column in the sink
    pub id_target_field: String,
    /// Identifier addressing type
    pub id_type: IdType,
}

impl Definition {
    /// The identifier field definition, if the identifier is mapped.
    pub fn id_field(&self) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.primary)
    }

    /// Convert an identifier value the way the identifier column expects.
    pub fn convert_id(&self, id: &Value) -> ColumnValue {
        match self.id_field() {
            Some(field) => field.conversion.convert(Some(id)),
            None => match self.id_type {
                IdType::Number => Conversion::Integer.convert(Some(id)),
                IdType::String => Conversion::Text.convert(Some(id)),
            },
        }
    }

    /// Shape this definition expects the sink table to have.
    pub fn desired_shape(&self) -> DatasetShape {
        DatasetShape::new(
            self.name.clone(),
            self.fields
                .iter()
                .map(|f| FieldDescriptor::new(f.target_name.clone(), f.column_type.clone()))
                .collect(),
        )
    }
}

/// Look up a dotted path in a document.
///
/// `a.b` reads `document.a.b`. A key that literally contains the dots is
/// preferred over the nested path, matching how update fragments spell
/// nested fields (`{"$set": {"a.b": 1}}`).
pub fn lookup_path<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    if let Some(v) = document.get(path) {
        return Some(v);
    }
    if !path.contains('.') {
        return None;
    }
    path.split('.')
        .try_fold(document, |current, segment| current.get(segment))
}

/// Builds Definitions from configuration.
#[derive(Debug, Clone)]
pub struct DefinitionRegistry {
    database: String,
    prefix: String,
    field_case: FieldCase,
    id_field: String,
}

impl DefinitionRegistry {
    pub fn new(database: impl Into<String>, prefix: impl Into<String>, field_case: FieldCase) -> Self {
        Self {
            database: database.into(),
            prefix: prefix.into(),
            field_case,
            id_field: DEFAULT_ID_FIELD.to_string(),
        }
    }

    /// Use a different identifier field than `_id`.
    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    /// Sink table name prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build one Definition per configured dataset, in declaration order.
    pub fn definitions(&self, datasets: &DatasetMap) -> Vec<Definition> {
        datasets
            .iter()
            .map(|(name, fields)| self.definition(name, fields))
            .collect()
    }

    /// Build Definitions for the named datasets only, in declaration order.
    ///
    /// Names not present in `datasets` are ignored.
    pub fn definitions_for<'a>(
        &self,
        datasets: &DatasetMap,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Vec<Definition> {
        let wanted: std::collections::HashSet<&str> = names.into_iter().collect();
        datasets
            .iter()
            .filter(|(name, _)| wanted.contains(name.as_str()))
            .map(|(name, fields)| self.definition(name, fields))
            .collect()
    }

    /// Build the Definition for one dataset.
    pub fn definition(&self, name: &str, fields: &FieldMap) -> Definition {
        let fields: Vec<FieldDefinition> = fields
            .iter()
            .map(|(source_name, column_type)| FieldDefinition {
                source_name: source_name.clone(),
                target_name: self.field_case.apply(source_name),
                column_type: column_type.clone(),
                conversion: Conversion::for_column_type(column_type),
                primary: *source_name == self.id_field,
            })
            .collect();

        let id_field = fields.iter().find(|f| f.primary);
        let id_target_field = id_field
            .map(|f| f.target_name.clone())
            .unwrap_or_else(|| self.field_case.apply(&self.id_field));
        let id_type = match id_field {
            Some(f) if f.conversion.is_numeric() => IdType::Number,
            _ => IdType::String,
        };

        Definition {
            name: name.to_string(),
            namespace: format!("{}.{}", self.database, name),
            target_name: format!("{}{}", self.prefix, name),
            fields,
            id_source_field: self.id_field.clone(),
            id_target_field,
            id_type,
        }
    }
}

/// Namespace-indexed, immutable set of Definitions for one tail generation.
#[derive(Debug, Clone, Default)]
pub struct DefinitionSet {
    definitions: Vec<Arc<Definition>>,
    by_namespace: HashMap<String, usize>,
}

impl DefinitionSet {
    pub fn new(definitions: Vec<Definition>) -> Self {
        let definitions: Vec<Arc<Definition>> = definitions.into_iter().map(Arc::new).collect();
        let by_namespace = definitions
            .iter()
            .enumerate()
            .map(|(i, d)| (d.namespace.clone(), i))
            .collect();
        Self {
            definitions,
            by_namespace,
        }
    }

    /// Definition whose namespace matches, if tracked.
    pub fn get(&self, namespace: &str) -> Option<&Arc<Definition>> {
        self.by_namespace
            .get(namespace)
            .map(|&i| &self.definitions[i])
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.by_namespace.contains_key(namespace)
    }

    /// Namespaces covered by this set, in definition order.
    pub fn namespaces(&self) -> Vec<String> {
        self.definitions.iter().map(|d| d.namespace.clone()).collect()
    }

    /// Dataset names covered by this set, in definition order.
    pub fn names(&self) -> Vec<String> {
        self.definitions.iter().map(|d| d.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Definition>> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
