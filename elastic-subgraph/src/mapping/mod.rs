//! Document-store field mappings and their typed translation.
//!
//! A [`FieldMapping`] is the raw, store-provided description of an index: a tree of named
//! nodes, each either a leaf with a `type` or an object with nested `properties`.
//! [`translate`] turns it into a [`TypedField`] tree from which the GraphQL type
//! definitions, filter inputs and sort enums of an entity are generated.

mod translate;

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use strum_macros::Display;
use strum_macros::EnumString;
use strum_macros::IntoStaticStr;

pub use self::translate::translate;
use crate::error::MappingError;

/// A field mapping: the properties of an index, keyed by field name.
///
/// Properties are kept sorted by name so that the generated schema does not depend on the
/// key order of the mapping document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    #[serde(default)]
    pub properties: BTreeMap<String, MappingNode>,
}

/// One node of a field mapping.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingNode {
    /// The declared kind. Absent for plain objects that only carry `properties`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, MappingNode>>,

    /// Multi-fields indexed from the same source value (e.g. a `keyword` twin of a `text` field).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, MappingNode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_above: Option<u32>,
}

impl FieldMapping {
    /// Reads a mapping from any of the shapes a document store hands out:
    ///
    /// * `{ "properties": { .. } }`
    /// * `{ "mappings": { "properties": { .. } } }`
    /// * `{ "mappings": { "<type>": { "properties": { .. } } } }`
    pub fn from_json(value: &Value) -> Result<Self, MappingError> {
        let malformed = |reason: &str| MappingError::Malformed {
            reason: reason.to_string(),
        };
        let object = value
            .as_object()
            .ok_or_else(|| malformed("expected a JSON object"))?;
        let body = match object.get("mappings") {
            None => value,
            Some(mappings) if mappings.get("properties").is_some() => mappings,
            Some(Value::Object(types)) if types.len() == 1 => types
                .values()
                .next()
                .ok_or_else(|| malformed("empty mappings"))?,
            Some(_) => return Err(malformed("`mappings` must hold properties or a single type")),
        };
        if body.get("properties").is_none() {
            return Err(malformed("no `properties` found"));
        }
        serde_json::from_value(body.clone()).map_err(|e| MappingError::Malformed {
            reason: e.to_string(),
        })
    }
}

/// The leaf kinds a mapping may declare. Anything else fails translation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumString, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum LeafKind {
    Text,
    Keyword,
    Byte,
    Short,
    Integer,
    Long,
    HalfFloat,
    Float,
    ScaledFloat,
    Double,
    Date,
    GeoPoint,
    Boolean,
}

impl LeafKind {
    pub fn scalar_type(self) -> ScalarType {
        match self {
            LeafKind::Text => ScalarType::Text,
            LeafKind::Keyword => ScalarType::Keyword,
            LeafKind::Byte | LeafKind::Short | LeafKind::Integer | LeafKind::Long => {
                ScalarType::Int
            }
            LeafKind::HalfFloat | LeafKind::Float | LeafKind::ScaledFloat | LeafKind::Double => {
                ScalarType::Float
            }
            LeafKind::Date => ScalarType::Date,
            LeafKind::GeoPoint => ScalarType::GeoPoint,
            LeafKind::Boolean => ScalarType::Boolean,
        }
    }
}

/// The output type of a translated leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    /// Analyzed free text.
    Text,
    /// Exact-match string.
    Keyword,
    Int,
    Float,
    Date,
    GeoPoint,
    Boolean,
}

impl ScalarType {
    /// Name of the GraphQL output type.
    pub fn graphql_type(self) -> &'static str {
        match self {
            ScalarType::Text | ScalarType::Keyword => "String",
            ScalarType::Int => "Int",
            ScalarType::Float => "Float",
            ScalarType::Date => "Date",
            ScalarType::GeoPoint => "GeoPoint",
            ScalarType::Boolean => "Boolean",
        }
    }

    /// Name of the operator input used to filter on this type.
    pub fn filter_input(self) -> &'static str {
        match self {
            ScalarType::Text => "TextFilter",
            ScalarType::Keyword => "KeywordFilter",
            ScalarType::Int => "IntFilter",
            ScalarType::Float => "FloatFilter",
            ScalarType::Date => "DateFilter",
            ScalarType::GeoPoint => "GeoPointFilter",
            ScalarType::Boolean => "BooleanFilter",
        }
    }

    pub fn is_sortable(self) -> bool {
        !matches!(self, ScalarType::Text | ScalarType::GeoPoint)
    }

    pub(crate) fn label(self) -> &'static str {
        match self {
            ScalarType::Text => "text",
            ScalarType::Keyword => "keyword",
            ScalarType::Int => "integer",
            ScalarType::Float => "float",
            ScalarType::Date => "date",
            ScalarType::GeoPoint => "geo_point",
            ScalarType::Boolean => "boolean",
        }
    }
}

/// The GraphQL type of a translated node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphType {
    Scalar(ScalarType),
    /// A generated object type, by name.
    Object(String),
}

/// A node of the translated field tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedField {
    /// GraphQL field name.
    pub name: String,
    /// Dotted path of the field in the store; empty for the root.
    pub path: String,
    pub graph_type: GraphType,
    pub is_list: bool,
    /// Set on objects mapped as `nested`: each element is indexed as its own hidden
    /// document, so queries and sorts below it must name this path.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub nested: bool,
    /// Sub-fields of an object node; `None` for leaves.
    pub children: Option<Vec<TypedField>>,
    /// Exact-match twin of an analyzed leaf, filterable and sortable.
    pub filter_variant: Option<Box<TypedField>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_above: Option<u32>,
}

impl TypedField {
    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self.graph_type {
            GraphType::Scalar(scalar) => Some(scalar),
            GraphType::Object(_) => None,
        }
    }

    /// The generated object type name, for object nodes.
    pub fn object_type(&self) -> Option<&str> {
        match &self.graph_type {
            GraphType::Object(name) => Some(name),
            GraphType::Scalar(_) => None,
        }
    }

    pub fn children(&self) -> &[TypedField] {
        self.children.as_deref().unwrap_or_default()
    }

    /// Finds a direct child by GraphQL name, including filter variants of children.
    pub fn child(&self, name: &str) -> Option<&TypedField> {
        self.children().iter().find_map(|child| {
            if child.name == name {
                Some(child)
            } else {
                child
                    .filter_variant
                    .as_deref()
                    .filter(|variant| variant.name == name)
            }
        })
    }

    /// The key of this field in its parent's source document.
    pub fn source_key(&self) -> &str {
        self.path.rsplit('.').next().unwrap_or(&self.path)
    }

    /// Depth-first walk over every node below this one, filter variants included.
    pub fn descendants(&self) -> Vec<&TypedField> {
        let mut found = Vec::new();
        for child in self.children() {
            found.push(child);
            if let Some(variant) = &child.filter_variant {
                found.push(variant);
            }
            found.extend(child.descendants());
        }
        found
    }
}
