//! Subgraph units: generated type definitions plus their resolver dispatch table.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::configuration::Limits;
use crate::mapping::GraphType;
use crate::mapping::ScalarType;
use crate::mapping::TypedField;
use crate::resolvers::EntityResolvers;
use crate::resolvers::filter::operators;
use crate::resolvers::sort::sortable_fields;
use crate::store::ID_FIELD;
use crate::store::SearchCapability;

pub(crate) const QUERY: &str = "Query";
pub(crate) const RESOLVE_REFERENCE: &str = "__resolveReference";

/// Resolvers by type name, then field name.
pub type ResolverMap = IndexMap<String, IndexMap<String, Resolver>>;

/// A resolver bound to one field at schema construction time.
///
/// Fields without a binding resolve to the property of the same name in their parent value.
#[derive(Clone, Debug)]
pub enum Resolver {
    /// `<entity>Search`
    Search(Arc<EntityResolvers>),
    /// `<entity>Pagination`
    Paginate(Arc<EntityResolvers>),
    /// `<entity>Connection`
    Connect(Arc<EntityResolvers>),
    /// Resolves representations of a keyed local entity, bound as `__resolveReference`.
    Reference {
        resolvers: Arc<EntityResolvers>,
        key: String,
    },
    /// `Query._entities`
    Entities,
    /// `Query._service`
    Service,
    /// A relation field added to an externally owned type.
    Relation(RelationBinding),
}

/// How a relation field finds its documents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationBinding {
    /// Name of the relation passed to the batch lookup, `<Type>.<field>`.
    pub relation: String,
    /// Field of the parent whose value is the lookup id.
    pub key_field: String,
    /// Whether every related document is returned, or only the first.
    pub list: bool,
}

/// Type definitions and the resolvers they need.
#[derive(Clone, Debug, Default)]
pub struct SubgraphUnit {
    pub type_definitions: String,
    pub resolvers: ResolverMap,
}

/// The schema of one indexed entity.
#[derive(Clone, Debug)]
pub struct EntitySchema {
    /// Prefix of the root fields.
    pub name: String,
    pub type_name: String,
    pub fields: Arc<TypedField>,
    pub index: String,
    /// Field used as the federation key.
    pub key: Option<String>,
    pub resolvers: Arc<EntityResolvers>,
}

impl EntitySchema {
    /// `fields` must be the tree translated for `fields.name`, the entity type name.
    pub fn new(
        name: impl Into<String>,
        fields: TypedField,
        index: impl Into<String>,
        store: Arc<dyn SearchCapability>,
        limits: Limits,
    ) -> Self {
        let index = index.into();
        let fields = Arc::new(fields);
        let resolvers = Arc::new(EntityResolvers::build(
            fields.clone(),
            index.clone(),
            store,
            limits,
        ));
        Self {
            name: name.into(),
            type_name: fields.name.clone(),
            fields,
            index,
            key: None,
            resolvers,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn search_field(&self) -> String {
        format!("{}Search", self.name)
    }

    pub fn pagination_field(&self) -> String {
        format!("{}Pagination", self.name)
    }

    pub fn connection_field(&self) -> String {
        format!("{}Connection", self.name)
    }

    pub fn type_definitions(&self) -> String {
        EntityDefinitions(self).to_string()
    }

    pub fn resolver_map(&self) -> ResolverMap {
        let mut map = ResolverMap::new();
        map.insert(
            QUERY.to_string(),
            IndexMap::from([
                (self.search_field(), Resolver::Search(self.resolvers.clone())),
                (
                    self.pagination_field(),
                    Resolver::Paginate(self.resolvers.clone()),
                ),
                (
                    self.connection_field(),
                    Resolver::Connect(self.resolvers.clone()),
                ),
            ]),
        );
        if let Some(key) = &self.key {
            map.insert(
                self.type_name.clone(),
                IndexMap::from([(
                    RESOLVE_REFERENCE.to_string(),
                    Resolver::Reference {
                        resolvers: self.resolvers.clone(),
                        key: key.clone(),
                    },
                )]),
            );
        }
        map
    }

    pub fn to_unit(&self) -> SubgraphUnit {
        SubgraphUnit {
            type_definitions: self.type_definitions(),
            resolvers: self.resolver_map(),
        }
    }
}

/// Types every unit refers to. Identical in every unit, so merging keeps one copy.
pub(crate) const SHARED_DEFINITIONS: &str = r#""""
A date or date-time, as stored in the index.
"""
scalar Date

type GeoPoint {
  lat: Float!
  lon: Float!
}

enum SortDirection {
  ASC
  DESC
}

input TextFilter {
  match: String
  exists: Boolean
}

input KeywordFilter {
  eq: String
  in: [String!]
  exists: Boolean
}

input IntFilter {
  eq: Int
  in: [Int!]
  gt: Int
  gte: Int
  lt: Int
  lte: Int
  exists: Boolean
}

input FloatFilter {
  eq: Float
  in: [Float!]
  gt: Float
  gte: Float
  lt: Float
  lte: Float
  exists: Boolean
}

input DateFilter {
  eq: Date
  gt: Date
  gte: Date
  lt: Date
  lte: Date
  exists: Boolean
}

input BooleanFilter {
  eq: Boolean
  exists: Boolean
}

input GeoDistanceInput {
  lat: Float!
  lon: Float!
  distanceKm: Float!
}

input GeoPointFilter {
  within: GeoDistanceInput
  exists: Boolean
}

type PageInfo {
  hasNextPage: Boolean!
  hasPreviousPage: Boolean!
  startCursor: String
  endCursor: String
}
"#;

struct EntityDefinitions<'a>(&'a EntitySchema);

impl fmt::Display for EntityDefinitions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entity = self.0;
        let root = &*entity.fields;
        let type_name = &entity.type_name;
        f.write_str(SHARED_DEFINITIONS)?;

        writeln!(f)?;
        writeln!(f, "\"\"\"\nDocuments of the `{}` index.\n\"\"\"", entity.index)?;
        write!(f, "type {type_name}")?;
        if let Some(key) = &entity.key {
            write!(f, " @key(fields: \"{key}\")")?;
        }
        writeln!(f, " {{")?;
        writeln!(f, "  {ID_FIELD}: ID!")?;
        write_output_fields(f, root)?;
        writeln!(f, "}}")?;
        for object in root.descendants() {
            if let Some(object_type) = object.object_type() {
                writeln!(f, "\ntype {object_type} {{")?;
                write_output_fields(f, object)?;
                writeln!(f, "}}")?;
            }
        }

        writeln!(f, "\ninput {type_name}Filter {{")?;
        for combinator in ["AND", "OR", "NOT"] {
            writeln!(f, "  {combinator}: [{type_name}Filter!]")?;
        }
        writeln!(f, "  {ID_FIELD}: {}", ScalarType::Keyword.filter_input())?;
        write_filter_fields(f, root)?;
        writeln!(f, "}}")?;
        for object in root.descendants() {
            if let Some(object_type) = object.object_type() {
                writeln!(f, "\ninput {object_type}Filter {{")?;
                write_filter_fields(f, object)?;
                writeln!(f, "}}")?;
            }
        }

        writeln!(f, "\nenum {type_name}SortField {{")?;
        for (value, _) in sortable_fields(root) {
            writeln!(f, "  {value}")?;
        }
        writeln!(f, "}}")?;
        writeln!(
            f,
            "\ninput {type_name}Sort {{\n  field: {type_name}SortField!\n  direction: SortDirection = ASC\n}}"
        )?;

        writeln!(
            f,
            "\ntype {type_name}Pagination {{\n  items: [{type_name}!]!\n  total: Int!\n  offset: Int!\n  limit: Int!\n  hasNextPage: Boolean!\n}}"
        )?;
        writeln!(
            f,
            "\ntype {type_name}Edge {{\n  node: {type_name}!\n  cursor: String!\n}}"
        )?;
        writeln!(
            f,
            "\ntype {type_name}Connection {{\n  edges: [{type_name}Edge!]!\n  pageInfo: PageInfo!\n  totalCount: Int!\n}}"
        )?;

        let query_args = format!("filter: {type_name}Filter, sort: [{type_name}Sort!]");
        writeln!(f, "\ntype {QUERY} {{")?;
        writeln!(
            f,
            "  {}({query_args}, limit: Int): [{type_name}!]",
            entity.search_field()
        )?;
        writeln!(
            f,
            "  {}({query_args}, offset: Int = 0, limit: Int): {type_name}Pagination",
            entity.pagination_field()
        )?;
        writeln!(
            f,
            "  {}({query_args}, first: Int, after: String): {type_name}Connection",
            entity.connection_field()
        )?;
        writeln!(f, "}}")
    }
}

fn write_output_fields(f: &mut fmt::Formatter<'_>, node: &TypedField) -> fmt::Result {
    for child in node.children() {
        write_output_field(f, child, None)?;
        if let Some(variant) = &child.filter_variant {
            write_output_field(f, variant, Some(&child.name))?;
        }
    }
    Ok(())
}

fn write_output_field(
    f: &mut fmt::Formatter<'_>,
    field: &TypedField,
    variant_of: Option<&str>,
) -> fmt::Result {
    let mut notes = Vec::new();
    if let Some(parent) = variant_of {
        notes.push(format!("Exact value of `{parent}`."));
    }
    if let Some(analyzer) = &field.analyzer {
        notes.push(format!("Analyzed with `{analyzer}`."));
    }
    if let Some(limit) = field.ignore_above {
        notes.push(format!("Values longer than {limit} characters are not indexed."));
    }
    if !notes.is_empty() {
        writeln!(f, "  \"\"\"\n  {}\n  \"\"\"", notes.join(" "))?;
    }
    let named = match &field.graph_type {
        GraphType::Scalar(scalar) => scalar.graphql_type(),
        GraphType::Object(object_type) => object_type.as_str(),
    };
    if field.is_list {
        writeln!(f, "  {}: [{named}]", field.name)
    } else {
        writeln!(f, "  {}: {named}", field.name)
    }
}

fn write_filter_fields(f: &mut fmt::Formatter<'_>, node: &TypedField) -> fmt::Result {
    for child in node.children() {
        let fields = std::iter::once(child).chain(child.filter_variant.as_deref());
        for field in fields {
            match &field.graph_type {
                GraphType::Scalar(scalar) if !operators(*scalar).is_empty() => {
                    writeln!(f, "  {}: {}", field.name, scalar.filter_input())?
                }
                GraphType::Scalar(_) => {}
                GraphType::Object(object_type) => {
                    writeln!(f, "  {}: {object_type}Filter", field.name)?
                }
            }
        }
    }
    Ok(())
}
