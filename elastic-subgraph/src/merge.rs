//! Merging of subgraph units and federation extensions into one federated schema.

use std::fmt;
use std::sync::Arc;

use apollo_compiler::Schema;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;
use indexmap::IndexMap;
use indexmap::IndexSet;
use itertools::Itertools;

use crate::error::MergeConflictError;
use crate::store::BatchLookup;
use crate::subgraph::QUERY;
use crate::subgraph::RESOLVE_REFERENCE;
use crate::subgraph::Resolver;
use crate::subgraph::ResolverMap;
use crate::subgraph::SubgraphUnit;

pub(crate) const ENTITIES_FIELD: &str = "_entities";
pub(crate) const SERVICE_FIELD: &str = "_service";
pub(crate) const ENTITY_UNION: &str = "_Entity";

/// Definitions every unit may refer to without declaring them.
const FEDERATION_DEFINITIONS: &str = r#"
scalar _Any
scalar _FieldSet

directive @key(fields: _FieldSet!, resolvable: Boolean = true) repeatable on OBJECT | INTERFACE
directive @external on FIELD_DEFINITION | OBJECT
directive @extends on OBJECT | INTERFACE

type _Service {
  sdl: String
}
"#;

const FEDERATION_TYPES: [&str; 4] = ["_Any", "_FieldSet", "_Service", ENTITY_UNION];

/// An `extend type X @key(..) { .. }` declaration for a type owned by another subgraph.
#[derive(Clone, Debug)]
pub struct FederationExtension {
    pub type_name: String,
    /// Fields of the `@key` directive. Each one must be an external field.
    pub key_fields: IndexSet<String>,
    /// Fields owned by the other subgraph, with their GraphQL type.
    pub external_fields: IndexMap<String, String>,
    pub added_fields: IndexMap<String, AddedField>,
}

/// A field this subgraph contributes to an extended type.
#[derive(Clone, Debug)]
pub struct AddedField {
    /// GraphQL type of the field, e.g. `[Article]`.
    pub return_type: String,
    pub resolver: Resolver,
}

impl FederationExtension {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            key_fields: IndexSet::new(),
            external_fields: IndexMap::new(),
            added_fields: IndexMap::new(),
        }
    }

    /// Declares an external field that is part of the `@key`.
    pub fn key(mut self, name: impl Into<String>, type_ref: impl Into<String>) -> Self {
        let name = name.into();
        self.key_fields.insert(name.clone());
        self.external_fields.insert(name, type_ref.into());
        self
    }

    pub fn external(mut self, name: impl Into<String>, type_ref: impl Into<String>) -> Self {
        self.external_fields.insert(name.into(), type_ref.into());
        self
    }

    pub fn field(
        mut self,
        name: impl Into<String>,
        return_type: impl Into<String>,
        resolver: Resolver,
    ) -> Self {
        self.added_fields.insert(
            name.into(),
            AddedField {
                return_type: return_type.into(),
                resolver,
            },
        );
        self
    }
}

/// Options of [`merge`].
#[derive(Clone)]
pub struct MergeOptions {
    /// Type names not subject to duplicate-definition checks: built-in names are never copied
    /// from units, others are taken from the first unit defining them.
    pub excluded_types: IndexSet<String>,
    /// Answers relation fields. Required as soon as an extension adds one.
    pub lookup: Option<Arc<dyn BatchLookup>>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            excluded_types: ["String", "Int", "Float", "Boolean", "ID"]
                .into_iter()
                .map(String::from)
                .collect(),
            lookup: None,
        }
    }
}

impl fmt::Debug for MergeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeOptions")
            .field("excluded_types", &self.excluded_types)
            .field("lookup", &self.lookup.is_some())
            .finish()
    }
}

/// The schema served by this subgraph, built once and immutable afterwards.
pub struct FederatedSchema {
    pub(crate) schema: Valid<Schema>,
    pub(crate) sdl: String,
    pub(crate) resolvers: ResolverMap,
    pub(crate) entity_types: IndexSet<String>,
    pub(crate) lookup: Option<Arc<dyn BatchLookup>>,
}

impl fmt::Debug for FederatedSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FederatedSchema")
            .field("entity_types", &self.entity_types)
            .field(
                "resolvers",
                &self
                    .resolvers
                    .iter()
                    .map(|(type_name, fields)| (type_name, fields.keys().collect::<Vec<_>>()))
                    .collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl FederatedSchema {
    /// The full executable schema, federation definitions included.
    pub fn schema(&self) -> &Valid<Schema> {
        &self.schema
    }

    /// The subgraph SDL served by `_service { sdl }`.
    pub fn sdl(&self) -> &str {
        &self.sdl
    }

    pub fn resolver(&self, type_name: &str, field_name: &str) -> Option<&Resolver> {
        self.resolvers.get(type_name)?.get(field_name)
    }

    /// Types resolvable through `_entities`.
    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.entity_types.iter().map(String::as_str)
    }
}

impl fmt::Display for FederatedSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.schema.serialize())
    }
}

/// Combines subgraph units and federation extensions into one validated schema.
///
/// Types defined identically by several units are kept once, object types defined by several
/// units have their fields combined, and any other overlap is a [`MergeConflictError`].
/// Resolver bindings must cover every root field and point at fields that exist.
#[tracing::instrument(skip_all, fields(units = units.len(), extensions = extensions.len()))]
pub fn merge(
    units: &[SubgraphUnit],
    extensions: &[FederationExtension],
    options: &MergeOptions,
) -> Result<FederatedSchema, MergeConflictError> {
    let mut merged = Schema::new();
    let mut resolvers = ResolverMap::new();
    for (index, unit) in units.iter().enumerate() {
        let schema = Schema::builder()
            .adopt_orphan_extensions()
            .parse(FEDERATION_DEFINITIONS, "federation.graphql")
            .parse(&unit.type_definitions, format!("unit{index}.graphql"))
            .build()
            .map_err(|e| MergeConflictError::InvalidTypeDefinitions {
                unit: index,
                message: e.errors.to_string(),
            })?;
        merge_types(&mut merged, &schema, &options.excluded_types)?;
        merge_resolvers(&mut resolvers, &unit.resolvers)?;
    }

    let mut extension_types: IndexMap<&str, ExtensionDefinition> = IndexMap::new();
    for extension in extensions {
        let type_name = extension.type_name.as_str();
        if merged.types.contains_key(type_name) {
            return Err(MergeConflictError::ExtendsLocalType(type_name.to_string()));
        }
        let definition = extension_types.entry(type_name).or_default();
        definition.add(extension)?;
        let bindings = resolvers.entry(extension.type_name.clone()).or_default();
        for (field, added) in &extension.added_fields {
            if let Resolver::Relation(binding) = &added.resolver {
                if !definition.external_fields.contains_key(&binding.key_field) {
                    return Err(MergeConflictError::UnknownKeyField {
                        type_name: type_name.to_string(),
                        field: binding.key_field.clone(),
                    });
                }
                if options.lookup.is_none() {
                    return Err(MergeConflictError::MissingLookup {
                        type_name: type_name.to_string(),
                        field: field.clone(),
                    });
                }
            }
            if bindings
                .insert(field.clone(), added.resolver.clone())
                .is_some()
            {
                return Err(MergeConflictError::DuplicateResolver {
                    type_name: type_name.to_string(),
                    field: field.clone(),
                });
            }
        }
    }

    let mut entity_types: IndexSet<String> = resolvers
        .iter()
        .filter(|(_, fields)| fields.contains_key(RESOLVE_REFERENCE))
        .map(|(type_name, _)| type_name.clone())
        .collect();
    entity_types.extend(extension_types.keys().map(|name| name.to_string()));

    let sdl = format!(
        "{}{}",
        merged.serialize(),
        extension_types
            .iter()
            .map(|(type_name, definition)| ExtensionSdl(type_name, definition).to_string())
            .collect::<String>()
    );
    let mut federation = String::new();
    if !entity_types.is_empty() {
        federation.push_str(&format!(
            "\nunion {ENTITY_UNION} = {}\n",
            entity_types.iter().join(" | ")
        ));
    }
    federation.push_str(&format!("\nextend type {QUERY} {{\n"));
    if !entity_types.is_empty() {
        federation.push_str(&format!(
            "  {ENTITIES_FIELD}(representations: [_Any!]!): [{ENTITY_UNION}]!\n"
        ));
    }
    federation.push_str(&format!("  {SERVICE_FIELD}: _Service!\n}}\n"));

    let schema = Schema::builder()
        .adopt_orphan_extensions()
        .parse(FEDERATION_DEFINITIONS, "federation.graphql")
        .parse(&sdl, "subgraph.graphql")
        .parse(&federation, "entities.graphql")
        .build()
        .and_then(|schema| schema.validate())
        .map_err(|e| MergeConflictError::InvalidSchema(e.errors.to_string()))?;

    let query = resolvers.entry(QUERY.to_string()).or_default();
    if !entity_types.is_empty() {
        query.insert(ENTITIES_FIELD.to_string(), Resolver::Entities);
    }
    query.insert(SERVICE_FIELD.to_string(), Resolver::Service);
    check_resolvers(&schema, &resolvers)?;

    tracing::debug!(
        types = schema.types.values().filter(|ty| !ty.is_built_in()).count(),
        entities = entity_types.len(),
        "merged federated schema"
    );
    Ok(FederatedSchema {
        schema,
        sdl,
        resolvers,
        entity_types,
        lookup: options.lookup.clone(),
    })
}

fn merge_types(
    merged: &mut Schema,
    schema: &Schema,
    excluded_types: &IndexSet<String>,
) -> Result<(), MergeConflictError> {
    if merged.schema_definition.query.is_none() && schema.schema_definition.query.is_some() {
        merged
            .schema_definition
            .make_mut()
            .query
            .clone_from(&schema.schema_definition.query);
    }
    for (name, ty) in &schema.types {
        if ty.is_built_in() || FEDERATION_TYPES.contains(&name.as_str()) {
            continue;
        }
        let Some(existing) = merged.types.get_mut(name) else {
            merged.types.insert(name.clone(), ty.clone());
            continue;
        };
        if excluded_types.contains(name.as_str()) {
            tracing::debug!(type_name = %name, "kept the first definition of an excluded type");
            continue;
        }
        if existing == ty {
            tracing::debug!(type_name = %name, "type shared by several units");
            continue;
        }
        match (existing, ty) {
            (ExtendedType::Object(existing), ExtendedType::Object(incoming)) => {
                let existing = existing.make_mut();
                for (field_name, field) in &incoming.fields {
                    if existing.fields.contains_key(field_name) {
                        return Err(MergeConflictError::DuplicateField {
                            type_name: name.to_string(),
                            field: field_name.to_string(),
                        });
                    }
                    existing.fields.insert(field_name.clone(), field.clone());
                }
            }
            _ => {
                return Err(MergeConflictError::DuplicateType {
                    type_name: name.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn merge_resolvers(merged: &mut ResolverMap, unit: &ResolverMap) -> Result<(), MergeConflictError> {
    for (type_name, fields) in unit {
        let bindings = merged.entry(type_name.clone()).or_default();
        for (field, resolver) in fields {
            if bindings.insert(field.clone(), resolver.clone()).is_some() {
                return Err(MergeConflictError::DuplicateResolver {
                    type_name: type_name.clone(),
                    field: field.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Every root field has a resolver, and every resolver is bound to an existing field.
fn check_resolvers(schema: &Schema, resolvers: &ResolverMap) -> Result<(), MergeConflictError> {
    for (type_name, fields) in resolvers {
        for (field, resolver) in fields {
            let unknown = || MergeConflictError::UnknownField {
                type_name: type_name.clone(),
                field: field.clone(),
            };
            if field == RESOLVE_REFERENCE {
                let Some(ExtendedType::Object(object)) = schema.types.get(type_name.as_str())
                else {
                    return Err(unknown());
                };
                if let Resolver::Reference { key, .. } = resolver {
                    if !object.fields.contains_key(key.as_str()) {
                        return Err(MergeConflictError::UnknownKeyField {
                            type_name: type_name.clone(),
                            field: key.clone(),
                        });
                    }
                }
            } else if schema.type_field(type_name, field).is_err() {
                return Err(unknown());
            }
        }
    }
    if let Some(ExtendedType::Object(query)) = schema.types.get(QUERY) {
        let bound = resolvers.get(QUERY);
        for field in query.fields.keys() {
            if !bound.is_some_and(|fields| fields.contains_key(field.as_str())) {
                return Err(MergeConflictError::MissingResolver {
                    type_name: QUERY.to_string(),
                    field: field.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// All extensions of one type.
#[derive(Default)]
struct ExtensionDefinition {
    keys: Vec<Vec<String>>,
    external_fields: IndexMap<String, String>,
    added_fields: IndexMap<String, String>,
}

impl ExtensionDefinition {
    fn add(&mut self, extension: &FederationExtension) -> Result<(), MergeConflictError> {
        let type_name = &extension.type_name;
        for (field, type_ref) in &extension.external_fields {
            match self.external_fields.get(field) {
                Some(existing) if existing != type_ref => {
                    return Err(MergeConflictError::ConflictingExternalField {
                        type_name: type_name.clone(),
                        field: field.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    self.external_fields.insert(field.clone(), type_ref.clone());
                }
            }
        }
        for key in &extension.key_fields {
            if !self.external_fields.contains_key(key) {
                return Err(MergeConflictError::UnknownKeyField {
                    type_name: type_name.clone(),
                    field: key.clone(),
                });
            }
        }
        let key: Vec<String> = extension.key_fields.iter().cloned().collect();
        if !key.is_empty() && !self.keys.contains(&key) {
            self.keys.push(key);
        }
        for (field, added) in &extension.added_fields {
            if self.external_fields.contains_key(field)
                || self
                    .added_fields
                    .insert(field.clone(), added.return_type.clone())
                    .is_some()
            {
                return Err(MergeConflictError::DuplicateField {
                    type_name: type_name.clone(),
                    field: field.clone(),
                });
            }
        }
        Ok(())
    }
}

struct ExtensionSdl<'a>(&'a str, &'a ExtensionDefinition);

impl fmt::Display for ExtensionSdl<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ExtensionSdl(type_name, definition) = self;
        write!(f, "\nextend type {type_name}")?;
        for key in &definition.keys {
            write!(f, " @key(fields: \"{}\")", key.join(" "))?;
        }
        writeln!(f, " {{")?;
        for (field, type_ref) in &definition.external_fields {
            writeln!(f, "  {field}: {type_ref} @external")?;
        }
        for (field, type_ref) in &definition.added_fields {
            writeln!(f, "  {field}: {type_ref}")?;
        }
        writeln!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    use super::*;
    use crate::error::LookupError;
    use crate::subgraph::RelationBinding;

    struct NoLookup;

    #[async_trait]
    impl BatchLookup for NoLookup {
        async fn lookup_many(
            &self,
            _relation: &str,
            ids: &IndexSet<String>,
        ) -> Result<HashMap<String, Option<Vec<Value>>>, LookupError> {
            Ok(ids.iter().map(|id| (id.clone(), None)).collect())
        }
    }

    fn unit(type_definitions: &str, query_fields: &[&str]) -> SubgraphUnit {
        SubgraphUnit {
            type_definitions: type_definitions.to_string(),
            resolvers: IndexMap::from([(
                QUERY.to_string(),
                query_fields
                    .iter()
                    .map(|field| (field.to_string(), Resolver::Service))
                    .collect(),
            )]),
        }
    }

    fn relation() -> Resolver {
        Resolver::Relation(RelationBinding {
            relation: "Content.related".into(),
            key_field: "id".into(),
            list: true,
        })
    }

    fn options() -> MergeOptions {
        MergeOptions {
            lookup: Some(Arc::new(NoLookup)),
            ..Default::default()
        }
    }

    #[test]
    #[tracing_test::traced_test]
    fn identical_types_are_kept_once_and_query_fields_combine() {
        let shared = "type GeoPoint { lat: Float! lon: Float! }";
        let a = unit(
            &format!("{shared}\ntype A {{ location: GeoPoint }}\ntype Query {{ a: A }}"),
            &["a"],
        );
        let b = unit(
            &format!("{shared}\ntype B {{ name: String }}\ntype Query {{ b: B }}"),
            &["b"],
        );
        let schema = merge(&[a, b], &[], &MergeOptions::default()).unwrap();
        let Some(ExtendedType::Object(query)) = schema.schema.types.get("Query") else {
            panic!("merged schema has no Query type");
        };
        let query: Vec<_> = query.fields.keys().map(|name| name.as_str()).collect();
        assert_eq!(query, ["a", "b", "_service"]);
        assert_eq!(schema.sdl.matches("type GeoPoint").count(), 1);
        assert!(!schema.sdl.contains("_service"));
        assert_eq!(schema.entity_types().count(), 0);
        assert!(logs_contain("type shared by several units"));
        assert!(logs_contain("type_name=GeoPoint"));
    }

    #[test]
    fn conflicting_definitions_are_rejected() {
        let a = unit("type Shared { x: Int }\ntype Query { a: Shared }", &["a"]);
        let b = unit("type Shared { x: String }\ntype Query { b: Shared }", &["b"]);
        let err = merge(&[a, b], &[], &MergeOptions::default()).unwrap_err();
        assert_eq!(
            err,
            MergeConflictError::DuplicateField {
                type_name: "Shared".into(),
                field: "x".into()
            }
        );

        let a = unit("enum Kind { A }\ntype Query { a: Kind }", &["a"]);
        let b = unit("enum Kind { B }\ntype Query { b: Kind }", &["b"]);
        let err = merge(&[a, b], &[], &MergeOptions::default()).unwrap_err();
        assert_eq!(
            err,
            MergeConflictError::DuplicateType {
                type_name: "Kind".into()
            }
        );
    }

    #[test]
    fn excluded_types_skip_conflict_checks() {
        let a = unit(
            "\"\"\"first\"\"\" scalar Date\ntype Query { a: Date }",
            &["a"],
        );
        let b = unit(
            "\"\"\"second\"\"\" scalar Date\ntype Query { b: Date }",
            &["b"],
        );
        let mut options = MergeOptions::default();
        assert!(merge(&[a.clone(), b.clone()], &[], &options).is_err());
        options.excluded_types.insert("Date".into());
        let schema = merge(&[a, b], &[], &options).unwrap();
        assert!(schema.sdl.contains("first"));
        assert!(!schema.sdl.contains("second"));
    }

    #[test]
    fn extensions_add_fields_keys_and_entities() {
        let a = unit("type Article { title: String }\ntype Query { a: [Article] }", &["a"]);
        let extension = FederationExtension::new("Content")
            .key("id", "ID!")
            .field("related", "[Article]", relation());
        let schema = merge(&[a], &[extension], &options()).unwrap();
        assert!(schema.sdl.contains(
            "extend type Content @key(fields: \"id\") {\n  id: ID! @external\n  related: [Article]\n}"
        ));
        assert_eq!(schema.entity_types().collect::<Vec<_>>(), ["Content"]);
        assert!(matches!(
            schema.resolver("Content", "related"),
            Some(Resolver::Relation(_))
        ));
        assert!(matches!(
            schema.resolver(QUERY, ENTITIES_FIELD),
            Some(Resolver::Entities)
        ));
        assert!(schema.schema.type_field(QUERY, ENTITIES_FIELD).is_ok());
    }

    #[test]
    fn extension_errors() {
        let a = || unit("type Article { title: String }\ntype Query { a: Article }", &["a"]);

        let local = FederationExtension::new("Article").key("title", "String");
        assert_eq!(
            merge(&[a()], &[local], &options()).unwrap_err(),
            MergeConflictError::ExtendsLocalType("Article".into())
        );

        let mut unkeyed = FederationExtension::new("Content");
        unkeyed.key_fields.insert("id".into());
        assert!(matches!(
            merge(&[a()], &[unkeyed], &options()).unwrap_err(),
            MergeConflictError::UnknownKeyField { .. }
        ));

        let first = FederationExtension::new("Content").key("id", "ID!");
        let second = FederationExtension::new("Content").key("id", "String");
        assert!(matches!(
            merge(&[a()], &[first, second], &options()).unwrap_err(),
            MergeConflictError::ConflictingExternalField { .. }
        ));

        let related = FederationExtension::new("Content")
            .key("id", "ID!")
            .field("related", "[Article]", relation());
        assert!(matches!(
            merge(&[a()], &[related.clone(), related.clone()], &options()).unwrap_err(),
            MergeConflictError::DuplicateField { .. }
        ));
        assert!(matches!(
            merge(&[a()], &[related], &MergeOptions::default()).unwrap_err(),
            MergeConflictError::MissingLookup { .. }
        ));
    }

    #[test]
    fn resolver_bindings_are_checked() {
        let missing = unit("type Query { a: Int b: Int }", &["a"]);
        assert_eq!(
            merge(&[missing], &[], &MergeOptions::default()).unwrap_err(),
            MergeConflictError::MissingResolver {
                type_name: "Query".into(),
                field: "b".into()
            }
        );

        let unknown = unit("type Query { a: Int }", &["a", "c"]);
        assert!(matches!(
            merge(&[unknown], &[], &MergeOptions::default()).unwrap_err(),
            MergeConflictError::UnknownField { .. }
        ));

        let a = unit("type Query { a: Int }", &["a"]);
        let again = unit("type Query { b: Int }", &["a"]);
        assert!(matches!(
            merge(&[a, again], &[], &MergeOptions::default()).unwrap_err(),
            MergeConflictError::DuplicateResolver { .. }
        ));

        let broken = unit("type Query {", &[]);
        assert!(matches!(
            merge(&[broken], &[], &MergeOptions::default()).unwrap_err(),
            MergeConflictError::InvalidTypeDefinitions { unit: 0, .. }
        ));
    }
}
