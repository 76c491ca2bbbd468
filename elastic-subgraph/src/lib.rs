//! Exposes the indices of a document store as a federated GraphQL subgraph.
//!
//! The field mapping of each index is translated into a typed field tree ([`mapping`]), from
//! which the type definitions and the search, pagination and connection resolvers of an entity
//! are generated ([`subgraph`], [`resolvers`]). The units of all entities are merged, together
//! with relation fields added to types owned by other subgraphs, into one immutable
//! [`FederatedSchema`] ([`merge`]). Executing a request against it resolves relation fields
//! through a per-request batcher, so that each relation costs one lookup per resolution pass
//! ([`relation`]).
//!
//! [`build_federated_schema`] does all of the above from a [`Configuration`].

#![warn(
    rustdoc::broken_intra_doc_links,
    unreachable_pub,
    unreachable_patterns,
    unused,
    unused_qualifications,
    dead_code,
    while_true,
    unconditional_panic,
    clippy::all
)]

pub mod configuration;
pub mod error;
mod execution;
pub mod graphql;
pub mod mapping;
pub mod merge;
pub mod relation;
pub mod resolvers;
pub mod store;
pub mod subgraph;

use std::sync::Arc;

use indexmap::IndexMap;
use indexmap::IndexSet;

pub use crate::configuration::Configuration;
use crate::configuration::ConfigurationError;
use crate::configuration::EntityConfig;
use crate::configuration::ExtensionConfig;
use crate::error::BuildError;
pub use crate::graphql::Request;
pub use crate::graphql::Response;
use crate::mapping::FieldMapping;
use crate::mapping::translate;
pub use crate::merge::FederatedSchema;
pub use crate::merge::FederationExtension;
pub use crate::merge::MergeOptions;
pub use crate::merge::merge;
use crate::store::BatchLookup;
use crate::store::SearchCapability;
use crate::store::lookup::RelationTarget;
use crate::store::lookup::StoreRelationLookup;
pub use crate::subgraph::EntitySchema;
use crate::subgraph::RelationBinding;
use crate::subgraph::Resolver;
pub use crate::subgraph::SubgraphUnit;

/// Builds the federated schema described by `configuration`.
///
/// Every entity reads its documents from `store`. Relation fields are answered by `lookup`
/// when given, and otherwise by a [`StoreRelationLookup`] querying the related entity's index
/// on its foreign key.
#[tracing::instrument(skip_all, fields(entities = configuration.entities.len()))]
pub fn build_federated_schema(
    configuration: &Configuration,
    store: Arc<dyn SearchCapability>,
    lookup: Option<Arc<dyn BatchLookup>>,
) -> Result<FederatedSchema, BuildError> {
    configuration.validate()?;

    let mut entities = IndexMap::new();
    for config in &configuration.entities {
        let entity = entity_schema(config, store.clone(), configuration)?;
        entities.insert(config.name.clone(), entity);
    }

    let mut store_lookup =
        StoreRelationLookup::new(store.clone(), configuration.limits.max_related);
    let extensions = configuration
        .extensions
        .iter()
        .map(|config| federation_extension(config, &entities, &mut store_lookup))
        .collect::<Result<Vec<_>, _>>()?;

    let options = MergeOptions {
        excluded_types: configuration.excluded_types.iter().cloned().collect(),
        lookup: Some(lookup.unwrap_or_else(|| Arc::new(store_lookup))),
    };
    let units: Vec<SubgraphUnit> = entities.values().map(EntitySchema::to_unit).collect();
    let schema = merge(&units, &extensions, &options)?;
    tracing::info!(
        entities = entities.len(),
        extensions = extensions.len(),
        "built federated schema"
    );
    Ok(schema)
}

fn entity_schema(
    config: &EntityConfig,
    store: Arc<dyn SearchCapability>,
    configuration: &Configuration,
) -> Result<EntitySchema, BuildError> {
    let mapping_error = |source| BuildError::Mapping {
        entity: config.name.clone(),
        source,
    };
    let document = config.mapping_document()?;
    let mapping = FieldMapping::from_json(&document).map_err(mapping_error)?;
    let plural_fields: IndexSet<String> = config.plural_fields.iter().cloned().collect();
    let fields = translate(&config.type_name(), &mapping, &plural_fields).map_err(mapping_error)?;
    let entity = EntitySchema::new(
        &config.name,
        fields,
        &config.index,
        store,
        configuration.limits.clone(),
    );
    Ok(match &config.key {
        Some(key) => entity.with_key(key),
        None => entity,
    })
}

/// The extension of one externally owned type, registering its relations on `lookup`.
fn federation_extension(
    config: &ExtensionConfig,
    entities: &IndexMap<String, EntitySchema>,
    lookup: &mut StoreRelationLookup,
) -> Result<FederationExtension, ConfigurationError> {
    let mut extension = FederationExtension::new(&config.type_name);
    for key in &config.key_fields {
        let type_ref = config.external_fields.get(key).map_or("ID!", String::as_str);
        extension = extension.key(key, type_ref);
    }
    for (name, type_ref) in &config.external_fields {
        if !extension.key_fields.contains(name) {
            extension = extension.external(name, type_ref);
        }
    }

    for (name, relation) in &config.fields {
        let field = format!("{}.{name}", config.type_name);
        let target =
            entities
                .get(&relation.entity)
                .ok_or_else(|| ConfigurationError::UnknownEntity {
                    field: field.clone(),
                    entity: relation.entity.clone(),
                })?;
        let key_field = relation
            .key_field
            .as_ref()
            .or_else(|| config.key_fields.first())
            .cloned()
            .ok_or_else(|| ConfigurationError::MissingKeyFields(config.type_name.clone()))?;
        lookup.add_relation(
            &field,
            RelationTarget {
                index: target.index.clone(),
                foreign_key: relation.foreign_key.clone(),
                fields: target.fields.clone(),
            },
        );
        let return_type = if relation.list {
            format!("[{}]", target.type_name)
        } else {
            target.type_name.clone()
        };
        extension = extension.field(
            name,
            return_type,
            Resolver::Relation(RelationBinding {
                relation: field,
                key_field,
                list: relation.list,
            }),
        );
    }
    Ok(extension)
}
