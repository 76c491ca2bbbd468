//! Breadth-first execution.
//!
//! Each pass resolves the fields of every object found by the previous pass. Root resolvers
//! of a pass run concurrently, relation fields only queue their parent ids, and the relation
//! batcher is flushed once before the pass completes its values. A list of parents asking
//! for the same relation therefore costs one lookup.

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Name;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::Selection;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::Type;
use apollo_compiler::validation::Valid;
use futures::future::join_all;
use indexmap::IndexMap;
use indexmap::IndexSet;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use super::input_coercion::coerce_argument_values;
use super::input_coercion::is_skipped;
use crate::error::FieldError;
use crate::graphql;
use crate::graphql::Path;
use crate::graphql::insert_at;
use crate::merge::FederatedSchema;
use crate::relation::RelationBatcher;
use crate::store::key_string;
use crate::subgraph::RESOLVE_REFERENCE;
use crate::subgraph::RelationBinding;
use crate::subgraph::Resolver;

const TYPENAME: &str = "__typename";

/// A field error was recorded and the enclosing nullable position must become `null`.
#[derive(Debug)]
pub(crate) struct PropagateNull;

type Resolved = Result<(Value, Vec<graphql::Error>), FieldError>;

pub(crate) struct Engine<'a> {
    pub(crate) schema: &'a FederatedSchema,
    pub(crate) document: &'a Valid<ExecutableDocument>,
    pub(crate) variables: &'a Map<String, Value>,
    pub(crate) batcher: Option<RelationBatcher>,
}

/// An object whose fields are resolved by the next pass.
struct ObjectTask<'a> {
    path: Path,
    /// Nearest position at or above `path` that may be `null`.
    nullable: Path,
    type_name: String,
    source: Value,
    selections: Vec<&'a Selection>,
}

struct PendingField<'a> {
    path: Path,
    nullable: Path,
    ty: &'a Type,
    fields: Vec<&'a Field>,
    pending: Pending<'a>,
}

enum Pending<'a> {
    Ready(Value),
    /// Index into the root results of the pass.
    Root(usize),
    Relation {
        binding: &'a RelationBinding,
        parent_id: Option<String>,
    },
}

/// The response being built.
#[derive(Default)]
pub(crate) struct Output {
    pub(crate) data: Value,
    pub(crate) errors: Vec<graphql::Error>,
    nulled: Vec<Path>,
}

impl Output {
    fn is_nulled(&self, path: &Path) -> bool {
        self.nulled
            .iter()
            .any(|nulled| path.0.starts_with(&nulled.0))
    }

    fn write(&mut self, path: &Path, value: Value) {
        if self.is_nulled(path) {
            return;
        }
        if path.is_empty() {
            self.data = value;
        } else {
            insert_at(&mut self.data, path, value);
        }
    }

    fn nullify(&mut self, path: &Path) {
        self.write(path, Value::Null);
        self.nulled.push(path.clone());
    }
}

impl<'a> Engine<'a> {
    pub(crate) async fn execute(&self, root_type: &Name, selections: &'a [Selection]) -> Output {
        let mut output = Output {
            data: Value::Object(Map::new()),
            ..Default::default()
        };
        let mut tasks = vec![ObjectTask {
            path: Path::empty(),
            nullable: Path::empty(),
            type_name: root_type.to_string(),
            source: Value::Null,
            selections: selections.iter().collect(),
        }];
        while !tasks.is_empty() {
            tasks = self.pass(&mut output, tasks).await;
        }
        output
    }

    async fn pass(
        &self,
        output: &mut Output,
        tasks: Vec<ObjectTask<'a>>,
    ) -> Vec<ObjectTask<'a>> {
        let mut fields = Vec::new();
        let mut roots = Vec::new();
        for task in tasks {
            if output.is_nulled(&task.path) {
                continue;
            }
            let collected = self.collect_fields(&task.type_name, &task.selections);
            output.write(
                &task.path,
                Value::Object(
                    collected
                        .keys()
                        .map(|key| (key.to_string(), Value::Null))
                        .collect(),
                ),
            );
            for (response_key, group) in collected {
                let field = group[0];
                let path = task.path.key(response_key.as_str());
                let pending = if field.name == TYPENAME {
                    Pending::Ready(Value::String(task.type_name.clone()))
                } else {
                    match self.schema.resolver(&task.type_name, &field.name) {
                        None => Pending::Ready(
                            task.source
                                .get(field.name.as_str())
                                .cloned()
                                .unwrap_or_default(),
                        ),
                        Some(Resolver::Relation(binding)) => {
                            let parent_id =
                                task.source.get(&binding.key_field).and_then(key_string);
                            if let (Some(batcher), Some(parent_id)) = (&self.batcher, &parent_id)
                            {
                                batcher.enqueue(&binding.relation, parent_id);
                            }
                            Pending::Relation { binding, parent_id }
                        }
                        Some(resolver) => {
                            let arguments = coerce_argument_values(field, self.variables);
                            roots.push(self.resolve_root(resolver, arguments, path.clone()));
                            Pending::Root(roots.len() - 1)
                        }
                    }
                };
                fields.push(PendingField {
                    path,
                    nullable: task.nullable.clone(),
                    ty: field.ty(),
                    fields: group,
                    pending,
                });
            }
        }

        let mut root_results: Vec<Option<Resolved>> =
            join_all(roots).await.into_iter().map(Some).collect();
        if let Some(batcher) = &self.batcher {
            batcher.flush().await;
        }

        let mut next = Vec::new();
        for field in fields {
            let resolved = match field.pending {
                Pending::Ready(value) => Ok((value, Vec::new())),
                Pending::Root(index) => root_results
                    .get_mut(index)
                    .and_then(Option::take)
                    .unwrap_or_else(|| {
                        Err(FieldError::Execution("root field was not resolved".into()))
                    }),
                Pending::Relation { binding, parent_id } => {
                    self.relation_value(binding, parent_id)
                }
            };
            let completed = match resolved {
                Ok((value, errors)) => {
                    output.errors.extend(errors);
                    self.complete_value(
                        output,
                        &field.path,
                        &field.nullable,
                        field.ty,
                        value,
                        &field.fields,
                        &mut next,
                    )
                }
                Err(error) => {
                    output
                        .errors
                        .push(error.to_graphql_error(field.path.clone()));
                    Err(PropagateNull)
                }
            };
            match try_nullify(field.ty, completed) {
                Ok(value) => output.write(&field.path, value),
                Err(PropagateNull) => output.nullify(&field.nullable),
            }
        }
        next
    }

    /// <https://spec.graphql.org/October2021/#CollectFields()>
    fn collect_fields(
        &self,
        type_name: &str,
        selections: &[&'a Selection],
    ) -> IndexMap<Name, Vec<&'a Field>> {
        let mut collected = IndexMap::new();
        let mut visited_fragments = IndexSet::new();
        self.collect_fields_into(
            type_name,
            selections,
            &mut collected,
            &mut visited_fragments,
        );
        collected
    }

    fn collect_fields_into(
        &self,
        type_name: &str,
        selections: &[&'a Selection],
        collected: &mut IndexMap<Name, Vec<&'a Field>>,
        visited_fragments: &mut IndexSet<Name>,
    ) {
        for &selection in selections {
            match selection {
                Selection::Field(field) => {
                    if !is_skipped(&field.directives, self.variables) {
                        collected
                            .entry(field.response_key().clone())
                            .or_default()
                            .push(&**field);
                    }
                }
                Selection::FragmentSpread(spread) => {
                    if is_skipped(&spread.directives, self.variables)
                        || !visited_fragments.insert(spread.fragment_name.clone())
                    {
                        continue;
                    }
                    let Some(fragment) = self.document.fragments.get(&spread.fragment_name)
                    else {
                        continue;
                    };
                    if self.applies(fragment.type_condition(), type_name) {
                        let selections: Vec<_> =
                            fragment.selection_set.selections.iter().collect();
                        self.collect_fields_into(
                            type_name,
                            &selections,
                            collected,
                            visited_fragments,
                        );
                    }
                }
                Selection::InlineFragment(inline) => {
                    if is_skipped(&inline.directives, self.variables) {
                        continue;
                    }
                    let applies = inline
                        .type_condition
                        .as_ref()
                        .is_none_or(|condition| self.applies(condition, type_name));
                    if applies {
                        let selections: Vec<_> = inline.selection_set.selections.iter().collect();
                        self.collect_fields_into(
                            type_name,
                            &selections,
                            collected,
                            visited_fragments,
                        );
                    }
                }
            }
        }
    }

    fn applies(&self, condition: &str, type_name: &str) -> bool {
        condition == type_name || self.schema.schema.is_subtype(condition, type_name)
    }

    /// <https://spec.graphql.org/October2021/#CompleteValue()>
    ///
    /// Objects complete to an empty placeholder and are queued in `next`; their fields are
    /// resolved by the following pass.
    #[allow(clippy::too_many_arguments)]
    fn complete_value(
        &self,
        output: &mut Output,
        path: &Path,
        nullable: &Path,
        ty: &'a Type,
        value: Value,
        fields: &[&'a Field],
        next: &mut Vec<ObjectTask<'a>>,
    ) -> Result<Value, PropagateNull> {
        macro_rules! field_error {
            ($($arg: tt)+) => {{
                output.errors.push(
                    FieldError::Execution(format!($($arg)+)).to_graphql_error(path.clone()),
                );
                return Err(PropagateNull);
            }};
        }
        if value.is_null() {
            if ty.is_non_null() {
                field_error!("Non-null type {ty} resolved to null")
            }
            return Ok(Value::Null);
        }
        let ty_name = match ty {
            Type::List(inner) | Type::NonNullList(inner) => {
                let Value::Array(items) = value else {
                    field_error!("List type {ty} resolved to a non-list value")
                };
                let item_nullable = if ty.is_non_null() { nullable } else { path };
                let mut completed = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    let item_path = path.index(index);
                    let result = self.complete_value(
                        output,
                        &item_path,
                        item_nullable,
                        inner,
                        item,
                        fields,
                        next,
                    );
                    completed.push(try_nullify(inner, result)?);
                }
                return Ok(Value::Array(completed));
            }
            Type::Named(name) | Type::NonNullNamed(name) => name,
        };
        let Some(ty_def) = self.schema.schema.types.get(ty_name) else {
            field_error!("Undefined type {ty_name}")
        };
        let object_type = match ty_def {
            ExtendedType::Scalar(_) => {
                match coerce_scalar(ty_name, value) {
                    Ok(value) => return Ok(value),
                    Err(message) => field_error!("{message}"),
                }
            }
            ExtendedType::Enum(enum_def) => {
                if value
                    .as_str()
                    .is_some_and(|value| enum_def.values.contains_key(value))
                {
                    return Ok(value);
                }
                field_error!("Resolver returned {value}, expected enum {ty_name}")
            }
            ExtendedType::InputObject(_) => {
                field_error!("Field with input object type {ty_name}")
            }
            ExtendedType::Object(_) if value.is_object() => ty_name.to_string(),
            ExtendedType::Interface(_) | ExtendedType::Union(_) if value.is_object() => {
                let object_type_name = value
                    .get(TYPENAME)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if self.schema.schema.get_object(&object_type_name).is_none()
                    || !self.schema.schema.is_subtype(ty_name, &object_type_name)
                {
                    field_error!(
                        "Resolver returned an object of type '{object_type_name}', \
                         expected a member of {ty_name}"
                    )
                }
                object_type_name
            }
            _ => {
                field_error!("Resolver returned {value} but expected an object for type {ty_name}")
            }
        };
        next.push(ObjectTask {
            path: path.clone(),
            nullable: if ty.is_non_null() {
                nullable.clone()
            } else {
                path.clone()
            },
            type_name: object_type,
            source: value,
            selections: fields
                .iter()
                .flat_map(|field| &field.selection_set.selections)
                .collect(),
        });
        Ok(Value::Object(Map::new()))
    }

    async fn resolve_root(
        &self,
        resolver: &'a Resolver,
        arguments: Map<String, Value>,
        path: Path,
    ) -> Resolved {
        let filter = arguments.get("filter").filter(|value| !value.is_null());
        let sort = arguments.get("sort").filter(|value| !value.is_null());
        let int = |name: &str| arguments.get(name).and_then(Value::as_i64);
        match resolver {
            Resolver::Search(resolvers) => {
                let items = resolvers.search(filter, sort, int("limit")).await?;
                Ok((Value::Array(items), Vec::new()))
            }
            Resolver::Paginate(resolvers) => {
                let page = resolvers
                    .paginate(filter, sort, int("offset"), int("limit"))
                    .await?;
                Ok((to_value(&page)?, Vec::new()))
            }
            Resolver::Connect(resolvers) => {
                let after = arguments.get("after").and_then(Value::as_str);
                let connection = resolvers.connect(filter, sort, int("first"), after).await?;
                Ok((to_value(&connection)?, Vec::new()))
            }
            Resolver::Entities => Ok(self
                .resolve_entities(arguments.get("representations"), &path)
                .await),
            Resolver::Service => Ok((json!({ "sdl": self.schema.sdl() }), Vec::new())),
            Resolver::Reference { .. } | Resolver::Relation(_) => Err(FieldError::Execution(
                "resolver cannot be bound to a root field".into(),
            )),
        }
    }

    /// Resolves `_entities`: one store read per local entity type, representations of
    /// extended types are returned as they are so that their added fields can resolve.
    async fn resolve_entities(
        &self,
        representations: Option<&Value>,
        path: &Path,
    ) -> (Value, Vec<graphql::Error>) {
        let representations: &[Value] = representations
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let mut entities = vec![Value::Null; representations.len()];
        let mut errors = Vec::new();
        let mut by_type: IndexMap<&str, Vec<usize>> = IndexMap::new();
        for (index, representation) in representations.iter().enumerate() {
            match representation.get(TYPENAME).and_then(Value::as_str) {
                Some(type_name) => by_type.entry(type_name).or_default().push(index),
                None => errors.push(
                    FieldError::Execution("representation has no __typename".into())
                        .to_graphql_error(path.index(index)),
                ),
            }
        }

        let mut lookups = Vec::new();
        for (type_name, indices) in by_type {
            match self.schema.resolver(type_name, RESOLVE_REFERENCE) {
                Some(Resolver::Reference { resolvers, key }) => {
                    let keys: IndexSet<String> = indices
                        .iter()
                        .filter_map(|index| {
                            representations[*index].get(key).and_then(key_string)
                        })
                        .collect();
                    lookups.push(async move {
                        let found = resolvers.find_by_keys(key, &keys).await;
                        (type_name, key, indices, found)
                    });
                }
                _ if self.schema.entity_types.contains(type_name) => {
                    for index in indices {
                        entities[index] = representations[index].clone();
                    }
                }
                _ => {
                    for index in indices {
                        errors.push(
                            FieldError::Execution(format!(
                                "type '{type_name}' is not an entity of this subgraph"
                            ))
                            .to_graphql_error(path.index(index)),
                        );
                    }
                }
            }
        }

        for (type_name, key, indices, found) in join_all(lookups).await {
            match found {
                Ok(found) => {
                    for index in indices {
                        let entity = representations[index]
                            .get(key)
                            .and_then(key_string)
                            .and_then(|key| found.get(&key));
                        if let Some(Value::Object(entity)) = entity {
                            let mut entity = entity.clone();
                            entity.insert(
                                TYPENAME.to_string(),
                                Value::String(type_name.to_string()),
                            );
                            entities[index] = Value::Object(entity);
                        }
                    }
                }
                Err(error) => {
                    for index in indices {
                        errors.push(error.to_graphql_error(path.index(index)));
                    }
                }
            }
        }
        (Value::Array(entities), errors)
    }

    fn relation_value(&self, binding: &RelationBinding, parent_id: Option<String>) -> Resolved {
        let (Some(batcher), Some(parent_id)) = (&self.batcher, parent_id) else {
            return Ok((Value::Null, Vec::new()));
        };
        let related = match batcher.get(&binding.relation, &parent_id) {
            Some(result) => result?,
            None => None,
        };
        let value = match related {
            Some(documents) if binding.list => Value::Array(documents),
            Some(documents) => documents.into_iter().next().unwrap_or_default(),
            None => Value::Null,
        };
        Ok((value, Vec::new()))
    }
}

fn to_value(value: &impl Serialize) -> Result<Value, FieldError> {
    serde_json::to_value(value).map_err(|e| FieldError::Execution(e.to_string()))
}

/// On field error, try to nullify the position of type `ty`.
fn try_nullify(ty: &Type, result: Result<Value, PropagateNull>) -> Result<Value, PropagateNull> {
    match result {
        Ok(value) => Ok(value),
        Err(PropagateNull) if !ty.is_non_null() => Ok(Value::Null),
        Err(PropagateNull) => Err(PropagateNull),
    }
}

/// <https://spec.graphql.org/October2021/#sec-Scalars.Result-Coercion-and-Serialization>
fn coerce_scalar(ty_name: &str, value: Value) -> Result<Value, String> {
    let valid = match ty_name {
        "Int" => value
            .as_i64()
            .is_some_and(|int| i32::try_from(int).is_ok()),
        "Float" => value.is_number(),
        "String" => value.is_string(),
        "Boolean" => value.is_boolean(),
        "ID" => value.is_string() || value.is_i64(),
        // custom scalars accept any JSON value
        _ => true,
    };
    if valid {
        Ok(value)
    } else {
        Err(format!("Resolver returned {value}, expected {ty_name}"))
    }
}
