use apollo_compiler::Node;
use apollo_compiler::executable::Directive;
use apollo_compiler::executable::DirectiveList;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::Operation;
use apollo_compiler::executable::Value as GraphQLValue;
use serde_json::Map;
use serde_json::Number;
use serde_json::Value;

use crate::error::RequestError;

/// Variable values of `operation`: the request's own, then declared defaults.
///
/// A variable of a non-null type must end up with a non-null value.
pub(crate) fn coerce_variable_values(
    operation: &Operation,
    values: &Map<String, Value>,
) -> Result<Map<String, Value>, RequestError> {
    let empty = Map::new();
    let mut coerced = Map::new();
    for definition in &operation.variables {
        let name = definition.name.as_str();
        let value = match values.get(name) {
            Some(value) => Some(value.clone()),
            None => definition
                .default_value
                .as_ref()
                .map(|default| to_json(default, &empty)),
        };
        match value {
            Some(Value::Null) | None if definition.ty.is_non_null() => {
                return Err(RequestError::MissingVariable(name.to_string()));
            }
            Some(value) => {
                coerced.insert(name.to_string(), value);
            }
            None => {}
        }
    }
    Ok(coerced)
}

/// Argument values of `field`, with defaults from its definition applied.
///
/// Arguments given as an unset variable without a default are left out.
pub(crate) fn coerce_argument_values(
    field: &Field,
    variables: &Map<String, Value>,
) -> Map<String, Value> {
    let mut coerced = Map::new();
    for definition in &field.definition.arguments {
        let name = definition.name.as_str();
        let given = field
            .arguments
            .iter()
            .find(|argument| argument.name == definition.name)
            .map(|argument| &argument.value);
        let value = match given {
            Some(value) => match value.as_ref() {
                GraphQLValue::Variable(variable) if !variables.contains_key(variable.as_str()) => {
                    None
                }
                value => Some(to_json(value, variables)),
            },
            None => None,
        };
        let value = value.or_else(|| {
            definition
                .default_value
                .as_ref()
                .map(|default| to_json(default, variables))
        });
        if let Some(value) = value {
            coerced.insert(name.to_string(), value);
        }
    }
    coerced
}

/// Converts a GraphQL input value into JSON, substituting variables.
pub(crate) fn to_json(value: &GraphQLValue, variables: &Map<String, Value>) -> Value {
    match value {
        GraphQLValue::Null => Value::Null,
        GraphQLValue::Enum(name) => Value::String(name.to_string()),
        GraphQLValue::Variable(name) => variables.get(name.as_str()).cloned().unwrap_or_default(),
        GraphQLValue::String(string) => Value::String(string.clone()),
        GraphQLValue::Boolean(boolean) => Value::Bool(*boolean),
        GraphQLValue::Int(int) => match int.try_to_i32() {
            Ok(int) => Value::from(int),
            Err(_) => float(int.try_to_f64().ok()),
        },
        GraphQLValue::Float(number) => float(number.try_to_f64().ok()),
        GraphQLValue::List(items) => Value::Array(
            items
                .iter()
                .map(|item| to_json(item, variables))
                .collect(),
        ),
        GraphQLValue::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(name, value)| (name.to_string(), to_json(value, variables)))
                .collect(),
        ),
    }
}

fn float(value: Option<f64>) -> Value {
    value
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_default()
}

/// Whether `@skip` or `@include` exclude a selection.
pub(crate) fn is_skipped(directives: &DirectiveList, variables: &Map<String, Value>) -> bool {
    let condition = |directive: Option<&Node<Directive>>| match directive?
        .specified_argument_by_name("if")?
        .as_ref()
    {
        GraphQLValue::Boolean(value) => Some(*value),
        GraphQLValue::Variable(name) => variables.get(name.as_str()).and_then(Value::as_bool),
        _ => None,
    };
    condition(directives.get("skip")).unwrap_or(false)
        || !condition(directives.get("include")).unwrap_or(true)
}
