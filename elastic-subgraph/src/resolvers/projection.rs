//! Shapes store hits into values of the generated entity types.
//!
//! Only fields of the typed tree are kept, so store bookkeeping (`_index`, `_score`, ...)
//! never reaches a response. Scalars are coerced to their GraphQL type, geo points are
//! normalised to `{ lat, lon }` and list-ness follows the typed tree.

use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use crate::mapping::GraphType;
use crate::mapping::ScalarType;
use crate::mapping::TypedField;
use crate::store::ID_FIELD;
use crate::store::SearchHit;
use crate::store::parse_geo_point;

/// The entity value of a hit: `_id` followed by the fields of `entity`.
pub(crate) fn project_hit(hit: &SearchHit, entity: &TypedField) -> Value {
    let mut object = Map::new();
    object.insert(ID_FIELD.to_string(), Value::String(hit.id.clone()));
    project_fields(&hit.source, entity, &mut object);
    Value::Object(object)
}

fn project_fields(source: &Map<String, Value>, node: &TypedField, into: &mut Map<String, Value>) {
    for child in node.children() {
        let raw = source.get(child.source_key());
        into.insert(child.name.clone(), project_value(raw, child));
        if let Some(variant) = &child.filter_variant {
            // the exact-match twin indexes the same source value
            into.insert(variant.name.clone(), project_value(raw, variant));
        }
    }
}

/// 2^63: floats in `[-I64_BOUND, I64_BOUND)` convert to `i64` exactly.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

fn project_value(raw: Option<&Value>, field: &TypedField) -> Value {
    match raw {
        None | Some(Value::Null) => Value::Null,
        // one point in `[lon, lat]` form, not two values
        Some(pair @ Value::Array(items)) if is_geo_pair(field, items) => {
            let point = project_single(pair, field);
            if field.is_list {
                Value::Array(vec![point])
            } else {
                point
            }
        }
        Some(Value::Array(items)) if field.is_list => Value::Array(
            items
                .iter()
                .map(|item| project_single(item, field))
                .collect(),
        ),
        Some(Value::Array(items)) => items
            .iter()
            .find(|item| !item.is_null())
            .map(|item| project_single(item, field))
            .unwrap_or(Value::Null),
        Some(single) if field.is_list => Value::Array(vec![project_single(single, field)]),
        Some(single) => project_single(single, field),
    }
}

fn is_geo_pair(field: &TypedField, items: &[Value]) -> bool {
    field.scalar_type() == Some(ScalarType::GeoPoint)
        && items.len() == 2
        && items.iter().all(Value::is_number)
}

fn project_single(value: &Value, field: &TypedField) -> Value {
    match &field.graph_type {
        GraphType::Object(_) => match value {
            Value::Object(source) => {
                let mut object = Map::new();
                project_fields(source, field, &mut object);
                Value::Object(object)
            }
            _ => Value::Null,
        },
        GraphType::Scalar(scalar) => coerce_scalar(value, *scalar),
    }
}

fn coerce_scalar(value: &Value, scalar: ScalarType) -> Value {
    match scalar {
        ScalarType::Text | ScalarType::Keyword | ScalarType::Date => match value {
            Value::String(_) => value.clone(),
            Value::Number(_) | Value::Bool(_) => Value::String(value.to_string()),
            _ => Value::Null,
        },
        ScalarType::Int => match value {
            Value::Number(number) => number
                .as_i64()
                .or_else(|| {
                    number
                        .as_f64()
                        .filter(|f| f.fract() == 0.0 && (-I64_BOUND..I64_BOUND).contains(f))
                        .map(|f| f as i64)
                })
                .map_or(Value::Null, Value::from),
            Value::String(text) => text.trim().parse::<i64>().map_or(Value::Null, Value::from),
            _ => Value::Null,
        },
        ScalarType::Float => match value {
            Value::Number(number) => number.as_f64().map_or(Value::Null, Value::from),
            Value::String(text) => text.trim().parse::<f64>().map_or(Value::Null, Value::from),
            _ => Value::Null,
        },
        ScalarType::Boolean => match value {
            Value::Bool(_) => value.clone(),
            Value::String(text) => text.parse::<bool>().map_or(Value::Null, Value::from),
            _ => Value::Null,
        },
        ScalarType::GeoPoint => parse_geo_point(value)
            .map_or(Value::Null, |(lat, lon)| json!({ "lat": lat, "lon": lon })),
    }
}
