//! Compiles filter arguments into store query clauses.
//!
//! A filter is an object keyed by field name. Leaf entries hold an operator object
//! (`{ "gte": 10, "lt": 20 }`) or a bare value, shorthand for `eq` (`match` on text
//! fields). Object entries hold the filter of the nested object; below an object mapped as
//! `nested` they are wrapped in a `nested` query on its path. The root filter also
//! accepts the `AND`, `OR` and `NOT` combinators, each taking a list of root filters.

use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use crate::error::QueryError;
use crate::mapping::ScalarType;
use crate::mapping::TypedField;
use crate::store::ID_FIELD;

const AND: &str = "AND";
const OR: &str = "OR";
const NOT: &str = "NOT";

/// Operators accepted on each scalar type.
pub(crate) fn operators(scalar: ScalarType) -> &'static [&'static str] {
    match scalar {
        ScalarType::Text => &["match", "exists"],
        ScalarType::Keyword => &["eq", "in", "exists"],
        ScalarType::Int | ScalarType::Float => &["eq", "in", "gt", "gte", "lt", "lte", "exists"],
        ScalarType::Date => &["eq", "gt", "gte", "lt", "lte", "exists"],
        ScalarType::Boolean => &["eq", "exists"],
        ScalarType::GeoPoint => &["within", "exists"],
    }
}

/// Builds the query clause selecting the documents matching `filter`.
pub(crate) fn compile_filter(
    filter: Option<&Value>,
    root: &TypedField,
) -> Result<Value, QueryError> {
    let clauses = match filter {
        None | Some(Value::Null) => Vec::new(),
        Some(filter) => object_clauses(filter, root, true)?,
    };
    Ok(conjunction(clauses))
}

fn conjunction(clauses: Vec<Value>) -> Value {
    if clauses.is_empty() {
        json!({ "match_all": {} })
    } else {
        json!({ "bool": { "filter": clauses } })
    }
}

fn invalid(argument: &str, reason: impl Into<String>) -> QueryError {
    QueryError::InvalidArgument {
        argument: argument.to_string(),
        reason: reason.into(),
    }
}

fn object_clauses(
    filter: &Value,
    node: &TypedField,
    is_root: bool,
) -> Result<Vec<Value>, QueryError> {
    let entries = filter
        .as_object()
        .ok_or_else(|| invalid("filter", format!("expected an object, found {filter}")))?;
    let mut clauses = Vec::new();
    for (key, value) in entries {
        if value.is_null() {
            continue;
        }
        match key.as_str() {
            AND | OR | NOT if is_root => {
                let operands = combinator_operands(key, value, node)?;
                match key.as_str() {
                    AND => clauses.extend(operands),
                    OR => clauses.push(json!({
                        "bool": { "should": operands, "minimum_should_match": 1 }
                    })),
                    _ => clauses.push(json!({ "bool": { "must_not": operands } })),
                }
            }
            ID_FIELD if is_root => {
                clauses.extend(leaf_clauses(ID_FIELD, ID_FIELD, ScalarType::Keyword, value)?);
            }
            _ => {
                let field = node.child(key).ok_or_else(|| QueryError::UnknownField {
                    field: key.clone(),
                    context: "filter",
                })?;
                match field.scalar_type() {
                    Some(scalar) => {
                        clauses.extend(leaf_clauses(&field.path, &field.name, scalar, value)?)
                    }
                    None => {
                        let inner = object_clauses(value, field, false)?;
                        if field.nested && !inner.is_empty() {
                            // all predicates must hold within one element
                            clauses.push(json!({
                                "nested": { "path": field.path, "query": conjunction(inner) }
                            }));
                        } else {
                            clauses.extend(inner);
                        }
                    }
                }
            }
        }
    }
    Ok(clauses)
}

/// Each operand of a combinator compiles to one conjunction.
fn combinator_operands(
    combinator: &str,
    value: &Value,
    root: &TypedField,
) -> Result<Vec<Value>, QueryError> {
    let operands = match value {
        Value::Array(operands) => operands.iter().collect(),
        operand @ Value::Object(_) => vec![operand],
        other => return Err(invalid(combinator, format!("expected a list of filters, found {other}"))),
    };
    operands
        .into_iter()
        .map(|operand| object_clauses(operand, root, true).map(conjunction))
        .collect()
}

fn leaf_clauses(
    path: &str,
    name: &str,
    scalar: ScalarType,
    value: &Value,
) -> Result<Vec<Value>, QueryError> {
    let shorthand;
    let operators_used = match value {
        Value::Object(operators) => operators,
        bare => {
            let operator = if scalar == ScalarType::Text { "match" } else { "eq" };
            shorthand = Map::from_iter([(operator.to_string(), bare.clone())]);
            &shorthand
        }
    };
    let allowed = operators(scalar);
    let mut clauses = Vec::with_capacity(operators_used.len());
    for (operator, operand) in operators_used {
        if operand.is_null() {
            continue;
        }
        if !allowed.contains(&operator.as_str()) {
            return Err(QueryError::UnsupportedOperator {
                field: name.to_string(),
                operator: operator.clone(),
                kind: scalar.label(),
            });
        }
        let clause = match operator.as_str() {
            "eq" => json!({ "term": { (path): operand } }),
            "in" => {
                if !operand.is_array() {
                    return Err(invalid(name, "`in` expects a list"));
                }
                json!({ "terms": { (path): operand } })
            }
            "gt" | "gte" | "lt" | "lte" => {
                json!({ "range": { (path): { (operator.as_str()): operand } } })
            }
            "match" => json!({ "match": { (path): { "query": operand } } }),
            "exists" => match operand {
                Value::Bool(true) => json!({ "exists": { "field": path } }),
                Value::Bool(false) => {
                    json!({ "bool": { "must_not": [{ "exists": { "field": path } }] } })
                }
                other => return Err(invalid(name, format!("`exists` expects a boolean, found {other}"))),
            },
            _ => within_clause(path, name, operand)?,
        };
        clauses.push(clause);
    }
    Ok(clauses)
}

fn within_clause(path: &str, name: &str, operand: &Value) -> Result<Value, QueryError> {
    let number = |key: &str| {
        operand
            .get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| invalid(name, format!("`within` requires a numeric `{key}`")))
    };
    let (lat, lon, distance_km) = (number("lat")?, number("lon")?, number("distanceKm")?);
    if distance_km < 0.0 {
        return Err(invalid(name, "`distanceKm` must not be negative"));
    }
    Ok(json!({
        "geo_distance": {
            "distance": format!("{distance_km}km"),
            (path): { "lat": lat, "lon": lon }
        }
    }))
}
