use serde_json::Value;

use crate::error::QueryError;
use crate::mapping::TypedField;
use crate::store::ID_FIELD;
use crate::store::SortClause;
use crate::store::SortOrder;

/// Separator between path segments in sort field enum values (`geoip__city_name`).
pub(crate) const SORT_PATH_SEPARATOR: &str = "__";

/// Builds the store sort from a sort argument, then appends `tie_breaker` unless the sort
/// already orders on it.
///
/// The argument is a list of `{ field, direction }` objects (a single object is accepted
/// as a list of one). `field` is a sort field enum value or a dotted GraphQL field path;
/// `direction` is `ASC` (default) or `DESC`.
pub(crate) fn compile_sort(
    sort: Option<&Value>,
    root: &TypedField,
    tie_breaker: &str,
) -> Result<Vec<SortClause>, QueryError> {
    let entries: Vec<&Value> = match sort {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(entries)) => entries.iter().collect(),
        Some(entry) => vec![entry],
    };
    let mut clauses = Vec::with_capacity(entries.len() + 1);
    for entry in entries {
        let field = entry
            .get("field")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid(format!("expected {{ field, direction }}, found {entry}")))?;
        let order = match entry.get("direction") {
            None | Some(Value::Null) => SortOrder::Asc,
            Some(Value::String(direction)) if direction.eq_ignore_ascii_case("asc") => {
                SortOrder::Asc
            }
            Some(Value::String(direction)) if direction.eq_ignore_ascii_case("desc") => {
                SortOrder::Desc
            }
            Some(other) => return Err(invalid(format!("unknown sort direction {other}"))),
        };
        let (path, nested_path) = sort_path(field, root)?;
        if !clauses.iter().any(|clause: &SortClause| clause.field == path) {
            let clause = SortClause::new(path, order);
            clauses.push(match nested_path {
                Some(nested_path) => clause.with_nested_path(nested_path),
                None => clause,
            });
        }
    }
    if !clauses.iter().any(|clause| clause.field == tie_breaker) {
        clauses.push(SortClause::new(tie_breaker, SortOrder::Asc));
    }
    Ok(clauses)
}

fn invalid(reason: String) -> QueryError {
    QueryError::InvalidArgument {
        argument: "sort".to_string(),
        reason,
    }
}

/// Resolves a sort field name to the store path of a sortable leaf, and the path of the
/// innermost `nested` object above it.
fn sort_path(field: &str, root: &TypedField) -> Result<(String, Option<String>), QueryError> {
    if field == ID_FIELD {
        return Ok((ID_FIELD.to_string(), None));
    }
    let unknown = || QueryError::UnknownField {
        field: field.to_string(),
        context: "sort",
    };
    let mut nested_path = None;
    let target = match root.child(field) {
        Some(direct) => direct,
        None => {
            let separator = if field.contains(SORT_PATH_SEPARATOR) {
                SORT_PATH_SEPARATOR
            } else {
                "."
            };
            let mut node = root;
            for segment in field.split(separator) {
                if node.nested {
                    nested_path = Some(node.path.clone());
                }
                node = node.child(segment).ok_or_else(unknown)?;
            }
            node
        }
    };
    match target.scalar_type() {
        Some(scalar) if scalar.is_sortable() => Ok((target.path.clone(), nested_path)),
        _ => Err(QueryError::UnsortableField {
            field: field.to_string(),
        }),
    }
}

/// Enum values of every sortable field below `root`, with their store paths.
pub(crate) fn sortable_fields(root: &TypedField) -> Vec<(String, String)> {
    let mut found = vec![(ID_FIELD.to_string(), ID_FIELD.to_string())];
    collect_sortable(root, "", &mut found);
    found
}

fn collect_sortable(node: &TypedField, prefix: &str, found: &mut Vec<(String, String)>) {
    for child in node.children() {
        let candidates = std::iter::once(child).chain(child.filter_variant.as_deref());
        for field in candidates {
            let value = if prefix.is_empty() {
                field.name.clone()
            } else {
                format!("{prefix}{SORT_PATH_SEPARATOR}{}", field.name)
            };
            match field.scalar_type() {
                Some(scalar) if scalar.is_sortable() => found.push((value, field.path.clone())),
                Some(_) => {}
                None => collect_sortable(field, &value, found),
            }
        }
    }
}
