//! Opaque connection cursors.
//!
//! A cursor is the URL-safe base64 encoding of `{"s": <sort signature>, "v": <sort values>}`:
//! the sort values of a hit, as returned by the store, plus the sort they were taken from.
//! Decoding checks that the cursor was issued for the same sort, so that resuming with
//! `search_after` is always positionally meaningful.

use base64::Engine;
use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;

use crate::error::CursorError;
use crate::store::SortClause;

#[derive(Deserialize)]
struct CursorPayload {
    s: Vec<String>,
    v: Vec<Value>,
}

fn signature(sort: &[SortClause]) -> Vec<String> {
    sort.iter().map(ToString::to_string).collect()
}

pub(crate) fn encode_cursor(sort: &[SortClause], values: &[Value]) -> String {
    let payload = json!({ "s": signature(sort), "v": values });
    BASE64_URL_SAFE_NO_PAD.encode(payload.to_string())
}

/// Returns the sort values to resume after.
pub(crate) fn decode_cursor(cursor: &str, sort: &[SortClause]) -> Result<Vec<Value>, CursorError> {
    let bytes = BASE64_URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| CursorError::Encoding)?;
    let payload: CursorPayload =
        serde_json::from_slice(&bytes).map_err(|e| CursorError::Payload(e.to_string()))?;
    if payload.s != signature(sort) {
        return Err(CursorError::SortMismatch);
    }
    if payload.v.len() != payload.s.len() {
        return Err(CursorError::Payload(format!(
            "expected {} sort values, found {}",
            payload.s.len(),
            payload.v.len()
        )));
    }
    Ok(payload.v)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::store::ID_FIELD;
    use crate::store::SortOrder;

    fn sort() -> Vec<SortClause> {
        vec![
            SortClause::new("price", SortOrder::Desc),
            SortClause::new(ID_FIELD, SortOrder::Asc),
        ]
    }

    #[test]
    fn cursor_decodes_to_issued_position() {
        let values = vec![json!(10.5), json!("doc-3")];
        let cursor = encode_cursor(&sort(), &values);
        assert!(!cursor.contains('='));
        assert_eq!(decode_cursor(&cursor, &sort()).unwrap(), values);
    }

    #[test]
    fn malformed_cursors_are_rejected() {
        assert_eq!(
            decode_cursor("not base64!", &sort()).unwrap_err(),
            CursorError::Encoding
        );
        let garbage = BASE64_URL_SAFE_NO_PAD.encode("{\"s\": 1}");
        assert!(matches!(
            decode_cursor(&garbage, &sort()).unwrap_err(),
            CursorError::Payload(_)
        ));
        let short = BASE64_URL_SAFE_NO_PAD.encode(r#"{"s": ["price:desc", "_id:asc"], "v": [1]}"#);
        assert!(matches!(
            decode_cursor(&short, &sort()).unwrap_err(),
            CursorError::Payload(_)
        ));
    }

    #[test]
    fn cursor_from_another_sort_is_rejected() {
        let cursor = encode_cursor(&sort(), &[json!(1), json!("a")]);
        let other = vec![SortClause::new(ID_FIELD, SortOrder::Asc)];
        assert_eq!(
            decode_cursor(&cursor, &other).unwrap_err(),
            CursorError::SortMismatch
        );
    }
}
