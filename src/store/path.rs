//! Dotted-path field operations on JSON documents
//!
//! Shared by every backend so that `update`/`upsert` behave identically whether
//! the document lives in memory or in SQLite. Intermediate objects are created
//! on demand, which is what lets `linkClicks.<id>.totalClicks` be incremented
//! for a link that has never been clicked before.

use super::{kind_of, Document, FieldOp};
use crate::error::{StoreError, StoreResult};
use serde_json::{Map, Value};

/// Apply ops in order. On error the document may be partially modified, so
/// callers apply to a copy and only persist on success.
pub fn apply_ops(doc: &mut Document, ops: &[FieldOp]) -> StoreResult<()> {
    for op in ops {
        apply_op(doc, op)?;
    }
    Ok(())
}

fn apply_op(doc: &mut Document, op: &FieldOp) -> StoreResult<()> {
    match op {
        FieldOp::Increment { path, by } => {
            let (parent, field) = parent_mut(doc, path, "increment")?;
            let current = match parent.get(&field) {
                None | Some(Value::Null) => 0,
                Some(Value::Number(n)) => n.as_i64().ok_or_else(|| StoreError::InvalidPath {
                    op: "increment",
                    path: path.clone(),
                    reason: format!("{} is not an integer", n),
                })?,
                Some(other) => {
                    return Err(StoreError::InvalidPath {
                        op: "increment",
                        path: path.clone(),
                        reason: format!("existing value is a {}", kind_of(other)),
                    })
                }
            };
            parent.insert(field, Value::from(current.saturating_add(*by)));
        }
        FieldOp::Set { path, value } => {
            let (parent, field) = parent_mut(doc, path, "set")?;
            parent.insert(field, value.clone());
        }
    }
    Ok(())
}

/// Walk to the object holding the last path segment, creating objects on the way
fn parent_mut<'a>(
    doc: &'a mut Document,
    path: &str,
    op: &'static str,
) -> StoreResult<(&'a mut Document, String)> {
    let invalid = |reason: &str| StoreError::InvalidPath {
        op,
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let mut segments: Vec<&str> = path.split('.').collect();
    let field = match segments.pop() {
        Some(last) if !last.is_empty() => last.to_string(),
        _ => return Err(invalid("empty field name")),
    };

    let mut current = doc;
    for segment in segments {
        if segment.is_empty() {
            return Err(invalid("empty path segment"));
        }
        let next = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if next.is_null() {
            *next = Value::Object(Map::new());
        }
        current = match next {
            Value::Object(map) => map,
            _ => return Err(invalid(&format!("'{}' is not an object", segment))),
        };
    }

    Ok((current, field))
}

/// Read the value at a dotted path, if present
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_increment_creates_missing_fields() {
        let mut d = doc(json!({"totalViews": 4}));
        apply_ops(
            &mut d,
            &[
                FieldOp::increment("totalViews", 1),
                FieldOp::increment("dailyViews.2026-10-17", 1),
                FieldOp::increment("linkClicks.L1.totalClicks", 1),
            ],
        )
        .unwrap();

        assert_eq!(d["totalViews"], json!(5));
        assert_eq!(get_path(&d, "dailyViews.2026-10-17"), Some(&json!(1)));
        assert_eq!(get_path(&d, "linkClicks.L1.totalClicks"), Some(&json!(1)));
    }

    #[test]
    fn test_set_overwrites_leaf_only() {
        let mut d = doc(json!({"linkClicks": {"L1": {"totalClicks": 3, "title": "old"}}}));
        apply_ops(&mut d, &[FieldOp::set("linkClicks.L1.title", "new")]).unwrap();

        assert_eq!(get_path(&d, "linkClicks.L1.title"), Some(&json!("new")));
        assert_eq!(get_path(&d, "linkClicks.L1.totalClicks"), Some(&json!(3)));
    }

    #[test]
    fn test_increment_rejects_non_numbers() {
        let mut d = doc(json!({"totalViews": "many"}));
        let err = apply_ops(&mut d, &[FieldOp::increment("totalViews", 1)]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath { op: "increment", .. }));
    }

    #[test]
    fn test_cannot_descend_through_scalar() {
        let mut d = doc(json!({"dailyViews": 7}));
        let err = apply_ops(&mut d, &[FieldOp::increment("dailyViews.x", 1)]).unwrap_err();
        assert!(err.to_string().contains("'dailyViews' is not an object"));
    }

    #[test]
    fn test_empty_segments_rejected() {
        let mut d = Document::new();
        assert!(apply_ops(&mut d, &[FieldOp::set("a..b", 1)]).is_err());
        assert!(apply_ops(&mut d, &[FieldOp::set("", 1)]).is_err());
    }

    #[test]
    fn test_null_parent_is_replaced() {
        let mut d = doc(json!({"trafficSources": null}));
        apply_ops(&mut d, &[FieldOp::increment("trafficSources.direct.views", 1)]).unwrap();
        assert_eq!(get_path(&d, "trafficSources.direct.views"), Some(&json!(1)));
    }
}
