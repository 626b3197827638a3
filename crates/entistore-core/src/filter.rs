//! Raw filter expressions.
//!
//! A [`Filter`] is the power-user escape hatch on the read path: it is
//! evaluated verbatim against the collection and does **not** apply the
//! soft-delete visibility condition. Only trusted callers should be able
//! to reach it.
//!
//! Filters are parsed from a JSON object using a small operator set:
//!
//! ```text
//! {"name": "A"}                                  equality
//! {"version": {"$gte": 2}}                       comparison
//! {"email": {"$in": ["a@x.io", "b@x.io"]}}       membership
//! {"deletedAt": {"$exists": true}}               presence
//! {"$or": [{"name": "A"}, {"name": "B"}]}        disjunction
//! ```
//!
//! Every field name is checked against the entity's known fields and
//! every operand against the field's type, so a parsed filter can be
//! compiled to bound query parameters without interpolation.

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::models::entity::{EntityField, FieldKind};

/// Maximum nesting depth of `$and` / `$or` groups.
pub const MAX_DEPTH: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterParseError {
    #[error("filter is not valid JSON: {0}")]
    Syntax(String),

    #[error("filter must be a JSON object")]
    NotAnObject,

    #[error("unknown filter field: {0}")]
    UnknownField(String),

    #[error("unknown filter operator: {0}")]
    UnknownOperator(String),

    #[error("invalid operand for {field}: {reason}")]
    InvalidOperand { field: String, reason: String },

    #[error("filter nesting exceeds {MAX_DEPTH} levels")]
    TooDeep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    fn from_operator(op: &str) -> Option<Self> {
        match op {
            "$eq" => Some(Self::Eq),
            "$ne" => Some(Self::Ne),
            "$gt" => Some(Self::Gt),
            "$gte" => Some(Self::Gte),
            "$lt" => Some(Self::Lt),
            "$lte" => Some(Self::Lte),
            _ => None,
        }
    }
}

/// A single typed operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Id(Uuid),
    Integer(i64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

/// A homogeneous operand list for `$in` / `$nin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValues {
    Ids(Vec<Uuid>),
    Integers(Vec<i64>),
    Timestamps(Vec<DateTime<Utc>>),
    Texts(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Compare {
        field: EntityField,
        op: CompareOp,
        value: FilterValue,
    },
    In {
        field: EntityField,
        values: FilterValues,
        negated: bool,
    },
    Exists {
        field: EntityField,
        exists: bool,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    /// Parses a filter from its JSON text.
    pub fn parse(raw: &str) -> Result<Self, FilterParseError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| FilterParseError::Syntax(e.to_string()))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, FilterParseError> {
        parse_document(value, 0)
    }

    /// `true` for the empty filter `{}`, which matches every entity.
    pub fn matches_everything(&self) -> bool {
        matches!(self, Self::And(parts) if parts.is_empty())
    }
}

fn parse_document(value: &Value, depth: usize) -> Result<Filter, FilterParseError> {
    if depth > MAX_DEPTH {
        return Err(FilterParseError::TooDeep);
    }
    let object = value.as_object().ok_or(FilterParseError::NotAnObject)?;

    let mut parts = Vec::with_capacity(object.len());
    for (key, operand) in object {
        match key.as_str() {
            "$and" => parts.push(Filter::And(parse_group(key, operand, depth)?)),
            "$or" => parts.push(Filter::Or(parse_group(key, operand, depth)?)),
            op if op.starts_with('$') => {
                return Err(FilterParseError::UnknownOperator(op.to_string()));
            }
            _ => {
                let field = EntityField::from_key(key)
                    .ok_or_else(|| FilterParseError::UnknownField(key.clone()))?;
                parse_condition(field, key, operand, &mut parts)?;
            }
        }
    }

    Ok(match parts.len() {
        1 => parts.remove(0),
        _ => Filter::And(parts),
    })
}

fn parse_group(key: &str, operand: &Value, depth: usize) -> Result<Vec<Filter>, FilterParseError> {
    let items = operand
        .as_array()
        .filter(|items| !items.is_empty())
        .ok_or_else(|| invalid(key, "expected a non-empty array of filters"))?;
    items
        .iter()
        .map(|item| parse_document(item, depth + 1))
        .collect()
}

fn parse_condition(
    field: EntityField,
    key: &str,
    operand: &Value,
    parts: &mut Vec<Filter>,
) -> Result<(), FilterParseError> {
    let operators = match operand {
        Value::Object(map) if map.keys().any(|k| k.starts_with('$')) => map,
        _ => {
            parts.push(compare(field, key, CompareOp::Eq, operand)?);
            return Ok(());
        }
    };

    for (op, value) in operators {
        parts.push(parse_operator(field, key, op, value)?);
    }
    Ok(())
}

fn parse_operator(
    field: EntityField,
    key: &str,
    op: &str,
    value: &Value,
) -> Result<Filter, FilterParseError> {
    if let Some(compare_op) = CompareOp::from_operator(op) {
        return compare(field, key, compare_op, value);
    }
    match op {
        "$in" | "$nin" => Ok(Filter::In {
            field,
            values: parse_values(field, key, value)?,
            negated: op == "$nin",
        }),
        "$exists" => {
            let exists = value
                .as_bool()
                .ok_or_else(|| invalid(key, "$exists expects a boolean"))?;
            Ok(Filter::Exists { field, exists })
        }
        other => Err(FilterParseError::UnknownOperator(other.to_string())),
    }
}

fn compare(
    field: EntityField,
    key: &str,
    op: CompareOp,
    operand: &Value,
) -> Result<Filter, FilterParseError> {
    // `null` follows document-store semantics: equal to null means absent.
    if operand.is_null() {
        return match op {
            CompareOp::Eq => Ok(Filter::Exists {
                field,
                exists: false,
            }),
            CompareOp::Ne => Ok(Filter::Exists {
                field,
                exists: true,
            }),
            _ => Err(invalid(key, "null only supports equality")),
        };
    }
    Ok(Filter::Compare {
        field,
        op,
        value: parse_value(field, key, operand)?,
    })
}

fn parse_value(field: EntityField, key: &str, value: &Value) -> Result<FilterValue, FilterParseError> {
    match field.kind() {
        FieldKind::Id => value
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(FilterValue::Id)
            .ok_or_else(|| invalid(key, "expected a UUID string")),
        FieldKind::Integer => value
            .as_i64()
            .map(FilterValue::Integer)
            .ok_or_else(|| invalid(key, "expected an integer")),
        FieldKind::Timestamp => value
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|ts| FilterValue::Timestamp(ts.with_timezone(&Utc)))
            .ok_or_else(|| invalid(key, "expected an RFC 3339 timestamp")),
        FieldKind::Text => value
            .as_str()
            .map(|s| FilterValue::Text(s.to_string()))
            .ok_or_else(|| invalid(key, "expected a string")),
    }
}

fn parse_values(field: EntityField, key: &str, value: &Value) -> Result<FilterValues, FilterParseError> {
    let items = value
        .as_array()
        .ok_or_else(|| invalid(key, "expected an array"))?;
    let parsed = items
        .iter()
        .map(|item| parse_value(field, key, item))
        .collect::<Result<Vec<_>, _>>()?;

    let values = match field.kind() {
        FieldKind::Id => FilterValues::Ids(
            parsed
                .into_iter()
                .filter_map(|v| match v {
                    FilterValue::Id(id) => Some(id),
                    _ => None,
                })
                .collect(),
        ),
        FieldKind::Integer => FilterValues::Integers(
            parsed
                .into_iter()
                .filter_map(|v| match v {
                    FilterValue::Integer(n) => Some(n),
                    _ => None,
                })
                .collect(),
        ),
        FieldKind::Timestamp => FilterValues::Timestamps(
            parsed
                .into_iter()
                .filter_map(|v| match v {
                    FilterValue::Timestamp(ts) => Some(ts),
                    _ => None,
                })
                .collect(),
        ),
        FieldKind::Text => FilterValues::Texts(
            parsed
                .into_iter()
                .filter_map(|v| match v {
                    FilterValue::Text(s) => Some(s),
                    _ => None,
                })
                .collect(),
        ),
    };
    Ok(values)
}

fn invalid(field: &str, reason: &str) -> FilterParseError {
    FilterParseError::InvalidOperand {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_value_is_equality() {
        let filter = Filter::parse(r#"{"name":"entityName"}"#).unwrap();
        assert_eq!(
            filter,
            Filter::Compare {
                field: EntityField::Name,
                op: CompareOp::Eq,
                value: FilterValue::Text("entityName".into()),
            }
        );
    }

    #[test]
    fn empty_object_matches_everything() {
        assert!(Filter::parse("{}").unwrap().matches_everything());
    }

    #[test]
    fn multiple_keys_are_conjunction() {
        let filter = Filter::parse(r#"{"name":"A","version":{"$gte":1,"$lt":5}}"#).unwrap();
        match filter {
            Filter::And(parts) => assert_eq!(parts.len(), 3),
            other => panic!("expected conjunction, got {other:?}"),
        }
    }

    #[test]
    fn null_equality_means_absent() {
        let filter = Filter::parse(r#"{"deletedAt":null}"#).unwrap();
        assert_eq!(
            filter,
            Filter::Exists {
                field: EntityField::DeletedAt,
                exists: false,
            }
        );
    }

    #[test]
    fn in_list_is_typed() {
        let filter = Filter::parse(r#"{"version":{"$in":[1,2,3]}}"#).unwrap();
        assert_eq!(
            filter,
            Filter::In {
                field: EntityField::Version,
                values: FilterValues::Integers(vec![1, 2, 3]),
                negated: false,
            }
        );
    }

    #[test]
    fn or_group_parses_nested_documents() {
        let filter = Filter::parse(r#"{"$or":[{"name":"A"},{"email":{"$exists":true}}]}"#).unwrap();
        match filter {
            Filter::Or(parts) => assert_eq!(parts.len(), 2),
            other => panic!("expected disjunction, got {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(
            Filter::parse("111111111111111111111111"),
            Err(FilterParseError::NotAnObject)
        ));
        assert!(matches!(
            Filter::parse("{not json"),
            Err(FilterParseError::Syntax(_))
        ));
        assert_eq!(
            Filter::parse(r#"{"password":"x"}"#),
            Err(FilterParseError::UnknownField("password".into()))
        );
        assert_eq!(
            Filter::parse(r#"{"name":{"$regex":"A.*"}}"#),
            Err(FilterParseError::UnknownOperator("$regex".into()))
        );
        assert!(matches!(
            Filter::parse(r#"{"version":"three"}"#),
            Err(FilterParseError::InvalidOperand { .. })
        ));
        assert!(matches!(
            Filter::parse(r#"{"$or":[]}"#),
            Err(FilterParseError::InvalidOperand { .. })
        ));
    }

    #[test]
    fn rejects_excessive_nesting() {
        let mut raw = r#"{"name":"A"}"#.to_string();
        for _ in 0..=MAX_DEPTH {
            raw = format!(r#"{{"$and":[{raw}]}}"#);
        }
        assert_eq!(Filter::parse(&raw), Err(FilterParseError::TooDeep));
    }

    #[test]
    fn timestamps_must_be_rfc3339() {
        assert!(Filter::parse(r#"{"createdAt":{"$gt":"2024-01-01T00:00:00Z"}}"#).is_ok());
        assert!(Filter::parse(r#"{"createdAt":{"$gt":"yesterday"}}"#).is_err());
    }
}
