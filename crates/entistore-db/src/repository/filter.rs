//! Compiles parsed [`Filter`]s into SurrealQL conditions.
//!
//! Field names come from the closed [`EntityField`] set and operands are
//! always bound as parameters, so no caller text reaches the query.

use chrono::{DateTime, Utc};
use entistore_core::filter::{CompareOp, Filter, FilterValue, FilterValues};
use entistore_core::models::entity::EntityField;

/// A bound query parameter value.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Param {
    Text(String),
    Integer(i64),
    Timestamp(DateTime<Utc>),
    Texts(Vec<String>),
    Integers(Vec<i64>),
    Timestamps(Vec<DateTime<Utc>>),
}

/// A `WHERE` clause with its parameters, named `f0`, `f1`, ...
#[derive(Debug)]
pub(crate) struct CompiledFilter {
    pub clause: String,
    pub params: Vec<(String, Param)>,
}

pub(crate) fn compile(filter: &Filter) -> CompiledFilter {
    let mut params = Vec::new();
    let clause = compile_node(filter, &mut params);
    CompiledFilter { clause, params }
}

fn compile_node(filter: &Filter, params: &mut Vec<(String, Param)>) -> String {
    match filter {
        Filter::Compare { field, op, value } => {
            let name = bind(params, scalar(value));
            format!("{} {} ${name}", target(*field), operator(*op))
        }
        Filter::In {
            field,
            values,
            negated,
        } => {
            let name = bind(params, list(values));
            let op = if *negated { "NOT IN" } else { "IN" };
            format!("{} {op} ${name}", target(*field))
        }
        // Every record has an id.
        Filter::Exists {
            field: EntityField::Id,
            exists,
        } => exists.to_string(),
        Filter::Exists { field, exists } => {
            let test = if *exists { "IS NOT NONE" } else { "IS NONE" };
            format!("{} {test}", field.column())
        }
        Filter::And(parts) if parts.is_empty() => "true".to_string(),
        Filter::And(parts) => join(parts, " AND ", params),
        Filter::Or(parts) => join(parts, " OR ", params),
    }
}

fn join(parts: &[Filter], separator: &str, params: &mut Vec<(String, Param)>) -> String {
    let clauses: Vec<String> = parts
        .iter()
        .map(|part| format!("({})", compile_node(part, params)))
        .collect();
    clauses.join(separator)
}

fn bind(params: &mut Vec<(String, Param)>, param: Param) -> String {
    let name = format!("f{}", params.len());
    params.push((name.clone(), param));
    name
}

fn target(field: EntityField) -> &'static str {
    match field {
        EntityField::Id => "meta::id(id)",
        other => other.column(),
    }
}

fn operator(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "=",
        CompareOp::Ne => "!=",
        CompareOp::Gt => ">",
        CompareOp::Gte => ">=",
        CompareOp::Lt => "<",
        CompareOp::Lte => "<=",
    }
}

fn scalar(value: &FilterValue) -> Param {
    match value {
        FilterValue::Id(id) => Param::Text(id.to_string()),
        FilterValue::Integer(n) => Param::Integer(*n),
        FilterValue::Timestamp(ts) => Param::Timestamp(*ts),
        FilterValue::Text(s) => Param::Text(s.clone()),
    }
}

fn list(values: &FilterValues) -> Param {
    match values {
        FilterValues::Ids(ids) => Param::Texts(ids.iter().map(ToString::to_string).collect()),
        FilterValues::Integers(ns) => Param::Integers(ns.clone()),
        FilterValues::Timestamps(ts) => Param::Timestamps(ts.clone()),
        FilterValues::Texts(ss) => Param::Texts(ss.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_str(raw: &str) -> CompiledFilter {
        compile(&Filter::parse(raw).unwrap())
    }

    #[test]
    fn equality_binds_operand() {
        let compiled = compile_str(r#"{"firstName":"Ada"}"#);
        assert_eq!(compiled.clause, "first_name = $f0");
        assert_eq!(
            compiled.params,
            vec![("f0".to_string(), Param::Text("Ada".into()))]
        );
    }

    #[test]
    fn empty_filter_matches_all() {
        assert_eq!(compile_str("{}").clause, "true");
    }

    #[test]
    fn id_targets_record_key() {
        let id = uuid::Uuid::new_v4();
        let compiled = compile_str(&format!(r#"{{"_id":"{id}"}}"#));
        assert_eq!(compiled.clause, "meta::id(id) = $f0");
        assert_eq!(compiled.params[0].1, Param::Text(id.to_string()));
    }

    #[test]
    fn groups_are_parenthesised_and_numbered() {
        let compiled =
            compile_str(r#"{"$or":[{"name":"A"},{"version":{"$gte":2}}],"deletedAt":null}"#);
        assert_eq!(
            compiled.clause,
            "((name = $f0) OR (version >= $f1)) AND (deleted_at IS NONE)"
        );
        assert_eq!(compiled.params.len(), 2);
    }

    #[test]
    fn membership_and_negation() {
        let compiled = compile_str(r#"{"email":{"$nin":["a@x.io","b@x.io"]}}"#);
        assert_eq!(compiled.clause, "email NOT IN $f0");
        assert_eq!(
            compiled.params[0].1,
            Param::Texts(vec!["a@x.io".into(), "b@x.io".into()])
        );
    }
}
