//! Structured boolean conditions and the underscored-name convention.
//!
//! A method-style name such as `name_and_age_or_email` describes a predicate:
//! field tokens joined by `_and_` / `_or_`. AND binds tighter than OR, so the
//! example reads `(name = ? AND age = ?) OR email = ?`.

use crate::compile::BackendKind;
use crate::error::{OrmError, OrmResult};
use crate::value::{Record, Value};
use std::collections::HashMap;
use std::sync::LazyLock;

static CONNECTOR: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"(?i)_(and|or)_").expect("connector pattern is valid"));

/// A boolean condition tree over field equalities.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `field = value`; an array value means "field is one of", null means IS NULL.
    Term { field: String, value: Value },
    /// All children must hold.
    And(Vec<Condition>),
    /// At least one child must hold.
    Or(Vec<Condition>),
}

impl Condition {
    /// Create an equality term.
    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create an AND node.
    pub fn and(children: Vec<Condition>) -> Self {
        Condition::And(children)
    }

    /// Create an OR node.
    pub fn or(children: Vec<Condition>) -> Self {
        Condition::Or(children)
    }

    /// Render as a document-database filter (`$and` / `$or` / `$in`).
    pub fn to_document(&self) -> Value {
        match self {
            Condition::Term { field, value } => {
                let mut filter = Record::new();
                filter.insert(field.clone(), document_match(value));
                Value::Object(filter)
            }
            Condition::And(children) => group_document("$and", children),
            Condition::Or(children) => group_document("$or", children),
        }
    }

    /// Values referenced by the tree, in left-to-right order.
    pub fn values(&self) -> Vec<Value> {
        let mut out = Vec::new();
        self.collect_values(&mut out);
        out
    }

    fn collect_values(&self, out: &mut Vec<Value>) {
        match self {
            Condition::Term { value, .. } => out.push(value.clone()),
            Condition::And(children) | Condition::Or(children) => {
                for child in children {
                    child.collect_values(out);
                }
            }
        }
    }
}

fn group_document(op: &str, children: &[Condition]) -> Value {
    let mut filter = Record::new();
    filter.insert(
        op.to_string(),
        Value::Array(children.iter().map(Condition::to_document).collect()),
    );
    Value::Object(filter)
}

/// Equality match for a document filter: arrays become `$in`.
pub(crate) fn document_match(value: &Value) -> Value {
    match value {
        Value::Array(items) => {
            let mut op = Record::new();
            op.insert("$in".to_string(), Value::Array(items.clone()));
            Value::Object(op)
        }
        other => other.clone(),
    }
}

/// Split an underscored name into field tokens and lowercase connectors.
fn split_underscored(name: &str) -> OrmResult<(Vec<&str>, Vec<String>)> {
    let fields: Vec<&str> = CONNECTOR.split(name).collect();
    if let Some(empty) = fields.iter().position(|f| f.is_empty()) {
        return Err(OrmError::invalid_argument(format!(
            "empty field at position {} in '{}'",
            empty, name
        )));
    }
    let connectors = CONNECTOR
        .find_iter(name)
        .map(|m| m.as_str().to_ascii_lowercase())
        .collect();
    Ok((fields, connectors))
}

fn resolve_field(field: &str, map: Option<&HashMap<String, String>>) -> String {
    map.and_then(|m| m.get(field))
        .cloned()
        .unwrap_or_else(|| field.to_string())
}

/// Build a [`Condition`] from an underscored name and positional values.
///
/// Returns `Ok(None)` for an empty name. Field tokens are renamed through
/// `map` when given, and on document backends the literal field `id` becomes
/// `_id`.
pub fn conditions_from_underscored(
    backend: BackendKind,
    name: &str,
    values: &[Value],
    map: Option<&HashMap<String, String>>,
) -> OrmResult<Option<Condition>> {
    if name.trim().is_empty() {
        return Ok(None);
    }

    let (fields, connectors) = split_underscored(name)?;
    if fields.len() != values.len() {
        return Err(OrmError::CountMismatch {
            fields: fields.len(),
            values: values.len(),
        });
    }

    let terms = fields.iter().zip(values).map(|(field, value)| {
        let mut field = resolve_field(field, map);
        if backend == BackendKind::Document && field == "id" {
            field = "_id".to_string();
        }
        Condition::Term {
            field,
            value: value.clone(),
        }
    });

    let mut groups: Vec<Vec<Condition>> = vec![Vec::new()];
    for (idx, term) in terms.enumerate() {
        if idx > 0 && connectors[idx - 1] == "_or_" {
            groups.push(Vec::new());
        }
        if let Some(group) = groups.last_mut() {
            group.push(term);
        }
    }

    let mut ors: Vec<Condition> = groups
        .into_iter()
        .map(|mut group| {
            if group.len() == 1 {
                group.remove(0)
            } else {
                Condition::And(group)
            }
        })
        .collect();

    Ok(Some(if ors.len() == 1 {
        ors.remove(0)
    } else {
        Condition::Or(ors)
    }))
}

/// Build a flat field → value record from an underscored name.
///
/// Connectors are ignored; a repeated field keeps the last value.
pub fn hash_from_underscored(
    name: &str,
    values: &[Value],
    map: Option<&HashMap<String, String>>,
) -> OrmResult<Record> {
    let (fields, _) = split_underscored(name)?;
    if fields.len() != values.len() {
        return Err(OrmError::CountMismatch {
            fields: fields.len(),
            values: values.len(),
        });
    }
    Ok(fields
        .iter()
        .zip(values)
        .map(|(field, value)| (resolve_field(field, map), value.clone()))
        .collect())
}
