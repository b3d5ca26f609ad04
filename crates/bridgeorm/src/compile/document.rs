//! Document command compilation.

use super::Capabilities;
use crate::builder::{Builder, InsertSequence, Operation, Selection, UpdateSpec, WhereClause};
use crate::condition::document_match;
use crate::error::{OrmError, OrmResult};
use crate::value::{Record, Value, kind_name};
use serde::Serialize;

/// Skip / limit pair. Zero values are never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Slice {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

/// A structured command for a document backend.
///
/// Serializes to `{operation, table, where?, select?, group?, having?,
/// order?, slice?, update?, sequence?}` with absent clauses omitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentCommand {
    pub operation: Operation,
    pub table: String,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select: Option<Selection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub having: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slice: Option<Slice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<InsertSequence>,
}

impl DocumentCommand {
    fn new(operation: Operation, table: &str) -> Self {
        Self {
            operation,
            table: table.to_string(),
            filter: None,
            select: None,
            group: None,
            having: None,
            order: None,
            slice: None,
            update: None,
            sequence: None,
        }
    }

    /// Whether the selection is the `COUNT(*)` aggregate.
    pub fn is_count(&self) -> bool {
        matches!(self.select, Some(Selection::Count))
    }
}

pub(crate) fn compile(builder: &Builder, caps: &Capabilities) -> OrmResult<DocumentCommand> {
    if !builder.joins.is_empty() {
        return Err(OrmError::Unsupported(
            "joins are not supported by document backends".into(),
        ));
    }

    let mut cmd = DocumentCommand::new(builder.operation, &builder.target);
    match builder.operation {
        Operation::Find => {
            cmd.select = builder.selection.clone();
            cmd.filter = filter_document(builder)?;
            cmd.group = builder.group.clone();
            cmd.having = builder.having.clone();
            cmd.order = builder.order.clone();
            cmd.slice = slice(builder.offset, builder.limit);
        }
        // The payload travels separately to the executor.
        Operation::Insert => {
            cmd.sequence = builder.sequence.clone();
        }
        Operation::Update => {
            cmd.update = builder.update.as_ref().map(update_document).transpose()?;
            cmd.filter = filter_document(builder)?;
            if caps.limited_mutation {
                cmd.order = builder.order.clone();
                cmd.slice = slice(None, builder.limit);
            }
        }
        Operation::Delete => {
            cmd.filter = filter_document(builder)?;
            if caps.limited_mutation {
                cmd.order = builder.order.clone();
                cmd.slice = slice(None, builder.limit);
            }
        }
    }
    Ok(cmd)
}

fn slice(offset: Option<u64>, limit: Option<u64>) -> Option<Slice> {
    let skip = offset.filter(|n| *n > 0);
    let limit = limit.filter(|n| *n > 0);
    (skip.is_some() || limit.is_some()).then_some(Slice { skip, limit })
}

fn filter_document(builder: &Builder) -> OrmResult<Option<Value>> {
    let Some(clause) = &builder.filter else {
        return Ok(None);
    };
    let filter = match clause {
        WhereClause::Hash(hash) => Value::Object(
            hash.iter()
                .map(|(field, value)| (field.clone(), document_match(value)))
                .collect::<Record>(),
        ),
        WhereClause::Tree(cond) => cond.to_document(),
        WhereClause::Raw { sql, values } => raw_filter(sql, values)?,
    };
    Ok(Some(filter))
}

/// A raw document filter is JSON text with `?` markers outside string literals.
fn raw_filter(text: &str, values: &[Value]) -> OrmResult<Value> {
    let mut out = String::with_capacity(text.len());
    let mut values_iter = values.iter();
    let mut markers = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for ch in text.chars() {
        if in_string {
            out.push(ch);
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            '?' => {
                markers += 1;
                if let Some(value) = values_iter.next() {
                    out.push_str(&value.to_string());
                }
            }
            _ => out.push(ch),
        }
    }

    if markers != values.len() {
        return Err(OrmError::invalid_argument(format!(
            "where: {} marker(s) but {} value(s)",
            markers,
            values.len()
        )));
    }

    match serde_json::from_str::<Value>(&out) {
        Ok(filter @ Value::Object(_)) => Ok(filter),
        Ok(other) => Err(OrmError::invalid_argument(format!(
            "where: document filter must be an object, got {}",
            kind_name(&other)
        ))),
        Err(e) => Err(OrmError::invalid_argument(format!(
            "where: invalid document filter: {e}"
        ))),
    }
}

fn update_document(spec: &UpdateSpec) -> OrmResult<Value> {
    match spec {
        UpdateSpec::Fields(fields) => Ok(Value::Object(fields.clone())),
        UpdateSpec::Raw(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(update @ Value::Object(_)) => Ok(update),
            Ok(other) => Err(OrmError::invalid_argument(format!(
                "update: document update must be an object, got {}",
                kind_name(&other)
            ))),
            Err(e) => Err(OrmError::invalid_argument(format!(
                "update: invalid document update: {e}"
            ))),
        },
    }
}
