//! Clause accumulator: one builder per logical operation.
//!
//! A [`Builder`] collects clauses through consuming setters and is then either
//! compiled into a backend command ([`Builder::compile`]) or executed directly
//! against an executor ([`Builder::execute`]).
//!
//! ```ignore
//! use bridgeorm::{Builder, record};
//!
//! let rows = Builder::new("users")
//!     .filter(record! { "status" => "active" })
//!     .order("created_at DESC")
//!     .limit(10)
//!     .execute(&conn)
//!     .await?;
//! ```
//!
//! Setters never fail on the spot. The first bad argument is remembered and
//! surfaces as [`OrmError::InvalidArgument`] from `compile` / `execute`.

use crate::compile::{Capabilities, CompiledCommand};
use crate::condition::Condition;
use crate::error::{OrmError, OrmResult};
use crate::executor::{CommandExecutor, Outcome};
use crate::value::{Record, Value};
use serde::{Serialize, Serializer};
use std::fmt;


/// The active operation of a builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Find,
    Insert,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Operation::Find => "FIND",
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        };
        f.write_str(tag)
    }
}

/// What a FIND returns.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Every field (`*`).
    All,
    /// A raw select list, passed through untouched.
    Raw(String),
    /// An explicit list of field names.
    Fields(Vec<String>),
    /// The `COUNT(*)` aggregate.
    Count,
}

impl Selection {
    /// Field names a document projection should keep, if any.
    pub fn projected_fields(&self) -> Option<Vec<String>> {
        match self {
            Selection::All | Selection::Count => None,
            Selection::Fields(fields) => Some(fields.clone()),
            Selection::Raw(raw) => Some(
                raw.split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
        }
    }
}

impl Serialize for Selection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Selection::All => serializer.serialize_str("*"),
            Selection::Raw(raw) => serializer.serialize_str(raw),
            Selection::Fields(fields) => fields.serialize(serializer),
            Selection::Count => serializer.serialize_str("COUNT(*)"),
        }
    }
}

/// A WHERE clause in one of its three accepted forms.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereClause {
    /// AND-equality over every field of the mapping.
    Hash(Record),
    /// Raw expression with `?` markers and positional values.
    Raw { sql: String, values: Vec<Value> },
    /// A structured condition tree.
    Tree(Condition),
}

impl WhereClause {
    /// Bind values of the clause, in placeholder order.
    ///
    /// Arrays contribute one value per element. Null field terms compile to
    /// `IS NULL` and contribute nothing; a null raw value is still bound.
    pub fn values(&self) -> Vec<Value> {
        let mut out = Vec::new();
        match self {
            WhereClause::Hash(hash) => hash.values().for_each(|v| push_term_value(&mut out, v)),
            WhereClause::Raw { values, .. } => {
                for value in values {
                    match value {
                        Value::Array(items) => out.extend(items.iter().cloned()),
                        other => out.push(other.clone()),
                    }
                }
            }
            WhereClause::Tree(cond) => cond
                .values()
                .iter()
                .for_each(|v| push_term_value(&mut out, v)),
        }
        out
    }
}

fn push_term_value(out: &mut Vec<Value>, value: &Value) {
    match value {
        Value::Null => {}
        Value::Array(items) => out.extend(items.iter().cloned()),
        other => out.push(other.clone()),
    }
}

impl From<Record> for WhereClause {
    fn from(hash: Record) -> Self {
        WhereClause::Hash(hash)
    }
}

impl From<Condition> for WhereClause {
    fn from(cond: Condition) -> Self {
        WhereClause::Tree(cond)
    }
}

impl<S: Into<String>> From<(S, Vec<Value>)> for WhereClause {
    fn from((sql, values): (S, Vec<Value>)) -> Self {
        WhereClause::Raw {
            sql: sql.into(),
            values,
        }
    }
}

/// UPDATE payload: a field mapping or a raw fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateSpec {
    Fields(Record),
    Raw(String),
}

impl UpdateSpec {
    fn is_empty(&self) -> bool {
        match self {
            UpdateSpec::Fields(fields) => fields.is_empty(),
            UpdateSpec::Raw(raw) => raw.trim().is_empty(),
        }
    }
}

impl From<Record> for UpdateSpec {
    fn from(fields: Record) -> Self {
        UpdateSpec::Fields(fields)
    }
}

impl From<&str> for UpdateSpec {
    fn from(raw: &str) -> Self {
        UpdateSpec::Raw(raw.to_string())
    }
}

impl From<String> for UpdateSpec {
    fn from(raw: String) -> Self {
        UpdateSpec::Raw(raw)
    }
}

/// Primary key filled from a named sequence on INSERT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InsertSequence {
    pub primary_key: String,
    pub name: String,
}

/// Accumulated clauses for a single find / insert / update / delete.
#[derive(Debug, Clone)]
pub struct Builder {
    pub(crate) target: String,
    pub(crate) operation: Operation,
    pub(crate) selection: Option<Selection>,
    pub(crate) joins: Vec<String>,
    pub(crate) filter: Option<WhereClause>,
    pub(crate) order: Option<String>,
    pub(crate) group: Option<String>,
    pub(crate) having: Option<String>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) payload: Option<Record>,
    pub(crate) update: Option<UpdateSpec>,
    pub(crate) sequence: Option<InsertSequence>,
    build_error: Option<String>,
}

impl Builder {
    /// Create a FIND builder over a table or collection.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            operation: Operation::Find,
            selection: None,
            joins: Vec::new(),
            filter: None,
            order: None,
            group: None,
            having: None,
            limit: None,
            offset: None,
            payload: None,
            update: None,
            sequence: None,
            build_error: None,
        }
    }

    fn fail(&mut self, message: impl Into<String>) {
        if self.build_error.is_none() {
            self.build_error = Some(message.into());
        }
    }

    // ==================== SELECT ====================

    /// Set a raw select list. `*` selects everything and `COUNT(*)` counts.
    pub fn select(mut self, columns: &str) -> Self {
        let columns = columns.trim();
        if columns.is_empty() {
            self.fail("select: empty column list");
            return self;
        }
        self.selection = Some(if columns == "*" {
            Selection::All
        } else if columns.eq_ignore_ascii_case("COUNT(*)") {
            Selection::Count
        } else {
            Selection::Raw(columns.to_string())
        });
        self
    }

    /// Select an explicit list of fields.
    pub fn select_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        if fields.is_empty() || fields.iter().any(|f| f.trim().is_empty()) {
            self.fail("select_fields: field names must be non-empty");
            return self;
        }
        self.selection = Some(Selection::Fields(fields));
        self
    }

    /// Return the number of matching rows instead of the rows.
    pub fn count(mut self) -> Self {
        self.selection = Some(Selection::Count);
        self
    }

    // ==================== WHERE ====================

    /// Replace the WHERE clause.
    ///
    /// An empty mapping means "no predicate".
    pub fn filter(mut self, clause: impl Into<WhereClause>) -> Self {
        match clause.into() {
            WhereClause::Hash(hash) if hash.is_empty() => self.filter = None,
            WhereClause::Raw { sql, .. } if sql.trim().is_empty() => {
                self.fail("where: empty raw expression");
            }
            clause => self.filter = Some(clause),
        }
        self
    }

    /// Raw WHERE expression with `?` markers.
    pub fn where_raw(self, sql: &str, values: Vec<Value>) -> Self {
        self.filter((sql, values))
    }

    /// Add `field = value` to the WHERE clause.
    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.filter = match self.filter.take() {
            None => {
                let mut hash = Record::new();
                hash.insert(field.to_string(), value);
                Some(WhereClause::Hash(hash))
            }
            Some(WhereClause::Hash(mut hash)) => {
                hash.insert(field.to_string(), value);
                Some(WhereClause::Hash(hash))
            }
            Some(WhereClause::Tree(tree)) => Some(WhereClause::Tree(Condition::And(vec![
                tree,
                Condition::term(field, value),
            ]))),
            Some(raw @ WhereClause::Raw { .. }) => {
                self.fail("eq: cannot extend a raw where expression");
                Some(raw)
            }
        };
        self
    }

    // ==================== ORDER / GROUP / PAGINATION ====================

    /// Set the ORDER BY clause (raw, e.g. `"name ASC, id DESC"`).
    pub fn order(mut self, order: &str) -> Self {
        self.order = non_blank(order);
        self
    }

    /// Set the GROUP BY clause.
    pub fn group(mut self, group: &str) -> Self {
        self.group = non_blank(group);
        self
    }

    /// Set the HAVING clause.
    pub fn having(mut self, having: &str) -> Self {
        self.having = non_blank(having);
        self
    }

    /// Set LIMIT. Negative values are rejected; `0` means unlimited.
    pub fn limit(mut self, n: i64) -> Self {
        match u64::try_from(n) {
            Ok(n) => self.limit = Some(n),
            Err(_) => self.fail(format!("limit must be non-negative, got {n}")),
        }
        self
    }

    /// Set OFFSET. Negative values are rejected.
    pub fn offset(mut self, n: i64) -> Self {
        match u64::try_from(n) {
            Ok(n) => self.offset = Some(n),
            Err(_) => self.fail(format!("offset must be non-negative, got {n}")),
        }
        self
    }

    /// Add a raw JOIN clause (e.g. `"JOIN posts ON posts.user_id = users.id"`).
    pub fn joins(mut self, join: &str) -> Self {
        match non_blank(join) {
            Some(join) => self.joins.push(join),
            None => self.fail("joins: empty join clause"),
        }
        self
    }

    // ==================== Operations ====================

    /// Switch to INSERT with the given payload.
    pub fn insert(mut self, values: Record) -> Self {
        if values.is_empty() {
            self.fail("insert: payload must be a non-empty mapping");
        }
        self.operation = Operation::Insert;
        self.payload = Some(values);
        self
    }

    /// Fill `primary_key` from `sequence` on INSERT and return it.
    pub fn sequence(mut self, primary_key: &str, sequence: &str) -> Self {
        if primary_key.trim().is_empty() || sequence.trim().is_empty() {
            self.fail("sequence: primary key and sequence name are required");
            return self;
        }
        self.sequence = Some(InsertSequence {
            primary_key: primary_key.to_string(),
            name: sequence.to_string(),
        });
        self
    }

    /// Switch to UPDATE with a field mapping or a raw fragment.
    pub fn update(mut self, spec: impl Into<UpdateSpec>) -> Self {
        let spec = spec.into();
        if spec.is_empty() {
            self.fail("update: payload must be a non-empty mapping or fragment");
        }
        self.operation = Operation::Update;
        self.update = Some(spec);
        self
    }

    /// Switch to DELETE, keeping the current WHERE clause.
    pub fn delete(mut self) -> Self {
        self.operation = Operation::Delete;
        self
    }

    /// Switch to DELETE with the given WHERE clause.
    pub fn delete_where(self, clause: impl Into<WhereClause>) -> Self {
        self.delete().filter(clause)
    }

    // ==================== Accessors ====================

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// The INSERT payload, if any.
    pub fn payload(&self) -> Option<&Record> {
        self.payload.as_ref()
    }

    pub fn where_clause(&self) -> Option<&WhereClause> {
        self.filter.as_ref()
    }

    /// Values of the WHERE clause, in marker order.
    pub fn where_values(&self) -> Vec<Value> {
        self.filter
            .as_ref()
            .map(WhereClause::values)
            .unwrap_or_default()
    }

    /// Payload values followed by WHERE values.
    pub fn bind_values(&self) -> Vec<Value> {
        let mut values: Vec<Value> = match self.operation {
            Operation::Insert => self
                .payload
                .as_ref()
                .map(|p| p.values().cloned().collect())
                .unwrap_or_default(),
            Operation::Update => match &self.update {
                Some(UpdateSpec::Fields(fields)) => fields.values().cloned().collect(),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        values.extend(self.where_values());
        values
    }

    // ==================== Compile / execute ====================

    /// Check builder state before compiling.
    pub fn validate(&self) -> OrmResult<()> {
        if let Some(ref err) = self.build_error {
            return Err(OrmError::InvalidArgument(err.clone()));
        }
        if self.target.trim().is_empty() {
            return Err(OrmError::invalid_argument("target table is required"));
        }
        Ok(())
    }

    /// Compile against a backend's capabilities.
    pub fn compile(&self, caps: &Capabilities) -> OrmResult<CompiledCommand> {
        self.validate()?;
        crate::compile::compile(self, caps)
    }

    /// SQL text or the JSON form of the document command.
    pub fn to_command_string(&self, caps: &Capabilities) -> OrmResult<String> {
        Ok(self.compile(caps)?.to_string())
    }

    /// Compile for `executor` and run the command.
    pub async fn execute(self, executor: &impl CommandExecutor) -> OrmResult<Outcome> {
        let command = self.compile(&executor.capabilities())?;
        executor.execute(&command, self.payload.as_ref()).await
    }
}

fn non_blank(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}
