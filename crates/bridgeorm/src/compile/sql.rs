//! SQL compilation with `$n` placeholders.
//!
//! Placeholder indices are assigned while the statement is built, so SET
//! values always precede WHERE values and no string renumbering is needed.

use super::Capabilities;
use crate::builder::{Builder, Operation, Selection, UpdateSpec, WhereClause};
use crate::condition::Condition;
use crate::error::{OrmError, OrmResult};
use crate::value::Value;

/// A SQL statement with its ordered bind values.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlCommand {
    pub operation: Operation,
    pub sql: String,
    pub values: Vec<Value>,
    /// The statement is `SELECT COUNT(*)`.
    pub returns_count: bool,
    /// Column named in `RETURNING`, if any.
    pub returning: Option<String>,
    pub has_predicate: bool,
}

#[derive(Debug, Default)]
struct ParamList {
    values: Vec<Value>,
}

impl ParamList {
    /// Add a value and return its 1-based index.
    fn push(&mut self, value: Value) -> usize {
        self.values.push(value);
        self.values.len()
    }

    fn placeholder(&mut self, value: Value) -> String {
        format!("${}", self.push(value))
    }
}

struct SqlCompiler<'a> {
    builder: &'a Builder,
    caps: &'a Capabilities,
    params: ParamList,
}

pub(crate) fn compile(builder: &Builder, caps: &Capabilities) -> OrmResult<SqlCommand> {
    let mut compiler = SqlCompiler {
        builder,
        caps,
        params: ParamList::default(),
    };
    match builder.operation {
        Operation::Find => compiler.find(),
        Operation::Insert => compiler.insert(),
        Operation::Update => compiler.update(),
        Operation::Delete => compiler.delete(),
    }
}

impl SqlCompiler<'_> {
    fn table(&self) -> String {
        self.caps.quote_name(&self.builder.target)
    }

    /// Field reference; qualified by table when joins are present.
    fn field(&self, name: &str) -> String {
        if self.builder.joins.is_empty() || name.contains('.') {
            self.caps.quote_name(name)
        } else {
            format!("{}.{}", self.table(), self.caps.quote_name(name))
        }
    }

    fn finish(self, sql: String, has_predicate: bool) -> SqlCommand {
        SqlCommand {
            operation: self.builder.operation,
            sql,
            values: self.params.values,
            returns_count: false,
            returning: None,
            has_predicate,
        }
    }

    // ==================== Operations ====================

    fn find(mut self) -> OrmResult<SqlCommand> {
        let b = self.builder;
        let counting = matches!(b.selection, Some(Selection::Count));
        // COUNT over a slice or a grouping has to count the rows the plain
        // query would return, so the query moves into a subquery.
        let wrap_count = counting
            && (b.limit.is_some_and(|n| n > 0)
                || b.offset.is_some_and(|n| n > 0)
                || b.group.is_some());
        let select = match &b.selection {
            _ if wrap_count => "1".to_string(),
            None | Some(Selection::All) => "*".to_string(),
            Some(Selection::Raw(raw)) => raw.clone(),
            Some(Selection::Fields(fields)) => fields
                .iter()
                .map(|f| self.caps.quote_name(f))
                .collect::<Vec<_>>()
                .join(", "),
            Some(Selection::Count) => "COUNT(*)".to_string(),
        };

        let mut sql = format!("SELECT {} FROM {}", select, self.table());
        for join in &b.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        let where_sql = self.where_clause()?;
        let has_predicate = where_sql.is_some();
        if let Some(w) = where_sql {
            sql.push_str(" WHERE ");
            sql.push_str(&w);
        }
        if let Some(group) = &b.group {
            sql.push_str(" GROUP BY ");
            sql.push_str(group);
        }
        if let Some(having) = &b.having {
            sql.push_str(" HAVING ");
            sql.push_str(having);
        }
        self.push_order_and_slice(&mut sql, true);
        if wrap_count {
            sql = format!("SELECT COUNT(*) FROM ({sql}) AS bridgeorm_count");
        }

        let mut cmd = self.finish(sql, has_predicate);
        cmd.returns_count = counting;
        Ok(cmd)
    }

    fn insert(mut self) -> OrmResult<SqlCommand> {
        let b = self.builder;
        let payload = b
            .payload
            .as_ref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| OrmError::MissingValues("insert requires a payload".into()))?;

        let mut columns = Vec::with_capacity(payload.len() + 1);
        let mut binds = Vec::with_capacity(payload.len() + 1);
        for (field, value) in payload {
            columns.push(self.caps.quote_name(field));
            binds.push(self.params.placeholder(value.clone()));
        }

        let mut returning = None;
        if let Some(seq) = &b.sequence {
            if !payload.contains_key(&seq.primary_key) {
                columns.push(self.caps.quote_name(&seq.primary_key));
                binds.push(format!("nextval('{}')", seq.name.replace('\'', "''")));
            }
            returning = Some(seq.primary_key.clone());
        }

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table(),
            columns.join(", "),
            binds.join(", ")
        );
        if let Some(pk) = &returning {
            sql.push_str(" RETURNING ");
            sql.push_str(&self.caps.quote_name(pk));
        }

        let mut cmd = self.finish(sql, false);
        cmd.returning = returning;
        Ok(cmd)
    }

    fn update(mut self) -> OrmResult<SqlCommand> {
        let b = self.builder;
        let set = match &b.update {
            Some(UpdateSpec::Fields(fields)) if !fields.is_empty() => fields
                .iter()
                .map(|(field, value)| {
                    format!("{} = {}", self.caps.quote_name(field), self.params.placeholder(value.clone()))
                })
                .collect::<Vec<_>>()
                .join(", "),
            Some(UpdateSpec::Raw(raw)) if !raw.trim().is_empty() => raw.clone(),
            _ => return Err(OrmError::MissingValues("update requires a payload".into())),
        };

        let mut sql = format!("UPDATE {} SET {}", self.table(), set);
        let where_sql = self.where_clause()?;
        let has_predicate = where_sql.is_some();
        if let Some(w) = where_sql {
            sql.push_str(" WHERE ");
            sql.push_str(&w);
        }
        self.push_order_and_slice(&mut sql, false);
        Ok(self.finish(sql, has_predicate))
    }

    fn delete(mut self) -> OrmResult<SqlCommand> {
        let mut sql = format!("DELETE FROM {}", self.table());
        let where_sql = self.where_clause()?;
        let has_predicate = where_sql.is_some();
        if let Some(w) = where_sql {
            sql.push_str(" WHERE ");
            sql.push_str(&w);
        }
        self.push_order_and_slice(&mut sql, false);
        Ok(self.finish(sql, has_predicate))
    }

    /// ORDER BY / LIMIT / OFFSET. Mutations only get them on backends that
    /// allow it. Zero limits and offsets are omitted.
    fn push_order_and_slice(&self, sql: &mut String, is_find: bool) {
        let b = self.builder;
        if !is_find && !self.caps.limited_mutation {
            return;
        }
        if let Some(order) = &b.order {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        if let Some(limit) = b.limit.filter(|n| *n > 0) {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if is_find {
            if let Some(offset) = b.offset.filter(|n| *n > 0) {
                sql.push_str(&format!(" OFFSET {offset}"));
            }
        }
    }

    // ==================== WHERE ====================

    fn where_clause(&mut self) -> OrmResult<Option<String>> {
        let builder = self.builder;
        let sql = match &builder.filter {
            None => return Ok(None),
            Some(WhereClause::Hash(hash)) => {
                let parts: Vec<String> = hash
                    .iter()
                    .map(|(field, value)| self.term(field, value))
                    .collect();
                parts.join(" AND ")
            }
            Some(WhereClause::Raw { sql, values }) => self.raw(sql, values)?,
            Some(WhereClause::Tree(cond)) => self.tree(cond),
        };
        Ok((!sql.is_empty()).then_some(sql))
    }

    fn term(&mut self, field: &str, value: &Value) -> String {
        let column = self.field(field);
        match value {
            Value::Null => format!("{column} IS NULL"),
            Value::Array(items) if items.is_empty() => "1=0".to_string(),
            Value::Array(items) => {
                let placeholders: Vec<String> = items
                    .iter()
                    .map(|v| self.params.placeholder(v.clone()))
                    .collect();
                format!("{} IN ({})", column, placeholders.join(", "))
            }
            other => format!("{} = {}", column, self.params.placeholder(other.clone())),
        }
    }

    fn tree(&mut self, cond: &Condition) -> String {
        match cond {
            Condition::Term { field, value } => self.term(field, value),
            Condition::And(children) => self.group(children, " AND ", |c| matches!(c, Condition::Or(_))),
            Condition::Or(children) => self.group(children, " OR ", |c| matches!(c, Condition::And(_))),
        }
    }

    fn group(
        &mut self,
        children: &[Condition],
        joiner: &str,
        needs_parens: impl Fn(&Condition) -> bool,
    ) -> String {
        let parts: Vec<String> = children
            .iter()
            .filter_map(|child| {
                let sql = self.tree(child);
                if sql.is_empty() {
                    None
                } else if needs_parens(child) {
                    Some(format!("({sql})"))
                } else {
                    Some(sql)
                }
            })
            .collect();
        parts.join(joiner)
    }

    /// Replace `?` markers outside single-quoted literals with `$n`.
    /// An array value expands into a comma list; an empty array becomes NULL.
    fn raw(&mut self, sql: &str, values: &[Value]) -> OrmResult<String> {
        let mut out = String::with_capacity(sql.len() + values.len() * 2);
        let mut values_iter = values.iter();
        let mut markers = 0usize;
        let mut in_literal = false;

        for ch in sql.chars() {
            match ch {
                '\'' => {
                    in_literal = !in_literal;
                    out.push(ch);
                }
                '?' if !in_literal => {
                    markers += 1;
                    let Some(value) = values_iter.next() else {
                        continue;
                    };
                    match value {
                        Value::Array(items) if items.is_empty() => out.push_str("NULL"),
                        Value::Array(items) => {
                            let list: Vec<String> = items
                                .iter()
                                .map(|v| self.params.placeholder(v.clone()))
                                .collect();
                            out.push_str(&list.join(", "));
                        }
                        other => out.push_str(&self.params.placeholder(other.clone())),
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
        Ok(out)
    }
}
