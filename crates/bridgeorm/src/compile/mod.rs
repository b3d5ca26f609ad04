//! Compiler: builder state + backend capabilities → command descriptor.
//!
//! Compilation is pure. Relational backends get SQL with `$n` placeholders and
//! ordered bind values ([`SqlCommand`]); document backends get a structured
//! command ([`DocumentCommand`]) that the executor translates into driver calls.

pub mod document;
pub mod sql;

pub use document::{DocumentCommand, Slice};
pub use sql::SqlCommand;

use crate::builder::{Builder, Operation};
use crate::error::OrmResult;
use serde::Serialize;
use std::fmt;

/// Which family of backend a command is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Relational,
    Document,
}

/// What a backend can express, reported by its executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub backend: BackendKind,
    /// UPDATE / DELETE honour ORDER BY and LIMIT.
    pub limited_mutation: bool,
    /// Identifier quote character, if the backend quotes names.
    pub quote: Option<char>,
}

impl Capabilities {
    /// PostgreSQL: double-quoted identifiers, no ORDER/LIMIT on mutations.
    pub const fn relational() -> Self {
        Self {
            backend: BackendKind::Relational,
            limited_mutation: false,
            quote: Some('"'),
        }
    }

    /// Document stores: no quoting, mutations can be ordered and limited.
    pub const fn document() -> Self {
        Self {
            backend: BackendKind::Document,
            limited_mutation: true,
            quote: None,
        }
    }

    pub const fn with_limited_mutation(mut self, enabled: bool) -> Self {
        self.limited_mutation = enabled;
        self
    }

    /// Quote an identifier, leaving already-quoted names and `*` alone.
    ///
    /// Dotted names are quoted per segment (`users.id` → `"users"."id"`).
    pub fn quote_name(&self, name: &str) -> String {
        let Some(q) = self.quote else {
            return name.to_string();
        };
        if name.starts_with(q) || name.ends_with(q) {
            return name.to_string();
        }
        name.split('.')
            .map(|part| {
                if part == "*" {
                    part.to_string()
                } else {
                    format!("{q}{part}{q}")
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// A compiled command ready for an executor.
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledCommand {
    Sql(SqlCommand),
    Document(DocumentCommand),
}

impl CompiledCommand {
    pub fn operation(&self) -> Operation {
        match self {
            CompiledCommand::Sql(cmd) => cmd.operation,
            CompiledCommand::Document(cmd) => cmd.operation,
        }
    }

    pub fn as_sql(&self) -> Option<&SqlCommand> {
        match self {
            CompiledCommand::Sql(cmd) => Some(cmd),
            CompiledCommand::Document(_) => None,
        }
    }

    pub fn as_document(&self) -> Option<&DocumentCommand> {
        match self {
            CompiledCommand::Document(cmd) => Some(cmd),
            CompiledCommand::Sql(_) => None,
        }
    }

    /// Whether the command carries a WHERE predicate.
    pub fn has_predicate(&self) -> bool {
        match self {
            CompiledCommand::Sql(cmd) => cmd.has_predicate,
            CompiledCommand::Document(cmd) => cmd.filter.is_some(),
        }
    }
}

impl fmt::Display for CompiledCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompiledCommand::Sql(cmd) => f.write_str(&cmd.sql),
            CompiledCommand::Document(cmd) => {
                let json = serde_json::to_string(cmd).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

pub(crate) fn compile(builder: &Builder, caps: &Capabilities) -> OrmResult<CompiledCommand> {
    match caps.backend {
        BackendKind::Relational => sql::compile(builder, caps).map(CompiledCommand::Sql),
        BackendKind::Document => document::compile(builder, caps).map(CompiledCommand::Document),
    }
}
