//! Dialect knobs.
//!
//! One small `Dialect` enum selecting a `DialectHandler`, whose default
//! methods describe the "generic" (lowest common denominator) dialect and
//! whose per-dialect impls override only what differs.

use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Default,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::VariantNames,
)]
#[strum(serialize_all = "lowercase")]
pub enum Dialect {
    #[default]
    Generic,
    Postgres,
    MySql,
    SQLite,
    MsSql,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableStyle {
    Named,
    Numbered,
    Positional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitStyle {
    Mysql,
    Postgresql,
    Sqlite,
    SqlServer,
    Default,
}

pub trait DialectHandler: std::fmt::Debug {
    fn variable_style(&self) -> VariableStyle {
        VariableStyle::Positional
    }

    fn variable_prefix(&self) -> char {
        '?'
    }

    fn identifier_quotes(&self) -> (char, char) {
        ('"', '"')
    }

    fn has_boolean_literals(&self) -> bool {
        true
    }

    fn is_backslash_literal(&self) -> bool {
        false
    }

    fn limit_style(&self) -> LimitStyle {
        LimitStyle::Default
    }

    /// `Some("||")` or `None` (fall back to `concat(...)`).
    fn concat_operator(&self) -> Option<&'static str> {
        Some("||")
    }

    fn has_recursive_annotation(&self) -> bool {
        true
    }

    fn has_as_columns(&self) -> bool {
        true
    }

    fn has_implicit_lateral(&self) -> bool {
        false
    }

    fn values_row_constructor(&self) -> Option<&'static str> {
        Some("VALUES")
    }

    fn values_column_prefix(&self) -> &'static str {
        "column"
    }

    fn values_column_index(&self) -> usize {
        1
    }
}

#[derive(Debug)]
struct GenericDialect;
impl DialectHandler for GenericDialect {}

#[derive(Debug)]
struct PostgresDialect;
impl DialectHandler for PostgresDialect {
    fn variable_style(&self) -> VariableStyle {
        VariableStyle::Numbered
    }
    fn variable_prefix(&self) -> char {
        '$'
    }
    fn limit_style(&self) -> LimitStyle {
        LimitStyle::Postgresql
    }
}

#[derive(Debug)]
struct MySqlDialect;
impl DialectHandler for MySqlDialect {
    fn variable_style(&self) -> VariableStyle {
        VariableStyle::Positional
    }
    fn variable_prefix(&self) -> char {
        '?'
    }
    fn identifier_quotes(&self) -> (char, char) {
        ('`', '`')
    }
    fn limit_style(&self) -> LimitStyle {
        LimitStyle::Mysql
    }
    fn has_boolean_literals(&self) -> bool {
        false
    }
}

#[derive(Debug)]
struct SQLiteDialect;
impl DialectHandler for SQLiteDialect {
    fn limit_style(&self) -> LimitStyle {
        LimitStyle::Sqlite
    }
    fn has_boolean_literals(&self) -> bool {
        false
    }
}

#[derive(Debug)]
struct MsSqlDialect;
impl DialectHandler for MsSqlDialect {
    fn variable_style(&self) -> VariableStyle {
        VariableStyle::Named
    }
    fn variable_prefix(&self) -> char {
        '@'
    }
    fn identifier_quotes(&self) -> (char, char) {
        ('[', ']')
    }
    fn limit_style(&self) -> LimitStyle {
        LimitStyle::SqlServer
    }
    fn has_boolean_literals(&self) -> bool {
        false
    }
    fn is_backslash_literal(&self) -> bool {
        true
    }
}

impl Dialect {
    pub fn handler(&self) -> Box<dyn DialectHandler> {
        match self {
            Dialect::Generic => Box::new(GenericDialect),
            Dialect::Postgres => Box::new(PostgresDialect),
            Dialect::MySql => Box::new(MySqlDialect),
            Dialect::SQLite => Box::new(SQLiteDialect),
            Dialect::MsSql => Box::new(MsSqlDialect),
        }
    }
}
