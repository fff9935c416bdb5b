//! The SQL clause tree the Translate pass builds and the serializer
//! renders to text. `Where`/`Order`/`Limit`/`Select`/`Define`
//! flatten into their `over`'s own `Select` in place when it's safe to do
//! so (see `DESIGN.md`); every other Box wraps `over` as its own nested
//! `FromItem::Subquery` rather than attempting the full flatten-or-wrap
//! decision tree.

use crate::node::scalar::{Lit, Nulls, SortDirection};
use crate::node::tabular::{FrameKind, JoinKind};

#[derive(Debug, Clone)]
pub enum Expr {
    /// A bare, unqualified identifier (used only where qualification would
    /// be redundant, e.g. a `VALUES` column name).
    Id(String),
    /// `alias.column`.
    Qualified(String, String),
    Lit(Lit),
    /// A bound parameter; the serializer assigns it a placeholder and
    /// records its name in the output `SQLString`'s variable list.
    Var(String),
    Fun(String, Vec<Expr>),
    Agg {
        name: String,
        args: Vec<Expr>,
        distinct: bool,
        filter: Option<Box<Expr>>,
    },
    Window {
        expr: Box<Expr>,
        partition_by: Vec<Expr>,
        order_by: Vec<Expr>,
        frame: Option<WindowFrame>,
    },
    Sort {
        value: Box<Expr>,
        direction: SortDirection,
        nulls: Option<Nulls>,
    },
    /// A correlated or uncorrelated scalar subquery: rendered as `(SELECT ...)`.
    Subquery(Box<Clause>),
}

#[derive(Debug, Clone)]
pub struct WindowFrame {
    pub kind: FrameKind,
    pub start: FrameBoundExpr,
    pub end: FrameBoundExpr,
}

#[derive(Debug, Clone)]
pub enum FrameBoundExpr {
    UnboundedPreceding,
    Preceding(Box<Expr>),
    CurrentRow,
    Following(Box<Expr>),
    UnboundedFollowing,
}

/// A FROM-item: something that can sit after `FROM` or `JOIN`.
#[derive(Debug, Clone)]
pub enum FromItem {
    Nothing,
    Table {
        name: String,
        alias: String,
    },
    Values {
        columns: Vec<String>,
        rows: Vec<Vec<Lit>>,
        alias: String,
    },
    Subquery {
        clause: Box<Clause>,
        alias: String,
    },
}

impl FromItem {
    pub fn alias(&self) -> Option<&str> {
        match self {
            FromItem::Nothing => None,
            FromItem::Table { alias, .. } | FromItem::Values { alias, .. } | FromItem::Subquery { alias, .. } => {
                Some(alias.as_str())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Join {
    pub kind: JoinKind,
    pub lateral: bool,
    pub rhs: FromItem,
    pub on: Expr,
}

#[derive(Debug, Clone, Default)]
pub enum GroupBy {
    #[default]
    None,
    Simple(Vec<Expr>),
    GroupingSets(Vec<GroupingSet>),
    Rollup(Vec<Expr>),
    Cube(Vec<Expr>),
}

#[derive(Debug, Clone)]
pub enum GroupingSet {
    Keys(Vec<Expr>),
    Rollup(Vec<Expr>),
    Cube(Vec<Expr>),
}

#[derive(Debug, Clone)]
pub struct Select {
    pub columns: Vec<(Expr, String)>,
    pub from: FromItem,
    pub joins: Vec<Join>,
    pub where_: Option<Expr>,
    pub group_by: GroupBy,
    /// A predicate over already-aggregated columns. A `Where` flattened on
    /// top of a `Group` becomes `HAVING`, not another `WHERE`, since its
    /// refs are drawn from post-aggregation aliases.
    pub having: Option<Expr>,
    pub order_by: Vec<Expr>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Select {
    pub fn new(from: FromItem) -> Self {
        Select {
            columns: Vec::new(),
            from,
            joins: Vec::new(),
            where_: None,
            group_by: GroupBy::default(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Clause {
    Select(Select),
    Union {
        all: bool,
        left: Box<Clause>,
        right: Box<Clause>,
    },
    With {
        recursive: bool,
        /// Name, body, and an optional `MATERIALIZED`/`NOT MATERIALIZED`
        /// hint; `None` lets the engine decide.
        ctes: Vec<(String, Clause, Option<bool>)>,
        body: Box<Clause>,
    },
}
