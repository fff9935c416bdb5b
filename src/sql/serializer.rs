//! Renders a [`Clause`] tree to SQL text.
//!
//! Quoting, placeholder style, `LIMIT` syntax, and boolean-literal fallback
//! are all dialect knobs; everything else is fixed shape.

use crate::dialect::{Dialect, DialectHandler, LimitStyle, VariableStyle};
use crate::node::scalar::{Lit, Nulls, SortDirection};
use crate::node::tabular::{FrameKind, JoinKind};
use crate::sql::clause::{Clause, Expr, FrameBoundExpr, FromItem, GroupBy, GroupingSet, Join, Select, WindowFrame};
use std::collections::HashMap;

struct Serializer {
    dialect: Box<dyn DialectHandler>,
    vars: Vec<String>,
    /// `NUMBERED` dialects (PostgreSQL) reuse the same placeholder for a
    /// repeated variable name; `POSITIONAL`/`NAMED` dialects don't, so this
    /// stays empty for them.
    numbered_slots: HashMap<String, usize>,
}

/// Renders `clause` under `dialect`, returning the SQL text and the ordered
/// list of bound variable names (one entry per placeholder occurrence,
/// `pack`'s job to turn into positional args).
pub fn render(clause: &Clause, dialect: Dialect) -> (String, Vec<String>) {
    let mut ser = Serializer {
        dialect: dialect.handler(),
        vars: Vec::new(),
        numbered_slots: HashMap::new(),
    };
    let raw = ser.clause(clause);
    (raw, ser.vars)
}

impl Serializer {
    fn quote_ident(&self, name: &str) -> String {
        let (open, close) = self.dialect.identifier_quotes();
        let escaped = name.replace(close, &format!("{close}{close}"));
        format!("{open}{escaped}{close}")
    }

    /// `name` may be a dotted qualified path (`schema.table`); quote each
    /// segment independently.
    fn quote_qualified(&self, name: &str) -> String {
        name.split('.').map(|seg| self.quote_ident(seg)).collect::<Vec<_>>().join(".")
    }

    fn var_placeholder(&mut self, name: &str) -> String {
        let prefix = self.dialect.variable_prefix();
        match self.dialect.variable_style() {
            VariableStyle::Named => {
                self.vars.push(name.to_string());
                format!("{prefix}{name}")
            }
            VariableStyle::Positional => {
                self.vars.push(name.to_string());
                prefix.to_string()
            }
            VariableStyle::Numbered => {
                if let Some(&slot) = self.numbered_slots.get(name) {
                    format!("{prefix}{slot}")
                } else {
                    self.vars.push(name.to_string());
                    let slot = self.vars.len();
                    self.numbered_slots.insert(name.to_string(), slot);
                    format!("{prefix}{slot}")
                }
            }
        }
    }

    fn string_literal(&self, s: &str) -> String {
        let escaped = if self.dialect.is_backslash_literal() {
            s.replace('\\', "\\\\").replace('\'', "\\'")
        } else {
            s.replace('\'', "''")
        };
        format!("'{escaped}'")
    }

    fn lit(&self, l: &Lit) -> String {
        match l {
            Lit::Null => "NULL".to_string(),
            Lit::Bool(true) => {
                if self.dialect.has_boolean_literals() {
                    "TRUE".to_string()
                } else {
                    "(1=1)".to_string()
                }
            }
            Lit::Bool(false) => {
                if self.dialect.has_boolean_literals() {
                    "FALSE".to_string()
                } else {
                    "(1=0)".to_string()
                }
            }
            Lit::Int(i) => i.to_string(),
            Lit::Float(s) => s.clone(),
            Lit::Text(s) => self.string_literal(s),
            Lit::DateTime(s) => self.string_literal(s),
        }
    }

    fn clause(&mut self, c: &Clause) -> String {
        match c {
            Clause::Select(s) => self.select(s),
            Clause::Union { all, left, right } => {
                let l = self.clause(left);
                let r = self.clause(right);
                if *all {
                    format!("{l} UNION ALL {r}")
                } else {
                    format!("{l} UNION {r}")
                }
            }
            Clause::With { recursive, ctes, body } => {
                let keyword = if *recursive && self.dialect.has_recursive_annotation() {
                    "WITH RECURSIVE "
                } else {
                    "WITH "
                };
                let rendered_ctes = ctes
                    .iter()
                    .map(|(name, body, materialized)| {
                        let hint = match materialized {
                            Some(true) => "MATERIALIZED ",
                            Some(false) => "NOT MATERIALIZED ",
                            None => "",
                        };
                        let inner = self.clause(body);
                        format!("{} AS {hint}({inner})", self.quote_ident(name))
                    })
                    .collect::<Vec<_>>();
                let body = self.clause(body);
                format!("{keyword}{} {body}", rendered_ctes.join(", "))
            }
        }
    }

    fn select(&mut self, s: &Select) -> String {
        let mut out = String::from("SELECT ");
        let columns = s
            .columns
            .iter()
            .map(|(e, alias)| {
                let rendered = self.expr(e);
                let quoted = self.quote_ident(alias);
                let redundant = matches!(e, Expr::Id(n) if n == alias) || matches!(e, Expr::Qualified(_, col) if col == alias);
                if redundant {
                    rendered
                } else {
                    format!("{rendered} AS {quoted}")
                }
            })
            .collect::<Vec<_>>();
        out.push_str(&columns.join(", "));

        if !matches!(s.from, FromItem::Nothing) {
            out.push_str(" FROM ");
            out.push_str(&self.from_item(&s.from));
        }
        for j in &s.joins {
            out.push(' ');
            out.push_str(&self.join(j));
        }
        if let Some(w) = &s.where_ {
            out.push_str(" WHERE ");
            out.push_str(&self.expr(w));
        }
        out.push_str(&self.group_by(&s.group_by));
        if let Some(h) = &s.having {
            out.push_str(" HAVING ");
            out.push_str(&self.expr(h));
        }
        if !s.order_by.is_empty() {
            out.push_str(" ORDER BY ");
            out.push_str(&s.order_by.iter().map(|e| self.expr(e)).collect::<Vec<_>>().join(", "));
        }
        out.push_str(&self.limit_offset(s.limit, s.offset));
        out
    }

    fn from_item(&mut self, f: &FromItem) -> String {
        match f {
            FromItem::Nothing => String::new(),
            FromItem::Table { name, alias } => {
                format!("{} AS {}", self.quote_qualified(name), self.quote_ident(alias))
            }
            FromItem::Values { columns, rows, alias } => {
                let rows_sql = rows
                    .iter()
                    .map(|row| format!("({})", row.iter().map(|l| self.lit(l)).collect::<Vec<_>>().join(", ")))
                    .collect::<Vec<_>>()
                    .join(", ");
                let ctor = self.dialect.values_row_constructor().unwrap_or("VALUES");
                if self.dialect.has_as_columns() {
                    let cols = columns.iter().map(|c| self.quote_ident(c)).collect::<Vec<_>>().join(", ");
                    format!("({ctor} {rows_sql}) AS {}({cols})", self.quote_ident(alias))
                } else {
                    format!("({ctor} {rows_sql}) AS {}", self.quote_ident(alias))
                }
            }
            FromItem::Subquery { clause, alias } => {
                format!("({}) AS {}", self.clause(clause), self.quote_ident(alias))
            }
        }
    }

    fn join(&mut self, j: &Join) -> String {
        let keyword = match j.kind {
            JoinKind::Inner => "JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Full => "FULL JOIN",
            JoinKind::Cross => "CROSS JOIN",
        };
        let lateral = if j.lateral && !self.dialect.has_implicit_lateral() {
            "LATERAL "
        } else {
            ""
        };
        let rhs = self.from_item(&j.rhs);
        if matches!(j.kind, JoinKind::Cross) {
            format!("{keyword} {lateral}{rhs}")
        } else {
            let on = self.expr(&j.on);
            format!("{keyword} {lateral}{rhs} ON {on}")
        }
    }

    fn group_by(&mut self, g: &GroupBy) -> String {
        match g {
            GroupBy::None => String::new(),
            GroupBy::Simple(exprs) => {
                format!(" GROUP BY {}", exprs.iter().map(|e| self.expr(e)).collect::<Vec<_>>().join(", "))
            }
            GroupBy::Rollup(exprs) => {
                format!(
                    " GROUP BY ROLLUP({})",
                    exprs.iter().map(|e| self.expr(e)).collect::<Vec<_>>().join(", ")
                )
            }
            GroupBy::Cube(exprs) => {
                format!(
                    " GROUP BY CUBE({})",
                    exprs.iter().map(|e| self.expr(e)).collect::<Vec<_>>().join(", ")
                )
            }
            GroupBy::GroupingSets(sets) => {
                let rendered = sets.iter().map(|s| self.grouping_set(s)).collect::<Vec<_>>().join(", ");
                format!(" GROUP BY GROUPING SETS ({rendered})")
            }
        }
    }

    fn grouping_set(&mut self, s: &GroupingSet) -> String {
        match s {
            GroupingSet::Keys(exprs) => {
                format!("({})", exprs.iter().map(|e| self.expr(e)).collect::<Vec<_>>().join(", "))
            }
            GroupingSet::Rollup(exprs) => {
                format!("ROLLUP({})", exprs.iter().map(|e| self.expr(e)).collect::<Vec<_>>().join(", "))
            }
            GroupingSet::Cube(exprs) => {
                format!("CUBE({})", exprs.iter().map(|e| self.expr(e)).collect::<Vec<_>>().join(", "))
            }
        }
    }

    fn limit_offset(&self, limit: Option<i64>, offset: Option<i64>) -> String {
        if limit.is_none() && offset.is_none() {
            return String::new();
        }
        match self.dialect.limit_style() {
            LimitStyle::Mysql => match (limit, offset) {
                (Some(l), Some(o)) => format!(" LIMIT {o}, {l}"),
                (Some(l), None) => format!(" LIMIT {l}"),
                (None, Some(o)) => format!(" LIMIT {o}, 18446744073709551615"),
                (None, None) => String::new(),
            },
            LimitStyle::Sqlite => match (limit, offset) {
                (Some(l), Some(o)) => format!(" LIMIT {l} OFFSET {o}"),
                (Some(l), None) => format!(" LIMIT {l}"),
                (None, Some(o)) => format!(" LIMIT -1 OFFSET {o}"),
                (None, None) => String::new(),
            },
            LimitStyle::SqlServer => match (limit, offset) {
                (Some(l), Some(o)) => format!(" OFFSET {o} ROWS FETCH NEXT {l} ROWS ONLY"),
                (Some(l), None) => format!(" OFFSET 0 ROWS FETCH NEXT {l} ROWS ONLY"),
                (None, Some(o)) => format!(" OFFSET {o} ROWS"),
                (None, None) => String::new(),
            },
            LimitStyle::Postgresql | LimitStyle::Default => {
                let mut s = String::new();
                if let Some(l) = limit {
                    s.push_str(&format!(" LIMIT {l}"));
                }
                if let Some(o) = offset {
                    s.push_str(&format!(" OFFSET {o}"));
                }
                s
            }
        }
    }

    fn window_frame(&mut self, f: &WindowFrame) -> String {
        let kind = match f.kind {
            FrameKind::Rows => "ROWS",
            FrameKind::Range => "RANGE",
        };
        let start = self.frame_bound(&f.start);
        let end = self.frame_bound(&f.end);
        format!("{kind} BETWEEN {start} AND {end}")
    }

    fn frame_bound(&mut self, b: &FrameBoundExpr) -> String {
        match b {
            FrameBoundExpr::UnboundedPreceding => "UNBOUNDED PRECEDING".to_string(),
            FrameBoundExpr::Preceding(e) => format!("{} PRECEDING", self.expr(e)),
            FrameBoundExpr::CurrentRow => "CURRENT ROW".to_string(),
            FrameBoundExpr::Following(e) => format!("{} FOLLOWING", self.expr(e)),
            FrameBoundExpr::UnboundedFollowing => "UNBOUNDED FOLLOWING".to_string(),
        }
    }

    fn expr(&mut self, e: &Expr) -> String {
        match e {
            Expr::Id(n) => self.quote_ident(n),
            Expr::Qualified(alias, col) => format!("{}.{}", self.quote_ident(alias), self.quote_ident(col)),
            Expr::Lit(l) => self.lit(l),
            Expr::Var(name) => self.var_placeholder(name),
            Expr::Fun(name, args) => self.fun(name, args),
            Expr::Agg { name, args, distinct, filter } => self.agg(name, args, *distinct, filter.as_deref()),
            Expr::Window { expr, partition_by, order_by, frame } => {
                let inner = self.expr(expr);
                let mut parts = Vec::new();
                if !partition_by.is_empty() {
                    parts.push(format!(
                        "PARTITION BY {}",
                        partition_by.iter().map(|e| self.expr(e)).collect::<Vec<_>>().join(", ")
                    ));
                }
                if !order_by.is_empty() {
                    parts.push(format!(
                        "ORDER BY {}",
                        order_by.iter().map(|e| self.expr(e)).collect::<Vec<_>>().join(", ")
                    ));
                }
                if let Some(f) = frame {
                    parts.push(self.window_frame(f));
                }
                format!("{inner} OVER ({})", parts.join(" "))
            }
            Expr::Sort { value, direction, nulls } => {
                let value = self.expr(value);
                let dir = match direction {
                    SortDirection::Asc => "ASC",
                    SortDirection::Desc => "DESC",
                };
                let mut s = format!("{value} {dir}");
                if let Some(n) = nulls {
                    s.push_str(match n {
                        Nulls::First => " NULLS FIRST",
                        Nulls::Last => " NULLS LAST",
                    });
                }
                s
            }
            Expr::Subquery(c) => format!("({})", self.clause(c)),
        }
    }

    fn agg(&mut self, name: &str, args: &[Expr], distinct: bool, filter: Option<&Expr>) -> String {
        let rendered_args = if args.is_empty() && name.eq_ignore_ascii_case("count") {
            "*".to_string()
        } else {
            args.iter().map(|a| self.expr(a)).collect::<Vec<_>>().join(", ")
        };
        let distinct_kw = if distinct { "DISTINCT " } else { "" };
        let base = format!("{}({distinct_kw}{rendered_args})", name.to_uppercase());
        match filter {
            Some(f) => format!("{base} FILTER (WHERE {})", self.expr(f)),
            None => base,
        }
    }

    /// Known operator/function forms get their SQL-specific template;
    /// anything else renders uppercased and argument-spread.
    fn fun(&mut self, name: &str, args: &[Expr]) -> String {
        match (name, args) {
            ("and", _) | ("or", _) => self.bool_chain(name, args),
            ("not", [a]) => format!("NOT ({})", self.expr(a)),
            ("is null", [a]) => format!("({} IS NULL)", self.expr(a)),
            ("is not null", [a]) => format!("({} IS NOT NULL)", self.expr(a)),
            ("in", [target, rest @ ..]) if !rest.is_empty() => {
                format!(
                    "({} IN ({}))",
                    self.expr(target),
                    rest.iter().map(|a| self.expr(a)).collect::<Vec<_>>().join(", ")
                )
            }
            ("not in", [target, rest @ ..]) if !rest.is_empty() => {
                format!(
                    "({} NOT IN ({}))",
                    self.expr(target),
                    rest.iter().map(|a| self.expr(a)).collect::<Vec<_>>().join(", ")
                )
            }
            ("between", [value, lo, hi]) => {
                format!("({} BETWEEN {} AND {})", self.expr(value), self.expr(lo), self.expr(hi))
            }
            ("case", args) if !args.is_empty() => self.case(args),
            ("current_timestamp", []) => "CURRENT_TIMESTAMP".to_string(),
            ("concat", args) => match self.dialect.concat_operator() {
                Some(op) => args
                    .iter()
                    .map(|a| self.expr(a))
                    .collect::<Vec<_>>()
                    .join(&format!(" {op} ")),
                None => format!("concat({})", args.iter().map(|a| self.expr(a)).collect::<Vec<_>>().join(", ")),
            },
            (op, [a, b]) if is_infix_operator(op) => {
                format!("({} {op} {})", self.expr(a), self.expr(b))
            }
            _ => format!("{}({})", name.to_uppercase(), args.iter().map(|a| self.expr(a)).collect::<Vec<_>>().join(", ")),
        }
    }

    /// `AND`/`OR` chains absorb their identity literal (`TRUE` for `AND`,
    /// `FALSE` for `OR`) and collapse to it when nothing else survives.
    fn bool_chain(&mut self, name: &str, args: &[Expr]) -> String {
        let identity = name == "and";
        let keyword = if identity { " AND " } else { " OR " };
        let kept: Vec<&Expr> = args
            .iter()
            .filter(|a| !matches!(a, Expr::Lit(Lit::Bool(b)) if *b == identity))
            .collect();
        if kept.is_empty() {
            return self.lit(&Lit::Bool(identity));
        }
        if kept.len() == 1 {
            return self.expr(kept[0]);
        }
        let rendered = kept.iter().map(|a| self.expr(a)).collect::<Vec<_>>().join(keyword);
        format!("({rendered})")
    }

    fn case(&mut self, args: &[Expr]) -> String {
        let mut out = String::from("CASE");
        let mut i = 0;
        while i + 1 < args.len() {
            out.push_str(&format!(" WHEN {} THEN {}", self.expr(&args[i]), self.expr(&args[i + 1])));
            i += 2;
        }
        if i < args.len() {
            out.push_str(&format!(" ELSE {}", self.expr(&args[i])));
        }
        out.push_str(" END");
        out
    }
}

fn is_infix_operator(name: &str) -> bool {
    matches!(
        name,
        "=" | "!=" | "<>" | "<" | "<=" | ">" | ">=" | "+" | "-" | "*" | "/" | "%" | "||" | "like" | "ilike"
    )
}
