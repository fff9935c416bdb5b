//! Pass 4, part one: Translate/Assemble.
//!
//! Builds one [`clause::Select`] per Box, each reading from its dependencies'
//! already-built `Select`s wrapped as subqueries. `Where`/`Order`/`Limit`
//! merge directly into `over`'s own `Select` via `passthrough_wrap`, and
//! `Select`/`Define` flatten into `over` when it has no grouping/limit of
//! its own; every other Box wraps `over` as its own nested subquery rather
//! than attempting the full flatten-or-wrap decision tree. A `Where` on top
//! of a `Group` becomes `HAVING`. See `DESIGN.md` for the full rationale.

use std::collections::HashMap;

use crate::catalog::SQLCatalog;
use crate::error::{Error, Result};
use crate::ir::annotate::{AAgg, AScalar, BoxArena, BoxId, BoxKind, Handle};
use crate::node::tabular::{FrameBound as NodeFrameBound, GroupingSet as NodeGroupingSet};
use crate::sql::clause::{Clause, Expr, FrameBoundExpr, FromItem, GroupBy, GroupingSet, Join, Select, WindowFrame};
use crate::utils::id_gen::NameGenerator;

struct Assemblage {
    select: Select,
    cols: HashMap<String, Expr>,
    alias: String,
}

struct TranslateCtx<'a> {
    arena: &'a BoxArena,
    catalog: &'a SQLCatalog,
    table_names: NameGenerator,
    knot_names: HashMap<BoxId, String>,
    handle_owner: HashMap<Handle, BoxId>,
    /// Per-`ScalarSubquery` Box, the rendered `(SELECT ...)` expression for
    /// each ref it was asked for, keyed by the unwrapped inner expression's
    /// label (see that Box's `build_assemblage` arm). Populated as each
    /// `ScalarSubquery` is translated; read back by `render_scalar` for any
    /// `HandleBound` elsewhere in the tree that targets it, since such a
    /// Box is never structurally anyone's `over` and so never otherwise
    /// reachable through a `local` cols map.
    scalar_subquery_cols: HashMap<BoxId, HashMap<String, Expr>>,
    pending_ctes: Vec<(String, Clause, Option<bool>)>,
    has_recursive: bool,
}

/// Runs Translate over a fully linked arena, returning the assembled clause
/// tree plus the root's output column order.
pub fn translate(arena: &BoxArena, catalog: &SQLCatalog) -> Result<(Clause, Vec<String>)> {
    let mut handle_owner = HashMap::new();
    for id in arena.ids_forward() {
        let h = arena.get(id).handle;
        if !h.is_none() {
            handle_owner.insert(h, id);
        }
    }

    let mut ctx = TranslateCtx {
        arena,
        catalog,
        table_names: NameGenerator::default(),
        knot_names: HashMap::new(),
        handle_owner,
        scalar_subquery_cols: HashMap::new(),
        pending_ctes: Vec::new(),
        has_recursive: false,
    };

    let mut asm: HashMap<BoxId, Assemblage> = HashMap::new();
    for id in arena.ids_forward() {
        let a = build_assemblage(&mut ctx, &asm, id)?;
        asm.insert(id, a);
    }

    let root = arena.root.ok_or_else(|| Error::bug("arena has no root"))?;
    let root_asm = asm.remove(&root).ok_or_else(|| Error::bug("root box was not translated"))?;
    let order: Vec<String> = arena.get(root).ty.row.field_names().map(str::to_string).collect();

    let body = Clause::Select(root_asm.select);
    let final_clause = if ctx.pending_ctes.is_empty() {
        body
    } else {
        Clause::With {
            recursive: ctx.has_recursive,
            ctes: ctx.pending_ctes,
            body: Box::new(body),
        }
    };
    Ok((final_clause, order))
}

fn next_alias(ctx: &mut TranslateCtx, hint: &str) -> String {
    ctx.table_names.gen(hint)
}

/// Per-SELECT column-alias allocator: the first reference to a given leaf
/// name keeps it bare, later collisions within the same `SELECT` get a
/// numeric suffix.
#[derive(Default)]
struct ColumnNames(HashMap<String, usize>);

impl ColumnNames {
    fn next(&mut self, base: &str) -> String {
        let count = self.0.entry(base.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            base.to_string()
        } else {
            format!("{base}_{count}")
        }
    }
}

fn build_assemblage(ctx: &mut TranslateCtx, asm: &HashMap<BoxId, Assemblage>, id: BoxId) -> Result<Assemblage> {
    let kind = ctx.arena.get(id).kind.clone();
    let refs = ctx.arena.get(id).refs.clone();

    match kind {
        BoxKind::FromTable { name } => {
            let table = ctx
                .catalog
                .table(&name)
                .ok_or_else(|| Error::bug(format!("table `{name}` vanished after Resolve")))?;
            let alias = next_alias(ctx, &table.name);
            let mut cols = HashMap::new();
            let mut names = ColumnNames::default();
            let mut columns = Vec::new();
            for r in &refs {
                let out = names.next(leaf_name(r));
                let expr = Expr::Qualified(alias.clone(), leaf_name(r).to_string());
                cols.insert(label_of(r), expr.clone());
                cols.insert(label_of(&AScalar::Get(leaf_name(r).to_string())), expr.clone());
                columns.push((expr, out));
            }
            let mut select = Select::new(FromItem::Table {
                name: table.qualified_name(),
                alias: alias.clone(),
            });
            select.columns = columns;
            Ok(Assemblage { select, cols, alias })
        }
        BoxKind::FromNothing => {
            let select = Select::new(FromItem::Nothing);
            Ok(Assemblage {
                select,
                cols: HashMap::new(),
                alias: next_alias(ctx, "nothing"),
            })
        }
        BoxKind::FromValues { columns: col_names, rows } => {
            let alias = next_alias(ctx, "values");
            let mut cols = HashMap::new();
            let mut names = ColumnNames::default();
            let mut columns = Vec::new();
            for r in &refs {
                let out = names.next(leaf_name(r));
                let expr = Expr::Qualified(alias.clone(), leaf_name(r).to_string());
                cols.insert(label_of(r), expr.clone());
                columns.push((expr, out));
            }
            let mut select = Select::new(FromItem::Values {
                columns: col_names,
                rows,
                alias: alias.clone(),
            });
            select.columns = columns;
            Ok(Assemblage { select, cols, alias })
        }
        BoxKind::FromReference { name } => from_reference_like(ctx, &refs, &name),
        BoxKind::FromIterateSelf { knot } => {
            let name = ctx
                .knot_names
                .get(&knot)
                .cloned()
                .ok_or_else(|| Error::bug("Knot box translated after its own IterateSelf"))?;
            from_reference_like(ctx, &refs, &name)
        }
        BoxKind::Knot => {
            let name = next_alias(ctx, "recur");
            ctx.knot_names.insert(id, name.clone());
            from_reference_like(ctx, &refs, &name)
        }

        BoxKind::Where { cond } => {
            let over_id = ctx.arena.get(id).over.unwrap();
            let over = &asm[&over_id];
            let rendered = render_scalar(&cond, ctx, &over.cols)?;
            // A `Where` sitting on top of a `Group` filters already-
            // aggregated columns, so it becomes `HAVING`, not a second
            // `WHERE`.
            let (where_, having) = if matches!(over.select.group_by, GroupBy::None) {
                (Some(and_combine(over.select.where_.clone(), rendered)), None)
            } else {
                (None, Some(and_combine(over.select.having.clone(), rendered)))
            };
            passthrough_wrap(ctx, &refs, over, where_, having, Vec::new(), None, None)
        }
        BoxKind::Order { by } => {
            let over_id = ctx.arena.get(id).over.unwrap();
            let over = &asm[&over_id];
            let order_by = by
                .iter()
                .map(|e| render_scalar(e, ctx, &over.cols))
                .collect::<Result<Vec<_>>>()?;
            passthrough_wrap(ctx, &refs, over, None, None, order_by, None, None)
        }
        BoxKind::Limit { offset, limit } => {
            let over_id = ctx.arena.get(id).over.unwrap();
            let over = &asm[&over_id];
            passthrough_wrap(ctx, &refs, over, None, None, Vec::new(), offset, limit)
        }
        BoxKind::Highlight { .. } | BoxKind::As { .. } => {
            // Pure passthrough: neither carries SQL-visible structure (`As`
            // only disambiguates `Get` chains, fully resolved by Link;
            // `Highlight` is a presentational marker for the host).
            let over_id = ctx.arena.get(id).over.unwrap();
            reuse(asm, over_id)
        }
        BoxKind::With { ctes, materialized } => {
            for (name, body_id) in &ctes {
                let body = &asm[body_id];
                ctx.pending_ctes
                    .push((name.clone(), Clause::Select(body.select.clone()), materialized));
            }
            let over_id = ctx.arena.get(id).over.unwrap();
            reuse(asm, over_id)
        }
        BoxKind::IntBind { .. } => {
            let over_id = ctx.arena.get(id).over.unwrap();
            reuse(asm, over_id)
        }

        BoxKind::Select { args } => {
            let over_id = ctx.arena.get(id).over.unwrap();
            let over = &asm[&over_id];
            // Only flatten into `over`'s own relation when `over` is itself
            // a from-only box (no grouping/limit to worry about re-ordering
            // around); otherwise wrap, matching the uniform nested strategy.
            let flatten = matches!(over.select.group_by, GroupBy::None) && over.select.limit.is_none();
            let alias = next_alias(ctx, "select");
            let mut cols = HashMap::new();
            let mut columns = Vec::new();
            for (name, expr) in &args {
                let rendered = render_scalar(expr, ctx, &over.cols)?;
                columns.push((rendered.clone(), name.clone()));
                // When flattening, `over`'s relation is reused in place, so a
                // further box must resolve this column by re-rendering the
                // same expression rather than via `alias`, which is only
                // real once something wraps this `select` as a subquery.
                let out_expr = if flatten { rendered } else { Expr::Qualified(alias.clone(), name.clone()) };
                cols.insert(label_of(&AScalar::Get(name.clone())), out_expr);
            }
            let mut select = Select::new(over.select.from.clone());
            select.joins = over.select.joins.clone();
            select.where_ = over.select.where_.clone();
            select.group_by = over.select.group_by.clone();
            select.having = over.select.having.clone();
            select.order_by = over.select.order_by.clone();
            select.limit = over.select.limit;
            select.offset = over.select.offset;
            select.columns = columns;
            let select = if flatten {
                select
            } else {
                let mut wrapped = Select::new(FromItem::Subquery {
                    clause: Box::new(Clause::Select(over.select.clone())),
                    alias: over.alias.clone(),
                });
                wrapped.columns = args
                    .iter()
                    .map(|(name, expr)| {
                        render_scalar(expr, ctx, &over.cols).map(|e| (e, name.clone()))
                    })
                    .collect::<Result<Vec<_>>>()?;
                wrapped
            };
            Ok(Assemblage { select, cols, alias })
        }
        BoxKind::Define { args } => {
            let over_id = ctx.arena.get(id).over.unwrap();
            let over = &asm[&over_id];
            let alias = next_alias(ctx, "define");
            let mut cols = HashMap::new();
            let mut names = ColumnNames::default();
            let mut columns = Vec::new();
            for r in &refs {
                let defined = match r {
                    AScalar::Get(name) => args.iter().find(|(n, _)| n == name),
                    _ => None,
                };
                let (rendered, out_label) = match defined {
                    Some((name, e)) => (render_scalar(e, ctx, &over.cols)?, name.clone()),
                    None => (render_scalar(r, ctx, &over.cols)?, leaf_name(r).to_string()),
                };
                let out = names.next(&out_label);
                // `Define` always flattens into `over`'s own relation, so
                // (as in `passthrough_wrap`) `cols` must echo the rendered
                // expression rather than a post-wrap alias that's never
                // actually materialized.
                cols.insert(label_of(r), rendered.clone());
                if defined.is_some() {
                    cols.insert(label_of(&AScalar::Get(out_label)), rendered.clone());
                }
                columns.push((rendered, out));
            }
            let mut select = Select::new(over.select.from.clone());
            select.joins = over.select.joins.clone();
            select.where_ = over.select.where_.clone();
            select.group_by = over.select.group_by.clone();
            select.having = over.select.having.clone();
            select.order_by = over.select.order_by.clone();
            select.limit = over.select.limit;
            select.offset = over.select.offset;
            select.columns = columns;
            Ok(Assemblage { select, cols, alias })
        }

        BoxKind::Group { by, sets, .. } => {
            let over_id = ctx.arena.get(id).over.unwrap();
            let over = &asm[&over_id];
            let alias = next_alias(ctx, "group");
            let mut cols = HashMap::new();
            let mut names = ColumnNames::default();
            let mut columns = Vec::new();
            let mut group_exprs = Vec::new();
            for (name, e) in &by {
                let rendered = render_scalar(e, ctx, &over.cols)?;
                group_exprs.push(rendered.clone());
                let out = names.next(name);
                cols.insert(label_of(&AScalar::Get(name.clone())), Expr::Qualified(alias.clone(), out.clone()));
                columns.push((rendered, out));
            }
            for r in &refs {
                if let AScalar::Agg(a) = r {
                    let rendered = render_agg(a, ctx, &over.cols)?;
                    let out = names.next(leaf_name(r));
                    cols.insert(label_of(r), Expr::Qualified(alias.clone(), out.clone()));
                    columns.push((rendered, out));
                }
            }
            let group_by = match &sets {
                None => {
                    if group_exprs.is_empty() {
                        GroupBy::None
                    } else {
                        GroupBy::Simple(group_exprs)
                    }
                }
                Some(sets) => GroupBy::GroupingSets(
                    sets.iter()
                        .map(|s| match s {
                            NodeGroupingSet::Keys(idx) => {
                                GroupingSet::Keys(idx.iter().map(|i| group_exprs[*i].clone()).collect())
                            }
                            NodeGroupingSet::Rollup(idx) => {
                                GroupingSet::Rollup(idx.iter().map(|i| group_exprs[*i].clone()).collect())
                            }
                            NodeGroupingSet::Cube(idx) => {
                                GroupingSet::Cube(idx.iter().map(|i| group_exprs[*i].clone()).collect())
                            }
                        })
                        .collect(),
                ),
            };
            let mut select = Select::new(over.select.from.clone());
            select.joins = over.select.joins.clone();
            select.where_ = over.select.where_.clone();
            select.columns = columns;
            select.group_by = group_by;
            Ok(Assemblage { select, cols, alias })
        }
        BoxKind::Partition { by, order_by, frame, .. } => {
            let over_id = ctx.arena.get(id).over.unwrap();
            let over = &asm[&over_id];
            let alias = next_alias(ctx, "partition");
            let partition_by = by.iter().map(|e| render_scalar(e, ctx, &over.cols)).collect::<Result<Vec<_>>>()?;
            let order_exprs = order_by
                .iter()
                .map(|e| render_scalar(e, ctx, &over.cols))
                .collect::<Result<Vec<_>>>()?;
            let win_frame = WindowFrame {
                kind: frame.kind,
                start: render_frame_bound(&frame.start, ctx, &over.cols)?,
                end: render_frame_bound(&frame.end, ctx, &over.cols)?,
            };
            let mut cols = HashMap::new();
            let mut names = ColumnNames::default();
            let mut columns = Vec::new();
            for r in &refs {
                match r {
                    AScalar::Agg(a) => {
                        let inner = render_agg(a, ctx, &over.cols)?;
                        let windowed = Expr::Window {
                            expr: Box::new(inner),
                            partition_by: partition_by.clone(),
                            order_by: order_exprs.clone(),
                            frame: Some(win_frame.clone()),
                        };
                        let out = names.next(leaf_name(r));
                        cols.insert(label_of(r), Expr::Qualified(alias.clone(), out.clone()));
                        columns.push((windowed, out));
                    }
                    _ => {
                        let rendered = render_scalar(r, ctx, &over.cols)?;
                        let out = names.next(leaf_name(r));
                        cols.insert(label_of(r), Expr::Qualified(alias.clone(), out.clone()));
                        columns.push((rendered, out));
                    }
                }
            }
            let mut select = Select::new(over.select.from.clone());
            select.joins = over.select.joins.clone();
            select.where_ = over.select.where_.clone();
            select.columns = columns;
            Ok(Assemblage { select, cols, alias })
        }

        BoxKind::ExtendedJoin { kind, right, on, lateral } => {
            let left_id = ctx.arena.get(id).over.unwrap();
            let left = &asm[&left_id];
            let right_asm = &asm[&right];
            let mut combined = left.cols.clone();
            combined.extend(right_asm.cols.clone());
            let on_expr = render_scalar(&on, ctx, &combined)?;
            let alias = next_alias(ctx, "join");
            let rhs_item = FromItem::Subquery {
                clause: Box::new(Clause::Select(right_asm.select.clone())),
                alias: right_asm.alias.clone(),
            };
            let mut select = Select::new(left.select.from.clone());
            select.joins = left.select.joins.clone();
            select.joins.push(Join {
                kind,
                lateral: !lateral.is_empty(),
                rhs: rhs_item,
                on: on_expr,
            });
            // A `Where`/`Group` already flattened into `left`'s own `Select`
            // (see `passthrough_wrap`) must survive the join, not just its
            // `FROM`/`JOIN`s.
            select.where_ = left.select.where_.clone();
            select.group_by = left.select.group_by.clone();
            select.having = left.select.having.clone();
            select.order_by = left.select.order_by.clone();
            select.limit = left.select.limit;
            select.offset = left.select.offset;
            let mut cols = HashMap::new();
            let mut names = ColumnNames::default();
            let mut columns = Vec::new();
            for r in &refs {
                let rendered = render_scalar(r, ctx, &combined)?;
                let out = names.next(leaf_name(r));
                // Same reasoning as `passthrough_wrap`: the join flattens
                // `left`'s relation in place rather than wrapping it, so
                // `cols` must echo the real expression, not `alias`.
                cols.insert(label_of(r), rendered.clone());
                columns.push((rendered, out));
            }
            select.columns = columns;
            Ok(Assemblage { select, cols, alias })
        }
        BoxKind::Append { branches } => {
            let over_id = ctx.arena.get(id).over.unwrap();
            let over = &asm[&over_id];
            let alias = next_alias(ctx, "append");
            let mut names = ColumnNames::default();
            let mut base_columns = Vec::new();
            for r in &refs {
                base_columns.push((render_scalar(r, ctx, &over.cols)?, names.next(leaf_name(r))));
            }
            let mut base_select = Select::new(over.select.from.clone());
            base_select.joins = over.select.joins.clone();
            base_select.where_ = over.select.where_.clone();
            base_select.group_by = over.select.group_by.clone();
            base_select.having = over.select.having.clone();
            base_select.columns = base_columns;
            let mut combined = Clause::Select(base_select);

            for b in &branches {
                let branch = &asm[b];
                let mut bnames = ColumnNames::default();
                let mut branch_columns = Vec::new();
                for r in &refs {
                    branch_columns.push((render_scalar(r, ctx, &branch.cols)?, bnames.next(leaf_name(r))));
                }
                let mut branch_select = Select::new(branch.select.from.clone());
                branch_select.joins = branch.select.joins.clone();
                branch_select.where_ = branch.select.where_.clone();
                branch_select.group_by = branch.select.group_by.clone();
                branch_select.having = branch.select.having.clone();
                branch_select.columns = branch_columns;
                combined = Clause::Union {
                    all: true,
                    left: Box::new(combined),
                    right: Box::new(Clause::Select(branch_select)),
                };
            }

            let mut cols = HashMap::new();
            let mut out_names = ColumnNames::default();
            let mut outer_columns = Vec::new();
            for r in &refs {
                let out = out_names.next(leaf_name(r));
                cols.insert(label_of(r), Expr::Qualified(alias.clone(), out.clone()));
                outer_columns.push((Expr::Id(out.clone()), out));
            }
            let mut select = Select::new(FromItem::Subquery {
                clause: Box::new(combined),
                alias: alias.clone(),
            });
            select.columns = outer_columns;
            Ok(Assemblage { select, cols, alias })
        }

        BoxKind::IntIterate { iterator } => {
            let over_id = ctx.arena.get(id).over.unwrap();
            let over = &asm[&over_id];
            let iter_asm = &asm[&iterator];
            let knot_id = find_knot(ctx.arena, iterator);
            let name = ctx
                .knot_names
                .get(&knot_id)
                .cloned()
                .ok_or_else(|| Error::bug("Knot was never assigned a CTE name"))?;

            let mut names = ColumnNames::default();
            let mut base_columns = Vec::new();
            for r in &refs {
                base_columns.push((render_scalar(r, ctx, &over.cols)?, names.next(leaf_name(r))));
            }
            let mut base_select = Select::new(over.select.from.clone());
            base_select.joins = over.select.joins.clone();
            base_select.where_ = over.select.where_.clone();
            base_select.columns = base_columns;

            let mut rnames = ColumnNames::default();
            let mut recur_columns = Vec::new();
            for r in &refs {
                recur_columns.push((render_scalar(r, ctx, &iter_asm.cols)?, rnames.next(leaf_name(r))));
            }
            let mut recur_select = Select::new(iter_asm.select.from.clone());
            recur_select.joins = iter_asm.select.joins.clone();
            recur_select.where_ = iter_asm.select.where_.clone();
            recur_select.columns = recur_columns;

            let union = Clause::Union {
                all: true,
                left: Box::new(Clause::Select(base_select)),
                right: Box::new(Clause::Select(recur_select)),
            };
            ctx.has_recursive = true;
            ctx.pending_ctes.push((name.clone(), union, None));
            from_reference_like(ctx, &refs, &name)
        }

        BoxKind::ScalarSubquery { inner } => {
            // Never anyone's `over`, so its own `select`/`alias` are never
            // consumed as a FROM-item; only `cols` matters, mapping each
            // requested ref to its own standalone `(SELECT <one column>
            // FROM ...)` expression, one subquery per distinct ref since a
            // scalar subquery projects exactly one column.
            let inner_asm = &asm[&inner];
            let inner_cols = inner_asm.cols.clone();
            let inner_select = inner_asm.select.clone();
            let inner_alias = inner_asm.alias.clone();
            let mut cols = HashMap::new();
            for r in &refs {
                let value = render_scalar(r, ctx, &inner_cols)?;
                let mut one = inner_select.clone();
                one.columns = vec![(value, "value".to_string())];
                cols.insert(label_of(r), Expr::Subquery(Box::new(Clause::Select(one))));
            }
            ctx.scalar_subquery_cols.insert(id, cols.clone());
            Ok(Assemblage {
                select: inner_select,
                cols,
                alias: inner_alias,
            })
        }
    }
}

/// Builds a plain `SELECT <refs as columns> FROM <name> AS <alias>` — used
/// for CTE/self references, which are always exactly as wide as the refs
/// asked of them.
fn from_reference_like(ctx: &mut TranslateCtx, refs: &[AScalar], name: &str) -> Result<Assemblage> {
    let alias = next_alias(ctx, name);
    let mut cols = HashMap::new();
    let mut names = ColumnNames::default();
    let mut columns = Vec::new();
    for r in refs {
        let out = names.next(leaf_name(r));
        let expr = Expr::Qualified(alias.clone(), leaf_name(r).to_string());
        cols.insert(label_of(r), expr.clone());
        columns.push((expr, out));
    }
    let mut select = Select::new(FromItem::Table {
        name: name.to_string(),
        alias: alias.clone(),
    });
    select.columns = columns;
    Ok(Assemblage { select, cols, alias })
}

/// Wraps `over`'s relation unchanged, adding at most one of a `WHERE`,
/// `ORDER BY`, or `LIMIT`/`OFFSET` and projecting exactly `refs`.
fn passthrough_wrap(
    ctx: &mut TranslateCtx,
    refs: &[AScalar],
    over: &Assemblage,
    where_: Option<Expr>,
    having: Option<Expr>,
    order_by: Vec<Expr>,
    offset: Option<i64>,
    limit: Option<i64>,
) -> Result<Assemblage> {
    let alias = next_alias(ctx, "q");
    let mut cols = HashMap::new();
    let mut names = ColumnNames::default();
    let mut columns = Vec::new();
    for r in refs {
        let rendered = render_scalar(r, ctx, &over.cols)?;
        let out = names.next(leaf_name(r));
        // `over`'s relation isn't wrapped here, just reused in place, so a
        // further box reading this assemblage's `cols` must still resolve
        // against the *same* underlying `FROM`/`JOIN`s — echo the expression
        // actually placed in the column list rather than inventing a
        // reference to an alias (`alias`) that exists only if something
        // later wraps this `select` in its own subquery.
        cols.insert(label_of(r), rendered.clone());
        columns.push((rendered, out));
    }
    let mut select = Select::new(over.select.from.clone());
    select.joins = over.select.joins.clone();
    select.where_ = where_.or_else(|| over.select.where_.clone());
    select.group_by = over.select.group_by.clone();
    select.having = having.or_else(|| over.select.having.clone());
    select.order_by = if order_by.is_empty() { over.select.order_by.clone() } else { order_by };
    select.limit = limit.or(over.select.limit);
    select.offset = offset.or(over.select.offset);
    select.columns = columns;
    Ok(Assemblage { select, cols, alias })
}

/// `Where(c1) |> Where(c2)` must produce one `WHERE` whose condition is
/// `c1 AND c2`, not `c2` alone — `passthrough_wrap` reuses `over`'s own
/// `Select` in place rather than nesting a new subquery, so without this
/// the second `Where`'s rendered condition would simply overwrite the
/// first's. Flattens into an existing `and` rather than nesting one AND
/// inside another, so three chained `Where`s render as one 3-ary `AND`.
fn and_combine(existing: Option<Expr>, new: Expr) -> Expr {
    match existing {
        None => new,
        Some(Expr::Fun(name, mut args)) if name == "and" => {
            args.push(new);
            Expr::Fun(name, args)
        }
        Some(other) => Expr::Fun("and".to_string(), vec![other, new]),
    }
}

fn reuse(asm: &HashMap<BoxId, Assemblage>, over_id: BoxId) -> Result<Assemblage> {
    let over = &asm[&over_id];
    Ok(Assemblage {
        select: over.select.clone(),
        cols: over.cols.clone(),
        alias: over.alias.clone(),
    })
}

fn find_knot(arena: &BoxArena, iterator_id: BoxId) -> BoxId {
    for i in (0..=iterator_id.0).rev() {
        if matches!(arena.boxes[i].kind, BoxKind::Knot) {
            return BoxId(i);
        }
    }
    unreachable!("IntIterate always allocates its Knot before the iterator subtree")
}

fn render_agg(agg: &AAgg, ctx: &mut TranslateCtx, local: &HashMap<String, Expr>) -> Result<Expr> {
    let args = agg
        .args
        .iter()
        .map(|a| render_scalar(a, ctx, local))
        .collect::<Result<Vec<_>>>()?;
    let filter = agg
        .filter
        .as_ref()
        .map(|f| render_scalar(f, ctx, local))
        .transpose()?
        .map(Box::new);
    Ok(Expr::Agg {
        name: agg.name.clone(),
        args,
        distinct: agg.distinct,
        filter,
    })
}

fn render_frame_bound(b: &NodeFrameBound, ctx: &mut TranslateCtx, local: &HashMap<String, Expr>) -> Result<FrameBoundExpr> {
    Ok(match b {
        NodeFrameBound::UnboundedPreceding => FrameBoundExpr::UnboundedPreceding,
        NodeFrameBound::CurrentRow => FrameBoundExpr::CurrentRow,
        NodeFrameBound::UnboundedFollowing => FrameBoundExpr::UnboundedFollowing,
        NodeFrameBound::Preceding(e) => {
            FrameBoundExpr::Preceding(Box::new(render_literal_scalar(e, ctx, local)?))
        }
        NodeFrameBound::Following(e) => {
            FrameBoundExpr::Following(Box::new(render_literal_scalar(e, ctx, local)?))
        }
    })
}

/// Frame bounds are plain literal/variable offsets in practice; reuses the
/// ordinary scalar renderer but only after re-annotating would be circular,
/// so frame bound expressions are rendered directly from the raw node tree
/// via a minimal literal/var-only path.
fn render_literal_scalar(
    e: &crate::node::scalar::ScalarRef,
    _ctx: &mut TranslateCtx,
    _local: &HashMap<String, Expr>,
) -> Result<Expr> {
    use crate::node::scalar::Scalar;
    match e.as_ref() {
        Scalar::Lit(l) => Ok(Expr::Lit(l.clone())),
        Scalar::Var(v) => Ok(Expr::Var(v.name.clone())),
        _ => Err(Error::simple(
            crate::error::ErrorKind::IllFormed,
            "window frame bounds must be literals or bound variables",
        )),
    }
}

fn render_scalar(e: &AScalar, ctx: &mut TranslateCtx, local: &HashMap<String, Expr>) -> Result<Expr> {
    match e {
        AScalar::Lit(l) => Ok(Expr::Lit(l.clone())),
        AScalar::Var(v) => Ok(Expr::Var(v.clone())),
        AScalar::Fun(f) => {
            let args = f.args.iter().map(|a| render_scalar(a, ctx, local)).collect::<Result<Vec<_>>>()?;
            Ok(Expr::Fun(f.name.clone(), args))
        }
        AScalar::Sort(inner, dir, nulls) => Ok(Expr::Sort {
            value: Box::new(render_scalar(inner, ctx, local)?),
            direction: *dir,
            nulls: *nulls,
        }),
        AScalar::HandleBound(inner, h) => {
            let owner = ctx.handle_owner.get(h).copied();
            match owner {
                Some(owner_id) if matches!(ctx.arena.get(owner_id).kind, BoxKind::ScalarSubquery { .. }) => {
                    // Link redirects these straight to the owning
                    // `ScalarSubquery` box, whose own `cols` map was keyed
                    // by the unwrapped inner expression (see its
                    // `build_assemblage` arm), not by this `HandleBound`'s
                    // own label.
                    ctx.scalar_subquery_cols
                        .get(&owner_id)
                        .and_then(|cols| cols.get(&label_of(inner)))
                        .cloned()
                        .ok_or_else(|| Error::bug("scalar subquery reference never reached its owner Box"))
                }
                Some(_) => local
                    .get(&label_of(e))
                    .cloned()
                    .ok_or_else(|| Error::bug("HandleBound reference never reached its binding Box")),
                None => render_scalar(inner, ctx, local),
            }
        }
        AScalar::NameBound(inner, _) => match local.get(&label_of(e)) {
            Some(expr) => Ok(expr.clone()),
            None => render_scalar(inner, ctx, local),
        },
        AScalar::Get(_) => local
            .get(&label_of(e))
            .cloned()
            .ok_or_else(|| Error::bug(format!("unresolved reference at render time: {e:?}"))),
        AScalar::Agg(_) => local
            .get(&label_of(e))
            .cloned()
            .ok_or_else(|| Error::bug(format!("unresolved aggregate at render time: {e:?}"))),
    }
}

pub(crate) use crate::ir::link::{label_of, leaf_name};
