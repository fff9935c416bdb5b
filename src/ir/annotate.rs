//! Pass 1: Annotate.
//!
//! Rewrites the user-facing [`Tabular`] tree into an arena of [`BoxNode`]s
//! (one per tabular position) plus a rebased scalar tree ([`AScalar`]) in
//! which `Get` chains that cross a tabular boundary have been split into
//! `NameBound`/`HandleBound` wrappers around a base `Get`/`Agg`.
//!
//! Boxes live in a `Vec`-backed arena addressed by [`BoxId`] rather than as
//! individually-allocated, mutably shared nodes: Resolve and Link later
//! write into arena slots by index.

use std::collections::HashMap;
use std::rc::Rc;

use serde::Serialize;

use crate::error::{Error, ErrorKind, Result, WithErrorInfo};
use crate::node::scalar::{self, Lit, Scalar, ScalarRef, SortDirection};
use crate::node::tabular::{self as tnode, FromSource, GroupingSet, JoinKind, Tabular};
use crate::types::BoxType;
use crate::utils::id_gen::IdGenerator;

/// Stable index of a [`BoxNode`] within a [`BoxArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BoxId(pub usize);

impl From<usize> for BoxId {
    fn from(v: usize) -> Self {
        BoxId(v)
    }
}

/// A compilation-unique integer naming a Box as the target of a scoped
/// `Get`/`Agg` reference. `Handle(0)` means "not used as a bound target".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Default)]
pub struct Handle(pub usize);

impl Handle {
    pub const NONE: Handle = Handle(0);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl From<usize> for Handle {
    fn from(v: usize) -> Self {
        Handle(v)
    }
}

/// A linear path back to the node in the *original* tree that a Box (or a
/// scalar reference) was produced from, used solely for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Path(pub Vec<u32>);

impl Path {
    pub fn child(&self, i: u32) -> Path {
        let mut v = self.0.clone();
        v.push(i);
        Path(v)
    }
}

/// The annotated, rebased scalar tree. Bottoms out at a [`AScalar::Get`] or
/// [`AScalar::Agg`], possibly wrapped in [`AScalar::NameBound`]/
/// [`AScalar::HandleBound`] layers recording the crossed tabular scope(s).
#[derive(Debug, Clone, PartialEq, Serialize, enum_as_inner::EnumAsInner)]
pub enum AScalar {
    Get(String),
    Lit(Lit),
    Var(String),
    Fun(AFun),
    Agg(AAgg),
    Sort(Box<AScalar>, SortDirection, Option<scalar::Nulls>),
    /// One level of qualified access: `inner` is reached through field
    /// `name` of the current row.
    NameBound(Box<AScalar>, String),
    /// `inner` is evaluated against the row type exposed by the Box whose
    /// handle is `handle` — the binding point is the Box in the arena with
    /// that handle.
    HandleBound(Box<AScalar>, Handle),
}

#[derive(Debug, Clone, Serialize)]
pub struct AFun {
    pub name: String,
    pub args: Vec<AScalar>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AAgg {
    pub name: String,
    pub args: Vec<AScalar>,
    pub filter: Option<Box<AScalar>>,
    pub distinct: bool,
}

/// A labelled annotated scalar, as found in `Select`/`Define`/`Group`/`Bind`
/// argument lists once every label has been resolved to a concrete name
/// (explicit, or derived from a trailing `Get`).
pub type ALabelled = Vec<(String, AScalar)>;

/// The operator each Box wraps, with scalar children rebased and tabular
/// children replaced by [`BoxId`]s. The variants `IntBind`, `ExtendedJoin`,
/// and `Knot`/`IntIterate` are internal forms with no direct user-facing
/// [`Tabular`] counterpart.
#[derive(Debug, Clone, Serialize, enum_as_inner::EnumAsInner)]
pub enum BoxKind {
    FromTable { name: String },
    FromNothing,
    FromValues { columns: Vec<String>, rows: Vec<Vec<Lit>> },
    /// A CTE reference; resolved against `BoxArena::with_defs`.
    FromReference { name: String },
    /// The recursive self-reference inside an `Iterate`'s iterator branch;
    /// `knot` is the `Knot` Box standing in for it.
    FromIterateSelf { knot: BoxId },
    Where { cond: AScalar },
    Select { args: ALabelled },
    Define { args: ALabelled },
    Group {
        by: ALabelled,
        sets: Option<Vec<GroupingSet>>,
        name: Option<String>,
    },
    Partition {
        by: Vec<AScalar>,
        order_by: Vec<AScalar>,
        frame: tnode::Frame,
        name: Option<String>,
    },
    /// `over` (the arena field, not a `BoxKind` field) is the join's left
    /// side; `right` is the joinee.
    ExtendedJoin {
        kind: JoinKind,
        right: BoxId,
        on: AScalar,
        /// Filled by Link: references gathered from the right side that
        /// must be evaluated per-row against the left (a `LATERAL` join).
        lateral: Vec<AScalar>,
    },
    Append { branches: Vec<BoxId> },
    Order { by: Vec<AScalar> },
    Limit { offset: Option<i64>, limit: Option<i64> },
    As { name: String },
    /// `owned` starts false; Link sets it when one of `args` escapes into a
    /// parent subquery.
    IntBind { args: ALabelled, owned: bool },
    IntIterate { iterator: BoxId },
    /// Stands in for the recursive self-reference; its type is widened to
    /// a fixpoint during Resolve.
    Knot,
    With {
        ctes: Vec<(String, BoxId)>,
        materialized: Option<bool>,
    },
    Highlight { color: String },
    /// `Over(arg)`: a tabular node re-entered in scalar position. `inner` is
    /// the hoisted query; its first exposed column is the produced scalar
    /// value.
    ScalarSubquery { inner: BoxId },
}

#[derive(Debug)]
pub struct BoxNode {
    /// The Box this one chains onto (`None` for every `From*`/`ScalarSubquery`).
    pub over: Option<BoxId>,
    pub kind: BoxKind,
    pub ty: BoxType,
    pub handle: Handle,
    /// Filled bottom-up by Resolve; read immutable thereafter except where
    /// Link widens it further (the `Iterate` fixpoint).
    pub refs: Vec<AScalar>,
}

/// The arena produced by Annotate and threaded through Resolve/Link/Translate.
#[derive(Debug, Default)]
pub struct BoxArena {
    pub boxes: Vec<BoxNode>,
    pub path_map: Vec<Path>,
    /// CTE name -> the Box that defines it (its body).
    pub with_defs: HashMap<String, BoxId>,
    pub root: Option<BoxId>,
}

impl BoxArena {
    pub fn get(&self, id: BoxId) -> &BoxNode {
        &self.boxes[id.0]
    }

    pub fn get_mut(&mut self, id: BoxId) -> &mut BoxNode {
        &mut self.boxes[id.0]
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Iterates Box ids in allocation (bottom-up/post-order) order.
    pub fn ids_forward(&self) -> impl Iterator<Item = BoxId> {
        (0..self.boxes.len()).map(BoxId)
    }

    /// Iterates Box ids in reverse allocation order, as Link requires.
    pub fn ids_reverse(&self) -> impl Iterator<Item = BoxId> {
        (0..self.boxes.len()).rev().map(BoxId)
    }
}

struct Ctx {
    arena: BoxArena,
    handles: IdGenerator<Handle>,
    /// Handle allocated per Box id, lazily assigned on first reference.
    handle_of: HashMap<BoxId, Handle>,
    /// Active `Iterate` knots, innermost last, for resolving `IterateSelf`.
    knot_stack: Vec<BoxId>,
    /// Same `Tabular` node (by `Rc` identity, not structural equality) always
    /// maps to the same Box — this is what lets a `Get`/`Agg` reference the
    /// *same* position a node already occupies elsewhere in the tree (e.g. a
    /// join's own `joinee`, inside that join's `on` condition) instead of
    /// silently annotating an unreachable duplicate.
    seen: HashMap<usize, BoxId>,
}

/// A stable identity for a `Tabular` value: the address of its inner `Rc`
/// allocation. Two clones of the same `Rc` (same node, shared by reference)
/// produce the same key; two independently-built nodes never do, even if
/// structurally identical.
fn tabular_identity(t: &Tabular) -> usize {
    match t {
        Tabular::From(rc) => Rc::as_ptr(rc) as usize,
        Tabular::Where(rc) => Rc::as_ptr(rc) as usize,
        Tabular::Select(rc) => Rc::as_ptr(rc) as usize,
        Tabular::Define(rc) => Rc::as_ptr(rc) as usize,
        Tabular::Group(rc) => Rc::as_ptr(rc) as usize,
        Tabular::Partition(rc) => Rc::as_ptr(rc) as usize,
        Tabular::Join(rc) => Rc::as_ptr(rc) as usize,
        Tabular::Append(rc) => Rc::as_ptr(rc) as usize,
        Tabular::Order(rc) => Rc::as_ptr(rc) as usize,
        Tabular::Limit(rc) => Rc::as_ptr(rc) as usize,
        Tabular::As(rc) => Rc::as_ptr(rc) as usize,
        Tabular::Bind(rc) => Rc::as_ptr(rc) as usize,
        Tabular::Iterate(rc) => Rc::as_ptr(rc) as usize,
        Tabular::With(rc) => Rc::as_ptr(rc) as usize,
        Tabular::Highlight(rc) => Rc::as_ptr(rc) as usize,
        Tabular::Over(rc) => Rc::as_ptr(rc) as usize,
    }
}

impl Ctx {
    fn push_box(&mut self, over: Option<BoxId>, kind: BoxKind, path: Path) -> BoxId {
        let id = BoxId(self.arena.boxes.len());
        self.arena.boxes.push(BoxNode {
            over,
            kind,
            ty: BoxType::empty(),
            handle: Handle::NONE,
            refs: Vec::new(),
        });
        self.arena.path_map.push(path);
        id
    }

    fn handle_for(&mut self, target: BoxId) -> Handle {
        *self.handle_of.entry(target).or_insert_with(|| {
            let h = self.handles.gen();
            self.arena.get_mut(target).handle = h;
            h
        })
    }
}

/// Entry point for pass 1. Returns the arena plus the root Box id.
pub fn annotate(root: &Tabular) -> Result<BoxArena> {
    let mut ctx = Ctx {
        arena: BoxArena::default(),
        handles: IdGenerator::starting_at(1),
        handle_of: HashMap::new(),
        knot_stack: Vec::new(),
        seen: HashMap::new(),
    };
    let root_id = annotate_tabular(&mut ctx, root, Path::default())?;
    ctx.arena.root = Some(root_id);
    Ok(ctx.arena)
}

/// Memoizes by `Rc` identity (see [`Ctx::seen`]) before delegating to
/// [`annotate_tabular_node`], which does the actual per-variant allocation.
fn annotate_tabular(ctx: &mut Ctx, node: &Tabular, path: Path) -> Result<BoxId> {
    let key = tabular_identity(node);
    if let Some(&id) = ctx.seen.get(&key) {
        return Ok(id);
    }
    let id = annotate_tabular_node(ctx, node, path)?;
    ctx.seen.insert(key, id);
    Ok(id)
}

fn annotate_tabular_node(ctx: &mut Ctx, node: &Tabular, path: Path) -> Result<BoxId> {
    match node {
        Tabular::From(f) => match &f.source {
            FromSource::Table(t) => {
                let id = ctx.push_box(None, BoxKind::FromTable { name: t.name.clone() }, path);
                Ok(id)
            }
            FromSource::Nothing => Ok(ctx.push_box(None, BoxKind::FromNothing, path)),
            FromSource::Values(v) => Ok(ctx.push_box(
                None,
                BoxKind::FromValues {
                    columns: v.columns.clone(),
                    rows: v.rows.clone(),
                },
                path,
            )),
            FromSource::Symbol(name) => Ok(ctx.push_box(
                None,
                BoxKind::FromReference { name: name.clone() },
                path,
            )),
            FromSource::IterateSelf => {
                let knot = *ctx.knot_stack.last().ok_or_else(|| {
                    Error::simple(ErrorKind::IllFormed, "IterateSelf used outside of an Iterate")
                })?;
                Ok(ctx.push_box(None, BoxKind::FromIterateSelf { knot }, path))
            }
        },
        Tabular::Where(w) => {
            let over = annotate_tabular(ctx, &w.over, path.child(0))?;
            let cond = annotate_scalar(ctx, &w.cond, path.child(1))?;
            Ok(ctx.push_box(Some(over), BoxKind::Where { cond }, path))
        }
        Tabular::Select(s) => {
            let over = annotate_tabular(ctx, &s.over, path.child(0))?;
            let args = annotate_labelled(ctx, &s.args, path.child(1))?;
            check_unique_labels(&args)?;
            Ok(ctx.push_box(Some(over), BoxKind::Select { args }, path))
        }
        Tabular::Define(d) => {
            let over = annotate_tabular(ctx, &d.over, path.child(0))?;
            let args = annotate_labelled(ctx, &d.args, path.child(1))?;
            check_unique_labels(&args)?;
            Ok(ctx.push_box(Some(over), BoxKind::Define { args }, path))
        }
        Tabular::Group(g) => {
            let over = annotate_tabular(ctx, &g.over, path.child(0))?;
            let by = annotate_labelled(ctx, &g.by, path.child(1))?;
            check_unique_labels(&by)?;
            if let Some(sets) = &g.sets {
                let max_key = by.len();
                for set in sets {
                    let idxs: &[usize] = match set {
                        GroupingSet::Keys(v) | GroupingSet::Rollup(v) | GroupingSet::Cube(v) => v,
                    };
                    if idxs.iter().any(|i| *i >= max_key) {
                        return Err(Error::simple(
                            ErrorKind::InvalidGroupingSets,
                            "grouping set references an out-of-range key index",
                        )
                        .with_path(path));
                    }
                }
            }
            Ok(ctx.push_box(
                Some(over),
                BoxKind::Group {
                    by,
                    sets: g.sets.clone(),
                    name: g.name.clone(),
                },
                path,
            ))
        }
        Tabular::Partition(p) => {
            let over = annotate_tabular(ctx, &p.over, path.child(0))?;
            let by = p
                .by
                .iter()
                .enumerate()
                .map(|(i, e)| annotate_scalar(ctx, e, path.child(1).child(i as u32)))
                .collect::<Result<Vec<_>>>()?;
            let order_by = p
                .order_by
                .iter()
                .enumerate()
                .map(|(i, e)| annotate_scalar(ctx, e, path.child(2).child(i as u32)))
                .collect::<Result<Vec<_>>>()?;
            Ok(ctx.push_box(
                Some(over),
                BoxKind::Partition {
                    by,
                    order_by,
                    frame: p.frame.clone(),
                    name: p.name.clone(),
                },
                path,
            ))
        }
        Tabular::Join(j) => {
            let left = annotate_tabular(ctx, &j.left, path.child(0))?;
            let right = annotate_tabular(ctx, &j.joinee, path.child(1))?;
            let on = annotate_scalar(ctx, &j.on, path.child(2))?;
            Ok(ctx.push_box(
                Some(left),
                BoxKind::ExtendedJoin {
                    kind: j.kind(),
                    right,
                    on,
                    lateral: Vec::new(),
                },
                path,
            ))
        }
        Tabular::Append(a) => {
            let over = annotate_tabular(ctx, &a.over, path.child(0))?;
            let branches = a
                .args
                .iter()
                .enumerate()
                .map(|(i, b)| annotate_tabular(ctx, b, path.child(1).child(i as u32)))
                .collect::<Result<Vec<_>>>()?;
            Ok(ctx.push_box(Some(over), BoxKind::Append { branches }, path))
        }
        Tabular::Order(o) => {
            let over = annotate_tabular(ctx, &o.over, path.child(0))?;
            let by = o
                .by
                .iter()
                .enumerate()
                .map(|(i, e)| annotate_scalar(ctx, e, path.child(1).child(i as u32)))
                .collect::<Result<Vec<_>>>()?;
            Ok(ctx.push_box(Some(over), BoxKind::Order { by }, path))
        }
        Tabular::Limit(l) => {
            let over = annotate_tabular(ctx, &l.over, path.child(0))?;
            Ok(ctx.push_box(
                Some(over),
                BoxKind::Limit {
                    offset: l.offset,
                    limit: l.limit,
                },
                path,
            ))
        }
        Tabular::As(a) => {
            let over = annotate_tabular(ctx, &a.over, path.child(0))?;
            Ok(ctx.push_box(Some(over), BoxKind::As { name: a.name.clone() }, path))
        }
        Tabular::Bind(b) => {
            let over = annotate_tabular(ctx, &b.over, path.child(0))?;
            let args = annotate_labelled(ctx, &b.args, path.child(1))?;
            Ok(ctx.push_box(
                Some(over),
                BoxKind::IntBind { args, owned: false },
                path,
            ))
        }
        Tabular::Iterate(it) => {
            let over = annotate_tabular(ctx, &it.over, path.child(0))?;
            let knot = ctx.push_box(None, BoxKind::Knot, path.child(1));
            ctx.knot_stack.push(knot);
            let iterator = annotate_tabular(ctx, &it.iterator, path.child(1))?;
            ctx.knot_stack.pop();
            Ok(ctx.push_box(
                Some(over),
                BoxKind::IntIterate { iterator },
                path,
            ))
        }
        Tabular::With(w) => {
            let mut ctes = Vec::with_capacity(w.args.len());
            for (i, (name, body)) in w.args.iter().enumerate() {
                let id = annotate_tabular(ctx, body, path.child(0).child(i as u32))?;
                ctx.arena.with_defs.insert(name.clone(), id);
                ctes.push((name.clone(), id));
            }
            let over = annotate_tabular(ctx, &w.over, path.child(1))?;
            Ok(ctx.push_box(
                Some(over),
                BoxKind::With {
                    ctes,
                    materialized: w.materialized,
                },
                path,
            ))
        }
        Tabular::Highlight(h) => {
            let over = annotate_tabular(ctx, &h.over, path.child(0))?;
            Ok(ctx.push_box(Some(over), BoxKind::Highlight { color: h.color.clone() }, path))
        }
        Tabular::Over(o) => {
            let inner = annotate_tabular(ctx, &o.arg, path.child(0))?;
            Ok(ctx.push_box(None, BoxKind::ScalarSubquery { inner }, path))
        }
    }
}

/// Resolves a labelled arg list: an explicit label wins; otherwise the
/// trailing `Get`'s name is used. Duplicate labels are checked by the
/// caller via [check_unique_labels].
fn annotate_labelled(ctx: &mut Ctx, args: &tnode::Args, path: Path) -> Result<ALabelled> {
    args.iter()
        .enumerate()
        .map(|(i, (label, expr))| {
            let (inner, as_label) = expr.strip_as();
            let name = label
                .clone()
                .or_else(|| as_label.map(str::to_string))
                .or_else(|| crate::pattern::as_plain_get(inner).map(str::to_string))
                .ok_or_else(|| {
                    Error::simple(
                        ErrorKind::IllFormed,
                        "argument has no label and no name can be derived from it",
                    )
                    .with_path(path.child(i as u32))
                })?;
            let a = annotate_scalar(ctx, inner, path.child(i as u32))?;
            Ok((name, a))
        })
        .collect()
}

fn check_unique_labels(args: &ALabelled) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for (name, _) in args {
        if !seen.insert(name) {
            return Err(Error::simple(
                ErrorKind::DuplicateLabel,
                format!("duplicate label `{name}`"),
            ));
        }
    }
    Ok(())
}

/// Recursively annotates a scalar expression, rebinding `Get`/`Agg` chains
/// that cross into a tabular `over`.
fn annotate_scalar(ctx: &mut Ctx, node: &ScalarRef, path: Path) -> Result<AScalar> {
    match node.as_ref() {
        Scalar::Lit(l) => Ok(AScalar::Lit(l.clone())),
        Scalar::Var(v) => Ok(AScalar::Var(v.name.clone())),
        Scalar::As(a) => annotate_scalar(ctx, &a.value, path),
        Scalar::Sort(s) => {
            let inner = annotate_scalar(ctx, &s.value, path.child(0))?;
            Ok(AScalar::Sort(Box::new(inner), s.direction, s.nulls))
        }
        Scalar::Fun(f) => {
            let args = f
                .args
                .iter()
                .enumerate()
                .map(|(i, a)| annotate_scalar(ctx, a, path.child(i as u32)))
                .collect::<Result<Vec<_>>>()?;
            Ok(AScalar::Fun(AFun {
                name: f.name.clone(),
                args,
            }))
        }
        Scalar::Agg(a) => {
            let args = a
                .args
                .iter()
                .enumerate()
                .map(|(i, x)| annotate_scalar(ctx, x, path.child(i as u32)))
                .collect::<Result<Vec<_>>>()?;
            let filter = a
                .filter
                .as_ref()
                .map(|f| annotate_scalar(ctx, f, path.child(100)))
                .transpose()?
                .map(Box::new);
            let base = AScalar::Agg(AAgg {
                name: a.name.clone(),
                args,
                filter,
                distinct: a.distinct,
            });
            wrap_over(ctx, base, &a.over, path)
        }
        Scalar::Get(g) => {
            // Strip a chain of plain `Get`s down to the first one whose
            // `over` is `None` or a tabular target; that becomes the base.
            annotate_get_chain(ctx, g, path)
        }
    }
}

/// Implements the rebinding rule for a `Get` chain: names stack up while
/// `over` is a plain `Get`, and split into a `NameBound`/`HandleBound`
/// wrapper once `over` crosses into a tabular node.
fn annotate_get_chain(ctx: &mut Ctx, g: &scalar::Get, path: Path) -> Result<AScalar> {
    // Collect the chain of names from outermost (this node) down to the
    // innermost Get that directly touches `over`.
    let mut names = vec![g.name.clone()];
    let mut cur = g;
    loop {
        match &cur.over {
            scalar::Over::None => {
                // Base is current-row: a plain Get(name) per layer, folded
                // right-to-left into nested NameBounds.
                return Ok(fold_name_bound(names));
            }
            scalar::Over::Tabular(t) => {
                let target = annotate_tabular(ctx, t, path.clone())?;
                let handle = ctx.handle_for(target);
                let inner = fold_name_bound(names);
                return Ok(AScalar::HandleBound(Box::new(inner), handle));
            }
            scalar::Over::Scalar(inner_ref) => match inner_ref.as_ref() {
                Scalar::Get(inner_get) => {
                    names.push(inner_get.name.clone());
                    cur = inner_get;
                }
                _ => {
                    // A non-Get scalar in `over` position (e.g. a function
                    // call producing a row) cannot be further dotted into
                    // by this matcher; treat it as an ill-formed tree.
                    return Err(Error::simple(
                        ErrorKind::IllFormed,
                        "Get.over chain must bottom out at a plain Get or a tabular node",
                    )
                    .with_path(path));
                }
            },
        }
    }
}

/// `names` is `[n_k, n_{k-1}, ..., n_1]` (outermost first). Builds
/// `NameBound(n_1, NameBound(n_2, .. Get(n_k) ..))`.
fn fold_name_bound(mut names: Vec<String>) -> AScalar {
    let base_name = names.remove(0);
    let mut acc = AScalar::Get(base_name);
    while let Some(name) = names.pop() {
        acc = AScalar::NameBound(Box::new(acc), name);
    }
    acc
}

fn wrap_over(ctx: &mut Ctx, base: AScalar, over: &scalar::Over, path: Path) -> Result<AScalar> {
    match over {
        scalar::Over::None => Ok(base),
        scalar::Over::Tabular(t) => {
            let target = annotate_tabular(ctx, t, path)?;
            let handle = ctx.handle_for(target);
            Ok(AScalar::HandleBound(Box::new(base), handle))
        }
        scalar::Over::Scalar(_) => Err(Error::simple(
            ErrorKind::IllFormed,
            "Agg.over must be None or a tabular node",
        )),
    }
}
