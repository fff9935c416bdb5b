//! Pass 2: Resolve.
//!
//! Bottom-up row-type inference for every Box. Boxes are visited in
//! allocation order, which Annotate guarantees is already post-order.

use crate::catalog::SQLCatalog;
use crate::error::{Error, ErrorKind, Result};
use crate::ir::annotate::{BoxArena, BoxId, BoxKind, Handle};
use crate::types::{BoxType, FieldType, GroupType, RowType};

/// A `ScalarSubquery` Box is never anyone's `over`, nor a join/append/with/
/// iterate parent — it is reached
/// purely through a `HandleBound` reference buried inside some other Box's
/// own scalar arguments. It is always allocated strictly before any Box that
/// could reference it (Annotate only builds it while descending into a
/// scalar expression), so tracking it here and threading it into every
/// later Box's handle map is enough to make it resolvable without walking
/// back up a structural chain that doesn't exist.
type FloatingHandles = Vec<(Handle, RowType)>;

pub fn resolve(arena: &mut BoxArena, catalog: &SQLCatalog) -> Result<()> {
    let mut floating: FloatingHandles = Vec::new();
    for id in arena.ids_forward() {
        resolve_box(arena, catalog, id, &floating)?;
        if matches!(arena.get(id).kind, BoxKind::ScalarSubquery { .. }) {
            floating.push((arena.get(id).handle, arena.get(id).ty.row.clone()));
        }
    }
    Ok(())
}

fn resolve_box(arena: &mut BoxArena, catalog: &SQLCatalog, id: BoxId, floating: &FloatingHandles) -> Result<()> {
    let kind_row = resolve_kind(arena, catalog, id, floating)?;
    let over = arena.get(id).over;
    let mut ty = kind_row;

    // type = add_handle(type, handle_of(over)): every handle reachable
    // through any ancestor chain must remain visible so Link can validate
    // `HandleBound` references without walking back up.
    let extra_parents: Vec<BoxId> = match &arena.get(id).kind {
        BoxKind::ExtendedJoin { right, .. } => vec![*right],
        BoxKind::Append { branches } => branches.clone(),
        BoxKind::With { ctes, .. } => ctes.iter().map(|(_, id)| *id).collect(),
        BoxKind::IntIterate { iterator } => vec![*iterator],
        _ => Vec::new(),
    };
    for parent in over.into_iter().chain(extra_parents) {
        let parent_box = arena.get(parent);
        ty = ty.merge_handles(&parent_box.ty);
        ty = ty.add_handle(parent_box.handle, Some(parent_box.ty.row.clone()));
    }
    for (h, row) in floating {
        ty = ty.add_handle(*h, Some(row.clone()));
    }

    arena.get_mut(id).ty = ty;
    Ok(())
}

fn over_row(arena: &BoxArena, id: BoxId) -> RowType {
    match arena.get(id).over {
        Some(o) => arena.get(o).ty.row.clone(),
        None => RowType::empty(),
    }
}

fn resolve_kind(arena: &mut BoxArena, catalog: &SQLCatalog, id: BoxId, floating: &FloatingHandles) -> Result<BoxType> {
    // Clone the kind up front: several branches need `&mut arena` (the
    // `Iterate` fixpoint loop) while still consulting their own kind data.
    let kind = arena.get(id).kind.clone();
    match kind {
        BoxKind::FromTable { name } => {
            let table = catalog.table(&name).ok_or_else(|| {
                Error::new(
                    ErrorKind::Reference(crate::error::ReferenceError::UndefinedTableReference),
                    crate::error::Reason::NotFound {
                        name: name.clone(),
                        namespace: "table",
                    },
                )
            })?;
            let mut row = RowType::empty();
            for col in &table.columns {
                row.set_field(col.name.clone(), FieldType::Scalar);
            }
            Ok(BoxType::named(table.name.clone(), row))
        }
        BoxKind::FromNothing => Ok(BoxType::empty()),
        BoxKind::FromValues { columns, .. } => {
            let mut row = RowType::empty();
            for c in &columns {
                row.set_field(c.clone(), FieldType::Scalar);
            }
            Ok(BoxType::named("values", row))
        }
        BoxKind::FromReference { name } => {
            let target = arena.with_defs.get(&name).copied().ok_or_else(|| {
                Error::new(
                    ErrorKind::Reference(crate::error::ReferenceError::UndefinedTableReference),
                    crate::error::Reason::NotFound {
                        name: name.clone(),
                        namespace: "CTE",
                    },
                )
            })?;
            let row = arena.get(target).ty.row.clone();
            Ok(BoxType::named(name, row))
        }
        BoxKind::FromIterateSelf { knot } => {
            let row = arena.get(knot).ty.row.clone();
            Ok(BoxType::named("knot", row))
        }
        BoxKind::Where { .. }
        | BoxKind::Order { .. }
        | BoxKind::Limit { .. }
        | BoxKind::Highlight { .. }
        | BoxKind::IntBind { .. }
        | BoxKind::With { .. } => Ok(arena.get(arena.get(id).over.unwrap()).ty.clone()),
        BoxKind::As { name } => {
            let inner = over_row(arena, id);
            let mut row = RowType::empty();
            row.set_field(name.clone(), FieldType::Row(inner));
            let over_ty = arena.get(arena.get(id).over.unwrap()).ty.clone();
            Ok(BoxType {
                name: Some(name),
                row,
                handles: over_ty.handles,
            })
        }
        BoxKind::Define { args } => {
            let mut row = over_row(arena, id);
            for (name, _) in &args {
                row.set_field(name.clone(), FieldType::Scalar);
            }
            Ok(BoxType::named(
                arena
                    .get(arena.get(id).over.unwrap())
                    .ty
                    .name
                    .clone()
                    .unwrap_or_default(),
                row,
            ))
        }
        BoxKind::Select { args } => {
            let mut row = RowType::empty();
            for (name, _) in &args {
                row.set_field(name.clone(), FieldType::Scalar);
            }
            Ok(BoxType::named("select", row))
        }
        BoxKind::Group { by, name, .. } => {
            let mut row = RowType::empty();
            for (n, _) in &by {
                row.set_field(n.clone(), FieldType::Scalar);
            }
            row.group = GroupType::Row(Box::new(over_row(arena, id)));
            Ok(BoxType::named(name.unwrap_or_else(|| "group".into()), row))
        }
        BoxKind::Partition { .. } => {
            let mut row = over_row(arena, id);
            row.group = GroupType::Row(Box::new(over_row(arena, id)));
            Ok(BoxType::named("partition", row))
        }
        BoxKind::ExtendedJoin { right, .. } => {
            let left_row = over_row(arena, id);
            let right_row = arena.get(right).ty.row.clone();
            let row = left_row.union(&right_row);
            Ok(BoxType::named("join", row))
        }
        BoxKind::Append { branches } => {
            let mut row = over_row(arena, id);
            for b in &branches {
                row = row.intersect(&arena.get(*b).ty.row);
            }
            Ok(BoxType::named("append", row))
        }
        BoxKind::IntIterate { iterator } => resolve_iterate_fixpoint(arena, catalog, id, iterator, floating),
        BoxKind::Knot => Ok(arena.get(id).ty.clone()),
        BoxKind::ScalarSubquery { inner } => {
            let row = arena.get(inner).ty.row.clone();
            Ok(BoxType::named("scalar_subquery", row))
        }
    }
}

/// Resolve the base, then iteratively widen the knot's type by intersecting
/// with the iterator's resolved type until fixpoint (`iterator_t ⊆ knot_t`),
/// re-resolving the iterator subtree between rounds. Bounded at
/// `base.fields.len() + 1` rounds, which is enough for the row type to
/// stabilize since each round can only shrink the field set.
fn resolve_iterate_fixpoint(
    arena: &mut BoxArena,
    catalog: &SQLCatalog,
    iterate_id: BoxId,
    iterator_id: BoxId,
    floating: &FloatingHandles,
) -> Result<BoxType> {
    let over_id = arena.get(iterate_id).over.unwrap();
    let base_row = arena.get(over_id).ty.row.clone();

    let knot_id = find_knot(arena, iterator_id);
    let cap = base_row.fields.len() + 1;

    let mut knot_row = base_row.clone();
    for _round in 0..=cap {
        arena.get_mut(knot_id).ty = BoxType::named("knot", knot_row.clone());
        resolve_subtree(arena, catalog, knot_id.0 + 1, iterator_id.0, floating)?;
        let iterator_row = arena.get(iterator_id).ty.row.clone();
        if iterator_row.is_subset_of(&knot_row) {
            return Ok(BoxType::named("iterate", knot_row));
        }
        knot_row = knot_row.intersect(&iterator_row);
    }

    Err(Error::bug(
        "Iterate fixpoint did not converge within the expected number of rounds",
    ))
}

/// The `Knot` box is always the first id allocated inside an `Iterate`'s
/// iterator subtree; found by walking `FromIterateSelf` occurrences, falling
/// back to a direct scan since the knot itself carries no back-link.
fn find_knot(arena: &BoxArena, iterator_id: BoxId) -> BoxId {
    for id in (0..=iterator_id.0).rev() {
        if matches!(arena.boxes[id].kind, BoxKind::Knot) {
            return BoxId(id);
        }
    }
    unreachable!("IntIterate always allocates its Knot before the iterator subtree")
}

fn resolve_subtree(
    arena: &mut BoxArena,
    catalog: &SQLCatalog,
    from: usize,
    to_inclusive: usize,
    floating: &FloatingHandles,
) -> Result<()> {
    for i in from..=to_inclusive {
        resolve_box(arena, catalog, BoxId(i), floating)?;
    }
    Ok(())
}
