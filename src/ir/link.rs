//! Pass 3: Link.
//!
//! Top-down propagation of live references. The root Box is seeded with one
//! `Get` per scalar field of its resolved row type; every other Box's `refs`
//! are whatever its consumer(s) pushed into it during this same pass. Boxes
//! are visited in reverse allocation order, so a Box's consumers have always
//! already run by the time it is visited.

use std::collections::HashMap;

use crate::error::{Error, ErrorKind, ReferenceError, Result};
use crate::ir::annotate::{AAgg, AScalar, BoxArena, BoxId, BoxKind, Handle};
use crate::types::{BoxType, FieldType, GroupType};

pub fn link(arena: &mut BoxArena) -> Result<()> {
    seed_root(arena);
    let handle_owner = build_handle_owner(arena);
    for id in arena.ids_reverse() {
        link_box(arena, id, &handle_owner)?;
    }
    Ok(())
}

/// `ScalarSubquery` Boxes sit outside the `over`/join-right/append-branch/
/// iterator chain that every other routing rule below relies on — they're
/// reached purely via a `HandleBound` reference buried in some other Box's
/// own scalar arguments.
/// `push_ref` below redirects straight to this map's target for exactly
/// that case; every other handle still resolves by walking `over` links
/// hop by hop until `unbind_here` strips it at the binding Box.
fn build_handle_owner(arena: &BoxArena) -> HashMap<Handle, BoxId> {
    let mut map = HashMap::new();
    for id in arena.ids_forward() {
        let h = arena.get(id).handle;
        if !h.is_none() && matches!(arena.get(id).kind, BoxKind::ScalarSubquery { .. }) {
            map.insert(h, id);
        }
    }
    map
}

/// One `Get` per scalar field of `row`, used to request a Box's full
/// projection from a consumer that doesn't itself name individual columns.
fn full_projection(row: &crate::types::RowType) -> Vec<AScalar> {
    row.fields
        .iter()
        .filter(|(_, t)| matches!(t, FieldType::Scalar))
        .map(|(name, _)| AScalar::Get(name.clone()))
        .collect()
}

fn seed_root(arena: &mut BoxArena) {
    let Some(root) = arena.root else { return };
    let row = arena.get(root).ty.row.clone();
    arena.get_mut(root).refs = full_projection(&row);
}

fn link_box(arena: &mut BoxArena, id: BoxId, handle_owner: &HashMap<Handle, BoxId>) -> Result<()> {
    let this_handle = arena.get(id).handle;
    let incoming: Vec<AScalar> = arena
        .get(id)
        .refs
        .drain(..)
        .map(|r| unbind_here(r, this_handle))
        .collect();
    arena.get_mut(id).refs = incoming.clone();

    let kind = arena.get(id).kind.clone();
    let ty = arena.get(id).ty.clone();
    let over = arena.get(id).over;

    match kind {
        BoxKind::FromTable { .. }
        | BoxKind::FromNothing
        | BoxKind::FromValues { .. }
        | BoxKind::FromReference { .. }
        | BoxKind::FromIterateSelf { .. } => {
            // Terminal: nothing downstream to feed.
        }

        BoxKind::Where { cond } => {
            let over = over.unwrap();
            push_all(arena, over, incoming, handle_owner);
            let gathered = gather(&cond, &ty)?;
            push_all(arena, over, gathered, handle_owner);
        }
        BoxKind::Order { by } => {
            let over = over.unwrap();
            push_all(arena, over, incoming, handle_owner);
            for e in &by {
                let gathered = gather(e, &ty)?;
                push_all(arena, over, gathered, handle_owner);
            }
        }
        BoxKind::Limit { .. } | BoxKind::Highlight { .. } => {
            push_all(arena, over.unwrap(), incoming, handle_owner);
        }
        BoxKind::With { ctes, .. } => {
            push_all(arena, over.unwrap(), incoming, handle_owner);
            for (_, body_id) in &ctes {
                let body_row = arena.get(*body_id).ty.row.clone();
                let seeded = full_projection(&body_row);
                push_all(arena, *body_id, seeded, handle_owner);
            }
        }
        BoxKind::IntBind { args, .. } => {
            let over = over.unwrap();
            for r in incoming {
                let bound = match &r {
                    AScalar::Get(name) => args.iter().find(|(n, _)| n == name),
                    _ => None,
                };
                match bound {
                    Some((_, e)) => {
                        let gathered = gather(e, &ty)?;
                        push_all(arena, over, gathered, handle_owner);
                    }
                    None => push_ref(arena, over, r, handle_owner),
                }
            }
        }

        BoxKind::Select { args } => {
            let over = over.unwrap();
            for (_, e) in &args {
                let gathered = gather(e, &ty)?;
                push_all(arena, over, gathered, handle_owner);
            }
        }
        BoxKind::Define { args } => {
            let over = over.unwrap();
            for r in incoming {
                let defined = match &r {
                    AScalar::Get(name) => args.iter().find(|(n, _)| n == name),
                    _ => None,
                };
                match defined {
                    Some((_, e)) => {
                        let gathered = gather(e, &ty)?;
                        push_all(arena, over, gathered, handle_owner);
                    }
                    None => push_ref(arena, over, r, handle_owner),
                }
            }
        }
        BoxKind::Group { by, .. } => {
            let over = over.unwrap();
            for (_, e) in &by {
                let gathered = gather(e, &ty)?;
                push_all(arena, over, gathered, handle_owner);
            }
            let over_ty = arena.get(over).ty.clone();
            for r in incoming {
                match &r {
                    AScalar::Agg(a) => {
                        let gathered = gather_agg_operands(a, &over_ty)?;
                        push_all(arena, over, gathered, handle_owner);
                    }
                    AScalar::Get(name) if by.iter().any(|(n, _)| n == name) => {}
                    _ => {
                        return Err(Error::reference(ReferenceError::UnexpectedAggregate));
                    }
                }
            }
        }
        BoxKind::Partition { by, order_by, .. } => {
            let over = over.unwrap();
            for e in &by {
                let gathered = gather(e, &ty)?;
                push_all(arena, over, gathered, handle_owner);
            }
            for e in &order_by {
                let gathered = gather(e, &ty)?;
                push_all(arena, over, gathered, handle_owner);
            }
            let over_ty = arena.get(over).ty.clone();
            for r in incoming {
                match &r {
                    AScalar::Agg(a) => {
                        let gathered = gather_agg_operands(a, &over_ty)?;
                        push_all(arena, over, gathered, handle_owner);
                    }
                    _ => push_ref(arena, over, r, handle_owner),
                }
            }
        }
        BoxKind::ExtendedJoin { right, on, .. } => {
            let left = over.unwrap();
            let left_ty = arena.get(left).ty.clone();
            let mut worklist = incoming;
            worklist.extend(gather(&on, &ty)?);

            let mut lateral = Vec::new();
            for r in worklist {
                if routes_left(&r, &left_ty) {
                    push_ref(arena, left, r, handle_owner);
                } else {
                    if let AScalar::HandleBound(_, h) = &r {
                        if matches!(left_ty.handles.get(h), Some(Some(_))) {
                            lateral.push(r.clone());
                        }
                    }
                    push_ref(arena, right, r, handle_owner);
                }
            }
            if let BoxKind::ExtendedJoin { lateral: slot, .. } = &mut arena.get_mut(id).kind {
                *slot = lateral;
            }
        }
        BoxKind::Append { branches } => {
            push_all(arena, over.unwrap(), incoming.clone(), handle_owner);
            for b in branches {
                push_all(arena, b, incoming.clone(), handle_owner);
            }
        }
        BoxKind::As { name } => {
            let over = over.unwrap();
            for r in incoming {
                match &r {
                    AScalar::NameBound(inner, n) if *n == name => {
                        push_ref(arena, over, (**inner).clone(), handle_owner);
                    }
                    AScalar::HandleBound(..) => push_ref(arena, over, r, handle_owner),
                    _ => return Err(Error::reference(ReferenceError::UndefinedName)),
                }
            }
        }
        BoxKind::IntIterate { iterator } => {
            let over = over.unwrap();
            push_all(arena, over, incoming.clone(), handle_owner);
            push_all(arena, iterator, incoming.clone(), handle_owner);
            let knot = find_knot(arena, iterator);
            push_all(arena, knot, incoming, handle_owner);
        }
        BoxKind::ScalarSubquery { inner } => {
            // `incoming` here is whatever survived `unbind_here` at this
            // exact Box — i.e. the unwrapped expression a consumer wanted
            // evaluated against this hoisted subquery's row. Refs that
            // arrived via the `handle_owner` redirect in `push_ref` land
            // here too, already pre-stripped.
            push_all(arena, inner, incoming, handle_owner);
        }
        BoxKind::Knot => {}
    }

    Ok(())
}

/// The `Knot` box always immediately precedes its iterator subtree, so
/// scanning backward from the iterator's own id finds it.
fn find_knot(arena: &BoxArena, iterator_id: BoxId) -> BoxId {
    for i in (0..=iterator_id.0).rev() {
        if matches!(arena.boxes[i].kind, BoxKind::Knot) {
            return BoxId(i);
        }
    }
    unreachable!("IntIterate always allocates its Knot before the iterator subtree")
}

/// Rewrites `HandleBound(inner, h)` back to plain `inner` at the Box whose
/// own handle is `h` — this is that handle's binding point, so the reference
/// is now scoped to the current row rather than a named target elsewhere.
fn unbind_here(r: AScalar, this_handle: Handle) -> AScalar {
    match r {
        AScalar::HandleBound(inner, h) if !this_handle.is_none() && h == this_handle => *inner,
        other => other,
    }
}

/// Pushes `r` onto `target`'s ref list, unless `r` is a `HandleBound`
/// targeting a `ScalarSubquery`'s handle — those aren't reachable by
/// continuing to hop through `over` links (see [`build_handle_owner`]), so
/// they're redirected straight to their binding Box instead, pre-stripped
/// exactly as `unbind_here` would do at that Box.
fn push_ref(arena: &mut BoxArena, target: BoxId, r: AScalar, handle_owner: &HashMap<Handle, BoxId>) {
    let (target, r) = match &r {
        AScalar::HandleBound(inner, h) => match handle_owner.get(h) {
            Some(&owner) => (owner, (**inner).clone()),
            None => (target, r),
        },
        _ => (target, r),
    };
    let refs = &mut arena.get_mut(target).refs;
    if !refs.contains(&r) {
        refs.push(r);
    }
}

fn push_all(arena: &mut BoxArena, target: BoxId, rs: Vec<AScalar>, handle_owner: &HashMap<Handle, BoxId>) {
    for r in rs {
        push_ref(arena, target, r, handle_owner);
    }
}

/// Decomposes `e` into its leaf references (`Get`/`Agg`/`HandleBound`/
/// `NameBound`) and validates each against `ty`.
fn gather(e: &AScalar, ty: &BoxType) -> Result<Vec<AScalar>> {
    let mut sink = Vec::new();
    decompose(e, &mut sink);
    for r in &sink {
        validate(r, ty)?;
    }
    Ok(sink)
}

/// An `Agg` appearing among a Group/Partition box's own incoming refs needs
/// its arguments (not itself) gathered against the pre-aggregation row.
fn gather_agg_operands(agg: &AAgg, pre_group_ty: &BoxType) -> Result<Vec<AScalar>> {
    let mut out = Vec::new();
    for arg in &agg.args {
        out.extend(gather(arg, pre_group_ty)?);
    }
    if let Some(f) = &agg.filter {
        out.extend(gather(f, pre_group_ty)?);
    }
    Ok(out)
}

fn decompose(e: &AScalar, sink: &mut Vec<AScalar>) {
    match e {
        AScalar::Lit(_) | AScalar::Var(_) => {}
        AScalar::Fun(f) => {
            for a in &f.args {
                decompose(a, sink);
            }
        }
        AScalar::Sort(inner, _, _) => decompose(inner, sink),
        AScalar::Get(_) | AScalar::Agg(_) | AScalar::HandleBound(..) | AScalar::NameBound(..) => {
            sink.push(e.clone())
        }
    }
}

fn validate(e: &AScalar, ty: &BoxType) -> Result<()> {
    match e {
        AScalar::Get(name) => match ty.row.get(name) {
            Some(FieldType::Scalar) => Ok(()),
            Some(FieldType::Row(_)) => Err(Error::reference(ReferenceError::UnexpectedRowType)),
            Some(FieldType::Ambiguous) => Err(Error::reference(ReferenceError::AmbiguousName)),
            None => Err(Error::reference(ReferenceError::UndefinedName)),
        },
        AScalar::NameBound(inner, name) => match ty.row.get(name) {
            Some(FieldType::Row(nested)) => {
                let nested_ty = BoxType {
                    name: None,
                    row: nested.clone(),
                    handles: ty.handles.clone(),
                };
                validate(inner, &nested_ty)
            }
            Some(FieldType::Scalar) => Err(Error::reference(ReferenceError::UnexpectedScalarType)),
            Some(FieldType::Ambiguous) => Err(Error::reference(ReferenceError::AmbiguousName)),
            None => Err(Error::reference(ReferenceError::UndefinedName)),
        },
        AScalar::Agg(_) => match &ty.row.group {
            GroupType::Row(_) => Ok(()),
            GroupType::Empty => Err(Error::reference(ReferenceError::UnexpectedAggregate)),
            GroupType::Ambiguous => Err(Error::reference(ReferenceError::AmbiguousAggregate)),
        },
        AScalar::HandleBound(inner, h) => match ty.handles.get(h) {
            Some(Some(row)) => {
                let nested_ty = BoxType {
                    name: None,
                    row: row.clone(),
                    handles: ty.handles.clone(),
                };
                validate(inner, &nested_ty)
            }
            Some(None) => Err(Error::reference(ReferenceError::AmbiguousHandle)),
            None => Err(Error::reference(ReferenceError::UndefinedHandle)),
        },
        AScalar::Fun(_) | AScalar::Sort(..) | AScalar::Lit(_) | AScalar::Var(_) => Ok(()),
    }
}

/// A stable, structurally-unique string key for a leaf reference, used by
/// Translate to match a reference against the column an upstream Box
/// produced for it.
pub(crate) fn label_of(r: &AScalar) -> String {
    match r {
        AScalar::Get(n) => format!("g:{n}"),
        AScalar::NameBound(inner, n) => format!("n:{n}.{}", label_of(inner)),
        AScalar::HandleBound(inner, h) => format!("h:{}.{}", h.0, label_of(inner)),
        AScalar::Agg(a) => format!(
            "a:{}:{}:{}",
            a.name,
            a.distinct,
            a.args.iter().map(label_of).collect::<Vec<_>>().join(",")
        ),
        AScalar::Fun(f) => format!("f:{}:{}", f.name, f.args.iter().map(label_of).collect::<Vec<_>>().join(",")),
        AScalar::Sort(inner, ..) => label_of(inner),
        AScalar::Lit(_) | AScalar::Var(_) => String::from("lit"),
    }
}

/// The innermost field/aggregate name a reference bottoms out at, used only
/// to pick a readable output alias.
pub(crate) fn leaf_name(r: &AScalar) -> &str {
    match r {
        AScalar::Get(n) => n,
        AScalar::NameBound(inner, _) => leaf_name(inner),
        AScalar::HandleBound(inner, _) => leaf_name(inner),
        AScalar::Agg(a) => &a.name,
        AScalar::Fun(_) => "expr",
        AScalar::Sort(inner, ..) => leaf_name(inner),
        AScalar::Lit(_) | AScalar::Var(_) => "value",
    }
}

/// A reference routes left if it resolves against the left side's own type;
/// otherwise it belongs to the right (joinee) side.
fn routes_left(r: &AScalar, left_ty: &BoxType) -> bool {
    match r {
        AScalar::HandleBound(_, h) => matches!(left_ty.handles.get(h), Some(Some(_))),
        AScalar::NameBound(_, name) => matches!(left_ty.row.get(name), Some(FieldType::Row(_))),
        AScalar::Get(name) => matches!(left_ty.row.get(name), Some(FieldType::Scalar)),
        _ => false,
    }
}
