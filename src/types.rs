//! Nominal type system for the query tree.
//!
//! A [`RowType`] is an ordered map from field name to either a scalar or a
//! nested row, plus an optional "group" projection reachable through
//! aggregates. [`BoxType`] additionally carries a name hint and the handle
//! map used to resolve `HandleBound` references.
//!
//! Laws every pass must maintain:
//! - intersection is field-wise on common names only,
//! - union is field-wise, recursing into nested rows, conflicting kinds
//!   becoming [`FieldType::Ambiguous`],
//! - subset is reflexive and transitive and visibility-monotone.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ir::annotate::Handle;

/// One field of a [`RowType`]: either a plain scalar, a nested row, or (after
/// a union of conflicting kinds) ambiguous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, enum_as_inner::EnumAsInner)]
pub enum FieldType {
    Scalar,
    Row(RowType),
    Ambiguous,
}

/// The "group" a row type exposes to aggregates: `Empty` (no `Agg` legal),
/// a concrete pre-aggregation row (`Agg` legal, gathers from this row), or
/// `Ambiguous` (multiple candidate groups collided).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GroupType {
    Empty,
    Row(Box<RowType>),
    Ambiguous,
}

/// An ordered tuple of named scalar/row fields plus an optional group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RowType {
    /// Order matters: it is the order columns are rendered in `SELECT *`.
    pub fields: Vec<(String, FieldType)>,
    pub group: GroupType,
}

impl Default for GroupType {
    fn default() -> Self {
        GroupType::Empty
    }
}

impl RowType {
    pub fn empty() -> Self {
        RowType {
            fields: Vec::new(),
            group: GroupType::Empty,
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldType> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn with_field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.set_field(name.into(), ty);
        self
    }

    /// Overwrites a field if present (in place), otherwise appends it.
    pub fn set_field(&mut self, name: String, ty: FieldType) {
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = ty;
        } else {
            self.fields.push((name, ty));
        }
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    /// Field-wise intersection on common names only.
    pub fn intersect(&self, other: &RowType) -> RowType {
        let mut fields = Vec::new();
        for (name, ty) in &self.fields {
            if let Some(other_ty) = other.get(name) {
                fields.push((name.clone(), intersect_field(ty, other_ty)));
            }
        }
        RowType {
            fields,
            group: GroupType::Empty,
        }
    }

    /// Field-wise union; nested rows recurse, conflicting kinds -> Ambiguous.
    pub fn union(&self, other: &RowType) -> RowType {
        let mut fields: Vec<(String, FieldType)> = self.fields.clone();
        for (name, other_ty) in &other.fields {
            if let Some(slot) = fields.iter_mut().find(|(n, _)| n == name) {
                slot.1 = union_field(&slot.1, other_ty);
            } else {
                fields.push((name.clone(), other_ty.clone()));
            }
        }
        RowType {
            fields,
            group: GroupType::Empty,
        }
    }

    /// `self ⊆ other` iff every field of `self` is present in `other` with a
    /// subtype. Reflexive and transitive.
    pub fn is_subset_of(&self, other: &RowType) -> bool {
        self.fields.iter().all(|(name, ty)| match other.get(name) {
            Some(other_ty) => field_is_subset(ty, other_ty),
            None => false,
        })
    }
}

fn intersect_field(a: &FieldType, b: &FieldType) -> FieldType {
    match (a, b) {
        (FieldType::Row(a), FieldType::Row(b)) => FieldType::Row(a.intersect(b)),
        (FieldType::Scalar, FieldType::Scalar) => FieldType::Scalar,
        _ => FieldType::Ambiguous,
    }
}

fn union_field(a: &FieldType, b: &FieldType) -> FieldType {
    match (a, b) {
        (FieldType::Row(a), FieldType::Row(b)) => FieldType::Row(a.union(b)),
        (FieldType::Scalar, FieldType::Scalar) => FieldType::Scalar,
        _ => FieldType::Ambiguous,
    }
}

fn field_is_subset(a: &FieldType, b: &FieldType) -> bool {
    match (a, b) {
        (FieldType::Scalar, FieldType::Scalar) => true,
        (FieldType::Row(a), FieldType::Row(b)) => a.is_subset_of(b),
        (FieldType::Ambiguous, FieldType::Ambiguous) => true,
        _ => false,
    }
}

/// The type resolved for a [`crate::ir::annotate::BoxNode`]: a name hint, a
/// row type, and the handle map used to validate `HandleBound` references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BoxType {
    pub name: Option<String>,
    pub row: RowType,
    /// handle -> the row type visible at that handle's binding Box, or
    /// `None` once it has become ambiguous (multiple distinct bindings).
    pub handles: BTreeMap<Handle, Option<RowType>>,
}

impl BoxType {
    pub fn empty() -> Self {
        BoxType::default()
    }

    pub fn named(name: impl Into<String>, row: RowType) -> Self {
        BoxType {
            name: Some(name.into()),
            row,
            handles: BTreeMap::new(),
        }
    }

    /// Adds (or merges, if already present) the row type visible under
    /// `handle`. A second, differing binding makes the handle ambiguous.
    pub fn add_handle(mut self, handle: Handle, row: Option<RowType>) -> Self {
        if handle.is_none() {
            return self;
        }
        match (self.handles.get(&handle), row) {
            (None, new) => {
                self.handles.insert(handle, new);
            }
            (Some(Some(existing)), Some(new)) if existing != &new => {
                self.handles.insert(handle, None);
            }
            _ => {}
        }
        self
    }

    pub fn merge_handles(mut self, other: &BoxType) -> Self {
        for (h, row) in &other.handles {
            self = self.add_handle(*h, row.clone());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fields: &[&str]) -> RowType {
        fields.iter().fold(RowType::empty(), |r, f| r.with_field(*f, FieldType::Scalar))
    }

    #[test]
    fn subset_is_reflexive() {
        let r = row(&["a", "b", "c"]);
        assert!(r.is_subset_of(&r));
    }

    #[test]
    fn subset_is_transitive() {
        let r1 = row(&["a"]);
        let r2 = row(&["a", "b"]);
        let r3 = row(&["a", "b", "c"]);
        assert!(r1.is_subset_of(&r2));
        assert!(r2.is_subset_of(&r3));
        assert!(r1.is_subset_of(&r3));
    }

    #[test]
    fn subset_fails_for_missing_field() {
        let r1 = row(&["a", "d"]);
        let r2 = row(&["a", "b", "c"]);
        assert!(!r1.is_subset_of(&r2));
    }

    #[test]
    fn union_is_superset_of_both_operands() {
        let r1 = row(&["a", "b"]);
        let r2 = row(&["b", "c"]);
        let u = r1.union(&r2);
        assert!(r1.is_subset_of(&u));
        assert!(r2.is_subset_of(&u));
    }

    #[test]
    fn intersect_is_subset_of_both_operands() {
        let r1 = row(&["a", "b"]);
        let r2 = row(&["b", "c"]);
        let i = r1.intersect(&r2);
        assert!(i.is_subset_of(&r1));
        assert!(i.is_subset_of(&r2));
        assert_eq!(i.field_names().collect::<Vec<_>>(), vec!["b"]);
    }
}
