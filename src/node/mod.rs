//! The user-facing node tree.
//!
//! Two kinds of node: tabular (produces rows) and scalar (produces a
//! value). Both are immutable and reference-counted so that the same
//! subtree can be shared across multiple parents (e.g. a `with_nodes` CTE
//! referenced from several `From(Symbol)` positions).

pub mod scalar;
pub mod tabular;

pub use scalar::{Agg, Fun, Get, Lit, Nulls, Over as ScalarOver, Scalar, ScalarRef, Sort, SortDirection, Var};
pub use tabular::{
    Append, As, Bind, Define, Frame, FrameBound, FrameKind, From, FromSource, Group, GroupingSet,
    Highlight, Iterate, Join, JoinKind, Limit, Order, Over, Partition, Select, Tabular, TableRef,
    Values, Where, With,
};
