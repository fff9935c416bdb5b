//! The three-pass intermediate representation pipeline:
//! Annotate builds the Box arena, Resolve infers row types bottom-up, Link
//! propagates live references top-down. Assemble (pass 4) lives in
//! [`crate::sql`], since it produces the SQL-facing [`crate::sql::clause`]
//! tree rather than anything the IR itself needs.

pub mod annotate;
pub mod link;
pub mod resolve;

pub use annotate::{BoxArena, BoxId, Handle, Path};

use crate::catalog::SQLCatalog;
use crate::error::Result;
use crate::node::Tabular;

/// Runs Annotate, Resolve, and Link in sequence, producing a fully-typed,
/// fully-linked [`BoxArena`] ready for [`crate::sql::translate`].
pub fn compile(root: &Tabular, catalog: &SQLCatalog) -> Result<BoxArena> {
    let mut arena = annotate::annotate(root)?;
    resolve::resolve(&mut arena, catalog)?;
    link::link(&mut arena)?;
    Ok(arena)
}
