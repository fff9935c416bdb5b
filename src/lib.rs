//! A compositional SQL query builder: a tree of semantic relational
//! operators compiled, through a four-pass pipeline (Annotate, Resolve,
//! Link, Translate), into dialect-specific SQL text plus an ordered list of
//! bound variable names.
//!
//! ```text
//! Tabular tree --Annotate--> BoxArena --Resolve--> (typed) --Link--> (linked) --Translate--> Clause --Serializer--> SQL
//! ```

pub mod catalog;
pub mod dialect;
pub mod error;
pub mod ir;
pub mod node;
pub mod pattern;
pub mod sql;
pub mod types;
mod utils;

pub use catalog::{SQLCatalog, SQLColumn, SQLTable};
pub use dialect::Dialect;
pub use error::{Error, ErrorKind, ReferenceError, Result};
pub use node::{Scalar, ScalarRef, Tabular};
pub use sql::{pack, render, render_with, Options, SQLString};
