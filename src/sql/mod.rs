//! The SQL-facing half of the compiler: the [`clause`] tree, the
//! [`translate`] pass that builds it, and the [`serializer`] that turns it
//! into text.

pub mod clause;
pub mod serializer;
pub mod translate;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::catalog::{SQLCatalog, SQLColumn, SQLTable};
use crate::dialect::Dialect;
use crate::error::{Error, ErrorKind, Result};
use crate::node::Tabular;

/// Per-call overrides of what the catalog would otherwise decide;
/// everything defaults to the catalog's own settings.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Overrides `catalog.dialect` for this one render.
    pub dialect: Option<Dialect>,
}

/// The rendered SQL text, its bound-variable list, and its output shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SQLString {
    pub raw: String,
    /// One entry per placeholder occurrence, in emission order; `pack`
    /// turns this into a positional argument list.
    pub vars: Vec<String>,
    pub shape: SQLTable,
}

/// The main entry point: runs Annotate, Resolve, Link, and Translate, then
/// serializes under the catalog's own dialect.
pub fn render(node: &Tabular, catalog: &SQLCatalog) -> Result<SQLString> {
    render_with(node, catalog, &Options::default())
}

/// As [`render`], but lets the caller override dialect-level settings for
/// this one call without touching the shared catalog.
pub fn render_with(node: &Tabular, catalog: &SQLCatalog, options: &Options) -> Result<SQLString> {
    let dialect = options.dialect.unwrap_or(catalog.dialect);
    if let Some(cached) = catalog.cached_render(node, dialect) {
        return serde_json::from_str(&cached)
            .map_err(|e| Error::bug(format!("corrupt render cache entry: {e}")));
    }

    let arena = crate::ir::compile(node, catalog)?;
    let (clause, order) = translate::translate(&arena, catalog)?;
    let (raw, vars) = serializer::render(&clause, dialect);
    let shape = SQLTable {
        qualifiers: Vec::new(),
        name: "result".to_string(),
        columns: order.into_iter().map(SQLColumn::new).collect(),
        metadata: HashMap::new(),
    };
    let result = SQLString { raw, vars, shape };

    if let Ok(serialized) = serde_json::to_string(&result) {
        catalog.store_render(node, dialect, serialized);
    }
    Ok(result)
}

/// Converts a named-parameter map into the ordered positional list the
/// placeholders in `s.raw` expect, repeating a value once per occurrence of
/// its name in `s.vars`.
pub fn pack(s: &SQLString, params: &HashMap<String, serde_json::Value>) -> Result<Vec<serde_json::Value>> {
    s.vars
        .iter()
        .map(|name| {
            params
                .get(name)
                .cloned()
                .ok_or_else(|| Error::simple(ErrorKind::IllFormed, format!("missing value for parameter `{name}`")))
        })
        .collect()
}
