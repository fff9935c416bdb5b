//! Catalog entities.
//!
//! Catalog entities are immutable after construction and shared by
//! reference. Actually reflecting `information_schema` against a live
//! connection is an external collaborator's job — this module only holds
//! the in-memory result of such reflection, plus a bounded rendering cache.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;
use crate::node::Tabular;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SQLColumn {
    pub name: String,
    pub metadata: HashMap<String, String>,
}

impl SQLColumn {
    pub fn new(name: impl Into<String>) -> Self {
        SQLColumn {
            name: name.into(),
            metadata: HashMap::new(),
        }
    }
}

/// A catalog table: an ordered qualifier path (schema/database segments), a
/// name, and an ordered map of its columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SQLTable {
    pub qualifiers: Vec<String>,
    pub name: String,
    /// Order matters: it is the order columns appear in `SELECT *`.
    pub columns: Vec<SQLColumn>,
    pub metadata: HashMap<String, String>,
}

impl SQLTable {
    pub fn new(name: impl Into<String>, columns: Vec<&str>) -> Self {
        SQLTable {
            qualifiers: Vec::new(),
            name: name.into(),
            columns: columns.into_iter().map(SQLColumn::new).collect(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_qualifiers(mut self, qualifiers: Vec<String>) -> Self {
        self.qualifiers = qualifiers;
        self
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// The dotted, qualifier-prefixed name used in `FROM`/`JOIN` clauses.
    pub fn qualified_name(&self) -> String {
        let mut parts = self.qualifiers.clone();
        parts.push(self.name.clone());
        parts.join(".")
    }
}

/// A simple capacity-bounded LRU: least-recently-used eviction, behind a
/// single [`Mutex`]. No invariant relies on exactly-once compilation, so a
/// bounded cache with an internal mutex is sufficient; hand-rolled rather
/// than pulling in a crate for it, in keeping with the small hand-rolled
/// `IdGenerator`/`NameGenerator` helpers elsewhere in this crate.
#[derive(Debug)]
struct RenderCache {
    capacity: usize,
    order: VecDeque<u64>,
    entries: HashMap<u64, String>,
}

impl RenderCache {
    fn new(capacity: usize) -> Self {
        RenderCache {
            capacity,
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    fn get(&mut self, key: u64) -> Option<String> {
        if let Some(v) = self.entries.get(&key).cloned() {
            self.order.retain(|k| *k != key);
            self.order.push_back(key);
            Some(v)
        } else {
            None
        }
    }

    fn put(&mut self, key: u64, value: String) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(key, value).is_none() {
            self.order.push_back(key);
        } else {
            self.order.retain(|k| *k != key);
            self.order.push_back(key);
        }
        while self.entries.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }
}

/// `SQLCatalog` = (map name->Table, dialect, optional bounded LRU from node
/// tree -> rendered SQL string, metadata).
#[derive(Debug)]
pub struct SQLCatalog {
    pub dialect: Dialect,
    tables: HashMap<String, SQLTable>,
    pub metadata: HashMap<String, String>,
    cache: Option<Mutex<RenderCache>>,
}

impl SQLCatalog {
    pub fn new(dialect: Dialect) -> Self {
        SQLCatalog {
            dialect,
            tables: HashMap::new(),
            metadata: HashMap::new(),
            cache: None,
        }
    }

    /// Enables the render cache with the given capacity (`0` disables it).
    pub fn with_cache(mut self, capacity: usize) -> Self {
        self.cache = Some(Mutex::new(RenderCache::new(capacity)));
        self
    }

    pub fn with_table(mut self, table: SQLTable) -> Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    pub fn table(&self, name: &str) -> Option<&SQLTable> {
        self.tables.get(name)
    }

    /// Keyed by the original node tree's structural identity and the
    /// *effective* dialect it was (or would be) rendered under — not
    /// necessarily `self.dialect`, since `render_with`'s `Options` can
    /// override it per call. We don't have reference-equality for an
    /// immutable, potentially-rebuilt tree, so we hash its `Debug`
    /// rendering; this is sufficient for "equal trees hit the cache"
    /// (handle idempotence) without requiring callers to keep the exact
    /// same `Rc` around.
    fn cache_key(node: &Tabular, dialect: Dialect) -> u64 {
        let mut hasher = DefaultHasher::new();
        format!("{node:?}").hash(&mut hasher);
        dialect.hash(&mut hasher);
        hasher.finish()
    }

    pub fn cached_render(&self, node: &Tabular, dialect: Dialect) -> Option<String> {
        let cache = self.cache.as_ref()?;
        let key = Self::cache_key(node, dialect);
        let mut guard = cache.lock().expect("render cache mutex poisoned");
        let hit = guard.get(key);
        if hit.is_some() {
            log::trace!("catalog render cache hit");
        }
        hit
    }

    pub fn store_render(&self, node: &Tabular, dialect: Dialect, sql: String) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        let key = Self::cache_key(node, dialect);
        cache
            .lock()
            .expect("render cache mutex poisoned")
            .put(key, sql);
    }
}
