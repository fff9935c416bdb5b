//! Scalar node variants: `Get`, `Fun`, `Agg`, `Var`, `Lit`, plus `Sort` and
//! `As` which only ever appear in scalar argument position.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use super::tabular::Tabular;

pub type ScalarRef = Rc<Scalar>;

/// What a `Get` (or a `HandleBound`/`NameBound` produced by annotate) chains
/// onto: nothing (current row), another scalar (nested field access), or a
/// tabular node (a scoped reference to some other position in the tree).
#[derive(Debug, Clone, Serialize, Deserialize, enum_as_inner::EnumAsInner)]
pub enum Over {
    None,
    Scalar(ScalarRef),
    Tabular(Tabular),
}

impl Default for Over {
    fn default() -> Self {
        Over::None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Scalar {
    /// A dotted path starting at the current row, or at `over` when present.
    Get(Get),
    Fun(Fun),
    Agg(Agg),
    Lit(Lit),
    Var(Var),
    Sort(Sort),
    As(ScalarAs),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Get {
    pub name: String,
    #[serde(default)]
    pub over: Over,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fun {
    pub name: String,
    pub args: Vec<ScalarRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agg {
    pub name: String,
    pub args: Vec<ScalarRef>,
    pub filter: Option<ScalarRef>,
    #[serde(default)]
    pub distinct: bool,
    #[serde(default)]
    pub over: Over,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Lit {
    Null,
    Bool(bool),
    Int(i64),
    Float(String),
    Text(String),
    /// ISO-8601 date/time/timestamp literal, kept as text and rendered
    /// verbatim per-dialect.
    DateTime(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Var {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Nulls {
    First,
    Last,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sort {
    pub value: ScalarRef,
    pub direction: SortDirection,
    pub nulls: Option<Nulls>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalarAs {
    pub name: String,
    pub value: ScalarRef,
}

impl Scalar {
    pub fn get(name: impl Into<String>) -> ScalarRef {
        Rc::new(Scalar::Get(Get {
            name: name.into(),
            over: Over::None,
        }))
    }

    /// `self.get(name)`: nested field access, chaining onto `self`.
    pub fn nested_get(self: &ScalarRef, name: impl Into<String>) -> ScalarRef {
        Rc::new(Scalar::Get(Get {
            name: name.into(),
            over: Over::Scalar(self.clone()),
        }))
    }

    /// A reference to `name` scoped to `over` (some other tabular node in
    /// the tree); annotate will allocate a handle for `over`.
    pub fn get_from(over: &Tabular, name: impl Into<String>) -> ScalarRef {
        Rc::new(Scalar::Get(Get {
            name: name.into(),
            over: Over::Tabular(over.clone()),
        }))
    }

    pub fn fun(name: impl Into<String>, args: Vec<ScalarRef>) -> ScalarRef {
        Rc::new(Scalar::Fun(Fun {
            name: name.into(),
            args,
        }))
    }

    pub fn agg(name: impl Into<String>, args: Vec<ScalarRef>) -> ScalarRef {
        Rc::new(Scalar::Agg(Agg {
            name: name.into(),
            args,
            filter: None,
            distinct: false,
            over: Over::None,
        }))
    }

    pub fn lit(value: Lit) -> ScalarRef {
        Rc::new(Scalar::Lit(value))
    }

    pub fn var(name: impl Into<String>) -> ScalarRef {
        Rc::new(Scalar::Var(Var { name: name.into() }))
    }

    pub fn as_(self: &ScalarRef, name: impl Into<String>) -> ScalarRef {
        Rc::new(Scalar::As(ScalarAs {
            name: name.into(),
            value: self.clone(),
        }))
    }

    /// Strips a trailing `As` wrapper, if any, returning the inner value and
    /// the name it was labelled with.
    pub fn strip_as(self: &ScalarRef) -> (&ScalarRef, Option<&str>) {
        match self.as_ref() {
            Scalar::As(a) => (&a.value, Some(a.name.as_str())),
            _ => (self, None),
        }
    }
}
