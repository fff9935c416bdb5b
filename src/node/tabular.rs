//! Tabular node variants. Every variant optionally chains on an upstream
//! tabular node via `over`; `From` is always the base of a chain.
//!
//! A "labelled arg list" (used by `Select`/`Define`/`Group`/`With`/`Bind`) is
//! represented as `Vec<(Option<String>, ScalarRef)>`: an explicit label when
//! the host gave one (`:max_dt => ...`), or `None` when the column's own
//! name should be used (derived at annotate time from a trailing `Get`).

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use super::scalar::ScalarRef;

pub type Args = Vec<(Option<String>, ScalarRef)>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Tabular {
    From(Rc<From>),
    Where(Rc<Where>),
    Select(Rc<Select>),
    Define(Rc<Define>),
    Group(Rc<Group>),
    Partition(Rc<Partition>),
    Join(Rc<Join>),
    Append(Rc<Append>),
    Order(Rc<Order>),
    Limit(Rc<Limit>),
    As(Rc<As>),
    Bind(Rc<Bind>),
    Iterate(Rc<Iterate>),
    With(Rc<With>),
    Highlight(Rc<Highlight>),
    /// Wraps a scalar subquery position so a tabular node can be re-entered
    /// in scalar context. `arg` is the inner tabular query; the node
    /// produces a single value (its first exposed column) when used in
    /// scalar position, e.g. as the operand of a correlated `EXISTS`/`IN`.
    Over(Rc<Over>),
}

/// What a `From` reads from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FromSource {
    Table(TableRef),
    /// A reference to a CTE by name, bound by an enclosing `With`.
    Symbol(String),
    /// The recursive self-reference inside an `Iterate`'s iterator branch.
    IterateSelf,
    Values(Values),
    Nothing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRef {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Values {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<crate::node::scalar::Lit>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct From {
    pub source: FromSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Where {
    pub over: Tabular,
    pub cond: ScalarRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Select {
    pub over: Tabular,
    pub args: Args,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Define {
    pub over: Tabular,
    pub args: Args,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GroupingSet {
    /// All keys, by index into `Group::by`.
    Keys(Vec<usize>),
    Rollup(Vec<usize>),
    Cube(Vec<usize>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub over: Tabular,
    pub by: Args,
    pub sets: Option<Vec<GroupingSet>>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    Rows,
    Range,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FrameBound {
    UnboundedPreceding,
    Preceding(ScalarRef),
    CurrentRow,
    Following(ScalarRef),
    UnboundedFollowing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub kind: FrameKind,
    pub start: FrameBound,
    pub end: FrameBound,
}

impl Default for Frame {
    fn default() -> Self {
        Frame {
            kind: FrameKind::Rows,
            start: FrameBound::UnboundedPreceding,
            end: FrameBound::CurrentRow,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partition {
    pub over: Tabular,
    pub by: Vec<ScalarRef>,
    pub order_by: Vec<ScalarRef>,
    pub frame: Frame,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Join {
    pub left: Tabular,
    pub joinee: Tabular,
    pub on: ScalarRef,
    pub is_left: bool,
    pub is_right: bool,
    pub optional: bool,
}

impl Join {
    pub fn kind(&self) -> JoinKind {
        match (self.is_left, self.is_right) {
            (true, true) => JoinKind::Full,
            (true, false) => JoinKind::Left,
            (false, true) => JoinKind::Right,
            (false, false) => JoinKind::Inner,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Append {
    pub over: Tabular,
    pub args: Vec<Tabular>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub over: Tabular,
    pub by: Vec<ScalarRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limit {
    pub over: Tabular,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct As {
    pub over: Tabular,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bind {
    pub over: Tabular,
    pub args: Args,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iterate {
    pub over: Tabular,
    /// References `FromSource::IterateSelf` internally.
    pub iterator: Tabular,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct With {
    pub over: Tabular,
    /// CTE name -> its body.
    pub args: Vec<(String, Tabular)>,
    pub materialized: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Highlight {
    pub over: Tabular,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Over {
    pub arg: Tabular,
}

impl Tabular {
    pub fn from_table(name: impl Into<String>) -> Tabular {
        Tabular::From(Rc::new(From {
            source: FromSource::Table(TableRef { name: name.into() }),
        }))
    }

    pub fn from_symbol(name: impl Into<String>) -> Tabular {
        Tabular::From(Rc::new(From {
            source: FromSource::Symbol(name.into()),
        }))
    }

    pub fn from_nothing() -> Tabular {
        Tabular::From(Rc::new(From {
            source: FromSource::Nothing,
        }))
    }

    pub fn from_values(columns: Vec<String>, rows: Vec<Vec<crate::node::scalar::Lit>>) -> Tabular {
        Tabular::From(Rc::new(From {
            source: FromSource::Values(Values { columns, rows }),
        }))
    }

    /// The recursive self-reference used inside an `Iterate`'s `iterator`
    /// branch.
    pub fn iterate_self() -> Tabular {
        Tabular::From(Rc::new(From {
            source: FromSource::IterateSelf,
        }))
    }

    pub fn where_(self, cond: ScalarRef) -> Tabular {
        Tabular::Where(Rc::new(Where { over: self, cond }))
    }

    pub fn select(self, args: Args) -> Tabular {
        Tabular::Select(Rc::new(Select { over: self, args }))
    }

    pub fn define(self, args: Args) -> Tabular {
        Tabular::Define(Rc::new(Define { over: self, args }))
    }

    pub fn group(self, by: Args, name: Option<String>) -> Tabular {
        Tabular::Group(Rc::new(Group {
            over: self,
            by,
            sets: None,
            name,
        }))
    }

    pub fn partition(self, by: Vec<ScalarRef>, order_by: Vec<ScalarRef>, name: Option<String>) -> Tabular {
        Tabular::Partition(Rc::new(Partition {
            over: self,
            by,
            order_by,
            frame: Frame::default(),
            name,
        }))
    }

    pub fn join(self, joinee: Tabular, on: ScalarRef, is_left: bool, is_right: bool) -> Tabular {
        Tabular::Join(Rc::new(Join {
            left: self,
            joinee,
            on,
            is_left,
            is_right,
            optional: is_left || is_right,
        }))
    }

    pub fn append(self, branches: Vec<Tabular>) -> Tabular {
        Tabular::Append(Rc::new(Append {
            over: self,
            args: branches,
        }))
    }

    pub fn order(self, by: Vec<ScalarRef>) -> Tabular {
        Tabular::Order(Rc::new(Order { over: self, by }))
    }

    pub fn limit(self, offset: Option<i64>, limit: Option<i64>) -> Tabular {
        Tabular::Limit(Rc::new(Limit {
            over: self,
            offset,
            limit,
        }))
    }

    pub fn as_(self, name: impl Into<String>) -> Tabular {
        Tabular::As(Rc::new(As {
            over: self,
            name: name.into(),
        }))
    }

    pub fn bind(self, args: Args) -> Tabular {
        Tabular::Bind(Rc::new(Bind { over: self, args }))
    }

    pub fn with(self, args: Vec<(String, Tabular)>, materialized: Option<bool>) -> Tabular {
        Tabular::With(Rc::new(With {
            over: self,
            args,
            materialized,
        }))
    }

    pub fn highlight(self, color: impl Into<String>) -> Tabular {
        Tabular::Highlight(Rc::new(Highlight {
            over: self,
            color: color.into(),
        }))
    }

    /// `self` is the base case, `iterator` is the recursive step, built
    /// against a tree containing [`Tabular::iterate_self`] where it
    /// re-enters the knot.
    pub fn iterate(self, iterator: Tabular) -> Tabular {
        Tabular::Iterate(Rc::new(Iterate { over: self, iterator }))
    }

    /// Re-enters `self` in scalar position: the produced value is `self`'s
    /// single exposed column. Reference it from a scalar expression via
    /// [`crate::node::scalar::Scalar::get_from`].
    pub fn scalar_subquery(self) -> Tabular {
        Tabular::Over(Rc::new(Over { arg: self }))
    }

    /// Returns the node this one directly chains onto, if any. `From` is a
    /// terminal: it has no `over`.
    pub fn over(&self) -> Option<&Tabular> {
        match self {
            Tabular::From(_) => None,
            Tabular::Where(n) => Some(&n.over),
            Tabular::Select(n) => Some(&n.over),
            Tabular::Define(n) => Some(&n.over),
            Tabular::Group(n) => Some(&n.over),
            Tabular::Partition(n) => Some(&n.over),
            Tabular::Join(n) => Some(&n.left),
            Tabular::Append(n) => Some(&n.over),
            Tabular::Order(n) => Some(&n.over),
            Tabular::Limit(n) => Some(&n.over),
            Tabular::As(n) => Some(&n.over),
            Tabular::Bind(n) => Some(&n.over),
            Tabular::Iterate(n) => Some(&n.over),
            Tabular::With(n) => Some(&n.over),
            Tabular::Highlight(n) => Some(&n.over),
            Tabular::Over(_) => None,
        }
    }

    /// Rebases a chain built on an explicit open base (see
    /// [Tabular::from_nothing]): walks down to that `FromSource::Nothing`
    /// leaf and replaces it with `new_base`. Fails with
    /// [crate::error::ErrorKind::Rebase] if `self` bottoms out at any other
    /// terminal (a concrete `From`, or a multi-branch node like `Join`),
    /// since there is no single open slot to splice `new_base` into.
    pub fn rebase(&self, new_base: Tabular) -> crate::error::Result<Tabular> {
        use crate::error::{Error, ErrorKind};
        match self {
            Tabular::From(f) if matches!(f.source, FromSource::Nothing) => Ok(new_base),
            Tabular::From(_) => Err(Error::simple(ErrorKind::Rebase, "cannot rebase a terminal From node")),
            Tabular::Where(n) => Ok(Tabular::Where(Rc::new(Where {
                over: n.over.rebase(new_base)?,
                cond: n.cond.clone(),
            }))),
            Tabular::Select(n) => Ok(Tabular::Select(Rc::new(Select {
                over: n.over.rebase(new_base)?,
                args: n.args.clone(),
            }))),
            Tabular::Define(n) => Ok(Tabular::Define(Rc::new(Define {
                over: n.over.rebase(new_base)?,
                args: n.args.clone(),
            }))),
            Tabular::Group(n) => Ok(Tabular::Group(Rc::new(Group {
                over: n.over.rebase(new_base)?,
                by: n.by.clone(),
                sets: n.sets.clone(),
                name: n.name.clone(),
            }))),
            Tabular::Partition(n) => Ok(Tabular::Partition(Rc::new(Partition {
                over: n.over.rebase(new_base)?,
                by: n.by.clone(),
                order_by: n.order_by.clone(),
                frame: n.frame.clone(),
                name: n.name.clone(),
            }))),
            Tabular::Order(n) => Ok(Tabular::Order(Rc::new(Order {
                over: n.over.rebase(new_base)?,
                by: n.by.clone(),
            }))),
            Tabular::Limit(n) => Ok(Tabular::Limit(Rc::new(Limit {
                over: n.over.rebase(new_base)?,
                offset: n.offset,
                limit: n.limit,
            }))),
            Tabular::As(n) => Ok(Tabular::As(Rc::new(As {
                over: n.over.rebase(new_base)?,
                name: n.name.clone(),
            }))),
            Tabular::Bind(n) => Ok(Tabular::Bind(Rc::new(Bind {
                over: n.over.rebase(new_base)?,
                args: n.args.clone(),
            }))),
            Tabular::Highlight(n) => Ok(Tabular::Highlight(Rc::new(Highlight {
                over: n.over.rebase(new_base)?,
                color: n.color.clone(),
            }))),
            Tabular::Join(_) | Tabular::Append(_) | Tabular::Iterate(_) | Tabular::With(_) | Tabular::Over(_) => {
                Err(Error::simple(
                    ErrorKind::Rebase,
                    "this node kind does not support rebase",
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::scalar::Scalar;

    #[test]
    fn rebase_splices_new_base_into_open_slot() {
        let chain = Tabular::from_nothing().where_(Scalar::get("active"));
        let rebased = chain.rebase(Tabular::from_table("person")).unwrap();
        match rebased {
            Tabular::Where(w) => assert!(matches!(&w.over, Tabular::From(f) if matches!(f.source, FromSource::Table(_)))),
            other => panic!("expected a Where node, got {other:?}"),
        }
    }

    #[test]
    fn rebase_fails_on_a_concrete_terminal() {
        let chain = Tabular::from_table("person").where_(Scalar::get("active"));
        assert!(chain.rebase(Tabular::from_table("location")).is_err());
    }

    #[test]
    fn rebase_fails_on_a_multi_branch_node() {
        let joined = Tabular::from_nothing().join(
            Tabular::from_table("location"),
            Scalar::get("location_id"),
            false,
            false,
        );
        assert!(joined.rebase(Tabular::from_table("person")).is_err());
    }
}
