//! Error types produced by the compiler.
//!
//! Mirrors the shape of a structured compiler diagnostic: a [`Reason`] plus
//! an optional [`Path`] back to the offending node in the *original*,
//! user-supplied tree (not the annotated one), plus a handful of hints.

use std::fmt;

use serde::Serialize;

use crate::ir::annotate::Path;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A single compiler error.
#[derive(Debug, Clone, Serialize)]
pub struct Error {
    pub kind: ErrorKind,
    pub reason: Reason,
    pub path: Option<Path>,
    pub hints: Vec<String>,
}

/// Which stage raised the error. Used only for grouping/filtering; the
/// [`Reason`] carries the actual message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// A scalar node appeared in tabular position, or vice versa.
    IllFormed,
    /// Two outputs of the same `Select`/`Define`/`Group`/`With` share a name.
    DuplicateLabel,
    /// A known function/aggregate was called with the wrong number of args.
    InvalidArity,
    /// A reference failed to resolve or validate against a `BoxType`.
    Reference(ReferenceError),
    /// A grouping-set position names a missing key or an out-of-range index.
    InvalidGroupingSets,
    /// A terminal tabular node (e.g. `From`) was chained onto another node.
    Rebase,
}

/// The specific reference-validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceError {
    UndefinedName,
    UnexpectedRowType,
    UnexpectedScalarType,
    UnexpectedAggregate,
    AmbiguousName,
    AmbiguousHandle,
    AmbiguousAggregate,
    UndefinedHandle,
    UndefinedTableReference,
    InvalidTableReference,
    InvalidSelfReference,
}

#[derive(Debug, Clone, Serialize)]
pub enum Reason {
    Simple(String),
    NotFound { name: String, namespace: &'static str },
    Bug { details: String },
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Simple(text) => f.write_str(text),
            Reason::NotFound { name, namespace } => {
                write!(f, "{namespace} `{name}` not found")
            }
            Reason::Bug { details } => write!(f, "internal compiler error: {details}"),
        }
    }
}

impl Error {
    pub fn new(kind: ErrorKind, reason: Reason) -> Self {
        Error {
            kind,
            reason,
            path: None,
            hints: Vec::new(),
        }
    }

    pub fn simple<S: ToString>(kind: ErrorKind, reason: S) -> Self {
        Error::new(kind, Reason::Simple(reason.to_string()))
    }

    pub fn reference(kind: ReferenceError) -> Self {
        Error::new(ErrorKind::Reference(kind), Reason::Simple(kind.to_string()))
    }

    pub fn bug<S: ToString>(details: S) -> Self {
        Error::new(
            ErrorKind::IllFormed,
            Reason::Bug {
                details: details.to_string(),
            },
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.reason)?;
        for hint in &self.hints {
            write!(f, "\n  hint: {hint}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// Attaches contextual information to an `Err` without an intermediate
/// `match`.
pub trait WithErrorInfo: Sized {
    fn with_path(self, path: Path) -> Self;
    fn push_hint<S: Into<String>>(self, hint: S) -> Self;
}

impl WithErrorInfo for Error {
    fn with_path(mut self, path: Path) -> Self {
        self.path = Some(path);
        self
    }

    fn push_hint<S: Into<String>>(mut self, hint: S) -> Self {
        self.hints.push(hint.into());
        self
    }
}

impl<T> WithErrorInfo for Result<T> {
    fn with_path(self, path: Path) -> Self {
        self.map_err(|e| e.with_path(path))
    }

    fn push_hint<S: Into<String>>(self, hint: S) -> Self {
        self.map_err(|e| e.push_hint(hint))
    }
}
