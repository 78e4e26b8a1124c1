use serde::Serialize;

use crate::object::ObjRef;

pub mod source_map;
pub use source_map::SourceMap;

// ---- Span infrastructure ----

/// Byte range within source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const UNKNOWN: Span = Span { start: 0, end: 0 };

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl From<std::ops::Range<usize>> for Span {
    fn from(r: std::ops::Range<usize>) -> Self {
        Span { start: r.start, end: r.end }
    }
}

/// Wraps a node with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Spanned { node, span }
    }
}

impl<T> std::ops::Deref for Spanned<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.node
    }
}

// ---- Expressions ----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncDec {
    PreIncr,
    PostIncr,
    PreDecr,
    PostDecr,
}

impl IncDec {
    pub fn symbol(self) -> &'static str {
        match self {
            IncDec::PreIncr | IncDec::PostIncr => "++",
            IncDec::PreDecr | IncDec::PostDecr => "--",
        }
    }
}

/// Expression tree. Names are interned identifiers, so comparing two
/// `ObjRef`s compares spellings.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(i64),
    Bool(bool),
    Str(ObjRef),
    Ident(ObjRef),
    This,
    Not(Box<Spanned<Expr>>),
    Binary {
        op: BinOp,
        left: Box<Spanned<Expr>>,
        right: Box<Spanned<Expr>>,
    },
    /// `target = value`; target is an `Ident` or a `Property`.
    Assign {
        target: Box<Spanned<Expr>>,
        value: Box<Spanned<Expr>>,
    },
    IncDec {
        kind: IncDec,
        name: ObjRef,
    },
    Call {
        callee: ObjRef,
        args: Vec<Spanned<Expr>>,
    },
    Property {
        object: Box<Spanned<Expr>>,
        name: ObjRef,
    },
    MethodCall {
        object: Box<Spanned<Expr>>,
        name: ObjRef,
        args: Vec<Spanned<Expr>>,
    },
}

impl Expr {
    pub fn is_assignable(&self) -> bool {
        matches!(self, Expr::Ident(_) | Expr::Property { .. })
    }
}
