//! Abstract syntax tree for muF.
//!
//! The tree is a plain tagged sum: expressions own their children through
//! `Box`/`Vec`, statements own their bodies, and symbols are referenced by
//! name only, so there are no ownership cycles. The parser builds it, the
//! constant folder rewrites it, and the code generator consumes it.

use muf_core::{Complex, Int, Real};

use crate::symtab::SymbolType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Equ,
    Neq,
    Gt,
    Lt,
    Geq,
    Leq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    Not,
    And,
    Or,
    Xor,
}

/// Index part of an array access or assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayIndex {
    /// One index expression per dimension: `v[i]`, `m[i, j]`.
    Elements(Vec<Expr>),
    /// Inclusive 1-D range: `v[a ~ b]`.
    Range(Box<Expr>, Box<Expr>),
    /// Ranged access on more than one dimension. Parsed, but rejected by
    /// the code generator.
    RangedMulti,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    RealConst(Real),
    IntConst(Int),
    CplxConst(Complex),
    BoolConst(bool),
    StrConst(String),

    /// Variable reference by name.
    Var(String),

    UnaryMinus(Box<Expr>),
    /// `|expr|` — absolute value of a scalar, Euclidean length of an array.
    Norm(Box<Expr>),
    /// `expr'` — matrix transpose.
    Transpose(Box<Expr>),

    /// Addition, or subtraction when `inverted`.
    Plus {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        inverted: bool,
    },
    /// Multiplication, or division when `inverted`.
    Mult {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        inverted: bool,
    },
    Mod {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Pow {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },

    Comp {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        op: CompOp,
    },
    /// Boolean operation; `rhs` is `None` for NOT.
    Bool {
        lhs: Box<Expr>,
        rhs: Option<Box<Expr>>,
        op: BoolOp,
    },

    Call {
        name: String,
        args: Vec<Expr>,
    },

    /// `term[...]` — element or ranged read.
    ArrayAccess {
        term: Box<Expr>,
        idx: ArrayIndex,
    },

    /// `[ e1, e2, ... ]` — array construction from an expression list.
    /// The element type is `None` until a declaration context determines it;
    /// the generator defaults to a real array.
    ArrayLit {
        elems: Vec<Expr>,
        ty: Option<SymbolType>,
    },
}

/// Loop range of a counted loop: `ident = begin, end[, inc]`.
#[derive(Debug, Clone, PartialEq)]
pub struct VarRange {
    pub ident: String,
    pub begin: Expr,
    pub end: Expr,
    pub inc: Option<Expr>,
}

/// Argument or named return value of a function definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgDecl {
    pub name: String,
    pub ty: SymbolType,
    pub dims: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncDef {
    pub name: String,
    pub retty: SymbolType,
    pub retdims: Vec<usize>,
    pub args: Vec<ArgDecl>,
    pub body: Vec<Stmt>,
    /// Declared return variables, loaded at the end of the function.
    /// For `result(type)` this is the function name itself.
    pub rets: Vec<ArgDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Declaration of one or more variables, with an optional initialising
    /// assignment for the last one.
    VarDecl {
        names: Vec<String>,
        init: Option<Box<Stmt>>,
    },

    /// `targets = expr`; several targets for multi-return calls.
    Assign {
        targets: Vec<String>,
        expr: Expr,
    },

    /// `name[...] = expr`.
    ArrayAssign {
        name: String,
        idx: ArrayIndex,
        expr: Expr,
    },

    /// Bare expression statement (typically a call).
    Expr(Expr),

    Func(FuncDef),

    /// `return` (jump only) or `return e1, e2, ...`.
    Return {
        exprs: Vec<Expr>,
        jump_only: bool,
    },

    Cond {
        cond: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Option<Vec<Stmt>>,
    },

    Cases {
        expr: Expr,
        cases: Vec<(Expr, Vec<Stmt>)>,
        default: Option<Vec<Stmt>>,
    },

    /// `do while (cond) ... end do`.
    Loop {
        cond: Expr,
        body: Vec<Stmt>,
    },

    /// `do i = begin, end[, inc] ... end do`.
    RangedLoop {
        range: VarRange,
        body: Vec<Stmt>,
    },

    /// `break [n]`, n = 1 is the innermost loop.
    Break(Int),
    /// `next [n]`, n = 1 is the innermost loop.
    Next(Int),

    Label(String),
    Goto(String),
    /// Reserved; the code generator reports an error for it.
    Comefrom(String),
}

/// A parsed program: `program NAME ... end program`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub name: String,
    pub stmts: Vec<Stmt>,
}

impl Expr {
    /// Is this a literal constant (after folding)?
    pub fn is_const(&self) -> bool {
        matches!(
            self,
            Expr::RealConst(_)
                | Expr::IntConst(_)
                | Expr::CplxConst(_)
                | Expr::BoolConst(_)
                | Expr::StrConst(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_const() {
        assert!(Expr::IntConst(3).is_const());
        assert!(Expr::StrConst("a".into()).is_const());
        assert!(!Expr::Var("x".into()).is_const());
        assert!(!Expr::UnaryMinus(Box::new(Expr::IntConst(1))).is_const());
    }
}
