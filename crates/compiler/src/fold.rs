//! Constant folding.
//!
//! A post-order AST rewrite that collapses operations over literals before
//! code generation: arithmetic on numeric literals, string concatenation,
//! boolean operators and integer comparisons. Anything that could change
//! observable behaviour stays untouched: real comparisons (the VM compares
//! with a runtime-settable tolerance) and division or modulo by a literal
//! zero (surfaces as a runtime error).

use muf_core::value::int_pow;
use muf_core::{Complex, Int, Real};

use crate::ast::{BoolOp, CompOp, Expr, Program, Stmt};

pub fn fold_program(prog: &mut Program) {
    fold_stmts(&mut prog.stmts);
}

fn fold_stmts(stmts: &mut [Stmt]) {
    for stmt in stmts {
        fold_stmt(stmt);
    }
}

fn fold_stmt(stmt: &mut Stmt) {
    match stmt {
        Stmt::VarDecl { init, .. } => {
            if let Some(init) = init {
                fold_stmt(init);
            }
        }
        Stmt::Assign { expr, .. } => fold_expr(expr),
        Stmt::ArrayAssign { idx, expr, .. } => {
            fold_index(idx);
            fold_expr(expr);
        }
        Stmt::Expr(expr) => fold_expr(expr),
        Stmt::Func(func) => fold_stmts(&mut func.body),
        Stmt::Return { exprs, .. } => {
            for expr in exprs {
                fold_expr(expr);
            }
        }
        Stmt::Cond {
            cond,
            then_branch,
            else_branch,
        } => {
            fold_expr(cond);
            fold_stmts(then_branch);
            if let Some(else_branch) = else_branch {
                fold_stmts(else_branch);
            }
        }
        Stmt::Cases {
            expr,
            cases,
            default,
        } => {
            fold_expr(expr);
            for (case_expr, body) in cases {
                fold_expr(case_expr);
                fold_stmts(body);
            }
            if let Some(default) = default {
                fold_stmts(default);
            }
        }
        Stmt::Loop { cond, body } => {
            fold_expr(cond);
            fold_stmts(body);
        }
        Stmt::RangedLoop { range, body } => {
            fold_expr(&mut range.begin);
            fold_expr(&mut range.end);
            if let Some(inc) = &mut range.inc {
                fold_expr(inc);
            }
            fold_stmts(body);
        }
        Stmt::Break(_)
        | Stmt::Next(_)
        | Stmt::Label(_)
        | Stmt::Goto(_)
        | Stmt::Comefrom(_) => {}
    }
}

fn fold_index(idx: &mut crate::ast::ArrayIndex) {
    match idx {
        crate::ast::ArrayIndex::Elements(exprs) => {
            for expr in exprs {
                fold_expr(expr);
            }
        }
        crate::ast::ArrayIndex::Range(begin, end) => {
            fold_expr(begin);
            fold_expr(end);
        }
        crate::ast::ArrayIndex::RangedMulti => {}
    }
}

/// Numeric literal value, promoted for mixed arithmetic.
enum Num {
    Int(Int),
    Real(Real),
    Cplx(Complex),
}

fn as_num(expr: &Expr) -> Option<Num> {
    match expr {
        Expr::IntConst(val) => Some(Num::Int(*val)),
        Expr::RealConst(val) => Some(Num::Real(*val)),
        Expr::CplxConst(val) => Some(Num::Cplx(*val)),
        _ => None,
    }
}

fn fold_expr(expr: &mut Expr) {
    // fold children first
    match expr {
        Expr::UnaryMinus(term) | Expr::Norm(term) | Expr::Transpose(term) => fold_expr(term),
        Expr::Plus { lhs, rhs, .. }
        | Expr::Mult { lhs, rhs, .. }
        | Expr::Mod { lhs, rhs }
        | Expr::Pow { lhs, rhs }
        | Expr::Comp { lhs, rhs, .. } => {
            fold_expr(lhs);
            fold_expr(rhs);
        }
        Expr::Bool { lhs, rhs, .. } => {
            fold_expr(lhs);
            if let Some(rhs) = rhs {
                fold_expr(rhs);
            }
        }
        Expr::Call { args, .. } => {
            for arg in args {
                fold_expr(arg);
            }
        }
        Expr::ArrayAccess { term, idx } => {
            fold_expr(term);
            fold_index(idx);
        }
        Expr::ArrayLit { elems, .. } => {
            for elem in elems {
                fold_expr(elem);
            }
        }
        _ => {}
    }

    if let Some(folded) = try_fold(expr) {
        *expr = folded;
    }
}

fn try_fold(expr: &Expr) -> Option<Expr> {
    match expr {
        Expr::UnaryMinus(term) => match as_num(term)? {
            Num::Int(val) => Some(Expr::IntConst(val.wrapping_neg())),
            Num::Real(val) => Some(Expr::RealConst(-val)),
            Num::Cplx(val) => Some(Expr::CplxConst(-val)),
        },

        Expr::Plus { lhs, rhs, inverted } => {
            // string concatenation
            if let (Expr::StrConst(s1), Expr::StrConst(s2), false) = (&**lhs, &**rhs, *inverted) {
                return Some(Expr::StrConst(format!("{s1}{s2}")));
            }

            fold_numeric(lhs, rhs, |a, b| {
                Some(match (*inverted, a, b) {
                    (false, Num::Int(a), Num::Int(b)) => Num::Int(a.wrapping_add(b)),
                    (true, Num::Int(a), Num::Int(b)) => Num::Int(a.wrapping_sub(b)),
                    (false, a, b) => promote(a, b, |x, y| x + y, |x, y| x + y),
                    (true, a, b) => promote(a, b, |x, y| x - y, |x, y| x - y),
                })
            })
        }

        Expr::Mult { lhs, rhs, inverted } => fold_numeric(lhs, rhs, |a, b| {
            match (*inverted, a, b) {
                (false, Num::Int(a), Num::Int(b)) => Some(Num::Int(a.wrapping_mul(b))),
                // integer division by zero stays a runtime concern
                (true, Num::Int(a), Num::Int(b)) => {
                    (b != 0).then(|| Num::Int(a.wrapping_div(b)))
                }
                (false, a, b) => Some(promote(a, b, |x, y| x * y, |x, y| x * y)),
                (true, a, b) => Some(promote(a, b, |x, y| x / y, |x, y| x / y)),
            }
        }),

        Expr::Mod { lhs, rhs } => {
            let (a, b) = (as_num(lhs)?, as_num(rhs)?);
            match (a, b) {
                (Num::Int(a), Num::Int(b)) if b != 0 => Some(Expr::IntConst(a.wrapping_rem(b))),
                (Num::Real(a), Num::Real(b)) => Some(Expr::RealConst(a % b)),
                _ => None,
            }
        }

        Expr::Pow { lhs, rhs } => {
            let (a, b) = (as_num(lhs)?, as_num(rhs)?);
            match (a, b) {
                (Num::Int(a), Num::Int(b)) => Some(Expr::IntConst(int_pow(a, b))),
                (Num::Real(a), Num::Real(b)) => Some(Expr::RealConst(a.powf(b))),
                (Num::Real(a), Num::Int(b)) => Some(Expr::RealConst(a.powf(b as Real))),
                (Num::Int(a), Num::Real(b)) => Some(Expr::RealConst((a as Real).powf(b))),
                _ => None,
            }
        }

        Expr::Bool { lhs, rhs, op } => {
            let Expr::BoolConst(a) = **lhs else {
                return None;
            };
            match (*op, rhs) {
                (BoolOp::Not, None) => Some(Expr::BoolConst(!a)),
                (op, Some(rhs)) => {
                    let Expr::BoolConst(b) = **rhs else {
                        return None;
                    };
                    let val = match op {
                        BoolOp::And => a && b,
                        BoolOp::Or => a || b,
                        BoolOp::Xor => a ^ b,
                        BoolOp::Not => return None,
                    };
                    Some(Expr::BoolConst(val))
                }
                _ => None,
            }
        }

        // only integer comparisons fold: real equality obeys the VM's
        // runtime tolerance
        Expr::Comp { lhs, rhs, op } => {
            let (Expr::IntConst(a), Expr::IntConst(b)) = (&**lhs, &**rhs) else {
                return None;
            };
            let val = match op {
                CompOp::Equ => a == b,
                CompOp::Neq => a != b,
                CompOp::Gt => a > b,
                CompOp::Lt => a < b,
                CompOp::Geq => a >= b,
                CompOp::Leq => a <= b,
            };
            Some(Expr::BoolConst(val))
        }

        _ => None,
    }
}

/// Shared arithmetic folding over two numeric literals.
fn fold_numeric(
    lhs: &Expr,
    rhs: &Expr,
    f: impl FnOnce(Num, Num) -> Option<Num>,
) -> Option<Expr> {
    let (a, b) = (as_num(lhs)?, as_num(rhs)?);
    match f(a, b)? {
        Num::Int(val) => Some(Expr::IntConst(val)),
        Num::Real(val) => Some(Expr::RealConst(val)),
        Num::Cplx(val) => Some(Expr::CplxConst(val)),
    }
}

/// Promote mixed real/complex operands and apply the operator.
fn promote(
    a: Num,
    b: Num,
    freal: impl FnOnce(Real, Real) -> Real,
    fcplx: impl FnOnce(Complex, Complex) -> Complex,
) -> Num {
    match (a, b) {
        (Num::Cplx(a), b) => Num::Cplx(fcplx(a, to_cplx(b))),
        (a, Num::Cplx(b)) => Num::Cplx(fcplx(to_cplx(a), b)),
        (a, b) => Num::Real(freal(to_real(a), to_real(b))),
    }
}

fn to_real(num: Num) -> Real {
    match num {
        Num::Int(val) => val as Real,
        Num::Real(val) => val,
        Num::Cplx(val) => val.re,
    }
}

fn to_cplx(num: Num) -> Complex {
    match num {
        Num::Int(val) => Complex::from(val as Real),
        Num::Real(val) => Complex::from(val),
        Num::Cplx(val) => val,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folded(mut expr: Expr) -> Expr {
        fold_expr(&mut expr);
        expr
    }

    fn int(val: Int) -> Box<Expr> {
        Box::new(Expr::IntConst(val))
    }

    #[test]
    fn test_fold_int_arithmetic() {
        let expr = Expr::Plus {
            lhs: int(2),
            rhs: Box::new(Expr::Mult {
                lhs: int(3),
                rhs: int(4),
                inverted: false,
            }),
            inverted: false,
        };
        assert_eq!(folded(expr), Expr::IntConst(14));
    }

    #[test]
    fn test_fold_mixed_to_real() {
        let expr = Expr::Plus {
            lhs: int(1),
            rhs: Box::new(Expr::RealConst(0.5)),
            inverted: false,
        };
        assert_eq!(folded(expr), Expr::RealConst(1.5));
    }

    #[test]
    fn test_fold_pow() {
        let expr = Expr::Pow {
            lhs: int(2),
            rhs: int(10),
        };
        assert_eq!(folded(expr), Expr::IntConst(1024));
    }

    #[test]
    fn test_division_by_zero_not_folded() {
        let expr = Expr::Mult {
            lhs: int(1),
            rhs: int(0),
            inverted: true,
        };
        assert!(matches!(folded(expr), Expr::Mult { .. }));
    }

    #[test]
    fn test_string_concat() {
        let expr = Expr::Plus {
            lhs: Box::new(Expr::StrConst("ab".into())),
            rhs: Box::new(Expr::StrConst("cd".into())),
            inverted: false,
        };
        assert_eq!(folded(expr), Expr::StrConst("abcd".into()));
    }

    #[test]
    fn test_real_comparison_not_folded() {
        let expr = Expr::Comp {
            lhs: Box::new(Expr::RealConst(0.1)),
            rhs: Box::new(Expr::RealConst(0.1)),
            op: CompOp::Equ,
        };
        assert!(matches!(folded(expr), Expr::Comp { .. }));
    }

    #[test]
    fn test_int_comparison_folds() {
        let expr = Expr::Comp {
            lhs: int(3),
            rhs: int(5),
            op: CompOp::Lt,
        };
        assert_eq!(folded(expr), Expr::BoolConst(true));
    }

    #[test]
    fn test_nested_statements_folded() {
        let mut prog = Program {
            name: "p".into(),
            stmts: vec![Stmt::Cond {
                cond: Expr::BoolConst(true),
                then_branch: vec![Stmt::Assign {
                    targets: vec!["x".into()],
                    expr: Expr::Plus {
                        lhs: int(20),
                        rhs: int(22),
                        inverted: false,
                    },
                }],
                else_branch: None,
            }],
        };
        fold_program(&mut prog);

        match &prog.stmts[0] {
            Stmt::Cond { then_branch, .. } => match &then_branch[0] {
                Stmt::Assign { expr, .. } => assert_eq!(*expr, Expr::IntConst(42)),
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }
}
