//! AST dump as XML.
//!
//! Each node emits one tag; leaves print their value inline. The whole
//! statement list is wrapped in an `<ast>` root. Used by `mufc -a`.

use std::fmt::{self, Write};

use crate::ast::{ArrayIndex, BoolOp, CompOp, Expr, Program, Stmt};

pub fn write_ast_xml(prog: &Program, out: &mut impl Write) -> fmt::Result {
    writeln!(out, "<ast program=\"{}\">", escape(&prog.name))?;
    for stmt in &prog.stmts {
        write_stmt(stmt, out, 1)?;
    }
    writeln!(out, "</ast>")
}

fn indent(out: &mut dyn Write, level: usize) -> fmt::Result {
    write!(out, "{:width$}", "", width = level * 2)
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn write_stmt(stmt: &Stmt, out: &mut dyn Write, level: usize) -> fmt::Result {
    indent(out, level)?;

    match stmt {
        Stmt::VarDecl { names, init } => {
            writeln!(out, "<VarDecl idents=\"{}\">", escape(&names.join(", ")))?;
            if let Some(init) = init {
                write_stmt(init, out, level + 1)?;
            }
            indent(out, level)?;
            writeln!(out, "</VarDecl>")
        }
        Stmt::Assign { targets, expr } => {
            writeln!(out, "<Assign idents=\"{}\">", escape(&targets.join(", ")))?;
            write_expr(expr, out, level + 1)?;
            indent(out, level)?;
            writeln!(out, "</Assign>")
        }
        Stmt::ArrayAssign { name, idx, expr } => {
            writeln!(out, "<ArrayAssign ident=\"{}\">", escape(name))?;
            write_index(idx, out, level + 1)?;
            write_expr(expr, out, level + 1)?;
            indent(out, level)?;
            writeln!(out, "</ArrayAssign>")
        }
        Stmt::Expr(expr) => {
            writeln!(out, "<ExprStmt>")?;
            write_expr(expr, out, level + 1)?;
            indent(out, level)?;
            writeln!(out, "</ExprStmt>")
        }
        Stmt::Func(func) => {
            writeln!(
                out,
                "<Func ident=\"{}\" rettype=\"{}\">",
                escape(&func.name),
                func.retty
            )?;
            for arg in &func.args {
                indent(out, level + 1)?;
                writeln!(out, "<Arg ident=\"{}\" type=\"{}\"/>", escape(&arg.name), arg.ty)?;
            }
            for ret in &func.rets {
                indent(out, level + 1)?;
                writeln!(out, "<Ret ident=\"{}\" type=\"{}\"/>", escape(&ret.name), ret.ty)?;
            }
            for stmt in &func.body {
                write_stmt(stmt, out, level + 1)?;
            }
            indent(out, level)?;
            writeln!(out, "</Func>")
        }
        Stmt::Return { exprs, jump_only } => {
            if exprs.is_empty() {
                writeln!(out, "<Return only_jump=\"{jump_only}\"/>")
            } else {
                writeln!(out, "<Return only_jump=\"{jump_only}\">")?;
                for expr in exprs {
                    write_expr(expr, out, level + 1)?;
                }
                indent(out, level)?;
                writeln!(out, "</Return>")
            }
        }
        Stmt::Cond {
            cond,
            then_branch,
            else_branch,
        } => {
            writeln!(out, "<Cond>")?;
            write_expr(cond, out, level + 1)?;
            indent(out, level + 1)?;
            writeln!(out, "<If>")?;
            for stmt in then_branch {
                write_stmt(stmt, out, level + 2)?;
            }
            indent(out, level + 1)?;
            writeln!(out, "</If>")?;
            if let Some(else_branch) = else_branch {
                indent(out, level + 1)?;
                writeln!(out, "<Else>")?;
                for stmt in else_branch {
                    write_stmt(stmt, out, level + 2)?;
                }
                indent(out, level + 1)?;
                writeln!(out, "</Else>")?;
            }
            indent(out, level)?;
            writeln!(out, "</Cond>")
        }
        Stmt::Cases {
            expr,
            cases,
            default,
        } => {
            writeln!(out, "<Cases>")?;
            write_expr(expr, out, level + 1)?;
            for (case_expr, body) in cases {
                indent(out, level + 1)?;
                writeln!(out, "<Case>")?;
                write_expr(case_expr, out, level + 2)?;
                for stmt in body {
                    write_stmt(stmt, out, level + 2)?;
                }
                indent(out, level + 1)?;
                writeln!(out, "</Case>")?;
            }
            if let Some(default) = default {
                indent(out, level + 1)?;
                writeln!(out, "<DefaultCase>")?;
                for stmt in default {
                    write_stmt(stmt, out, level + 2)?;
                }
                indent(out, level + 1)?;
                writeln!(out, "</DefaultCase>")?;
            }
            indent(out, level)?;
            writeln!(out, "</Cases>")
        }
        Stmt::Loop { cond, body } => {
            writeln!(out, "<Loop>")?;
            write_expr(cond, out, level + 1)?;
            for stmt in body {
                write_stmt(stmt, out, level + 1)?;
            }
            indent(out, level)?;
            writeln!(out, "</Loop>")
        }
        Stmt::RangedLoop { range, body } => {
            writeln!(out, "<RangedLoop ident=\"{}\">", escape(&range.ident))?;
            write_expr(&range.begin, out, level + 1)?;
            write_expr(&range.end, out, level + 1)?;
            if let Some(inc) = &range.inc {
                write_expr(inc, out, level + 1)?;
            }
            for stmt in body {
                write_stmt(stmt, out, level + 1)?;
            }
            indent(out, level)?;
            writeln!(out, "</RangedLoop>")
        }
        Stmt::Break(depth) => writeln!(out, "<LoopBreak depth=\"{depth}\"/>"),
        Stmt::Next(depth) => writeln!(out, "<LoopNext depth=\"{depth}\"/>"),
        Stmt::Label(name) => writeln!(out, "<Label ident=\"{}\"/>", escape(name)),
        Stmt::Goto(label) => writeln!(out, "<Jump label=\"{}\"/>", escape(label)),
        Stmt::Comefrom(label) => {
            writeln!(out, "<Jump label=\"{}\" comefrom=\"true\"/>", escape(label))
        }
    }
}

fn write_index(idx: &ArrayIndex, out: &mut dyn Write, level: usize) -> fmt::Result {
    match idx {
        ArrayIndex::Elements(exprs) => {
            for expr in exprs {
                write_expr(expr, out, level)?;
            }
            Ok(())
        }
        ArrayIndex::Range(begin, end) => {
            indent(out, level)?;
            writeln!(out, "<Range>")?;
            write_expr(begin, out, level + 1)?;
            write_expr(end, out, level + 1)?;
            indent(out, level)?;
            writeln!(out, "</Range>")
        }
        ArrayIndex::RangedMulti => {
            indent(out, level)?;
            writeln!(out, "<RangedMulti/>")
        }
    }
}

fn write_expr(expr: &Expr, out: &mut dyn Write, level: usize) -> fmt::Result {
    indent(out, level)?;

    match expr {
        Expr::RealConst(val) => writeln!(out, "<Real value=\"{val}\"/>"),
        Expr::IntConst(val) => writeln!(out, "<Int value=\"{val}\"/>"),
        Expr::CplxConst(val) => {
            writeln!(out, "<Cplx real=\"{}\" imag=\"{}\"/>", val.re, val.im)
        }
        Expr::BoolConst(val) => writeln!(out, "<Bool value=\"{val}\"/>"),
        Expr::StrConst(val) => writeln!(out, "<Str value=\"{}\"/>", escape(val)),
        Expr::Var(name) => writeln!(out, "<Var ident=\"{}\"/>", escape(name)),
        Expr::UnaryMinus(term) => wrap(out, level, "UMinus", |out| write_expr(term, out, level + 1)),
        Expr::Norm(term) => wrap(out, level, "Norm", |out| write_expr(term, out, level + 1)),
        Expr::Transpose(term) => {
            wrap(out, level, "Transp", |out| write_expr(term, out, level + 1))
        }
        Expr::Plus { lhs, rhs, inverted } => {
            let tag = if *inverted { "Minus" } else { "Plus" };
            wrap(out, level, tag, |out| {
                write_expr(lhs, out, level + 1)?;
                write_expr(rhs, out, level + 1)
            })
        }
        Expr::Mult { lhs, rhs, inverted } => {
            let tag = if *inverted { "Div" } else { "Mult" };
            wrap(out, level, tag, |out| {
                write_expr(lhs, out, level + 1)?;
                write_expr(rhs, out, level + 1)
            })
        }
        Expr::Mod { lhs, rhs } => wrap(out, level, "Mod", |out| {
            write_expr(lhs, out, level + 1)?;
            write_expr(rhs, out, level + 1)
        }),
        Expr::Pow { lhs, rhs } => wrap(out, level, "Pow", |out| {
            write_expr(lhs, out, level + 1)?;
            write_expr(rhs, out, level + 1)
        }),
        Expr::Comp { lhs, rhs, op } => {
            let tag = match op {
                CompOp::Equ => "Equ",
                CompOp::Neq => "NotEqu",
                CompOp::Gt => "Greater",
                CompOp::Lt => "Less",
                CompOp::Geq => "GreaterEqu",
                CompOp::Leq => "LessEqu",
            };
            wrap(out, level, tag, |out| {
                write_expr(lhs, out, level + 1)?;
                write_expr(rhs, out, level + 1)
            })
        }
        Expr::Bool { lhs, rhs, op } => {
            let tag = match op {
                BoolOp::Not => "Not",
                BoolOp::And => "And",
                BoolOp::Or => "Or",
                BoolOp::Xor => "Xor",
            };
            wrap(out, level, tag, |out| {
                write_expr(lhs, out, level + 1)?;
                if let Some(rhs) = rhs {
                    write_expr(rhs, out, level + 1)?;
                }
                Ok(())
            })
        }
        Expr::Call { name, args } => {
            if args.is_empty() {
                writeln!(out, "<Call ident=\"{}\"/>", escape(name))
            } else {
                writeln!(out, "<Call ident=\"{}\">", escape(name))?;
                for arg in args {
                    write_expr(arg, out, level + 1)?;
                }
                indent(out, level)?;
                writeln!(out, "</Call>")
            }
        }
        Expr::ArrayAccess { term, idx } => wrap(out, level, "ArrayAccess", |out| {
            write_expr(term, out, level + 1)?;
            write_index(idx, out, level + 1)
        }),
        Expr::ArrayLit { elems, .. } => wrap(out, level, "ExprList", |out| {
            for elem in elems {
                write_expr(elem, out, level + 1)?;
            }
            Ok(())
        }),
    }
}

fn wrap(
    out: &mut dyn Write,
    level: usize,
    tag: &str,
    body: impl FnOnce(&mut dyn Write) -> fmt::Result,
) -> fmt::Result {
    writeln!(out, "<{tag}>")?;
    body(out)?;
    indent(out, level)?;
    writeln!(out, "</{tag}>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::symtab::SymTab;

    #[test]
    fn test_xml_roundtrip_structure() {
        let mut syms = SymTab::new();
        let prog = Parser::new(
            "program p\ninteger :: x = 1\nif x > 0 then\nx = x - 1\nend if\nend program",
            "<test>",
            &mut syms,
        )
        .expect("lex")
        .parse()
        .expect("parse");

        let mut xml = String::new();
        write_ast_xml(&prog, &mut xml).expect("write");

        assert!(xml.starts_with("<ast program=\"p\">"));
        assert!(xml.contains("<VarDecl idents=\"x\">"));
        assert!(xml.contains("<Greater>"));
        assert!(xml.trim_end().ends_with("</ast>"));
    }

    #[test]
    fn test_xml_escaping() {
        let prog = Program {
            name: "p".into(),
            stmts: vec![Stmt::Expr(Expr::StrConst("a<b>&\"c\"".into()))],
        };
        let mut xml = String::new();
        write_ast_xml(&prog, &mut xml).expect("write");
        assert!(xml.contains("a&lt;b&gt;&amp;&quot;c&quot;"));
    }
}
