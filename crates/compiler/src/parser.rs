//! muF parser
//!
//! Recursive-descent parser producing the AST and populating the symbol
//! table as it goes: declarations add scoped symbols, function definitions
//! enter a scope, register their arguments and result variables, and record
//! the function signature in the enclosing scope.
//!
//! The LALR(1) front end of earlier tool generations is an interchangeable
//! collaborator; this parser keeps exactly the same AST and symbol-table
//! interface towards the code generator.

use muf_core::{Complex, Int};

use crate::ast::{
    ArgDecl, ArrayIndex, BoolOp, CompOp, Expr, FuncDef, Program, Stmt, VarRange,
};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::symtab::{SymTab, SymbolType, SCOPE_SEP};

/// Parse error with source position.
#[derive(Debug)]
pub struct ParseError {
    src_name: String,
    line: usize,
    msg: String,
}

impl ParseError {
    pub fn new(src_name: impl Into<String>, line: usize, msg: impl Into<String>) -> Self {
        ParseError {
            src_name: src_name.into(),
            line,
            msg: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.src_name, self.line, self.msg)
    }
}

impl std::error::Error for ParseError {}

/// Default byte capacity of strings declared without a dimension.
const DEFAULT_STRING_SIZE: usize = 128;

pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    syms: &'a mut SymTab,
    scope: Vec<String>,
    src_name: String,
}

impl<'a> Parser<'a> {
    pub fn new(src: &str, src_name: &str, syms: &'a mut SymTab) -> Result<Self, ParseError> {
        let tokens = Lexer::new(src, src_name).tokenize()?;
        Ok(Parser {
            tokens,
            pos: 0,
            syms,
            scope: Vec::new(),
            src_name: src_name.to_string(),
        })
    }

    /// Parse a whole program: `program NAME ... end program`.
    pub fn parse(mut self) -> Result<Program, ParseError> {
        self.expect(&TokenKind::Program)?;
        let name = self.expect_ident()?;

        let stmts = self.parse_block()?;

        self.expect(&TokenKind::End)?;
        self.expect(&TokenKind::Program)?;
        if let Some(tok) = self.peek_token() {
            return Err(self.error_at(tok.line, "Trailing input after \"end program\"."));
        }

        Ok(Program { name, stmts })
    }

    // ------------------------------------------------------------------------
    // token plumbing
    // ------------------------------------------------------------------------

    fn peek_token(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek(&self) -> Option<&TokenKind> {
        self.peek_token().map(|tok| &tok.kind)
    }

    fn peek_at(&self, offs: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + offs).map(|tok| &tok.kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn cur_line(&self) -> usize {
        self.peek_token()
            .map(|tok| tok.line)
            .or_else(|| self.tokens.last().map(|tok| tok.line))
            .unwrap_or(1)
    }

    fn error(&self, msg: impl Into<String>) -> ParseError {
        ParseError::new(&self.src_name, self.cur_line(), msg)
    }

    fn error_at(&self, line: usize, msg: impl Into<String>) -> ParseError {
        ParseError::new(&self.src_name, line, msg)
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<(), ParseError> {
        match self.peek() {
            Some(tok) if tok == kind => {
                self.pos += 1;
                Ok(())
            }
            Some(tok) => Err(self.error(format!("Expected {kind:?}, found {tok:?}."))),
            None => Err(self.error(format!("Expected {kind:?}, found end of input."))),
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.peek().cloned() {
            Some(TokenKind::Ident(name)) => {
                self.pos += 1;
                Ok(name)
            }
            other => Err(self.error(format!("Expected identifier, found {other:?}."))),
        }
    }

    fn accept(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    // ------------------------------------------------------------------------
    // scope and symbol registration
    // ------------------------------------------------------------------------

    /// Active scope prefix, e.g. `"f::"`.
    fn scope_name(&self, skip_innermost: usize) -> String {
        let mut name = String::new();
        for scope in &self.scope[..self.scope.len() - skip_innermost] {
            name += scope;
            name += SCOPE_SEP;
        }
        name
    }

    fn add_scoped_symbol(
        &mut self,
        name: &str,
        ty: SymbolType,
        dims: Vec<usize>,
    ) -> Result<(), ParseError> {
        let scope = self.scope_name(0);
        if self.syms.add_symbol(&scope, name, ty, dims).is_none() {
            return Err(self.error(format!("Symbol \"{scope}{name}\" already declared.")));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // statements
    // ------------------------------------------------------------------------

    /// Statements until a block-closing keyword (`end`, `else`, `case`,
    /// `default`), which is left in the stream.
    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = Vec::new();

        loop {
            match self.peek() {
                None
                | Some(TokenKind::End)
                | Some(TokenKind::Else)
                | Some(TokenKind::Case)
                | Some(TokenKind::Default) => break,
                _ => stmts.push(self.parse_statement()?),
            }
        }

        Ok(stmts)
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        match self.peek() {
            Some(
                TokenKind::IntDecl
                | TokenKind::RealDecl
                | TokenKind::BoolDecl
                | TokenKind::CplxDecl
                | TokenKind::StringDecl,
            ) => self.parse_var_decl(),
            Some(TokenKind::Ident(_)) => self.parse_ident_statement(),
            Some(TokenKind::Assign) => self.parse_multi_assign(),
            Some(TokenKind::If) => self.parse_if(),
            Some(TokenKind::Select) => self.parse_select(),
            Some(TokenKind::Do) => self.parse_do(),
            Some(TokenKind::Break) => {
                self.pos += 1;
                Ok(Stmt::Break(self.accept_int_literal().unwrap_or(1)))
            }
            Some(TokenKind::Next) => {
                self.pos += 1;
                Ok(Stmt::Next(self.accept_int_literal().unwrap_or(1)))
            }
            Some(TokenKind::Return) => self.parse_return(),
            Some(TokenKind::Label(_)) => {
                let Some(TokenKind::Label(name)) = self.advance().map(|tok| tok.kind) else {
                    unreachable!()
                };
                Ok(Stmt::Label(name))
            }
            Some(TokenKind::Goto) => {
                self.pos += 1;
                Ok(Stmt::Goto(self.expect_label()?))
            }
            Some(TokenKind::Comefrom) => {
                self.pos += 1;
                Ok(Stmt::Comefrom(self.expect_label()?))
            }
            Some(TokenKind::Function | TokenKind::Procedure) => self.parse_function(),
            _ => Ok(Stmt::Expr(self.parse_expr()?)),
        }
    }

    fn accept_int_literal(&mut self) -> Option<Int> {
        if let Some(TokenKind::Int(val)) = self.peek() {
            let val = *val;
            self.pos += 1;
            Some(val)
        } else {
            None
        }
    }

    fn expect_label(&mut self) -> Result<String, ParseError> {
        match self.peek().cloned() {
            Some(TokenKind::Label(name)) => {
                self.pos += 1;
                Ok(name)
            }
            other => Err(self.error(format!("Expected label, found {other:?}."))),
        }
    }

    /// `type [, dimension(d1[, d2])]` — the leading type keyword of a
    /// declaration or argument.
    fn parse_type_decl(&mut self) -> Result<(SymbolType, Vec<usize>), ParseError> {
        let base = match self.advance().map(|tok| tok.kind) {
            Some(TokenKind::IntDecl) => SymbolType::Int,
            Some(TokenKind::RealDecl) => SymbolType::Real,
            Some(TokenKind::BoolDecl) => SymbolType::Bool,
            Some(TokenKind::CplxDecl) => SymbolType::Cplx,
            Some(TokenKind::StringDecl) => SymbolType::String,
            other => return Err(self.error(format!("Expected type keyword, found {other:?}."))),
        };

        let mut dims = Vec::new();
        if self.accept(&TokenKind::Comma) {
            self.expect(&TokenKind::Dimension)?;
            self.expect(&TokenKind::LParen)?;
            dims.push(self.expect_dim()?);
            if self.accept(&TokenKind::Comma) {
                dims.push(self.expect_dim()?);
            }
            self.expect(&TokenKind::RParen)?;
        }

        let (ty, dims) = match (base, dims.len()) {
            (ty, 0) => match ty {
                SymbolType::String => (ty, vec![DEFAULT_STRING_SIZE]),
                _ => (ty, vec![]),
            },
            (SymbolType::String, 1) => (SymbolType::String, dims),
            (SymbolType::Int, _) => (SymbolType::IntArr, dims),
            (SymbolType::Real, _) => (SymbolType::RealArr, dims),
            (SymbolType::Cplx, _) => (SymbolType::CplxArr, dims),
            (ty, _) => {
                return Err(self.error(format!("Type {ty} cannot be dimensioned.")));
            }
        };

        Ok((ty, dims))
    }

    fn expect_dim(&mut self) -> Result<usize, ParseError> {
        match self.advance().map(|tok| tok.kind) {
            Some(TokenKind::Int(val)) if val > 0 => Ok(val as usize),
            other => Err(self.error(format!("Expected dimension size, found {other:?}."))),
        }
    }

    /// `type [, dimension(...)] :: name [= expr] [, name]...`
    fn parse_var_decl(&mut self) -> Result<Stmt, ParseError> {
        let (ty, dims) = self.parse_type_decl()?;
        self.expect(&TokenKind::TypeSep)?;

        let mut names = Vec::new();
        let mut init = None;

        loop {
            let name = self.expect_ident()?;
            self.add_scoped_symbol(&name, ty, dims.clone())?;

            if self.accept(&TokenKind::Eq) {
                let mut expr = self.parse_expr()?;
                // give array literals their declared element type
                if let (Expr::ArrayLit { ty: lit_ty, .. }, true) = (&mut expr, ty.is_array()) {
                    lit_ty.get_or_insert(ty);
                }
                init = Some(Box::new(Stmt::Assign {
                    targets: vec![name.clone()],
                    expr,
                }));
                names.push(name);
                break;
            }

            names.push(name);
            if !self.accept(&TokenKind::Comma) {
                break;
            }
        }

        Ok(Stmt::VarDecl { names, init })
    }

    /// Statement starting with an identifier: assignment, array assignment
    /// or a bare expression (typically a call).
    fn parse_ident_statement(&mut self) -> Result<Stmt, ParseError> {
        // `name = expr`
        if matches!(self.peek_at(1), Some(TokenKind::Eq)) {
            let name = self.expect_ident()?;
            self.pos += 1; // '='
            let expr = self.parse_expr()?;
            return Ok(Stmt::Assign {
                targets: vec![name],
                expr,
            });
        }

        // `name[...] = expr`
        if matches!(self.peek_at(1), Some(TokenKind::LBracket))
            && self.bracket_then_assign()
        {
            let name = self.expect_ident()?;
            self.pos += 1; // '['
            let idx = self.parse_array_index()?;
            self.expect(&TokenKind::Eq)?;
            let expr = self.parse_expr()?;
            return Ok(Stmt::ArrayAssign { name, idx, expr });
        }

        Ok(Stmt::Expr(self.parse_expr()?))
    }

    /// Does the bracket group starting at `pos + 1` close and continue with
    /// `=`? Distinguishes `v[i] = x` from the expression `v[i]`.
    fn bracket_then_assign(&self) -> bool {
        let mut depth = 0;
        let mut offs = 1;
        while let Some(kind) = self.peek_at(offs) {
            match kind {
                TokenKind::LBracket => depth += 1,
                TokenKind::RBracket => {
                    depth -= 1;
                    if depth == 0 {
                        return matches!(self.peek_at(offs + 1), Some(TokenKind::Eq));
                    }
                }
                _ => {}
            }
            offs += 1;
        }
        false
    }

    /// `assign a, b = expr` — multi-target assignment for multi-return
    /// calls.
    fn parse_multi_assign(&mut self) -> Result<Stmt, ParseError> {
        self.expect(&TokenKind::Assign)?;

        let mut targets = vec![self.expect_ident()?];
        while self.accept(&TokenKind::Comma) {
            targets.push(self.expect_ident()?);
        }

        self.expect(&TokenKind::Eq)?;
        let expr = self.parse_expr()?;

        Ok(Stmt::Assign { targets, expr })
    }

    /// `if expr then ... [else ...] end if`
    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        self.expect(&TokenKind::If)?;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::Then)?;

        let then_branch = self.parse_block()?;

        let else_branch = if self.accept(&TokenKind::Else) {
            Some(self.parse_block()?)
        } else {
            None
        };

        self.expect(&TokenKind::End)?;
        self.expect(&TokenKind::If)?;

        Ok(Stmt::Cond {
            cond,
            then_branch,
            else_branch,
        })
    }

    /// `select case (expr) case (e) ... case default ... end select`
    fn parse_select(&mut self) -> Result<Stmt, ParseError> {
        self.expect(&TokenKind::Select)?;
        self.expect(&TokenKind::Case)?;
        self.expect(&TokenKind::LParen)?;
        let expr = self.parse_expr()?;
        self.expect(&TokenKind::RParen)?;

        let mut cases = Vec::new();
        let mut default = None;

        while self.accept(&TokenKind::Case) {
            if self.accept(&TokenKind::Default) {
                default = Some(self.parse_block()?);
                break;
            }

            self.expect(&TokenKind::LParen)?;
            let case_expr = self.parse_expr()?;
            self.expect(&TokenKind::RParen)?;
            let body = self.parse_block()?;
            cases.push((case_expr, body));
        }

        self.expect(&TokenKind::End)?;
        self.expect(&TokenKind::Select)?;

        Ok(Stmt::Cases {
            expr,
            cases,
            default,
        })
    }

    /// `do while expr ... end do` or `do i = a, b[, inc] ... end do`
    fn parse_do(&mut self) -> Result<Stmt, ParseError> {
        self.expect(&TokenKind::Do)?;

        if self.accept(&TokenKind::While) {
            let cond = self.parse_expr()?;
            let body = self.parse_block()?;
            self.expect(&TokenKind::End)?;
            self.expect(&TokenKind::Do)?;
            return Ok(Stmt::Loop { cond, body });
        }

        let ident = self.expect_ident()?;
        self.expect(&TokenKind::Eq)?;
        let begin = self.parse_expr()?;
        self.expect(&TokenKind::Comma)?;
        let end = self.parse_expr()?;
        let inc = if self.accept(&TokenKind::Comma) {
            Some(self.parse_expr()?)
        } else {
            None
        };

        let body = self.parse_block()?;
        self.expect(&TokenKind::End)?;
        self.expect(&TokenKind::Do)?;

        Ok(Stmt::RangedLoop {
            range: VarRange {
                ident,
                begin,
                end,
                inc,
            },
            body,
        })
    }

    /// `return` jumps to the end of the function (the declared result
    /// variables are pushed there); `return e1, e2, ...` pushes explicit
    /// values. A following statement that merely *starts* like an
    /// expression (`x = ...`, `v[i] = ...`) does not count as a value.
    fn parse_return(&mut self) -> Result<Stmt, ParseError> {
        self.expect(&TokenKind::Return)?;

        if !self.return_has_values() {
            return Ok(Stmt::Return {
                exprs: Vec::new(),
                jump_only: true,
            });
        }

        let mut exprs = vec![self.parse_expr()?];
        while self.accept(&TokenKind::Comma) {
            exprs.push(self.parse_expr()?);
        }

        Ok(Stmt::Return {
            exprs,
            jump_only: false,
        })
    }

    fn return_has_values(&self) -> bool {
        match self.peek() {
            Some(
                TokenKind::Int(_)
                | TokenKind::Real(_)
                | TokenKind::Str(_)
                | TokenKind::Bool(_)
                | TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::Minus
                | TokenKind::Not
                | TokenKind::Pipe,
            ) => true,
            Some(TokenKind::Ident(_)) => match self.peek_at(1) {
                // next statement is an assignment to this identifier
                Some(TokenKind::Eq) => false,
                Some(TokenKind::LBracket) => !self.bracket_then_assign(),
                _ => true,
            },
            _ => false,
        }
    }

    // ------------------------------------------------------------------------
    // functions
    // ------------------------------------------------------------------------

    /// `function f(args) result(type [:: name]) ... end function`,
    /// `function f(args) results(type :: name, ...) ... end function`,
    /// `procedure p(args) ... end procedure`.
    fn parse_function(&mut self) -> Result<Stmt, ParseError> {
        let is_proc = match self.advance().map(|tok| tok.kind) {
            Some(TokenKind::Function) => false,
            Some(TokenKind::Procedure) => true,
            _ => unreachable!("caller checked the keyword"),
        };

        let name = self.expect_ident()?;
        self.scope.push(name.clone());

        // arguments
        self.expect(&TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.accept(&TokenKind::RParen) {
            loop {
                let (ty, dims) = self.parse_type_decl()?;
                self.expect(&TokenKind::TypeSep)?;
                let arg_name = self.expect_ident()?;

                self.add_scoped_symbol(&arg_name, ty, dims.clone())?;
                let scoped = format!("{}{}", self.scope_name(0), arg_name);
                let argidx = args.len();
                if let Some(sym) = self.syms.find_mut(&scoped) {
                    sym.is_arg = true;
                    sym.argidx = argidx;
                }

                args.push(ArgDecl {
                    name: arg_name,
                    ty,
                    dims,
                });

                if !self.accept(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RParen)?;
        }

        // result clause
        let mut retty = SymbolType::Void;
        let mut retdims = Vec::new();
        let mut rets: Vec<ArgDecl> = Vec::new();
        let mut elems = None;

        if !is_proc {
            if self.accept(&TokenKind::Result) {
                self.expect(&TokenKind::LParen)?;
                let (ty, dims) = self.parse_type_decl()?;
                let ret_name = if self.accept(&TokenKind::TypeSep) {
                    self.expect_ident()?
                } else {
                    // the function name doubles as the result variable
                    name.clone()
                };
                self.expect(&TokenKind::RParen)?;

                self.add_scoped_symbol(&ret_name, ty, dims.clone())?;
                self.mark_ret(&ret_name, 0);

                retty = ty;
                retdims = dims.clone();
                rets.push(ArgDecl {
                    name: ret_name,
                    ty,
                    dims,
                });
            } else if self.accept(&TokenKind::Results) {
                self.expect(&TokenKind::LParen)?;
                let mut types = Vec::new();
                loop {
                    let (ty, dims) = self.parse_type_decl()?;
                    self.expect(&TokenKind::TypeSep)?;
                    let ret_name = self.expect_ident()?;

                    self.add_scoped_symbol(&ret_name, ty, dims.clone())?;
                    self.mark_ret(&ret_name, rets.len());

                    types.push(ty);
                    rets.push(ArgDecl {
                        name: ret_name,
                        ty,
                        dims,
                    });

                    if !self.accept(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RParen)?;

                retty = SymbolType::Comp;
                elems = Some(types);
            } else {
                return Err(self.error(format!(
                    "Function \"{name}\" needs a result or results clause."
                )));
            }
        }

        // register the function in the enclosing scope
        let parent_scope = self.scope_name(1);
        let argty: Vec<SymbolType> = args.iter().map(|arg| arg.ty).collect();
        if self
            .syms
            .add_func(
                &parent_scope,
                &name,
                retty,
                argty,
                Some(retdims.clone()),
                elems,
                false,
            )
            .is_none()
        {
            return Err(self.error(format!("Function \"{name}\" already declared.")));
        }

        let body = self.parse_block()?;

        self.expect(&TokenKind::End)?;
        match self.advance().map(|tok| tok.kind) {
            Some(TokenKind::Function | TokenKind::Procedure) => {}
            other => {
                return Err(self.error(format!(
                    "Expected \"end function\", found {other:?}."
                )))
            }
        }

        self.scope.pop();

        Ok(Stmt::Func(FuncDef {
            name,
            retty,
            retdims,
            args,
            body,
            rets,
        }))
    }

    fn mark_ret(&mut self, name: &str, retidx: usize) {
        let scoped = format!("{}{}", self.scope_name(0), name);
        if let Some(sym) = self.syms.find_mut(&scoped) {
            sym.is_ret = true;
            sym.retidx = retidx;
        }
    }

    // ------------------------------------------------------------------------
    // expressions
    // ------------------------------------------------------------------------

    pub(crate) fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_xor()?;
        while self.accept(&TokenKind::Or) {
            let rhs = self.parse_xor()?;
            lhs = Expr::Bool {
                lhs: Box::new(lhs),
                rhs: Some(Box::new(rhs)),
                op: BoolOp::Or,
            };
        }
        Ok(lhs)
    }

    fn parse_xor(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.accept(&TokenKind::Xor) {
            let rhs = self.parse_and()?;
            lhs = Expr::Bool {
                lhs: Box::new(lhs),
                rhs: Some(Box::new(rhs)),
                op: BoolOp::Xor,
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_not()?;
        while self.accept(&TokenKind::And) {
            let rhs = self.parse_not()?;
            lhs = Expr::Bool {
                lhs: Box::new(lhs),
                rhs: Some(Box::new(rhs)),
                op: BoolOp::And,
            };
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if self.accept(&TokenKind::Not) {
            let term = self.parse_not()?;
            return Ok(Expr::Bool {
                lhs: Box::new(term),
                rhs: None,
                op: BoolOp::Not,
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_additive()?;

        let op = match self.peek() {
            Some(TokenKind::Equ) => CompOp::Equ,
            Some(TokenKind::Neq) => CompOp::Neq,
            Some(TokenKind::Gt) => CompOp::Gt,
            Some(TokenKind::Lt) => CompOp::Lt,
            Some(TokenKind::Geq) => CompOp::Geq,
            Some(TokenKind::Leq) => CompOp::Leq,
            _ => return Ok(lhs),
        };
        self.pos += 1;

        let rhs = self.parse_additive()?;
        Ok(Expr::Comp {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            op,
        })
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let inverted = match self.peek() {
                Some(TokenKind::Plus) => false,
                Some(TokenKind::Minus) => true,
                _ => break,
            };
            self.pos += 1;

            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Plus {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                inverted,
            };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(TokenKind::Star) => {
                    self.pos += 1;
                    let rhs = self.parse_unary()?;
                    lhs = Expr::Mult {
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                        inverted: false,
                    };
                }
                Some(TokenKind::Slash) => {
                    self.pos += 1;
                    let rhs = self.parse_unary()?;
                    lhs = Expr::Mult {
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                        inverted: true,
                    };
                }
                Some(TokenKind::Percent) => {
                    self.pos += 1;
                    let rhs = self.parse_unary()?;
                    lhs = Expr::Mod {
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    };
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.accept(&TokenKind::Minus) {
            let term = self.parse_unary()?;
            return Ok(Expr::UnaryMinus(Box::new(term)));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_postfix()?;
        if self.accept(&TokenKind::Pow) {
            // right-associative; the exponent may carry a unary minus
            let rhs = self.parse_unary()?;
            return Ok(Expr::Pow {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        }
        Ok(lhs)
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;

        loop {
            if self.accept(&TokenKind::LBracket) {
                let idx = self.parse_array_index()?;
                expr = Expr::ArrayAccess {
                    term: Box::new(expr),
                    idx,
                };
            } else if self.accept(&TokenKind::Apostrophe) {
                expr = Expr::Transpose(Box::new(expr));
            } else {
                break;
            }
        }

        Ok(expr)
    }

    /// Indices after a consumed `[`, up to and including the closing `]`.
    fn parse_array_index(&mut self) -> Result<ArrayIndex, ParseError> {
        let mut items = Vec::new();
        let mut ranges = Vec::new();

        loop {
            let expr = self.parse_expr()?;
            if self.accept(&TokenKind::Range) {
                let end = self.parse_expr()?;
                ranges.push((expr, end));
            } else {
                items.push(expr);
            }

            if !self.accept(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBracket)?;

        match (items.len(), ranges.len()) {
            (_, 0) => Ok(ArrayIndex::Elements(items)),
            (0, 1) => {
                let (begin, end) = ranges.pop().expect("one range");
                Ok(ArrayIndex::Range(Box::new(begin), Box::new(end)))
            }
            _ => Ok(ArrayIndex::RangedMulti),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.peek().cloned() {
            Some(TokenKind::Int(val)) => {
                self.pos += 1;
                Ok(Expr::IntConst(val))
            }
            Some(TokenKind::Real(val)) => {
                self.pos += 1;
                Ok(Expr::RealConst(val))
            }
            Some(TokenKind::Str(val)) => {
                self.pos += 1;
                Ok(Expr::StrConst(val))
            }
            Some(TokenKind::Bool(val)) => {
                self.pos += 1;
                Ok(Expr::BoolConst(val))
            }
            Some(TokenKind::LParen) => {
                if let Some(cplx) = self.try_parse_cplx_literal() {
                    return Ok(cplx);
                }
                self.pos += 1;
                let expr = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(expr)
            }
            Some(TokenKind::Pipe) => {
                self.pos += 1;
                let expr = self.parse_expr()?;
                self.expect(&TokenKind::Pipe)?;
                Ok(Expr::Norm(Box::new(expr)))
            }
            Some(TokenKind::LBracket) => {
                self.pos += 1;
                let mut elems = Vec::new();
                if !self.accept(&TokenKind::RBracket) {
                    loop {
                        elems.push(self.parse_expr()?);
                        if !self.accept(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(&TokenKind::RBracket)?;
                }
                Ok(Expr::ArrayLit { elems, ty: None })
            }
            Some(TokenKind::Ident(name)) => {
                self.pos += 1;
                if self.accept(&TokenKind::LParen) {
                    let mut args = Vec::new();
                    if !self.accept(&TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.accept(&TokenKind::Comma) {
                                break;
                            }
                        }
                        self.expect(&TokenKind::RParen)?;
                    }
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Var(name))
                }
            }
            other => Err(self.error(format!("Unexpected token {other:?} in expression."))),
        }
    }

    /// `( re, im )` with numeric literals, optionally signed. Backtracks
    /// when the parenthesis turns out to be a grouped expression.
    fn try_parse_cplx_literal(&mut self) -> Option<Expr> {
        let start = self.pos;
        let result = self.parse_cplx_literal();
        if result.is_none() {
            self.pos = start;
        }
        result
    }

    fn parse_cplx_literal(&mut self) -> Option<Expr> {
        self.pos += 1; // '('

        let re = self.parse_signed_number()?;
        if !self.accept(&TokenKind::Comma) {
            return None;
        }
        let im = self.parse_signed_number()?;
        if !self.accept(&TokenKind::RParen) {
            return None;
        }

        Some(Expr::CplxConst(Complex::new(re, im)))
    }

    fn parse_signed_number(&mut self) -> Option<f64> {
        let neg = self.accept(&TokenKind::Minus);
        let val = match self.peek() {
            Some(TokenKind::Real(val)) => *val,
            Some(TokenKind::Int(val)) => *val as f64,
            _ => {
                return None;
            }
        };
        self.pos += 1;
        Some(if neg { -val } else { val })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_src(src: &str) -> (Program, SymTab) {
        let mut syms = SymTab::new();
        let prog = Parser::new(src, "<test>", &mut syms)
            .expect("lex")
            .parse()
            .expect("parse");
        (prog, syms)
    }

    #[test]
    fn test_declaration_with_init() {
        let (prog, syms) = parse_src("program p\ninteger :: x = 2\nend program");
        assert_eq!(prog.name, "p");
        assert_eq!(prog.stmts.len(), 1);

        match &prog.stmts[0] {
            Stmt::VarDecl { names, init } => {
                assert_eq!(names, &["x".to_string()]);
                assert!(init.is_some());
            }
            other => panic!("expected declaration, got {other:?}"),
        }

        assert_eq!(syms.find("x").expect("symbol").ty, SymbolType::Int);
    }

    #[test]
    fn test_array_declaration() {
        let (_, syms) = parse_src("program p\nreal, dimension(2, 3) :: m\nend program");
        let sym = syms.find("m").expect("symbol");
        assert_eq!(sym.ty, SymbolType::RealArr);
        assert_eq!(sym.dims, vec![2, 3]);
    }

    #[test]
    fn test_if_else() {
        let (prog, _) = parse_src(
            "program p\nlogical :: b\nif b then\nb = .false.\nelse\nb = .true.\nend if\nend program",
        );
        match &prog.stmts[1] {
            Stmt::Cond {
                else_branch: Some(else_branch),
                ..
            } => assert_eq!(else_branch.len(), 1),
            other => panic!("expected if/else, got {other:?}"),
        }
    }

    #[test]
    fn test_counted_loop() {
        let (prog, _) = parse_src(
            "program p\ninteger :: i, s\ndo i = 1, 5\ns = s + i\nend do\nend program",
        );
        match &prog.stmts[1] {
            Stmt::RangedLoop { range, body } => {
                assert_eq!(range.ident, "i");
                assert!(range.inc.is_none());
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected counted loop, got {other:?}"),
        }
    }

    #[test]
    fn test_function_result_variable() {
        let (prog, syms) = parse_src(
            "program p\nfunction add(integer :: a, integer :: b) result(integer)\nadd = a + b\nend function\nend program",
        );

        match &prog.stmts[0] {
            Stmt::Func(func) => {
                assert_eq!(func.name, "add");
                assert_eq!(func.retty, SymbolType::Int);
                assert_eq!(func.rets.len(), 1);
                assert_eq!(func.rets[0].name, "add");
            }
            other => panic!("expected function, got {other:?}"),
        }

        // the function, its arguments and its result variable
        let func = syms.find("add").expect("function symbol");
        assert_eq!(func.argty.len(), 2);
        assert!(syms.find("add::a").expect("arg").is_arg);
        assert!(syms.find("add::add").expect("result var").is_ret);
    }

    #[test]
    fn test_multi_return_function() {
        let (_, syms) = parse_src(
            "program p\nfunction mm(integer :: a) results(integer :: q, integer :: r)\nq = a\nr = a\nend function\nend program",
        );
        let func = syms.find("mm").expect("function");
        assert_eq!(func.retty, SymbolType::Comp);
        assert_eq!(func.elems.len(), 2);
    }

    #[test]
    fn test_array_assignment_vs_access() {
        let (prog, _) = parse_src(
            "program p\nreal, dimension(3) :: v\nv[0] = 1.5\nv[1 ~ 2] = 0.0\nend program",
        );
        assert!(matches!(
            &prog.stmts[1],
            Stmt::ArrayAssign {
                idx: ArrayIndex::Elements(_),
                ..
            }
        ));
        assert!(matches!(
            &prog.stmts[2],
            Stmt::ArrayAssign {
                idx: ArrayIndex::Range(_, _),
                ..
            }
        ));
    }

    #[test]
    fn test_complex_literal_vs_parens() {
        let (prog, _) = parse_src("program p\ncomplex :: c\nc = (1.5, -2.5)\nend program");
        match &prog.stmts[1] {
            Stmt::Assign { expr, .. } => {
                assert_eq!(*expr, Expr::CplxConst(Complex::new(1.5, -2.5)));
            }
            other => panic!("expected assignment, got {other:?}"),
        }

        let (prog, _) = parse_src("program p\ninteger :: x\nx = (1 + 2) * 3\nend program");
        match &prog.stmts[1] {
            Stmt::Assign { expr, .. } => {
                assert!(matches!(expr, Expr::Mult { .. }));
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn test_precedence() {
        let (prog, _) = parse_src("program p\ninteger :: x\nx = 1 + 2 * 3\nend program");
        match &prog.stmts[1] {
            Stmt::Assign { expr, .. } => match expr {
                Expr::Plus { rhs, inverted, .. } => {
                    assert!(!inverted);
                    assert!(matches!(**rhs, Expr::Mult { .. }));
                }
                other => panic!("expected addition on top, got {other:?}"),
            },
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn test_bare_return_before_assignment() {
        let (prog, _) = parse_src(
            "program p\nfunction f(integer :: a) result(integer)\nreturn\nf = a\nend function\nend program",
        );
        match &prog.stmts[0] {
            Stmt::Func(func) => {
                assert!(matches!(
                    func.body[0],
                    Stmt::Return {
                        jump_only: true,
                        ..
                    }
                ));
            }
            other => panic!("expected function, got {other:?}"),
        }
    }

    #[test]
    fn test_select_case() {
        let (prog, _) = parse_src(
            "program p\ninteger :: x\nselect case (x)\ncase (1)\nx = 10\ncase (2)\nx = 20\ncase default\nx = 0\nend select\nend program",
        );
        match &prog.stmts[1] {
            Stmt::Cases { cases, default, .. } => {
                assert_eq!(cases.len(), 2);
                assert!(default.is_some());
            }
            other => panic!("expected select, got {other:?}"),
        }
    }

    #[test]
    fn test_goto_label() {
        let (prog, _) = parse_src(
            "program p\ninteger :: x\n.again\nx = x + 1\nif x < 3 then\ngoto .again\nend if\nend program",
        );
        assert!(matches!(&prog.stmts[1], Stmt::Label(name) if name == "again"));
    }

    #[test]
    fn test_norm_expression() {
        let (prog, _) = parse_src("program p\nreal :: r\nr = |r|\nend program");
        match &prog.stmts[1] {
            Stmt::Assign { expr, .. } => assert!(matches!(expr, Expr::Norm(_))),
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_error_has_line() {
        let mut syms = SymTab::new();
        let err = Parser::new("program p\ninteger ::\nend program", "prog.muf", &mut syms)
            .expect("lex")
            .parse()
            .expect_err("must fail");
        assert!(err.to_string().starts_with("prog.muf:2:"));
    }
}
