//! Zero-address code generation.
//!
//! The generator is a post-order walker over the AST that appends
//! instructions to an in-memory byte image. Every jump, call and
//! constant-reference immediate is emitted as a zeroed placeholder slot and
//! recorded in a patch list; `finish` appends the constants pool and
//! rewrites all recorded slots once the final addresses are known.
//!
//! In-stream addresses are relative: the VM resolves an `ADDR_IP` immediate
//! against the instruction pointer *after* fetching the consuming opcode, so
//! a patched slot holds `target − site − (ADDR_SIZE + 1)`.

mod arr;
mod error;
mod flow;
mod func;
mod ops;
mod var;

pub use error::CodegenError;

use std::collections::HashMap;

use muf_core::value::{ADDR_SIZE, BOOL_SIZE, BYTE_SIZE, CPLX_SIZE, INT_SIZE, REAL_SIZE};
use muf_core::{wire, Addr, Int, OpCode, VmType};

use crate::ast::{Expr, Stmt};
use crate::consttab::ConstTab;
use crate::symtab::{SymTab, Symbol, SymbolType, SCOPE_SEP};

/// Size of a relative-address immediate including its tag byte. Patched
/// jump offsets are measured past this.
const REL_ADDR_SIZE: Addr = ADDR_SIZE + BYTE_SIZE;

/// A call site awaiting the callee's entry address.
#[derive(Debug)]
struct CallPatch {
    callee: String,
    site: usize,
    argc: Int,
}

pub struct Codegen<'a> {
    syms: &'a mut SymTab,
    buf: Vec<u8>,
    consttab: ConstTab,

    /// Currently active function scope path.
    cur_scope: Vec<String>,
    /// Accumulated local-frame size per function.
    local_stack: HashMap<String, Addr>,
    /// Accumulated global-frame size.
    global_stack: Addr,

    /// Call sites to patch with function entry addresses.
    call_patches: Vec<CallPatch>,
    /// Early returns jumping to the end of the current function.
    endfunc_patches: Vec<usize>,
    /// Plain returns jumping to the push-return-values label.
    pushret_patches: Vec<usize>,

    /// Loop bookkeeping: unique ids, the stack of active loops, and queued
    /// continue/break sites per loop id.
    loop_ident: usize,
    cur_loop: Vec<usize>,
    loop_begin_patches: HashMap<usize, Vec<usize>>,
    loop_end_patches: HashMap<usize, Vec<usize>>,

    /// Label positions and goto sites awaiting them.
    labels: HashMap<String, usize>,
    goto_patches: Vec<(String, usize)>,

    /// Constant-reference slots: (slot position, offset relative to the
    /// constants-pool base). The pool base is added during `finish`.
    const_slots: Vec<(usize, Addr)>,

    /// Function-reference slots (a function used as a value, e.g. an ISR
    /// handler): patched with the absolute entry address.
    func_addr_patches: Vec<(String, usize)>,

    /// Optional entry function called by the start-up prelude.
    entry_func: Option<String>,

    debug: bool,
}

impl<'a> Codegen<'a> {
    pub fn new(syms: &'a mut SymTab) -> Self {
        Codegen {
            syms,
            buf: Vec::new(),
            consttab: ConstTab::new(),
            cur_scope: Vec::new(),
            local_stack: HashMap::new(),
            global_stack: 0,
            call_patches: Vec::new(),
            endfunc_patches: Vec::new(),
            pushret_patches: Vec::new(),
            loop_ident: 0,
            cur_loop: Vec::new(),
            loop_begin_patches: HashMap::new(),
            loop_end_patches: HashMap::new(),
            labels: HashMap::new(),
            goto_patches: Vec::new(),
            const_slots: Vec::new(),
            func_addr_patches: Vec::new(),
            entry_func: None,
            debug: false,
        }
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// Call the named function from the start-up prelude instead of falling
    /// straight into the global statements.
    pub fn set_entry_func(&mut self, name: impl Into<String>) {
        self.entry_func = Some(name.into());
    }

    // ------------------------------------------------------------------------
    // symbol access
    // ------------------------------------------------------------------------

    /// Fully qualified name of `name` in the active scope.
    fn scoped_name(&self, name: &str) -> String {
        let mut scoped = String::new();
        for scope in &self.cur_scope {
            scoped += scope;
            scoped += SCOPE_SEP;
        }
        scoped += name;
        scoped
    }

    /// Look up a symbol in the active scope, falling back to the global
    /// scope. Returns a snapshot copy.
    pub(crate) fn get_sym(&self, name: &str) -> Result<Symbol, CodegenError> {
        let scoped = self.scoped_name(name);
        if let Some(sym) = self.syms.find(&scoped) {
            return Ok(sym.clone());
        }
        if let Some(sym) = self.syms.find(name) {
            return Ok(sym.clone());
        }

        Err(CodegenError::new(format!(
            "\"{scoped}\" does not have an associated symbol."
        )))
    }

    /// Mutate the table entry behind `name` (scoped lookup as `get_sym`).
    fn with_sym_mut<T>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut Symbol) -> T,
    ) -> Result<T, CodegenError> {
        let scoped = self.scoped_name(name);
        let key = if self.syms.find(&scoped).is_some() {
            scoped
        } else if self.syms.find(name).is_some() {
            name.to_string()
        } else {
            return Err(CodegenError::new(format!(
                "\"{scoped}\" does not have an associated symbol."
            )));
        };

        Ok(f(self.syms.find_mut(&key).expect("symbol just found")))
    }

    /// Dummy symbol carrying only a type, for literals and intermediates.
    pub(crate) fn type_const(&self, ty: SymbolType) -> Symbol {
        Symbol::type_const(ty)
    }

    // ------------------------------------------------------------------------
    // sizes and frames
    // ------------------------------------------------------------------------

    /// Bytes a symbol occupies inside a stack frame, tag byte included.
    pub(crate) fn sym_size(sym: &Symbol) -> Result<Addr, CodegenError> {
        let size = match sym.ty {
            SymbolType::Real => REAL_SIZE + BYTE_SIZE,
            SymbolType::Int => INT_SIZE + BYTE_SIZE,
            SymbolType::Bool => BOOL_SIZE + BYTE_SIZE,
            SymbolType::Cplx => CPLX_SIZE + BYTE_SIZE,
            SymbolType::String => {
                BYTE_SIZE + ADDR_SIZE + sym.total_size() as Addr
            }
            SymbolType::RealArr => {
                BYTE_SIZE + ADDR_SIZE + sym.total_size() as Addr * REAL_SIZE
            }
            SymbolType::IntArr => {
                BYTE_SIZE + ADDR_SIZE + sym.total_size() as Addr * INT_SIZE
            }
            SymbolType::CplxArr => {
                BYTE_SIZE + ADDR_SIZE + sym.total_size() as Addr * CPLX_SIZE
            }
            _ => {
                return Err(CodegenError::new(format!(
                    "Invalid symbol type for \"{}\".",
                    sym.name
                )))
            }
        };

        Ok(size)
    }

    /// Total size of the local variables of `func` (or of the globals when
    /// `None`), i.e. the frame size pushed at call sites.
    pub(crate) fn frame_size(&self, func: Option<&Symbol>) -> Result<Addr, CodegenError> {
        let scope = match func {
            Some(func) => format!("{}{}", func.scoped_name, SCOPE_SEP),
            None => String::new(),
        };

        let mut needed = 0;
        for sym in self.syms.find_in_scope(&scope, true) {
            if sym.ty == SymbolType::Func {
                continue;
            }
            needed += Self::sym_size(sym)?;
        }

        Ok(needed)
    }

    // ------------------------------------------------------------------------
    // raw emission
    // ------------------------------------------------------------------------

    pub(crate) fn pos(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn emit_op(&mut self, op: OpCode) {
        self.buf.push(op.into());
    }

    pub(crate) fn emit_push_real(&mut self, val: f64) {
        self.emit_op(OpCode::Push);
        self.buf.push(VmType::Real.into());
        wire::put_real(&mut self.buf, val);
    }

    pub(crate) fn emit_push_int(&mut self, val: Int) {
        self.emit_op(OpCode::Push);
        self.buf.push(VmType::Int.into());
        wire::put_int(&mut self.buf, val);
    }

    pub(crate) fn emit_push_cplx(&mut self, val: muf_core::Complex) {
        self.emit_op(OpCode::Push);
        self.buf.push(VmType::Cplx.into());
        wire::put_real(&mut self.buf, val.re);
        wire::put_real(&mut self.buf, val.im);
    }

    pub(crate) fn emit_push_bool(&mut self, val: bool) {
        self.emit_op(OpCode::Push);
        self.buf.push(VmType::Bool.into());
        self.buf.push(val as u8);
    }

    /// `PUSH <ty> <val>`; returns the position of the 4-byte payload slot
    /// for later patching.
    pub(crate) fn emit_push_addr(&mut self, ty: VmType, val: Addr) -> usize {
        self.emit_op(OpCode::Push);
        self.buf.push(ty.into());
        let slot = self.pos();
        wire::put_addr(&mut self.buf, val);
        slot
    }

    /// Push a zeroed IP-relative address, to be patched later.
    pub(crate) fn emit_addr_placeholder(&mut self) -> usize {
        self.emit_push_addr(VmType::AddrIp, 0)
    }

    /// Push a string literal: its pool offset is pushed as an IP-relative
    /// address (patched to the final pool position) and dereferenced.
    pub(crate) fn emit_push_str_const(&mut self, val: &str) {
        let pool_offs = self.consttab.add_const(val);

        self.emit_op(OpCode::Push);
        self.buf.push(VmType::AddrIp.into());
        let slot = self.pos();

        // offset assuming the pool starts at image position 0; finish()
        // adds the real pool base
        let rel = pool_offs - slot as Addr - REL_ADDR_SIZE;
        self.const_slots.push((slot, rel));
        wire::put_addr(&mut self.buf, rel);

        self.emit_op(OpCode::RdMem);
    }

    /// Remember a slot awaiting a function's absolute entry address.
    /// `scoped_name` is looked up verbatim at finalisation, so references
    /// resolve independently of the scope active at the use site.
    pub(crate) fn record_func_addr_slot(&mut self, scoped_name: &str, slot: usize) {
        self.func_addr_patches.push((scoped_name.to_string(), slot));
    }

    /// Rewrite the placeholder at `site` to jump to `target`.
    pub(crate) fn patch_rel(&mut self, site: usize, target: usize) {
        let val = target as Addr - site as Addr - REL_ADDR_SIZE;
        wire::write_addr(&mut self.buf, site, val);
    }

    // ------------------------------------------------------------------------
    // start-up and finalisation
    // ------------------------------------------------------------------------

    /// Emit the start-up prelude: allocate the global stack frame and,
    /// if configured, call the entry function and halt.
    pub fn start(&mut self) -> Result<(), CodegenError> {
        let global_framesize = self.frame_size(None)?;
        if global_framesize > 0 {
            if self.debug {
                println!("Global stack frame size: {global_framesize} bytes.");
            }
            self.emit_push_int(global_framesize as Int);
            self.emit_op(OpCode::AddFrame);
        }

        let Some(funcname) = self.entry_func.clone() else {
            // no entry function: execution starts with the global statements
            return Ok(());
        };

        let func = self.get_sym(&funcname)?;
        let framesize = self.frame_size(Some(&func))?;
        self.emit_push_int(framesize as Int);

        let slot = self.emit_addr_placeholder();
        self.emit_op(OpCode::Call);
        self.call_patches.push(CallPatch {
            callee: funcname,
            site: slot,
            argc: 0,
        });

        self.emit_op(OpCode::Halt);
        Ok(())
    }

    /// Emit the epilogue, append the constants pool and resolve every
    /// recorded patch. Returns the finished byte image.
    pub fn finish(mut self) -> Result<Vec<u8>, CodegenError> {
        // tear down the global stack frame
        let global_framesize = self.frame_size(None)?;
        if global_framesize > 0 {
            self.emit_push_int(global_framesize as Int);
            self.emit_op(OpCode::RemFrame);
        }

        self.emit_op(OpCode::Halt);

        // append the constants pool
        let consttab_pos = self.pos() as Addr;
        let pool = std::mem::take(&mut self.consttab).take_bytes();
        self.buf.extend_from_slice(&pool);

        // constant references: add the pool base to each recorded offset
        for (slot, rel) in std::mem::take(&mut self.const_slots) {
            wire::write_addr(&mut self.buf, slot, rel + consttab_pos);
        }

        // call sites: check arity, patch the entry address
        for patch in std::mem::take(&mut self.call_patches) {
            let sym = self.get_sym(&patch.callee)?;
            let Some(addr) = sym.addr else {
                return Err(CodegenError::new(format!(
                    "Function address for \"{}\" not known.",
                    patch.callee
                )));
            };

            let func_argc = sym.argty.len() as Int;
            if patch.argc != func_argc {
                return Err(CodegenError::new(format!(
                    "Function \"{}\" takes {} arguments, but {} were given.",
                    patch.callee, func_argc, patch.argc
                )));
            }

            self.patch_rel(patch.site, addr as usize);
        }

        // function references: absolute entry addresses
        for (name, slot) in std::mem::take(&mut self.func_addr_patches) {
            let sym = self.get_sym(&name)?;
            let Some(addr) = sym.addr else {
                return Err(CodegenError::new(format!(
                    "Function address for \"{name}\" not known."
                )));
            };
            wire::write_addr(&mut self.buf, slot, addr);
        }

        // goto sites
        for (label, site) in std::mem::take(&mut self.goto_patches) {
            let Some(&target) = self.labels.get(&label) else {
                return Err(CodegenError::new(format!("Label \"{label}\" not found.")));
            };
            self.patch_rel(site, target);
        }
        self.labels.clear();

        Ok(self.buf)
    }

    // ------------------------------------------------------------------------
    // dispatch
    // ------------------------------------------------------------------------

    /// Lower one statement.
    pub fn stmt(&mut self, stmt: &Stmt) -> Result<(), CodegenError> {
        match stmt {
            Stmt::VarDecl { names, init } => self.visit_var_decl(names, init.as_deref()),
            Stmt::Assign { targets, expr } => self.visit_assign(targets, expr).map(|_| ()),
            Stmt::ArrayAssign { name, idx, expr } => self.visit_array_assign(name, idx, expr),
            Stmt::Expr(expr) => self.expr(expr).map(|_| ()),
            Stmt::Func(func) => self.visit_func(func),
            Stmt::Return { exprs, jump_only } => self.visit_return(exprs, *jump_only),
            Stmt::Cond {
                cond,
                then_branch,
                else_branch,
            } => self.visit_cond(cond, then_branch, else_branch.as_deref()),
            Stmt::Cases {
                expr,
                cases,
                default,
            } => self.visit_cases(expr, cases, default.as_deref()),
            Stmt::Loop { cond, body } => self.visit_loop(cond, body),
            Stmt::RangedLoop { range, body } => self.visit_ranged_loop(range, body),
            Stmt::Break(depth) => self.visit_break(*depth),
            Stmt::Next(depth) => self.visit_next(*depth),
            Stmt::Label(name) => self.visit_label(name),
            Stmt::Goto(label) => self.visit_goto(label),
            Stmt::Comefrom(_) => Err(CodegenError::new("Comefrom is not (yet) implemented...")),
        }
    }

    /// Lower all statements of a block.
    pub fn stmts(&mut self, stmts: &[Stmt]) -> Result<(), CodegenError> {
        for stmt in stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    /// Lower one expression; the returned symbol carries the type
    /// information used for casting decisions.
    pub fn expr(&mut self, expr: &Expr) -> Result<Symbol, CodegenError> {
        match expr {
            Expr::RealConst(val) => {
                self.emit_push_real(*val);
                Ok(self.type_const(SymbolType::Real))
            }
            Expr::IntConst(val) => {
                self.emit_push_int(*val);
                Ok(self.type_const(SymbolType::Int))
            }
            Expr::CplxConst(val) => {
                self.emit_push_cplx(*val);
                Ok(self.type_const(SymbolType::Cplx))
            }
            Expr::BoolConst(val) => {
                self.emit_push_bool(*val);
                Ok(self.type_const(SymbolType::Bool))
            }
            Expr::StrConst(val) => {
                self.emit_push_str_const(val);
                Ok(self.type_const(SymbolType::String))
            }
            Expr::Var(name) => self.push_var(name),
            Expr::UnaryMinus(term) => self.visit_uminus(term),
            Expr::Norm(term) => self.visit_norm(term),
            Expr::Transpose(term) => self.visit_transpose(term),
            Expr::Plus { lhs, rhs, inverted } => self.visit_plus(lhs, rhs, *inverted),
            Expr::Mult { lhs, rhs, inverted } => self.visit_mult(lhs, rhs, *inverted),
            Expr::Mod { lhs, rhs } => self.visit_mod(lhs, rhs),
            Expr::Pow { lhs, rhs } => self.visit_pow(lhs, rhs),
            Expr::Comp { lhs, rhs, op } => self.visit_comp(lhs, rhs, *op),
            Expr::Bool { lhs, rhs, op } => self.visit_bool(lhs, rhs.as_deref(), *op),
            Expr::Call { name, args } => self.visit_call(name, args),
            Expr::ArrayAccess { term, idx } => self.visit_array_access(term, idx),
            Expr::ArrayLit { elems, ty } => self.visit_expr_list(elems, *ty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn compile(src: &str) -> (Vec<u8>, SymTab) {
        let mut syms = SymTab::new();
        crate::register_ext_funcs(&mut syms);

        let prog = Parser::new(src, "<test>", &mut syms)
            .expect("lex")
            .parse()
            .expect("parse");

        let mut gen = Codegen::new(&mut syms);
        gen.start().expect("start");
        gen.stmts(&prog.stmts).expect("stmts");
        let image = gen.finish().expect("finish");

        (image, syms)
    }

    const ADD_PROGRAM: &str = "program p\n\
        integer :: r\n\
        r = add(4, 6)\n\
        function add(integer :: a, integer :: b) result(integer)\n\
        add = a + b\n\
        end function\n\
        end program";

    /// All internal call sites in an image: (slot position, patched offset).
    fn call_sites(image: &[u8]) -> Vec<(usize, Addr)> {
        let mut sites = Vec::new();
        for pos in 0..image.len().saturating_sub(6) {
            if image[pos] == u8::from(OpCode::Push)
                && image[pos + 1] == u8::from(VmType::AddrIp)
                && image[pos + 6] == u8::from(OpCode::Call)
            {
                sites.push((pos + 2, wire::read_addr(image, pos + 2)));
            }
        }
        sites
    }

    #[test]
    fn test_call_site_offset_equals_entry_minus_site() {
        let (image, syms) = compile(ADD_PROGRAM);

        let entry = syms.find("add").expect("function").addr.expect("entry");
        let sites = call_sites(&image);
        assert_eq!(sites.len(), 1);

        let (site, offset) = sites[0];
        assert_eq!(offset, entry - site as Addr - REL_ADDR_SIZE);
    }

    #[test]
    fn test_function_end_address_recorded() {
        let (_, syms) = compile(ADD_PROGRAM);
        let func = syms.find("add").expect("function");
        assert!(func.end_addr.expect("end") > func.addr.expect("entry"));
    }

    #[test]
    fn test_local_offsets_negative_and_args_positive() {
        let (_, syms) = compile(ADD_PROGRAM);

        // the result variable is the only local
        let ret = syms.find("add::add").expect("result variable");
        assert_eq!(ret.addr, Some(-9));

        // arguments sit above the saved IP and BP (2 * 5 bytes)
        assert_eq!(syms.find("add::a").expect("arg").addr, Some(10));
        assert_eq!(syms.find("add::b").expect("arg").addr, Some(19));
    }

    #[test]
    fn test_frame_size_pushed_at_call_site() {
        let (image, _) = compile(ADD_PROGRAM);

        // the call sequence is PUSH INT <framesize>, PUSH ADDR_IP <offs>, CALL
        let (site, _) = call_sites(&image)[0];
        let framesize_push = site - 2 - 10;
        assert_eq!(image[framesize_push], u8::from(OpCode::Push));
        assert_eq!(image[framesize_push + 1], u8::from(VmType::Int));
        // one 9-byte integer local (the result variable)
        assert_eq!(wire::read_int(&image, framesize_push + 2), 9);
    }

    #[test]
    fn test_cumulative_local_offsets_cover_frame() {
        let (_, syms) = compile(
            "program p\n\
             function f() result(integer)\n\
             integer :: x\n\
             real :: y\n\
             f = x\n\
             end function\n\
             integer :: r\n\
             r = f()\n\
             end program",
        );

        // result (9) + x (9) + y (9): every offset negative, the deepest
        // offset equals the frame size
        let offsets: Vec<Addr> = ["f::f", "f::x", "f::y"]
            .iter()
            .map(|name| syms.find(name).expect("local").addr.expect("alloc"))
            .collect();
        assert!(offsets.iter().all(|&offs| offs < 0));
        assert_eq!(offsets.iter().map(|offs| -offs).max(), Some(27));
    }

    #[test]
    fn test_globals_grow_negatively_from_gbp() {
        let (_, syms) = compile(
            "program p\ninteger :: a\nreal :: b\nend program",
        );
        assert_eq!(syms.find("a").expect("a").addr, Some(-9));
        assert_eq!(syms.find("b").expect("b").addr, Some(-18));
        assert!(syms.find("a").expect("a").is_global);
    }

    #[test]
    fn test_matmul_emitted_with_dims() {
        let (image, _) = compile(
            "program p\n\
             real, dimension(2, 3) :: a\n\
             real, dimension(3, 2) :: b\n\
             real, dimension(2, 2) :: c\n\
             c = a * b\n\
             end program",
        );
        assert!(image.contains(&u8::from(OpCode::MatMul)));
    }

    #[test]
    fn test_nop_backpatched_to_cast() {
        // int + real forces the int operand's NOP slot into a TOR
        let (image, _) = compile(
            "program p\n\
             integer :: i\n\
             real :: x\n\
             real :: r\n\
             r = i + x\n\
             end program",
        );
        assert!(image.contains(&u8::from(OpCode::ToR)));
    }

    #[test]
    fn test_break_outside_loop_fails() {
        let mut syms = SymTab::new();
        let prog = Parser::new("program p\nbreak\nend program", "<test>", &mut syms)
            .expect("lex")
            .parse()
            .expect("parse");

        let mut gen = Codegen::new(&mut syms);
        gen.start().expect("start");
        assert!(gen.stmts(&prog.stmts).is_err());
    }

    #[test]
    fn test_redeclaration_fails() {
        let mut syms = SymTab::new();
        // the duplicate is rejected during parsing already
        assert!(Parser::new(
            "program p\ninteger :: x\ninteger :: x\nend program",
            "<test>",
            &mut syms,
        )
        .expect("lex")
        .parse()
        .is_err());
    }
}
