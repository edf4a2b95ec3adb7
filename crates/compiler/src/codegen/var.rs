//! Variables: declarations, reads, writes and default initialisers.

use muf_core::{Complex, OpCode, VmType};

use super::{Codegen, CodegenError};
use crate::ast::Stmt;
use crate::symtab::{Symbol, SymbolType};

impl Codegen<'_> {
    /// Declarations allocate frame storage: the accumulated (negative)
    /// offset from the base register becomes the symbol's address.
    pub(crate) fn visit_var_decl(
        &mut self,
        names: &[String],
        init: Option<&Stmt>,
    ) -> Result<(), CodegenError> {
        // names initialised by the declaration's own assignment
        let init_targets: &[String] = match init {
            Some(Stmt::Assign { targets, .. }) => targets,
            _ => &[],
        };

        for name in names {
            let sym = self.get_sym(name)?;
            if sym.is_arg {
                // arguments got their (positive) offsets with the function
                continue;
            }

            self.alloc_storage(name)?;
            if !init_targets.contains(name) {
                self.default_init(name)?;
            }
        }

        // the initialising assignment references the declared variables
        if let Some(init) = init {
            self.stmt(init)?;
        }

        Ok(())
    }

    /// Reserve frame storage for a variable: its size is added to the
    /// active frame counter and the negative accumulated offset becomes
    /// its address.
    pub(crate) fn alloc_storage(&mut self, name: &str) -> Result<(), CodegenError> {
        let is_global = self.cur_scope.is_empty();

        let sym = self.get_sym(name)?;
        if sym.addr.is_some() {
            return Err(CodegenError::new(format!(
                "Variable \"{name}\" already declared."
            )));
        }

        let size = Self::sym_size(&sym)?;
        let addr = if is_global {
            self.global_stack += size;
            -self.global_stack
        } else {
            let cur_func = self.cur_scope.last().expect("local scope").clone();
            let frame = self.local_stack.entry(cur_func).or_insert(0);
            *frame += size;
            -*frame
        };

        self.with_sym_mut(name, |sym| {
            sym.is_global = is_global;
            sym.addr = Some(addr);
        })
    }

    /// Initialise a freshly declared variable to zero of its type and shape.
    pub(crate) fn default_init(&mut self, name: &str) -> Result<(), CodegenError> {
        let sym = self.get_sym(name)?;

        match sym.ty {
            SymbolType::Int => self.emit_push_int(0),
            SymbolType::Real => self.emit_push_real(0.0),
            SymbolType::Cplx => self.emit_push_cplx(Complex::default()),
            SymbolType::Bool => self.emit_push_bool(false),
            SymbolType::String => self.emit_push_str_const(""),
            SymbolType::RealArr => {
                let total = sym.total_size();
                for _ in 0..total {
                    self.emit_push_real(0.0);
                }
                self.emit_make_arr(total, OpCode::MakeRealArr);
            }
            SymbolType::IntArr => {
                let total = sym.total_size();
                for _ in 0..total {
                    self.emit_push_int(0);
                }
                self.emit_make_arr(total, OpCode::MakeIntArr);
            }
            SymbolType::CplxArr => {
                let total = sym.total_size();
                for _ in 0..total {
                    self.emit_push_cplx(Complex::default());
                }
                self.emit_make_arr(total, OpCode::MakeCplxArr);
            }
            _ => {
                return Err(CodegenError::new(format!(
                    "Cannot initialise variable \"{name}\" of type {}.",
                    sym.ty
                )))
            }
        }

        self.assign_var(&sym);
        Ok(())
    }

    /// Push the element count and build an array from the pushed elements.
    pub(crate) fn emit_make_arr(&mut self, num_elems: usize, op: OpCode) {
        self.emit_push_addr(VmType::AddrMem, num_elems as muf_core::Addr);
        self.emit_op(op);
    }

    /// Emit instructions pushing a variable's value onto the stack.
    /// A function reference pushes its absolute entry address instead,
    /// patched once the address is known.
    pub(crate) fn push_var(&mut self, name: &str) -> Result<Symbol, CodegenError> {
        let sym = self.get_sym(name)?;

        if sym.ty == SymbolType::Func {
            let slot = self.emit_push_addr(VmType::AddrMem, 0);
            self.record_func_addr_slot(&sym.scoped_name, slot);
            self.with_sym_mut(name, |sym| sym.refcnt += 1)?;
            return Ok(sym);
        }

        let Some(addr) = sym.addr else {
            return Err(CodegenError::new(format!(
                "Variable \"{name}\" has not been declared."
            )));
        };

        let base = if sym.is_global {
            VmType::AddrGbp
        } else {
            VmType::AddrBp
        };
        self.emit_push_addr(base, addr);
        self.emit_op(OpCode::RdMem);

        self.with_sym_mut(name, |sym| sym.refcnt += 1)?;
        Ok(sym)
    }

    /// Assign the value on the stack to `sym`'s storage.
    pub(crate) fn assign_var(&mut self, sym: &Symbol) {
        let base = if sym.is_global {
            VmType::AddrGbp
        } else {
            VmType::AddrBp
        };
        self.emit_push_addr(base, sym.addr.expect("assign to declared variable"));
        self.emit_op(OpCode::WrMem);
    }

    /// `targets = expr`: the right-hand side is emitted once, then cast and
    /// written for each target in order.
    pub(crate) fn visit_assign(
        &mut self,
        targets: &[String],
        expr: &crate::ast::Expr,
    ) -> Result<Symbol, CodegenError> {
        // give array literals the element type of the first array target
        if let crate::ast::Expr::ArrayLit { elems, ty: None } = expr {
            if let Some(first) = targets.first() {
                let target = self.get_sym(first)?;
                if target.ty.is_array() {
                    let lit = self.visit_expr_list(elems, Some(target.ty))?;
                    return self.finish_assign(targets, lit);
                }
            }
        }

        let value = self.expr(expr)?;
        self.finish_assign(targets, value)
    }

    fn finish_assign(
        &mut self,
        targets: &[String],
        value: Symbol,
    ) -> Result<Symbol, CodegenError> {
        let mut sym_ret: Option<Symbol> = None;

        for name in targets {
            let sym = self.get_sym(name)?;
            if sym.addr.is_none() {
                return Err(CodegenError::new(format!(
                    "Variable \"{name}\" has not been declared."
                )));
            }

            self.cast_to(&sym, None, true)?;
            self.assign_var(&sym);

            sym_ret.get_or_insert(sym);
        }

        Ok(sym_ret.unwrap_or(value))
    }
}
