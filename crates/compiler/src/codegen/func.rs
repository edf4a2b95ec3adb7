//! Functions: definitions, call sites and returns.

use muf_core::{Addr, Int, OpCode};

use super::{CallPatch, Codegen, CodegenError, REL_ADDR_SIZE};
use crate::ast::{Expr, FuncDef};
use crate::symtab::{Symbol, SymbolType};

impl Codegen<'_> {
    /// Lower a function definition.
    ///
    /// A safety jump over the body prevents fall-through execution; the
    /// epilogue loads the declared return variables, pushes the frame size
    /// and argument count and returns. Early `return` statements jump to
    /// the push-return or return label recorded here.
    pub(crate) fn visit_func(&mut self, func: &FuncDef) -> Result<(), CodegenError> {
        self.cur_scope.push(func.name.clone());

        // safety jump to the end of the function
        let safety_slot = self.emit_addr_placeholder();
        self.emit_op(OpCode::Jmp);

        // arguments live above the saved instruction and base pointers
        let mut frame_addr: Addr = 2 * REL_ADDR_SIZE;
        for (argidx, arg) in func.args.iter().enumerate() {
            let sym = self.get_sym(&arg.name)?;
            if sym.addr.is_some() {
                return Err(CodegenError::new(format!(
                    "Function \"{}\" argument \"{}\" already declared.",
                    func.name, arg.name
                )));
            }
            if !sym.is_arg {
                return Err(CodegenError::new(format!(
                    "Function \"{}\" variable \"{}\" is not an argument.",
                    func.name, arg.name
                )));
            }
            if sym.ty != arg.ty {
                return Err(CodegenError::new(format!(
                    "Function \"{}\" argument \"{}\" type mismatch.",
                    func.name, arg.name
                )));
            }
            if sym.argidx != argidx {
                return Err(CodegenError::new(format!(
                    "Function \"{}\" argument \"{}\" index mismatch.",
                    func.name, arg.name
                )));
            }

            let size = Self::sym_size(&sym)?;
            self.with_sym_mut(&arg.name, |sym| sym.addr = Some(frame_addr))?;
            frame_addr += size;
        }

        // record the entry address; the function's own symbol lives one
        // scope up, not inside its own scope
        let entry = self.pos() as Addr;
        self.with_parent_sym_mut(&func.name, |sym| sym.addr = Some(entry))?;

        // the declared return variables have no declaration statement of
        // their own: give them frame storage and a zero value up front
        for ret in &func.rets {
            if self.get_sym(&ret.name)?.addr.is_none() {
                self.alloc_storage(&ret.name)?;
                self.default_init(&ret.name)?;
            }
        }

        self.stmts(&func.body)?;

        // label for plain returns: load the declared return values
        let pushret_pos = self.pos();
        for ret in &func.rets {
            self.push_var(&ret.name)?;
        }

        // label for value-carrying returns
        let ret_pos = self.pos();

        let func_sym = self.get_sym_in_parent_scope(&func.name)?;
        let framesize = self.frame_size(Some(&func_sym))?;
        self.emit_push_int(framesize as Int);
        self.emit_push_int(func.args.len() as Int);
        self.emit_op(OpCode::Ret);

        let end_pos = self.pos();
        self.with_parent_sym_mut(&func.name, |sym| sym.end_addr = Some(end_pos as Addr))?;

        // resolve early returns
        for site in std::mem::take(&mut self.pushret_patches) {
            self.patch_rel(site, pushret_pos);
        }
        for site in std::mem::take(&mut self.endfunc_patches) {
            self.patch_rel(site, ret_pos);
        }

        // resolve the safety jump
        self.patch_rel(safety_slot, end_pos);

        self.cur_loop.clear();
        self.cur_scope.pop();

        Ok(())
    }

    /// Look up the function's own symbol, which lives in the parent scope.
    fn get_sym_in_parent_scope(&mut self, name: &str) -> Result<Symbol, CodegenError> {
        let inner = self.cur_scope.pop();
        let res = self.get_sym(name);
        if let Some(inner) = inner {
            self.cur_scope.push(inner);
        }
        res
    }

    /// Mutate the function's own symbol in the parent scope.
    fn with_parent_sym_mut<T>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut Symbol) -> T,
    ) -> Result<T, CodegenError> {
        let inner = self.cur_scope.pop();
        let res = self.with_sym_mut(name, f);
        if let Some(inner) = inner {
            self.cur_scope.push(inner);
        }
        res
    }

    /// Emit a call into the host runtime: push the callee's name from the
    /// constants pool and dispatch by string.
    pub(crate) fn call_external(&mut self, funcname: &str) {
        self.emit_push_str_const(funcname);
        self.emit_op(OpCode::ExtCall);
    }

    /// Look up a callable symbol. A `result` variable shares its function's
    /// name inside the body, so the lookup skips non-function symbols;
    /// recursion then resolves to the function itself.
    fn get_func_sym(&self, name: &str) -> Result<Symbol, CodegenError> {
        let scoped = self.scoped_name(name);
        if let Some(sym) = self.syms.find(&scoped) {
            if sym.ty == SymbolType::Func {
                return Ok(sym.clone());
            }
        }
        if let Some(sym) = self.syms.find(name) {
            if sym.ty == SymbolType::Func {
                return Ok(sym.clone());
            }
        }

        Err(CodegenError::new(format!(
            "\"{name}\" is not a known function."
        )))
    }

    /// Lower a call site. Arguments are emitted in reverse order so the
    /// first argument ends up nearest the new frame.
    pub(crate) fn visit_call(
        &mut self,
        name: &str,
        args: &[Expr],
    ) -> Result<Symbol, CodegenError> {
        let func = self.get_func_sym(name)?;

        let num_args = func.argty.len();
        if args.len() != num_args {
            return Err(CodegenError::new(format!(
                "Invalid number of function arguments for \"{name}\": expected {num_args}, got {}.",
                args.len()
            )));
        }

        for arg in args.iter().rev() {
            self.expr(arg)?;
        }

        if func.is_external {
            // if an alternate external name is registered, the VM still
            // dispatches on the language-level name
            self.call_external(name);
        } else {
            let framesize = self.frame_size(Some(&func))?;
            self.emit_push_int(framesize as Int);

            let slot = self.emit_addr_placeholder();
            self.emit_op(OpCode::Call);

            self.call_patches.push(CallPatch {
                callee: name.to_string(),
                site: slot,
                argc: num_args as Int,
            });
        }

        let recursive = self.cur_scope.last().is_some_and(|scope| scope == name);
        if let Some(sym) = self.syms.find_mut(&func.scoped_name) {
            sym.refcnt += 1;
            if recursive {
                sym.is_recursive = true;
            }
        }
        Ok(func)
    }

    /// `return` without expressions jumps to the push-return label; with
    /// expressions it pushes them and jumps straight to the return label.
    pub(crate) fn visit_return(
        &mut self,
        exprs: &[Expr],
        jump_only: bool,
    ) -> Result<(), CodegenError> {
        if self.cur_scope.is_empty() {
            return Err(CodegenError::new("Return statement outside of a function."));
        }

        if jump_only {
            if !exprs.is_empty() {
                return Err(CodegenError::new(
                    "Given return values are not handled here, but automatically pushed at the end of the function.",
                ));
            }

            let slot = self.emit_addr_placeholder();
            self.pushret_patches.push(slot);
            self.emit_op(OpCode::Jmp);
        } else {
            for expr in exprs {
                self.expr(expr)?;
            }

            let slot = self.emit_addr_placeholder();
            self.endfunc_patches.push(slot);
            self.emit_op(OpCode::Jmp);
        }

        Ok(())
    }
}
