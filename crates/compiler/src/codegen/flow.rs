//! Control flow: conditionals, select/case, loops, break/next, labels.

use muf_core::{Int, OpCode};

use super::{Codegen, CodegenError};
use crate::ast::{Expr, Stmt, VarRange};

impl Codegen<'_> {
    /// If/then/else: the negated condition jumps over the then-branch; a
    /// then-branch with an else behind it ends in a jump over the latter.
    pub(crate) fn visit_cond(
        &mut self,
        cond: &Expr,
        then_branch: &[Stmt],
        else_branch: Option<&[Stmt]>,
    ) -> Result<(), CodegenError> {
        self.expr(cond)?;

        // if the condition is not fulfilled, skip the then-branch
        self.emit_op(OpCode::Not);
        let skip_then_slot = self.emit_addr_placeholder();
        self.emit_op(OpCode::JmpCnd);

        self.stmts(then_branch)?;

        let mut skip_else_slot = None;
        if else_branch.is_some() {
            skip_else_slot = Some(self.emit_addr_placeholder());
            self.emit_op(OpCode::Jmp);
        }

        let after_then = self.pos();
        self.patch_rel(skip_then_slot, after_then);

        if let Some(else_branch) = else_branch {
            self.stmts(else_branch)?;
            let after_else = self.pos();
            self.patch_rel(skip_else_slot.expect("else slot"), after_else);
        }

        Ok(())
    }

    /// Select/case: the scrutinee is re-evaluated and compared per case;
    /// every case body ends in a jump collected towards the end of the
    /// whole select.
    pub(crate) fn visit_cases(
        &mut self,
        expr: &Expr,
        cases: &[(Expr, Vec<Stmt>)],
        default: Option<&[Stmt]>,
    ) -> Result<(), CodegenError> {
        let mut end_slots = Vec::with_capacity(cases.len());

        for (case_expr, case_stmts) in cases {
            // case condition: scrutinee == case expression?
            self.expr(expr)?;
            self.expr(case_expr)?;
            self.emit_op(OpCode::Equ);

            // if not, skip this case body
            self.emit_op(OpCode::Not);
            let skip_case_slot = self.emit_addr_placeholder();
            self.emit_op(OpCode::JmpCnd);

            self.stmts(case_stmts)?;

            // skip the remaining cases
            let end_slot = self.emit_addr_placeholder();
            self.emit_op(OpCode::Jmp);
            end_slots.push(end_slot);

            let after_case = self.pos();
            self.patch_rel(skip_case_slot, after_case);
        }

        if let Some(default) = default {
            self.stmts(default)?;
        }

        let after_all = self.pos();
        for slot in end_slots {
            self.patch_rel(slot, after_all);
        }

        Ok(())
    }

    /// While loop with a header test.
    pub(crate) fn visit_loop(&mut self, cond: &Expr, body: &[Stmt]) -> Result<(), CodegenError> {
        self.loop_ident += 1;
        let loop_ident = self.loop_ident;
        self.cur_loop.push(loop_ident);

        let loop_begin = self.pos();

        self.expr(cond)?;

        // negated condition jumps past the loop
        self.emit_op(OpCode::Not);
        let skip_slot = self.emit_addr_placeholder();
        self.emit_op(OpCode::JmpCnd);

        self.stmts(body)?;

        // loop back
        let back_slot = self.emit_addr_placeholder();
        self.emit_op(OpCode::Jmp);
        self.patch_rel(back_slot, loop_begin);

        let after_block = self.pos();
        self.patch_rel(skip_slot, after_block);

        self.resolve_loop_patches(loop_ident, loop_begin, after_block);
        self.cur_loop.pop();

        Ok(())
    }

    /// Counted loop over a variable range.
    pub(crate) fn visit_ranged_loop(
        &mut self,
        range: &VarRange,
        body: &[Stmt],
    ) -> Result<(), CodegenError> {
        // counter = begin
        self.expr(&range.begin)?;
        let ctr_sym = self.get_sym(&range.ident)?;
        if ctr_sym.addr.is_none() {
            return Err(CodegenError::new(format!(
                "Counter variable \"{}\" has not been declared.",
                range.ident
            )));
        }
        self.cast_to(&ctr_sym, None, true)?;
        self.assign_var(&ctr_sym);

        self.loop_ident += 1;
        let loop_ident = self.loop_ident;
        self.cur_loop.push(loop_ident);

        let loop_begin = self.pos();

        // loop while counter <= end
        self.push_var(&range.ident)?;
        self.expr(&range.end)?;
        self.emit_op(OpCode::LEqu);

        self.emit_op(OpCode::Not);
        let skip_slot = self.emit_addr_placeholder();
        self.emit_op(OpCode::JmpCnd);

        self.stmts(body)?;

        // counter += increment (1 if not given)
        let loop_inc = self.pos();
        match &range.inc {
            Some(inc) => {
                self.expr(inc)?;
            }
            None => self.emit_push_int(1),
        }
        self.push_var(&range.ident)?;
        self.emit_op(OpCode::Add);
        self.assign_var(&ctr_sym);

        // loop back
        let back_slot = self.emit_addr_placeholder();
        self.emit_op(OpCode::Jmp);
        self.patch_rel(back_slot, loop_begin);

        let after_block = self.pos();
        self.patch_rel(skip_slot, after_block);

        // `next` must run the increment before re-testing the condition
        self.resolve_loop_patches(loop_ident, loop_inc, after_block);
        self.cur_loop.pop();

        Ok(())
    }

    /// Resolve queued continue/break sites of one finished loop.
    fn resolve_loop_patches(&mut self, loop_ident: usize, begin: usize, end: usize) {
        if let Some(sites) = self.loop_begin_patches.remove(&loop_ident) {
            for site in sites {
                self.patch_rel(site, begin);
            }
        }
        if let Some(sites) = self.loop_end_patches.remove(&loop_ident) {
            for site in sites {
                self.patch_rel(site, end);
            }
        }
    }

    /// Loop id addressed by a break/next of depth `n`; n = 1 is the
    /// innermost loop, out-of-range depths clamp to the outermost.
    fn loop_by_depth(&self, depth: Int) -> Result<usize, CodegenError> {
        if self.cur_loop.is_empty() {
            return Err(CodegenError::new("Break/next outside of a loop."));
        }

        let num_loops = self.cur_loop.len() as Int;
        let depth = if depth < 1 || depth > num_loops {
            num_loops
        } else {
            depth
        };

        Ok(self.cur_loop[(num_loops - depth) as usize])
    }

    pub(crate) fn visit_break(&mut self, depth: Int) -> Result<(), CodegenError> {
        let loop_ident = self.loop_by_depth(depth)?;

        let slot = self.emit_addr_placeholder();
        self.loop_end_patches.entry(loop_ident).or_default().push(slot);
        self.emit_op(OpCode::Jmp);

        Ok(())
    }

    pub(crate) fn visit_next(&mut self, depth: Int) -> Result<(), CodegenError> {
        let loop_ident = self.loop_by_depth(depth)?;

        let slot = self.emit_addr_placeholder();
        self.loop_begin_patches.entry(loop_ident).or_default().push(slot);
        self.emit_op(OpCode::Jmp);

        Ok(())
    }

    pub(crate) fn visit_label(&mut self, name: &str) -> Result<(), CodegenError> {
        let pos = self.pos();
        if self.labels.insert(name.to_string(), pos).is_some() {
            return Err(CodegenError::new(format!("Label \"{name}\" redefined.")));
        }
        Ok(())
    }

    pub(crate) fn visit_goto(&mut self, label: &str) -> Result<(), CodegenError> {
        let slot = self.emit_addr_placeholder();
        self.goto_patches.push((label.to_string(), slot));
        self.emit_op(OpCode::Jmp);
        Ok(())
    }
}
