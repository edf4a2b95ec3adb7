//! Array access, array assignment and array construction.

use muf_core::{Int, OpCode, VmType};

use super::{Codegen, CodegenError};
use crate::ast::{ArrayIndex, Expr};
use crate::symtab::{Symbol, SymbolType};

impl Codegen<'_> {
    /// Array type and element type used for casting decisions; strings
    /// index to (one-character) strings.
    pub(crate) fn array_type_consts(
        &self,
        ty: SymbolType,
    ) -> Option<(Symbol, Symbol)> {
        let (arr, elem) = match ty {
            SymbolType::String => (SymbolType::String, SymbolType::String),
            SymbolType::RealArr => (SymbolType::RealArr, SymbolType::Real),
            SymbolType::IntArr => (SymbolType::IntArr, SymbolType::Int),
            SymbolType::CplxArr => (SymbolType::CplxArr, SymbolType::Cplx),
            _ => return None,
        };
        Some((self.type_const(arr), self.type_const(elem)))
    }

    /// Emit the index expressions of a single-element access, folding
    /// multi-dimensional indices into a flat offset with the row-major
    /// strides of `term`.
    fn emit_flat_index(
        &mut self,
        term: &Symbol,
        indices: &[Expr],
    ) -> Result<(), CodegenError> {
        if indices.len() > 1 {
            // multi-dimensional: one index per declared dimension
            if term.dims.len() != indices.len() {
                return Err(CodegenError::new(format!(
                    "Dimension mismatch in array access to \"{}\".",
                    term.name
                )));
            }

            for (cur_dim, idx) in indices.iter().enumerate() {
                let idx_sym = self.expr(idx)?;
                if idx_sym.ty != SymbolType::Int {
                    let int_const = self.type_const(SymbolType::Int);
                    self.cast_to(&int_const, None, false)?;
                }

                // scale by the product of the remaining dimensions
                let dims_rest = term.total_size_from(cur_dim + 1) as Int;
                if dims_rest > 1 {
                    self.emit_push_int(dims_rest);
                    self.emit_op(OpCode::Mul);
                }
            }

            for _ in 0..indices.len() - 1 {
                self.emit_op(OpCode::Add);
            }
        } else {
            let idx_sym = self.expr(&indices[0])?;
            if idx_sym.ty != SymbolType::Int {
                let int_const = self.type_const(SymbolType::Int);
                self.cast_to(&int_const, None, false)?;
            }
        }

        Ok(())
    }

    /// Emit the two bounds of a ranged access, cast to integers.
    fn emit_range(&mut self, begin: &Expr, end: &Expr) -> Result<(), CodegenError> {
        for bound in [begin, end] {
            let sym = self.expr(bound)?;
            if sym.ty != SymbolType::Int {
                let int_const = self.type_const(SymbolType::Int);
                self.cast_to(&int_const, None, false)?;
            }
        }
        Ok(())
    }

    pub(crate) fn visit_array_access(
        &mut self,
        term: &Expr,
        idx: &ArrayIndex,
    ) -> Result<Symbol, CodegenError> {
        let term_sym = self.expr(term)?;

        match idx {
            ArrayIndex::Elements(indices) => {
                self.emit_flat_index(&term_sym, indices)?;
                self.emit_op(OpCode::RdArr);

                let Some((_, elem_ty)) = self.array_type_consts(term_sym.ty) else {
                    return Err(CodegenError::new(format!(
                        "Invalid array type of \"{}\".",
                        term_sym.name
                    )));
                };
                Ok(elem_ty)
            }

            ArrayIndex::Range(begin, end) => {
                self.emit_range(begin, end)?;
                self.emit_op(OpCode::RdArrR);

                let Some((arr_ty, _)) = self.array_type_consts(term_sym.ty) else {
                    return Err(CodegenError::new(format!(
                        "Invalid array type of \"{}\".",
                        term_sym.name
                    )));
                };
                Ok(arr_ty)
            }

            ArrayIndex::RangedMulti => Err(CodegenError::new(
                "Ranged multi-dimensional array access not yet supported.",
            )),
        }
    }

    pub(crate) fn visit_array_assign(
        &mut self,
        name: &str,
        idx: &ArrayIndex,
        expr: &Expr,
    ) -> Result<(), CodegenError> {
        let sym = self.get_sym(name)?;
        let Some(addr) = sym.addr else {
            return Err(CodegenError::new(format!(
                "Variable \"{name}\" has not been declared."
            )));
        };

        // push the variable's address (no dereference)
        let base = if sym.is_global {
            VmType::AddrGbp
        } else {
            VmType::AddrBp
        };
        self.emit_push_addr(base, addr);

        let expr_sym = self.expr(expr)?;

        match idx {
            ArrayIndex::Elements(indices) => {
                let Some((_, elem_ty)) = self.array_type_consts(sym.ty) else {
                    return Err(CodegenError::new(format!(
                        "Invalid array element type in \"{name}\"."
                    )));
                };

                if expr_sym.ty != elem_ty.ty {
                    self.cast_to(&elem_ty, None, false)?;
                }

                self.emit_flat_index(&sym, indices)?;
                self.emit_op(OpCode::WrArr);
            }

            ArrayIndex::Range(begin, end) => {
                self.emit_range(begin, end)?;
                self.emit_op(OpCode::WrArrR);
            }

            ArrayIndex::RangedMulti => {
                return Err(CodegenError::new(
                    "Ranged multi-dimensional array access not yet supported.",
                ))
            }
        }

        Ok(())
    }

    /// Array construction from an expression list: every element is emitted
    /// and cast to the element type, then the count is pushed and the
    /// matching MAKE*ARR builds the array. Defaults to a real array when the
    /// element type is undetermined.
    pub(crate) fn visit_expr_list(
        &mut self,
        elems: &[Expr],
        ty: Option<SymbolType>,
    ) -> Result<Symbol, CodegenError> {
        let arr_ty = match ty {
            Some(ty) if ty.is_array() => ty,
            _ => SymbolType::RealArr,
        };
        let (arr_const, elem_const) = self
            .array_type_consts(arr_ty)
            .expect("array type has element type");

        for elem in elems {
            let elem_sym = self.expr(elem)?;
            if elem_sym.ty != elem_const.ty {
                self.cast_to(&elem_const, None, false)?;
            }
        }

        let make_op = match arr_ty {
            SymbolType::RealArr => OpCode::MakeRealArr,
            SymbolType::IntArr => OpCode::MakeIntArr,
            SymbolType::CplxArr => OpCode::MakeCplxArr,
            _ => unreachable!(),
        };
        self.emit_make_arr(elems.len(), make_op);

        let mut result = arr_const;
        result.dims = vec![elems.len()];
        Ok(result)
    }
}
