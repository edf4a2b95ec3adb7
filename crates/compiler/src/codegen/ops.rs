//! Operators and type promotion.
//!
//! Binary arithmetic emits both operands with a one-byte NOP placeholder
//! after the first; once both operand types are known, the placeholder (or
//! the stream end) is back-patched with the cast opcode the promotion
//! lattice demands.

use muf_core::{Int, OpCode, VmType};

use super::{Codegen, CodegenError};
use crate::ast::{BoolOp, CompOp, Expr};
use crate::symtab::{Symbol, SymbolType};

/// Give `term`'s symbol a different primary type, keeping its dimensions.
fn retyped(term: &Symbol, ty: SymbolType) -> Symbol {
    let mut sym = term.clone();
    sym.ty = ty;
    sym
}

impl Codegen<'_> {
    /// Common type of a binary operation.
    ///
    /// Returns `(cast for lhs, cast for rhs, result type)`; `None` casts
    /// mean the operand is left untouched. Functions participate via their
    /// declared return type. Combinations the promotion table leaves
    /// undefined emit no casts and surface as runtime type errors.
    pub(crate) fn get_cast_sym_type(
        &self,
        term1: &Symbol,
        term2: &Symbol,
    ) -> (Option<Symbol>, Option<Symbol>, Symbol) {
        use SymbolType::*;

        let term1 = if term1.ty == Func {
            self.type_const(term1.retty)
        } else {
            term1.clone()
        };
        let term2 = if term2.ty == Func {
            self.type_const(term2.retty)
        } else {
            term2.clone()
        };

        let (ty1, ty2) = (term1.ty, term2.ty);
        if ty1 == ty2 {
            return (None, None, term1);
        }

        let tc = |ty| self.type_const(ty);

        match (ty1, ty2) {
            // scalar promotions
            (Int, Real) => (Some(tc(Real)), None, tc(Real)),
            (Real, Int) => (None, Some(tc(Real)), tc(Real)),
            (Int, Cplx) => (Some(tc(Cplx)), None, tc(Cplx)),
            (Cplx, Int) => (None, Some(tc(Cplx)), tc(Cplx)),
            (Real, Cplx) => (Some(tc(Cplx)), None, tc(Cplx)),
            (Cplx, Real) => (None, Some(tc(Cplx)), tc(Cplx)),

            // string mixes: the left operand decides
            (String, Real) | (String, Int) => (None, Some(tc(String)), tc(String)),
            (Real, String) => (None, Some(tc(Real)), tc(Real)),
            (Int, String) => (None, Some(tc(Int)), tc(Int)),
            (String, Cplx) | (Cplx, String) => (None, None, term1),

            // real array against scalars
            (RealArr, Real) => (None, None, term1),
            (RealArr, Int) => (None, Some(tc(Real)), term1),
            (Real, RealArr) => (None, None, term2),
            (Int, RealArr) => (Some(tc(Real)), None, term2),
            (RealArr, Cplx) => (Some(tc(CplxArr)), None, retyped(&term1, CplxArr)),
            (Cplx, RealArr) => (None, Some(tc(CplxArr)), retyped(&term2, CplxArr)),

            // integer array against scalars
            (IntArr, Int) => (None, None, term1),
            (IntArr, Real) => (Some(tc(RealArr)), None, retyped(&term1, RealArr)),
            (Int, IntArr) => (None, None, term2),
            (Real, IntArr) => (None, Some(tc(RealArr)), retyped(&term2, RealArr)),
            (IntArr, Cplx) => (Some(tc(CplxArr)), None, retyped(&term1, CplxArr)),
            (Cplx, IntArr) => (None, Some(tc(CplxArr)), retyped(&term2, CplxArr)),

            // complex array against scalars
            (CplxArr, Int) | (CplxArr, Real) => (None, Some(tc(Cplx)), term1),
            (Int, CplxArr) | (Real, CplxArr) => (Some(tc(Cplx)), None, term2),

            // array/array mixes promote towards complex
            (RealArr, CplxArr) => (Some(tc(CplxArr)), None, term2),
            (CplxArr, RealArr) => (None, Some(tc(CplxArr)), term1),
            (IntArr, CplxArr) => (Some(tc(CplxArr)), None, term2),
            (CplxArr, IntArr) => (None, Some(tc(CplxArr)), term1),
            (IntArr, RealArr) | (RealArr, IntArr) => (None, None, term1),

            // strings never mix with arrays
            (String, RealArr | IntArr | CplxArr) => (None, None, term1),
            (RealArr | IntArr | CplxArr, String) => (None, None, term1),

            // remaining combinations: cast the right operand to the left type
            _ => (None, Some(term1.clone()), term1),
        }
    }

    /// Emit (or back-patch at `pos`) a cast to `ty_to`'s type.
    ///
    /// Scalar casts are a single opcode and may be patched into a NOP slot;
    /// array casts additionally push the target element count and are only
    /// valid at the stream end.
    pub(crate) fn cast_to(
        &mut self,
        ty_to: &Symbol,
        pos: Option<usize>,
        allow_array_cast: bool,
    ) -> Result<(), CodegenError> {
        let op = match ty_to.ty {
            SymbolType::Real => OpCode::ToR,
            SymbolType::Int => OpCode::ToI,
            SymbolType::Cplx => OpCode::ToC,
            SymbolType::String => OpCode::ToS,
            SymbolType::Bool => OpCode::ToB,
            SymbolType::RealArr if allow_array_cast => OpCode::ToRealArr,
            SymbolType::IntArr if allow_array_cast => OpCode::ToIntArr,
            SymbolType::CplxArr if allow_array_cast => OpCode::ToCplxArr,
            _ => OpCode::Nop,
        };

        let to_arr = matches!(
            op,
            OpCode::ToRealArr | OpCode::ToIntArr | OpCode::ToCplxArr
        );

        if to_arr {
            if pos.is_some() {
                return Err(CodegenError::new(
                    "Array casts cannot be back-patched into an operand slot.",
                ));
            }

            // push the element count for broadcasting scalars
            let count = ty_to.total_size() as muf_core::Addr;
            self.emit_push_addr(VmType::AddrMem, count);
        }

        match pos {
            Some(pos) => self.buf[pos] = op.into(),
            None => self.emit_op(op),
        }

        Ok(())
    }

    /// Operand casts in binary operations. Array-to-array conversions are a
    /// bare opcode (no element count to push), so they too fit the one-byte
    /// NOP placeholder.
    fn operand_cast(&mut self, cast: &Symbol, pos: Option<usize>) -> Result<(), CodegenError> {
        if cast.ty.is_array() {
            let op = match cast.ty {
                SymbolType::RealArr => OpCode::ToRealArr,
                SymbolType::IntArr => OpCode::ToIntArr,
                SymbolType::CplxArr => OpCode::ToCplxArr,
                _ => unreachable!(),
            };
            match pos {
                Some(pos) => self.buf[pos] = op.into(),
                None => self.emit_op(op),
            }
            Ok(())
        } else {
            self.cast_to(cast, pos, false)
        }
    }

    /// Emit both operands of a binary node with a NOP placeholder between
    /// them, then patch in the casts the lattice requires: the first
    /// operand's cast lands in the placeholder, the second's is appended.
    fn binary_operands(
        &mut self,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<(Symbol, Symbol, Symbol), CodegenError> {
        let term1 = self.expr(lhs)?;
        let term1_pos = self.pos();
        self.emit_op(OpCode::Nop);

        let term2 = self.expr(rhs)?;

        let (cast1, cast2, result) = self.get_cast_sym_type(&term1, &term2);
        if let Some(cast) = cast1 {
            self.operand_cast(&cast, Some(term1_pos))?;
        }
        if let Some(cast) = cast2 {
            self.operand_cast(&cast, None)?;
        }

        Ok((term1, term2, result))
    }

    pub(crate) fn visit_uminus(&mut self, term: &Expr) -> Result<Symbol, CodegenError> {
        let sym = self.expr(term)?;
        self.emit_op(OpCode::USub);
        Ok(sym)
    }

    pub(crate) fn visit_norm(&mut self, term: &Expr) -> Result<Symbol, CodegenError> {
        let sym = self.expr(term)?;
        self.call_external("norm");
        Ok(sym)
    }

    /// Transpose needs the operand's shape at runtime: push the dimensions
    /// and route through the external call slot.
    pub(crate) fn visit_transpose(&mut self, term: &Expr) -> Result<Symbol, CodegenError> {
        let sym = self.expr(term)?;

        let (rows, cols) = match sym.dims.len() {
            2 => (sym.dims[0] as Int, sym.dims[1] as Int),
            1 => (1, sym.dims[0] as Int),
            _ => (1, 1),
        };
        self.emit_push_int(rows);
        self.emit_push_int(cols);
        self.call_external("transpose");

        // the result has swapped dimensions
        let mut result = sym;
        if result.dims.len() == 2 {
            result.dims.swap(0, 1);
        }
        Ok(result)
    }

    pub(crate) fn visit_plus(
        &mut self,
        lhs: &Expr,
        rhs: &Expr,
        inverted: bool,
    ) -> Result<Symbol, CodegenError> {
        let (_, _, result) = self.binary_operands(lhs, rhs)?;

        if inverted {
            self.emit_op(OpCode::Sub);
        } else {
            self.emit_op(OpCode::Add);
        }

        Ok(result)
    }

    pub(crate) fn visit_mult(
        &mut self,
        lhs: &Expr,
        rhs: &Expr,
        inverted: bool,
    ) -> Result<Symbol, CodegenError> {
        let (term1, term2, result) = self.binary_operands(lhs, rhs)?;

        // division
        if inverted {
            if term2.ty.is_array() {
                return Err(CodegenError::new("Cannot divide by array."));
            }
            self.emit_op(OpCode::Div);
            return Ok(result);
        }

        // multiplication: matrix products carry their dimensions
        let mut mat_dims: Option<(Int, Int, Int, Int)> = None;
        if result.ty.is_array() {
            if term1.dims.len() == 2 && term2.dims.len() == 1 {
                // matrix * vector
                mat_dims = Some((
                    term1.dims[0] as Int,
                    term1.dims[1] as Int,
                    term2.dims[0] as Int,
                    1,
                ));
            } else if term1.dims.len() == 1 && term2.dims.len() == 2 {
                // row vector * matrix
                mat_dims = Some((
                    1,
                    term1.dims[0] as Int,
                    term2.dims[0] as Int,
                    term2.dims[1] as Int,
                ));
            } else if term1.dims.len() == 2 && term2.dims.len() == 2 {
                // matrix * matrix
                mat_dims = Some((
                    term1.dims[0] as Int,
                    term1.dims[1] as Int,
                    term2.dims[0] as Int,
                    term2.dims[1] as Int,
                ));
            }
        }

        match mat_dims {
            Some((r1, c1, r2, c2)) => {
                self.emit_push_int(r1);
                self.emit_push_int(c1);
                self.emit_push_int(r2);
                self.emit_push_int(c2);
                self.emit_op(OpCode::MatMul);
            }
            None => self.emit_op(OpCode::Mul),
        }

        Ok(result)
    }

    pub(crate) fn visit_mod(&mut self, lhs: &Expr, rhs: &Expr) -> Result<Symbol, CodegenError> {
        let (_, _, result) = self.binary_operands(lhs, rhs)?;
        self.emit_op(OpCode::Mod);
        Ok(result)
    }

    pub(crate) fn visit_pow(&mut self, lhs: &Expr, rhs: &Expr) -> Result<Symbol, CodegenError> {
        let (_, _, result) = self.binary_operands(lhs, rhs)?;
        self.emit_op(OpCode::Pow);
        Ok(result)
    }

    pub(crate) fn visit_comp(
        &mut self,
        lhs: &Expr,
        rhs: &Expr,
        op: CompOp,
    ) -> Result<Symbol, CodegenError> {
        self.binary_operands(lhs, rhs)?;

        self.emit_op(match op {
            CompOp::Equ => OpCode::Equ,
            CompOp::Neq => OpCode::NEqu,
            CompOp::Gt => OpCode::Gt,
            CompOp::Lt => OpCode::Lt,
            CompOp::Geq => OpCode::GEqu,
            CompOp::Leq => OpCode::LEqu,
        });

        Ok(self.type_const(SymbolType::Bool))
    }

    pub(crate) fn visit_bool(
        &mut self,
        lhs: &Expr,
        rhs: Option<&Expr>,
        op: BoolOp,
    ) -> Result<Symbol, CodegenError> {
        self.expr(lhs)?;
        if let Some(rhs) = rhs {
            self.expr(rhs)?;
        }

        self.emit_op(match op {
            BoolOp::Xor => OpCode::Xor,
            BoolOp::Or => OpCode::Or,
            BoolOp::And => OpCode::And,
            BoolOp::Not => OpCode::Not,
        });

        Ok(self.type_const(SymbolType::Bool))
    }
}
