//! Arithmetic, comparison, logical, bit-level and cast operations.
//!
//! Integer arithmetic wraps (two's complement). Reals compare against the
//! runtime tolerance `eps`; arrays compare element-wise with the same
//! tolerance. Mixed operand types are a fatal error: the compiler inserts
//! the casts the promotion lattice requires, so anything left over is a
//! genuine type error.

use muf_core::value::int_pow;
use muf_core::{Complex, Int, OpCode, Real, VmType};

use crate::error::RuntimeError;
use crate::value::Value;
use crate::vm::Vm;

/// Binary arithmetic selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl ArithOp {
    fn name(self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "subtract",
            ArithOp::Mul => "multiply",
            ArithOp::Div => "divide",
            ArithOp::Mod => "modulo",
            ArithOp::Pow => "power",
        }
    }
}

impl Vm {
    // ------------------------------------------------------------------------
    // arithmetic
    // ------------------------------------------------------------------------

    pub(crate) fn op_usub(&mut self) -> Result<(), RuntimeError> {
        let (_, val) = self.pop_value()?;

        let result = match val {
            Value::Real(v) => Value::Real(-v),
            Value::Int(v) => Value::Int(v.wrapping_neg()),
            Value::Cplx(v) => Value::Cplx(-v),
            Value::RealArr(v) => Value::RealArr(v.into_iter().map(|x| -x).collect()),
            Value::IntArr(v) => Value::IntArr(v.into_iter().map(|x| x.wrapping_neg()).collect()),
            Value::CplxArr(v) => Value::CplxArr(v.into_iter().map(|x| -x).collect()),
            other => {
                return Err(RuntimeError::TypeMismatch {
                    op: "unary minus",
                    types: other.type_name().to_string(),
                })
            }
        };

        self.push_value(&result, VmType::AddrMem)
    }

    pub(crate) fn op_arith(&mut self, op: ArithOp) -> Result<(), RuntimeError> {
        let (_, val2) = self.pop_value()?;
        let (_, val1) = self.pop_value()?;

        let result = arith_values(val1, val2, op, self.eps)?;
        self.push_value(&result, VmType::AddrMem)
    }

    /// Matrix product: pops `(c2, r2, c1, r1)` then the two flat row-major
    /// arrays, second operand on top; pushes the `r1 × c2` product.
    pub(crate) fn op_matmul(&mut self) -> Result<(), RuntimeError> {
        let c2 = self.pop_int()?;
        let r2 = self.pop_int()?;
        let c1 = self.pop_int()?;
        let r1 = self.pop_int()?;

        let (_, rhs) = self.pop_value()?;
        let (_, lhs) = self.pop_value()?;

        if c1 != r2 {
            return Err(RuntimeError::DimensionMismatch(format!(
                "Matrix product of a {r1}x{c1} and a {r2}x{c2} matrix is undefined."
            )));
        }

        let check_len = |len: usize, rows: Int, cols: Int| {
            if len as Int != rows * cols {
                return Err(RuntimeError::DimensionMismatch(format!(
                    "Matrix operand has {len} elements, expected {rows}x{cols}."
                )));
            }
            Ok(())
        };

        let result = match (lhs, rhs) {
            (Value::RealArr(a), Value::RealArr(b)) => {
                check_len(a.len(), r1, c1)?;
                check_len(b.len(), r2, c2)?;
                Value::RealArr(mat_mul(&a, &b, r1, c1, c2, 0.0, |x, y| x * y, |acc, p| acc + p))
            }
            (Value::IntArr(a), Value::IntArr(b)) => {
                check_len(a.len(), r1, c1)?;
                check_len(b.len(), r2, c2)?;
                Value::IntArr(mat_mul(&a, &b, r1, c1, c2, 0, |x, y| x.wrapping_mul(y), |acc, p| {
                    acc.wrapping_add(p)
                }))
            }
            (Value::CplxArr(a), Value::CplxArr(b)) => {
                check_len(a.len(), r1, c1)?;
                check_len(b.len(), r2, c2)?;
                Value::CplxArr(mat_mul(
                    &a,
                    &b,
                    r1,
                    c1,
                    c2,
                    Complex::default(),
                    |x, y| x * y,
                    |acc, p| acc + p,
                ))
            }
            (lhs, rhs) => {
                return Err(RuntimeError::TypeMismatch {
                    op: "matrix product",
                    types: format!("{}, {}", lhs.type_name(), rhs.type_name()),
                })
            }
        };

        self.push_value(&result, VmType::AddrMem)
    }

    // ------------------------------------------------------------------------
    // comparisons
    // ------------------------------------------------------------------------

    pub(crate) fn op_comparison(&mut self, op: OpCode) -> Result<(), RuntimeError> {
        let (_, val2) = self.pop_value()?;
        let (_, val1) = self.pop_value()?;

        let eps = self.eps;
        let ordered = |cmp: std::cmp::Ordering| match op {
            OpCode::Gt => cmp.is_gt(),
            OpCode::Lt => cmp.is_lt(),
            OpCode::GEqu => cmp.is_ge(),
            OpCode::LEqu => cmp.is_le(),
            OpCode::Equ => cmp.is_eq(),
            OpCode::NEqu => !cmp.is_eq(),
            _ => unreachable!("comparison opcode"),
        };

        let equality = |equal: bool| -> Result<bool, RuntimeError> {
            match op {
                OpCode::Equ => Ok(equal),
                OpCode::NEqu => Ok(!equal),
                _ => Err(RuntimeError::TypeMismatch {
                    op: "comparison",
                    types: "ordering on unordered types".to_string(),
                }),
            }
        };

        let result = match (&val1, &val2) {
            (Value::Real(a), Value::Real(b)) => match op {
                OpCode::Equ => (a - b).abs() <= eps,
                OpCode::NEqu => (a - b).abs() > eps,
                _ => ordered(a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Less)),
            },
            (Value::Int(a), Value::Int(b)) => ordered(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => equality(a == b)?,
            (Value::Cplx(a), Value::Cplx(b)) => {
                equality((a.re - b.re).abs() <= eps && (a.im - b.im).abs() <= eps)?
            }
            (Value::Str(a), Value::Str(b)) => equality(a == b)?,
            (Value::RealArr(a), Value::RealArr(b)) => equality(
                a.len() == b.len()
                    && a.iter().zip(b).all(|(x, y)| (x - y).abs() <= eps),
            )?,
            (Value::IntArr(a), Value::IntArr(b)) => equality(a == b)?,
            (Value::CplxArr(a), Value::CplxArr(b)) => equality(
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|(x, y)| (x.re - y.re).abs() <= eps && (x.im - y.im).abs() <= eps),
            )?,
            _ => {
                return Err(RuntimeError::TypeMismatch {
                    op: "comparison",
                    types: format!("{}, {}", val1.type_name(), val2.type_name()),
                })
            }
        };

        self.push_value(&Value::Bool(result), VmType::AddrMem)
    }

    // ------------------------------------------------------------------------
    // logical and bit-level operations
    // ------------------------------------------------------------------------

    pub(crate) fn op_logical(&mut self, op: OpCode) -> Result<(), RuntimeError> {
        let val2 = self.pop_bool()?;
        let val1 = self.pop_bool()?;

        let result = match op {
            OpCode::And => val1 && val2,
            OpCode::Or => val1 || val2,
            OpCode::Xor => val1 ^ val2,
            _ => unreachable!("logical opcode"),
        };

        self.push_value(&Value::Bool(result), VmType::AddrMem)
    }

    pub(crate) fn op_not(&mut self) -> Result<(), RuntimeError> {
        let val = self.pop_bool()?;
        self.push_value(&Value::Bool(!val), VmType::AddrMem)
    }

    pub(crate) fn op_binary(&mut self, op: OpCode) -> Result<(), RuntimeError> {
        let (_, val2) = self.pop_value()?;
        let (_, val1) = self.pop_value()?;

        let (Value::Int(a), Value::Int(b)) = (&val1, &val2) else {
            return Err(RuntimeError::TypeMismatch {
                op: "binary",
                types: format!("{}, {}", val1.type_name(), val2.type_name()),
            });
        };

        let result = match op {
            OpCode::BinAnd => a & b,
            OpCode::BinOr => a | b,
            OpCode::BinXor => a ^ b,
            OpCode::Shl => a.wrapping_shl(*b as u32),
            OpCode::Shr => ((*a as u64) >> (*b as u32 % 64)) as Int,
            OpCode::RotL => a.rotate_left(*b as u32 % 64),
            OpCode::RotR => a.rotate_right(*b as u32 % 64),
            _ => unreachable!("binary opcode"),
        };

        self.push_value(&Value::Int(result), VmType::AddrMem)
    }

    pub(crate) fn op_binnot(&mut self) -> Result<(), RuntimeError> {
        let (_, val) = self.pop_value()?;
        let Value::Int(v) = val else {
            return Err(RuntimeError::TypeMismatch {
                op: "binary not",
                types: val.type_name().to_string(),
            });
        };
        self.push_value(&Value::Int(!v), VmType::AddrMem)
    }

    // ------------------------------------------------------------------------
    // casts
    // ------------------------------------------------------------------------

    /// Convert the value on top of the stack in place.
    pub(crate) fn op_cast(&mut self, to: VmType) -> Result<(), RuntimeError> {
        let (ty, val) = self.pop_value()?;
        if ty == to {
            return self.push_value(&val, VmType::AddrMem);
        }

        let result = self.cast_value(val, to)?;
        self.push_value(&result, VmType::AddrMem)
    }

    pub(crate) fn cast_value(&self, val: Value, to: VmType) -> Result<Value, RuntimeError> {
        let from = val.type_name();
        let invalid = |to: VmType| RuntimeError::InvalidCast {
            from,
            to: to.name(),
        };

        let result = match (val, to) {
            (val, VmType::Str) => Value::Str(self.format_value(&val)),

            (Value::Real(v), VmType::Int) => Value::Int(v as Int),
            (Value::Real(v), VmType::Real) => Value::Real(v),
            (Value::Real(v), VmType::Bool) => Value::Bool(v != 0.0),
            (Value::Real(v), VmType::Cplx) => Value::Cplx(Complex::from(v)),

            (Value::Int(v), VmType::Int) => Value::Int(v),
            (Value::Int(v), VmType::Real) => Value::Real(v as Real),
            (Value::Int(v), VmType::Bool) => Value::Bool(v != 0),
            (Value::Int(v), VmType::Cplx) => Value::Cplx(Complex::from(v as Real)),

            (Value::Bool(v), VmType::Int) => Value::Int(v as Int),
            (Value::Bool(v), VmType::Real) => Value::Real(v as Int as Real),
            (Value::Bool(v), VmType::Bool) => Value::Bool(v),

            (Value::Str(v), VmType::Int) => Value::Int(v.trim().parse().unwrap_or_default()),
            (Value::Str(v), VmType::Real) => Value::Real(v.trim().parse().unwrap_or_default()),
            (Value::Str(v), VmType::Bool) => {
                Value::Bool(v.trim().parse::<Int>().unwrap_or_default() != 0)
            }

            (_, to) => return Err(invalid(to)),
        };

        Ok(result)
    }

    /// Format a value the way `TOS` and `print` do: with the configured
    /// precision, snapping reals within `eps` of zero to `0`.
    pub(crate) fn format_value(&self, val: &Value) -> String {
        let fmt_real = |v: Real| {
            let v = if v.abs() <= self.eps { 0.0 } else { v };
            let formatted = format!("{:.*}", self.prec, v);
            // trim trailing fraction zeros like stream output would
            if formatted.contains('.') {
                formatted
                    .trim_end_matches('0')
                    .trim_end_matches('.')
                    .to_string()
            } else {
                formatted
            }
        };

        match val {
            Value::Real(v) => fmt_real(*v),
            Value::Cplx(v) => format!("({}, {})", fmt_real(v.re), fmt_real(v.im)),
            Value::RealArr(v) => {
                let elems: Vec<String> = v.iter().map(|x| fmt_real(*x)).collect();
                format!("[ {} ]", elems.join(", "))
            }
            Value::CplxArr(v) => {
                let elems: Vec<String> = v
                    .iter()
                    .map(|x| format!("({}, {})", fmt_real(x.re), fmt_real(x.im)))
                    .collect();
                format!("[ {} ]", elems.join(", "))
            }
            other => other.to_string(),
        }
    }

    /// Array cast. With an address (element count) on top, a scalar below is
    /// broadcast to that many elements; with an array on top, it is
    /// converted element-wise (the operand casts the code generator patches
    /// into binary operations push no count).
    pub(crate) fn op_array_cast(&mut self, to: VmType) -> Result<(), RuntimeError> {
        let (ty, top) = self.pop_value()?;

        let val = if ty.is_addr() {
            let Value::Addr(count) = top else {
                unreachable!("address tag pops an address");
            };
            let (_, inner) = self.pop_value()?;
            match inner {
                arr @ (Value::RealArr(_) | Value::IntArr(_) | Value::CplxArr(_)) => arr,
                scalar => return self.broadcast(scalar, count, to),
            }
        } else {
            top
        };

        let result = convert_array(val, to)?;
        self.push_value(&result, VmType::AddrMem)
    }

    fn broadcast(&mut self, scalar: Value, count: muf_core::Addr, to: VmType) -> Result<(), RuntimeError> {
        let n = count.max(0) as usize;

        let result = match to {
            VmType::RealArr => {
                let v = match self.cast_value(scalar, VmType::Real)? {
                    Value::Real(v) => v,
                    _ => unreachable!(),
                };
                Value::RealArr(vec![v; n])
            }
            VmType::IntArr => {
                let v = match self.cast_value(scalar, VmType::Int)? {
                    Value::Int(v) => v,
                    _ => unreachable!(),
                };
                Value::IntArr(vec![v; n])
            }
            VmType::CplxArr => {
                let v = match self.cast_value(scalar, VmType::Cplx)? {
                    Value::Cplx(v) => v,
                    _ => unreachable!(),
                };
                Value::CplxArr(vec![v; n])
            }
            _ => unreachable!("array cast target"),
        };

        self.push_value(&result, VmType::AddrMem)
    }
}

/// Element-wise conversion between array types.
fn convert_array(val: Value, to: VmType) -> Result<Value, RuntimeError> {
    let invalid = |from: &'static str, to: VmType| RuntimeError::InvalidCast {
        from,
        to: to.name(),
    };

    let result = match (val, to) {
        (arr @ Value::RealArr(_), VmType::RealArr) => arr,
        (arr @ Value::IntArr(_), VmType::IntArr) => arr,
        (arr @ Value::CplxArr(_), VmType::CplxArr) => arr,

        (Value::RealArr(v), VmType::IntArr) => {
            Value::IntArr(v.into_iter().map(|x| x as Int).collect())
        }
        (Value::RealArr(v), VmType::CplxArr) => {
            Value::CplxArr(v.into_iter().map(Complex::from).collect())
        }
        (Value::IntArr(v), VmType::RealArr) => {
            Value::RealArr(v.into_iter().map(|x| x as Real).collect())
        }
        (Value::IntArr(v), VmType::CplxArr) => {
            Value::CplxArr(v.into_iter().map(|x| Complex::from(x as Real)).collect())
        }

        (val, to) => return Err(invalid(val.type_name(), to)),
    };

    Ok(result)
}

/// Flat row-major matrix product, generic over the element type.
#[allow(clippy::too_many_arguments)]
fn mat_mul<T: Copy>(
    a: &[T],
    b: &[T],
    r1: Int,
    c1: Int,
    c2: Int,
    zero: T,
    mul: impl Fn(T, T) -> T,
    add: impl Fn(T, T) -> T,
) -> Vec<T> {
    let (r1, c1, c2) = (r1 as usize, c1 as usize, c2 as usize);
    let mut out = vec![zero; r1 * c2];

    for i in 0..r1 {
        for j in 0..c2 {
            let mut acc = zero;
            for k in 0..c1 {
                acc = add(acc, mul(a[i * c1 + k], b[k * c2 + j]));
            }
            out[i * c2 + j] = acc;
        }
    }

    out
}

/// Combine two popped values under an arithmetic operator.
fn arith_values(val1: Value, val2: Value, op: ArithOp, _eps: Real) -> Result<Value, RuntimeError> {
    use ArithOp::*;

    let mismatch = |a: &Value, b: &Value, op: ArithOp| RuntimeError::TypeMismatch {
        op: op.name(),
        types: format!("{}, {}", a.type_name(), b.type_name()),
    };

    let result = match (&val1, &val2) {
        // same-type scalars
        (Value::Int(a), Value::Int(b)) => Value::Int(match op {
            Add => a.wrapping_add(*b),
            Sub => a.wrapping_sub(*b),
            Mul => a.wrapping_mul(*b),
            Div => {
                if *b == 0 {
                    return Err(RuntimeError::DivisionByZero);
                }
                a.wrapping_div(*b)
            }
            Mod => {
                if *b == 0 {
                    return Err(RuntimeError::DivisionByZero);
                }
                a.wrapping_rem(*b)
            }
            Pow => int_pow(*a, *b),
        }),
        (Value::Real(a), Value::Real(b)) => Value::Real(match op {
            Add => a + b,
            Sub => a - b,
            Mul => a * b,
            Div => a / b,
            Mod => a % b,
            Pow => a.powf(*b),
        }),
        (Value::Cplx(a), Value::Cplx(b)) => Value::Cplx(match op {
            Add => *a + *b,
            Sub => *a - *b,
            Mul => *a * *b,
            Div => *a / *b,
            Pow => a.pow(*b),
            Mod => return Err(mismatch(&val1, &val2, op)),
        }),

        // string concatenation
        (Value::Str(a), Value::Str(b)) if op == Add => Value::Str(format!("{a}{b}")),

        // same-type arrays: element-wise add/sub, dot product for mul
        (Value::RealArr(a), Value::RealArr(b)) => match op {
            Add | Sub => Value::RealArr(zip_same_len(a, b, op, |x, y, op| match op {
                Add => x + y,
                _ => x - y,
            })?),
            Mul => {
                if a.len() != b.len() {
                    return Err(len_mismatch(a.len(), b.len()));
                }
                Value::Real(a.iter().zip(b).map(|(x, y)| x * y).sum())
            }
            _ => return Err(mismatch(&val1, &val2, op)),
        },
        (Value::IntArr(a), Value::IntArr(b)) => match op {
            Add | Sub => Value::IntArr(zip_same_len(a, b, op, |x, y, op| match op {
                Add => x.wrapping_add(y),
                _ => x.wrapping_sub(y),
            })?),
            Mul => {
                if a.len() != b.len() {
                    return Err(len_mismatch(a.len(), b.len()));
                }
                Value::Int(
                    a.iter()
                        .zip(b)
                        .fold(0 as Int, |acc, (x, y)| acc.wrapping_add(x.wrapping_mul(*y))),
                )
            }
            _ => return Err(mismatch(&val1, &val2, op)),
        },
        (Value::CplxArr(a), Value::CplxArr(b)) => match op {
            Add | Sub => Value::CplxArr(zip_same_len(a, b, op, |x, y, op| match op {
                Add => x + y,
                _ => x - y,
            })?),
            Mul => {
                if a.len() != b.len() {
                    return Err(len_mismatch(a.len(), b.len()));
                }
                Value::Cplx(
                    a.iter()
                        .zip(b)
                        .fold(Complex::default(), |acc, (x, y)| acc + *x * *y),
                )
            }
            _ => return Err(mismatch(&val1, &val2, op)),
        },

        // array against scalar: element-wise broadcast
        (Value::RealArr(a), Value::Real(s)) => {
            Value::RealArr(scale(a, *s, op, false)?)
        }
        (Value::Real(s), Value::RealArr(a)) => {
            Value::RealArr(scale(a, *s, op, true)?)
        }
        (Value::IntArr(a), Value::Int(s)) => Value::IntArr(scale_int(a, *s, op, false)?),
        (Value::Int(s), Value::IntArr(a)) => Value::IntArr(scale_int(a, *s, op, true)?),
        (Value::CplxArr(a), Value::Cplx(s)) => Value::CplxArr(scale_cplx(a, *s, op, false)?),
        (Value::Cplx(s), Value::CplxArr(a)) => Value::CplxArr(scale_cplx(a, *s, op, true)?),

        _ => return Err(mismatch(&val1, &val2, op)),
    };

    Ok(result)
}

fn len_mismatch(len1: usize, len2: usize) -> RuntimeError {
    RuntimeError::DimensionMismatch(format!(
        "Array operands have different lengths ({len1} and {len2})."
    ))
}

fn zip_same_len<T: Copy>(
    a: &[T],
    b: &[T],
    op: ArithOp,
    f: impl Fn(T, T, ArithOp) -> T,
) -> Result<Vec<T>, RuntimeError> {
    if a.len() != b.len() {
        return Err(len_mismatch(a.len(), b.len()));
    }
    Ok(a.iter().zip(b).map(|(x, y)| f(*x, *y, op)).collect())
}

fn scale(arr: &[Real], s: Real, op: ArithOp, scalar_first: bool) -> Result<Vec<Real>, RuntimeError> {
    use ArithOp::*;
    let apply = |x: Real| match (op, scalar_first) {
        (Add, _) => x + s,
        (Sub, false) => x - s,
        (Sub, true) => s - x,
        (Mul, _) => x * s,
        (Div, false) => x / s,
        (Div, true) => s / x,
        _ => Real::NAN,
    };

    if matches!(op, Mod | Pow) {
        return Err(RuntimeError::TypeMismatch {
            op: op.name(),
            types: "real_array, real".to_string(),
        });
    }
    Ok(arr.iter().map(|x| apply(*x)).collect())
}

fn scale_int(arr: &[Int], s: Int, op: ArithOp, scalar_first: bool) -> Result<Vec<Int>, RuntimeError> {
    use ArithOp::*;

    if matches!(op, Div | Mod | Pow) && s == 0 && !scalar_first {
        return Err(RuntimeError::DivisionByZero);
    }
    if matches!(op, Mod | Pow) {
        return Err(RuntimeError::TypeMismatch {
            op: op.name(),
            types: "integer_array, integer".to_string(),
        });
    }

    arr.iter()
        .map(|x| {
            Ok(match (op, scalar_first) {
                (Add, _) => x.wrapping_add(s),
                (Sub, false) => x.wrapping_sub(s),
                (Sub, true) => s.wrapping_sub(*x),
                (Mul, _) => x.wrapping_mul(s),
                (Div, false) => x.wrapping_div(s),
                (Div, true) => {
                    if *x == 0 {
                        return Err(RuntimeError::DivisionByZero);
                    }
                    s.wrapping_div(*x)
                }
                _ => unreachable!(),
            })
        })
        .collect()
}

fn scale_cplx(
    arr: &[Complex],
    s: Complex,
    op: ArithOp,
    scalar_first: bool,
) -> Result<Vec<Complex>, RuntimeError> {
    use ArithOp::*;

    if matches!(op, Mod | Pow) {
        return Err(RuntimeError::TypeMismatch {
            op: op.name(),
            types: "complex_array, complex".to_string(),
        });
    }

    let apply = |x: Complex| match (op, scalar_first) {
        (Add, _) => x + s,
        (Sub, false) => x - s,
        (Sub, true) => s - x,
        (Mul, _) => x * s,
        (Div, false) => x / s,
        (Div, true) => s / x,
        _ => unreachable!(),
    };
    Ok(arr.iter().map(|x| apply(*x)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Vm;

    fn vm() -> Vm {
        Vm::with_mem_size(4096)
    }

    fn push(vm: &mut Vm, val: Value) {
        vm.push_value(&val, VmType::AddrMem).expect("push");
    }

    fn pop(vm: &mut Vm) -> Value {
        vm.pop_value().expect("pop").1
    }

    #[test]
    fn test_int_arith_wraps() {
        let mut vm = vm();
        push(&mut vm, Value::Int(Int::MAX));
        push(&mut vm, Value::Int(1));
        vm.op_arith(ArithOp::Add).expect("add");
        assert_eq!(pop(&mut vm), Value::Int(Int::MIN));
    }

    #[test]
    fn test_division_by_zero() {
        let mut vm = vm();
        push(&mut vm, Value::Int(1));
        push(&mut vm, Value::Int(0));
        assert!(matches!(
            vm.op_arith(ArithOp::Div),
            Err(RuntimeError::DivisionByZero)
        ));
    }

    #[test]
    fn test_string_concat() {
        let mut vm = vm();
        push(&mut vm, Value::Str("foo".into()));
        push(&mut vm, Value::Str("bar".into()));
        vm.op_arith(ArithOp::Add).expect("add");
        assert_eq!(pop(&mut vm), Value::Str("foobar".into()));
    }

    #[test]
    fn test_dot_product() {
        let mut vm = vm();
        push(&mut vm, Value::RealArr(vec![1.0, 2.0, 3.0]));
        push(&mut vm, Value::RealArr(vec![4.0, 5.0, 6.0]));
        vm.op_arith(ArithOp::Mul).expect("mul");
        assert_eq!(pop(&mut vm), Value::Real(32.0));
    }

    #[test]
    fn test_vector_scale() {
        let mut vm = vm();
        push(&mut vm, Value::Real(2.0));
        push(&mut vm, Value::RealArr(vec![1.0, -2.0]));
        vm.op_arith(ArithOp::Mul).expect("mul");
        assert_eq!(pop(&mut vm), Value::RealArr(vec![2.0, -4.0]));
    }

    #[test]
    fn test_elementwise_add() {
        let mut vm = vm();
        push(&mut vm, Value::IntArr(vec![1, 2]));
        push(&mut vm, Value::IntArr(vec![10, 20]));
        vm.op_arith(ArithOp::Add).expect("add");
        assert_eq!(pop(&mut vm), Value::IntArr(vec![11, 22]));
    }

    #[test]
    fn test_mixed_types_fatal() {
        let mut vm = vm();
        push(&mut vm, Value::Int(1));
        push(&mut vm, Value::Str("x".into()));
        assert!(matches!(
            vm.op_arith(ArithOp::Add),
            Err(RuntimeError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_matmul_2x2() {
        let mut vm = vm();
        push(&mut vm, Value::RealArr(vec![1.0, 2.0, 3.0, 4.0]));
        push(&mut vm, Value::RealArr(vec![5.0, 6.0, 7.0, 8.0]));
        for dim in [2, 2, 2, 2] {
            push(&mut vm, Value::Int(dim));
        }
        vm.op_matmul().expect("matmul");
        assert_eq!(pop(&mut vm), Value::RealArr(vec![19.0, 22.0, 43.0, 50.0]));
    }

    #[test]
    fn test_matmul_dim_mismatch() {
        let mut vm = vm();
        push(&mut vm, Value::RealArr(vec![1.0, 2.0]));
        push(&mut vm, Value::RealArr(vec![3.0, 4.0]));
        // 1x2 times 1x2: inner dimensions differ
        push(&mut vm, Value::Int(1));
        push(&mut vm, Value::Int(2));
        push(&mut vm, Value::Int(1));
        push(&mut vm, Value::Int(2));
        assert!(matches!(
            vm.op_matmul(),
            Err(RuntimeError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_real_comparison_uses_eps() {
        let mut vm = vm();
        vm.eps = 1e-6;
        push(&mut vm, Value::Real(1.0));
        push(&mut vm, Value::Real(1.0 + 1e-9));
        vm.op_comparison(OpCode::Equ).expect("equ");
        assert_eq!(pop(&mut vm), Value::Bool(true));
    }

    #[test]
    fn test_comparison_type_mismatch() {
        let mut vm = vm();
        push(&mut vm, Value::Real(1.0));
        push(&mut vm, Value::Int(1));
        assert!(vm.op_comparison(OpCode::Equ).is_err());
    }

    #[test]
    fn test_logical_ops_on_tagged_bools() {
        let mut vm = vm();
        push(&mut vm, Value::Bool(true));
        push(&mut vm, Value::Bool(false));
        vm.op_logical(OpCode::Or).expect("or");
        assert_eq!(pop(&mut vm), Value::Bool(true));

        push(&mut vm, Value::Bool(true));
        vm.op_not().expect("not");
        assert_eq!(pop(&mut vm), Value::Bool(false));
    }

    #[test]
    fn test_bit_ops() {
        let mut vm = vm();
        push(&mut vm, Value::Int(0b1100));
        push(&mut vm, Value::Int(0b1010));
        vm.op_binary(OpCode::BinXor).expect("xor");
        assert_eq!(pop(&mut vm), Value::Int(0b0110));

        push(&mut vm, Value::Int(1));
        push(&mut vm, Value::Int(65));
        vm.op_binary(OpCode::RotL).expect("rotl");
        assert_eq!(pop(&mut vm), Value::Int(2));
    }

    #[test]
    fn test_cast_real_to_string_snaps_eps() {
        let mut vm = vm();
        vm.eps = 1e-6;
        push(&mut vm, Value::Real(1e-9));
        vm.op_cast(VmType::Str).expect("tos");
        assert_eq!(pop(&mut vm), Value::Str("0".into()));
    }

    #[test]
    fn test_cast_string_to_int() {
        let mut vm = vm();
        push(&mut vm, Value::Str(" 42 ".into()));
        vm.op_cast(VmType::Int).expect("toi");
        assert_eq!(pop(&mut vm), Value::Int(42));
    }

    #[test]
    fn test_invalid_cast() {
        let mut vm = vm();
        push(&mut vm, Value::Cplx(Complex::new(1.0, 1.0)));
        assert!(matches!(
            vm.op_cast(VmType::Int),
            Err(RuntimeError::InvalidCast { .. })
        ));
    }

    #[test]
    fn test_broadcast_scalar_to_array() {
        let mut vm = vm();
        push(&mut vm, Value::Real(1.5));
        push(&mut vm, Value::Addr(3));
        vm.op_array_cast(VmType::RealArr).expect("torealarr");
        assert_eq!(pop(&mut vm), Value::RealArr(vec![1.5, 1.5, 1.5]));
    }

    #[test]
    fn test_elementwise_array_conversion() {
        let mut vm = vm();
        push(&mut vm, Value::IntArr(vec![1, 2]));
        vm.op_array_cast(VmType::RealArr).expect("torealarr");
        assert_eq!(pop(&mut vm), Value::RealArr(vec![1.0, 2.0]));
    }
}
