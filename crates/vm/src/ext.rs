//! External functions dispatched by name through `EXTCALL`.
//!
//! The callee's name string comes from the constants pool; arguments are on
//! the stack with the first argument topmost. Unknown names are fatal.

use std::io::Write;

use muf_core::{Complex, Int, Real, VmType};

use crate::error::RuntimeError;
use crate::value::Value;
use crate::vm::Vm;

impl Vm {
    pub(crate) fn call_external(&mut self, name: &str) -> Result<Option<Value>, RuntimeError> {
        if self.debug {
            println!("calling external function \"{name}\".");
        }

        let retval = match name {
            // absolute value of a scalar, euclidean length of an array
            "abs" | "fabs" | "norm" => {
                let (_, val) = self.pop_value()?;
                let result = match val {
                    Value::Real(v) => Value::Real(v.abs()),
                    Value::Int(v) => Value::Int(v.wrapping_abs()),
                    Value::Cplx(v) => Value::Real(v.abs()),
                    Value::RealArr(v) => {
                        Value::Real(v.iter().map(|x| x * x).sum::<Real>().sqrt())
                    }
                    Value::IntArr(v) => Value::Real(
                        v.iter().map(|x| (*x as Real) * (*x as Real)).sum::<Real>().sqrt(),
                    ),
                    Value::CplxArr(v) => Value::Real(
                        v.iter().map(|x| x.re * x.re + x.im * x.im).sum::<Real>().sqrt(),
                    ),
                    other => other,
                };
                Some(result)
            }

            "sqrt" => Some(Value::Real(self.pop_real_arg()?.sqrt())),
            "sin" => Some(Value::Real(self.pop_real_arg()?.sin())),
            "cos" => Some(Value::Real(self.pop_real_arg()?.cos())),
            "tan" => Some(Value::Real(self.pop_real_arg()?.tan())),
            "exp" => Some(Value::Real(self.pop_real_arg()?.exp())),
            "pow" => {
                let base = self.pop_real_arg()?;
                let exp = self.pop_real_arg()?;
                Some(Value::Real(base.powf(exp)))
            }

            "set_eps" => {
                self.eps = self.pop_real_arg()?;
                None
            }
            "get_eps" => Some(Value::Real(self.eps)),
            "set_prec" => {
                self.prec = self.pop_int_arg()?.max(0) as usize;
                None
            }
            "set_debug" => {
                self.debug = self.pop_int_arg()? != 0;
                None
            }

            // cast-in-place conversions
            "to_str" | "flt_to_str" | "int_to_str" => {
                self.op_cast(VmType::Str)?;
                None
            }

            "print" => {
                let (_, val) = self.pop_value()?;
                println!("{}", self.format_value(&val));
                None
            }

            "getflt" => Some(Value::Real(self.read_stdin_value()?)),
            "getint" => Some(Value::Int(self.read_stdin_value()?)),

            "strlen" => {
                let (_, val) = self.pop_value()?;
                let Value::Str(s) = val else {
                    return Err(RuntimeError::TypeMismatch {
                        op: "strlen",
                        types: val.type_name().to_string(),
                    });
                };
                Some(Value::Int(s.len() as Int))
            }

            // matrix transpose; the generator pushes (rows, cols) after the
            // array so the flat value has a shape
            "transpose" => {
                let cols = self.pop_int_arg()?;
                let rows = self.pop_int_arg()?;
                let (_, val) = self.pop_value()?;
                Some(self.transpose_value(val, rows, cols)?)
            }

            "set_isr" => {
                let addr = self.pop_addr()?;
                let num = self.pop_int_arg()?;
                self.set_isr(num as muf_core::Addr, addr)?;
                None
            }

            "sleep" => {
                let millis = self.pop_int_arg()?.max(0) as u64;
                std::thread::sleep(std::time::Duration::from_millis(millis));
                None
            }

            "set_timer" => {
                let millis = self.pop_int_arg()?;
                if millis < 0 {
                    self.stop_timer();
                } else {
                    self.timer_period = std::time::Duration::from_millis(millis as u64);
                    self.start_timer();
                }
                None
            }

            _ => return Err(RuntimeError::UnknownExternal(name.to_string())),
        };

        Ok(retval)
    }

    /// Pop an argument and coerce it to real.
    fn pop_real_arg(&mut self) -> Result<Real, RuntimeError> {
        let (_, val) = self.pop_value()?;
        match self.cast_value(val, VmType::Real)? {
            Value::Real(v) => Ok(v),
            _ => unreachable!("cast to real"),
        }
    }

    /// Pop an argument and coerce it to integer.
    fn pop_int_arg(&mut self) -> Result<Int, RuntimeError> {
        let (_, val) = self.pop_value()?;
        match self.cast_value(val, VmType::Int)? {
            Value::Int(v) => Ok(v),
            _ => unreachable!("cast to int"),
        }
    }

    /// Prompt with the popped string and parse a value from stdin.
    fn read_stdin_value<T: std::str::FromStr + Default>(&mut self) -> Result<T, RuntimeError> {
        let (_, prompt) = self.pop_value()?;
        print!("{}", self.format_value(&prompt));
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        Ok(line.trim().parse().unwrap_or_default())
    }

    fn transpose_value(&self, val: Value, rows: Int, cols: Int) -> Result<Value, RuntimeError> {
        let check = |len: usize| {
            if len as Int != rows * cols {
                return Err(RuntimeError::DimensionMismatch(format!(
                    "Transpose operand has {len} elements, expected {rows}x{cols}."
                )));
            }
            Ok(())
        };

        let result = match val {
            Value::RealArr(v) => {
                check(v.len())?;
                Value::RealArr(transpose_flat(&v, rows as usize, cols as usize))
            }
            Value::IntArr(v) => {
                check(v.len())?;
                Value::IntArr(transpose_flat(&v, rows as usize, cols as usize))
            }
            Value::CplxArr(v) => {
                check(v.len())?;
                Value::CplxArr(transpose_flat(&v, rows as usize, cols as usize))
            }
            // transposing a scalar is the identity
            scalar @ (Value::Real(_) | Value::Int(_)) => scalar,
            Value::Cplx(v) => Value::Cplx(Complex::new(v.re, -v.im)),
            other => {
                return Err(RuntimeError::TypeMismatch {
                    op: "transpose",
                    types: other.type_name().to_string(),
                })
            }
        };

        Ok(result)
    }
}

fn transpose_flat<T: Copy>(flat: &[T], rows: usize, cols: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(flat.len());
    for j in 0..cols {
        for i in 0..rows {
            out.push(flat[i * cols + j]);
        }
    }
    out
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
    fn test_norm_of_vector() {
        let mut vm = vm();
        push(&mut vm, Value::RealArr(vec![3.0, 4.0]));
        let ret = vm.call_external("norm").expect("norm").expect("value");
        assert_eq!(ret, Value::Real(5.0));
    }

    #[test]
    fn test_abs_of_int() {
        let mut vm = vm();
        push(&mut vm, Value::Int(-5));
        let ret = vm.call_external("abs").expect("abs").expect("value");
        assert_eq!(ret, Value::Int(5));
    }

    #[test]
    fn test_pow_pops_base_then_exponent() {
        let mut vm = vm();
        // arguments are pushed in reverse: exponent first, base on top
        push(&mut vm, Value::Real(3.0));
        push(&mut vm, Value::Real(2.0));
        let ret = vm.call_external("pow").expect("pow").expect("value");
        assert_eq!(ret, Value::Real(8.0));
    }

    #[test]
    fn test_eps_roundtrip() {
        let mut vm = vm();
        push(&mut vm, Value::Real(1e-3));
        assert!(vm.call_external("set_eps").expect("set").is_none());
        let ret = vm.call_external("get_eps").expect("get").expect("value");
        assert_eq!(ret, Value::Real(1e-3));
    }

    #[test]
    fn test_int_to_str_casts_in_place() {
        let mut vm = vm();
        push(&mut vm, Value::Int(7));
        assert!(vm.call_external("int_to_str").expect("conv").is_none());
        assert_eq!(pop(&mut vm), Value::Str("7".into()));
    }

    #[test]
    fn test_strlen() {
        let mut vm = vm();
        push(&mut vm, Value::Str("hello".into()));
        let ret = vm.call_external("strlen").expect("strlen").expect("value");
        assert_eq!(ret, Value::Int(5));
    }

    #[test]
    fn test_transpose_2x3() {
        let mut vm = vm();
        push(&mut vm, Value::IntArr(vec![1, 2, 3, 4, 5, 6]));
        push(&mut vm, Value::Int(2)); // rows
        push(&mut vm, Value::Int(3)); // cols
        let ret = vm
            .call_external("transpose")
            .expect("transpose")
            .expect("value");
        assert_eq!(ret, Value::IntArr(vec![1, 4, 2, 5, 3, 6]));
    }

    #[test]
    fn test_set_isr_installs_handler() {
        let mut vm = vm();
        push(&mut vm, Value::Int(3));
        push(&mut vm, Value::Addr(0x80));
        assert!(vm.call_external("set_isr").expect("set_isr").is_none());
        assert_eq!(vm.isrs[3], Some(0x80));
    }

    #[test]
    fn test_unknown_external_fails() {
        let mut vm = vm();
        assert!(matches!(
            vm.call_external("frobnicate"),
            Err(RuntimeError::UnknownExternal(_))
        ));
    }
}
