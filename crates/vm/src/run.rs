//! Fetch/execute loop.
//!
//! Each cycle: validate the registers, service at most one pending
//! interrupt (lowest number first), fetch and dispatch one opcode, wrap the
//! instruction pointer modulo the memory size. The loop ends on HALT or the
//! first runtime error.

use std::sync::atomic::Ordering;

use muf_core::{Addr, Int, OpCode, VmType};

use crate::error::RuntimeError;
use crate::ops::ArithOp;
use crate::value::Value;
use crate::vm::{Vm, NUM_INTERRUPTS};

impl Vm {
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            self.check_pointers()?;

            let op = match self.pending_interrupt()? {
                // an interrupt synthesises a CALL to its service routine
                Some(op) => op,
                None => {
                    let byte = self.mem[self.ip as usize];
                    self.ip += 1;
                    OpCode::try_from(byte).map_err(|_| RuntimeError::InvalidOpcode {
                        byte,
                        ip: self.ip - 1,
                    })?
                }
            };

            if self.debug {
                println!(
                    "*** ip = {}, sp = {}, bp = {}, opcode 0x{:02x} ({}) ***",
                    self.ip,
                    self.sp,
                    self.bp,
                    u8::from(op),
                    op
                );
            }

            match op {
                OpCode::Halt => return Ok(()),
                OpCode::Nop => {}
                OpCode::Invalid => {
                    return Err(RuntimeError::InvalidOpcode {
                        byte: OpCode::Invalid.into(),
                        ip: self.ip - 1,
                    })
                }

                OpCode::Push => {
                    let (ty, val) = self.read_mem_value(self.ip)?;
                    self.ip += 1 + val.data_size();
                    self.push_value(&val, ty)?;
                }

                OpCode::WrMem => {
                    let addr = self.pop_addr()?;
                    let (_, val) = self.pop_value()?;
                    self.write_mem_value(addr, &val)?;
                }

                OpCode::RdMem => {
                    let addr = self.pop_addr()?;
                    let (ty, val) = self.read_mem_value(addr)?;
                    self.push_value(&val, ty)?;
                }

                OpCode::AddFrame => {
                    let framesize = self.pop_int()?;
                    self.sp -= framesize as Addr;
                }
                OpCode::RemFrame => {
                    let framesize = self.pop_int()?;
                    self.sp += framesize as Addr;
                }

                OpCode::USub => self.op_usub()?,
                OpCode::Add => self.op_arith(ArithOp::Add)?,
                OpCode::Sub => self.op_arith(ArithOp::Sub)?,
                OpCode::Mul => self.op_arith(ArithOp::Mul)?,
                OpCode::Div => self.op_arith(ArithOp::Div)?,
                OpCode::Mod => self.op_arith(ArithOp::Mod)?,
                OpCode::Pow => self.op_arith(ArithOp::Pow)?,
                OpCode::MatMul => self.op_matmul()?,

                OpCode::ToI => self.op_cast(VmType::Int)?,
                OpCode::ToR => self.op_cast(VmType::Real)?,
                OpCode::ToS => self.op_cast(VmType::Str)?,
                OpCode::ToB => self.op_cast(VmType::Bool)?,
                OpCode::ToC => self.op_cast(VmType::Cplx)?,
                OpCode::ToRealArr => self.op_array_cast(VmType::RealArr)?,
                OpCode::ToIntArr => self.op_array_cast(VmType::IntArr)?,
                OpCode::ToCplxArr => self.op_array_cast(VmType::CplxArr)?,

                OpCode::Jmp => {
                    self.ip = self.pop_addr()?;
                }
                OpCode::JmpCnd => {
                    let addr = self.pop_addr()?;
                    let cond = self.pop_bool()?;
                    if cond {
                        self.ip = addr;
                    }
                }

                OpCode::And | OpCode::Or | OpCode::Xor => self.op_logical(op)?,
                OpCode::Not => self.op_not()?,

                OpCode::Gt
                | OpCode::Lt
                | OpCode::GEqu
                | OpCode::LEqu
                | OpCode::Equ
                | OpCode::NEqu => self.op_comparison(op)?,

                OpCode::Call => self.op_call()?,
                OpCode::Ret => self.op_ret()?,
                OpCode::ExtCall => self.op_extcall()?,

                OpCode::BinAnd | OpCode::BinOr | OpCode::BinXor | OpCode::Shl
                | OpCode::Shr | OpCode::RotL | OpCode::RotR => self.op_binary(op)?,
                OpCode::BinNot => self.op_binnot()?,

                OpCode::MakeRealArr => self.op_make_arr(VmType::RealArr)?,
                OpCode::MakeIntArr => self.op_make_arr(VmType::IntArr)?,
                OpCode::MakeCplxArr => self.op_make_arr(VmType::CplxArr)?,

                OpCode::RdArr => self.op_rdarr()?,
                OpCode::RdArrR => self.op_rdarrr()?,
                OpCode::WrArr => self.op_wrarr()?,
                OpCode::WrArrR => self.op_wrarrr()?,
            }

            // wrap around
            if self.ip >= self.mem_size {
                self.ip %= self.mem_size;
            }
        }
    }

    /// Lowest-numbered pending IRQ with an installed service routine, if
    /// any: clears the flag, pushes an empty frame size and the handler
    /// address and has the main loop run a CALL.
    fn pending_interrupt(&mut self) -> Result<Option<OpCode>, RuntimeError> {
        for irq in 0..NUM_INTERRUPTS {
            if !self.irqs[irq].swap(false, Ordering::SeqCst) {
                continue;
            }
            let Some(isr) = self.isrs[irq] else {
                continue;
            };

            // service routines run with an empty local frame
            self.push_value(&Value::Int(0), VmType::AddrMem)?;
            self.push_value(&Value::Addr(isr), VmType::AddrMem)?;
            return Ok(Some(OpCode::Call));
        }

        Ok(None)
    }

    /// Stack frame layout (the stack grows downwards):
    ///
    /// ```text
    ///  | local var n        |  <- SP = BP - framesize
    ///  | ...                |
    ///  | local var 1        |
    ///  | saved BP           |  <- BP
    ///  | saved IP           |
    ///  | argument 1         |
    ///  | ...                |
    ///  | argument n         |
    /// ```
    fn op_call(&mut self) -> Result<(), RuntimeError> {
        let funcaddr = self.pop_addr()?;
        let framesize = self.pop_int()?;

        self.push_value(&Value::Addr(self.ip), VmType::AddrMem)?;
        self.push_value(&Value::Addr(self.bp), VmType::AddrMem)?;

        if self.debug {
            println!("saved base pointer {}, calling {}.", self.bp, funcaddr);
        }

        self.bp = self.sp;
        self.sp -= framesize as Addr;
        self.ip = funcaddr;

        Ok(())
    }

    fn op_ret(&mut self) -> Result<(), RuntimeError> {
        let num_args = self.pop_int()?;
        let framesize = self.pop_int()?;

        // values still on the stack above the locals are return values
        let mut retvals: Vec<(VmType, Value)> = Vec::new();
        while self.sp + (framesize as Addr) < self.bp {
            retvals.push(self.pop_value()?);
        }

        // drop the frame
        if self.zero_popped {
            let range = self.sp as usize..self.bp as usize;
            self.mem[range].fill(0);
        }
        self.sp = self.bp;

        self.bp = self.pop_addr()?;
        self.ip = self.pop_addr()?;

        if self.debug {
            println!("restored base pointer {}.", self.bp);
        }

        // remove the arguments
        for _ in 0..num_args {
            self.pop_value()?;
        }

        // re-push the return values; popping reversed them, so the first
        // declared value ends up on top
        for (ty, val) in &retvals {
            self.push_value(val, *ty)?;
        }

        Ok(())
    }

    fn op_extcall(&mut self) -> Result<(), RuntimeError> {
        let (_, name) = self.pop_value()?;
        let Value::Str(name) = name else {
            return Err(RuntimeError::TypeMismatch {
                op: "external call",
                types: name.type_name().to_string(),
            });
        };

        if let Some(retval) = self.call_external(&name)? {
            self.push_value(&retval, VmType::AddrMem)?;
        }
        Ok(())
    }

    /// Build an array from pushed elements: pops the element count, then
    /// that many elements (topmost is the last one).
    fn op_make_arr(&mut self, ty: VmType) -> Result<(), RuntimeError> {
        let count = self.pop_addr()?.max(0) as usize;

        let result = match ty {
            VmType::RealArr => {
                let mut elems = vec![0.0; count];
                for i in (0..count).rev() {
                    match self.pop_value()?.1 {
                        Value::Real(v) => elems[i] = v,
                        other => return Err(wrong_elem("real", &other)),
                    }
                }
                Value::RealArr(elems)
            }
            VmType::IntArr => {
                let mut elems = vec![0; count];
                for i in (0..count).rev() {
                    match self.pop_value()?.1 {
                        Value::Int(v) => elems[i] = v,
                        other => return Err(wrong_elem("integer", &other)),
                    }
                }
                Value::IntArr(elems)
            }
            VmType::CplxArr => {
                let mut elems = vec![muf_core::Complex::default(); count];
                for i in (0..count).rev() {
                    match self.pop_value()?.1 {
                        Value::Cplx(v) => elems[i] = v,
                        other => return Err(wrong_elem("complex", &other)),
                    }
                }
                Value::CplxArr(elems)
            }
            _ => unreachable!("array construction type"),
        };

        self.push_value(&result, VmType::AddrMem)
    }

    // ------------------------------------------------------------------------
    // array reads and writes
    // ------------------------------------------------------------------------

    /// Read one element: pops the index, then the array or string value.
    fn op_rdarr(&mut self) -> Result<(), RuntimeError> {
        let idx = self.pop_int()?;
        let (_, arr) = self.pop_value()?;

        let result = match arr {
            Value::RealArr(v) => Value::Real(v[wrap_index(idx, v.len())?]),
            Value::IntArr(v) => Value::Int(v[wrap_index(idx, v.len())?]),
            Value::CplxArr(v) => Value::Cplx(v[wrap_index(idx, v.len())?]),
            Value::Str(v) => {
                let bytes = v.as_bytes();
                let byte = bytes[wrap_index(idx, bytes.len())?];
                Value::Str((byte as char).to_string())
            }
            other => {
                return Err(RuntimeError::TypeMismatch {
                    op: "array read",
                    types: other.type_name().to_string(),
                })
            }
        };

        self.push_value(&result, VmType::AddrMem)
    }

    /// Read an inclusive range, walking backwards when `idx2 < idx1`.
    fn op_rdarrr(&mut self) -> Result<(), RuntimeError> {
        let idx2 = self.pop_int()?;
        let idx1 = self.pop_int()?;
        let (_, arr) = self.pop_value()?;

        let result = match arr {
            Value::RealArr(v) => Value::RealArr(slice_range(&v, idx1, idx2)?),
            Value::IntArr(v) => Value::IntArr(slice_range(&v, idx1, idx2)?),
            Value::CplxArr(v) => Value::CplxArr(slice_range(&v, idx1, idx2)?),
            Value::Str(v) => {
                let bytes = slice_range(v.as_bytes(), idx1, idx2)?;
                Value::Str(String::from_utf8_lossy(&bytes).into_owned())
            }
            other => {
                return Err(RuntimeError::TypeMismatch {
                    op: "array range read",
                    types: other.type_name().to_string(),
                })
            }
        };

        self.push_value(&result, VmType::AddrMem)
    }

    /// Write one element in place: pops the index, the element value and
    /// the variable's address; only the addressed element is rewritten.
    fn op_wrarr(&mut self) -> Result<(), RuntimeError> {
        let idx = self.pop_int()?;
        let (_, val) = self.pop_value()?;
        let addr = self.pop_addr()?;

        let (_, stored) = self.read_mem_value(addr)?;

        let updated = match (stored, val) {
            (Value::RealArr(mut v), Value::Real(elem)) => {
                let i = wrap_index(idx, v.len())?;
                v[i] = elem;
                Value::RealArr(v)
            }
            (Value::IntArr(mut v), Value::Int(elem)) => {
                let i = wrap_index(idx, v.len())?;
                v[i] = elem;
                Value::IntArr(v)
            }
            (Value::CplxArr(mut v), Value::Cplx(elem)) => {
                let i = wrap_index(idx, v.len())?;
                v[i] = elem;
                Value::CplxArr(v)
            }
            (Value::Str(s), Value::Str(elem)) => {
                let mut bytes = s.into_bytes();
                let i = wrap_index(idx, bytes.len())?;
                let Some(&byte) = elem.as_bytes().first() else {
                    return Err(RuntimeError::DimensionMismatch(
                        "String element assignment needs a non-empty string.".to_string(),
                    ));
                };
                bytes[i] = byte;
                Value::Str(String::from_utf8_lossy(&bytes).into_owned())
            }
            (stored, val) => {
                return Err(RuntimeError::TypeMismatch {
                    op: "array write",
                    types: format!("{}, {}", stored.type_name(), val.type_name()),
                })
            }
        };

        self.write_mem_value(addr, &updated)
    }

    /// Write an inclusive range: the source is an array (consumed
    /// sequentially), a scalar (broadcast) or a string.
    fn op_wrarrr(&mut self) -> Result<(), RuntimeError> {
        let idx2 = self.pop_int()?;
        let idx1 = self.pop_int()?;
        let (_, val) = self.pop_value()?;
        let addr = self.pop_addr()?;

        let (_, stored) = self.read_mem_value(addr)?;

        let updated = match (stored, val) {
            (Value::RealArr(mut v), Value::RealArr(src)) => {
                write_range(&mut v, idx1, idx2, &mut src.into_iter())?;
                Value::RealArr(v)
            }
            (Value::RealArr(mut v), Value::Real(elem)) => {
                write_range(&mut v, idx1, idx2, &mut std::iter::repeat(elem))?;
                Value::RealArr(v)
            }
            (Value::IntArr(mut v), Value::IntArr(src)) => {
                write_range(&mut v, idx1, idx2, &mut src.into_iter())?;
                Value::IntArr(v)
            }
            (Value::IntArr(mut v), Value::Int(elem)) => {
                write_range(&mut v, idx1, idx2, &mut std::iter::repeat(elem))?;
                Value::IntArr(v)
            }
            (Value::CplxArr(mut v), Value::CplxArr(src)) => {
                write_range(&mut v, idx1, idx2, &mut src.into_iter())?;
                Value::CplxArr(v)
            }
            (Value::CplxArr(mut v), Value::Cplx(elem)) => {
                write_range(&mut v, idx1, idx2, &mut std::iter::repeat(elem))?;
                Value::CplxArr(v)
            }
            (Value::Str(s), Value::Str(src)) => {
                let mut bytes = s.into_bytes();
                write_range(&mut bytes, idx1, idx2, &mut src.bytes())?;
                Value::Str(String::from_utf8_lossy(&bytes).into_owned())
            }
            (stored, val) => {
                return Err(RuntimeError::TypeMismatch {
                    op: "array range write",
                    types: format!("{}, {}", stored.type_name(), val.type_name()),
                })
            }
        };

        self.write_mem_value(addr, &updated)
    }
}

fn wrong_elem(expected: &'static str, found: &Value) -> RuntimeError {
    RuntimeError::TypeMismatch {
        op: "array construction",
        types: format!("expected {expected} element, found {}", found.type_name()),
    }
}

/// Indices wrap modulo the length, so `-1` addresses the last element.
fn wrap_index(idx: Int, len: usize) -> Result<usize, RuntimeError> {
    if len == 0 {
        return Err(RuntimeError::IndexOutOfBounds { idx, len });
    }

    let len_int = len as Int;
    let wrapped = idx.rem_euclid(len_int);
    Ok(wrapped as usize)
}

/// The inclusive index walk of a ranged access, in either direction.
fn range_indices(idx1: Int, idx2: Int, len: usize) -> Result<Vec<usize>, RuntimeError> {
    let i1 = wrap_index(idx1, len)? as Int;
    let i2 = wrap_index(idx2, len)? as Int;

    let indices = if i2 >= i1 {
        (i1..=i2).map(|i| i as usize).collect()
    } else {
        (i2..=i1).rev().map(|i| i as usize).collect()
    };
    Ok(indices)
}

fn slice_range<T: Copy>(arr: &[T], idx1: Int, idx2: Int) -> Result<Vec<T>, RuntimeError> {
    Ok(range_indices(idx1, idx2, arr.len())?
        .into_iter()
        .map(|i| arr[i])
        .collect())
}

fn write_range<T>(
    arr: &mut [T],
    idx1: Int,
    idx2: Int,
    src: &mut impl Iterator<Item = T>,
) -> Result<(), RuntimeError> {
    let indices = range_indices(idx1, idx2, arr.len())?;
    let count = indices.len();

    for i in indices {
        let Some(elem) = src.next() else {
            return Err(RuntimeError::DimensionMismatch(format!(
                "Range assignment needs {count} source elements."
            )));
        };
        arr[i] = elem;
    }
    Ok(())
}
