//! Raw and typed memory access.
//!
//! The stack grows from high addresses towards low ones: a raw push
//! decrements SP and writes at the new SP, a raw pop reads at SP and
//! increments it. Typed cells push the payload first and the tag byte last,
//! leaving the tag at the lowest address; in linear memory a typed cell is
//! `[tag][payload]` at increasing addresses, so the two layouts coincide.
//!
//! Strings are `[tag][len][bytes]`, arrays `[tag][len][elements]` with
//! 8-byte (real/int) or 16-byte (complex) elements.

use muf_core::value::{ADDR_SIZE, CPLX_SIZE, INT_SIZE, REAL_SIZE};
use muf_core::{wire, Addr, Complex, Int, Real, VmType};

use crate::error::RuntimeError;
use crate::value::Value;
use crate::vm::Vm;

impl Vm {
    // ------------------------------------------------------------------------
    // bounds checks
    // ------------------------------------------------------------------------

    pub(crate) fn check_mem(&self, addr: Addr, size: Addr) -> Result<(), RuntimeError> {
        // negative sizes come from corrupted length fields and are rejected
        // even with checks disabled, since they cannot be read meaningfully
        if size < 0 {
            return Err(RuntimeError::OutOfBounds { addr, size });
        }
        if !self.checks {
            return Ok(());
        }

        let end = addr + size;
        if addr < 0 || end < 0 || end > self.mem_size {
            return Err(RuntimeError::OutOfBounds { addr, size });
        }
        Ok(())
    }

    /// Registers must stay inside memory; once the code range is known, the
    /// stack registers must stay out of it and the instruction pointer
    /// inside it.
    pub(crate) fn check_pointers(&self) -> Result<(), RuntimeError> {
        if !self.checks {
            return Ok(());
        }

        let code = self.code_range;
        let in_code = |val: Addr| match code {
            Some((begin, end)) => val >= begin && val < end,
            None => false,
        };

        if self.ip < 0 || self.ip > self.mem_size || (code.is_some() && !in_code(self.ip)) {
            return Err(RuntimeError::PointerOutOfRange {
                reg: "Instruction",
                val: self.ip,
            });
        }
        if self.sp < 0 || self.sp > self.mem_size || in_code(self.sp) {
            return Err(RuntimeError::PointerOutOfRange {
                reg: "Stack",
                val: self.sp,
            });
        }
        if self.bp < 0 || self.bp > self.mem_size || in_code(self.bp) {
            return Err(RuntimeError::PointerOutOfRange {
                reg: "Base",
                val: self.bp,
            });
        }
        if self.gbp < 0 || self.gbp > self.mem_size || in_code(self.gbp) {
            return Err(RuntimeError::PointerOutOfRange {
                reg: "Global base",
                val: self.gbp,
            });
        }

        Ok(())
    }

    // ------------------------------------------------------------------------
    // raw stack access
    // ------------------------------------------------------------------------

    pub(crate) fn push_raw(&mut self, bytes: &[u8]) -> Result<(), RuntimeError> {
        let size = bytes.len() as Addr;
        self.check_mem(self.sp - size, size)?;

        self.sp -= size;
        self.mem[self.sp as usize..(self.sp + size) as usize].copy_from_slice(bytes);
        Ok(())
    }

    /// Pop `size` raw bytes, optionally zeroing the vacated cell.
    fn pop_raw(&mut self, size: Addr) -> Result<Vec<u8>, RuntimeError> {
        self.check_mem(self.sp, size)?;

        let range = self.sp as usize..(self.sp + size) as usize;
        let bytes = self.mem[range.clone()].to_vec();
        if self.zero_popped {
            self.mem[range].fill(0);
        }

        self.sp += size;
        Ok(bytes)
    }

    pub(crate) fn pop_raw_byte(&mut self) -> Result<u8, RuntimeError> {
        Ok(self.pop_raw(1)?[0])
    }

    pub(crate) fn pop_raw_addr(&mut self) -> Result<Addr, RuntimeError> {
        let bytes = self.pop_raw(ADDR_SIZE)?;
        Ok(wire::read_addr(&bytes, 0))
    }

    fn pop_raw_int(&mut self) -> Result<Int, RuntimeError> {
        let bytes = self.pop_raw(INT_SIZE)?;
        Ok(wire::read_int(&bytes, 0))
    }

    fn pop_raw_real(&mut self) -> Result<Real, RuntimeError> {
        let bytes = self.pop_raw(REAL_SIZE)?;
        Ok(wire::read_real(&bytes, 0))
    }

    // ------------------------------------------------------------------------
    // typed stack access
    // ------------------------------------------------------------------------

    /// Push a typed value: payload, then tag. `addr_ty` selects the tag for
    /// address values (they default to absolute).
    pub fn push_value(&mut self, val: &Value, addr_ty: VmType) -> Result<(), RuntimeError> {
        match val {
            Value::Real(v) => self.push_raw(&v.to_le_bytes())?,
            Value::Int(v) => self.push_raw(&v.to_le_bytes())?,
            Value::Bool(v) => self.push_raw(&[*v as u8])?,
            Value::Cplx(v) => {
                self.push_raw(&v.im.to_le_bytes())?;
                self.push_raw(&v.re.to_le_bytes())?;
            }
            Value::Addr(v) => self.push_raw(&v.to_le_bytes())?,
            Value::Str(v) => {
                self.push_raw(v.as_bytes())?;
                self.push_raw(&(v.len() as Addr).to_le_bytes())?;
            }
            Value::RealArr(v) => {
                let mut bytes = Vec::with_capacity(v.len() * REAL_SIZE as usize);
                for elem in v {
                    bytes.extend_from_slice(&elem.to_le_bytes());
                }
                self.push_raw(&bytes)?;
                self.push_raw(&(v.len() as Addr).to_le_bytes())?;
            }
            Value::IntArr(v) => {
                let mut bytes = Vec::with_capacity(v.len() * INT_SIZE as usize);
                for elem in v {
                    bytes.extend_from_slice(&elem.to_le_bytes());
                }
                self.push_raw(&bytes)?;
                self.push_raw(&(v.len() as Addr).to_le_bytes())?;
            }
            Value::CplxArr(v) => {
                let mut bytes = Vec::with_capacity(v.len() * CPLX_SIZE as usize);
                for elem in v {
                    bytes.extend_from_slice(&elem.re.to_le_bytes());
                    bytes.extend_from_slice(&elem.im.to_le_bytes());
                }
                self.push_raw(&bytes)?;
                self.push_raw(&(v.len() as Addr).to_le_bytes())?;
            }
        }

        let tag = match val {
            Value::Addr(_) => addr_ty,
            other => other.tag(),
        };
        self.push_raw(&[tag.into()])?;

        if self.debug {
            println!("pushed {} {}.", val.type_name(), val);
        }
        Ok(())
    }

    /// Pop a typed value: tag first, then the payload the tag implies.
    pub fn pop_value(&mut self) -> Result<(VmType, Value), RuntimeError> {
        let tag_byte = self.pop_raw_byte()?;
        let ty = VmType::try_from(tag_byte)
            .map_err(|_| RuntimeError::UnknownType { byte: tag_byte })?;

        let val = match ty {
            VmType::Real => Value::Real(self.pop_raw_real()?),
            VmType::Int => Value::Int(self.pop_raw_int()?),
            VmType::Bool => Value::Bool(self.pop_raw_byte()? != 0),
            VmType::Cplx => {
                let re = self.pop_raw_real()?;
                let im = self.pop_raw_real()?;
                Value::Cplx(Complex::new(re, im))
            }
            ty if ty.is_addr() => Value::Addr(self.pop_raw_addr()?),
            VmType::Str => {
                let len = self.pop_raw_addr()?;
                let bytes = self.pop_raw(len)?;
                Value::Str(String::from_utf8_lossy(&bytes).into_owned())
            }
            VmType::RealArr => {
                let len = self.pop_raw_addr()?;
                let bytes = self.pop_raw(len * REAL_SIZE)?;
                let elems = bytes
                    .chunks_exact(REAL_SIZE as usize)
                    .map(|chunk| wire::read_real(chunk, 0))
                    .collect();
                Value::RealArr(elems)
            }
            VmType::IntArr => {
                let len = self.pop_raw_addr()?;
                let bytes = self.pop_raw(len * INT_SIZE)?;
                let elems = bytes
                    .chunks_exact(INT_SIZE as usize)
                    .map(|chunk| wire::read_int(chunk, 0))
                    .collect();
                Value::IntArr(elems)
            }
            VmType::CplxArr => {
                let len = self.pop_raw_addr()?;
                let bytes = self.pop_raw(len * CPLX_SIZE)?;
                let elems = bytes
                    .chunks_exact(CPLX_SIZE as usize)
                    .map(|chunk| Complex::new(wire::read_real(chunk, 0), wire::read_real(chunk, 8)))
                    .collect();
                Value::CplxArr(elems)
            }
            other => return Err(RuntimeError::UnknownType { byte: other.into() }),
        };

        if self.debug {
            println!("popped {} {}.", val.type_name(), val);
        }
        Ok((ty, val))
    }

    /// Pop an address and resolve it against its base register.
    pub(crate) fn pop_addr(&mut self) -> Result<Addr, RuntimeError> {
        let (ty, val) = self.pop_value()?;
        let Value::Addr(offs) = val else {
            return Err(RuntimeError::TypeMismatch {
                op: "address",
                types: val.type_name().to_string(),
            });
        };

        let addr = match ty {
            VmType::AddrMem => offs,
            VmType::AddrIp => offs + self.ip,
            VmType::AddrSp => offs + self.sp,
            VmType::AddrBp => offs + self.bp,
            VmType::AddrGbp => offs + self.gbp,
            other => {
                return Err(RuntimeError::TypeMismatch {
                    op: "address",
                    types: other.name().to_string(),
                })
            }
        };

        if self.debug {
            println!("popped address {offs} ({}) -> {addr}.", ty.name());
        }
        Ok(addr)
    }

    /// Pop a boolean condition; integers coerce.
    pub(crate) fn pop_bool(&mut self) -> Result<bool, RuntimeError> {
        let (_, val) = self.pop_value()?;
        match val {
            Value::Bool(v) => Ok(v),
            Value::Int(v) => Ok(v != 0),
            other => Err(RuntimeError::TypeMismatch {
                op: "boolean",
                types: other.type_name().to_string(),
            }),
        }
    }

    /// Pop an integer; bools and addresses coerce.
    pub(crate) fn pop_int(&mut self) -> Result<Int, RuntimeError> {
        let (_, val) = self.pop_value()?;
        match val {
            Value::Int(v) => Ok(v),
            Value::Bool(v) => Ok(v as Int),
            Value::Addr(v) => Ok(v as Int),
            other => Err(RuntimeError::TypeMismatch {
                op: "integer",
                types: other.type_name().to_string(),
            }),
        }
    }

    // ------------------------------------------------------------------------
    // typed memory access
    // ------------------------------------------------------------------------

    fn read_raw(&self, addr: Addr, size: Addr) -> Result<&[u8], RuntimeError> {
        self.check_mem(addr, size)?;
        Ok(&self.mem[addr as usize..(addr + size) as usize])
    }

    /// Read the type-tag prefix of the cell at `addr`.
    pub(crate) fn read_mem_type(&self, addr: Addr) -> Result<VmType, RuntimeError> {
        let byte = self.read_raw(addr, 1)?[0];
        VmType::try_from(byte).map_err(|_| RuntimeError::UnknownType { byte })
    }

    /// Read a tag-prefixed value from memory.
    pub fn read_mem_value(&self, addr: Addr) -> Result<(VmType, Value), RuntimeError> {
        let ty = self.read_mem_type(addr)?;
        let addr = addr + 1;

        let val = match ty {
            VmType::Real => Value::Real(wire::read_real(self.read_raw(addr, REAL_SIZE)?, 0)),
            VmType::Int => Value::Int(wire::read_int(self.read_raw(addr, INT_SIZE)?, 0)),
            VmType::Bool => Value::Bool(self.read_raw(addr, 1)?[0] != 0),
            VmType::Cplx => {
                let bytes = self.read_raw(addr, CPLX_SIZE)?;
                Value::Cplx(Complex::new(
                    wire::read_real(bytes, 0),
                    wire::read_real(bytes, 8),
                ))
            }
            ty if ty.is_addr() => Value::Addr(wire::read_addr(self.read_raw(addr, ADDR_SIZE)?, 0)),
            VmType::Str => {
                let len = wire::read_addr(self.read_raw(addr, ADDR_SIZE)?, 0);
                let bytes = self.read_raw(addr + ADDR_SIZE, len)?;
                Value::Str(String::from_utf8_lossy(bytes).into_owned())
            }
            VmType::RealArr => {
                let len = wire::read_addr(self.read_raw(addr, ADDR_SIZE)?, 0);
                let bytes = self.read_raw(addr + ADDR_SIZE, len * REAL_SIZE)?;
                Value::RealArr(
                    bytes
                        .chunks_exact(REAL_SIZE as usize)
                        .map(|chunk| wire::read_real(chunk, 0))
                        .collect(),
                )
            }
            VmType::IntArr => {
                let len = wire::read_addr(self.read_raw(addr, ADDR_SIZE)?, 0);
                let bytes = self.read_raw(addr + ADDR_SIZE, len * INT_SIZE)?;
                Value::IntArr(
                    bytes
                        .chunks_exact(INT_SIZE as usize)
                        .map(|chunk| wire::read_int(chunk, 0))
                        .collect(),
                )
            }
            VmType::CplxArr => {
                let len = wire::read_addr(self.read_raw(addr, ADDR_SIZE)?, 0);
                let bytes = self.read_raw(addr + ADDR_SIZE, len * CPLX_SIZE)?;
                Value::CplxArr(
                    bytes
                        .chunks_exact(CPLX_SIZE as usize)
                        .map(|chunk| {
                            Complex::new(wire::read_real(chunk, 0), wire::read_real(chunk, 8))
                        })
                        .collect(),
                )
            }
            other => return Err(RuntimeError::UnknownType { byte: other.into() }),
        };

        if self.debug {
            println!("read {} {} from address {}.", val.type_name(), val, addr - 1);
        }
        Ok((ty, val))
    }

    /// Write a tag-prefixed value to memory.
    pub(crate) fn write_mem_value(&mut self, addr: Addr, val: &Value) -> Result<(), RuntimeError> {
        if self.debug {
            println!("writing {} {} to address {addr}.", val.type_name(), val);
        }

        let mut bytes: Vec<u8> = vec![val.tag().into()];
        match val {
            Value::Real(v) => bytes.extend_from_slice(&v.to_le_bytes()),
            Value::Int(v) => bytes.extend_from_slice(&v.to_le_bytes()),
            Value::Bool(v) => bytes.push(*v as u8),
            Value::Cplx(v) => {
                bytes.extend_from_slice(&v.re.to_le_bytes());
                bytes.extend_from_slice(&v.im.to_le_bytes());
            }
            Value::Addr(_) => {
                return Err(RuntimeError::TypeMismatch {
                    op: "memory write",
                    types: "address".to_string(),
                })
            }
            Value::Str(v) => {
                bytes.extend_from_slice(&(v.len() as Addr).to_le_bytes());
                bytes.extend_from_slice(v.as_bytes());
            }
            Value::RealArr(v) => {
                bytes.extend_from_slice(&(v.len() as Addr).to_le_bytes());
                for elem in v {
                    bytes.extend_from_slice(&elem.to_le_bytes());
                }
            }
            Value::IntArr(v) => {
                bytes.extend_from_slice(&(v.len() as Addr).to_le_bytes());
                for elem in v {
                    bytes.extend_from_slice(&elem.to_le_bytes());
                }
            }
            Value::CplxArr(v) => {
                bytes.extend_from_slice(&(v.len() as Addr).to_le_bytes());
                for elem in v {
                    bytes.extend_from_slice(&elem.re.to_le_bytes());
                    bytes.extend_from_slice(&elem.im.to_le_bytes());
                }
            }
        }

        self.check_mem(addr, bytes.len() as Addr)?;
        self.mem[addr as usize..addr as usize + bytes.len()].copy_from_slice(&bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Vm;

    fn roundtrip(val: Value) {
        let mut vm = Vm::with_mem_size(4096);
        vm.push_value(&val, VmType::AddrMem).expect("push");
        let (_, back) = vm.pop_value().expect("pop");
        assert_eq!(back, val);
    }

    #[test]
    fn test_push_pop_roundtrip() {
        roundtrip(Value::Real(-3.75));
        roundtrip(Value::Int(Int::MIN + 1));
        roundtrip(Value::Bool(true));
        roundtrip(Value::Cplx(Complex::new(1.5, -0.5)));
        roundtrip(Value::Str("hello world".into()));
        roundtrip(Value::RealArr(vec![1.0, 2.0, 3.0]));
        roundtrip(Value::IntArr(vec![-1, 0, 1]));
        roundtrip(Value::CplxArr(vec![
            Complex::new(0.0, 1.0),
            Complex::new(1.0, 0.0),
        ]));
    }

    #[test]
    fn test_tag_sits_on_top() {
        let mut vm = Vm::with_mem_size(4096);
        vm.push_value(&Value::Int(7), VmType::AddrMem).expect("push");
        // the byte at SP is the tag
        assert_eq!(vm.mem[vm.sp() as usize], u8::from(VmType::Int));
    }

    #[test]
    fn test_stack_cell_reads_as_memory_cell() {
        let mut vm = Vm::with_mem_size(4096);
        vm.push_value(&Value::Str("ab".into()), VmType::AddrMem)
            .expect("push");

        let (ty, val) = vm.read_mem_value(vm.sp()).expect("read");
        assert_eq!(ty, VmType::Str);
        assert_eq!(val, Value::Str("ab".into()));
    }

    #[test]
    fn test_addr_resolution() {
        let mut vm = Vm::with_mem_size(4096);
        vm.bp = 100;
        vm.push_value(&Value::Addr(-9), VmType::AddrBp).expect("push");
        assert_eq!(vm.pop_addr().expect("pop"), 91);
    }

    #[test]
    fn test_mem_value_roundtrip() {
        let mut vm = Vm::with_mem_size(4096);
        let val = Value::RealArr(vec![0.5, 1.5]);
        vm.write_mem_value(64, &val).expect("write");
        let (ty, back) = vm.read_mem_value(64).expect("read");
        assert_eq!(ty, VmType::RealArr);
        assert_eq!(back, val);
    }

    #[test]
    fn test_zero_popped_vals() {
        let mut vm = Vm::new(crate::vm::VmOptions {
            mem_size: 4096,
            zero_popped: true,
            ..Default::default()
        });
        vm.push_value(&Value::Int(0x7766_5544_3322_1100), VmType::AddrMem)
            .expect("push");
        let sp = vm.sp();
        vm.pop_value().expect("pop");
        assert!(vm.mem[sp as usize..sp as usize + 9].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pop_empty_stack_is_checked() {
        let mut vm = Vm::with_mem_size(64);
        // stack is at the top pad; popping a large value runs past memory
        vm.sp = vm.mem_size - 1;
        vm.mem[vm.sp as usize] = VmType::Int.into();
        assert!(vm.pop_value().is_err());
    }
}
