//! Constants pool
//!
//! A deduplicating byte-stream builder for literal values. Each constant is
//! serialised once, prefixed with its type-tag byte, and its offset within
//! the pool is handed back; identical values (by value equality, including
//! string contents) return the prior offset. The finished blob is appended
//! to the code stream by the generator's finalize pass.

use std::collections::HashMap;

use muf_core::{tag::VmType, wire, Addr, Int, Real};

/// A poolable constant value. Reals are keyed by their bit pattern so the
/// map stays well-defined for every float.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstValue {
    Real(u64),
    Int(Int),
    Str(String),
}

impl From<Real> for ConstValue {
    fn from(val: Real) -> Self {
        ConstValue::Real(val.to_bits())
    }
}

impl From<Int> for ConstValue {
    fn from(val: Int) -> Self {
        ConstValue::Int(val)
    }
}

impl From<&str> for ConstValue {
    fn from(val: &str) -> Self {
        ConstValue::Str(val.to_string())
    }
}

#[derive(Debug, Default)]
pub struct ConstTab {
    bytes: Vec<u8>,
    offsets: HashMap<ConstValue, Addr>,
}

impl ConstTab {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a constant to the pool and return its byte offset; known
    /// values return the offset of their first serialisation.
    pub fn add_const(&mut self, val: impl Into<ConstValue>) -> Addr {
        let val = val.into();
        if let Some(&offs) = self.offsets.get(&val) {
            return offs;
        }

        let offs = self.bytes.len() as Addr;
        match &val {
            ConstValue::Real(bits) => {
                self.bytes.push(VmType::Real.into());
                wire::put_real(&mut self.bytes, Real::from_bits(*bits));
            }
            ConstValue::Int(ival) => {
                self.bytes.push(VmType::Int.into());
                wire::put_int(&mut self.bytes, *ival);
            }
            ConstValue::Str(sval) => {
                self.bytes.push(VmType::Str.into());
                wire::put_addr(&mut self.bytes, sval.len() as Addr);
                self.bytes.extend_from_slice(sval.as_bytes());
            }
        }

        self.offsets.insert(val, offs);
        offs
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// The whole pool blob.
    pub fn take_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_returns_prior_offset() {
        let mut tab = ConstTab::new();
        let a = tab.add_const("hello");
        let b = tab.add_const(42 as Int);
        let c = tab.add_const("hello");
        assert_eq!(a, c);
        assert_ne!(a, b);
    }

    #[test]
    fn test_string_layout() {
        let mut tab = ConstTab::new();
        tab.add_const("ab");
        let bytes = tab.take_bytes();
        assert_eq!(bytes[0], u8::from(VmType::Str));
        assert_eq!(wire::read_addr(&bytes, 1), 2);
        assert_eq!(&bytes[5..7], b"ab");
    }

    #[test]
    fn test_int_layout() {
        let mut tab = ConstTab::new();
        let offs = tab.add_const(-7 as Int);
        assert_eq!(offs, 0);
        let bytes = tab.take_bytes();
        assert_eq!(bytes[0], u8::from(VmType::Int));
        assert_eq!(wire::read_int(&bytes, 1), -7);
    }

    #[test]
    fn test_real_bit_keying() {
        let mut tab = ConstTab::new();
        let a = tab.add_const(1.5 as Real);
        let b = tab.add_const(1.5 as Real);
        let c = tab.add_const(-1.5 as Real);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
