//! Type-tag bytes for stack cells, memory cells and immediates.
//!
//! Every typed value in VM memory is prefixed by one of these bytes. On the
//! downward-growing stack the payload is pushed first and the tag last, so
//! the tag always sits at the lowest address of a cell; a stack cell is
//! therefore readable with the same `[tag][payload]` layout as a memory
//! cell.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::value::{Addr, BOOL_SIZE, CPLX_SIZE, INT_SIZE, REAL_SIZE};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
pub enum VmType {
    Unknown = 0x00,

    Real = 0x01,
    Int = 0x02,
    Bool = 0x03,
    Cplx = 0x04,

    RealArr = 0x10,
    IntArr = 0x11,
    CplxArr = 0x12,

    Str = 0x15,

    /// Absolute memory address.
    AddrMem = 0x20,
    /// Address relative to the instruction pointer.
    AddrIp = 0x21,
    /// Address relative to the stack pointer.
    AddrSp = 0x22,
    /// Address relative to the local base pointer.
    AddrBp = 0x23,
    /// Address relative to the global base pointer.
    AddrGbp = 0x24,
}

impl VmType {
    pub fn name(self) -> &'static str {
        match self {
            VmType::Unknown => "unknown",
            VmType::Real => "real",
            VmType::Int => "integer",
            VmType::Bool => "bool",
            VmType::Cplx => "complex",
            VmType::RealArr => "real_array",
            VmType::IntArr => "integer_array",
            VmType::CplxArr => "complex_array",
            VmType::Str => "string",
            VmType::AddrMem => "absolute address",
            VmType::AddrIp => "address relative to ip",
            VmType::AddrSp => "address relative to sp",
            VmType::AddrBp => "address relative to bp",
            VmType::AddrGbp => "address relative to gbp",
        }
    }

    /// Is this one of the five address tags?
    pub fn is_addr(self) -> bool {
        matches!(
            self,
            VmType::AddrMem | VmType::AddrIp | VmType::AddrSp | VmType::AddrBp | VmType::AddrGbp
        )
    }

    /// Payload size of a fixed-size value, excluding the tag byte.
    /// Strings and arrays carry a length field instead and have no fixed size.
    pub fn fixed_payload_size(self) -> Option<Addr> {
        match self {
            VmType::Real => Some(REAL_SIZE),
            VmType::Int => Some(INT_SIZE),
            VmType::Bool => Some(BOOL_SIZE),
            VmType::Cplx => Some(CPLX_SIZE),
            ty if ty.is_addr() => Some(crate::value::ADDR_SIZE),
            _ => None,
        }
    }
}

impl std::fmt::Display for VmType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_byte_roundtrip() {
        for byte in 0u8..=0xff {
            if let Ok(ty) = VmType::try_from(byte) {
                assert_eq!(u8::from(ty), byte);
            }
        }
    }

    #[test]
    fn test_addr_tags() {
        assert!(VmType::AddrIp.is_addr());
        assert!(VmType::AddrGbp.is_addr());
        assert!(!VmType::Real.is_addr());
        assert_eq!(VmType::AddrBp.fixed_payload_size(), Some(4));
    }

    #[test]
    fn test_fixed_sizes() {
        assert_eq!(VmType::Real.fixed_payload_size(), Some(8));
        assert_eq!(VmType::Cplx.fixed_payload_size(), Some(16));
        assert_eq!(VmType::Str.fixed_payload_size(), None);
        assert_eq!(VmType::RealArr.fixed_payload_size(), None);
    }
}
