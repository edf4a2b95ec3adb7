//! Little-endian wire encoding of immediates and memory cells.
//!
//! The code generator appends and patches through these helpers and the VM
//! reads through them, so the byte image format is defined in exactly one
//! place. Callers are responsible for bounds checks; the slice accesses here
//! assume the range is valid.

use crate::value::{Addr, Int, Real};

// -----------------------------------------------------------------------------
// appending to an image under construction
// -----------------------------------------------------------------------------

pub fn put_addr(buf: &mut Vec<u8>, val: Addr) {
    buf.extend_from_slice(&val.to_le_bytes());
}

pub fn put_int(buf: &mut Vec<u8>, val: Int) {
    buf.extend_from_slice(&val.to_le_bytes());
}

pub fn put_real(buf: &mut Vec<u8>, val: Real) {
    buf.extend_from_slice(&val.to_le_bytes());
}

// -----------------------------------------------------------------------------
// reading back
// -----------------------------------------------------------------------------

pub fn read_addr(mem: &[u8], pos: usize) -> Addr {
    let bytes: [u8; 4] = mem[pos..pos + 4].try_into().expect("addr slice");
    Addr::from_le_bytes(bytes)
}

pub fn read_int(mem: &[u8], pos: usize) -> Int {
    let bytes: [u8; 8] = mem[pos..pos + 8].try_into().expect("int slice");
    Int::from_le_bytes(bytes)
}

pub fn read_real(mem: &[u8], pos: usize) -> Real {
    let bytes: [u8; 8] = mem[pos..pos + 8].try_into().expect("real slice");
    Real::from_le_bytes(bytes)
}

// -----------------------------------------------------------------------------
// patching in place
// -----------------------------------------------------------------------------

pub fn write_addr(mem: &mut [u8], pos: usize, val: Addr) {
    mem[pos..pos + 4].copy_from_slice(&val.to_le_bytes());
}

pub fn write_int(mem: &mut [u8], pos: usize, val: Int) {
    mem[pos..pos + 8].copy_from_slice(&val.to_le_bytes());
}

pub fn write_real(mem: &mut [u8], pos: usize, val: Real) {
    mem[pos..pos + 8].copy_from_slice(&val.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_roundtrip() {
        let mut buf = Vec::new();
        put_addr(&mut buf, -1234);
        assert_eq!(buf.len(), 4);
        assert_eq!(read_addr(&buf, 0), -1234);
    }

    #[test]
    fn test_int_real_roundtrip() {
        let mut buf = Vec::new();
        put_int(&mut buf, Int::MIN + 7);
        put_real(&mut buf, -0.5);
        assert_eq!(read_int(&buf, 0), Int::MIN + 7);
        assert_eq!(read_real(&buf, 8), -0.5);
    }

    #[test]
    fn test_patch_in_place() {
        let mut buf = vec![0u8; 12];
        write_addr(&mut buf, 4, 0x0102_0304);
        assert_eq!(read_addr(&buf, 4), 0x0102_0304);
        // surrounding bytes untouched
        assert_eq!(read_addr(&buf, 0), 0);
    }
}
