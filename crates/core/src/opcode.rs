//! One-byte instruction opcodes for the zero-address VM.
//!
//! Opcodes are grouped by function into sparse ranges so that related
//! instructions share a high nibble; the gaps leave room for future
//! instructions without renumbering. `0x00` doubles as `HALT` so that
//! zero-filled memory halts the machine instead of executing garbage.

use num_enum::{IntoPrimitive, TryFromPrimitive};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
pub enum OpCode {
    Halt = 0x00,
    Nop = 0x01,
    Invalid = 0x02,

    // memory operations
    Push = 0x10,
    WrMem = 0x11,
    RdMem = 0x12,
    AddFrame = 0x13,
    RemFrame = 0x14,

    // arithmetic operations
    USub = 0x20,
    Add = 0x21,
    Sub = 0x22,
    Mul = 0x23,
    Div = 0x24,
    Mod = 0x25,
    Pow = 0x26,
    MatMul = 0x27,

    // conversions
    ToI = 0x30,
    ToR = 0x31,
    ToS = 0x32,
    ToB = 0x33,
    ToC = 0x34,
    ToRealArr = 0x35,
    ToIntArr = 0x36,
    ToCplxArr = 0x37,

    // jumps
    Jmp = 0x40,
    JmpCnd = 0x41,

    // logical operations
    And = 0x50,
    Or = 0x51,
    Xor = 0x52,
    Not = 0x53,

    // comparisons
    Gt = 0x60,
    Lt = 0x61,
    GEqu = 0x62,
    LEqu = 0x63,
    Equ = 0x64,
    NEqu = 0x65,

    // function calls
    Call = 0x70,
    Ret = 0x71,
    ExtCall = 0x72,

    // binary (bit-level) integer operations
    BinAnd = 0x80,
    BinOr = 0x81,
    BinXor = 0x82,
    BinNot = 0x83,
    Shl = 0x84,
    Shr = 0x85,
    RotL = 0x86,
    RotR = 0x87,

    // array construction
    MakeRealArr = 0x90,
    MakeIntArr = 0x91,
    MakeCplxArr = 0x92,

    // array memory operations
    RdArr = 0xa0,
    RdArrR = 0xa1,
    WrArr = 0xa4,
    WrArrR = 0xa5,
}

impl OpCode {
    /// Lower-case mnemonic, used by debug traces and error messages.
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Halt => "halt",
            OpCode::Nop => "nop",
            OpCode::Invalid => "invalid",
            OpCode::Push => "push",
            OpCode::WrMem => "wrmem",
            OpCode::RdMem => "rdmem",
            OpCode::AddFrame => "addframe",
            OpCode::RemFrame => "remframe",
            OpCode::USub => "usub",
            OpCode::Add => "add",
            OpCode::Sub => "sub",
            OpCode::Mul => "mul",
            OpCode::Div => "div",
            OpCode::Mod => "mod",
            OpCode::Pow => "pow",
            OpCode::MatMul => "matmul",
            OpCode::ToI => "toi",
            OpCode::ToR => "tor",
            OpCode::ToS => "tos",
            OpCode::ToB => "tob",
            OpCode::ToC => "toc",
            OpCode::ToRealArr => "torealarr",
            OpCode::ToIntArr => "tointarr",
            OpCode::ToCplxArr => "tocplxarr",
            OpCode::Jmp => "jmp",
            OpCode::JmpCnd => "jmpcnd",
            OpCode::And => "and",
            OpCode::Or => "or",
            OpCode::Xor => "xor",
            OpCode::Not => "not",
            OpCode::Gt => "gt",
            OpCode::Lt => "lt",
            OpCode::GEqu => "gequ",
            OpCode::LEqu => "lequ",
            OpCode::Equ => "equ",
            OpCode::NEqu => "nequ",
            OpCode::Call => "call",
            OpCode::Ret => "ret",
            OpCode::ExtCall => "extcall",
            OpCode::BinAnd => "binand",
            OpCode::BinOr => "binor",
            OpCode::BinXor => "binxor",
            OpCode::BinNot => "binnot",
            OpCode::Shl => "shl",
            OpCode::Shr => "shr",
            OpCode::RotL => "rotl",
            OpCode::RotR => "rotr",
            OpCode::MakeRealArr => "makerealarr",
            OpCode::MakeIntArr => "makeintarr",
            OpCode::MakeCplxArr => "makecplxarr",
            OpCode::RdArr => "rdarr",
            OpCode::RdArrR => "rdarrr",
            OpCode::WrArr => "wrarr",
            OpCode::WrArrR => "wrarrr",
        }
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_byte_roundtrip() {
        for byte in 0u8..=0xff {
            if let Ok(op) = OpCode::try_from(byte) {
                assert_eq!(u8::from(op), byte);
            }
        }
    }

    #[test]
    fn test_halt_is_zero() {
        // zero-filled memory must halt the machine
        assert_eq!(u8::from(OpCode::Halt), 0x00);
    }

    #[test]
    fn test_unknown_byte_is_error() {
        assert!(OpCode::try_from(0xfeu8).is_err());
    }
}
