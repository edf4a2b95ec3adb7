//! VM runtime errors.
//!
//! Every runtime fault is fatal: the fetch loop stops and the error is
//! reported with the offending registers. Nothing is silently recovered.

use muf_core::Addr;

#[derive(Debug)]
pub enum RuntimeError {
    /// Memory access outside `[0, memsize)`.
    OutOfBounds { addr: Addr, size: Addr },
    /// A register left its allowed range (or entered the code segment).
    PointerOutOfRange { reg: &'static str, val: Addr },
    /// Unknown instruction byte.
    InvalidOpcode { byte: u8, ip: Addr },
    /// Unknown type-tag byte.
    UnknownType { byte: u8 },
    /// Operand types an operation cannot combine.
    TypeMismatch { op: &'static str, types: String },
    /// Cast between incompatible types.
    InvalidCast { from: &'static str, to: &'static str },
    DivisionByZero,
    /// Array or string index outside the value's length.
    IndexOutOfBounds { idx: muf_core::Int, len: usize },
    /// Array operands whose shapes do not fit the operation.
    DimensionMismatch(String),
    /// `EXTCALL` with a name the host runtime does not provide.
    UnknownExternal(String),
    /// Interrupt number outside the IRQ table.
    InvalidInterrupt(Addr),
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeError::OutOfBounds { addr, size } => {
                write!(f, "Tried to access {size} byte(s) out of memory bounds at address {addr}.")
            }
            RuntimeError::PointerOutOfRange { reg, val } => {
                write!(f, "{reg} pointer {val} is out of memory bounds.")
            }
            RuntimeError::InvalidOpcode { byte, ip } => {
                write!(f, "Invalid instruction 0x{byte:02x} at ip = {ip}.")
            }
            RuntimeError::UnknownType { byte } => {
                write!(f, "Unknown data type 0x{byte:02x}.")
            }
            RuntimeError::TypeMismatch { op, types } => {
                write!(f, "Type mismatch in {op} operation. Types: {types}.")
            }
            RuntimeError::InvalidCast { from, to } => {
                write!(f, "Invalid cast from {from} to {to}.")
            }
            RuntimeError::DivisionByZero => write!(f, "Division by zero."),
            RuntimeError::IndexOutOfBounds { idx, len } => {
                write!(f, "Array index {idx} out of bounds (length {len}).")
            }
            RuntimeError::DimensionMismatch(msg) => write!(f, "{msg}"),
            RuntimeError::UnknownExternal(name) => {
                write!(f, "Unknown external function \"{name}\".")
            }
            RuntimeError::InvalidInterrupt(num) => {
                write!(f, "Invalid interrupt number {num}.")
            }
        }
    }
}

impl std::error::Error for RuntimeError {}
