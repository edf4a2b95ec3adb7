//! Shared contract between the muF compiler and the muF virtual machine.
//!
//! The compiler emits a flat byte image (instruction stream followed by a
//! constants pool) and the VM executes it; everything the two sides must
//! agree on lives here: opcode bytes, type-tag bytes, the numeric model and
//! the little-endian wire encoding of immediates.

pub mod opcode;
pub mod tag;
pub mod value;
pub mod wire;

pub use opcode::OpCode;
pub use tag::VmType;
pub use value::{Addr, Byte, Complex, Int, Real};
