//! muF virtual machine.
//!
//! A stack-oriented byte-code interpreter over a flat byte memory: typed
//! stack cells, tag-prefixed memory cells, IP/SP/BP/GBP registers, call
//! frames, matrix primitives, interrupts and a periodic timer. Byte images
//! come out of the muF compiler; the VM loads them at address zero and runs
//! until HALT or the first fatal error.

pub mod error;
pub mod ext;
pub mod mem;
pub mod ops;
pub mod run;
pub mod value;
pub mod vm;

pub use error::RuntimeError;
pub use value::Value;
pub use vm::{IrqHandle, Vm, VmOptions, DEFAULT_MEM_SIZE, NUM_INTERRUPTS, TIMER_INTERRUPT};
