//! VM state: memory, registers, interrupts and the timer thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use muf_core::value::LARGEST_CELL_SIZE;
use muf_core::{Addr, OpCode, Real};

use crate::error::RuntimeError;

/// Number of interrupt request slots.
pub const NUM_INTERRUPTS: usize = 16;
/// IRQ raised by the periodic timer.
pub const TIMER_INTERRUPT: usize = 0;

/// Default memory size in bytes.
pub const DEFAULT_MEM_SIZE: Addr = 0x1000;

#[derive(Debug, Clone)]
pub struct VmOptions {
    pub mem_size: Addr,
    /// Trace every instruction and stack operation.
    pub debug: bool,
    /// Memory and pointer bounds checks (on by default; disable for
    /// benchmarking only).
    pub checks: bool,
    /// Overwrite popped bytes with zeros.
    pub zero_popped: bool,
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions {
            mem_size: DEFAULT_MEM_SIZE,
            debug: false,
            checks: true,
            zero_popped: false,
        }
    }
}

/// Pending interrupt flags, shared with the timer thread.
pub(crate) type IrqFlags = Arc<[AtomicBool; NUM_INTERRUPTS]>;

/// Cloneable handle raising interrupt requests across threads.
#[derive(Clone)]
pub struct IrqHandle {
    flags: IrqFlags,
}

impl IrqHandle {
    pub fn request(&self, num: usize) {
        if num < NUM_INTERRUPTS {
            self.flags[num].store(true, Ordering::SeqCst);
        }
    }
}

/// Background thread arming the timer IRQ periodically.
struct Timer {
    running: Arc<AtomicBool>,
    thread: thread::JoinHandle<()>,
}

pub struct Vm {
    pub(crate) mem: Vec<u8>,
    pub(crate) mem_size: Addr,

    // registers
    pub(crate) ip: Addr,
    pub(crate) sp: Addr,
    pub(crate) bp: Addr,
    pub(crate) gbp: Addr,

    /// Address range holding executable code, once known.
    pub(crate) code_range: Option<(Addr, Addr)>,

    /// Comparison tolerance for reals.
    pub(crate) eps: Real,
    /// Output precision for real-to-string casts.
    pub(crate) prec: usize,

    pub(crate) debug: bool,
    pub(crate) checks: bool,
    pub(crate) zero_popped: bool,

    pub(crate) irqs: IrqFlags,
    pub(crate) isrs: [Option<Addr>; NUM_INTERRUPTS],

    timer: Option<Timer>,
    pub(crate) timer_period: Duration,
}

impl Vm {
    pub fn new(opts: VmOptions) -> Self {
        let mem_size = opts.mem_size;
        let irqs: IrqFlags = Arc::new(std::array::from_fn(|_| AtomicBool::new(false)));

        let mut vm = Vm {
            mem: vec![0; mem_size as usize],
            mem_size,
            ip: 0,
            sp: 0,
            bp: 0,
            gbp: 0,
            code_range: None,
            eps: Real::EPSILON,
            prec: 6,
            debug: opts.debug,
            checks: opts.checks,
            zero_popped: opts.zero_popped,
            irqs,
            isrs: [None; NUM_INTERRUPTS],
            timer: None,
            timer_period: Duration::from_millis(250),
        };
        vm.reset();
        vm
    }

    pub fn with_mem_size(mem_size: Addr) -> Self {
        Vm::new(VmOptions {
            mem_size,
            ..VmOptions::default()
        })
    }

    /// Reset registers and fill memory with HALT bytes. The stack starts
    /// below a pad of the largest typed cell so a push can never write past
    /// the end of memory.
    pub fn reset(&mut self) {
        self.ip = 0;
        self.sp = self.mem_size - LARGEST_CELL_SIZE;
        self.bp = self.sp;
        self.gbp = self.sp;

        self.mem.fill(OpCode::Halt.into());
        self.code_range = None;
    }

    pub fn ip(&self) -> Addr {
        self.ip
    }

    pub fn sp(&self) -> Addr {
        self.sp
    }

    pub fn bp(&self) -> Addr {
        self.bp
    }

    pub fn gbp(&self) -> Addr {
        self.gbp
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// Copy a block into memory; `is_code` extends the known code range,
    /// which the pointer checks treat as off-limits for the stack.
    pub fn set_mem(&mut self, addr: Addr, data: &[u8], is_code: bool) -> Result<(), RuntimeError> {
        self.check_mem(addr, data.len() as Addr)?;

        if is_code {
            let end = addr + data.len() as Addr;
            self.code_range = Some(match self.code_range {
                None => (addr, end),
                Some((begin, old_end)) => (begin.min(addr), old_end.max(end)),
            });
        }

        self.mem[addr as usize..addr as usize + data.len()].copy_from_slice(data);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // interrupts
    // ------------------------------------------------------------------------

    /// Signal an interrupt request. Callable from any thread through the
    /// shared flags; this is the only cross-thread state.
    pub fn request_interrupt(&self, num: usize) {
        if num < NUM_INTERRUPTS {
            self.irqs[num].store(true, Ordering::SeqCst);
        }
    }

    /// Handle for raising interrupts from another thread while the
    /// interpreter runs.
    pub fn irq_handle(&self) -> IrqHandle {
        IrqHandle {
            flags: Arc::clone(&self.irqs),
        }
    }

    /// Install an interrupt service routine.
    pub(crate) fn set_isr(&mut self, num: Addr, addr: Addr) -> Result<(), RuntimeError> {
        if num < 0 || num as usize >= NUM_INTERRUPTS {
            return Err(RuntimeError::InvalidInterrupt(num));
        }

        self.isrs[num as usize] = Some(addr);
        if self.debug {
            println!("Set isr {num} to address {addr}.");
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // timer
    // ------------------------------------------------------------------------

    pub(crate) fn start_timer(&mut self) {
        if self.timer.is_some() {
            return;
        }

        let running = Arc::new(AtomicBool::new(true));
        let irqs = Arc::clone(&self.irqs);
        let period = self.timer_period;

        let thread = thread::spawn({
            let running = Arc::clone(&running);
            move || {
                while running.load(Ordering::SeqCst) {
                    thread::sleep(period);
                    irqs[TIMER_INTERRUPT].store(true, Ordering::SeqCst);
                }
            }
        });

        self.timer = Some(Timer { running, thread });
    }

    pub(crate) fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.running.store(false, Ordering::SeqCst);
            let _ = timer.thread.join();
        }
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        self.stop_timer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_registers() {
        let vm = Vm::with_mem_size(4096);
        assert_eq!(vm.ip(), 0);
        assert_eq!(vm.sp(), 4096 - LARGEST_CELL_SIZE);
        assert_eq!(vm.sp(), vm.bp());
        assert_eq!(vm.sp(), vm.gbp());
    }

    #[test]
    fn test_memory_filled_with_halt() {
        let vm = Vm::with_mem_size(64);
        assert!(vm.mem.iter().all(|&byte| byte == u8::from(OpCode::Halt)));
    }

    #[test]
    fn test_set_mem_tracks_code_range() {
        let mut vm = Vm::with_mem_size(256);
        vm.set_mem(0, &[1, 2, 3], true).expect("in bounds");
        vm.set_mem(10, &[4], true).expect("in bounds");
        assert_eq!(vm.code_range, Some((0, 11)));
    }

    #[test]
    fn test_set_mem_out_of_bounds() {
        let mut vm = Vm::with_mem_size(16);
        assert!(vm.set_mem(14, &[0; 4], false).is_err());
    }

    #[test]
    fn test_request_interrupt_sets_flag() {
        let vm = Vm::with_mem_size(64);
        vm.request_interrupt(3);
        assert!(vm.irqs[3].load(Ordering::SeqCst));
        // out-of-range requests are ignored
        vm.request_interrupt(99);
    }
}
