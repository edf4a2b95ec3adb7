//! Interrupt and timer tests. These exercise the only cross-thread state
//! (the atomic IRQ flags) and the background timer thread, so they run
//! serially.

use serial_test::serial;

use mufc::{compile_source, CompilerConfig};
use mufvm::{Value, Vm, VmOptions};

const MEM_SIZE: muf_core::Addr = 0x4000;

fn compile(src: &str) -> (Vec<u8>, mufc::symtab::SymTab) {
    let compilation =
        compile_source(src, "<test>", &CompilerConfig::default()).expect("compile");
    (compilation.image, compilation.syms)
}

fn global(vm: &Vm, syms: &mufc::symtab::SymTab, name: &str) -> Value {
    let sym = syms.find(name).expect("global symbol");
    let addr = sym.addr.expect("declared global");
    vm.read_mem_value(vm.gbp() + addr).expect("read global").1
}

#[test]
#[serial]
fn test_timer_interrupt_drives_isr() {
    let (image, syms) = compile(
        "program p\n\
         integer :: ticks = 0\n\
         set_isr(on_tick, 0)\n\
         set_timer(5)\n\
         do while ticks < 3\n\
         end do\n\
         set_timer(-1)\n\
         procedure on_tick()\n\
         ticks = ticks + 1\n\
         end procedure\n\
         end program",
    );

    let mut vm = Vm::new(VmOptions {
        mem_size: MEM_SIZE,
        ..VmOptions::default()
    });
    vm.set_mem(0, &image, true).expect("load");
    vm.run().expect("run");

    match global(&vm, &syms, "ticks") {
        Value::Int(ticks) => assert!(ticks >= 3, "expected at least 3 ticks, got {ticks}"),
        other => panic!("unexpected value {other:?}"),
    }
}

#[test]
#[serial]
fn test_external_interrupt_request() {
    // the ISR flips a flag the busy loop waits on; the IRQ is raised from
    // another thread through the shared handle
    let (image, syms) = compile(
        "program p\n\
         integer :: seen = 0\n\
         set_isr(on_irq, 4)\n\
         do while seen == 0\n\
         end do\n\
         procedure on_irq()\n\
         seen = 1\n\
         end procedure\n\
         end program",
    );

    let mut vm = Vm::new(VmOptions {
        mem_size: MEM_SIZE,
        ..VmOptions::default()
    });
    vm.set_mem(0, &image, true).expect("load");

    let handle = vm.irq_handle();
    let raiser = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(20));
        handle.request(4);
    });

    vm.run().expect("run");
    raiser.join().expect("join");

    assert_eq!(global(&vm, &syms, "seen"), Value::Int(1));
}

#[test]
#[serial]
fn test_pending_irq_without_isr_is_ignored() {
    let (image, _) = compile("program p\ninteger :: x = 1\nend program");

    let mut vm = Vm::new(VmOptions {
        mem_size: MEM_SIZE,
        ..VmOptions::default()
    });
    vm.set_mem(0, &image, true).expect("load");

    // no service routine installed: the flag is cleared, nothing happens
    vm.request_interrupt(7);
    vm.run().expect("run");
}
