//! muF VM CLI
//!
//! `mufvm [-d] [-t] [-z] [-c BOOL] [-m SIZE] PROGRAM.bin` — loads a byte
//! image at address zero and runs it. On exit the remaining stack contents
//! are printed with their type names.

use std::fs;
use std::path::PathBuf;
use std::process;
use std::time::Instant;

use clap::Parser as ClapParser;

use muf_core::Addr;
use mufvm::{Vm, VmOptions, DEFAULT_MEM_SIZE};

#[derive(ClapParser)]
#[command(name = "mufvm")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "muF virtual machine - run compiled muF byte code", long_about = None)]
struct Cli {
    /// Compiled program to run
    program: PathBuf,

    /// Print debug output for every instruction
    #[arg(short, long)]
    debug: bool,

    /// Time code execution
    #[arg(short, long)]
    timer: bool,

    /// Zero memory after popping values
    #[arg(short, long)]
    zeromem: bool,

    /// Enable memory bounds checks
    #[arg(short, long, default_value_t = true, action = clap::ArgAction::Set)]
    checks: bool,

    /// Total memory size in bytes
    #[arg(short, long, default_value_t = DEFAULT_MEM_SIZE)]
    mem: Addr,
}

fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(&cli) {
        eprintln!("Error: {err}");
        process::exit(-1);
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let image = fs::read(&cli.program)?;

    let mut vm = Vm::new(VmOptions {
        mem_size: cli.mem,
        debug: cli.debug,
        checks: cli.checks,
        zero_popped: cli.zeromem,
    });
    let sp_initial = vm.sp();

    vm.set_mem(0, &image, true)?;

    let start_time = Instant::now();
    let result = vm.run();
    let elapsed = start_time.elapsed();

    if cli.timer {
        println!("Run time: {} ms.", elapsed.as_secs_f64() * 1000.0);
    }

    result?;

    // print the remaining stack contents
    let mut stack_idx = 0;
    while vm.sp() < sp_initial {
        let (_, val) = vm.pop_value()?;
        println!("Stack[{stack_idx}] = {val} [{}]", val.type_name());
        stack_idx += 1;
    }

    Ok(())
}
