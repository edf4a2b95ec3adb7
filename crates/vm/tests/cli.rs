//! `mufvm` binary tests: image loading, program output and the final
//! stack dump.

use std::process::Command;

use mufc::{compile_source, CompilerConfig};

fn compile_to_file(src: &str, dir: &tempfile::TempDir) -> std::path::PathBuf {
    let compilation =
        compile_source(src, "<test>", &CompilerConfig::default()).expect("compile");
    let path = dir.path().join("prog.bin");
    std::fs::write(&path, &compilation.image).expect("write image");
    path
}

fn mufvm() -> Command {
    Command::new(env!("CARGO_BIN_EXE_mufvm"))
}

#[test]
fn test_print_goes_to_stdout() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = compile_to_file("program p\nprint(\"hello, muF\")\nend program", &dir);

    let output = mufvm().arg(&path).output().expect("run mufvm");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("hello, muF"));
}

#[test]
fn test_int_to_str_print_pipeline() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = compile_to_file(
        "program p\n\
         string :: s\n\
         integer :: x = 2\n\
         integer :: y = 3\n\
         print(int_to_str(x * y + 1, s, 10))\n\
         end program",
        &dir,
    );

    let output = mufvm().arg(&path).output().expect("run mufvm");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains('7'));
}

#[test]
fn test_leftover_stack_is_dumped() {
    // a bare expression statement leaves its value on the stack; without
    // globals there is no frame teardown to disturb it
    let dir = tempfile::tempdir().expect("tempdir");
    let path = compile_to_file("program p\n1 + 2\nend program", &dir);

    let output = mufvm().arg(&path).output().expect("run mufvm");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Stack[0] = 3 [integer]"));
}

#[test]
fn test_timing_flag() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = compile_to_file("program p\nend program", &dir);

    let output = mufvm().arg("-t").arg(&path).output().expect("run mufvm");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Run time:"));
}

#[test]
fn test_missing_file_fails() {
    let output = mufvm().arg("/nonexistent/prog.bin").output().expect("run");
    assert!(!output.status.success());
}

#[test]
fn test_truncated_image_fails() {
    // an image that pushes past the end of its own bytes trips the memory
    // checks instead of running wild
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("broken.bin");
    // PUSH with an int tag but no payload: the remaining memory is HALT
    // bytes, so the immediate decodes, but execution continues into the
    // (tiny) image's padding and halts; a malformed tag byte instead fails
    std::fs::write(&path, [0x10u8, 0xee]).expect("write");

    let output = mufvm().arg(&path).output().expect("run");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error"));
}
