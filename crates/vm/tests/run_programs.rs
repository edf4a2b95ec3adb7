//! End-to-end tests: muF source compiled with the real compiler and
//! executed by the real VM. Results are verified by reading the global
//! variables' memory cells after the run.

use muf_core::Complex;
use mufc::symtab::SymTab;
use mufc::{compile_source, CompilerConfig};
use mufvm::{Value, Vm, VmOptions};

const MEM_SIZE: muf_core::Addr = 0x4000;

fn run_program(src: &str) -> (Vm, SymTab) {
    let compilation =
        compile_source(src, "<test>", &CompilerConfig::default()).expect("compile");

    let mut vm = Vm::new(VmOptions {
        mem_size: MEM_SIZE,
        ..VmOptions::default()
    });
    vm.set_mem(0, &compilation.image, true).expect("load");
    vm.run().expect("run");

    (vm, compilation.syms)
}

/// Value of a global variable after the run.
fn global(vm: &Vm, syms: &SymTab, name: &str) -> Value {
    let sym = syms.find(name).expect("global symbol");
    let addr = sym.addr.expect("declared global");
    let (_, val) = vm.read_mem_value(vm.gbp() + addr).expect("read global");
    val
}

#[test]
fn test_arithmetic_with_coercion() {
    let (vm, syms) = run_program(
        "program p\n\
         integer :: x = 2\n\
         integer :: y = 3\n\
         integer :: r\n\
         r = x * y + 1\n\
         end program",
    );
    assert_eq!(global(&vm, &syms, "r"), Value::Int(7));
}

#[test]
fn test_counted_loop_sums() {
    let (vm, syms) = run_program(
        "program p\n\
         integer :: i\n\
         integer :: s = 0\n\
         do i = 1, 5\n\
         s = s + i\n\
         end do\n\
         end program",
    );
    assert_eq!(global(&vm, &syms, "s"), Value::Int(15));
}

#[test]
fn test_counted_loop_with_increment() {
    let (vm, syms) = run_program(
        "program p\n\
         integer :: i\n\
         integer :: s = 0\n\
         do i = 1, 10, 3\n\
         s = s + i\n\
         end do\n\
         end program",
    );
    // 1 + 4 + 7 + 10
    assert_eq!(global(&vm, &syms, "s"), Value::Int(22));
}

#[test]
fn test_if_else_branches() {
    for (x, expected) in [(5, "a"), (2, "b")] {
        let src = format!(
            "program p\n\
             integer :: x = {x}\n\
             string :: s\n\
             if x > 3 then\n\
             s = \"a\"\n\
             else\n\
             s = \"b\"\n\
             end if\n\
             end program"
        );
        let (vm, syms) = run_program(&src);
        assert_eq!(global(&vm, &syms, "s"), Value::Str(expected.into()));
    }
}

#[test]
fn test_function_call_with_result_variable() {
    let (vm, syms) = run_program(
        "program p\n\
         integer :: r\n\
         r = add(4, 6)\n\
         function add(integer :: a, integer :: b) result(integer)\n\
         add = a + b\n\
         end function\n\
         end program",
    );
    assert_eq!(global(&vm, &syms, "r"), Value::Int(10));
}

#[test]
fn test_matrix_multiplication() {
    let (vm, syms) = run_program(
        "program p\n\
         real, dimension(2, 2) :: a = [1, 2, 3, 4]\n\
         real, dimension(2, 2) :: b = [5, 6, 7, 8]\n\
         real, dimension(2, 2) :: c\n\
         c = a * b\n\
         end program",
    );
    assert_eq!(
        global(&vm, &syms, "c"),
        Value::RealArr(vec![19.0, 22.0, 43.0, 50.0])
    );
}

#[test]
fn test_break_with_depth_exits_both_loops() {
    let (vm, syms) = run_program(
        "program p\n\
         integer :: i, j\n\
         integer :: c = 0\n\
         integer :: after = 0\n\
         do i = 1, 3\n\
         do j = 1, 3\n\
         c = c + 1\n\
         break 2\n\
         end do\n\
         end do\n\
         after = 1\n\
         end program",
    );
    assert_eq!(global(&vm, &syms, "c"), Value::Int(1));
    assert_eq!(global(&vm, &syms, "after"), Value::Int(1));
}

#[test]
fn test_next_skips_iteration() {
    let (vm, syms) = run_program(
        "program p\n\
         integer :: i\n\
         integer :: s = 0\n\
         do i = 1, 5\n\
         if i == 3 then\n\
         next\n\
         end if\n\
         s = s + i\n\
         end do\n\
         end program",
    );
    // 1 + 2 + 4 + 5
    assert_eq!(global(&vm, &syms, "s"), Value::Int(12));
}

#[test]
fn test_while_loop() {
    let (vm, syms) = run_program(
        "program p\n\
         integer :: i = 0\n\
         integer :: s = 0\n\
         do while i < 5\n\
         s = s + i\n\
         i = i + 1\n\
         end do\n\
         end program",
    );
    assert_eq!(global(&vm, &syms, "s"), Value::Int(10));
}

#[test]
fn test_select_case() {
    for (x, expected) in [(1, 10), (2, 20), (9, -1)] {
        let src = format!(
            "program p\n\
             integer :: x = {x}\n\
             integer :: r = 0\n\
             select case (x)\n\
             case (1)\n\
             r = 10\n\
             case (2)\n\
             r = 20\n\
             case default\n\
             r = -1\n\
             end select\n\
             end program"
        );
        let (vm, syms) = run_program(&src);
        assert_eq!(global(&vm, &syms, "r"), Value::Int(expected));
    }
}

#[test]
fn test_goto_label_loop() {
    let (vm, syms) = run_program(
        "program p\n\
         integer :: c = 0\n\
         .again\n\
         c = c + 1\n\
         if c < 3 then\n\
         goto .again\n\
         end if\n\
         end program",
    );
    assert_eq!(global(&vm, &syms, "c"), Value::Int(3));
}

#[test]
fn test_string_concatenation_at_runtime() {
    let (vm, syms) = run_program(
        "program p\n\
         string :: a = \"foo\"\n\
         string :: b = \"bar\"\n\
         string :: c\n\
         c = a + b\n\
         end program",
    );
    assert_eq!(global(&vm, &syms, "c"), Value::Str("foobar".into()));
}

#[test]
fn test_complex_arithmetic() {
    let (vm, syms) = run_program(
        "program p\n\
         complex :: a = (1, 2)\n\
         complex :: b = (3, -1)\n\
         complex :: c\n\
         c = a * b\n\
         end program",
    );
    assert_eq!(global(&vm, &syms, "c"), Value::Cplx(Complex::new(5.0, 5.0)));
}

#[test]
fn test_mixed_int_real_promotes() {
    let (vm, syms) = run_program(
        "program p\n\
         integer :: i = 3\n\
         real :: r\n\
         r = i / 2.0\n\
         end program",
    );
    assert_eq!(global(&vm, &syms, "r"), Value::Real(1.5));
}

#[test]
fn test_dot_product() {
    let (vm, syms) = run_program(
        "program p\n\
         real, dimension(3) :: v = [1, 2, 3]\n\
         real, dimension(3) :: w = [4, 5, 6]\n\
         real :: d\n\
         d = v * w\n\
         end program",
    );
    assert_eq!(global(&vm, &syms, "d"), Value::Real(32.0));
}

#[test]
fn test_array_element_access_and_assignment() {
    let (vm, syms) = run_program(
        "program p\n\
         integer, dimension(3) :: v = [10, 20, 30]\n\
         integer :: r\n\
         v[1] = 99\n\
         r = v[1] + v[0]\n\
         end program",
    );
    assert_eq!(global(&vm, &syms, "r"), Value::Int(109));
    assert_eq!(global(&vm, &syms, "v"), Value::IntArr(vec![10, 99, 30]));
}

#[test]
fn test_matrix_element_access() {
    let (vm, syms) = run_program(
        "program p\n\
         real, dimension(2, 2) :: m = [1, 2, 3, 4]\n\
         real :: r\n\
         m[1, 0] = 30\n\
         r = m[0, 1] + m[1, 0]\n\
         end program",
    );
    assert_eq!(global(&vm, &syms, "r"), Value::Real(32.0));
}

#[test]
fn test_ranged_array_read_and_write() {
    let (vm, syms) = run_program(
        "program p\n\
         real, dimension(4) :: v = [1, 2, 3, 4]\n\
         real, dimension(2) :: w\n\
         w = v[1 ~ 2]\n\
         v[0 ~ 1] = 0.0\n\
         end program",
    );
    assert_eq!(global(&vm, &syms, "w"), Value::RealArr(vec![2.0, 3.0]));
    assert_eq!(
        global(&vm, &syms, "v"),
        Value::RealArr(vec![0.0, 0.0, 3.0, 4.0])
    );
}

#[test]
fn test_norm_of_vector() {
    let (vm, syms) = run_program(
        "program p\n\
         real, dimension(2) :: v = [3, 4]\n\
         real :: n\n\
         n = |v|\n\
         end program",
    );
    assert_eq!(global(&vm, &syms, "n"), Value::Real(5.0));
}

#[test]
fn test_transpose() {
    let (vm, syms) = run_program(
        "program p\n\
         real, dimension(2, 3) :: m = [1, 2, 3, 4, 5, 6]\n\
         real, dimension(3, 2) :: t\n\
         t = m'\n\
         end program",
    );
    assert_eq!(
        global(&vm, &syms, "t"),
        Value::RealArr(vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0])
    );
}

#[test]
fn test_recursive_function() {
    let (vm, syms) = run_program(
        "program p\n\
         integer :: r\n\
         r = fact(5)\n\
         function fact(integer :: n) result(integer)\n\
         if n <= 1 then\n\
         fact = 1\n\
         else\n\
         fact = n * fact(n - 1)\n\
         end if\n\
         end function\n\
         end program",
    );
    assert_eq!(global(&vm, &syms, "r"), Value::Int(120));
}

#[test]
fn test_multi_return_function() {
    let (vm, syms) = run_program(
        "program p\n\
         integer :: q, r\n\
         assign q, r = divmod(17, 5)\n\
         function divmod(integer :: a, integer :: b) results(integer :: quot, integer :: rem)\n\
         quot = a / b\n\
         rem = a % b\n\
         end function\n\
         end program",
    );
    assert_eq!(global(&vm, &syms, "q"), Value::Int(3));
    assert_eq!(global(&vm, &syms, "r"), Value::Int(2));
}

#[test]
fn test_procedure_call() {
    let (vm, syms) = run_program(
        "program p\n\
         integer :: c = 0\n\
         bump()\n\
         bump()\n\
         procedure bump()\n\
         c = c + 1\n\
         end procedure\n\
         end program",
    );
    assert_eq!(global(&vm, &syms, "c"), Value::Int(2));
}

#[test]
fn test_early_return() {
    let (vm, syms) = run_program(
        "program p\n\
         integer :: r\n\
         r = pick(1)\n\
         function pick(integer :: n) result(integer)\n\
         pick = 10\n\
         if n == 1 then\n\
         return\n\
         end if\n\
         pick = 20\n\
         end function\n\
         end program",
    );
    assert_eq!(global(&vm, &syms, "r"), Value::Int(10));
}

#[test]
fn test_return_with_explicit_value() {
    let (vm, syms) = run_program(
        "program p\n\
         integer :: r\n\
         r = f(3)\n\
         function f(integer :: n) result(integer)\n\
         return n * 2\n\
         end function\n\
         end program",
    );
    assert_eq!(global(&vm, &syms, "r"), Value::Int(6));
}

#[test]
fn test_boolean_logic_and_comparisons() {
    let (vm, syms) = run_program(
        "program p\n\
         logical :: a = .true.\n\
         logical :: b = .false.\n\
         logical :: r\n\
         r = a and not b\n\
         end program",
    );
    assert_eq!(global(&vm, &syms, "r"), Value::Bool(true));
}

#[test]
fn test_power_operator() {
    let (vm, syms) = run_program(
        "program p\n\
         integer :: n = 2\n\
         integer :: r\n\
         r = n ** 10\n\
         end program",
    );
    assert_eq!(global(&vm, &syms, "r"), Value::Int(1024));
}

#[test]
fn test_string_cast_via_external() {
    let (vm, syms) = run_program(
        "program p\n\
         string :: s\n\
         integer :: x = 6\n\
         s = to_str(x * 7)\n\
         end program",
    );
    assert_eq!(global(&vm, &syms, "s"), Value::Str("42".into()));
}

#[test]
fn test_real_equality_uses_epsilon() {
    let (vm, syms) = run_program(
        "program p\n\
         logical :: r\n\
         set_eps(0.001)\n\
         r = 1.0 == 1.0000001\n\
         end program",
    );
    assert_eq!(global(&vm, &syms, "r"), Value::Bool(true));
}

#[test]
fn test_scalar_broadcast_assignment_to_array() {
    let (vm, syms) = run_program(
        "program p\n\
         real, dimension(3) :: v\n\
         v = 2.5\n\
         end program",
    );
    assert_eq!(global(&vm, &syms, "v"), Value::RealArr(vec![2.5, 2.5, 2.5]));
}

#[test]
fn test_matrix_vector_product() {
    let (vm, syms) = run_program(
        "program p\n\
         real, dimension(2, 2) :: m = [1, 2, 3, 4]\n\
         real, dimension(2) :: v = [5, 6]\n\
         real, dimension(2) :: r\n\
         r = m * v\n\
         end program",
    );
    assert_eq!(global(&vm, &syms, "r"), Value::RealArr(vec![17.0, 39.0]));
}

#[test]
fn test_division_by_zero_is_fatal() {
    let compilation = compile_source(
        "program p\n\
         integer :: a = 1\n\
         integer :: b = 0\n\
         integer :: r\n\
         r = a / b\n\
         end program",
        "<test>",
        &CompilerConfig::default(),
    )
    .expect("compile");

    let mut vm = Vm::with_mem_size(MEM_SIZE);
    vm.set_mem(0, &compilation.image, true).expect("load");
    assert!(vm.run().is_err());
}

#[test]
fn test_stack_restored_after_call() {
    // after the top-level call returns and its result is stored, the
    // stack pointer is back at the bottom of the global frame
    let (vm, syms) = run_program(
        "program p\n\
         integer :: r\n\
         r = add(1, 2)\n\
         function add(integer :: a, integer :: b) result(integer)\n\
         add = a + b\n\
         end function\n\
         end program",
    );
    assert_eq!(global(&vm, &syms, "r"), Value::Int(3));
    // REMFRAME ran: sp is back at the global base
    assert_eq!(vm.sp(), vm.gbp());
}
