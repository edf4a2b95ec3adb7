//! muF compiler library.
//!
//! The pipeline: source text is tokenized and parsed into an AST (filling
//! the symbol table on the way), optionally constant-folded, and lowered by
//! the code generator into a byte image the muF VM executes.

pub mod ast;
pub mod codegen;
pub mod consttab;
pub mod fold;
pub mod lexer;
pub mod parser;
pub mod symtab;
pub mod xml;

use std::fs;
use std::path::Path;

use codegen::{Codegen, CodegenError};
use parser::{ParseError, Parser};
use symtab::{SymTab, SymbolType};

/// Compiler configuration.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Print debug information while compiling.
    pub debug: bool,
    /// Fold constant expressions before code generation.
    pub fold_consts: bool,
    /// Optional entry function called by the start-up prelude; `None`
    /// starts execution directly in the global scope.
    pub entry_func: Option<String>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            debug: false,
            fold_consts: true,
            entry_func: None,
        }
    }
}

/// Result of a successful compilation.
pub struct Compilation {
    /// The finished byte image (code followed by the constants pool).
    pub image: Vec<u8>,
    /// Symbol table as left behind by parsing and code generation.
    pub syms: SymTab,
    /// The parsed program, before constant folding.
    pub ast: ast::Program,
}

/// Any error the compilation pipeline can produce.
#[derive(Debug)]
pub enum CompileError {
    Parse(ParseError),
    Codegen(CodegenError),
    Io(std::io::Error),
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::Parse(err) => write!(f, "{err}"),
            CompileError::Codegen(err) => write!(f, "{err}"),
            CompileError::Io(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<ParseError> for CompileError {
    fn from(err: ParseError) -> Self {
        CompileError::Parse(err)
    }
}

impl From<CodegenError> for CompileError {
    fn from(err: CodegenError) -> Self {
        CompileError::Codegen(err)
    }
}

impl From<std::io::Error> for CompileError {
    fn from(err: std::io::Error) -> Self {
        CompileError::Io(err)
    }
}

/// Register the external runtime functions the VM dispatches by name, so
/// calls to them resolve during code generation.
pub fn register_ext_funcs(syms: &mut SymTab) {
    use SymbolType::{Int, Real, String as Str, Void};

    // math
    syms.add_ext_func("", "pow", "pow", Real, vec![Real, Real]);
    syms.add_ext_func("", "exp", "exp", Real, vec![Real]);
    syms.add_ext_func("", "sin", "sin", Real, vec![Real]);
    syms.add_ext_func("", "cos", "cos", Real, vec![Real]);
    syms.add_ext_func("", "tan", "tan", Real, vec![Real]);
    syms.add_ext_func("", "sqrt", "sqrt", Real, vec![Real]);
    syms.add_ext_func("", "fabs", "fabs", Real, vec![Real]);
    syms.add_ext_func("", "abs", "abs", Int, vec![Int]);
    syms.add_ext_func("", "norm", "norm", Real, vec![Real]);

    // strings and conversions
    syms.add_ext_func("", "strlen", "strlen", Int, vec![Str]);
    syms.add_ext_func("", "to_str", "to_str", Void, vec![Real]);
    syms.add_ext_func("", "flt_to_str", "flt_to_str", Void, vec![Real, Str, Int]);
    syms.add_ext_func("", "int_to_str", "int_to_str", Void, vec![Int, Str, Int]);

    // runtime configuration
    syms.add_ext_func("", "set_debug", "set_debug", Void, vec![Int]);
    syms.add_ext_func("", "set_eps", "set_eps", Void, vec![Real]);
    syms.add_ext_func("", "get_eps", "get_eps", Real, vec![]);
    syms.add_ext_func("", "set_prec", "set_prec", Void, vec![Int]);

    // console i/o
    syms.add_ext_func("", "print", "print", Void, vec![Str]);
    syms.add_ext_func("", "getflt", "getflt", Real, vec![Str]);
    syms.add_ext_func("", "getint", "getint", Int, vec![Str]);

    // interrupts and timing
    syms.add_ext_func("", "set_isr", "set_isr", Void, vec![SymbolType::Func, Int]);
    syms.add_ext_func("", "sleep", "sleep", Void, vec![Int]);
    syms.add_ext_func("", "set_timer", "set_timer", Void, vec![Int]);
}

/// Compile muF source text into a byte image.
pub fn compile_source(
    src: &str,
    src_name: &str,
    config: &CompilerConfig,
) -> Result<Compilation, CompileError> {
    let mut syms = SymTab::new();
    register_ext_funcs(&mut syms);

    let ast = Parser::new(src, src_name, &mut syms)?.parse()?;

    let mut lowered = ast.clone();
    if config.fold_consts {
        fold::fold_program(&mut lowered);
    }

    let mut gen = Codegen::new(&mut syms);
    gen.set_debug(config.debug);
    if let Some(entry) = &config.entry_func {
        gen.set_entry_func(entry.clone());
    }

    gen.start()?;
    gen.stmts(&lowered.stmts)?;
    let image = gen.finish()?;

    if config.debug {
        println!("Generated {} bytes of code.", image.len());
    }

    Ok(Compilation { image, syms, ast })
}

/// Compile a source file and write the byte image next to `out_stem`.
pub fn compile_file(
    input: &Path,
    out_stem: &Path,
    config: &CompilerConfig,
) -> Result<Compilation, CompileError> {
    let src = fs::read_to_string(input)?;
    let src_name = input.display().to_string();

    let compilation = compile_source(&src, &src_name, config)?;

    let bin_path = out_stem.with_extension("bin");
    fs::write(&bin_path, &compilation.image)?;

    Ok(compilation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use muf_core::{wire, OpCode, VmType};

    #[test]
    fn test_compile_minimal_program() {
        let compilation = compile_source(
            "program p\ninteger :: x = 2\nend program",
            "<test>",
            &CompilerConfig::default(),
        )
        .expect("compile");

        assert!(!compilation.image.is_empty());
        // the prelude allocates the global frame: PUSH INT <size>; ADDFRAME
        assert_eq!(compilation.image[0], u8::from(OpCode::Push));
        assert_eq!(compilation.image[1], u8::from(VmType::Int));
        assert_eq!(wire::read_int(&compilation.image, 2), 9);
        assert_eq!(compilation.image[10], u8::from(OpCode::AddFrame));
    }

    #[test]
    fn test_image_has_no_unpatched_call() {
        // calling a function defined later forces a forward patch
        let compilation = compile_source(
            "program p\ninteger :: r\nr = one()\nfunction one() result(integer)\none = 1\nend function\nend program",
            "<test>",
            &CompilerConfig::default(),
        )
        .expect("compile");

        // scan for a PUSH of a zero ip-relative address followed by CALL:
        // a leftover placeholder would read as offset 0
        let image = &compilation.image;
        for pos in 0..image.len().saturating_sub(7) {
            if image[pos] == u8::from(OpCode::Push)
                && image[pos + 1] == u8::from(VmType::AddrIp)
                && image[pos + 6] == u8::from(OpCode::Call)
            {
                assert_ne!(wire::read_addr(image, pos + 2), 0, "unpatched call at {pos}");
            }
        }
    }

    #[test]
    fn test_unknown_function_call_fails() {
        let err = compile_source(
            "program p\ninteger :: r\nr = nosuch(1)\nend program",
            "<test>",
            &CompilerConfig::default(),
        )
        .err()
        .expect("must fail");
        assert!(err.to_string().contains("nosuch"));
    }

    #[test]
    fn test_call_arity_checked() {
        let err = compile_source(
            "program p\ninteger :: r\nr = abs(1, 2)\nend program",
            "<test>",
            &CompilerConfig::default(),
        )
        .err()
        .expect("must fail");
        assert!(err.to_string().contains("abs"));
    }

    #[test]
    fn test_comefrom_is_reserved() {
        let err = compile_source(
            "program p\n.lbl\ncomefrom .lbl\nend program",
            "<test>",
            &CompilerConfig::default(),
        )
        .err()
        .expect("must fail");
        assert!(err.to_string().to_lowercase().contains("comefrom"));
    }

    #[test]
    fn test_unknown_label_fails_at_finish() {
        let err = compile_source(
            "program p\ngoto .nowhere\nend program",
            "<test>",
            &CompilerConfig::default(),
        )
        .err()
        .expect("must fail");
        assert!(err.to_string().contains("nowhere"));
    }
}
