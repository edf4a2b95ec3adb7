//! muF compiler CLI
//!
//! `mufc [-s] [-a] [-d] [-o OUT] PROGRAM` — compiles a muF program to a
//! byte image for the muF VM, optionally dumping the symbol table and the
//! AST as XML.

use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use std::process;

use clap::Parser as ClapParser;

use mufc::{compile_file, CompilerConfig};

#[derive(ClapParser)]
#[command(name = "mufc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "muF compiler - compile muF programs to byte code", long_about = None)]
struct Cli {
    /// Input muF source file
    program: PathBuf,

    /// Compiled program output stem (defaults to the input's basename)
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Write the symbol table to OUT_syms.txt
    #[arg(short = 's', long)]
    symbols: bool,

    /// Write the syntax tree to OUT_ast.xml
    #[arg(short = 'a', long)]
    ast: bool,

    /// Print debug information
    #[arg(short, long)]
    debug: bool,
}

fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(&cli) {
        eprintln!("Error: {err}");
        process::exit(-1);
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let out_stem = match &cli.out {
        Some(out) => out.clone(),
        None => {
            let stem = cli
                .program
                .file_stem()
                .ok_or("Please specify an input program.")?;
            PathBuf::from(stem)
        }
    };

    let config = CompilerConfig {
        debug: cli.debug,
        ..CompilerConfig::default()
    };

    let compilation = compile_file(&cli.program, &out_stem, &config)?;

    println!(
        "Compiled {} -> {}.",
        cli.program.display(),
        out_stem.with_extension("bin").display()
    );

    if cli.symbols {
        let syms_path = format!("{}_syms.txt", out_stem.display());
        fs::write(&syms_path, compilation.syms.to_string())?;
        println!("Symbol table written to {syms_path}.");
    }

    if cli.ast {
        let ast_path = format!("{}_ast.xml", out_stem.display());
        let mut xml = String::new();
        write!(xml, "{}", AstXml(&compilation.ast))?;
        fs::write(&ast_path, xml)?;
        println!("Syntax tree written to {ast_path}.");
    }

    Ok(())
}

/// Display adapter for the XML dump.
struct AstXml<'a>(&'a mufc::ast::Program);

impl std::fmt::Display for AstXml<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        mufc::xml::write_ast_xml(self.0, f)
    }
}
