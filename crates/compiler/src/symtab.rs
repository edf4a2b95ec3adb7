//! Symbol table
//!
//! Scopes are lexical and name-mangled: a symbol's key is its fully
//! qualified name, the enclosing scope names joined with `::`. Symbols are
//! never removed; duplicate insertion is reported and rejected.

use std::collections::HashMap;
use std::fmt;

use muf_core::Addr;

/// Scope name separator used in fully qualified names.
pub const SCOPE_SEP: &str = "::";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolType {
    Void,

    Real,
    Int,
    Cplx,
    Bool,
    String,

    RealArr,
    IntArr,
    CplxArr,

    /// Compound, used as the return type of multi-return functions.
    Comp,
    /// Function.
    Func,

    Unknown,
}

impl SymbolType {
    pub fn name(self) -> &'static str {
        match self {
            SymbolType::Void => "void",
            SymbolType::Real => "real",
            SymbolType::Int => "integer",
            SymbolType::Cplx => "complex",
            SymbolType::Bool => "bool",
            SymbolType::String => "string",
            SymbolType::RealArr => "real_array",
            SymbolType::IntArr => "integer_array",
            SymbolType::CplxArr => "complex_array",
            SymbolType::Comp => "comp",
            SymbolType::Func => "func",
            SymbolType::Unknown => "unknown",
        }
    }

    pub fn is_array(self) -> bool {
        matches!(
            self,
            SymbolType::RealArr | SymbolType::IntArr | SymbolType::CplxArr
        )
    }

    /// Array type holding elements of this scalar type.
    pub fn array_of(self) -> Option<SymbolType> {
        match self {
            SymbolType::Real => Some(SymbolType::RealArr),
            SymbolType::Int => Some(SymbolType::IntArr),
            SymbolType::Cplx => Some(SymbolType::CplxArr),
            _ => None,
        }
    }
}

impl fmt::Display for SymbolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Symbol {
    /// Local identifier.
    pub name: String,
    /// Full identifier with scope prefixes.
    pub scoped_name: String,
    /// Scope prefix (empty for global scope).
    pub scope_name: String,
    /// Name of the external symbol, if different from the internal one.
    pub ext_name: Option<String>,

    pub ty: SymbolType,
    /// Empty for scalars, one entry per rank for arrays, byte capacity for
    /// strings.
    pub dims: Vec<usize>,

    // for functions
    pub argty: Vec<SymbolType>,
    pub retty: SymbolType,
    pub retdims: Vec<usize>,
    /// Per-return-value types of a multi-return function.
    pub elems: Vec<SymbolType>,

    /// Dummy type-marker symbol used by the code generator.
    pub is_tmp: bool,
    pub is_external: bool,
    /// Function known to call itself.
    pub is_recursive: bool,
    pub is_arg: bool,
    pub is_ret: bool,
    pub is_global: bool,

    /// Offset relative to the base register (BP for locals, GBP for
    /// globals), or the entry address for functions.
    pub addr: Option<Addr>,
    /// End address of a function body, set after code emission.
    pub end_addr: Option<Addr>,
    pub argidx: usize,
    pub retidx: usize,

    /// Advisory reference count.
    pub refcnt: usize,
}

impl Symbol {
    /// Dummy (untabled) symbol carrying only a type, used by the code
    /// generator for literals and intermediate results.
    pub fn type_const(ty: SymbolType) -> Symbol {
        Symbol {
            name: format!("<{}>", ty.name()),
            ty,
            is_tmp: true,
            ..Symbol::default()
        }
    }

    /// Product of all dimensions starting at `from_dim` (1 for scalars).
    pub fn total_size_from(&self, from_dim: usize) -> usize {
        self.dims.iter().skip(from_dim).product::<usize>().max(1)
    }

    pub fn total_size(&self) -> usize {
        self.total_size_from(0)
    }
}

impl Default for SymbolType {
    fn default() -> Self {
        SymbolType::Void
    }
}

/// Symbol table keyed by fully qualified name.
#[derive(Debug, Default)]
pub struct SymTab {
    syms: HashMap<String, Symbol>,
}

impl SymTab {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a variable symbol under `scope ∥ name`. Duplicates are
    /// reported to stderr and rejected.
    pub fn add_symbol(
        &mut self,
        scope: &str,
        name: &str,
        ty: SymbolType,
        dims: Vec<usize>,
    ) -> Option<&mut Symbol> {
        let scoped_name = format!("{scope}{name}");
        if let Some(other) = self.syms.get(&scoped_name) {
            eprintln!(
                "Symbol \"{}\" is already in the symbol table and has type {}.",
                scoped_name, other.ty
            );
            return None;
        }

        let sym = Symbol {
            name: name.to_string(),
            scoped_name: scoped_name.clone(),
            scope_name: scope.to_string(),
            ty,
            dims,
            ..Symbol::default()
        };

        Some(self.syms.entry(scoped_name).or_insert(sym))
    }

    /// Insert a function symbol with its signature.
    #[allow(clippy::too_many_arguments)]
    pub fn add_func(
        &mut self,
        scope: &str,
        name: &str,
        retty: SymbolType,
        argty: Vec<SymbolType>,
        retdims: Option<Vec<usize>>,
        rettypes: Option<Vec<SymbolType>>,
        is_external: bool,
    ) -> Option<&mut Symbol> {
        let scoped_name = format!("{scope}{name}");
        if self.syms.contains_key(&scoped_name) {
            eprintln!("Symbol \"{}\" is already in the symbol table.", scoped_name);
            return None;
        }

        let sym = Symbol {
            name: name.to_string(),
            scoped_name: scoped_name.clone(),
            scope_name: scope.to_string(),
            ty: SymbolType::Func,
            argty,
            retty,
            retdims: retdims.unwrap_or_default(),
            elems: rettypes.unwrap_or_default(),
            is_external,
            ..Symbol::default()
        };

        Some(self.syms.entry(scoped_name).or_insert(sym))
    }

    /// Like `add_func`, with an alternate external name.
    pub fn add_ext_func(
        &mut self,
        scope: &str,
        name: &str,
        ext_name: &str,
        retty: SymbolType,
        argty: Vec<SymbolType>,
    ) -> Option<&mut Symbol> {
        let sym = self.add_func(scope, name, retty, argty, None, None, true)?;
        sym.ext_name = Some(ext_name.to_string());
        Some(sym)
    }

    pub fn find(&self, scoped_name: &str) -> Option<&Symbol> {
        self.syms.get(scoped_name)
    }

    pub fn find_mut(&mut self, scoped_name: &str) -> Option<&mut Symbol> {
        self.syms.get_mut(scoped_name)
    }

    /// All symbols whose parent scope equals `scope`, optionally without
    /// function arguments. Used to compute stack-frame sizes.
    pub fn find_in_scope(&self, scope: &str, no_args: bool) -> Vec<&Symbol> {
        let mut syms: Vec<&Symbol> = self
            .syms
            .values()
            .filter(|sym| !(no_args && sym.is_arg))
            .filter(|sym| sym.scope_name == scope)
            .collect();

        // deterministic frame layout regardless of hash order
        syms.sort_by(|a, b| a.scoped_name.cmp(&b.scoped_name));
        syms
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.syms.values()
    }
}

impl fmt::Display for SymTab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAME_LEN: usize = 32;
        const TYPE_LEN: usize = 24;
        const REFS_LEN: usize = 8;
        const ADDR_LEN: usize = 16;
        const DIMS_LEN: usize = 8;

        writeln!(
            f,
            "{:<NAME_LEN$}{:<TYPE_LEN$}{:<REFS_LEN$}{:<ADDR_LEN$}{:<DIMS_LEN$}",
            "full name", "type", "refs", "addr", "dims"
        )?;
        writeln!(
            f,
            "{}",
            "-".repeat(NAME_LEN + TYPE_LEN + REFS_LEN + ADDR_LEN + DIMS_LEN)
        )?;

        let mut names: Vec<&String> = self.syms.keys().collect();
        names.sort();

        for name in names {
            let sym = &self.syms[name];

            let mut ty = sym.ty.name().to_string();
            if sym.is_external {
                ty += " (ext)";
            }
            if sym.is_recursive {
                ty += " (rec)";
            }
            if sym.is_global {
                ty += " (global)";
            }
            if sym.is_arg {
                ty += &format!(" (arg {})", sym.argidx);
            }
            if sym.is_ret {
                ty += &format!(" (ret {})", sym.retidx);
            }
            if sym.is_tmp {
                ty += " (tmp)";
            }

            let mut addr = String::new();
            if let Some(a) = sym.addr {
                addr = a.to_string();
            }
            if let Some(e) = sym.end_addr {
                addr += &format!(" - {e}");
            }

            write!(
                f,
                "{:<NAME_LEN$}{:<TYPE_LEN$}{:<REFS_LEN$}{:<ADDR_LEN$}",
                name, ty, sym.refcnt, addr
            )?;
            for dim in &sym.dims {
                write!(f, "{:<DIMS_LEN$}", dim)?;
            }
            writeln!(f)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_find() {
        let mut tab = SymTab::new();
        let sym = tab
            .add_symbol("", "x", SymbolType::Int, vec![])
            .expect("insert");
        assert_eq!(sym.scoped_name, "x");

        let found = tab.find("x").expect("lookup");
        assert_eq!(found.ty, SymbolType::Int);
        assert!(found.dims.is_empty());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut tab = SymTab::new();
        assert!(tab.add_symbol("", "x", SymbolType::Int, vec![]).is_some());
        assert!(tab.add_symbol("", "x", SymbolType::Real, vec![]).is_none());
        // original symbol untouched
        assert_eq!(tab.find("x").unwrap().ty, SymbolType::Int);
    }

    #[test]
    fn test_scoped_names() {
        let mut tab = SymTab::new();
        tab.add_symbol("f::", "x", SymbolType::Real, vec![]);
        tab.add_symbol("", "x", SymbolType::Int, vec![]);

        assert_eq!(tab.find("f::x").unwrap().ty, SymbolType::Real);
        assert_eq!(tab.find("x").unwrap().ty, SymbolType::Int);
    }

    #[test]
    fn test_find_in_scope_skips_args() {
        let mut tab = SymTab::new();
        tab.add_symbol("f::", "local", SymbolType::Real, vec![]);
        {
            let arg = tab.add_symbol("f::", "a", SymbolType::Int, vec![]).unwrap();
            arg.is_arg = true;
        }
        tab.add_func("", "f", SymbolType::Real, vec![SymbolType::Int], None, None, false);

        let locals = tab.find_in_scope("f::", true);
        assert_eq!(locals.len(), 1);
        assert_eq!(locals[0].name, "local");

        let all = tab.find_in_scope("f::", false);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_function_signature() {
        let mut tab = SymTab::new();
        tab.add_func(
            "",
            "add",
            SymbolType::Int,
            vec![SymbolType::Int, SymbolType::Int],
            None,
            None,
            false,
        );

        let func = tab.find("add").unwrap();
        assert_eq!(func.ty, SymbolType::Func);
        assert_eq!(func.retty, SymbolType::Int);
        assert_eq!(func.argty.len(), 2);
    }

    #[test]
    fn test_total_size() {
        let mut sym = Symbol::type_const(SymbolType::RealArr);
        sym.dims = vec![2, 3];
        assert_eq!(sym.total_size(), 6);
        assert_eq!(sym.total_size_from(1), 3);

        let scalar = Symbol::type_const(SymbolType::Real);
        assert_eq!(scalar.total_size(), 1);
    }
}
