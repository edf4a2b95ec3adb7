//! Code generation error type.

/// Error raised while lowering the AST to byte code.
///
/// All generator errors are fatal: unknown symbols, redeclarations, arity
/// mismatches at call sites, unresolved addresses at finalize, dimension
/// mismatches and unsupported constructs.
#[derive(Debug)]
pub struct CodegenError(String);

impl CodegenError {
    pub fn new(msg: impl Into<String>) -> Self {
        CodegenError(msg.into())
    }
}

impl std::fmt::Display for CodegenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for CodegenError {}

impl From<String> for CodegenError {
    fn from(msg: String) -> Self {
        CodegenError(msg)
    }
}

impl From<&str> for CodegenError {
    fn from(msg: &str) -> Self {
        CodegenError(msg.to_string())
    }
}
