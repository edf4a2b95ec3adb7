//! Runtime values.
//!
//! A `Value` is the typed form of one stack or memory cell. On the wire it
//! is a tag byte plus payload (see `muf_core::tag`); in the interpreter it
//! is this enum. Addresses keep their payload only; the base-register tag
//! travels alongside where it matters.

use muf_core::value::{ADDR_SIZE, BOOL_SIZE, CPLX_SIZE, INT_SIZE, REAL_SIZE};
use muf_core::{Addr, Complex, Int, Real, VmType};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Real(Real),
    Int(Int),
    Bool(bool),
    Cplx(Complex),
    Addr(Addr),
    Str(String),
    RealArr(Vec<Real>),
    IntArr(Vec<Int>),
    CplxArr(Vec<Complex>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Real(_) => "real",
            Value::Int(_) => "integer",
            Value::Bool(_) => "bool",
            Value::Cplx(_) => "complex",
            Value::Addr(_) => "address",
            Value::Str(_) => "string",
            Value::RealArr(_) => "real_array",
            Value::IntArr(_) => "integer_array",
            Value::CplxArr(_) => "complex_array",
        }
    }

    /// Default tag for this value; addresses default to absolute.
    pub fn tag(&self) -> VmType {
        match self {
            Value::Real(_) => VmType::Real,
            Value::Int(_) => VmType::Int,
            Value::Bool(_) => VmType::Bool,
            Value::Cplx(_) => VmType::Cplx,
            Value::Addr(_) => VmType::AddrMem,
            Value::Str(_) => VmType::Str,
            Value::RealArr(_) => VmType::RealArr,
            Value::IntArr(_) => VmType::IntArr,
            Value::CplxArr(_) => VmType::CplxArr,
        }
    }

    /// Payload size in bytes, excluding the tag byte. This is how far the
    /// instruction pointer advances past a `PUSH` immediate.
    pub fn data_size(&self) -> Addr {
        match self {
            Value::Real(_) => REAL_SIZE,
            Value::Int(_) => INT_SIZE,
            Value::Bool(_) => BOOL_SIZE,
            Value::Cplx(_) => CPLX_SIZE,
            Value::Addr(_) => ADDR_SIZE,
            Value::Str(val) => ADDR_SIZE + val.len() as Addr,
            Value::RealArr(val) => ADDR_SIZE + val.len() as Addr * REAL_SIZE,
            Value::IntArr(val) => ADDR_SIZE + val.len() as Addr * INT_SIZE,
            Value::CplxArr(val) => ADDR_SIZE + val.len() as Addr * CPLX_SIZE,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Real(val) => write!(f, "{val}"),
            Value::Int(val) => write!(f, "{val}"),
            Value::Bool(val) => write!(f, "{val}"),
            Value::Cplx(val) => write!(f, "{val}"),
            Value::Addr(val) => write!(f, "{val}"),
            Value::Str(val) => write!(f, "{val}"),
            Value::RealArr(val) => write_arr(f, val),
            Value::IntArr(val) => write_arr(f, val),
            Value::CplxArr(val) => write_arr(f, val),
        }
    }
}

fn write_arr<T: std::fmt::Display>(
    f: &mut std::fmt::Formatter<'_>,
    elems: &[T],
) -> std::fmt::Result {
    write!(f, "[ ")?;
    for (i, elem) in elems.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{elem}")?;
    }
    write!(f, " ]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_sizes() {
        assert_eq!(Value::Real(1.0).data_size(), 8);
        assert_eq!(Value::Bool(true).data_size(), 1);
        assert_eq!(Value::Cplx(Complex::new(0.0, 0.0)).data_size(), 16);
        assert_eq!(Value::Str("abc".into()).data_size(), 4 + 3);
        assert_eq!(Value::RealArr(vec![0.0; 4]).data_size(), 4 + 32);
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Int(-3).to_string(), "-3");
        assert_eq!(Value::RealArr(vec![1.0, 2.5]).to_string(), "[ 1, 2.5 ]");
        assert_eq!(Value::Cplx(Complex::new(1.0, -2.0)).to_string(), "(1, -2)");
    }
}
