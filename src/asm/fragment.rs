//! Code fragments: instruction sequences tagged with what they leave on the
//! operand stack.
//!
//! A fragment is created for one tree node and consumed exactly once by its
//! parent. Address-to-value coercion consumes the fragment, so it cannot be
//! applied twice.

use std::fmt;

use super::{load_instr, Code, Instr};
use crate::ast::Type;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    /// Leaves the address of a storage location.
    Address,
    /// Leaves a value.
    Value,
    /// Leaves nothing.
    Void,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Address => write!(f, "address"),
            Shape::Value => write!(f, "value"),
            Shape::Void => write!(f, "void"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FragmentError {
    #[error("expected {expected} fragment, found {found} fragment")]
    Shape { expected: Shape, found: Shape },
    #[error("cannot load a value of type `{0}`")]
    Unloadable(Type),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Fragment {
    Address(Code),
    Value(Code),
    Void(Code),
}

impl Fragment {
    pub fn shape(&self) -> Shape {
        match self {
            Fragment::Address(_) => Shape::Address,
            Fragment::Value(_) => Shape::Value,
            Fragment::Void(_) => Shape::Void,
        }
    }

    pub fn is_address(&self) -> bool {
        matches!(self, Fragment::Address(_))
    }

    /// Value-producing code; an address is followed by the type-directed load.
    pub fn into_value(self, ty: &Type) -> Result<Code, FragmentError> {
        match self {
            Fragment::Value(code) => Ok(code),
            Fragment::Address(mut code) => {
                let load = load_instr(ty).ok_or_else(|| FragmentError::Unloadable(ty.clone()))?;
                code.push(load);
                Ok(code)
            }
            Fragment::Void(_) => Err(FragmentError::Shape {
                expected: Shape::Value,
                found: Shape::Void,
            }),
        }
    }

    pub fn into_address(self) -> Result<Code, FragmentError> {
        match self {
            Fragment::Address(code) => Ok(code),
            other => Err(FragmentError::Shape {
                expected: Shape::Address,
                found: other.shape(),
            }),
        }
    }

    pub fn into_void(self) -> Result<Code, FragmentError> {
        match self {
            Fragment::Void(code) => Ok(code),
            other => Err(FragmentError::Shape {
                expected: Shape::Void,
                found: other.shape(),
            }),
        }
    }

    /// The instructions regardless of shape.
    pub fn into_code(self) -> Code {
        match self {
            Fragment::Address(code) | Fragment::Value(code) | Fragment::Void(code) => code,
        }
    }

    pub fn value(instrs: impl IntoIterator<Item = Instr>) -> Self {
        Fragment::Value(instrs.into_iter().collect())
    }
}
