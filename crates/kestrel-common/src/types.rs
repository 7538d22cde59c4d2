//! Attribute types, schema elements and typed values for KestrelDB.
//!
//! Values cross the storage boundary in the wire encoding: Int and Real are
//! 4 raw little-endian bytes, VarChar is a 4-byte little-endian length
//! followed by that many bytes.

use crate::error::{KestrelError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Width of the length prefix that precedes every VarChar value.
pub const VARCHAR_PREFIX_SIZE: usize = 4;

/// Identifier for the supported attribute types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AttrType {
    Int = 0,
    Real = 1,
    VarChar = 2,
}

impl AttrType {
    /// Returns the fixed byte size for this type, or None for VarChar.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            AttrType::Int | AttrType::Real => Some(4),
            AttrType::VarChar => None,
        }
    }

    /// Decodes a stored type byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(AttrType::Int),
            1 => Some(AttrType::Real),
            2 => Some(AttrType::VarChar),
            _ => None,
        }
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttrType::Int => "INT",
            AttrType::Real => "REAL",
            AttrType::VarChar => "VARCHAR",
        };
        write!(f, "{}", name)
    }
}

/// A schema element.
///
/// `length` is the declared maximum for VarChar and is informational for
/// the fixed-size types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub attr_type: AttrType,
    pub length: u32,
}

impl Attribute {
    /// Creates a new attribute.
    pub fn new(name: impl Into<String>, attr_type: AttrType, length: u32) -> Self {
        Self {
            name: name.into(),
            attr_type,
            length,
        }
    }

    /// Creates a 4-byte integer attribute.
    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, AttrType::Int, 4)
    }

    /// Creates a 4-byte float attribute.
    pub fn real(name: impl Into<String>) -> Self {
        Self::new(name, AttrType::Real, 4)
    }

    /// Creates a VarChar attribute with the given maximum length.
    pub fn varchar(name: impl Into<String>, max_len: u32) -> Self {
        Self::new(name, AttrType::VarChar, max_len)
    }
}

/// Comparison operator used by scan predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Ne,
    /// Unconditional; every record passes.
    NoOp,
}

impl CompOp {
    /// Evaluates `field op literal`.
    ///
    /// A NULL on either side fails every operator except `NoOp`, as does a
    /// comparison across different attribute types.
    pub fn evaluate(&self, field: Option<&Value>, literal: Option<&Value>) -> bool {
        if *self == CompOp::NoOp {
            return true;
        }
        let (Some(lhs), Some(rhs)) = (field, literal) else {
            return false;
        };
        match lhs.compare(rhs) {
            Some(ord) => self.accepts(ord),
            None => false,
        }
    }

    /// Returns true if an ordering of `lhs` relative to `rhs` satisfies the operator.
    pub fn accepts(&self, ord: Ordering) -> bool {
        match self {
            CompOp::Eq => ord == Ordering::Equal,
            CompOp::Lt => ord == Ordering::Less,
            CompOp::Le => ord != Ordering::Greater,
            CompOp::Gt => ord == Ordering::Greater,
            CompOp::Ge => ord != Ordering::Less,
            CompOp::Ne => ord != Ordering::Equal,
            CompOp::NoOp => true,
        }
    }
}

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i32),
    Real(f32),
    VarChar(Vec<u8>),
}

impl Value {
    /// Creates a VarChar value from a string.
    pub fn varchar(s: impl AsRef<str>) -> Self {
        Value::VarChar(s.as_ref().as_bytes().to_vec())
    }

    /// Returns the attribute type of this value.
    pub fn attr_type(&self) -> AttrType {
        match self {
            Value::Int(_) => AttrType::Int,
            Value::Real(_) => AttrType::Real,
            Value::VarChar(_) => AttrType::VarChar,
        }
    }

    /// Size of this value in the wire encoding.
    pub fn wire_size(&self) -> usize {
        match self {
            Value::Int(_) | Value::Real(_) => 4,
            Value::VarChar(bytes) => VARCHAR_PREFIX_SIZE + bytes.len(),
        }
    }

    /// Appends the wire encoding of this value to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Value::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Real(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::VarChar(bytes) => {
                out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                out.extend_from_slice(bytes);
            }
        }
    }

    /// Returns the wire encoding of this value.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_size());
        self.encode_into(&mut out);
        out
    }

    /// Decodes one wire-encoded value of `attr_type` from the front of `buf`.
    ///
    /// Returns the value and the number of bytes consumed.
    pub fn decode(attr_type: AttrType, buf: &[u8]) -> Result<(Self, usize)> {
        let fixed = |buf: &[u8]| -> Result<[u8; 4]> {
            buf.get(..4)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| truncated(attr_type, buf.len()))
        };
        match attr_type {
            AttrType::Int => Ok((Value::Int(i32::from_le_bytes(fixed(buf)?)), 4)),
            AttrType::Real => Ok((Value::Real(f32::from_le_bytes(fixed(buf)?)), 4)),
            AttrType::VarChar => {
                let len = u32::from_le_bytes(fixed(buf)?) as usize;
                let end = VARCHAR_PREFIX_SIZE + len;
                let bytes = buf
                    .get(VARCHAR_PREFIX_SIZE..end)
                    .ok_or_else(|| truncated(attr_type, buf.len()))?;
                Ok((Value::VarChar(bytes.to_vec()), end))
            }
        }
    }

    /// Orders two values of the same type.
    ///
    /// Int compares as `i32`, Real by `f32::total_cmp`, VarChar bytewise.
    /// Returns None when the types differ.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Real(a), Value::Real(b)) => Some(a.total_cmp(b)),
            (Value::VarChar(a), Value::VarChar(b)) => Some(a.as_slice().cmp(b.as_slice())),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Real(v) => write!(f, "{}", v),
            Value::VarChar(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
        }
    }
}

fn truncated(attr_type: AttrType, available: usize) -> KestrelError {
    KestrelError::SchemaMismatch(format!(
        "truncated {} value ({} bytes available)",
        attr_type, available
    ))
}
