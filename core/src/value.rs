//! Representation of DICOM element values in memory.

use crate::dataset::Dataset;
use crate::header::Tag;
use smallvec::SmallVec;
use std::fmt;

/// A primitive (non-sequence) DICOM value.
///
/// String values hold the logical value without trailing pad bytes.
/// Numeric values hold one or more scalars of the exact VR width.
/// `Tags` holds attribute references (VR AT).
#[derive(Debug, PartialEq, Clone)]
pub enum PrimitiveValue {
    /// No value (zero-length element).
    Empty,
    /// A character string value.
    Str(String),
    /// Unsigned 16-bit integers (US).
    U16(SmallVec<[u16; 2]>),
    /// Signed 16-bit integers (SS).
    I16(SmallVec<[i16; 2]>),
    /// Unsigned 32-bit integers (UL).
    U32(SmallVec<[u32; 2]>),
    /// Signed 32-bit integers (SL).
    I32(SmallVec<[i32; 2]>),
    /// Unsigned 64-bit integers (UV).
    U64(SmallVec<[u64; 2]>),
    /// Signed 64-bit integers (SV).
    I64(SmallVec<[i64; 2]>),
    /// Single-precision floats (FL).
    F32(SmallVec<[f32; 2]>),
    /// Double-precision floats (FD).
    F64(SmallVec<[f64; 2]>),
    /// Attribute tag references (AT).
    Tags(SmallVec<[Tag; 2]>),
    /// Opaque binary data (OB, OW, UN, ...).
    Bytes(Vec<u8>),
}

impl PrimitiveValue {
    /// Shorthand for a single unsigned 16-bit value.
    pub fn from_u16(value: u16) -> Self {
        PrimitiveValue::U16(smallvec::smallvec![value])
    }

    /// Shorthand for a single unsigned 32-bit value.
    pub fn from_u32(value: u32) -> Self {
        PrimitiveValue::U32(smallvec::smallvec![value])
    }

    /// Retrieve this value as a string slice, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PrimitiveValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Retrieve the first 16-bit unsigned integer, if present.
    pub fn first_u16(&self) -> Option<u16> {
        match self {
            PrimitiveValue::U16(v) => v.first().copied(),
            _ => None,
        }
    }

    /// Retrieve the first 32-bit unsigned integer, if present.
    pub fn first_u32(&self) -> Option<u32> {
        match self {
            PrimitiveValue::U32(v) => v.first().copied(),
            _ => None,
        }
    }

    /// Whether the value holds nothing.
    pub fn is_empty(&self) -> bool {
        match self {
            PrimitiveValue::Empty => true,
            PrimitiveValue::Str(s) => s.is_empty(),
            PrimitiveValue::U16(v) => v.is_empty(),
            PrimitiveValue::I16(v) => v.is_empty(),
            PrimitiveValue::U32(v) => v.is_empty(),
            PrimitiveValue::I32(v) => v.is_empty(),
            PrimitiveValue::U64(v) => v.is_empty(),
            PrimitiveValue::I64(v) => v.is_empty(),
            PrimitiveValue::F32(v) => v.is_empty(),
            PrimitiveValue::F64(v) => v.is_empty(),
            PrimitiveValue::Tags(v) => v.is_empty(),
            PrimitiveValue::Bytes(v) => v.is_empty(),
        }
    }
}

impl From<&str> for PrimitiveValue {
    fn from(value: &str) -> Self {
        PrimitiveValue::Str(value.to_owned())
    }
}

impl From<String> for PrimitiveValue {
    fn from(value: String) -> Self {
        PrimitiveValue::Str(value)
    }
}

impl fmt::Display for PrimitiveValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PrimitiveValue::Empty => Ok(()),
            PrimitiveValue::Str(s) => f.write_str(s),
            PrimitiveValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            other => write!(f, "{:?}", other),
        }
    }
}

/// A DICOM element value: either a primitive value
/// or a sequence of nested data sets (VR SQ).
#[derive(Debug, PartialEq, Clone)]
pub enum Value {
    /// A primitive value.
    Primitive(PrimitiveValue),
    /// An ordered sequence of items.
    Sequence(Vec<Dataset>),
}

impl Value {
    /// Retrieve the primitive value, if this is not a sequence.
    pub fn primitive(&self) -> Option<&PrimitiveValue> {
        match self {
            Value::Primitive(v) => Some(v),
            Value::Sequence(_) => None,
        }
    }

    /// Retrieve the sequence items, if this is a sequence.
    pub fn items(&self) -> Option<&[Dataset]> {
        match self {
            Value::Sequence(items) => Some(items),
            Value::Primitive(_) => None,
        }
    }

    /// Retrieve this value as a string slice, if it holds one.
    pub fn as_str(&self) -> Option<&str> {
        self.primitive().and_then(PrimitiveValue::as_str)
    }
}

impl From<PrimitiveValue> for Value {
    fn from(value: PrimitiveValue) -> Self {
        Value::Primitive(value)
    }
}

impl From<Vec<Dataset>> for Value {
    fn from(items: Vec<Dataset>) -> Self {
        Value::Sequence(items)
    }
}
