//! Core data model for DICOM compliant systems.
//!
//! This crate comprises the basic building blocks
//! shared by every other layer of the server:
//! the attribute [tag](Tag), the [value representation](VR) catalog,
//! element [lengths](Length), [primitive values](PrimitiveValue),
//! and the ordered [data set](Dataset).
//! A static [dictionary] resolves the VR of standard attributes
//! when decoding implicit VR streams.

pub mod dataset;
pub mod dictionary;
pub mod header;
pub mod value;

pub use dataset::{DataElement, Dataset};
pub use header::{DataElementHeader, Length, LengthWidth, Tag, VR};
pub use value::{PrimitiveValue, Value};
