//! Error types shared by the data set codecs.

use pacs_core::{Tag, VR};
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// The input ended before the declared content.
    #[snafu(display("truncated element {}: declared {} bytes, {} remaining", tag, declared, remaining))]
    TruncatedElement {
        tag: Tag,
        declared: u32,
        remaining: usize,
    },

    /// The input ended in the middle of an element header.
    #[snafu(display("truncated input while reading {}", field))]
    TruncatedInput {
        field: &'static str,
        source: std::io::Error,
    },

    /// A tag occurred more than once in the same data set.
    #[snafu(display("duplicate tag {}", tag))]
    DuplicateTag { tag: Tag },

    /// A declared value length is invalid for the VR.
    #[snafu(display("invalid length {} for {} element {}", len, vr, tag))]
    InvalidLength { tag: Tag, vr: VR, len: u32 },

    /// A string value contains a NUL byte other than trailing padding.
    #[snafu(display("invalid string value in element {}", tag))]
    InvalidString { tag: Tag },

    /// Undefined length on an element where it is not legal.
    #[snafu(display("undefined length not allowed for {} element {}", vr, tag))]
    UndefinedLengthNotAllowed { tag: Tag, vr: VR },

    /// An item or delimiter tag was expected.
    #[snafu(display("unexpected tag {} inside sequence", tag))]
    UnexpectedSequenceTag { tag: Tag },

    /// Sequence nesting exceeded the depth bound.
    #[snafu(display("sequence nesting deeper than {} levels", limit))]
    DepthExceeded { limit: u32 },

    /// Item or delimitation with a bad length field.
    #[snafu(display("delimitation item {} carries a non-zero length", tag))]
    BadDelimitationLength { tag: Tag },

    /// Failure writing encoded output.
    #[snafu(display("could not write {}", field))]
    WriteFailure {
        field: &'static str,
        source: std::io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
