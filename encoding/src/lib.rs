//! Encoding and decoding of DICOM data sets
//! in the three uncompressed transfer syntaxes:
//! Implicit VR Little Endian, Explicit VR Little Endian,
//! and Explicit VR Big Endian.
//!
//! Each syntax provides a codec type with
//! dataset-level and element-level operations;
//! the [`TransferSyntax`] enum dispatches by UID.

pub mod decode;
pub mod encode;
pub mod error;

pub use error::{Error, Result};

use decode::Decode;
use encode::Encode;
use pacs_core::Dataset;

/// UID of the Implicit VR Little Endian transfer syntax.
pub const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
/// UID of the Explicit VR Little Endian transfer syntax.
pub const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";
/// UID of the Explicit VR Big Endian transfer syntax.
pub const EXPLICIT_VR_BE: &str = "1.2.840.10008.1.2.2";

/// One of the supported transfer syntaxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferSyntax {
    /// Implicit VR Little Endian (default syntax)
    ImplicitVRLittleEndian,
    /// Explicit VR Little Endian
    ExplicitVRLittleEndian,
    /// Explicit VR Big Endian
    ExplicitVRBigEndian,
}

impl TransferSyntax {
    /// Resolve a transfer syntax from its UID.
    pub fn from_uid(uid: &str) -> Option<Self> {
        match uid.trim_end_matches('\0') {
            IMPLICIT_VR_LE => Some(TransferSyntax::ImplicitVRLittleEndian),
            EXPLICIT_VR_LE => Some(TransferSyntax::ExplicitVRLittleEndian),
            EXPLICIT_VR_BE => Some(TransferSyntax::ExplicitVRBigEndian),
            _ => None,
        }
    }

    /// The UID identifying this transfer syntax.
    pub fn uid(self) -> &'static str {
        match self {
            TransferSyntax::ImplicitVRLittleEndian => IMPLICIT_VR_LE,
            TransferSyntax::ExplicitVRLittleEndian => EXPLICIT_VR_LE,
            TransferSyntax::ExplicitVRBigEndian => EXPLICIT_VR_BE,
        }
    }

    /// Decode a full data set in this transfer syntax.
    pub fn decode_dataset(self, bytes: &[u8]) -> Result<Dataset> {
        match self {
            TransferSyntax::ImplicitVRLittleEndian => {
                decode::implicit_le::ImplicitVRLittleEndianDecoder.decode_dataset(bytes)
            }
            TransferSyntax::ExplicitVRLittleEndian => {
                decode::explicit_le::ExplicitVRLittleEndianDecoder.decode_dataset(bytes)
            }
            TransferSyntax::ExplicitVRBigEndian => {
                decode::explicit_be::ExplicitVRBigEndianDecoder.decode_dataset(bytes)
            }
        }
    }

    /// Encode a full data set in this transfer syntax.
    pub fn encode_dataset(self, dataset: &Dataset) -> Result<Vec<u8>> {
        match self {
            TransferSyntax::ImplicitVRLittleEndian => {
                encode::implicit_le::ImplicitVRLittleEndianEncoder.encode_dataset(dataset)
            }
            TransferSyntax::ExplicitVRLittleEndian => {
                encode::explicit_le::ExplicitVRLittleEndianEncoder.encode_dataset(dataset)
            }
            TransferSyntax::ExplicitVRBigEndian => {
                encode::explicit_be::ExplicitVRBigEndianEncoder.encode_dataset(dataset)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_syntax_uid_round_trip() {
        for ts in [
            TransferSyntax::ImplicitVRLittleEndian,
            TransferSyntax::ExplicitVRLittleEndian,
            TransferSyntax::ExplicitVRBigEndian,
        ] {
            assert_eq!(TransferSyntax::from_uid(ts.uid()), Some(ts));
        }
        assert_eq!(TransferSyntax::from_uid("1.2.840.10008.1.2.4.50"), None);
        // trailing padding NUL is tolerated
        assert_eq!(
            TransferSyntax::from_uid("1.2.840.10008.1.2\0"),
            Some(TransferSyntax::ImplicitVRLittleEndian)
        );
    }
}
