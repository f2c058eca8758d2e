//! Explicit VR Big Endian encoder.

use crate::encode::explicit_le::encode_explicit_header;
use crate::encode::Encode;
use crate::error::*;
use byteordered::byteorder::BigEndian;
use pacs_core::{Tag, VR};

/// A data element encoder for the Explicit VR Big Endian transfer syntax.
#[derive(Debug, Default, Clone)]
pub struct ExplicitVRBigEndianEncoder;

impl Encode for ExplicitVRBigEndianEncoder {
    type Order = BigEndian;

    fn encode_header(&self, out: &mut Vec<u8>, tag: Tag, vr: VR, len: u32) -> Result<()> {
        encode_explicit_header::<BigEndian>(out, tag, vr, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::explicit_be::ExplicitVRBigEndianDecoder;
    use crate::decode::Decode;
    use pacs_core::{DataElement, Dataset, PrimitiveValue, Value};

    #[test]
    fn numeric_payload_words_are_swapped() {
        let mut ds = Dataset::new();
        ds.put(DataElement::new(
            Tag(0x0028, 0x0010),
            VR::US,
            Value::Primitive(PrimitiveValue::from_u16(512)),
        ));

        let bytes = ExplicitVRBigEndianEncoder.encode_dataset(&ds).unwrap();
        assert_eq!(
            bytes,
            vec![0x00, 0x28, 0x00, 0x10, b'U', b'S', 0x00, 0x02, 0x02, 0x00]
        );
    }

    #[test]
    fn attribute_references_use_stream_byte_order() {
        let mut ds = Dataset::new();
        ds.put(DataElement::new(
            Tag(0x0000, 0x0901),
            VR::AT,
            Value::Primitive(PrimitiveValue::Tags(smallvec::smallvec![Tag(
                0x0010, 0x0020
            )])),
        ));

        let bytes = ExplicitVRBigEndianEncoder.encode_dataset(&ds).unwrap();
        assert_eq!(
            bytes,
            vec![0x00, 0x00, 0x09, 0x01, b'A', b'T', 0x00, 0x04, 0x00, 0x10, 0x00, 0x20]
        );
    }

    #[test]
    fn round_trip_big_endian() {
        let mut ds = Dataset::new();
        ds.put_str(Tag(0x0008, 0x0060), VR::CS, "MR");
        ds.put(DataElement::new(
            Tag(0x0028, 0x1052),
            VR::FD,
            Value::Primitive(PrimitiveValue::F64(smallvec::smallvec![0.5, -2.0])),
        ));
        ds.put(DataElement::new(
            Tag(0x0028, 0x0103),
            VR::US,
            Value::Primitive(PrimitiveValue::U16(smallvec::smallvec![0, 1])),
        ));

        let bytes = ExplicitVRBigEndianEncoder.encode_dataset(&ds).unwrap();
        let decoded = ExplicitVRBigEndianDecoder.decode_dataset(&bytes).unwrap();
        assert_eq!(decoded, ds);
    }
}
