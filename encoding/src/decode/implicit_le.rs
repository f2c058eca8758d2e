//! Implicit VR Little Endian decoder.
//!
//! Headers carry no VR on the wire;
//! it is resolved from the static dictionary (unknown tags become UN).

use crate::decode::Decode;
use crate::error::*;
use byteordered::byteorder::{ByteOrder, LittleEndian};
use pacs_core::{dictionary, DataElementHeader, Length, Tag, VR};
use snafu::ResultExt;
use std::io::{Cursor, Read};

/// A data element decoder for the Implicit VR Little Endian transfer syntax.
#[derive(Debug, Default, Clone)]
pub struct ImplicitVRLittleEndianDecoder;

impl Decode for ImplicitVRLittleEndianDecoder {
    type Order = LittleEndian;

    fn decode_header(&self, source: &mut Cursor<&[u8]>) -> Result<DataElementHeader> {
        let mut buf = [0u8; 8];
        source
            .read_exact(&mut buf)
            .context(TruncatedInputSnafu { field: "header" })?;
        let tag = Tag(
            LittleEndian::read_u16(&buf[0..2]),
            LittleEndian::read_u16(&buf[2..4]),
        );
        let len = Length(LittleEndian::read_u32(&buf[4..8]));

        let vr = if tag.group() == 0xFFFE {
            VR::UN
        } else {
            dictionary::vr_of(tag)
        };
        Ok(DataElementHeader::new(tag, vr, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::Decode;
    use pacs_core::dictionary::tags;
    use pacs_core::{PrimitiveValue, Value};

    // manually crafted data elements
    //  Tag: (0008,0060) Modality
    //  Length: 2, Value: "CT"
    // --
    //  Tag: (0010,0020) Patient ID
    //  Length: 6, Value: "PAT01 " (padded)
    const RAW: &[u8; 24] = &[
        0x08, 0x00, 0x60, 0x00, 0x02, 0x00, 0x00, 0x00, b'C', b'T', 0x10, 0x00, 0x20, 0x00, 0x06,
        0x00, 0x00, 0x00, b'P', b'A', b'T', b'0', b'1', 0x20,
    ];

    #[test]
    fn decode_elements_resolving_vr() {
        let dec = ImplicitVRLittleEndianDecoder;
        let mut cursor = Cursor::new(RAW.as_ref());

        let elem = dec.decode_element(&mut cursor).unwrap();
        assert_eq!(elem.tag(), tags::MODALITY);
        assert_eq!(elem.vr(), VR::CS);
        assert_eq!(elem.value(), &Value::Primitive(PrimitiveValue::Str("CT".into())));

        let elem = dec.decode_element(&mut cursor).unwrap();
        assert_eq!(elem.tag(), tags::PATIENT_ID);
        assert_eq!(elem.vr(), VR::LO);
        // trailing pad is not part of the value
        assert_eq!(elem.string(), Some("PAT01"));
        assert_eq!(cursor.position(), RAW.len() as u64);
    }

    #[test]
    fn unknown_tag_resolves_to_un() {
        let raw: &[u8] = &[
            0x21, 0x43, 0x65, 0x87, 0x02, 0x00, 0x00, 0x00, 0xAB, 0xCD,
        ];
        let dec = ImplicitVRLittleEndianDecoder;
        let mut cursor = Cursor::new(raw);
        let elem = dec.decode_element(&mut cursor).unwrap();
        assert_eq!(elem.tag(), Tag(0x4321, 0x8765));
        assert_eq!(elem.vr(), VR::UN);
        assert_eq!(
            elem.value(),
            &Value::Primitive(PrimitiveValue::Bytes(vec![0xAB, 0xCD]))
        );
    }

    #[test]
    fn duplicate_tag_is_an_error() {
        let raw: &[u8] = &[
            0x08, 0x00, 0x60, 0x00, 0x02, 0x00, 0x00, 0x00, b'C', b'T', 0x08, 0x00, 0x60, 0x00,
            0x02, 0x00, 0x00, 0x00, b'M', b'R',
        ];
        let dec = ImplicitVRLittleEndianDecoder;
        let err = dec.decode_dataset(raw).unwrap_err();
        assert!(matches!(err, Error::DuplicateTag { .. }), "{:?}", err);
    }

    #[test]
    fn truncated_element_is_an_error() {
        let raw: &[u8] = &[0x08, 0x00, 0x60, 0x00, 0x20, 0x00, 0x00, 0x00, b'C', b'T'];
        let dec = ImplicitVRLittleEndianDecoder;
        let err = dec.decode_dataset(raw).unwrap_err();
        assert!(matches!(err, Error::TruncatedElement { .. }), "{:?}", err);
    }
}
