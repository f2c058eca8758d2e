//! Explicit VR Little Endian decoder.

use crate::decode::Decode;
use crate::error::*;
use byteordered::byteorder::{ByteOrder, LittleEndian};
use pacs_core::{DataElementHeader, Length, LengthWidth, Tag, VR};
use snafu::ResultExt;
use std::io::{Cursor, Read};

/// A data element decoder for the Explicit VR Little Endian transfer syntax.
#[derive(Debug, Default, Clone)]
pub struct ExplicitVRLittleEndianDecoder;

impl Decode for ExplicitVRLittleEndianDecoder {
    type Order = LittleEndian;

    fn decode_header(&self, source: &mut Cursor<&[u8]>) -> Result<DataElementHeader> {
        decode_explicit_header::<LittleEndian>(source)
    }
}

/// Read one explicit VR header in the given byte order.
///
/// Group `FFFE` headers (items, delimiters) carry no VR;
/// an unrecognized VR code falls back to UN.
pub(crate) fn decode_explicit_header<B: ByteOrder>(
    source: &mut Cursor<&[u8]>,
) -> Result<DataElementHeader> {
    let mut buf = [0u8; 4];
    source
        .read_exact(&mut buf)
        .context(TruncatedInputSnafu { field: "tag" })?;
    let tag = Tag(B::read_u16(&buf[0..2]), B::read_u16(&buf[2..4]));

    if tag.group() == 0xFFFE {
        // item and delimitation headers have no VR or reserved field
        source
            .read_exact(&mut buf)
            .context(TruncatedInputSnafu { field: "item length" })?;
        return Ok(DataElementHeader::new(tag, VR::UN, Length(B::read_u32(&buf))));
    }

    source
        .read_exact(&mut buf[0..2])
        .context(TruncatedInputSnafu { field: "VR" })?;
    let vr = VR::from_binary([buf[0], buf[1]]).unwrap_or(VR::UN);

    let len = match vr.length_width() {
        LengthWidth::U32 => {
            // 2 reserved bytes, then a 32-bit length
            source
                .read_exact(&mut buf[0..2])
                .context(TruncatedInputSnafu { field: "reserved" })?;
            source
                .read_exact(&mut buf)
                .context(TruncatedInputSnafu { field: "length" })?;
            B::read_u32(&buf)
        }
        LengthWidth::U16 => {
            source
                .read_exact(&mut buf[0..2])
                .context(TruncatedInputSnafu { field: "length" })?;
            u32::from(B::read_u16(&buf[0..2]))
        }
    };

    Ok(DataElementHeader::new(tag, vr, Length(len)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::Decode;
    use pacs_core::dictionary::tags;
    use pacs_core::{PrimitiveValue, Value};

    // manually crafted data elements
    //  Tag: (0008,0018) SOP Instance UID, VR UI, length 8, "1.2.3.4" + NUL pad
    //  Tag: (0028,0010) Rows, VR US, length 2, 512
    const RAW: &[u8; 26] = &[
        0x08, 0x00, 0x18, 0x00, b'U', b'I', 0x08, 0x00, b'1', b'.', b'2', b'.', b'3', b'.', b'4',
        0x00, 0x28, 0x00, 0x10, 0x00, b'U', b'S', 0x02, 0x00, 0x00, 0x02,
    ];

    #[test]
    fn decode_standard_elements() {
        let dec = ExplicitVRLittleEndianDecoder;
        let mut cursor = Cursor::new(RAW.as_ref());

        let elem = dec.decode_element(&mut cursor).unwrap();
        assert_eq!(elem.tag(), tags::SOP_INSTANCE_UID);
        assert_eq!(elem.vr(), VR::UI);
        assert_eq!(elem.string(), Some("1.2.3.4"));

        let elem = dec.decode_element(&mut cursor).unwrap();
        assert_eq!(elem.tag(), Tag(0x0028, 0x0010));
        assert_eq!(elem.vr(), VR::US);
        assert_eq!(
            elem.value(),
            &Value::Primitive(PrimitiveValue::U16(smallvec::smallvec![512]))
        );
        assert_eq!(cursor.position(), RAW.len() as u64);
    }

    // sequence with undefined length, one undefined-length item,
    // ending in item and sequence delimitation
    const RAW_SEQ: &[u8] = &[
        // (0008,1110) ReferencedStudySequence, VR SQ, reserved, undefined length
        0x08, 0x00, 0x10, 0x11, b'S', b'Q', 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF,
        // item, undefined length
        0xFE, 0xFF, 0x00, 0xE0, 0xFF, 0xFF, 0xFF, 0xFF,
        // (0008,1150) ReferencedSOPClassUID, VR UI, len 2, "1\0"... use "12"
        0x08, 0x00, 0x50, 0x11, b'U', b'I', 0x02, 0x00, b'1', b'2',
        // item delimitation
        0xFE, 0xFF, 0x0D, 0xE0, 0x00, 0x00, 0x00, 0x00,
        // sequence delimitation
        0xFE, 0xFF, 0xDD, 0xE0, 0x00, 0x00, 0x00, 0x00,
    ];

    #[test]
    fn decode_undefined_length_sequence() {
        let dec = ExplicitVRLittleEndianDecoder;
        let ds = dec.decode_dataset(RAW_SEQ).unwrap();
        let elem = ds.get(Tag(0x0008, 0x1110)).unwrap();
        assert_eq!(elem.vr(), VR::SQ);
        let items = elem.value().items().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].get_str(Tag(0x0008, 0x1150)), Some("12"));
    }

    #[test]
    fn embedded_nul_is_invalid_string() {
        // (0008,0060) Modality CS, len 4, "C\0T " has an interior NUL
        let raw: &[u8] = &[
            0x08, 0x00, 0x60, 0x00, b'C', b'S', 0x04, 0x00, b'C', 0x00, b'T', 0x20,
        ];
        let dec = ExplicitVRLittleEndianDecoder;
        let err = dec.decode_dataset(raw).unwrap_err();
        assert!(matches!(err, Error::InvalidString { .. }), "{:?}", err);
    }

    #[test]
    fn undefined_length_refused_outside_sq_and_pixel_data() {
        // (0008,0018) with VR UN and undefined length
        let raw: &[u8] = &[
            0x08, 0x00, 0x18, 0x00, b'U', b'N', 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF,
        ];
        let dec = ExplicitVRLittleEndianDecoder;
        let err = dec.decode_dataset(raw).unwrap_err();
        assert!(
            matches!(err, Error::UndefinedLengthNotAllowed { .. }),
            "{:?}",
            err
        );
    }
}
