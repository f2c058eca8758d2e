//! Explicit VR Little Endian encoder.

use crate::encode::{put_tag, Encode};
use crate::error::*;
use byteordered::byteorder::{ByteOrder, LittleEndian};
use pacs_core::{LengthWidth, Tag, VR};
use snafu::ensure;

/// A data element encoder for the Explicit VR Little Endian transfer syntax.
#[derive(Debug, Default, Clone)]
pub struct ExplicitVRLittleEndianEncoder;

impl Encode for ExplicitVRLittleEndianEncoder {
    type Order = LittleEndian;

    fn encode_header(&self, out: &mut Vec<u8>, tag: Tag, vr: VR, len: u32) -> Result<()> {
        encode_explicit_header::<LittleEndian>(out, tag, vr, len)
    }
}

/// Write one explicit VR header in the given byte order.
pub(crate) fn encode_explicit_header<B: ByteOrder>(
    out: &mut Vec<u8>,
    tag: Tag,
    vr: VR,
    len: u32,
) -> Result<()> {
    put_tag::<B>(out, tag);
    out.extend_from_slice(&vr.to_bytes());
    match vr.length_width() {
        LengthWidth::U32 => {
            // 2 reserved bytes, then a 32-bit length
            out.extend_from_slice(&[0x00, 0x00]);
            let mut buf = [0u8; 4];
            B::write_u32(&mut buf, len);
            out.extend_from_slice(&buf);
        }
        LengthWidth::U16 => {
            ensure!(len <= u32::from(u16::MAX), InvalidLengthSnafu { tag, vr, len });
            let mut buf = [0u8; 2];
            B::write_u16(&mut buf, len as u16);
            out.extend_from_slice(&buf);
        }
    }
    Ok(())
}
