//! Implicit VR Little Endian encoder.

use crate::encode::{put_tag, Encode};
use crate::error::*;
use byteordered::byteorder::{ByteOrder, LittleEndian};
use pacs_core::{Tag, VR};

/// A data element encoder for the Implicit VR Little Endian transfer syntax.
#[derive(Debug, Default, Clone)]
pub struct ImplicitVRLittleEndianEncoder;

impl Encode for ImplicitVRLittleEndianEncoder {
    type Order = LittleEndian;

    fn encode_header(&self, out: &mut Vec<u8>, tag: Tag, _vr: VR, len: u32) -> Result<()> {
        put_tag::<LittleEndian>(out, tag);
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, len);
        out.extend_from_slice(&buf);
        Ok(())
    }
}
