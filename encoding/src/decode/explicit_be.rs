//! Explicit VR Big Endian decoder.
//!
//! The header layout is identical to Explicit VR Little Endian;
//! tags, lengths and numeric payload words are big-endian.
//! The (group, element) component order is unchanged.

use crate::decode::explicit_le::decode_explicit_header;
use crate::decode::Decode;
use crate::error::*;
use byteordered::byteorder::BigEndian;
use pacs_core::DataElementHeader;
use std::io::Cursor;

/// A data element decoder for the Explicit VR Big Endian transfer syntax.
#[derive(Debug, Default, Clone)]
pub struct ExplicitVRBigEndianDecoder;

impl Decode for ExplicitVRBigEndianDecoder {
    type Order = BigEndian;

    fn decode_header(&self, source: &mut Cursor<&[u8]>) -> Result<DataElementHeader> {
        decode_explicit_header::<BigEndian>(source)
    }
}
