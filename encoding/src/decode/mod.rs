//! Data element decoding.
//!
//! Each transfer syntax provides a header decoder;
//! the value decoding, sequence traversal and data set assembly
//! are shared here, generic over the stream byte order.

pub mod explicit_be;
pub mod explicit_le;
pub mod implicit_le;

use crate::error::*;
use byteordered::byteorder::ByteOrder;
use pacs_core::dictionary::tags::PIXEL_DATA;
use pacs_core::header::SequenceItemHeader;
use pacs_core::{DataElement, DataElementHeader, Dataset, Length, PrimitiveValue, Tag, Value, VR};
use smallvec::SmallVec;
use snafu::{ensure, ResultExt};
use std::io::{Cursor, Read};

/// Bound on sequence nesting, to keep pathological inputs
/// from exhausting the stack.
pub const MAX_SEQUENCE_DEPTH: u32 = 16;

/// A decoder of data element headers for one transfer syntax.
pub trait Decode {
    /// The byte order of multi-byte values in the stream.
    type Order: ByteOrder;

    /// Decode one data element header, advancing the cursor past it.
    ///
    /// Headers of group `FFFE` (items and delimiters) carry no VR;
    /// they are returned with VR `UN`.
    fn decode_header(&self, source: &mut Cursor<&[u8]>) -> Result<DataElementHeader>;

    /// Decode one sequence item header (tag and length, no VR).
    fn decode_item_header(&self, source: &mut Cursor<&[u8]>) -> Result<SequenceItemHeader> {
        let mut buf = [0u8; 8];
        source
            .read_exact(&mut buf)
            .context(TruncatedInputSnafu { field: "item" })?;
        let tag = Tag(
            Self::Order::read_u16(&buf[0..2]),
            Self::Order::read_u16(&buf[2..4]),
        );
        let len = Length(Self::Order::read_u32(&buf[4..8]));
        match SequenceItemHeader::new(tag, len) {
            Ok(item @ SequenceItemHeader::ItemDelimiter)
            | Ok(item @ SequenceItemHeader::SequenceDelimiter) => {
                ensure!(len == Length(0), BadDelimitationLengthSnafu { tag });
                Ok(item)
            }
            Ok(item) => Ok(item),
            Err(_) => UnexpectedSequenceTagSnafu { tag }.fail(),
        }
    }

    /// Decode a whole data set from the given bytes.
    ///
    /// Fails on a repeated tag, a truncated element,
    /// or any malformed value.
    fn decode_dataset(&self, bytes: &[u8]) -> Result<Dataset>
    where
        Self: Sized,
    {
        let mut cursor = Cursor::new(bytes);
        decode_dataset_at(self, &mut cursor, None, 0)
    }

    /// Decode a single data element, advancing the cursor.
    fn decode_element(&self, cursor: &mut Cursor<&[u8]>) -> Result<DataElement>
    where
        Self: Sized,
    {
        let header = self.decode_header(cursor)?;
        decode_element_body(self, cursor, header, 0)
    }
}

/// Decode elements into a data set until `end` (or end of input).
fn decode_dataset_at<D: Decode>(
    decoder: &D,
    cursor: &mut Cursor<&[u8]>,
    end: Option<u64>,
    depth: u32,
) -> Result<Dataset> {
    let limit = end.unwrap_or(cursor.get_ref().len() as u64);
    let mut dataset = Dataset::new();
    while cursor.position() < limit {
        let header = decoder.decode_header(cursor)?;
        let element = decode_element_body(decoder, cursor, header, depth)?;
        let tag = element.tag();
        ensure!(dataset.put(element).is_none(), DuplicateTagSnafu { tag });
    }
    Ok(dataset)
}

/// Decode the value of an element whose header was already read.
fn decode_element_body<D: Decode>(
    decoder: &D,
    cursor: &mut Cursor<&[u8]>,
    header: DataElementHeader,
    depth: u32,
) -> Result<DataElement> {
    let DataElementHeader { tag, vr, len } = header;

    if vr == VR::SQ {
        let items = decode_sequence_items(decoder, cursor, len, depth)?;
        return Ok(DataElement::new(tag, vr, Value::Sequence(items)));
    }

    if len.is_undefined() {
        // only pixel data may be fragmented with undefined length
        ensure!(
            tag == PIXEL_DATA && (vr == VR::OB || vr == VR::OW),
            UndefinedLengthNotAllowedSnafu { tag, vr }
        );
        let data = decode_pixel_fragments(decoder, cursor)?;
        return Ok(DataElement::new(
            tag,
            vr,
            Value::Primitive(PrimitiveValue::Bytes(data)),
        ));
    }

    let len = len.0;
    let remaining = cursor.get_ref().len() as u64 - cursor.position();
    ensure!(
        u64::from(len) <= remaining,
        TruncatedElementSnafu {
            tag,
            declared: len,
            remaining: remaining as usize
        }
    );
    ensure!(len % 2 == 0, InvalidLengthSnafu { tag, vr, len });

    let start = cursor.position() as usize;
    let data = &cursor.get_ref()[start..start + len as usize];
    cursor.set_position(start as u64 + u64::from(len));

    let value = decode_primitive::<D::Order>(tag, vr, data)?;
    Ok(DataElement::new(tag, vr, Value::Primitive(value)))
}

/// Decode the items of a sequence with the given declared length.
fn decode_sequence_items<D: Decode>(
    decoder: &D,
    cursor: &mut Cursor<&[u8]>,
    declared: Length,
    depth: u32,
) -> Result<Vec<Dataset>> {
    ensure!(
        depth < MAX_SEQUENCE_DEPTH,
        DepthExceededSnafu {
            limit: MAX_SEQUENCE_DEPTH
        }
    );

    let end = declared.get().map(|l| cursor.position() + u64::from(l));
    if let Some(end) = end {
        ensure!(
            end <= cursor.get_ref().len() as u64,
            TruncatedElementSnafu {
                tag: pacs_core::header::TAG_ITEM,
                declared: declared.0,
                remaining: cursor.get_ref().len() - cursor.position() as usize
            }
        );
    }

    let mut items = Vec::new();
    loop {
        if let Some(end) = end {
            if cursor.position() >= end {
                break;
            }
        }
        match decoder.decode_item_header(cursor)? {
            SequenceItemHeader::Item { len } => {
                let item = if len.is_undefined() {
                    decode_undefined_length_item(decoder, cursor, depth + 1)?
                } else {
                    let item_end = cursor.position() + u64::from(len.0);
                    decode_dataset_at(decoder, cursor, Some(item_end), depth + 1)?
                };
                items.push(item);
            }
            SequenceItemHeader::SequenceDelimiter if end.is_none() => break,
            SequenceItemHeader::SequenceDelimiter | SequenceItemHeader::ItemDelimiter => {
                return UnexpectedSequenceTagSnafu {
                    tag: pacs_core::header::TAG_ITEM_DELIMITER,
                }
                .fail();
            }
        }
    }
    Ok(items)
}

/// Decode the elements of an undefined-length item
/// until the item delimitation tag.
fn decode_undefined_length_item<D: Decode>(
    decoder: &D,
    cursor: &mut Cursor<&[u8]>,
    depth: u32,
) -> Result<Dataset> {
    let mut dataset = Dataset::new();
    loop {
        let header = decoder.decode_header(cursor)?;
        if header.tag.is_item_delimiter() {
            ensure!(
                header.len.get() == Some(0),
                BadDelimitationLengthSnafu { tag: header.tag }
            );
            return Ok(dataset);
        }
        let element = decode_element_body(decoder, cursor, header, depth)?;
        let tag = element.tag();
        ensure!(dataset.put(element).is_none(), DuplicateTagSnafu { tag });
    }
}

/// Decode undefined-length pixel data:
/// concatenate the payload of every fragment item
/// until the sequence delimitation tag.
fn decode_pixel_fragments<D: Decode>(
    decoder: &D,
    cursor: &mut Cursor<&[u8]>,
) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    loop {
        match decoder.decode_item_header(cursor)? {
            SequenceItemHeader::Item { len } => {
                let len = len.get().ok_or_else(|| {
                    UndefinedLengthNotAllowedSnafu {
                        tag: pacs_core::header::TAG_ITEM,
                        vr: VR::OB,
                    }
                    .build()
                })?;
                let remaining = cursor.get_ref().len() as u64 - cursor.position();
                ensure!(
                    u64::from(len) <= remaining,
                    TruncatedElementSnafu {
                        tag: PIXEL_DATA,
                        declared: len,
                        remaining: remaining as usize
                    }
                );
                let start = cursor.position() as usize;
                data.extend_from_slice(&cursor.get_ref()[start..start + len as usize]);
                cursor.set_position(start as u64 + u64::from(len));
            }
            SequenceItemHeader::SequenceDelimiter => return Ok(data),
            SequenceItemHeader::ItemDelimiter => {
                return UnexpectedSequenceTagSnafu {
                    tag: pacs_core::header::TAG_ITEM_DELIMITER,
                }
                .fail()
            }
        }
    }
}

/// Decode a primitive value from its raw bytes according to the VR.
fn decode_primitive<B: ByteOrder>(tag: Tag, vr: VR, data: &[u8]) -> Result<PrimitiveValue> {
    if data.is_empty() {
        return Ok(PrimitiveValue::Empty);
    }

    if vr.is_string() {
        let pad = vr.pad_byte();
        let mut end = data.len();
        while end > 0 && data[end - 1] == pad {
            end -= 1;
        }
        let trimmed = &data[..end];
        ensure!(!trimmed.contains(&0), InvalidStringSnafu { tag });
        let text = std::str::from_utf8(trimmed)
            .ok()
            .ok_or_else(|| InvalidStringSnafu { tag }.build())?;
        return Ok(PrimitiveValue::Str(text.to_owned()));
    }

    if vr == VR::AT {
        ensure!(
            data.len() % 4 == 0,
            InvalidLengthSnafu {
                tag,
                vr,
                len: data.len() as u32
            }
        );
        let tags: SmallVec<[Tag; 2]> = data
            .chunks_exact(4)
            .map(|c| Tag(B::read_u16(&c[0..2]), B::read_u16(&c[2..4])))
            .collect();
        return Ok(PrimitiveValue::Tags(tags));
    }

    if let Some(width) = vr.numeric_width() {
        ensure!(
            data.len() % width == 0,
            InvalidLengthSnafu {
                tag,
                vr,
                len: data.len() as u32
            }
        );
        let value = match vr {
            VR::US => PrimitiveValue::U16(data.chunks_exact(2).map(B::read_u16).collect()),
            VR::SS => {
                PrimitiveValue::I16(data.chunks_exact(2).map(|c| B::read_u16(c) as i16).collect())
            }
            VR::UL => PrimitiveValue::U32(data.chunks_exact(4).map(B::read_u32).collect()),
            VR::SL => {
                PrimitiveValue::I32(data.chunks_exact(4).map(|c| B::read_u32(c) as i32).collect())
            }
            VR::UV => PrimitiveValue::U64(data.chunks_exact(8).map(B::read_u64).collect()),
            VR::SV => {
                PrimitiveValue::I64(data.chunks_exact(8).map(|c| B::read_u64(c) as i64).collect())
            }
            VR::FL => PrimitiveValue::F32(data.chunks_exact(4).map(B::read_f32).collect()),
            VR::FD => PrimitiveValue::F64(data.chunks_exact(8).map(B::read_f64).collect()),
            _ => unreachable!("numeric_width covers exactly the numeric VRs"),
        };
        return Ok(value);
    }

    // binary opaque (OB, OD, OF, OL, OV, OW, UN)
    Ok(PrimitiveValue::Bytes(data.to_vec()))
}
