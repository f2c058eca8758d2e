//! Data element encoding.
//!
//! Each transfer syntax provides a header encoder;
//! value serialization, padding and sequence emission are shared here.
//! Writers always emit explicit item lengths,
//! so encoded output never contains undefined lengths.

pub mod explicit_be;
pub mod explicit_le;
pub mod implicit_le;

use crate::error::*;
use byteordered::byteorder::ByteOrder;
use pacs_core::{DataElement, Dataset, PrimitiveValue, Tag, Value, VR};
use snafu::ensure;

/// An encoder of data element headers for one transfer syntax.
pub trait Encode {
    /// The byte order of multi-byte values in the stream.
    type Order: ByteOrder;

    /// Write one data element header with a defined length.
    fn encode_header(&self, out: &mut Vec<u8>, tag: Tag, vr: VR, len: u32) -> Result<()>;

    /// Encode a whole data set in ascending tag order.
    fn encode_dataset(&self, dataset: &Dataset) -> Result<Vec<u8>>
    where
        Self: Sized,
    {
        let mut out = Vec::new();
        for element in dataset.iter() {
            encode_element_to(self, &mut out, element)?;
        }
        Ok(out)
    }

    /// Encode a single data element onto the output buffer.
    fn encode_element(&self, out: &mut Vec<u8>, element: &DataElement) -> Result<()>
    where
        Self: Sized,
    {
        encode_element_to(self, out, element)
    }
}

/// Write the tag in stream byte order.
pub(crate) fn put_tag<B: ByteOrder>(out: &mut Vec<u8>, tag: Tag) {
    let mut buf = [0u8; 4];
    B::write_u16(&mut buf[0..2], tag.group());
    B::write_u16(&mut buf[2..4], tag.element());
    out.extend_from_slice(&buf);
}

fn put_u32<B: ByteOrder>(out: &mut Vec<u8>, value: u32) {
    let mut buf = [0u8; 4];
    B::write_u32(&mut buf, value);
    out.extend_from_slice(&buf);
}

fn encode_element_to<E: Encode>(
    encoder: &E,
    out: &mut Vec<u8>,
    element: &DataElement,
) -> Result<()> {
    match element.value() {
        Value::Sequence(items) => {
            let mut body = Vec::new();
            for item in items {
                let mut item_bytes = Vec::new();
                for nested in item.iter() {
                    encode_element_to(encoder, &mut item_bytes, nested)?;
                }
                put_tag::<E::Order>(&mut body, pacs_core::header::TAG_ITEM);
                put_u32::<E::Order>(&mut body, item_bytes.len() as u32);
                body.extend_from_slice(&item_bytes);
            }
            encoder.encode_header(out, element.tag(), VR::SQ, body.len() as u32)?;
            out.extend_from_slice(&body);
            Ok(())
        }
        Value::Primitive(value) => {
            let bytes = encode_primitive::<E::Order>(element.tag(), element.vr(), value)?;
            encoder.encode_header(out, element.tag(), element.vr(), bytes.len() as u32)?;
            out.extend_from_slice(&bytes);
            Ok(())
        }
    }
}

/// Serialize a primitive value in the stream byte order,
/// padded to even length with the VR's pad byte.
fn encode_primitive<B: ByteOrder>(tag: Tag, vr: VR, value: &PrimitiveValue) -> Result<Vec<u8>> {
    let mut bytes = match value {
        PrimitiveValue::Empty => Vec::new(),
        PrimitiveValue::Str(s) => {
            ensure!(!s.as_bytes().contains(&0), InvalidStringSnafu { tag });
            s.as_bytes().to_vec()
        }
        PrimitiveValue::U16(v) => write_each::<B, _>(v, 2, |buf, x| B::write_u16(buf, *x)),
        PrimitiveValue::I16(v) => write_each::<B, _>(v, 2, |buf, x| B::write_u16(buf, *x as u16)),
        PrimitiveValue::U32(v) => write_each::<B, _>(v, 4, |buf, x| B::write_u32(buf, *x)),
        PrimitiveValue::I32(v) => write_each::<B, _>(v, 4, |buf, x| B::write_u32(buf, *x as u32)),
        PrimitiveValue::U64(v) => write_each::<B, _>(v, 8, |buf, x| B::write_u64(buf, *x)),
        PrimitiveValue::I64(v) => write_each::<B, _>(v, 8, |buf, x| B::write_u64(buf, *x as u64)),
        PrimitiveValue::F32(v) => write_each::<B, _>(v, 4, |buf, x| B::write_f32(buf, *x)),
        PrimitiveValue::F64(v) => write_each::<B, _>(v, 8, |buf, x| B::write_f64(buf, *x)),
        PrimitiveValue::Tags(v) => {
            let mut out = Vec::with_capacity(v.len() * 4);
            for t in v {
                put_tag::<B>(&mut out, *t);
            }
            out
        }
        PrimitiveValue::Bytes(v) => v.clone(),
    };

    if bytes.len() % 2 != 0 {
        bytes.push(vr.pad_byte());
    }
    Ok(bytes)
}

fn write_each<B: ByteOrder, T>(
    values: &[T],
    width: usize,
    write: impl Fn(&mut [u8], &T),
) -> Vec<u8> {
    let mut out = vec![0u8; values.len() * width];
    for (chunk, value) in out.chunks_exact_mut(width).zip(values) {
        write(chunk, value);
    }
    out
}
