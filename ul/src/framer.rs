//! PDU stream framing and presentation data value reassembly.
//!
//! [`PduStream`] turns a raw inbound byte stream into complete PDUs.
//! [`PdvReassembler`] collects P-DATA-TF fragments until a whole
//! command set (and, where present, data set) is available.
//! [`fragment_message`] is the outbound counterpart,
//! splitting encoded messages into PDUs that fit the negotiated
//! maximum PDU length.

use crate::pdu::{
    PDataValue, PDataValueType, Pdu, MAXIMUM_PDU_SIZE, PDU_HEADER_SIZE, PDV_HEADER_SIZE,
};
use byteordered::byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BytesMut};
use snafu::{ensure, Snafu};
use std::collections::HashMap;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Unknown PDU type {:#04x}", pdu_type))]
    UnknownPduType { pdu_type: u8 },

    #[snafu(display("Incoming PDU too large: length {}, maximum is {}", pdu_length, maximum))]
    PduTooLarge { pdu_length: u32, maximum: u32 },

    #[snafu(display(
        "Data set fragment on presentation context {} before its command completed",
        context_id
    ))]
    DataBeforeCommand { context_id: u8 },

    #[snafu(display(
        "Command fragment on presentation context {} interleaved with a partial data set",
        context_id
    ))]
    InterleavedFragments { context_id: u8 },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Incremental framer for one session's inbound byte stream.
///
/// Bytes are appended as they arrive from the transport;
/// [`next_pdu`](Self::next_pdu) yields one complete PDU at a time,
/// leaving partial data buffered.
#[derive(Debug)]
pub struct PduStream {
    buffer: BytesMut,
    max_pdu_length: u32,
}

impl PduStream {
    /// Create a framer accepting PDUs up to the given length.
    pub fn new(max_pdu_length: u32) -> Self {
        PduStream {
            buffer: BytesMut::with_capacity((max_pdu_length + PDU_HEADER_SIZE) as usize),
            max_pdu_length: max_pdu_length.min(MAXIMUM_PDU_SIZE),
        }
    }

    /// Append bytes received from the transport.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// The number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Slice out the next complete PDU, header included.
    ///
    /// Returns `Ok(None)` while the buffer does not hold a whole PDU.
    pub fn next_pdu(&mut self) -> Result<Option<Vec<u8>>> {
        if self.buffer.len() < PDU_HEADER_SIZE as usize {
            return Ok(None);
        }

        let pdu_type = self.buffer[0];
        ensure!(
            (0x01..=0x07).contains(&pdu_type),
            UnknownPduTypeSnafu { pdu_type }
        );

        let pdu_length = BigEndian::read_u32(&self.buffer[2..6]);
        ensure!(
            pdu_length <= self.max_pdu_length,
            PduTooLargeSnafu {
                pdu_length,
                maximum: self.max_pdu_length
            }
        );

        let total = PDU_HEADER_SIZE as usize + pdu_length as usize;
        if self.buffer.len() < total {
            return Ok(None);
        }

        let pdu = self.buffer[..total].to_vec();
        self.buffer.advance(total);
        Ok(Some(pdu))
    }
}

/// A complete message part delivered by the reassembler.
#[derive(Debug, PartialEq, Eq)]
pub enum PdvEvent {
    /// A complete command set on the given presentation context.
    Command { context_id: u8, data: Vec<u8> },
    /// A complete data set on the given presentation context.
    Dataset { context_id: u8, data: Vec<u8> },
}

#[derive(Debug, Default)]
struct ContextBuffers {
    command: BytesMut,
    dataset: BytesMut,
    /// a command set completed and its data set (if any) has not
    awaiting_dataset: bool,
}

/// Reassembles P-DATA-TF fragments per presentation context.
///
/// The buffers belong to the session and are dropped with it.
/// A data set fragment is only legal after the last command fragment
/// of the same message.
#[derive(Debug, Default)]
pub struct PdvReassembler {
    contexts: HashMap<u8, ContextBuffers>,
}

impl PdvReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one PDV fragment; returns a complete command or data set
    /// when the fragment carried the last-fragment bit.
    pub fn push(&mut self, pdv: PDataValue) -> Result<Option<PdvEvent>> {
        let context_id = pdv.presentation_context_id;
        let state = self.contexts.entry(context_id).or_default();

        match pdv.value_type {
            PDataValueType::Command => {
                ensure!(
                    state.dataset.is_empty(),
                    InterleavedFragmentsSnafu { context_id }
                );
                // a new command implicitly closes a message that had no data set
                if state.command.is_empty() {
                    state.awaiting_dataset = false;
                }
                state.command.extend_from_slice(&pdv.data);
                if pdv.is_last {
                    let data = std::mem::take(&mut state.command).to_vec();
                    state.awaiting_dataset = true;
                    return Ok(Some(PdvEvent::Command { context_id, data }));
                }
                Ok(None)
            }
            PDataValueType::Data => {
                ensure!(state.awaiting_dataset, DataBeforeCommandSnafu { context_id });
                state.dataset.extend_from_slice(&pdv.data);
                if pdv.is_last {
                    let data = std::mem::take(&mut state.dataset).to_vec();
                    state.awaiting_dataset = false;
                    return Ok(Some(PdvEvent::Dataset { context_id, data }));
                }
                Ok(None)
            }
        }
    }

    /// Drop all buffered fragments (session teardown).
    pub fn clear(&mut self) {
        self.contexts.clear();
    }
}

/// The largest PDV payload that fits in one PDU of the given length.
#[inline]
pub fn max_fragment_data(max_pdu_length: u32) -> usize {
    (max_pdu_length - PDU_HEADER_SIZE - PDV_HEADER_SIZE) as usize
}

/// Split an encoded command set and optional data set into P-DATA-TF
/// PDUs that fit the negotiated maximum PDU length.
///
/// Each PDU carries a single PDV. The last command fragment and the
/// last data set fragment carry the last-fragment control bit.
pub fn fragment_message(
    context_id: u8,
    command: &[u8],
    dataset: Option<&[u8]>,
    max_pdu_length: u32,
) -> Vec<Pdu> {
    let max_data = max_fragment_data(max_pdu_length);
    let mut pdus = Vec::new();

    let mut push_fragments = |bytes: &[u8], value_type: PDataValueType| {
        let chunks: Vec<&[u8]> = if bytes.is_empty() {
            vec![&[][..]]
        } else {
            bytes.chunks(max_data).collect()
        };
        let last_index = chunks.len() - 1;
        for (i, chunk) in chunks.into_iter().enumerate() {
            pdus.push(Pdu::PData {
                data: vec![PDataValue {
                    presentation_context_id: context_id,
                    value_type,
                    is_last: i == last_index,
                    data: chunk.to_vec(),
                }],
            });
        }
    };

    push_fragments(command, PDataValueType::Command);
    if let Some(dataset) = dataset {
        push_fragments(dataset, PDataValueType::Data);
    }
    pdus
}
