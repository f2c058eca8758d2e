//! Types and methods for the DICOM upper layer protocol.
//!
//! - The [`pdu`] module provides data structures representing
//!   _protocol data units_ and their reader and writer.
//! - The [`framer`] module slices complete PDUs out of a raw byte
//!   stream and reassembles presentation data value fragments.
//! - The [`association`] module holds the acceptor-side association
//!   state machine and presentation context negotiation,
//!   plus a small requestor implementation for outbound
//!   store sub-operations.

pub mod association;
pub mod framer;
pub mod pdu;

/// The implementation class UID reported in association negotiation.
pub const IMPLEMENTATION_CLASS_UID: &str = "2.25.305828504832782033676616367814052150193";

/// The implementation version name reported in association negotiation.
pub const IMPLEMENTATION_VERSION_NAME: &str = "PACS-RS 0.1";

pub use association::{AcceptorOptions, Association, AssociationState, NegotiatedContext};
pub use framer::{PduStream, PdvEvent, PdvReassembler};
pub use pdu::reader::read_pdu;
pub use pdu::writer::write_pdu;
pub use pdu::Pdu;
