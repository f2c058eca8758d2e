//! Engine error types and their mapping onto DIMSE statuses.

use pacs_dimse::{CommandField, Status};
use snafu::Snafu;

/// Failures raised by service handlers.
///
/// Every variant maps to a DIMSE status carried back to the peer;
/// handler failures never tear the association down by themselves.
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum HandlerError {
    #[snafu(display("no handler registered for {:?}", command))]
    NoHandler { command: CommandField },

    #[snafu(display("SOP class `{}` not supported", sop_class_uid))]
    SopClassNotSupported { sop_class_uid: String },

    #[snafu(display("handler failure: {}", message))]
    HandlerFailure { message: String },

    #[snafu(display("blob storage failure"))]
    StorageFailure { source: crate::blob::Error },

    #[snafu(display("index failure"))]
    IndexFailure { source: pacs_index::Error },

    #[snafu(display("data set does not match the SOP class"))]
    DatasetMismatch { source: pacs_encoding::Error },

    #[snafu(display("transfer syntax `{}` not supported", uid))]
    TransferSyntaxNotSupported { uid: String },

    #[snafu(display("could not encode response payload"))]
    EncodePayload { source: pacs_encoding::Error },

    #[snafu(display("could not encode response command set"))]
    EncodeCommand { source: pacs_dimse::Error },

    #[snafu(display("move destination `{}` unknown", ae_title))]
    MoveDestinationUnknown { ae_title: String },

    #[snafu(display("outbound store sub-operation failed"))]
    SubOperationFailed {
        source: pacs_ul::association::client::Error,
    },
}

impl HandlerError {
    /// The DIMSE status reported to the peer for this failure.
    pub fn status(&self) -> Status {
        match self {
            HandlerError::NoHandler { .. } | HandlerError::SopClassNotSupported { .. } => {
                Status::SOP_CLASS_NOT_SUPPORTED
            }
            HandlerError::HandlerFailure { .. } => Status::UNABLE_TO_PROCESS,
            HandlerError::StorageFailure { .. } => Status::OUT_OF_RESOURCES,
            HandlerError::IndexFailure { source } => match source {
                // an illegal procedure step transition is the peer's
                // fault, not an index fault
                pacs_index::Error::MppsIllegalTransition { .. } => Status::UNABLE_TO_PROCESS,
                _ => Status::PROCESSING_FAILURE,
            },
            HandlerError::DatasetMismatch { .. } => Status::DATASET_MISMATCH,
            HandlerError::TransferSyntaxNotSupported { .. } => Status::UNABLE_TO_PROCESS,
            HandlerError::EncodePayload { .. } | HandlerError::EncodeCommand { .. } => {
                Status::PROCESSING_FAILURE
            }
            HandlerError::MoveDestinationUnknown { .. } => Status::MOVE_DESTINATION_UNKNOWN,
            HandlerError::SubOperationFailed { .. } => Status::UNABLE_TO_PERFORM_SUBOPS,
        }
    }
}

/// Failures inside pipeline stages.
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum EngineError {
    #[snafu(display("malformed inbound stream"))]
    Framing { source: pacs_ul::framer::Error },

    #[snafu(display("malformed PDU"))]
    PduParse {
        source: pacs_ul::pdu::reader::Error,
    },

    #[snafu(display("could not serialize PDU"))]
    PduWrite {
        source: pacs_ul::pdu::writer::Error,
    },

    #[snafu(display("association protocol violation"))]
    AssociationViolation {
        source: pacs_ul::association::Error,
    },

    #[snafu(display("malformed DIMSE command set"))]
    CommandSet { source: pacs_dimse::Error },

    #[snafu(display("session {} is not registered", session_id))]
    UnknownSession { session_id: u64 },

    #[snafu(display("presentation context {} was not negotiated", context_id))]
    UnknownPresentationContext { context_id: u8 },

    #[snafu(display("could not submit successor job"))]
    Submit {
        source: crate::pipeline::SubmitError,
    },

    #[snafu(display("transport send failed"))]
    Transport { source: std::io::Error },
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
