//! Service request and result types produced and consumed
//! by the execute stage of the pipeline.

use crate::command::{CommandField, CommandSet, Priority, SubOperationFields};
use crate::error::Result;
use crate::status::Status;

/// A parsed DIMSE request, ready for dispatch to a service handler.
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    /// request command field
    pub command: CommandField,
    /// the session the request arrived on
    pub session_id: u64,
    /// request message id
    pub message_id: u16,
    /// the presentation context the message arrived on
    pub context_id: u8,
    /// negotiated transfer syntax UID of that context
    pub transfer_syntax: String,
    /// affected or requested SOP class UID
    pub sop_class_uid: String,
    /// affected or requested SOP instance UID, when present
    pub sop_instance_uid: Option<String>,
    /// C-MOVE destination AE title, when present
    pub move_destination: Option<String>,
    /// request priority, advisory for handlers
    pub priority: Priority,
    /// AE title of the requesting peer
    pub calling_ae_title: String,
    /// the raw command group bytes
    pub command_bytes: Vec<u8>,
    /// the data set bytes, when the request signalled one
    pub dataset: Option<Vec<u8>>,
}

impl ServiceRequest {
    /// Build a service request from a decoded command set
    /// and its session context.
    pub fn from_command(
        command_set: &CommandSet,
        session_id: u64,
        context_id: u8,
        transfer_syntax: String,
        calling_ae_title: String,
        command_bytes: Vec<u8>,
        dataset: Option<Vec<u8>>,
    ) -> Result<Self> {
        let command = command_set.require_command_field()?;
        Ok(ServiceRequest {
            command,
            session_id,
            message_id: command_set.require_message_id()?,
            context_id,
            transfer_syntax,
            sop_class_uid: command_set
                .affected_sop_class_uid
                .clone()
                .or_else(|| command_set.requested_sop_class_uid.clone())
                .unwrap_or_default(),
            sop_instance_uid: command_set
                .affected_sop_instance_uid
                .clone()
                .or_else(|| command_set.requested_sop_instance_uid.clone()),
            move_destination: command_set.move_destination.clone(),
            priority: command_set.priority.unwrap_or_default(),
            calling_ae_title,
            command_bytes,
            dataset,
        })
    }
}

/// Sub-operation counters carried by C-GET and C-MOVE responses.
pub type SubOperationCounts = SubOperationFields;

/// The outcome of a service handler invocation:
/// one response message to be encoded and sent.
#[derive(Debug, Clone)]
pub struct ServiceResult {
    /// response command field
    pub command: CommandField,
    /// session to answer on
    pub session_id: u64,
    /// the message id being responded to
    pub message_id: u16,
    /// presentation context to answer on
    pub context_id: u8,
    /// DIMSE status
    pub status: Status,
    /// affected SOP class UID
    pub sop_class_uid: String,
    /// affected SOP instance UID, when applicable
    pub sop_instance_uid: Option<String>,
    /// sub-operation counters (C-GET/C-MOVE)
    pub sub_operations: Option<SubOperationCounts>,
    /// free-text error comment (0000,0902)
    pub error_comment: Option<String>,
    /// identifier data set bytes, when the response carries one
    pub dataset: Option<Vec<u8>>,
}

impl ServiceResult {
    /// A response mirroring the given request, with the given status
    /// and no data set.
    pub fn for_request(request: &ServiceRequest, status: Status) -> Result<Self> {
        Ok(ServiceResult {
            command: request.command.response()?,
            session_id: request.session_id,
            message_id: request.message_id,
            context_id: request.context_id,
            status,
            sop_class_uid: request.sop_class_uid.clone(),
            sop_instance_uid: request.sop_instance_uid.clone(),
            sub_operations: None,
            error_comment: None,
            dataset: None,
        })
    }

    /// Attach an error comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.error_comment = Some(comment.into());
        self
    }

    /// Attach an identifier data set.
    pub fn with_dataset(mut self, dataset: Vec<u8>) -> Self {
        self.dataset = Some(dataset);
        self
    }

    /// Build the command set of this response.
    pub fn to_command_set(&self) -> CommandSet {
        CommandSet {
            command_field: Some(self.command),
            affected_sop_class_uid: if self.sop_class_uid.is_empty() {
                None
            } else {
                Some(self.sop_class_uid.clone())
            },
            message_id_being_responded_to: Some(self.message_id),
            has_dataset: self.dataset.is_some(),
            status: Some(self.status),
            error_comment: self.error_comment.clone(),
            affected_sop_instance_uid: self.sop_instance_uid.clone(),
            sub_operations: self.sub_operations,
            ..CommandSet::default()
        }
    }
}
