//! The retrieve services: C-GET and C-MOVE.
//!
//! Matching instances are resolved against the index and shipped as
//! C-STORE sub-operations: on the same association for C-GET, over an
//! outbound association to the destination AE for C-MOVE. Pending
//! responses report the sub-operation counters after every child.

use crate::dispatch::{single, ResponseStream, ServiceHandler};
use crate::error::*;
use crate::handlers::identifiers::{decode_identifier, instance_query};
use crate::uids;
use pacs_dimse::command::SubOperationFields;
use pacs_dimse::{CommandField, ServiceRequest, ServiceResult, Status};
use pacs_index::records::InstanceRecord;
use pacs_index::IndexDatabase;
use snafu::ResultExt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a C-STORE sub-operation is sent.
#[derive(Debug, Clone)]
pub enum StoreTarget {
    /// back over the requesting association (C-GET)
    SameAssociation { session_id: u64, context_id: u8 },
    /// over a new association to a named AE (C-MOVE)
    Destination { ae_title: String },
}

/// Performs C-STORE sub-operations on behalf of the retrieve
/// services. The engine wires in an implementation with access to
/// the blob store and the destination table.
pub trait StoreSender: Send + Sync {
    /// Cheap reachability check, done before any sub-operation runs.
    /// An unknown C-MOVE destination fails here.
    fn can_reach(&self, target: &StoreTarget) -> Result<(), HandlerError>;

    /// Ship one instance; returns the sub-operation status.
    fn send_store(
        &self,
        target: &StoreTarget,
        instance: &InstanceRecord,
        originator_ae: &str,
        originator_message_id: u16,
    ) -> Result<Status, HandlerError>;
}

/// C-GET / C-MOVE handler.
pub struct RetrieveHandler {
    index: Arc<IndexDatabase>,
    sender: Arc<dyn StoreSender>,
}

impl RetrieveHandler {
    pub fn new(index: Arc<IndexDatabase>, sender: Arc<dyn StoreSender>) -> Self {
        RetrieveHandler { index, sender }
    }
}

impl ServiceHandler for RetrieveHandler {
    fn call(&self, request: ServiceRequest) -> Result<ResponseStream, HandlerError> {
        let bytes = request
            .dataset
            .as_deref()
            .ok_or_else(|| HandlerError::HandlerFailure {
                message: "retrieve request carried no identifier".to_string(),
            })?;
        let identifier = decode_identifier(bytes, &request.transfer_syntax)?;

        let target = match request.command {
            CommandField::CMoveRq => {
                let ae_title = request
                    .move_destination
                    .clone()
                    .filter(|ae| !ae.is_empty())
                    .ok_or_else(|| HandlerError::HandlerFailure {
                        message: "C-MOVE request names no destination".to_string(),
                    })?;
                StoreTarget::Destination { ae_title }
            }
            _ => StoreTarget::SameAssociation {
                session_id: request.session_id,
                context_id: request.context_id,
            },
        };

        // fail the whole retrieve up front if the destination is
        // unknown, before any sub-operation starts
        self.sender.can_reach(&target)?;

        let instances = self
            .index
            .find_instances(&instance_query(&identifier))
            .context(IndexFailureSnafu)?;
        debug!(
            matches = instances.len(),
            command = ?request.command,
            "retrieve resolved instances"
        );

        if instances.is_empty() {
            let result = ServiceResult::for_request(&request, Status::SUCCESS)
                .map_err(|e| HandlerError::HandlerFailure {
                    message: e.to_string(),
                })?;
            return Ok(single(ServiceResult {
                sub_operations: Some(SubOperationFields {
                    remaining: None,
                    completed: 0,
                    failed: 0,
                    warning: 0,
                }),
                ..result
            }));
        }

        Ok(Box::new(SubOperationRun {
            request,
            target,
            sender: Arc::clone(&self.sender),
            instances: instances.into_iter(),
            remaining: 0,
            completed: 0,
            failed: 0,
            warning: 0,
            finished: false,
        }))
    }

    fn abstract_syntaxes(&self) -> Vec<String> {
        vec![
            uids::PATIENT_ROOT_QR_GET.to_string(),
            uids::PATIENT_ROOT_QR_MOVE.to_string(),
            uids::STUDY_ROOT_QR_GET.to_string(),
            uids::STUDY_ROOT_QR_MOVE.to_string(),
        ]
    }
}

/// Lazy sub-operation driver: each `next` performs one C-STORE
/// child and yields the pending response carrying the updated
/// counters; the last item is the final response.
struct SubOperationRun {
    request: ServiceRequest,
    target: StoreTarget,
    sender: Arc<dyn StoreSender>,
    instances: std::vec::IntoIter<InstanceRecord>,
    remaining: u16,
    completed: u16,
    failed: u16,
    warning: u16,
    finished: bool,
}

impl SubOperationRun {
    fn response(&self, status: Status, remaining: Option<u16>) -> ServiceResult {
        ServiceResult {
            command: self
                .request
                .command
                .response()
                .unwrap_or(CommandField::CMoveRsp),
            session_id: self.request.session_id,
            message_id: self.request.message_id,
            context_id: self.request.context_id,
            status,
            sop_class_uid: self.request.sop_class_uid.clone(),
            sop_instance_uid: None,
            sub_operations: Some(SubOperationFields {
                remaining,
                completed: self.completed,
                failed: self.failed,
                warning: self.warning,
            }),
            error_comment: None,
            dataset: None,
        }
    }
}

impl Iterator for SubOperationRun {
    type Item = ServiceResult;

    fn next(&mut self) -> Option<ServiceResult> {
        if self.finished {
            return None;
        }
        if self.remaining == 0 {
            // first call: the full match count is still ahead of us
            self.remaining = self.instances.len() as u16;
        }

        match self.instances.next() {
            Some(instance) => {
                self.remaining -= 1;
                match self.sender.send_store(
                    &self.target,
                    &instance,
                    &self.request.calling_ae_title,
                    self.request.message_id,
                ) {
                    Ok(status) if status.is_success() => self.completed += 1,
                    Ok(status) if status.is_warning() => self.warning += 1,
                    Ok(status) => {
                        warn!(
                            sop_instance_uid = %instance.sop_instance_uid,
                            %status,
                            "store sub-operation refused"
                        );
                        self.failed += 1;
                    }
                    Err(error) => {
                        warn!(
                            sop_instance_uid = %instance.sop_instance_uid,
                            %error,
                            "store sub-operation failed"
                        );
                        self.failed += 1;
                    }
                }
                Some(self.response(Status::PENDING, Some(self.remaining)))
            }
            None => {
                self.finished = true;
                let status = if self.completed == 0 && self.failed > 0 {
                    Status::UNABLE_TO_PERFORM_SUBOPS
                } else if self.failed > 0 || self.warning > 0 {
                    Status::SUBOPS_COMPLETE_WITH_FAILURES
                } else {
                    Status::SUCCESS
                };
                Some(self.response(status, None))
            }
        }
    }
}
