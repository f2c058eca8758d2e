//! The performed procedure step service (N-CREATE / N-SET / N-GET).

use crate::dispatch::{single, ResponseStream, ServiceHandler};
use crate::error::*;
use crate::handlers::identifiers::{decode_identifier, encode_identifier};
use crate::uids;
use pacs_core::dictionary::tags;
use pacs_core::{Dataset, VR};
use pacs_dimse::{CommandField, ServiceRequest, ServiceResult, Status};
use pacs_index::records::{MppsRecord, MppsState};
use pacs_index::IndexDatabase;
use snafu::ResultExt;
use std::sync::Arc;
use tracing::info;

/// MPPS: N-CREATE starts a step, N-SET closes it,
/// N-GET reads it back.
pub struct MppsHandler {
    index: Arc<IndexDatabase>,
}

impl MppsHandler {
    pub fn new(index: Arc<IndexDatabase>) -> Self {
        MppsHandler { index }
    }

    fn create(&self, request: &ServiceRequest, mpps_uid: &str) -> Result<(), HandlerError> {
        let attributes = self.attributes(request)?;
        let record = MppsRecord {
            mpps_uid: mpps_uid.to_string(),
            station: attributes
                .get_str(tags::PERFORMED_STATION_AE_TITLE)
                .unwrap_or_default()
                .to_string(),
            modality: attributes
                .get_str(tags::MODALITY)
                .unwrap_or_default()
                .to_string(),
            study_uid: attributes
                .get_str(tags::STUDY_INSTANCE_UID)
                .unwrap_or_default()
                .to_string(),
            accession: attributes
                .get_str(tags::ACCESSION_NUMBER)
                .unwrap_or_default()
                .to_string(),
            start_dt: format!(
                "{}T{}",
                attributes
                    .get_str(tags::PERFORMED_PROCEDURE_STEP_START_DATE)
                    .unwrap_or_default(),
                attributes
                    .get_str(tags::PERFORMED_PROCEDURE_STEP_START_TIME)
                    .unwrap_or_default()
            ),
            state: MppsState::InProgress,
        };
        self.index.create_mpps(&record).context(IndexFailureSnafu)?;
        info!(mpps_uid, "procedure step created");
        Ok(())
    }

    fn set(&self, request: &ServiceRequest, mpps_uid: &str) -> Result<(), HandlerError> {
        let attributes = self.attributes(request)?;
        let status_value = attributes
            .get_str(tags::PERFORMED_PROCEDURE_STEP_STATUS)
            .unwrap_or_default()
            .to_string();
        let new_state = match status_value.as_str() {
            "COMPLETED" => MppsState::Completed,
            "DISCONTINUED" => MppsState::Discontinued,
            // setting back to IN PROGRESS (or anything else) is an
            // illegal transition; let the index refuse it
            _ => MppsState::InProgress,
        };
        self.index
            .update_mpps(mpps_uid, new_state)
            .context(IndexFailureSnafu)?;
        info!(mpps_uid, state = new_state.as_str(), "procedure step updated");
        Ok(())
    }

    fn get(&self, request: &ServiceRequest, mpps_uid: &str) -> Result<Vec<u8>, HandlerError> {
        let record = self
            .index
            .get_mpps(mpps_uid)
            .context(IndexFailureSnafu)?
            .ok_or_else(|| HandlerError::HandlerFailure {
                message: format!("no procedure step `{}`", mpps_uid),
            })?;

        let mut dataset = Dataset::new();
        dataset.put_str(tags::MODALITY, VR::CS, &record.modality);
        dataset.put_str(tags::ACCESSION_NUMBER, VR::SH, &record.accession);
        dataset.put_str(tags::STUDY_INSTANCE_UID, VR::UI, &record.study_uid);
        dataset.put_str(
            tags::PERFORMED_STATION_AE_TITLE,
            VR::AE,
            &record.station,
        );
        dataset.put_str(
            tags::PERFORMED_PROCEDURE_STEP_STATUS,
            VR::CS,
            match record.state {
                MppsState::InProgress => "IN PROGRESS",
                MppsState::Completed => "COMPLETED",
                MppsState::Discontinued => "DISCONTINUED",
            },
        );
        encode_identifier(&dataset, &request.transfer_syntax)
    }

    fn attributes(&self, request: &ServiceRequest) -> Result<Dataset, HandlerError> {
        let bytes = request
            .dataset
            .as_deref()
            .ok_or_else(|| HandlerError::HandlerFailure {
                message: "MPPS request carried no attribute list".to_string(),
            })?;
        decode_identifier(bytes, &request.transfer_syntax)
    }
}

impl ServiceHandler for MppsHandler {
    fn call(&self, request: ServiceRequest) -> Result<ResponseStream, HandlerError> {
        let mpps_uid = request
            .sop_instance_uid
            .clone()
            .filter(|uid| !uid.is_empty())
            .ok_or_else(|| HandlerError::HandlerFailure {
                message: "MPPS request names no SOP instance".to_string(),
            })?;

        let mut dataset = None;
        match request.command {
            CommandField::NCreateRq => self.create(&request, &mpps_uid)?,
            CommandField::NSetRq => self.set(&request, &mpps_uid)?,
            CommandField::NGetRq => dataset = Some(self.get(&request, &mpps_uid)?),
            other => {
                return Err(HandlerError::NoHandler { command: other });
            }
        }

        let result = ServiceResult::for_request(&request, Status::SUCCESS)
            .map_err(|e| HandlerError::HandlerFailure {
                message: e.to_string(),
            })?;
        Ok(single(ServiceResult {
            sop_instance_uid: Some(mpps_uid),
            dataset,
            ..result
        }))
    }

    fn abstract_syntaxes(&self) -> Vec<String> {
        vec![uids::MODALITY_PERFORMED_PROCEDURE_STEP.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacs_dimse::Priority;
    use pacs_encoding::encode::implicit_le::ImplicitVRLittleEndianEncoder;
    use pacs_encoding::encode::Encode;

    fn request(command: CommandField, uid: &str, attributes: Dataset) -> ServiceRequest {
        ServiceRequest {
            command,
            session_id: 1,
            message_id: 1,
            context_id: 1,
            transfer_syntax: "1.2.840.10008.1.2".to_string(),
            sop_class_uid: uids::MODALITY_PERFORMED_PROCEDURE_STEP.to_string(),
            sop_instance_uid: Some(uid.to_string()),
            move_destination: None,
            priority: Priority::Medium,
            calling_ae_title: "CT01".to_string(),
            command_bytes: vec![],
            dataset: Some(
                ImplicitVRLittleEndianEncoder
                    .encode_dataset(&attributes)
                    .unwrap(),
            ),
        }
    }

    fn create_attributes() -> Dataset {
        let mut ds = Dataset::new();
        ds.put_str(tags::MODALITY, VR::CS, "CT");
        ds.put_str(tags::PERFORMED_STATION_AE_TITLE, VR::AE, "CT01");
        ds.put_str(tags::STUDY_INSTANCE_UID, VR::UI, "1.2.3.1");
        ds
    }

    fn set_attributes(status: &str) -> Dataset {
        let mut ds = Dataset::new();
        ds.put_str(tags::PERFORMED_PROCEDURE_STEP_STATUS, VR::CS, status);
        ds
    }

    #[test]
    fn create_set_complete_flow() {
        let index = Arc::new(IndexDatabase::open_in_memory().unwrap());
        let handler = MppsHandler::new(Arc::clone(&index));

        let results: Vec<_> = handler
            .call(request(CommandField::NCreateRq, "1.2.3", create_attributes()))
            .unwrap()
            .collect();
        assert_eq!(results[0].status, Status::SUCCESS);

        let results: Vec<_> = handler
            .call(request(CommandField::NSetRq, "1.2.3", set_attributes("COMPLETED")))
            .unwrap()
            .collect();
        assert_eq!(results[0].status, Status::SUCCESS);
        assert_eq!(
            index.get_mpps("1.2.3").unwrap().unwrap().state,
            MppsState::Completed
        );
    }

    #[test]
    fn illegal_transition_is_refused_with_unable_to_process() {
        let index = Arc::new(IndexDatabase::open_in_memory().unwrap());
        let handler = MppsHandler::new(Arc::clone(&index));

        handler
            .call(request(CommandField::NCreateRq, "1.2.3", create_attributes()))
            .unwrap()
            .for_each(drop);
        handler
            .call(request(CommandField::NSetRq, "1.2.3", set_attributes("COMPLETED")))
            .unwrap()
            .for_each(drop);

        let err = match handler.call(request(
            CommandField::NSetRq,
            "1.2.3",
            set_attributes("IN PROGRESS"),
        )) {
            Err(err) => err,
            Ok(_) => panic!("expected the transition to be refused"),
        };
        assert_eq!(err.status(), Status::UNABLE_TO_PROCESS);
        // the stored state did not change
        assert_eq!(
            index.get_mpps("1.2.3").unwrap().unwrap().state,
            MppsState::Completed
        );
    }
}
