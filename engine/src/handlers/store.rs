//! The storage service: ingest C-STORE data sets.

use crate::blob::BlobStore;
use crate::dispatch::{single, ResponseStream, ServiceHandler};
use crate::error::*;
use crate::handlers::identifiers::decode_identifier;
use crate::handlers::FindCache;
use crate::uids;
use pacs_core::dictionary::tags;
use pacs_core::Dataset;
use pacs_dimse::{ServiceRequest, ServiceResult, Status};
use pacs_index::records::{InstanceRecord, PatientRecord, SeriesRecord, StudyRecord};
use pacs_index::IndexDatabase;
use snafu::ResultExt;
use std::sync::Arc;
use tracing::{debug, info};

/// C-STORE: persist the instance bytes, index its lineage,
/// and invalidate cached query results.
pub struct StoreHandler {
    blob: Arc<dyn BlobStore>,
    index: Arc<IndexDatabase>,
    cache: Arc<FindCache>,
}

impl StoreHandler {
    pub fn new(blob: Arc<dyn BlobStore>, index: Arc<IndexDatabase>, cache: Arc<FindCache>) -> Self {
        StoreHandler { blob, index, cache }
    }
}

fn required(dataset: &Dataset, tag: pacs_core::Tag, name: &str) -> Result<String, HandlerError> {
    dataset
        .get_str(tag)
        .map(str::to_string)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| HandlerError::HandlerFailure {
            message: format!("stored data set is missing {}", name),
        })
}

fn optional(dataset: &Dataset, tag: pacs_core::Tag) -> String {
    dataset.get_str(tag).unwrap_or_default().to_string()
}

impl ServiceHandler for StoreHandler {
    fn call(&self, request: ServiceRequest) -> Result<ResponseStream, HandlerError> {
        let bytes = request
            .dataset
            .as_deref()
            .ok_or_else(|| HandlerError::HandlerFailure {
                message: "C-STORE request carried no data set".to_string(),
            })?;

        let dataset = decode_identifier(bytes, &request.transfer_syntax)?;

        let sop_instance_uid = dataset
            .get_str(tags::SOP_INSTANCE_UID)
            .map(str::to_string)
            .filter(|v| !v.is_empty())
            .or_else(|| request.sop_instance_uid.clone())
            .ok_or_else(|| HandlerError::HandlerFailure {
                message: "stored data set is missing SOPInstanceUID".to_string(),
            })?;
        let study_uid = required(&dataset, tags::STUDY_INSTANCE_UID, "StudyInstanceUID")?;
        let series_uid = required(&dataset, tags::SERIES_INSTANCE_UID, "SeriesInstanceUID")?;
        let patient_id = {
            let id = optional(&dataset, tags::PATIENT_ID);
            if id.is_empty() {
                "UNKNOWN".to_string()
            } else {
                id
            }
        };

        self.blob
            .put(&sop_instance_uid, &request.transfer_syntax, bytes)
            .context(StorageFailureSnafu)?;

        let patient = PatientRecord {
            patient_id: patient_id.clone(),
            name: optional(&dataset, tags::PATIENT_NAME),
            birth_date: optional(&dataset, tags::PATIENT_BIRTH_DATE),
            sex: optional(&dataset, tags::PATIENT_SEX),
        };
        let study = StudyRecord {
            study_uid: study_uid.clone(),
            patient_id,
            accession: optional(&dataset, tags::ACCESSION_NUMBER),
            study_date: optional(&dataset, tags::STUDY_DATE),
            study_time: optional(&dataset, tags::STUDY_TIME),
            referring_physician: optional(&dataset, tags::REFERRING_PHYSICIAN_NAME),
            description: optional(&dataset, tags::STUDY_DESCRIPTION),
        };
        let series = SeriesRecord {
            series_uid: series_uid.clone(),
            study_uid,
            modality: optional(&dataset, tags::MODALITY),
            number: optional(&dataset, tags::SERIES_NUMBER),
            description: optional(&dataset, tags::SERIES_DESCRIPTION),
            body_part: optional(&dataset, tags::BODY_PART_EXAMINED),
            station: optional(&dataset, tags::STATION_NAME),
        };
        let instance = InstanceRecord {
            sop_instance_uid: sop_instance_uid.clone(),
            series_uid,
            sop_class_uid: {
                let uid = optional(&dataset, tags::SOP_CLASS_UID);
                if uid.is_empty() {
                    request.sop_class_uid.clone()
                } else {
                    uid
                }
            },
            path: format!("{}.dcm", sop_instance_uid),
            size: bytes.len() as u64,
            transfer_syntax_uid: request.transfer_syntax.clone(),
            instance_number: optional(&dataset, tags::INSTANCE_NUMBER),
        };

        // the blob write is already durable; an index failure here
        // surfaces as a failed store so the peer retries
        self.index
            .ingest(&patient, &study, &series, &instance)
            .context(IndexFailureSnafu)?;

        let invalidated = self.cache.invalidate_if(|_| true);
        if invalidated > 0 {
            debug!(invalidated, "query cache invalidated after store");
        }
        info!(
            sop_instance_uid = %sop_instance_uid,
            size = bytes.len(),
            "instance stored"
        );

        let result = ServiceResult::for_request(&request, Status::SUCCESS)
            .map_err(|e| HandlerError::HandlerFailure {
                message: e.to_string(),
            })?;
        Ok(single(ServiceResult {
            sop_instance_uid: Some(sop_instance_uid),
            ..result
        }))
    }

    fn abstract_syntaxes(&self) -> Vec<String> {
        uids::STORAGE_SOP_CLASSES
            .iter()
            .map(|uid| uid.to_string())
            .collect()
    }
}
