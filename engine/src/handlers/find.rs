//! The query service: C-FIND over the index, backed by the
//! result cache, plus the modality worklist query.

use crate::cache::canonical_key;
use crate::dispatch::{ResponseStream, ServiceHandler};
use crate::error::*;
use crate::handlers::identifiers::*;
use crate::handlers::FindCache;
use crate::uids;
use pacs_core::Dataset;
use pacs_dimse::{ServiceRequest, ServiceResult, Status};
use pacs_index::query::QueryLevel;
use pacs_index::IndexDatabase;
use snafu::ResultExt;
use std::sync::Arc;
use tracing::debug;

/// C-FIND: canonical key lookup in the cache,
/// falling through to the index on a miss.
pub struct FindHandler {
    index: Arc<IndexDatabase>,
    cache: Arc<FindCache>,
}

impl FindHandler {
    pub fn new(index: Arc<IndexDatabase>, cache: Arc<FindCache>) -> Self {
        FindHandler { index, cache }
    }

    /// Run the identifier against the index at its level,
    /// producing projected response identifiers.
    fn execute_query(
        &self,
        level: QueryLevel,
        identifier: &Dataset,
    ) -> Result<Vec<Dataset>, HandlerError> {
        let matches = match level {
            QueryLevel::Patient => self
                .index
                .find_patients(&patient_query(identifier))
                .context(IndexFailureSnafu)?
                .iter()
                .map(|patient| project_patient(identifier, patient))
                .collect(),
            QueryLevel::Study => self
                .index
                .find_studies(&study_query(identifier))
                .context(IndexFailureSnafu)?
                .iter()
                .map(|hit| project_study(identifier, hit))
                .collect(),
            QueryLevel::Series => self
                .index
                .find_series(&series_query(identifier))
                .context(IndexFailureSnafu)?
                .iter()
                .map(|series| project_series(identifier, series))
                .collect(),
            QueryLevel::Image => self
                .index
                .find_instances(&instance_query(identifier))
                .context(IndexFailureSnafu)?
                .iter()
                .map(|instance| project_instance(identifier, instance))
                .collect(),
        };
        Ok(matches)
    }

    fn worklist(&self, request: &ServiceRequest, identifier: &Dataset) -> Result<ResponseStream, HandlerError> {
        let matches = self
            .index
            .worklist_search(&worklist_filter(identifier))
            .context(IndexFailureSnafu)?;
        let identifiers: Vec<Dataset> = matches
            .iter()
            .map(|item| project_worklist(identifier, item))
            .collect();
        stream_identifiers(request, &identifiers)
    }
}

/// One pending response per identifier, then the final success.
fn stream_identifiers(
    request: &ServiceRequest,
    identifiers: &[Dataset],
) -> Result<ResponseStream, HandlerError> {
    let mut results = Vec::with_capacity(identifiers.len() + 1);
    for identifier in identifiers {
        let bytes = encode_identifier(identifier, &request.transfer_syntax)?;
        let pending = ServiceResult::for_request(request, Status::PENDING)
            .map_err(|e| HandlerError::HandlerFailure {
                message: e.to_string(),
            })?
            .with_dataset(bytes);
        results.push(pending);
    }
    results.push(
        ServiceResult::for_request(request, Status::SUCCESS).map_err(|e| {
            HandlerError::HandlerFailure {
                message: e.to_string(),
            }
        })?,
    );
    Ok(Box::new(results.into_iter()))
}

impl ServiceHandler for FindHandler {
    fn call(&self, request: ServiceRequest) -> Result<ResponseStream, HandlerError> {
        let bytes = request
            .dataset
            .as_deref()
            .ok_or_else(|| HandlerError::HandlerFailure {
                message: "C-FIND request carried no identifier".to_string(),
            })?;
        let identifier = decode_identifier(bytes, &request.transfer_syntax)?;

        if request.sop_class_uid == uids::MODALITY_WORKLIST_FIND {
            return self.worklist(&request, &identifier);
        }

        let level = query_level(&identifier).ok_or_else(|| HandlerError::HandlerFailure {
            message: "C-FIND identifier is missing QueryRetrieveLevel".to_string(),
        })?;

        let key = canonical_key(
            Some(&request.calling_ae_title),
            level.as_str(),
            &cache_params(&identifier),
        );

        let identifiers = match self.cache.get(&key) {
            Some(cached) => {
                debug!(key = %key, "query served from cache");
                cached
            }
            None => {
                let fresh = Arc::new(self.execute_query(level, &identifier)?);
                self.cache.put(key, Arc::clone(&fresh));
                fresh
            }
        };

        stream_identifiers(&request, &identifiers)
    }

    fn abstract_syntaxes(&self) -> Vec<String> {
        vec![
            uids::PATIENT_ROOT_QR_FIND.to_string(),
            uids::STUDY_ROOT_QR_FIND.to_string(),
            uids::MODALITY_WORKLIST_FIND.to_string(),
        ]
    }
}
