//! The verification service.

use crate::dispatch::{single, ResponseStream, ServiceHandler};
use crate::error::HandlerError;
use crate::uids;
use pacs_dimse::{ServiceRequest, ServiceResult, Status};

/// C-ECHO: always answers success.
pub struct EchoHandler;

impl ServiceHandler for EchoHandler {
    fn call(&self, request: ServiceRequest) -> Result<ResponseStream, HandlerError> {
        let result = ServiceResult::for_request(&request, Status::SUCCESS)
            .map_err(|e| HandlerError::HandlerFailure {
                message: e.to_string(),
            })?;
        Ok(single(result))
    }

    fn abstract_syntaxes(&self) -> Vec<String> {
        vec![uids::VERIFICATION.to_string()]
    }
}
