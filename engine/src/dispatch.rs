//! The service dispatcher: routes a DIMSE command to its handler.

use crate::error::HandlerError;
use pacs_dimse::{CommandField, ServiceRequest, ServiceResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// A finite, lazy sequence of response messages.
///
/// Iterative services (C-FIND, C-GET, C-MOVE) yield their pending
/// responses one by one; the execute stage encodes each as it is
/// produced.
pub type ResponseStream = Box<dyn Iterator<Item = ServiceResult> + Send>;

/// One registered DIMSE service.
pub trait ServiceHandler: Send + Sync {
    /// Handle one request, producing one or more responses.
    fn call(&self, request: ServiceRequest) -> Result<ResponseStream, HandlerError>;

    /// The abstract syntaxes this handler serves;
    /// used to accept presentation contexts during negotiation.
    fn abstract_syntaxes(&self) -> Vec<String>;
}

/// A single-response stream.
pub fn single(result: ServiceResult) -> ResponseStream {
    Box::new(std::iter::once(result))
}

/// The command-field to handler table.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<u16, Arc<dyn ServiceHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one request command field.
    pub fn register(&mut self, command: CommandField, handler: Arc<dyn ServiceHandler>) {
        self.handlers.insert(command.as_u16(), handler);
    }

    /// Whether a handler exists for the command field.
    pub fn has_handler(&self, command: CommandField) -> bool {
        self.handlers.contains_key(&command.as_u16())
    }

    /// The union of abstract syntaxes of all registered handlers.
    pub fn abstract_syntaxes(&self) -> Vec<String> {
        let mut uids: Vec<String> = self
            .handlers
            .values()
            .flat_map(|handler| handler.abstract_syntaxes())
            .collect();
        uids.sort();
        uids.dedup();
        uids
    }

    /// Dispatch a request.
    ///
    /// A missing handler or handler error never propagates:
    /// it becomes a single refusal response carrying the mapped
    /// DIMSE status and, where possible, an error comment.
    pub fn dispatch(&self, request: ServiceRequest) -> ResponseStream {
        let outcome = match self.handlers.get(&request.command.as_u16()) {
            Some(handler) => handler.call(request.clone()),
            None => Err(HandlerError::NoHandler {
                command: request.command,
            }),
        };

        match outcome {
            Ok(stream) => stream,
            Err(error) => {
                warn!(command = ?request.command, %error, "service handler refused request");
                match ServiceResult::for_request(&request, error.status()) {
                    Ok(result) => single(result.with_comment(error.to_string())),
                    // a command with no response form (C-CANCEL)
                    Err(_) => Box::new(std::iter::empty()),
                }
            }
        }
    }
}
