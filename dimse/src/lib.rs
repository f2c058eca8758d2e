//! DIMSE message support:
//! the command set codec over Implicit VR Little Endian,
//! the DIMSE status partition,
//! and the service request/result types
//! flowing through the execution pipeline.

pub mod command;
pub mod error;
pub mod service;
pub mod status;

pub use command::{CommandField, CommandSet, Priority};
pub use error::{Error, Result};
pub use service::{ServiceRequest, ServiceResult, SubOperationCounts};
pub use status::Status;
