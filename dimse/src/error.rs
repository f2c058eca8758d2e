//! Errors of the DIMSE command codec.

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Could not decode command set"))]
    DecodeCommandSet { source: pacs_encoding::Error },

    #[snafu(display("Could not encode command set"))]
    EncodeCommandSet { source: pacs_encoding::Error },

    #[snafu(display("Command set is missing required field `{}`", name))]
    MissingField { name: &'static str },

    #[snafu(display("Unknown command field value {:#06x}", value))]
    UnknownCommandField { value: u16 },

    #[snafu(display("Invalid priority value {}", value))]
    InvalidPriority { value: u16 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
