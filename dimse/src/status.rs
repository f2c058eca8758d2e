//! DIMSE status codes and their partition.

use std::fmt;

/// A 16-bit DIMSE status code.
///
/// The value space is partitioned by the standard:
/// success (0x0000), pending (0xFF00/0xFF01),
/// cancel (0xFE00), warning (0x0001 and 0xBxxx),
/// and failure (0x01xx, 0xAxxx and 0xCxxx).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub u16);

impl Status {
    pub const SUCCESS: Status = Status(0x0000);
    /// warning: coerced or no such attribute
    pub const WARNING: Status = Status(0x0001);
    /// processing failure
    pub const PROCESSING_FAILURE: Status = Status(0x0110);
    /// SOP class not supported
    pub const SOP_CLASS_NOT_SUPPORTED: Status = Status(0x0122);
    /// out of resources (storage)
    pub const OUT_OF_RESOURCES: Status = Status(0xA700);
    /// out of resources: unable to calculate number of matches
    pub const UNABLE_TO_CALCULATE_MATCHES: Status = Status(0xA701);
    /// out of resources: unable to perform sub-operations
    pub const UNABLE_TO_PERFORM_SUBOPS: Status = Status(0xA702);
    /// move destination unknown
    pub const MOVE_DESTINATION_UNKNOWN: Status = Status(0xA801);
    /// data set does not match SOP class
    pub const DATASET_MISMATCH: Status = Status(0xA900);
    /// sub-operations completed with one or more failures
    pub const SUBOPS_COMPLETE_WITH_FAILURES: Status = Status(0xB000);
    /// unable to process
    pub const UNABLE_TO_PROCESS: Status = Status(0xC000);
    /// cancelled by the peer
    pub const CANCEL: Status = Status(0xFE00);
    /// pending, identifier follows
    pub const PENDING: Status = Status(0xFF00);
    /// pending with warning that some optional keys were not matched
    pub const PENDING_WARNING: Status = Status(0xFF01);

    #[inline]
    pub fn is_success(self) -> bool {
        self.0 == 0x0000
    }

    #[inline]
    pub fn is_pending(self) -> bool {
        self.0 == 0xFF00 || self.0 == 0xFF01
    }

    #[inline]
    pub fn is_cancel(self) -> bool {
        self.0 == 0xFE00
    }

    #[inline]
    pub fn is_warning(self) -> bool {
        self.0 == 0x0001 || (0xB000..=0xBFFF).contains(&self.0)
    }

    #[inline]
    pub fn is_failure(self) -> bool {
        (0x0100..=0x01FF).contains(&self.0)
            || (0xA000..=0xAFFF).contains(&self.0)
            || (0xC000..=0xCFFF).contains(&self.0)
    }
}

impl From<u16> for Status {
    fn from(value: u16) -> Self {
        Status(value)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#06X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition() {
        assert!(Status::SUCCESS.is_success());
        assert!(Status::PENDING.is_pending());
        assert!(Status::PENDING_WARNING.is_pending());
        assert!(Status::CANCEL.is_cancel());
        assert!(Status::WARNING.is_warning());
        assert!(Status(0xB007).is_warning());
        assert!(Status::PROCESSING_FAILURE.is_failure());
        assert!(Status::SOP_CLASS_NOT_SUPPORTED.is_failure());
        assert!(Status::OUT_OF_RESOURCES.is_failure());
        assert!(Status::UNABLE_TO_PROCESS.is_failure());
        assert!(!Status::SUCCESS.is_failure());
        assert!(!Status::PENDING.is_failure());
    }
}
