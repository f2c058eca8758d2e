//! The DIMSE command set codec.
//!
//! Command sets travel inside P-DATA-TF command fragments and are
//! always encoded in Implicit VR Little Endian, with the group
//! length element first and the remaining tags ascending.

use crate::error::*;
use crate::status::Status;
use pacs_core::dictionary::tags;
use pacs_core::{DataElement, Dataset, PrimitiveValue, Value, VR};
use pacs_encoding::decode::implicit_le::ImplicitVRLittleEndianDecoder;
use pacs_encoding::decode::Decode;
use pacs_encoding::encode::implicit_le::ImplicitVRLittleEndianEncoder;
use pacs_encoding::encode::Encode;
use snafu::{OptionExt, ResultExt};

/// Data set type value signalling that no data set follows.
pub const NO_DATA_SET: u16 = 0x0101;

/// The command field values of the DIMSE services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandField {
    CStoreRq,
    CStoreRsp,
    CGetRq,
    CGetRsp,
    CFindRq,
    CFindRsp,
    CMoveRq,
    CMoveRsp,
    CEchoRq,
    CEchoRsp,
    NEventReportRq,
    NEventReportRsp,
    NGetRq,
    NGetRsp,
    NSetRq,
    NSetRsp,
    NActionRq,
    NActionRsp,
    NCreateRq,
    NCreateRsp,
    NDeleteRq,
    NDeleteRsp,
    CCancelRq,
}

impl CommandField {
    /// Resolve a command field from its wire value.
    pub fn from_u16(value: u16) -> Result<Self> {
        use CommandField::*;
        Ok(match value {
            0x0001 => CStoreRq,
            0x8001 => CStoreRsp,
            0x0010 => CGetRq,
            0x8010 => CGetRsp,
            0x0020 => CFindRq,
            0x8020 => CFindRsp,
            0x0021 => CMoveRq,
            0x8021 => CMoveRsp,
            0x0030 => CEchoRq,
            0x8030 => CEchoRsp,
            0x0100 => NEventReportRq,
            0x8100 => NEventReportRsp,
            0x0110 => NGetRq,
            0x8110 => NGetRsp,
            0x0120 => NSetRq,
            0x8120 => NSetRsp,
            0x0130 => NActionRq,
            0x8130 => NActionRsp,
            0x0140 => NCreateRq,
            0x8140 => NCreateRsp,
            0x0150 => NDeleteRq,
            0x8150 => NDeleteRsp,
            0x0FFF => CCancelRq,
            other => return UnknownCommandFieldSnafu { value: other }.fail(),
        })
    }

    /// The wire value of this command field.
    pub fn as_u16(self) -> u16 {
        use CommandField::*;
        match self {
            CStoreRq => 0x0001,
            CStoreRsp => 0x8001,
            CGetRq => 0x0010,
            CGetRsp => 0x8010,
            CFindRq => 0x0020,
            CFindRsp => 0x8020,
            CMoveRq => 0x0021,
            CMoveRsp => 0x8021,
            CEchoRq => 0x0030,
            CEchoRsp => 0x8030,
            NEventReportRq => 0x0100,
            NEventReportRsp => 0x8100,
            NGetRq => 0x0110,
            NGetRsp => 0x8110,
            NSetRq => 0x0120,
            NSetRsp => 0x8120,
            NActionRq => 0x0130,
            NActionRsp => 0x8130,
            NCreateRq => 0x0140,
            NCreateRsp => 0x8140,
            NDeleteRq => 0x0150,
            NDeleteRsp => 0x8150,
            CCancelRq => 0x0FFF,
        }
    }

    /// Whether this command field denotes a response.
    #[inline]
    pub fn is_response(self) -> bool {
        self.as_u16() & 0x8000 != 0
    }

    /// The response command field matching this request.
    pub fn response(self) -> Result<Self> {
        CommandField::from_u16(self.as_u16() | 0x8000)
    }
}

/// DIMSE request priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    #[default]
    Medium,
    High,
    Low,
}

impl Priority {
    pub fn from_u16(value: u16) -> Result<Self> {
        match value {
            0 => Ok(Priority::Medium),
            1 => Ok(Priority::High),
            2 => Ok(Priority::Low),
            other => InvalidPrioritySnafu { value: other }.fail(),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            Priority::Medium => 0,
            Priority::High => 1,
            Priority::Low => 2,
        }
    }
}

/// Sub-operation progress counters of C-GET and C-MOVE responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubOperationFields {
    /// absent on the final response
    pub remaining: Option<u16>,
    pub completed: u16,
    pub failed: u16,
    pub warning: u16,
}

/// A parsed DIMSE command set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandSet {
    pub command_field: Option<CommandField>,
    pub affected_sop_class_uid: Option<String>,
    pub requested_sop_class_uid: Option<String>,
    pub message_id: Option<u16>,
    pub message_id_being_responded_to: Option<u16>,
    pub move_destination: Option<String>,
    pub priority: Option<Priority>,
    pub has_dataset: bool,
    pub status: Option<Status>,
    pub error_comment: Option<String>,
    pub affected_sop_instance_uid: Option<String>,
    pub requested_sop_instance_uid: Option<String>,
    pub sub_operations: Option<SubOperationFields>,
}

impl CommandSet {
    /// Decode a command set from command fragment bytes.
    pub fn decode(bytes: &[u8]) -> Result<CommandSet> {
        let dataset = ImplicitVRLittleEndianDecoder
            .decode_dataset(bytes)
            .context(DecodeCommandSetSnafu)?;

        let get_u16 = |tag| -> Option<u16> {
            dataset
                .get(tag)
                .and_then(|e| e.value().primitive())
                .and_then(PrimitiveValue::first_u16)
        };
        let get_str =
            |tag| -> Option<String> { dataset.get_str(tag).map(|s| s.trim().to_string()) };

        let command_field = match get_u16(tags::COMMAND_FIELD) {
            Some(value) => Some(CommandField::from_u16(value)?),
            None => None,
        };
        let priority = match get_u16(tags::PRIORITY) {
            Some(value) => Some(Priority::from_u16(value)?),
            None => None,
        };
        let data_set_type = get_u16(tags::COMMAND_DATA_SET_TYPE).unwrap_or(NO_DATA_SET);

        let remaining = get_u16(tags::NUMBER_OF_REMAINING_SUBOPERATIONS);
        let completed = get_u16(tags::NUMBER_OF_COMPLETED_SUBOPERATIONS);
        let failed = get_u16(tags::NUMBER_OF_FAILED_SUBOPERATIONS);
        let warning = get_u16(tags::NUMBER_OF_WARNING_SUBOPERATIONS);
        let sub_operations = if completed.is_some() || failed.is_some() || warning.is_some() {
            Some(SubOperationFields {
                remaining,
                completed: completed.unwrap_or(0),
                failed: failed.unwrap_or(0),
                warning: warning.unwrap_or(0),
            })
        } else {
            None
        };

        Ok(CommandSet {
            command_field,
            affected_sop_class_uid: get_str(tags::AFFECTED_SOP_CLASS_UID),
            requested_sop_class_uid: get_str(tags::REQUESTED_SOP_CLASS_UID),
            message_id: get_u16(tags::MESSAGE_ID),
            message_id_being_responded_to: get_u16(tags::MESSAGE_ID_BEING_RESPONDED_TO),
            move_destination: get_str(tags::MOVE_DESTINATION),
            priority,
            has_dataset: data_set_type != NO_DATA_SET,
            status: get_u16(tags::STATUS).map(Status),
            error_comment: get_str(tags::ERROR_COMMENT),
            affected_sop_instance_uid: get_str(tags::AFFECTED_SOP_INSTANCE_UID),
            requested_sop_instance_uid: get_str(tags::REQUESTED_SOP_INSTANCE_UID),
            sub_operations,
        })
    }

    /// The command field, required for dispatch.
    pub fn require_command_field(&self) -> Result<CommandField> {
        self.command_field.context(MissingFieldSnafu {
            name: "CommandField",
        })
    }

    /// The message id of a request.
    pub fn require_message_id(&self) -> Result<u16> {
        self.message_id.context(MissingFieldSnafu { name: "MessageID" })
    }

    /// Encode this command set to Implicit VR Little Endian bytes
    /// with a recomputed group length element first.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut dataset = Dataset::new();

        if let Some(uid) = &self.affected_sop_class_uid {
            dataset.put_str(tags::AFFECTED_SOP_CLASS_UID, VR::UI, uid);
        }
        if let Some(uid) = &self.requested_sop_class_uid {
            dataset.put_str(tags::REQUESTED_SOP_CLASS_UID, VR::UI, uid);
        }
        if let Some(command_field) = self.command_field {
            dataset.put_value(
                tags::COMMAND_FIELD,
                VR::US,
                PrimitiveValue::from_u16(command_field.as_u16()),
            );
        }
        if let Some(id) = self.message_id {
            dataset.put_value(tags::MESSAGE_ID, VR::US, PrimitiveValue::from_u16(id));
        }
        if let Some(id) = self.message_id_being_responded_to {
            dataset.put_value(
                tags::MESSAGE_ID_BEING_RESPONDED_TO,
                VR::US,
                PrimitiveValue::from_u16(id),
            );
        }
        if let Some(destination) = &self.move_destination {
            dataset.put_str(tags::MOVE_DESTINATION, VR::AE, destination);
        }
        if let Some(priority) = self.priority {
            dataset.put_value(
                tags::PRIORITY,
                VR::US,
                PrimitiveValue::from_u16(priority.as_u16()),
            );
        }
        dataset.put_value(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            PrimitiveValue::from_u16(if self.has_dataset { 0x0000 } else { NO_DATA_SET }),
        );
        if let Some(status) = self.status {
            dataset.put_value(tags::STATUS, VR::US, PrimitiveValue::from_u16(status.0));
        }
        if let Some(comment) = &self.error_comment {
            dataset.put_str(tags::ERROR_COMMENT, VR::LO, comment);
        }
        if let Some(uid) = &self.affected_sop_instance_uid {
            dataset.put_str(tags::AFFECTED_SOP_INSTANCE_UID, VR::UI, uid);
        }
        if let Some(uid) = &self.requested_sop_instance_uid {
            dataset.put_str(tags::REQUESTED_SOP_INSTANCE_UID, VR::UI, uid);
        }
        if let Some(sub) = &self.sub_operations {
            if let Some(remaining) = sub.remaining {
                dataset.put_value(
                    tags::NUMBER_OF_REMAINING_SUBOPERATIONS,
                    VR::US,
                    PrimitiveValue::from_u16(remaining),
                );
            }
            dataset.put_value(
                tags::NUMBER_OF_COMPLETED_SUBOPERATIONS,
                VR::US,
                PrimitiveValue::from_u16(sub.completed),
            );
            dataset.put_value(
                tags::NUMBER_OF_FAILED_SUBOPERATIONS,
                VR::US,
                PrimitiveValue::from_u16(sub.failed),
            );
            dataset.put_value(
                tags::NUMBER_OF_WARNING_SUBOPERATIONS,
                VR::US,
                PrimitiveValue::from_u16(sub.warning),
            );
        }

        // serialize the fields, then prepend the recomputed group length
        let encoder = ImplicitVRLittleEndianEncoder;
        let body = encoder.encode_dataset(&dataset).context(EncodeCommandSetSnafu)?;

        let mut out = Vec::with_capacity(body.len() + 12);
        let group_length = DataElement::new(
            tags::COMMAND_GROUP_LENGTH,
            VR::UL,
            Value::Primitive(PrimitiveValue::from_u32(body.len() as u32)),
        );
        encoder
            .encode_element(&mut out, &group_length)
            .context(EncodeCommandSetSnafu)?;
        out.extend_from_slice(&body);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matches::assert_matches;

    #[test]
    fn command_field_wire_values() {
        assert_eq!(CommandField::CEchoRq.as_u16(), 0x0030);
        assert_eq!(CommandField::CEchoRq.response().unwrap(), CommandField::CEchoRsp);
        assert!(CommandField::CEchoRsp.is_response());
        assert!(!CommandField::CFindRq.is_response());
        assert_matches!(
            CommandField::from_u16(0x7777),
            Err(Error::UnknownCommandField { value: 0x7777 })
        );
    }

    #[test]
    fn echo_request_round_trip() {
        let command = CommandSet {
            command_field: Some(CommandField::CEchoRq),
            affected_sop_class_uid: Some("1.2.840.10008.1.1".to_string()),
            message_id: Some(1),
            priority: Some(Priority::Medium),
            has_dataset: false,
            ..CommandSet::default()
        };
        let bytes = command.encode().unwrap();

        // group length element comes first and accounts for the rest
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x00, 0x00]);
        let group_length = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        assert_eq!(group_length as usize, bytes.len() - 12);

        let decoded = CommandSet::decode(&bytes).unwrap();
        assert_eq!(decoded.command_field, Some(CommandField::CEchoRq));
        assert_eq!(decoded.message_id, Some(1));
        assert_eq!(decoded.priority, Some(Priority::Medium));
        assert!(!decoded.has_dataset);
    }

    #[test]
    fn store_response_round_trip() {
        let command = CommandSet {
            command_field: Some(CommandField::CStoreRsp),
            affected_sop_class_uid: Some("1.2.840.10008.5.1.4.1.1.2".to_string()),
            affected_sop_instance_uid: Some("1.2.3.4.5".to_string()),
            message_id_being_responded_to: Some(7),
            status: Some(Status::SUCCESS),
            has_dataset: false,
            ..CommandSet::default()
        };
        let decoded = CommandSet::decode(&command.encode().unwrap()).unwrap();
        assert_eq!(decoded.command_field, Some(CommandField::CStoreRsp));
        assert_eq!(decoded.message_id_being_responded_to, Some(7));
        assert_eq!(decoded.status, Some(Status::SUCCESS));
        assert_eq!(decoded.affected_sop_instance_uid.as_deref(), Some("1.2.3.4.5"));
    }

    #[test]
    fn move_response_sub_operations_round_trip() {
        let command = CommandSet {
            command_field: Some(CommandField::CMoveRsp),
            message_id_being_responded_to: Some(2),
            status: Some(Status::PENDING),
            has_dataset: false,
            sub_operations: Some(SubOperationFields {
                remaining: Some(2),
                completed: 1,
                failed: 0,
                warning: 0,
            }),
            ..CommandSet::default()
        };
        let decoded = CommandSet::decode(&command.encode().unwrap()).unwrap();
        let sub = decoded.sub_operations.unwrap();
        assert_eq!(sub.remaining, Some(2));
        assert_eq!(sub.completed, 1);

        // final responses omit the remaining counter
        let command = CommandSet {
            sub_operations: Some(SubOperationFields {
                remaining: None,
                completed: 3,
                failed: 0,
                warning: 0,
            }),
            status: Some(Status::SUCCESS),
            ..command
        };
        let decoded = CommandSet::decode(&command.encode().unwrap()).unwrap();
        let sub = decoded.sub_operations.unwrap();
        assert_eq!(sub.remaining, None);
        assert_eq!(sub.completed, 3);
    }
}
