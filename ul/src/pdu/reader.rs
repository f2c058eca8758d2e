//! PDU reader module.
//!
//! Parses one complete PDU (header included) out of a byte slice.
//! Slicing complete PDUs out of the raw stream is the job of
//! [`crate::framer::PduStream`].

use crate::pdu::*;
use byteordered::byteorder::{BigEndian, ReadBytesExt};
use snafu::{ensure, OptionExt, ResultExt, Snafu};
use std::io::{Cursor, Read, Seek, SeekFrom};

#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Could not read PDU field `{}`", field))]
    ReadPduField {
        field: &'static str,
        source: std::io::Error,
    },

    #[snafu(display("Could not read {} reserved bytes", bytes))]
    ReadReserved {
        bytes: u32,
        source: std::io::Error,
    },

    #[snafu(display("Unknown PDU type {:#04x}", pdu_type))]
    UnknownPduType { pdu_type: u8 },

    #[snafu(display("Invalid item length {} in field `{}`", length, field))]
    InvalidItemLength { field: &'static str, length: u32 },

    #[snafu(display("Unknown sub-item type {:#04x} in `{}`", item_type, field))]
    UnknownSubItem {
        field: &'static str,
        item_type: u8,
    },

    #[snafu(display("Could not decode text field `{}`", field))]
    DecodeText {
        field: &'static str,
        source: std::str::Utf8Error,
    },

    #[snafu(display("Invalid reject source or reason"))]
    InvalidRejectSourceOrReason,

    #[snafu(display("Invalid abort source or reason"))]
    InvalidAbortSourceOrReason,

    #[snafu(display("Invalid presentation context result reason"))]
    InvalidPresentationContextResultReason,

    #[snafu(display("Missing application context name"))]
    MissingApplicationContextName,

    #[snafu(display("Missing abstract syntax"))]
    MissingAbstractSyntax,

    #[snafu(display("Missing transfer syntax"))]
    MissingTransferSyntax,
}

pub type Result<T> = std::result::Result<T, Error>;

/// An item parsed from the variable field of an association PDU.
#[derive(Debug)]
enum VariableItem {
    ApplicationContext(String),
    PresentationContextProposed(PresentationContextProposed),
    PresentationContextResult(PresentationContextResult),
    UserVariables(Vec<UserVariableItem>),
}

/// Parse one complete PDU, header included.
pub fn read_pdu(bytes: &[u8]) -> Result<Pdu> {
    let mut cursor = Cursor::new(bytes);
    let pdu_type = cursor
        .read_u8()
        .context(ReadPduFieldSnafu { field: "type" })?;
    cursor
        .seek(SeekFrom::Current(1))
        .context(ReadReservedSnafu { bytes: 1_u32 })?;
    let _pdu_length = cursor
        .read_u32::<BigEndian>()
        .context(ReadPduFieldSnafu { field: "length" })?;

    match pdu_type {
        0x01 | 0x02 => read_associate(&mut cursor, pdu_type),
        0x03 => {
            // A-ASSOCIATE-RJ: reserved, result, source, reason
            cursor
                .seek(SeekFrom::Current(1))
                .context(ReadReservedSnafu { bytes: 1_u32 })?;
            let result = cursor
                .read_u8()
                .context(ReadPduFieldSnafu { field: "Result" })?;
            let source = cursor
                .read_u8()
                .context(ReadPduFieldSnafu { field: "Source" })?;
            let reason = cursor
                .read_u8()
                .context(ReadPduFieldSnafu { field: "Reason" })?;

            let result = match result {
                1 => AssociationRJResult::Permanent,
                2 => AssociationRJResult::Transient,
                _ => return InvalidRejectSourceOrReasonSnafu.fail(),
            };
            let source = reject_source(source, reason)?;
            Ok(Pdu::AssociationRJ { result, source })
        }
        0x04 => read_pdata(&mut cursor, bytes.len() as u64),
        0x05 => Ok(Pdu::ReleaseRQ),
        0x06 => Ok(Pdu::ReleaseRP),
        0x07 => {
            cursor
                .seek(SeekFrom::Current(2))
                .context(ReadReservedSnafu { bytes: 2_u32 })?;
            let source = cursor
                .read_u8()
                .context(ReadPduFieldSnafu { field: "Source" })?;
            let reason = cursor
                .read_u8()
                .context(ReadPduFieldSnafu { field: "Reason" })?;
            let source = match source {
                0 => AbortSource::ServiceUser,
                2 => AbortSource::ServiceProvider(match reason {
                    0 => AbortServiceProviderReason::ReasonNotSpecified,
                    1 => AbortServiceProviderReason::UnrecognizedPdu,
                    2 => AbortServiceProviderReason::UnexpectedPdu,
                    4 => AbortServiceProviderReason::UnrecognizedPduParameter,
                    5 => AbortServiceProviderReason::UnexpectedPduParameter,
                    6 => AbortServiceProviderReason::InvalidPduParameterValue,
                    _ => return InvalidAbortSourceOrReasonSnafu.fail(),
                }),
                _ => return InvalidAbortSourceOrReasonSnafu.fail(),
            };
            Ok(Pdu::AbortRQ { source })
        }
        other => UnknownPduTypeSnafu { pdu_type: other }.fail(),
    }
}

fn reject_source(source: u8, reason: u8) -> Result<AssociationRJSource> {
    use AssociationRJServiceProviderAsceReason as Asce;
    use AssociationRJServiceProviderPresentationReason as Pres;
    use AssociationRJServiceUserReason as User;
    match source {
        1 => Ok(AssociationRJSource::ServiceUser(match reason {
            1 => User::NoReasonGiven,
            2 => User::ApplicationContextNameNotSupported,
            3 => User::CallingAETitleNotRecognized,
            7 => User::CalledAETitleNotRecognized,
            _ => return InvalidRejectSourceOrReasonSnafu.fail(),
        })),
        2 => Ok(AssociationRJSource::ServiceProviderAsce(match reason {
            1 => Asce::NoReasonGiven,
            2 => Asce::ProtocolVersionNotSupported,
            _ => return InvalidRejectSourceOrReasonSnafu.fail(),
        })),
        3 => Ok(AssociationRJSource::ServiceProviderPresentation(
            match reason {
                1 => Pres::TemporaryCongestion,
                2 => Pres::LocalLimitExceeded,
                _ => return InvalidRejectSourceOrReasonSnafu.fail(),
            },
        )),
        _ => InvalidRejectSourceOrReasonSnafu.fail(),
    }
}

/// Parse the common structure of A-ASSOCIATE-RQ and A-ASSOCIATE-AC.
fn read_associate(cursor: &mut Cursor<&[u8]>, pdu_type: u8) -> Result<Pdu> {
    let protocol_version = cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
        field: "Protocol-version",
    })?;
    cursor
        .seek(SeekFrom::Current(2))
        .context(ReadReservedSnafu { bytes: 2_u32 })?;

    let called_ae_title = read_ae_title(cursor, "Called-AE-title")?;
    let calling_ae_title = read_ae_title(cursor, "Calling-AE-title")?;

    cursor
        .seek(SeekFrom::Current(32))
        .context(ReadReservedSnafu { bytes: 32_u32 })?;

    let mut application_context_name: Option<String> = None;
    let mut proposed = vec![];
    let mut results = vec![];
    let mut user_variables = vec![];

    let total = cursor.get_ref().len() as u64;
    while cursor.position() < total {
        match read_variable_item(cursor)? {
            VariableItem::ApplicationContext(name) => application_context_name = Some(name),
            VariableItem::PresentationContextProposed(pc) => proposed.push(pc),
            VariableItem::PresentationContextResult(pc) => results.push(pc),
            VariableItem::UserVariables(uv) => user_variables = uv,
        }
    }

    let application_context_name =
        application_context_name.context(MissingApplicationContextNameSnafu)?;

    if pdu_type == 0x01 {
        Ok(Pdu::AssociationRQ {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts: proposed,
            user_variables,
        })
    } else {
        Ok(Pdu::AssociationAC {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts: results,
            user_variables,
        })
    }
}

/// Read a 16-byte AE title field, trimming non-significant spaces.
fn read_ae_title(cursor: &mut Cursor<&[u8]>, field: &'static str) -> Result<String> {
    let mut ae_bytes = [0u8; 16];
    cursor
        .read_exact(&mut ae_bytes)
        .context(ReadPduFieldSnafu { field })?;
    let text = std::str::from_utf8(&ae_bytes).context(DecodeTextSnafu { field })?;
    Ok(text.trim().to_string())
}

/// Read one variable item (application context, presentation context
/// or user information) from an association PDU.
fn read_variable_item(cursor: &mut Cursor<&[u8]>) -> Result<VariableItem> {
    let item_type = cursor
        .read_u8()
        .context(ReadPduFieldSnafu { field: "Item-type" })?;
    cursor
        .seek(SeekFrom::Current(1))
        .context(ReadReservedSnafu { bytes: 1_u32 })?;
    let length = cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
        field: "Item-length",
    })?;

    match item_type {
        0x10 => {
            let name = read_string(cursor, length as usize, "Application-context-name")?;
            Ok(VariableItem::ApplicationContext(name))
        }
        0x20 => {
            // presentation context (proposed): id, 3 reserved, sub-items
            let end = cursor.position() + u64::from(length);
            let id = cursor.read_u8().context(ReadPduFieldSnafu {
                field: "Presentation-context-ID",
            })?;
            cursor
                .seek(SeekFrom::Current(3))
                .context(ReadReservedSnafu { bytes: 3_u32 })?;

            let mut abstract_syntax: Option<String> = None;
            let mut transfer_syntaxes = vec![];
            while cursor.position() < end {
                let sub_type = cursor.read_u8().context(ReadPduFieldSnafu {
                    field: "Sub-item-type",
                })?;
                cursor
                    .seek(SeekFrom::Current(1))
                    .context(ReadReservedSnafu { bytes: 1_u32 })?;
                let sub_len = cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                    field: "Sub-item-length",
                })?;
                match sub_type {
                    0x30 => {
                        abstract_syntax =
                            Some(read_string(cursor, sub_len as usize, "Abstract-syntax")?);
                    }
                    0x40 => {
                        transfer_syntaxes
                            .push(read_string(cursor, sub_len as usize, "Transfer-syntax")?);
                    }
                    other => {
                        return UnknownSubItemSnafu {
                            field: "Presentation-context",
                            item_type: other,
                        }
                        .fail()
                    }
                }
            }

            ensure!(!transfer_syntaxes.is_empty(), MissingTransferSyntaxSnafu);
            Ok(VariableItem::PresentationContextProposed(
                PresentationContextProposed {
                    id,
                    abstract_syntax: abstract_syntax.context(MissingAbstractSyntaxSnafu)?,
                    transfer_syntaxes,
                },
            ))
        }
        0x21 => {
            // presentation context (result): id, reserved, result/reason, reserved
            let end = cursor.position() + u64::from(length);
            let id = cursor.read_u8().context(ReadPduFieldSnafu {
                field: "Presentation-context-ID",
            })?;
            cursor
                .seek(SeekFrom::Current(1))
                .context(ReadReservedSnafu { bytes: 1_u32 })?;
            let reason_byte = cursor.read_u8().context(ReadPduFieldSnafu {
                field: "Result/Reason",
            })?;
            cursor
                .seek(SeekFrom::Current(1))
                .context(ReadReservedSnafu { bytes: 1_u32 })?;
            let reason = PresentationContextResultReason::from_byte(reason_byte)
                .context(InvalidPresentationContextResultReasonSnafu)?;

            let mut transfer_syntax: Option<String> = None;
            while cursor.position() < end {
                let sub_type = cursor.read_u8().context(ReadPduFieldSnafu {
                    field: "Sub-item-type",
                })?;
                cursor
                    .seek(SeekFrom::Current(1))
                    .context(ReadReservedSnafu { bytes: 1_u32 })?;
                let sub_len = cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                    field: "Sub-item-length",
                })?;
                match sub_type {
                    0x40 => {
                        transfer_syntax =
                            Some(read_string(cursor, sub_len as usize, "Transfer-syntax")?);
                    }
                    other => {
                        return UnknownSubItemSnafu {
                            field: "Presentation-context-result",
                            item_type: other,
                        }
                        .fail()
                    }
                }
            }

            Ok(VariableItem::PresentationContextResult(
                PresentationContextResult {
                    id,
                    reason,
                    transfer_syntax: transfer_syntax.context(MissingTransferSyntaxSnafu)?,
                },
            ))
        }
        0x50 => {
            // user information: a list of sub-items
            let end = cursor.position() + u64::from(length);
            let mut variables = vec![];
            while cursor.position() < end {
                let sub_type = cursor.read_u8().context(ReadPduFieldSnafu {
                    field: "User-item-type",
                })?;
                cursor
                    .seek(SeekFrom::Current(1))
                    .context(ReadReservedSnafu { bytes: 1_u32 })?;
                let sub_len = cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                    field: "User-item-length",
                })?;
                match sub_type {
                    0x51 => {
                        ensure!(
                            sub_len == 4,
                            InvalidItemLengthSnafu {
                                field: "Maximum-length",
                                length: u32::from(sub_len)
                            }
                        );
                        let max = cursor.read_u32::<BigEndian>().context(ReadPduFieldSnafu {
                            field: "Maximum-length",
                        })?;
                        variables.push(UserVariableItem::MaxLength(max));
                    }
                    0x52 => {
                        let uid = read_string(
                            cursor,
                            sub_len as usize,
                            "Implementation-class-UID",
                        )?;
                        variables.push(UserVariableItem::ImplementationClassUID(uid));
                    }
                    0x55 => {
                        let name = read_string(
                            cursor,
                            sub_len as usize,
                            "Implementation-version-name",
                        )?;
                        variables.push(UserVariableItem::ImplementationVersionName(name));
                    }
                    other => {
                        let mut data = vec![0u8; sub_len as usize];
                        cursor.read_exact(&mut data).context(ReadPduFieldSnafu {
                            field: "User-item-data",
                        })?;
                        variables.push(UserVariableItem::Unknown(other, data));
                    }
                }
            }
            Ok(VariableItem::UserVariables(variables))
        }
        other => UnknownSubItemSnafu {
            field: "Variable-item",
            item_type: other,
        }
        .fail(),
    }
}

fn read_string(cursor: &mut Cursor<&[u8]>, len: usize, field: &'static str) -> Result<String> {
    let mut data = vec![0u8; len];
    cursor
        .read_exact(&mut data)
        .context(ReadPduFieldSnafu { field })?;
    let text = std::str::from_utf8(&data).context(DecodeTextSnafu { field })?;
    Ok(text.trim_end_matches(['\0', ' ']).to_string())
}

/// Parse the PDV items of a P-DATA-TF body.
fn read_pdata(cursor: &mut Cursor<&[u8]>, total: u64) -> Result<Pdu> {
    let mut values = vec![];
    while cursor.position() < total {
        let length = cursor.read_u32::<BigEndian>().context(ReadPduFieldSnafu {
            field: "PDV-length",
        })?;
        ensure!(
            length >= 2,
            InvalidItemLengthSnafu {
                field: "PDV-length",
                length
            }
        );
        let presentation_context_id = cursor.read_u8().context(ReadPduFieldSnafu {
            field: "Presentation-context-ID",
        })?;
        let header = cursor.read_u8().context(ReadPduFieldSnafu {
            field: "Message-control-header",
        })?;
        let mut data = vec![0u8; length as usize - 2];
        cursor
            .read_exact(&mut data)
            .context(ReadPduFieldSnafu { field: "PDV-data" })?;

        values.push(PDataValue {
            presentation_context_id,
            value_type: if header & 0x01 != 0 {
                PDataValueType::Command
            } else {
                PDataValueType::Data
            },
            is_last: header & 0x02 != 0,
            data,
        });
    }
    Ok(Pdu::PData { data: values })
}
