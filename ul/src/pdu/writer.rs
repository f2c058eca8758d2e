//! PDU writer module.

use crate::pdu::*;
use byteordered::byteorder::{BigEndian, WriteBytesExt};
use snafu::{ResultExt, Snafu};
use std::io::Write;

#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Could not write PDU field `{}`", field))]
    WriteField {
        field: &'static str,
        source: std::io::Error,
    },

    #[snafu(display("AE title `{}` is longer than 16 characters", ae_title))]
    AeTitleTooLong { ae_title: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Build a chunk with a 32-bit big-endian length prefix.
fn write_chunk_u32<F>(writer: &mut dyn Write, field: &'static str, func: F) -> Result<()>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    let mut data = vec![];
    func(&mut data)?;
    writer
        .write_u32::<BigEndian>(data.len() as u32)
        .context(WriteFieldSnafu { field })?;
    writer.write_all(&data).context(WriteFieldSnafu { field })?;
    Ok(())
}

/// Build a chunk with a 16-bit big-endian length prefix.
fn write_chunk_u16<F>(writer: &mut dyn Write, field: &'static str, func: F) -> Result<()>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    let mut data = vec![];
    func(&mut data)?;
    writer
        .write_u16::<BigEndian>(data.len() as u16)
        .context(WriteFieldSnafu { field })?;
    writer.write_all(&data).context(WriteFieldSnafu { field })?;
    Ok(())
}

fn write_ae_title(writer: &mut dyn Write, ae_title: &str) -> Result<()> {
    if ae_title.len() > 16 {
        return AeTitleTooLongSnafu { ae_title }.fail();
    }
    let mut bytes = [b' '; 16];
    bytes[..ae_title.len()].copy_from_slice(ae_title.as_bytes());
    writer
        .write_all(&bytes)
        .context(WriteFieldSnafu { field: "AE-title" })
}

fn write_sub_item(writer: &mut dyn Write, item_type: u8, content: &[u8]) -> Result<()> {
    writer
        .write_u8(item_type)
        .context(WriteFieldSnafu { field: "Item-type" })?;
    writer
        .write_u8(0x00)
        .context(WriteFieldSnafu { field: "Reserved" })?;
    write_chunk_u16(writer, "Item", |out| {
        out.extend_from_slice(content);
        Ok(())
    })
}

fn write_user_variables(writer: &mut dyn Write, variables: &[UserVariableItem]) -> Result<()> {
    writer
        .write_u8(0x50)
        .context(WriteFieldSnafu { field: "Item-type" })?;
    writer
        .write_u8(0x00)
        .context(WriteFieldSnafu { field: "Reserved" })?;
    write_chunk_u16(writer, "User-information", |out| {
        for variable in variables {
            match variable {
                UserVariableItem::MaxLength(max) => {
                    write_sub_item(out, 0x51, &max.to_be_bytes())?;
                }
                UserVariableItem::ImplementationClassUID(uid) => {
                    write_sub_item(out, 0x52, uid.as_bytes())?;
                }
                UserVariableItem::ImplementationVersionName(name) => {
                    write_sub_item(out, 0x55, name.as_bytes())?;
                }
                UserVariableItem::Unknown(item_type, data) => {
                    write_sub_item(out, *item_type, data)?;
                }
            }
        }
        Ok(())
    })
}

/// Serialize one PDU, header included, onto the writer.
pub fn write_pdu<W>(writer: &mut W, pdu: &Pdu) -> Result<()>
where
    W: Write,
{
    match pdu {
        Pdu::AssociationRQ {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            user_variables,
        } => {
            writer
                .write_u8(0x01)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteFieldSnafu { field: "Reserved" })?;
            write_chunk_u32(writer, "A-ASSOCIATE-RQ", |out| {
                out.write_u16::<BigEndian>(*protocol_version)
                    .context(WriteFieldSnafu {
                        field: "Protocol-version",
                    })?;
                out.write_u16::<BigEndian>(0x0000)
                    .context(WriteFieldSnafu { field: "Reserved" })?;
                write_ae_title(out, called_ae_title)?;
                write_ae_title(out, calling_ae_title)?;
                out.write_all(&[0u8; 32])
                    .context(WriteFieldSnafu { field: "Reserved" })?;

                write_sub_item(out, 0x10, application_context_name.as_bytes())?;

                for pc in presentation_contexts {
                    out.write_u8(0x20)
                        .context(WriteFieldSnafu { field: "Item-type" })?;
                    out.write_u8(0x00)
                        .context(WriteFieldSnafu { field: "Reserved" })?;
                    write_chunk_u16(out, "Presentation-context", |out| {
                        out.write_all(&[pc.id, 0x00, 0x00, 0x00])
                            .context(WriteFieldSnafu {
                                field: "Presentation-context-ID",
                            })?;
                        write_sub_item(out, 0x30, pc.abstract_syntax.as_bytes())?;
                        for ts in &pc.transfer_syntaxes {
                            write_sub_item(out, 0x40, ts.as_bytes())?;
                        }
                        Ok(())
                    })?;
                }

                write_user_variables(out, user_variables)
            })
        }
        Pdu::AssociationAC {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            user_variables,
        } => {
            writer
                .write_u8(0x02)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteFieldSnafu { field: "Reserved" })?;
            write_chunk_u32(writer, "A-ASSOCIATE-AC", |out| {
                out.write_u16::<BigEndian>(*protocol_version)
                    .context(WriteFieldSnafu {
                        field: "Protocol-version",
                    })?;
                out.write_u16::<BigEndian>(0x0000)
                    .context(WriteFieldSnafu { field: "Reserved" })?;
                write_ae_title(out, called_ae_title)?;
                write_ae_title(out, calling_ae_title)?;
                out.write_all(&[0u8; 32])
                    .context(WriteFieldSnafu { field: "Reserved" })?;

                write_sub_item(out, 0x10, application_context_name.as_bytes())?;

                for pc in presentation_contexts {
                    out.write_u8(0x21)
                        .context(WriteFieldSnafu { field: "Item-type" })?;
                    out.write_u8(0x00)
                        .context(WriteFieldSnafu { field: "Reserved" })?;
                    write_chunk_u16(out, "Presentation-context-result", |out| {
                        out.write_all(&[pc.id, 0x00, pc.reason as u8, 0x00])
                            .context(WriteFieldSnafu {
                                field: "Result/Reason",
                            })?;
                        write_sub_item(out, 0x40, pc.transfer_syntax.as_bytes())?;
                        Ok(())
                    })?;
                }

                write_user_variables(out, user_variables)
            })
        }
        Pdu::AssociationRJ { result, source } => {
            writer
                .write_u8(0x03)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteFieldSnafu { field: "Reserved" })?;
            write_chunk_u32(writer, "A-ASSOCIATE-RJ", |out| {
                let (source_byte, reason_byte) = reject_bytes(source);
                out.write_all(&[0x00, *result as u8, source_byte, reason_byte])
                    .context(WriteFieldSnafu {
                        field: "Result/Source/Reason",
                    })
            })
        }
        Pdu::PData { data } => {
            writer
                .write_u8(0x04)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteFieldSnafu { field: "Reserved" })?;
            write_chunk_u32(writer, "P-DATA-TF", |out| {
                for pdv in data {
                    write_chunk_u32(out, "PDV", |out| {
                        let mut header = 0x00u8;
                        if pdv.value_type == PDataValueType::Command {
                            header |= 0x01;
                        }
                        if pdv.is_last {
                            header |= 0x02;
                        }
                        out.write_all(&[pdv.presentation_context_id, header])
                            .context(WriteFieldSnafu {
                                field: "Message-control-header",
                            })?;
                        out.write_all(&pdv.data)
                            .context(WriteFieldSnafu { field: "PDV-data" })
                    })?;
                }
                Ok(())
            })
        }
        Pdu::ReleaseRQ => {
            writer
                .write_all(&[0x05, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00])
                .context(WriteFieldSnafu {
                    field: "A-RELEASE-RQ",
                })
        }
        Pdu::ReleaseRP => {
            writer
                .write_all(&[0x06, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00])
                .context(WriteFieldSnafu {
                    field: "A-RELEASE-RP",
                })
        }
        Pdu::AbortRQ { source } => {
            writer
                .write_u8(0x07)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteFieldSnafu { field: "Reserved" })?;
            write_chunk_u32(writer, "A-ABORT", |out| {
                let (source_byte, reason_byte) = abort_bytes(source);
                out.write_all(&[0x00, 0x00, source_byte, reason_byte])
                    .context(WriteFieldSnafu {
                        field: "Source/Reason",
                    })
            })
        }
    }
}

fn reject_bytes(source: &AssociationRJSource) -> (u8, u8) {
    use AssociationRJServiceProviderAsceReason as Asce;
    use AssociationRJServiceProviderPresentationReason as Pres;
    use AssociationRJServiceUserReason as User;
    match source {
        AssociationRJSource::ServiceUser(reason) => (
            1,
            match reason {
                User::NoReasonGiven => 1,
                User::ApplicationContextNameNotSupported => 2,
                User::CallingAETitleNotRecognized => 3,
                User::CalledAETitleNotRecognized => 7,
            },
        ),
        AssociationRJSource::ServiceProviderAsce(reason) => (
            2,
            match reason {
                Asce::NoReasonGiven => 1,
                Asce::ProtocolVersionNotSupported => 2,
            },
        ),
        AssociationRJSource::ServiceProviderPresentation(reason) => (
            3,
            match reason {
                Pres::TemporaryCongestion => 1,
                Pres::LocalLimitExceeded => 2,
            },
        ),
    }
}

fn abort_bytes(source: &AbortSource) -> (u8, u8) {
    use AbortServiceProviderReason as Reason;
    match source {
        AbortSource::ServiceUser => (0, 0),
        AbortSource::ServiceProvider(reason) => (
            2,
            match reason {
                Reason::ReasonNotSpecified => 0,
                Reason::UnrecognizedPdu => 1,
                Reason::UnexpectedPdu => 2,
                Reason::UnrecognizedPduParameter => 4,
                Reason::UnexpectedPduParameter => 5,
                Reason::InvalidPduParameterValue => 6,
            },
        ),
    }
}
