//! Requestor-side association over TCP.
//!
//! A small blocking client used for outbound store sub-operations
//! (C-MOVE to a destination application entity).

use crate::framer::{fragment_message, PduStream};
use crate::pdu::{
    reader::read_pdu, writer::write_pdu, Pdu, PresentationContextProposed,
    PresentationContextResultReason, UserVariableItem, DEFAULT_MAX_PDU, MINIMUM_PDU_SIZE,
};
use crate::{IMPLEMENTATION_CLASS_UID, IMPLEMENTATION_VERSION_NAME};
use snafu::{ResultExt, Snafu};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Could not connect to peer"))]
    Connect { source: std::io::Error },

    #[snafu(display("Could not serialize PDU"))]
    SerializePdu {
        source: crate::pdu::writer::Error,
    },

    #[snafu(display("Could not send PDU to peer"))]
    WireSend { source: std::io::Error },

    #[snafu(display("Could not receive from peer"))]
    WireReceive { source: std::io::Error },

    #[snafu(display("Peer closed the connection"))]
    ConnectionClosed,

    #[snafu(display("Malformed PDU from peer"))]
    MalformedPdu { source: crate::framer::Error },

    #[snafu(display("Could not parse PDU from peer"))]
    ParsePdu {
        source: crate::pdu::reader::Error,
    },

    #[snafu(display("Association request was rejected by the peer"))]
    Rejected,

    #[snafu(display("Peer did not accept the proposed presentation context"))]
    NoAcceptedContext,

    #[snafu(display("Unexpected {} PDU from peer", pdu))]
    UnexpectedPdu { pdu: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Options for an outbound association proposing one abstract syntax.
#[derive(Debug, Clone)]
pub struct RequestorOptions {
    pub calling_ae_title: String,
    pub called_ae_title: String,
    pub abstract_syntax: String,
    pub transfer_syntaxes: Vec<String>,
    pub max_pdu_length: u32,
}

impl Default for RequestorOptions {
    fn default() -> Self {
        RequestorOptions {
            calling_ae_title: "PACS-RS".to_string(),
            called_ae_title: "ANY-SCP".to_string(),
            abstract_syntax: "1.2.840.10008.1.1".to_string(),
            transfer_syntaxes: vec![
                "1.2.840.10008.1.2.1".to_string(),
                "1.2.840.10008.1.2".to_string(),
            ],
            max_pdu_length: DEFAULT_MAX_PDU,
        }
    }
}

/// An established requestor-side association.
#[derive(Debug)]
pub struct ClientAssociation {
    socket: TcpStream,
    stream: PduStream,
    context_id: u8,
    transfer_syntax: String,
    max_pdu_length: u32,
}

impl ClientAssociation {
    /// Connect to the peer and negotiate an association.
    pub fn establish<A: ToSocketAddrs>(addr: A, options: &RequestorOptions) -> Result<Self> {
        let mut socket = TcpStream::connect(addr).context(ConnectSnafu)?;

        let rq = Pdu::AssociationRQ {
            protocol_version: 1,
            calling_ae_title: options.calling_ae_title.clone(),
            called_ae_title: options.called_ae_title.clone(),
            application_context_name: "1.2.840.10008.3.1.1.1".to_string(),
            presentation_contexts: vec![PresentationContextProposed {
                id: 1,
                abstract_syntax: options.abstract_syntax.clone(),
                transfer_syntaxes: options.transfer_syntaxes.clone(),
            }],
            user_variables: vec![
                UserVariableItem::MaxLength(options.max_pdu_length),
                UserVariableItem::ImplementationClassUID(IMPLEMENTATION_CLASS_UID.to_string()),
                UserVariableItem::ImplementationVersionName(
                    IMPLEMENTATION_VERSION_NAME.to_string(),
                ),
            ],
        };

        let mut buffer = Vec::with_capacity(1024);
        write_pdu(&mut buffer, &rq).context(SerializePduSnafu)?;
        socket.write_all(&buffer).context(WireSendSnafu)?;

        let mut association = ClientAssociation {
            socket,
            stream: PduStream::new(options.max_pdu_length),
            context_id: 1,
            transfer_syntax: String::new(),
            max_pdu_length: options.max_pdu_length,
        };

        match association.receive()? {
            Pdu::AssociationAC {
                presentation_contexts,
                user_variables,
                ..
            } => {
                let accepted = presentation_contexts
                    .iter()
                    .find(|pc| pc.reason == PresentationContextResultReason::Acceptance)
                    .ok_or_else(|| NoAcceptedContextSnafu.build())?;
                association.context_id = accepted.id;
                association.transfer_syntax = accepted.transfer_syntax.clone();
                if let Some(max) = user_variables.iter().find_map(|uv| match uv {
                    UserVariableItem::MaxLength(max) => Some(*max),
                    _ => None,
                }) {
                    association.max_pdu_length =
                        max.min(options.max_pdu_length).max(MINIMUM_PDU_SIZE);
                }
                debug!(
                    context_id = accepted.id,
                    transfer_syntax = %accepted.transfer_syntax,
                    "association established"
                );
                Ok(association)
            }
            Pdu::AssociationRJ { .. } => RejectedSnafu.fail(),
            _ => UnexpectedPduSnafu { pdu: "unexpected" }.fail(),
        }
    }

    /// The accepted presentation context id.
    pub fn context_id(&self) -> u8 {
        self.context_id
    }

    /// The accepted transfer syntax UID.
    pub fn transfer_syntax(&self) -> &str {
        &self.transfer_syntax
    }

    /// Send one PDU to the peer.
    pub fn send(&mut self, pdu: &Pdu) -> Result<()> {
        let mut buffer = Vec::with_capacity(self.max_pdu_length as usize);
        write_pdu(&mut buffer, pdu).context(SerializePduSnafu)?;
        self.socket.write_all(&buffer).context(WireSendSnafu)
    }

    /// Send one DIMSE message (encoded command set and optional data
    /// set), fragmented to the negotiated maximum PDU length.
    pub fn send_message(&mut self, command: &[u8], dataset: Option<&[u8]>) -> Result<()> {
        for pdu in fragment_message(self.context_id, command, dataset, self.max_pdu_length) {
            self.send(&pdu)?;
        }
        Ok(())
    }

    /// Receive the next PDU, blocking until one is complete.
    pub fn receive(&mut self) -> Result<Pdu> {
        let mut chunk = [0u8; 8192];
        loop {
            if let Some(raw) = self.stream.next_pdu().context(MalformedPduSnafu)? {
                return read_pdu(&raw).context(ParsePduSnafu);
            }
            let n = self.socket.read(&mut chunk).context(WireReceiveSnafu)?;
            if n == 0 {
                return ConnectionClosedSnafu.fail();
            }
            self.stream.push(&chunk[..n]);
        }
    }

    /// Release the association in an orderly fashion.
    pub fn release(mut self) -> Result<()> {
        self.send(&Pdu::ReleaseRQ)?;
        loop {
            match self.receive() {
                Ok(Pdu::ReleaseRP) | Err(Error::ConnectionClosed) => return Ok(()),
                Ok(_) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Abort the association, dropping the connection.
    pub fn abort(mut self) {
        let _ = self.send(&super::provider_abort_pdu());
        let _ = self.socket.shutdown(std::net::Shutdown::Both);
    }
}
