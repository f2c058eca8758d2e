//! Acceptor-side association state machine
//! and presentation context negotiation.

pub mod client;

use crate::pdu::{
    AbortServiceProviderReason, AbortSource, AssociationRJResult, AssociationRJSource,
    AssociationRJServiceUserReason, Pdu, PresentationContextProposed, PresentationContextResult,
    PresentationContextResultReason, UserVariableItem, DEFAULT_MAX_PDU, MINIMUM_PDU_SIZE,
};
use crate::{IMPLEMENTATION_CLASS_UID, IMPLEMENTATION_VERSION_NAME};
use snafu::Snafu;
use tracing::debug;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Unexpected {} PDU in state {:?}", pdu, state))]
    UnexpectedPdu {
        pdu: &'static str,
        state: AssociationState,
    },

    #[snafu(display("Association rejected: no acceptable presentation context"))]
    Rejected,
}

pub type Result<T> = std::result::Result<T, Error>;

/// The lifecycle states of an acceptor-side association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationState {
    Idle,
    RequestReceived,
    Established,
    Releasing,
    Aborting,
    Closed,
}

/// A presentation context accepted during negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedContext {
    pub id: u8,
    pub abstract_syntax: String,
    pub transfer_syntax: String,
}

/// Options governing how incoming association requests are negotiated.
#[derive(Debug, Clone)]
pub struct AcceptorOptions {
    /// the AE title of this node
    pub ae_title: String,
    /// abstract syntaxes with a registered handler
    pub abstract_syntaxes: Vec<String>,
    /// supported transfer syntaxes, in local preference order
    pub transfer_syntaxes: Vec<String>,
    /// upper bound for the negotiated maximum PDU length
    pub max_pdu_length: u32,
    /// accept abstract syntaxes without a registered handler
    pub promiscuous: bool,
}

impl Default for AcceptorOptions {
    fn default() -> Self {
        AcceptorOptions {
            ae_title: "PACS-RS".to_string(),
            abstract_syntaxes: Vec::new(),
            // Explicit VR LE is preferred, then Implicit VR LE, then Explicit VR BE
            transfer_syntaxes: vec![
                "1.2.840.10008.1.2.1".to_string(),
                "1.2.840.10008.1.2".to_string(),
                "1.2.840.10008.1.2.2".to_string(),
            ],
            max_pdu_length: DEFAULT_MAX_PDU,
            promiscuous: false,
        }
    }
}

/// The outcome of processing an A-ASSOCIATE-RQ.
#[derive(Debug)]
pub enum NegotiationOutcome {
    /// At least one presentation context was accepted.
    Accepted {
        /// the A-ASSOCIATE-AC to send back
        response: Pdu,
        /// the accepted contexts
        contexts: Vec<NegotiatedContext>,
        /// min(proposed, local) maximum PDU length
        max_pdu_length: u32,
        /// the requesting AE title
        calling_ae_title: String,
    },
    /// No presentation context could be accepted.
    Rejected {
        /// the A-ASSOCIATE-RJ to send back
        response: Pdu,
    },
}

/// Negotiate the presentation contexts of an association request.
///
/// A context is accepted when its abstract syntax has a registered
/// handler and it shares at least one transfer syntax with the local
/// set; the reply carries the first shared syntax in local preference
/// order. The negotiated maximum PDU length is the smaller of the
/// proposal and the local limit, clamped to the standard minimum.
pub fn negotiate(options: &AcceptorOptions, rq: &Pdu) -> NegotiationOutcome {
    let (calling_ae_title, presentation_contexts, user_variables) = match rq {
        Pdu::AssociationRQ {
            calling_ae_title,
            presentation_contexts,
            user_variables,
            ..
        } => (calling_ae_title, presentation_contexts, user_variables),
        _ => {
            return NegotiationOutcome::Rejected {
                response: reject_pdu(),
            }
        }
    };

    let proposed_max = user_variables
        .iter()
        .find_map(|uv| match uv {
            UserVariableItem::MaxLength(max) => Some(*max),
            _ => None,
        })
        .unwrap_or(DEFAULT_MAX_PDU);
    let max_pdu_length = proposed_max
        .min(options.max_pdu_length)
        .max(MINIMUM_PDU_SIZE);

    let mut contexts = Vec::new();
    let results: Vec<PresentationContextResult> = presentation_contexts
        .iter()
        .map(|pc| negotiate_context(options, pc, &mut contexts))
        .collect();

    if contexts.is_empty() {
        debug!("rejecting association: no acceptable presentation context");
        return NegotiationOutcome::Rejected {
            response: reject_pdu(),
        };
    }

    let response = Pdu::AssociationAC {
        protocol_version: 1,
        calling_ae_title: calling_ae_title.clone(),
        called_ae_title: options.ae_title.clone(),
        application_context_name: "1.2.840.10008.3.1.1.1".to_string(),
        presentation_contexts: results,
        user_variables: vec![
            UserVariableItem::MaxLength(options.max_pdu_length),
            UserVariableItem::ImplementationClassUID(IMPLEMENTATION_CLASS_UID.to_string()),
            UserVariableItem::ImplementationVersionName(IMPLEMENTATION_VERSION_NAME.to_string()),
        ],
    };

    NegotiationOutcome::Accepted {
        response,
        contexts,
        max_pdu_length,
        calling_ae_title: calling_ae_title.clone(),
    }
}

fn negotiate_context(
    options: &AcceptorOptions,
    pc: &PresentationContextProposed,
    accepted: &mut Vec<NegotiatedContext>,
) -> PresentationContextResult {
    let abstract_syntax = pc.abstract_syntax.trim_end_matches('\0');
    let known = options
        .abstract_syntaxes
        .iter()
        .any(|uid| uid == abstract_syntax);
    if !known && !options.promiscuous {
        return PresentationContextResult {
            id: pc.id,
            reason: PresentationContextResultReason::AbstractSyntaxNotSupported,
            transfer_syntax: "1.2.840.10008.1.2".to_string(),
        };
    }

    // first local syntax also proposed by the peer wins
    let shared = options
        .transfer_syntaxes
        .iter()
        .find(|local| pc.transfer_syntaxes.iter().any(|ts| ts == *local));

    match shared {
        Some(ts) => {
            accepted.push(NegotiatedContext {
                id: pc.id,
                abstract_syntax: abstract_syntax.to_string(),
                transfer_syntax: ts.clone(),
            });
            PresentationContextResult {
                id: pc.id,
                reason: PresentationContextResultReason::Acceptance,
                transfer_syntax: ts.clone(),
            }
        }
        None => PresentationContextResult {
            id: pc.id,
            reason: PresentationContextResultReason::TransferSyntaxesNotSupported,
            transfer_syntax: "1.2.840.10008.1.2".to_string(),
        },
    }
}

fn reject_pdu() -> Pdu {
    Pdu::AssociationRJ {
        result: AssociationRJResult::Permanent,
        source: AssociationRJSource::ServiceUser(AssociationRJServiceUserReason::NoReasonGiven),
    }
}

/// The A-ABORT PDU emitted when the provider tears a session down.
pub fn provider_abort_pdu() -> Pdu {
    Pdu::AbortRQ {
        source: AbortSource::ServiceProvider(AbortServiceProviderReason::ReasonNotSpecified),
    }
}

/// Acceptor-side association lifecycle.
///
/// Tracks the state transitions of one association and validates
/// that PDUs arrive in a legal state.
#[derive(Debug)]
pub struct Association {
    state: AssociationState,
    contexts: Vec<NegotiatedContext>,
    max_pdu_length: u32,
}

impl Default for Association {
    fn default() -> Self {
        Association::new()
    }
}

impl Association {
    pub fn new() -> Self {
        Association {
            state: AssociationState::Idle,
            contexts: Vec::new(),
            max_pdu_length: DEFAULT_MAX_PDU,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AssociationState {
        self.state
    }

    /// The contexts accepted during negotiation.
    pub fn contexts(&self) -> &[NegotiatedContext] {
        &self.contexts
    }

    /// Look up an accepted context by id.
    pub fn context(&self, id: u8) -> Option<&NegotiatedContext> {
        self.contexts.iter().find(|c| c.id == id)
    }

    /// The negotiated maximum PDU length.
    pub fn max_pdu_length(&self) -> u32 {
        self.max_pdu_length
    }

    /// Process an association request; returns the response PDU
    /// (A-ASSOCIATE-AC or A-ASSOCIATE-RJ) to send to the peer.
    pub fn on_associate_rq(&mut self, options: &AcceptorOptions, rq: &Pdu) -> Result<Pdu> {
        if self.state != AssociationState::Idle {
            return UnexpectedPduSnafu {
                pdu: "A-ASSOCIATE-RQ",
                state: self.state,
            }
            .fail();
        }
        self.state = AssociationState::RequestReceived;

        match negotiate(options, rq) {
            NegotiationOutcome::Accepted {
                response,
                contexts,
                max_pdu_length,
                ..
            } => {
                self.contexts = contexts;
                self.max_pdu_length = max_pdu_length;
                self.state = AssociationState::Established;
                Ok(response)
            }
            NegotiationOutcome::Rejected { response } => {
                self.state = AssociationState::Closed;
                Ok(response)
            }
        }
    }

    /// Check that a P-DATA-TF is legal in the current state.
    pub fn on_pdata(&self) -> Result<()> {
        if self.state != AssociationState::Established {
            return UnexpectedPduSnafu {
                pdu: "P-DATA-TF",
                state: self.state,
            }
            .fail();
        }
        Ok(())
    }

    /// Process an A-RELEASE-RQ; returns the A-RELEASE-RP to send.
    /// The session moves to `Releasing` until [`released`](Self::released).
    pub fn on_release_rq(&mut self) -> Result<Pdu> {
        if self.state != AssociationState::Established {
            return UnexpectedPduSnafu {
                pdu: "A-RELEASE-RQ",
                state: self.state,
            }
            .fail();
        }
        self.state = AssociationState::Releasing;
        Ok(Pdu::ReleaseRP)
    }

    /// Mark the release reply as sent; the association is closed.
    pub fn released(&mut self) {
        self.state = AssociationState::Closed;
    }

    /// Abort the association (peer abort, transport error or idle
    /// timeout); the association is closed.
    pub fn abort(&mut self) {
        self.state = AssociationState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matches::assert_matches;

    fn sample_rq(transfer_syntaxes: Vec<String>) -> Pdu {
        Pdu::AssociationRQ {
            protocol_version: 1,
            calling_ae_title: "ECHOSCU".to_string(),
            called_ae_title: "PACS-RS".to_string(),
            application_context_name: "1.2.840.10008.3.1.1.1".to_string(),
            presentation_contexts: vec![PresentationContextProposed {
                id: 1,
                abstract_syntax: "1.2.840.10008.1.1".to_string(),
                transfer_syntaxes,
            }],
            user_variables: vec![UserVariableItem::MaxLength(8192)],
        }
    }

    fn options() -> AcceptorOptions {
        AcceptorOptions {
            abstract_syntaxes: vec!["1.2.840.10008.1.1".to_string()],
            ..AcceptorOptions::default()
        }
    }

    #[test]
    fn accepts_known_abstract_syntax_with_preferred_transfer_syntax() {
        let rq = sample_rq(vec![
            "1.2.840.10008.1.2".to_string(),
            "1.2.840.10008.1.2.1".to_string(),
        ]);
        let mut assoc = Association::new();
        let response = assoc.on_associate_rq(&options(), &rq).unwrap();

        assert_eq!(assoc.state(), AssociationState::Established);
        // local preference puts Explicit VR LE first
        assert_eq!(
            assoc.context(1).unwrap().transfer_syntax,
            "1.2.840.10008.1.2.1"
        );
        assert_eq!(assoc.max_pdu_length(), 8192);
        assert_matches!(response, Pdu::AssociationAC { .. });
    }

    #[test]
    fn rejects_when_no_context_is_acceptable() {
        let mut rq = sample_rq(vec!["1.2.840.10008.1.2".to_string()]);
        if let Pdu::AssociationRQ {
            presentation_contexts,
            ..
        } = &mut rq
        {
            presentation_contexts[0].abstract_syntax = "1.2.840.10008.5.1.4.1.1.7".to_string();
        }
        let mut assoc = Association::new();
        let response = assoc.on_associate_rq(&options(), &rq).unwrap();
        assert_eq!(assoc.state(), AssociationState::Closed);
        assert_matches!(response, Pdu::AssociationRJ { .. });
    }

    #[test]
    fn unsupported_transfer_syntax_marks_context_refused() {
        let rq = sample_rq(vec!["1.2.840.10008.1.2.4.50".to_string()]);
        let mut assoc = Association::new();
        let response = assoc.on_associate_rq(&options(), &rq).unwrap();
        // the only context failed on transfer syntax, so the whole
        // association is rejected
        assert_matches!(response, Pdu::AssociationRJ { .. });
    }

    #[test]
    fn negotiated_max_pdu_is_clamped_to_minimum() {
        let mut rq = sample_rq(vec!["1.2.840.10008.1.2".to_string()]);
        if let Pdu::AssociationRQ { user_variables, .. } = &mut rq {
            *user_variables = vec![UserVariableItem::MaxLength(512)];
        }
        let mut assoc = Association::new();
        assoc.on_associate_rq(&options(), &rq).unwrap();
        assert_eq!(assoc.max_pdu_length(), MINIMUM_PDU_SIZE);
    }

    #[test]
    fn release_flow_reaches_closed() {
        let rq = sample_rq(vec!["1.2.840.10008.1.2".to_string()]);
        let mut assoc = Association::new();
        assoc.on_associate_rq(&options(), &rq).unwrap();
        assert!(assoc.on_pdata().is_ok());

        let rp = assoc.on_release_rq().unwrap();
        assert_eq!(rp, Pdu::ReleaseRP);
        assert_eq!(assoc.state(), AssociationState::Releasing);
        assert!(assoc.on_pdata().is_err());

        assoc.released();
        assert_eq!(assoc.state(), AssociationState::Closed);
    }

    #[test]
    fn pdata_in_idle_is_an_error() {
        let assoc = Association::new();
        assert_matches!(assoc.on_pdata(), Err(Error::UnexpectedPdu { .. }));
    }
}
