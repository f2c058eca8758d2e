//! Round-trip tests for the PDU reader and writer.

use super::reader::read_pdu;
use super::writer::write_pdu;
use super::*;
use matches::assert_matches;

fn round_trip(pdu: &Pdu) -> Pdu {
    let mut bytes = Vec::new();
    write_pdu(&mut bytes, pdu).unwrap();
    read_pdu(&bytes).unwrap()
}

#[test]
fn associate_rq_round_trip() {
    let pdu = Pdu::AssociationRQ {
        protocol_version: 1,
        calling_ae_title: "STORE-SCU".to_string(),
        called_ae_title: "MAIN-PACS".to_string(),
        application_context_name: "1.2.840.10008.3.1.1.1".to_string(),
        presentation_contexts: vec![
            PresentationContextProposed {
                id: 1,
                abstract_syntax: "1.2.840.10008.1.1".to_string(),
                transfer_syntaxes: vec![
                    "1.2.840.10008.1.2.1".to_string(),
                    "1.2.840.10008.1.2".to_string(),
                ],
            },
            PresentationContextProposed {
                id: 3,
                abstract_syntax: "1.2.840.10008.5.1.4.1.1.2".to_string(),
                transfer_syntaxes: vec!["1.2.840.10008.1.2".to_string()],
            },
        ],
        user_variables: vec![
            UserVariableItem::MaxLength(16384),
            UserVariableItem::ImplementationClassUID("1.2.3.4".to_string()),
            UserVariableItem::ImplementationVersionName("TEST 1.0".to_string()),
        ],
    };
    assert_eq!(round_trip(&pdu), pdu);
}

#[test]
fn associate_ac_round_trip() {
    let pdu = Pdu::AssociationAC {
        protocol_version: 1,
        calling_ae_title: "STORE-SCU".to_string(),
        called_ae_title: "MAIN-PACS".to_string(),
        application_context_name: "1.2.840.10008.3.1.1.1".to_string(),
        presentation_contexts: vec![PresentationContextResult {
            id: 1,
            reason: PresentationContextResultReason::Acceptance,
            transfer_syntax: "1.2.840.10008.1.2.1".to_string(),
        }],
        user_variables: vec![UserVariableItem::MaxLength(32768)],
    };
    assert_eq!(round_trip(&pdu), pdu);
}

#[test]
fn associate_rj_round_trip() {
    let pdu = Pdu::AssociationRJ {
        result: AssociationRJResult::Permanent,
        source: AssociationRJSource::ServiceUser(
            AssociationRJServiceUserReason::CalledAETitleNotRecognized,
        ),
    };
    assert_eq!(round_trip(&pdu), pdu);
}

#[test]
fn pdata_round_trip() {
    let pdu = Pdu::PData {
        data: vec![
            PDataValue {
                presentation_context_id: 1,
                value_type: PDataValueType::Command,
                is_last: true,
                data: vec![0x01, 0x02, 0x03, 0x04],
            },
            PDataValue {
                presentation_context_id: 1,
                value_type: PDataValueType::Data,
                is_last: false,
                data: vec![0xAA; 64],
            },
        ],
    };
    assert_eq!(round_trip(&pdu), pdu);
}

#[test]
fn release_and_abort_round_trip() {
    assert_eq!(round_trip(&Pdu::ReleaseRQ), Pdu::ReleaseRQ);
    assert_eq!(round_trip(&Pdu::ReleaseRP), Pdu::ReleaseRP);
    let abort = Pdu::AbortRQ {
        source: AbortSource::ServiceProvider(AbortServiceProviderReason::UnexpectedPdu),
    };
    assert_eq!(round_trip(&abort), abort);
}

#[test]
fn release_pdus_match_fixed_encoding() {
    let mut bytes = Vec::new();
    write_pdu(&mut bytes, &Pdu::ReleaseRQ).unwrap();
    assert_eq!(
        bytes,
        vec![0x05, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00]
    );
}

#[test]
fn unknown_pdu_type_is_an_error() {
    let bytes = [0x09u8, 0x00, 0x00, 0x00, 0x00, 0x00];
    assert_matches!(
        read_pdu(&bytes),
        Err(reader::Error::UnknownPduType { pdu_type: 0x09 })
    );
}
