//! End-to-end scenarios against the assembled engine,
//! driven through the byte-stream interface a transport would use.

use pacs_core::dictionary::tags;
use pacs_core::{DataElement, Dataset, PrimitiveValue, Value, VR};
use pacs_dimse::{CommandField, CommandSet, Priority, Status};
use pacs_encoding::encode::implicit_le::ImplicitVRLittleEndianEncoder;
use pacs_encoding::encode::Encode;
use pacs_engine::{
    BlobStore, EngineConfig, MemoryBlobStore, MoveDestination, PacsEngine, SendFn,
};
use pacs_index::IndexDatabase;
use pacs_ul::framer::{fragment_message, PduStream, PdvEvent, PdvReassembler};
use pacs_ul::pdu::{
    PDataValue, PDataValueType, Pdu, PresentationContextProposed, UserVariableItem,
};
use pacs_ul::{read_pdu, write_pdu};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

const VERIFICATION: &str = "1.2.840.10008.1.1";
const CT_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
const STUDY_ROOT_FIND: &str = "1.2.840.10008.5.1.4.1.2.2.1";
const STUDY_ROOT_MOVE: &str = "1.2.840.10008.5.1.4.1.2.2.2";
const IMPLICIT_LE: &str = "1.2.840.10008.1.2";

/// A peer driving the engine through its transport interface.
struct TestPeer {
    engine: PacsEngine,
    session_id: u64,
    outbound: Arc<Mutex<Vec<u8>>>,
    stream: PduStream,
}

impl TestPeer {
    fn new(engine: PacsEngine) -> Self {
        let outbound: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&outbound);
        let send_fn: SendFn = Arc::new(move |bytes: &[u8]| {
            sink.lock().extend_from_slice(bytes);
            Ok(())
        });
        let session_id = engine.open_session(send_fn);
        TestPeer {
            engine,
            session_id,
            outbound,
            stream: PduStream::new(131_072),
        }
    }

    fn send(&self, pdu: &Pdu) {
        let mut bytes = Vec::new();
        write_pdu(&mut bytes, pdu).unwrap();
        self.engine.on_bytes_received(self.session_id, bytes);
    }

    /// Wait for the next PDU from the engine.
    fn next_pdu(&mut self) -> Pdu {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            {
                let mut outbound = self.outbound.lock();
                if !outbound.is_empty() {
                    self.stream.push(&outbound);
                    outbound.clear();
                }
            }
            if let Some(raw) = self.stream.next_pdu().unwrap() {
                return read_pdu(&raw).unwrap();
            }
            assert!(Instant::now() < deadline, "timed out waiting for a PDU");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Wait for the next complete DIMSE response.
    fn next_response(&mut self, reassembler: &mut PdvReassembler) -> (CommandSet, Option<Vec<u8>>) {
        let mut command: Option<CommandSet> = None;
        loop {
            match self.next_pdu() {
                Pdu::PData { data } => {
                    for pdv in data {
                        match reassembler.push(pdv).unwrap() {
                            Some(PdvEvent::Command { data, .. }) => {
                                let command_set = CommandSet::decode(&data).unwrap();
                                if command_set.has_dataset {
                                    command = Some(command_set);
                                } else {
                                    return (command_set, None);
                                }
                            }
                            Some(PdvEvent::Dataset { data, .. }) => {
                                return (command.take().expect("dataset before command"), Some(data));
                            }
                            None => {}
                        }
                    }
                }
                other => panic!("expected P-DATA-TF, got {:?}", other),
            }
        }
    }

    fn associate(&mut self, abstract_syntax: &str, max_pdu: u32) -> u8 {
        self.send(&Pdu::AssociationRQ {
            protocol_version: 1,
            calling_ae_title: "TEST-SCU".to_string(),
            called_ae_title: "PACS-RS".to_string(),
            application_context_name: "1.2.840.10008.3.1.1.1".to_string(),
            presentation_contexts: vec![PresentationContextProposed {
                id: 1,
                abstract_syntax: abstract_syntax.to_string(),
                transfer_syntaxes: vec![IMPLICIT_LE.to_string()],
            }],
            user_variables: vec![UserVariableItem::MaxLength(max_pdu)],
        });
        match self.next_pdu() {
            Pdu::AssociationAC {
                presentation_contexts,
                ..
            } => {
                assert_eq!(presentation_contexts.len(), 1);
                presentation_contexts[0].id
            }
            other => panic!("expected A-ASSOCIATE-AC, got {:?}", other),
        }
    }

    fn send_message(&self, context_id: u8, command: &CommandSet, dataset: Option<&[u8]>) {
        let command_bytes = command.encode().unwrap();
        for pdu in fragment_message(context_id, &command_bytes, dataset, 4096) {
            self.send(&pdu);
        }
    }

    fn release(&mut self) {
        self.send(&Pdu::ReleaseRQ);
        assert_eq!(self.next_pdu(), Pdu::ReleaseRP);
    }
}

fn engine_fixture() -> (PacsEngine, Arc<IndexDatabase>, Arc<MemoryBlobStore>) {
    let index = Arc::new(IndexDatabase::open_in_memory().unwrap());
    let blob = Arc::new(MemoryBlobStore::new());
    let engine = PacsEngine::new(
        EngineConfig::default(),
        Arc::clone(&index),
        Arc::clone(&blob) as Arc<dyn BlobStore>,
    );
    (engine, index, blob)
}

#[test]
fn echo_round_trip() {
    let (engine, _index, _blob) = engine_fixture();
    let mut peer = TestPeer::new(engine);
    let context_id = peer.associate(VERIFICATION, 16384);

    peer.send_message(
        context_id,
        &CommandSet {
            command_field: Some(CommandField::CEchoRq),
            affected_sop_class_uid: Some(VERIFICATION.to_string()),
            message_id: Some(1),
            priority: Some(Priority::Medium),
            has_dataset: false,
            ..CommandSet::default()
        },
        None,
    );

    let mut reassembler = PdvReassembler::new();
    let (response, dataset) = peer.next_response(&mut reassembler);
    assert_eq!(response.command_field, Some(CommandField::CEchoRsp));
    assert_eq!(response.status, Some(Status::SUCCESS));
    assert_eq!(response.message_id_being_responded_to, Some(1));
    assert!(dataset.is_none());

    peer.release();
}

fn sample_instance(pixel_bytes: usize) -> Dataset {
    let mut ds = Dataset::new();
    ds.put_str(tags::SOP_CLASS_UID, VR::UI, CT_STORAGE);
    ds.put_str(tags::SOP_INSTANCE_UID, VR::UI, "1.2.3.4.100");
    ds.put_str(tags::STUDY_DATE, VR::DA, "20240115");
    ds.put_str(tags::MODALITY, VR::CS, "CT");
    ds.put_str(tags::PATIENT_NAME, VR::PN, "DOE^JANE");
    ds.put_str(tags::PATIENT_ID, VR::LO, "PAT777");
    ds.put_str(tags::STUDY_INSTANCE_UID, VR::UI, "1.2.3.4");
    ds.put_str(tags::SERIES_INSTANCE_UID, VR::UI, "1.2.3.4.1");
    ds.put_str(tags::INSTANCE_NUMBER, VR::IS, "1");
    ds.put(DataElement::new(
        tags::PIXEL_DATA,
        VR::OW,
        Value::Primitive(PrimitiveValue::Bytes(vec![0x5A; pixel_bytes])),
    ));
    ds
}

#[test]
fn store_with_fragmentation_commits_blob_and_index() {
    let (engine, index, blob) = engine_fixture();
    let mut peer = TestPeer::new(engine);
    let context_id = peer.associate(CT_STORAGE, 4096);

    // the encoded data set spans multiple 4096-byte PDUs
    let dataset = sample_instance(11_000);
    let dataset_bytes = ImplicitVRLittleEndianEncoder.encode_dataset(&dataset).unwrap();
    assert!(dataset_bytes.len() > 8_000);

    peer.send_message(
        context_id,
        &CommandSet {
            command_field: Some(CommandField::CStoreRq),
            affected_sop_class_uid: Some(CT_STORAGE.to_string()),
            affected_sop_instance_uid: Some("1.2.3.4.100".to_string()),
            message_id: Some(7),
            priority: Some(Priority::Medium),
            has_dataset: true,
            ..CommandSet::default()
        },
        Some(&dataset_bytes),
    );

    let mut reassembler = PdvReassembler::new();
    let (response, _) = peer.next_response(&mut reassembler);
    assert_eq!(response.command_field, Some(CommandField::CStoreRsp));
    assert_eq!(response.status, Some(Status::SUCCESS));
    assert_eq!(response.message_id_being_responded_to, Some(7));

    // stored bytes and index row match what was sent
    assert_eq!(blob.get("1.2.3.4.100").unwrap(), dataset_bytes);
    let rows = index
        .find_instances(&pacs_index::query::InstanceQuery {
            sop_instance_uid: "1.2.3.4.100".to_string(),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].series_uid, "1.2.3.4.1");
    assert_eq!(rows[0].transfer_syntax_uid, IMPLICIT_LE);

    peer.release();
}

fn populate_three_studies(index: &IndexDatabase) {
    use pacs_index::records::*;
    let patient = PatientRecord {
        patient_id: "12345".into(),
        name: "DOE^JOHN".into(),
        ..Default::default()
    };
    for n in 1..=3 {
        let study = StudyRecord {
            study_uid: format!("1.2.3.{}", n),
            patient_id: "12345".into(),
            study_date: format!("202401{:02}", n + 10),
            ..Default::default()
        };
        let series = SeriesRecord {
            series_uid: format!("1.2.3.{}.1", n),
            study_uid: study.study_uid.clone(),
            modality: "CT".into(),
            ..Default::default()
        };
        let instance = InstanceRecord {
            sop_instance_uid: format!("1.2.3.{}.1.1", n),
            series_uid: series.series_uid.clone(),
            sop_class_uid: CT_STORAGE.into(),
            transfer_syntax_uid: IMPLICIT_LE.into(),
            ..Default::default()
        };
        index.ingest(&patient, &study, &series, &instance).unwrap();
    }
}

fn study_query_identifier() -> Vec<u8> {
    let mut identifier = Dataset::new();
    identifier.put_str(tags::QUERY_RETRIEVE_LEVEL, VR::CS, "STUDY");
    identifier.put_str(tags::PATIENT_ID, VR::LO, "12345");
    identifier.put_str(tags::STUDY_DATE, VR::DA, "20240101-20240131");
    identifier.put_str(tags::PATIENT_NAME, VR::PN, "");
    identifier.put_str(tags::STUDY_INSTANCE_UID, VR::UI, "");
    ImplicitVRLittleEndianEncoder.encode_dataset(&identifier).unwrap()
}

#[test]
fn find_with_wildcards_and_caching() {
    let (engine, index, _blob) = engine_fixture();
    populate_three_studies(&index);
    let mut peer = TestPeer::new(engine);
    let context_id = peer.associate(STUDY_ROOT_FIND, 16384);

    let find_rq = |message_id: u16| CommandSet {
        command_field: Some(CommandField::CFindRq),
        affected_sop_class_uid: Some(STUDY_ROOT_FIND.to_string()),
        message_id: Some(message_id),
        priority: Some(Priority::Medium),
        has_dataset: true,
        ..CommandSet::default()
    };

    let mut reassembler = PdvReassembler::new();

    // first call: three pending responses with a populated
    // PatientName, then the final success
    peer.send_message(context_id, &find_rq(1), Some(&study_query_identifier()));
    let mut study_uids = Vec::new();
    for _ in 0..3 {
        let (response, dataset) = peer.next_response(&mut reassembler);
        assert_eq!(response.status, Some(Status::PENDING));
        let identifier = pacs_encoding::TransferSyntax::ImplicitVRLittleEndian
            .decode_dataset(&dataset.expect("pending responses carry identifiers"))
            .unwrap();
        assert_eq!(identifier.get_str(tags::PATIENT_NAME), Some("DOE^JOHN"));
        study_uids.push(identifier.get_str(tags::STUDY_INSTANCE_UID).unwrap().to_string());
    }
    let (final_response, dataset) = peer.next_response(&mut reassembler);
    assert_eq!(final_response.status, Some(Status::SUCCESS));
    assert!(dataset.is_none());
    assert_eq!(study_uids, vec!["1.2.3.1", "1.2.3.2", "1.2.3.3"]);

    let stats = peer.engine.cache_stats();
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.insertions, 1);

    // an identical query within the TTL is served from the cache
    peer.send_message(context_id, &find_rq(2), Some(&study_query_identifier()));
    let mut cached_uids = Vec::new();
    for _ in 0..3 {
        let (response, dataset) = peer.next_response(&mut reassembler);
        assert_eq!(response.status, Some(Status::PENDING));
        let identifier = pacs_encoding::TransferSyntax::ImplicitVRLittleEndian
            .decode_dataset(&dataset.unwrap())
            .unwrap();
        cached_uids.push(identifier.get_str(tags::STUDY_INSTANCE_UID).unwrap().to_string());
    }
    let (final_response, _) = peer.next_response(&mut reassembler);
    assert_eq!(final_response.status, Some(Status::SUCCESS));
    assert_eq!(cached_uids, study_uids);

    let stats = peer.engine.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);

    peer.release();
}

#[test]
fn unknown_sop_class_is_refused_in_negotiation() {
    let (engine, _index, _blob) = engine_fixture();
    let mut peer = TestPeer::new(engine);
    peer.send(&Pdu::AssociationRQ {
        protocol_version: 1,
        calling_ae_title: "TEST-SCU".to_string(),
        called_ae_title: "PACS-RS".to_string(),
        application_context_name: "1.2.840.10008.3.1.1.1".to_string(),
        presentation_contexts: vec![PresentationContextProposed {
            id: 1,
            // hanging protocol storage is not registered
            abstract_syntax: "1.2.840.10008.5.1.4.38.1".to_string(),
            transfer_syntaxes: vec![IMPLICIT_LE.to_string()],
        }],
        user_variables: vec![],
    });
    assert!(matches!(peer.next_pdu(), Pdu::AssociationRJ { .. }));
}

#[test]
fn aborted_session_produces_no_further_output() {
    let (engine, _index, _blob) = engine_fixture();
    let mut peer = TestPeer::new(engine);
    let context_id = peer.associate(VERIFICATION, 16384);

    let session_id = peer.session_id;
    peer.engine.on_connection_closed(session_id);
    assert_eq!(peer.engine.session_count(), 0);

    // echo after teardown: the bytes are dropped on the floor
    peer.send_message(
        context_id,
        &CommandSet {
            command_field: Some(CommandField::CEchoRq),
            affected_sop_class_uid: Some(VERIFICATION.to_string()),
            message_id: Some(9),
            has_dataset: false,
            ..CommandSet::default()
        },
        None,
    );
    std::thread::sleep(Duration::from_millis(200));
    assert!(peer.outbound.lock().is_empty());
}

/// A minimal destination SCP accepting store sub-operations,
/// built from the same upper layer primitives.
fn spawn_destination_scp() -> (std::net::SocketAddr, std::thread::JoinHandle<usize>) {
    use std::io::{Read, Write};

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = std::thread::spawn(move || {
        let mut stored = 0usize;
        // one association per sub-operation
        loop {
            let Ok((mut socket, _)) = listener.accept() else {
                return stored;
            };
            let mut stream = PduStream::new(131_072);
            let mut reassembler = PdvReassembler::new();
            let mut chunk = [0u8; 8192];
            let mut done = false;
            while !done {
                let n = match socket.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                stream.push(&chunk[..n]);
                while let Ok(Some(raw)) = stream.next_pdu() {
                    match read_pdu(&raw).unwrap() {
                        Pdu::AssociationRQ {
                            calling_ae_title,
                            called_ae_title,
                            application_context_name,
                            presentation_contexts,
                            ..
                        } => {
                            let response = Pdu::AssociationAC {
                                protocol_version: 1,
                                calling_ae_title,
                                called_ae_title,
                                application_context_name,
                                presentation_contexts: presentation_contexts
                                    .iter()
                                    .map(|pc| pacs_ul::pdu::PresentationContextResult {
                                        id: pc.id,
                                        reason:
                                            pacs_ul::pdu::PresentationContextResultReason::Acceptance,
                                        transfer_syntax: pc.transfer_syntaxes[0].clone(),
                                    })
                                    .collect(),
                                user_variables: vec![UserVariableItem::MaxLength(16384)],
                            };
                            let mut bytes = Vec::new();
                            write_pdu(&mut bytes, &response).unwrap();
                            socket.write_all(&bytes).unwrap();
                        }
                        Pdu::PData { data } => {
                            for pdv in data {
                                let context_id = pdv.presentation_context_id;
                                if let Some(event) = reassembler.push(pdv).unwrap() {
                                    if let PdvEvent::Dataset { .. } = event {
                                        stored += 1;
                                        let response = CommandSet {
                                            command_field: Some(CommandField::CStoreRsp),
                                            message_id_being_responded_to: Some(1),
                                            status: Some(Status::SUCCESS),
                                            has_dataset: false,
                                            ..CommandSet::default()
                                        };
                                        let bytes = response.encode().unwrap();
                                        let mut out = Vec::new();
                                        write_pdu(
                                            &mut out,
                                            &Pdu::PData {
                                                data: vec![PDataValue {
                                                    presentation_context_id: context_id,
                                                    value_type: PDataValueType::Command,
                                                    is_last: true,
                                                    data: bytes,
                                                }],
                                            },
                                        )
                                        .unwrap();
                                        socket.write_all(&out).unwrap();
                                    }
                                }
                            }
                        }
                        Pdu::ReleaseRQ => {
                            let mut bytes = Vec::new();
                            write_pdu(&mut bytes, &Pdu::ReleaseRP).unwrap();
                            socket.write_all(&bytes).unwrap();
                            done = true;
                        }
                        _ => {}
                    }
                }
            }
            if stored >= 3 {
                return stored;
            }
        }
    });
    (addr, handle)
}

#[test]
fn move_runs_store_sub_operations_with_counters() {
    let (addr, scp) = spawn_destination_scp();

    let index = Arc::new(IndexDatabase::open_in_memory().unwrap());
    populate_three_studies(&index);
    let blob = Arc::new(MemoryBlobStore::new());
    for n in 1..=3 {
        let instance = sample_instance(64);
        let bytes = ImplicitVRLittleEndianEncoder.encode_dataset(&instance).unwrap();
        blob.put(&format!("1.2.3.{}.1.1", n), IMPLICIT_LE, &bytes).unwrap();
    }

    let config = EngineConfig {
        move_destinations: vec![MoveDestination {
            ae_title: "DEST".to_string(),
            host: addr.ip().to_string(),
            port: addr.port(),
        }],
        ..EngineConfig::default()
    };
    let engine = PacsEngine::new(config, Arc::clone(&index), blob as Arc<dyn BlobStore>);
    let mut peer = TestPeer::new(engine);
    let context_id = peer.associate(STUDY_ROOT_MOVE, 16384);

    let mut identifier = Dataset::new();
    identifier.put_str(tags::QUERY_RETRIEVE_LEVEL, VR::CS, "STUDY");
    identifier.put_str(tags::STUDY_INSTANCE_UID, VR::UI, "1.2.3.*");
    let identifier_bytes = ImplicitVRLittleEndianEncoder.encode_dataset(&identifier).unwrap();

    peer.send_message(
        context_id,
        &CommandSet {
            command_field: Some(CommandField::CMoveRq),
            affected_sop_class_uid: Some(STUDY_ROOT_MOVE.to_string()),
            message_id: Some(4),
            priority: Some(Priority::Medium),
            move_destination: Some("DEST".to_string()),
            has_dataset: true,
            ..CommandSet::default()
        },
        Some(&identifier_bytes),
    );

    let mut reassembler = PdvReassembler::new();
    let mut counters = Vec::new();
    loop {
        let (response, _) = peer.next_response(&mut reassembler);
        let sub = response.sub_operations.expect("move responses carry counters");
        counters.push((sub.remaining, sub.completed, sub.failed, sub.warning));
        if response.status != Some(Status::PENDING) {
            assert_eq!(response.status, Some(Status::SUCCESS));
            break;
        }
    }
    assert_eq!(
        counters,
        vec![
            (Some(2), 1, 0, 0),
            (Some(1), 2, 0, 0),
            (Some(0), 3, 0, 0),
            (None, 3, 0, 0),
        ]
    );

    peer.release();
    assert_eq!(scp.join().unwrap(), 3);
}

#[test]
fn mpps_illegal_transition_through_the_pipeline() {
    let (engine, index, _blob) = engine_fixture();
    let mut peer = TestPeer::new(engine);
    let context_id = peer.associate("1.2.840.10008.3.1.2.3.3", 16384);

    let mut create_attrs = Dataset::new();
    create_attrs.put_str(tags::MODALITY, VR::CS, "CT");
    create_attrs.put_str(tags::PERFORMED_STATION_AE_TITLE, VR::AE, "CT01");
    let create_bytes = ImplicitVRLittleEndianEncoder.encode_dataset(&create_attrs).unwrap();

    let mut reassembler = PdvReassembler::new();

    peer.send_message(
        context_id,
        &CommandSet {
            command_field: Some(CommandField::NCreateRq),
            affected_sop_class_uid: Some("1.2.840.10008.3.1.2.3.3".to_string()),
            affected_sop_instance_uid: Some("1.2.3".to_string()),
            message_id: Some(1),
            has_dataset: true,
            ..CommandSet::default()
        },
        Some(&create_bytes),
    );
    let (response, _) = peer.next_response(&mut reassembler);
    assert_eq!(response.status, Some(Status::SUCCESS));

    let set = |status: &str| {
        let mut attrs = Dataset::new();
        attrs.put_str(tags::PERFORMED_PROCEDURE_STEP_STATUS, VR::CS, status);
        ImplicitVRLittleEndianEncoder.encode_dataset(&attrs).unwrap()
    };

    peer.send_message(
        context_id,
        &CommandSet {
            command_field: Some(CommandField::NSetRq),
            requested_sop_class_uid: Some("1.2.840.10008.3.1.2.3.3".to_string()),
            requested_sop_instance_uid: Some("1.2.3".to_string()),
            message_id: Some(2),
            has_dataset: true,
            ..CommandSet::default()
        },
        Some(&set("COMPLETED")),
    );
    let (response, _) = peer.next_response(&mut reassembler);
    assert_eq!(response.status, Some(Status::SUCCESS));

    // a second N-SET back to IN PROGRESS is refused and the stored
    // state stays COMPLETED
    peer.send_message(
        context_id,
        &CommandSet {
            command_field: Some(CommandField::NSetRq),
            requested_sop_class_uid: Some("1.2.840.10008.3.1.2.3.3".to_string()),
            requested_sop_instance_uid: Some("1.2.3".to_string()),
            message_id: Some(3),
            has_dataset: true,
            ..CommandSet::default()
        },
        Some(&set("IN PROGRESS")),
    );
    let (response, _) = peer.next_response(&mut reassembler);
    assert_eq!(response.status, Some(Status::UNABLE_TO_PROCESS));
    assert_eq!(
        index.get_mpps("1.2.3").unwrap().unwrap().state,
        pacs_index::records::MppsState::Completed
    );

    peer.release();
}
