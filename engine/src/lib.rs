//! The DIMSE protocol engine.
//!
//! Bytes handed up by the transport flow through six typed stages
//! (receive, PDU decode, DIMSE process, execute, response encode,
//! send); at the execute stage a handler registry serves the DIMSE
//! services against the index database, the blob store and the query
//! cache. The engine owns no sockets: hosts feed
//! [`PacsEngine::on_bytes_received`] and receive outbound buffers
//! through the per-session send callback.

pub mod blob;
pub mod cache;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod pipeline;
pub mod session;
pub mod uids;

pub use blob::{BlobStore, FileBlobStore, MemoryBlobStore};
pub use cache::{canonical_key, CacheStats, QueryCache};
pub use error::{EngineError, HandlerError};
pub use handlers::FindCache;
pub use metrics::PipelineMetrics;
pub use pipeline::{BackpressurePolicy, JobCategory, PipelineConfig, SendFn, Stage};

use crate::dispatch::HandlerRegistry;
use crate::error::*;
use crate::handlers::{StoreSender, StoreTarget};
use crate::pipeline::{DimseEvent, JobContext, PipelineCoordinator, PipelineJob};
use crate::session::{PendingCommand, SessionContext, SessionRegistry};
use pacs_dimse::{CommandField, CommandSet, ServiceRequest, Status};
use pacs_index::records::InstanceRecord;
use pacs_index::IndexDatabase;
use pacs_ul::association::client::{ClientAssociation, RequestorOptions};
use pacs_ul::association::{provider_abort_pdu, AcceptorOptions};
use pacs_ul::framer::{fragment_message, PdvEvent};
use pacs_ul::pdu::{PDataValueType, Pdu};
use pacs_ul::{read_pdu, write_pdu};
use snafu::ResultExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A C-MOVE destination application entity.
#[derive(Debug, Clone)]
pub struct MoveDestination {
    pub ae_title: String,
    pub host: String,
    pub port: u16,
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// this node's AE title
    pub ae_title: String,
    /// negotiation upper bound, clamped to the standard minimum
    pub max_pdu_length: u32,
    /// seconds of silence before an association is aborted
    pub idle_timeout: Duration,
    /// query cache entry bound
    pub cache_capacity: usize,
    /// query cache time-to-live
    pub cache_ttl: Duration,
    /// worker pools, queue bounds and backpressure policies
    pub pipeline: PipelineConfig,
    /// supported transfer syntaxes, in preference order
    pub transfer_syntaxes: Vec<String>,
    /// accept abstract syntaxes without a registered handler
    pub promiscuous: bool,
    /// known C-MOVE destinations
    pub move_destinations: Vec<MoveDestination>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            ae_title: "PACS-RS".to_string(),
            max_pdu_length: pacs_ul::pdu::DEFAULT_MAX_PDU,
            idle_timeout: Duration::from_secs(60),
            cache_capacity: 1000,
            cache_ttl: Duration::from_secs(300),
            pipeline: PipelineConfig::default(),
            transfer_syntaxes: vec![
                "1.2.840.10008.1.2.1".to_string(),
                "1.2.840.10008.1.2".to_string(),
                "1.2.840.10008.1.2.2".to_string(),
            ],
            promiscuous: false,
            move_destinations: Vec::new(),
        }
    }
}

/// The assembled protocol engine.
pub struct PacsEngine {
    core: Arc<EngineCore>,
    coordinator: Arc<PipelineCoordinator>,
    sweeper: Option<(crossbeam_channel::Sender<()>, std::thread::JoinHandle<()>)>,
}

impl PacsEngine {
    /// Assemble the engine around an index database and a blob store,
    /// start the stage workers and the idle sweeper.
    pub fn new(config: EngineConfig, index: Arc<IndexDatabase>, blob: Arc<dyn BlobStore>) -> Self {
        let mut config = config;
        config.max_pdu_length = config
            .max_pdu_length
            .max(pacs_ul::pdu::MINIMUM_PDU_SIZE);

        let metrics = Arc::new(PipelineMetrics::new());
        let coordinator = PipelineCoordinator::new(&config.pipeline, Arc::clone(&metrics));
        let sessions = Arc::new(SessionRegistry::new());
        let cache = Arc::new(FindCache::new(config.cache_capacity, config.cache_ttl));

        let sender = Arc::new(EngineStoreSender {
            blob: Arc::clone(&blob),
            sessions: Arc::clone(&sessions),
            coordinator: Arc::clone(&coordinator),
            destinations: config.move_destinations.clone(),
            local_ae_title: config.ae_title.clone(),
            max_pdu_length: config.max_pdu_length,
        });

        let registry = handlers::default_registry(
            Arc::clone(&index),
            blob,
            Arc::clone(&cache),
            sender,
        );

        let acceptor = AcceptorOptions {
            ae_title: config.ae_title.clone(),
            abstract_syntaxes: registry.abstract_syntaxes(),
            transfer_syntaxes: config.transfer_syntaxes.clone(),
            max_pdu_length: config.max_pdu_length,
            promiscuous: config.promiscuous,
        };

        let core = Arc::new(EngineCore {
            acceptor,
            sessions,
            registry,
            cache,
            metrics,
            coordinator: Arc::clone(&coordinator),
            max_pdu_length: config.max_pdu_length,
        });

        coordinator.start(Arc::clone(&core) as Arc<dyn pipeline::StageExecutor>);

        // the idle sweeper aborts sessions that stay silent too long
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let sweeper_core = Arc::clone(&core);
        let idle_timeout = config.idle_timeout;
        let sweeper = std::thread::Builder::new()
            .name("idle-sweeper".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(Duration::from_secs(1)) {
                    Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                        for session in sweeper_core.sessions.sweep_idle(idle_timeout) {
                            info!(session_id = session.id, "aborting idle session");
                            sweeper_core.abort_session(&session);
                        }
                        let expired = sweeper_core.cache.purge_expired();
                        if expired > 0 {
                            debug!(expired, "purged expired query cache entries");
                        }
                    }
                }
            })
            .expect("sweeper thread spawn");

        PacsEngine {
            core,
            coordinator,
            sweeper: Some((stop_tx, sweeper)),
        }
    }

    /// Register a new session around the transport send callback;
    /// returns the session id for subsequent calls.
    pub fn open_session(&self, send_fn: SendFn) -> u64 {
        self.core
            .sessions
            .register(self.core.max_pdu_length, send_fn)
            .id
    }

    /// Feed bytes received from the transport for a session.
    pub fn on_bytes_received(&self, session_id: u64, bytes: Vec<u8>) {
        let Some(session) = self.core.sessions.lookup(session_id) else {
            debug!(session_id, "bytes for unknown session dropped");
            return;
        };
        session.touch();
        let ctx = self.core.job_context(&session, 0, JobCategory::Other);
        if let Err(error) = self.coordinator.submit_to_stage(
            Stage::NetworkReceive,
            ctx,
            PipelineJob::ReceiveBytes { bytes },
        ) {
            warn!(session_id, %error, "could not accept inbound bytes");
        }
    }

    /// The transport saw the connection close.
    pub fn on_connection_closed(&self, session_id: u64) {
        if let Some(session) = self.core.sessions.lookup(session_id) {
            session.cancel();
            self.core.sessions.unregister(session_id);
        }
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.core.sessions.count()
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.core.metrics
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.core.cache.stats()
    }

    /// Stop the stage workers and the sweeper, draining the queues.
    pub fn shutdown(&mut self) {
        if let Some((stop_tx, handle)) = self.sweeper.take() {
            let _ = stop_tx.send(());
            let _ = handle.join();
        }
        self.coordinator.shutdown();
    }
}

impl Drop for PacsEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Shared engine internals; implements the per-stage logic.
struct EngineCore {
    acceptor: AcceptorOptions,
    sessions: Arc<SessionRegistry>,
    registry: HandlerRegistry,
    cache: Arc<FindCache>,
    metrics: Arc<PipelineMetrics>,
    coordinator: Arc<PipelineCoordinator>,
    max_pdu_length: u32,
}

/// The DIMSE category of a command field.
fn category_of(command: CommandField) -> JobCategory {
    match command {
        CommandField::CEchoRq | CommandField::CEchoRsp => JobCategory::Echo,
        CommandField::CStoreRq | CommandField::CStoreRsp => JobCategory::Store,
        CommandField::CFindRq | CommandField::CFindRsp => JobCategory::Find,
        CommandField::CGetRq | CommandField::CGetRsp => JobCategory::Get,
        CommandField::CMoveRq | CommandField::CMoveRsp => JobCategory::Move,
        CommandField::CCancelRq => JobCategory::Other,
        _ => JobCategory::NService,
    }
}

impl EngineCore {
    fn job_context(
        &self,
        session: &SessionContext,
        message_id: u16,
        category: JobCategory,
    ) -> JobContext {
        JobContext {
            job_id: self.coordinator.generate_job_id(),
            session_id: session.id,
            message_id,
            category,
            enqueued_at: Instant::now(),
            cancelled: Arc::clone(&session.cancelled),
        }
    }

    fn submit(
        &self,
        stage: Stage,
        ctx: JobContext,
        job: PipelineJob,
    ) -> Result<(), EngineError> {
        self.coordinator
            .submit_to_stage(stage, ctx, job)
            .context(SubmitSnafu)
    }

    /// Serialize a PDU and queue it on the session's send lane.
    fn send_pdu(
        &self,
        session: &SessionContext,
        ctx: &JobContext,
        pdu: &Pdu,
        then_close: bool,
    ) -> Result<(), EngineError> {
        let mut bytes = Vec::new();
        write_pdu(&mut bytes, pdu).context(PduWriteSnafu)?;
        self.submit(
            Stage::NetworkSend,
            ctx.clone(),
            PipelineJob::SendBytes {
                bytes,
                send_fn: Arc::clone(&session.send_fn),
                then_close,
            },
        )
    }

    /// Abort a session: best-effort A-ABORT to the peer, cancel every
    /// in-flight job, tear down the state.
    fn abort_session(&self, session: &SessionContext) {
        session.cancel();
        let mut bytes = Vec::new();
        if write_pdu(&mut bytes, &provider_abort_pdu()).is_ok() {
            let _ = (session.send_fn)(&bytes);
        }
        session.association.lock().abort();
        self.sessions.unregister(session.id);
    }

    fn session(&self, session_id: u64) -> Result<Arc<SessionContext>, EngineError> {
        self.sessions
            .lookup(session_id)
            .ok_or(EngineError::UnknownSession { session_id })
    }

    // ---- stage bodies -------------------------------------------------

    fn network_receive(&self, ctx: &JobContext, bytes: Vec<u8>) -> Result<(), EngineError> {
        self.submit(
            Stage::PduDecode,
            ctx.clone(),
            PipelineJob::DecodePdu { bytes },
        )
    }

    /// Frame PDUs out of the session buffer and turn complete
    /// messages into DIMSE events. A parse failure aborts the
    /// association.
    fn pdu_decode(&self, ctx: &JobContext, bytes: Vec<u8>) -> Result<(), EngineError> {
        let session = self.session(ctx.session_id)?;
        session.stream.lock().push(&bytes);

        loop {
            let raw = {
                let mut stream = session.stream.lock();
                match stream.next_pdu() {
                    Ok(Some(raw)) => raw,
                    Ok(None) => return Ok(()),
                    Err(e) => {
                        self.abort_session(&session);
                        return Err(e).context(FramingSnafu);
                    }
                }
            };

            let pdu = match read_pdu(&raw) {
                Ok(pdu) => pdu,
                Err(e) => {
                    self.abort_session(&session);
                    return Err(e).context(PduParseSnafu);
                }
            };

            match pdu {
                Pdu::PData { data } => {
                    if let Err(e) = session.association.lock().on_pdata() {
                        self.abort_session(&session);
                        return Err(e).context(AssociationViolationSnafu);
                    }
                    for pdv in data {
                        if let Err(e) = self.on_pdv(&session, ctx, pdv) {
                            self.abort_session(&session);
                            return Err(e);
                        }
                    }
                }
                control => {
                    let ctx = self.job_context(&session, ctx.message_id, JobCategory::Association);
                    self.submit(
                        Stage::DimseProcess,
                        ctx,
                        PipelineJob::ProcessDimse {
                            event: DimseEvent::Control { pdu: control },
                        },
                    )?;
                }
            }
        }
    }

    /// Run one PDV through reassembly; emit a DIMSE message job when
    /// the command set (and its data set, when signalled) completes.
    fn on_pdv(
        &self,
        session: &Arc<SessionContext>,
        ctx: &JobContext,
        pdv: pacs_ul::pdu::PDataValue,
    ) -> Result<(), EngineError> {
        let event = session
            .reassembler
            .lock()
            .push(pdv)
            .context(FramingSnafu)?;

        match event {
            None => Ok(()),
            Some(PdvEvent::Command { context_id, data }) => {
                let command_set = CommandSet::decode(&data).context(CommandSetSnafu)?;
                if command_set.has_dataset {
                    *session.pending_command.lock() = Some(PendingCommand {
                        context_id,
                        command_set,
                        command_bytes: data,
                    });
                    Ok(())
                } else {
                    self.emit_message(session, ctx, context_id, command_set, data, None)
                }
            }
            Some(PdvEvent::Dataset { context_id, data }) => {
                let pending = session.pending_command.lock().take();
                match pending {
                    Some(pending) if pending.context_id == context_id => self.emit_message(
                        session,
                        ctx,
                        context_id,
                        pending.command_set,
                        pending.command_bytes,
                        Some(data),
                    ),
                    _ => Err(EngineError::UnknownPresentationContext { context_id }),
                }
            }
        }
    }

    fn emit_message(
        &self,
        session: &Arc<SessionContext>,
        _ctx: &JobContext,
        context_id: u8,
        command_set: CommandSet,
        command_bytes: Vec<u8>,
        dataset: Option<Vec<u8>>,
    ) -> Result<(), EngineError> {
        let command = command_set.require_command_field().context(CommandSetSnafu)?;
        let message_id = command_set.message_id.unwrap_or(0);
        let ctx = self.job_context(session, message_id, category_of(command));
        self.submit(
            Stage::DimseProcess,
            ctx,
            PipelineJob::ProcessDimse {
                event: DimseEvent::Message {
                    context_id,
                    command_set,
                    command_bytes,
                    dataset,
                },
            },
        )
    }

    /// Association control and request classification.
    fn dimse_process(&self, ctx: &JobContext, event: DimseEvent) -> Result<(), EngineError> {
        let session = self.session(ctx.session_id)?;
        match event {
            DimseEvent::Control { pdu } => match &pdu {
                Pdu::AssociationRQ {
                    calling_ae_title, ..
                } => {
                    *session.calling_ae_title.lock() = calling_ae_title.clone();
                    let response = session
                        .association
                        .lock()
                        .on_associate_rq(&self.acceptor, &pdu)
                        .context(AssociationViolationSnafu)?;
                    let rejected = matches!(response, Pdu::AssociationRJ { .. });
                    self.send_pdu(&session, ctx, &response, rejected)?;
                    if rejected {
                        debug!(session_id = session.id, "association rejected");
                    } else {
                        info!(
                            session_id = session.id,
                            calling_ae_title = %calling_ae_title,
                            "association established"
                        );
                    }
                    Ok(())
                }
                Pdu::ReleaseRQ => {
                    let response = session
                        .association
                        .lock()
                        .on_release_rq()
                        .context(AssociationViolationSnafu)?;
                    // the release reply rides the same send lane, so
                    // every pending response leaves first
                    self.send_pdu(&session, ctx, &response, true)
                }
                Pdu::AbortRQ { .. } => {
                    debug!(session_id = session.id, "peer aborted association");
                    session.cancel();
                    session.association.lock().abort();
                    self.sessions.unregister(session.id);
                    Ok(())
                }
                _ => {
                    self.abort_session(&session);
                    Ok(())
                }
            },
            DimseEvent::Message {
                context_id,
                command_set,
                command_bytes,
                dataset,
            } => {
                let command = command_set.require_command_field().context(CommandSetSnafu)?;
                if command.is_response() || command == CommandField::CCancelRq {
                    // responses belong to the requestor role
                    return Ok(());
                }

                let (transfer_syntax, calling_ae_title) = {
                    let association = session.association.lock();
                    let context = association
                        .context(context_id)
                        .ok_or(EngineError::UnknownPresentationContext { context_id })?;
                    (
                        context.transfer_syntax.clone(),
                        session.calling_ae_title.lock().clone(),
                    )
                };

                let request = ServiceRequest::from_command(
                    &command_set,
                    session.id,
                    context_id,
                    transfer_syntax,
                    calling_ae_title,
                    command_bytes,
                    dataset,
                )
                .context(CommandSetSnafu)?;

                let ctx = self.job_context(&session, request.message_id, category_of(command));
                self.submit(Stage::Execute, ctx, PipelineJob::Execute { request })
            }
        }
    }

    /// Dispatch to the registered handler and fan responses out to
    /// the encode stage.
    fn execute_request(&self, ctx: &JobContext, request: ServiceRequest) -> Result<(), EngineError> {
        let started = Instant::now();
        let category = ctx.category;
        let mut ok = true;

        for result in self.registry.dispatch(request) {
            if ctx.cancelled.load(std::sync::atomic::Ordering::Acquire) {
                ok = false;
                break;
            }
            if result.status.is_failure() {
                ok = false;
            }
            let result_ctx = JobContext {
                job_id: self.coordinator.generate_job_id(),
                ..ctx.clone()
            };
            self.submit(
                Stage::ResponseEncode,
                result_ctx,
                PipelineJob::EncodeResponse { result },
            )?;
        }

        self.metrics
            .record_operation(category, started.elapsed().as_nanos() as u64, ok);
        Ok(())
    }

    /// Serialize one service result and fragment it into PDUs.
    fn response_encode(
        &self,
        ctx: &JobContext,
        result: pacs_dimse::ServiceResult,
    ) -> Result<(), EngineError> {
        let session = self.session(ctx.session_id)?;
        let command_bytes = result.to_command_set().encode().context(CommandSetSnafu)?;
        let max_pdu_length = session.max_pdu_length();

        for pdu in fragment_message(
            result.context_id,
            &command_bytes,
            result.dataset.as_deref(),
            max_pdu_length,
        ) {
            self.send_pdu(&session, ctx, &pdu, false)?;
        }
        Ok(())
    }

    /// Hand one buffer to the transport; a send failure aborts the
    /// session.
    fn network_send(
        &self,
        ctx: &JobContext,
        bytes: Vec<u8>,
        send_fn: SendFn,
        then_close: bool,
    ) -> Result<(), EngineError> {
        if let Err(e) = send_fn(&bytes) {
            if let Ok(session) = self.session(ctx.session_id) {
                warn!(session_id = ctx.session_id, error = %e, "transport send failed");
                self.abort_session(&session);
            }
            return Err(e).context(TransportSnafu);
        }
        if then_close {
            if let Some(session) = self.sessions.lookup(ctx.session_id) {
                session.association.lock().released();
                self.sessions.unregister(session.id);
                debug!(session_id = ctx.session_id, "association released");
            }
        }
        Ok(())
    }
}

impl pipeline::StageExecutor for EngineCore {
    fn execute(
        &self,
        stage: Stage,
        ctx: &JobContext,
        job: PipelineJob,
    ) -> Result<(), EngineError> {
        match (stage, job) {
            (Stage::NetworkReceive, PipelineJob::ReceiveBytes { bytes }) => {
                self.network_receive(ctx, bytes)
            }
            (Stage::PduDecode, PipelineJob::DecodePdu { bytes }) => self.pdu_decode(ctx, bytes),
            (Stage::DimseProcess, PipelineJob::ProcessDimse { event }) => {
                self.dimse_process(ctx, event)
            }
            (Stage::Execute, PipelineJob::Execute { request }) => {
                self.execute_request(ctx, request)
            }
            (Stage::ResponseEncode, PipelineJob::EncodeResponse { result }) => {
                self.response_encode(ctx, result)
            }
            (
                Stage::NetworkSend,
                PipelineJob::SendBytes {
                    bytes,
                    send_fn,
                    then_close,
                },
            ) => self.network_send(ctx, bytes, send_fn, then_close),
            (stage, job) => {
                warn!(stage = ?stage, job = ?job, "job arrived on the wrong stage");
                Ok(())
            }
        }
    }
}

/// Ships C-STORE sub-operations for the retrieve services.
struct EngineStoreSender {
    blob: Arc<dyn BlobStore>,
    sessions: Arc<SessionRegistry>,
    coordinator: Arc<PipelineCoordinator>,
    destinations: Vec<MoveDestination>,
    local_ae_title: String,
    max_pdu_length: u32,
}

impl EngineStoreSender {
    fn destination(&self, ae_title: &str) -> Option<&MoveDestination> {
        self.destinations.iter().find(|d| d.ae_title == ae_title)
    }

    /// The sub-operation command set for one instance.
    fn store_command(
        &self,
        instance: &InstanceRecord,
        message_id: u16,
    ) -> CommandSet {
        CommandSet {
            command_field: Some(CommandField::CStoreRq),
            affected_sop_class_uid: Some(instance.sop_class_uid.clone()),
            affected_sop_instance_uid: Some(instance.sop_instance_uid.clone()),
            message_id: Some(message_id),
            priority: Some(pacs_dimse::Priority::Medium),
            has_dataset: true,
            ..CommandSet::default()
        }
    }
}

impl StoreSender for EngineStoreSender {
    fn can_reach(&self, target: &StoreTarget) -> Result<(), HandlerError> {
        match target {
            StoreTarget::SameAssociation { .. } => Ok(()),
            StoreTarget::Destination { ae_title } => {
                if self.destination(ae_title).is_some() {
                    Ok(())
                } else {
                    Err(HandlerError::MoveDestinationUnknown {
                        ae_title: ae_title.clone(),
                    })
                }
            }
        }
    }

    fn send_store(
        &self,
        target: &StoreTarget,
        instance: &InstanceRecord,
        _originator_ae: &str,
        originator_message_id: u16,
    ) -> Result<Status, HandlerError> {
        let bytes = self
            .blob
            .get(&instance.sop_instance_uid)
            .context(StorageFailureSnafu)?;
        let command = self.store_command(instance, originator_message_id.wrapping_add(1));
        let command_bytes = command.encode().context(EncodeCommandSnafu)?;

        match target {
            StoreTarget::SameAssociation {
                session_id,
                context_id,
            } => {
                // interleave the store request on the requesting
                // association; delivery is fire-and-forget
                let session = self.sessions.lookup(*session_id).ok_or_else(|| {
                    HandlerError::HandlerFailure {
                        message: format!("session {} is gone", session_id),
                    }
                })?;
                let max_pdu_length = session.max_pdu_length();
                for pdu in
                    fragment_message(*context_id, &command_bytes, Some(&bytes), max_pdu_length)
                {
                    let mut buffer = Vec::new();
                    write_pdu(&mut buffer, &pdu).map_err(|e| HandlerError::HandlerFailure {
                        message: e.to_string(),
                    })?;
                    let ctx = JobContext {
                        job_id: self.coordinator.generate_job_id(),
                        session_id: *session_id,
                        message_id: originator_message_id,
                        category: JobCategory::Get,
                        enqueued_at: Instant::now(),
                        cancelled: Arc::clone(&session.cancelled),
                    };
                    self.coordinator
                        .submit_to_stage(
                            Stage::NetworkSend,
                            ctx,
                            PipelineJob::SendBytes {
                                bytes: buffer,
                                send_fn: Arc::clone(&session.send_fn),
                                then_close: false,
                            },
                        )
                        .map_err(|e| HandlerError::HandlerFailure {
                            message: e.to_string(),
                        })?;
                }
                Ok(Status::SUCCESS)
            }
            StoreTarget::Destination { ae_title } => {
                let destination =
                    self.destination(ae_title)
                        .ok_or_else(|| HandlerError::MoveDestinationUnknown {
                            ae_title: ae_title.clone(),
                        })?;
                let options = RequestorOptions {
                    calling_ae_title: self.local_ae_title.clone(),
                    called_ae_title: ae_title.clone(),
                    abstract_syntax: instance.sop_class_uid.clone(),
                    transfer_syntaxes: vec![
                        instance.transfer_syntax_uid.clone(),
                        "1.2.840.10008.1.2".to_string(),
                    ],
                    max_pdu_length: self.max_pdu_length,
                };
                let mut association = ClientAssociation::establish(
                    (destination.host.as_str(), destination.port),
                    &options,
                )
                .context(SubOperationFailedSnafu)?;

                association
                    .send_message(&command_bytes, Some(&bytes))
                    .context(SubOperationFailedSnafu)?;

                // wait for the C-STORE response of the destination
                let status = loop {
                    let pdu = association.receive().context(SubOperationFailedSnafu)?;
                    if let Pdu::PData { data } = pdu {
                        let response = data.iter().find(|pdv| {
                            pdv.value_type == PDataValueType::Command && pdv.is_last
                        });
                        if let Some(pdv) = response {
                            let command_set = CommandSet::decode(&pdv.data)
                                .map_err(|e| HandlerError::HandlerFailure {
                                    message: e.to_string(),
                                })?;
                            break command_set.status.unwrap_or(Status::UNABLE_TO_PROCESS);
                        }
                    }
                };
                let _ = association.release();
                Ok(status)
            }
        }
    }
}
