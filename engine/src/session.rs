//! Per-association session state and the session registry.
//!
//! One session corresponds to one transport connection. The session
//! owns the receive framer, the PDV reassembly buffers and the
//! association state machine; all of it is torn down together on
//! unregister, regardless of which stage last touched it.

use crate::pipeline::SendFn;
use dashmap::DashMap;
use pacs_dimse::CommandSet;
use pacs_ul::association::Association;
use pacs_ul::framer::{PduStream, PdvReassembler};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// The process-wide monotonic session id counter.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// A command set waiting for its data set fragments.
pub struct PendingCommand {
    pub context_id: u8,
    pub command_set: CommandSet,
    pub command_bytes: Vec<u8>,
}

/// State of one association, shared across pipeline stages.
pub struct SessionContext {
    /// monotonic session id
    pub id: u64,
    /// AE title of the peer, set at negotiation
    pub calling_ae_title: Mutex<String>,
    /// inbound PDU framer
    pub stream: Mutex<PduStream>,
    /// PDV reassembly buffers
    pub reassembler: Mutex<PdvReassembler>,
    /// a complete command set whose data set is still arriving
    pub pending_command: Mutex<Option<PendingCommand>>,
    /// association state machine and negotiated contexts
    pub association: Mutex<Association>,
    /// set when the session is aborted; checked at stage entry
    pub cancelled: Arc<AtomicBool>,
    /// instant of the last inbound activity
    last_activity: Mutex<Instant>,
    /// transport send callback
    pub send_fn: SendFn,
}

impl SessionContext {
    /// Mark inbound activity, resetting the idle clock.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// How long the session has been silent.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// The negotiated maximum PDU length.
    pub fn max_pdu_length(&self) -> u32 {
        self.association.lock().max_pdu_length()
    }

    /// Whether the session was cancelled (aborted).
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Flag every in-flight job of this session as cancelled.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Registry of the live sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<u64, Arc<SessionContext>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a session around the transport send
    /// callback; returns the new session context.
    pub fn register(&self, max_pdu_length: u32, send_fn: SendFn) -> Arc<SessionContext> {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(SessionContext {
            id,
            calling_ae_title: Mutex::new(String::new()),
            stream: Mutex::new(PduStream::new(max_pdu_length)),
            reassembler: Mutex::new(PdvReassembler::new()),
            pending_command: Mutex::new(None),
            association: Mutex::new(Association::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
            last_activity: Mutex::new(Instant::now()),
            send_fn,
        });
        self.sessions.insert(id, Arc::clone(&session));
        debug!(session_id = id, "session registered");
        session
    }

    /// Remove a session; its buffers are freed with the context.
    pub fn unregister(&self, session_id: u64) -> Option<Arc<SessionContext>> {
        let removed = self.sessions.remove(&session_id).map(|(_, s)| s);
        if let Some(session) = &removed {
            session.reassembler.lock().clear();
            debug!(session_id, "session unregistered");
        }
        removed
    }

    /// Fetch a live session.
    pub fn lookup(&self, session_id: u64) -> Option<Arc<SessionContext>> {
        self.sessions.get(&session_id).map(|s| Arc::clone(&s))
    }

    /// The number of live sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Collect sessions idle past the bound; the caller aborts them.
    pub fn sweep_idle(&self, max_idle: Duration) -> Vec<Arc<SessionContext>> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().idle_for() > max_idle)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}
