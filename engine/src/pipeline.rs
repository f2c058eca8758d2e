//! The six-stage processing pipeline.
//!
//! Every inbound byte, decoded PDU, DIMSE message, service result and
//! outbound buffer travels as a [`PipelineJob`] through fixed stages:
//! NetworkReceive, PduDecode, DimseProcess, Execute, ResponseEncode,
//! NetworkSend. Each stage owns a bounded FIFO queue and a worker
//! pool; a job never runs inside another stage's thread, successors
//! are always enqueued.
//!
//! PduDecode and NetworkSend are sharded by session id: each worker
//! owns its own queue, so one session's reassembly buffers are only
//! touched by one worker lane and its sends leave in production
//! order without locks.

use crate::metrics::PipelineMetrics;
use parking_lot::{Condvar, Mutex};
use pacs_dimse::{CommandSet, ServiceRequest, ServiceResult};
use pacs_ul::Pdu;
use snafu::Snafu;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Transport send callback of a session.
pub type SendFn = Arc<dyn Fn(&[u8]) -> std::io::Result<()> + Send + Sync>;

/// The fixed stages, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    NetworkReceive,
    PduDecode,
    DimseProcess,
    Execute,
    ResponseEncode,
    NetworkSend,
}

impl Stage {
    pub const COUNT: usize = 6;
    pub const ALL: [Stage; Stage::COUNT] = [
        Stage::NetworkReceive,
        Stage::PduDecode,
        Stage::DimseProcess,
        Stage::Execute,
        Stage::ResponseEncode,
        Stage::NetworkSend,
    ];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Stage::NetworkReceive => 0,
            Stage::PduDecode => 1,
            Stage::DimseProcess => 2,
            Stage::Execute => 3,
            Stage::ResponseEncode => 4,
            Stage::NetworkSend => 5,
        }
    }

    /// Stages whose workers are sharded by session id.
    #[inline]
    pub fn is_sharded(self) -> bool {
        matches!(self, Stage::PduDecode | Stage::NetworkSend)
    }
}

/// Coarse classification of a job for metrics and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JobCategory {
    Echo,
    Store,
    Find,
    Get,
    Move,
    NService,
    Association,
    #[default]
    Other,
}

impl JobCategory {
    pub const COUNT: usize = 8;

    #[inline]
    pub fn index(self) -> usize {
        match self {
            JobCategory::Echo => 0,
            JobCategory::Store => 1,
            JobCategory::Find => 2,
            JobCategory::Get => 3,
            JobCategory::Move => 4,
            JobCategory::NService => 5,
            JobCategory::Association => 6,
            JobCategory::Other => 7,
        }
    }
}

/// What a stage does when its queue is at the high-water mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackpressurePolicy {
    /// wait (bounded) for room
    #[default]
    Block,
    /// fail the submission
    Drop,
    /// evict the oldest queued job and enqueue
    ShedOldest,
}

/// Context carried by every job through the pipeline.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: u64,
    pub session_id: u64,
    pub message_id: u16,
    pub category: JobCategory,
    pub enqueued_at: Instant,
    /// shared with the session; set on abort
    pub cancelled: Arc<AtomicBool>,
}

/// A DIMSE-level event produced by PDU decoding.
#[derive(Debug)]
pub enum DimseEvent {
    /// an association control PDU (associate, release, abort)
    Control { pdu: Pdu },
    /// a complete DIMSE message
    Message {
        context_id: u8,
        command_set: CommandSet,
        command_bytes: Vec<u8>,
        dataset: Option<Vec<u8>>,
    },
}

/// One unit of pipeline work, keyed by stage.
pub enum PipelineJob {
    /// NetworkReceive: raw bytes from the transport
    ReceiveBytes { bytes: Vec<u8> },
    /// PduDecode: bytes to run through the session framer
    DecodePdu { bytes: Vec<u8> },
    /// DimseProcess: a decoded PDU or complete DIMSE message
    ProcessDimse { event: DimseEvent },
    /// Execute: a parsed service request
    Execute { request: ServiceRequest },
    /// ResponseEncode: a service result to serialize
    EncodeResponse { result: ServiceResult },
    /// NetworkSend: one encoded PDU for the transport.
    /// Carries its own send callback so it outlives unregistration.
    SendBytes {
        bytes: Vec<u8>,
        send_fn: SendFn,
        /// close the session once this buffer is on the wire
        /// (the release reply)
        then_close: bool,
    },
}

impl std::fmt::Debug for PipelineJob {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            PipelineJob::ReceiveBytes { bytes } => {
                write!(f, "ReceiveBytes({} bytes)", bytes.len())
            }
            PipelineJob::DecodePdu { bytes } => write!(f, "DecodePdu({} bytes)", bytes.len()),
            PipelineJob::ProcessDimse { event } => write!(f, "ProcessDimse({:?})", event),
            PipelineJob::Execute { request } => {
                write!(f, "Execute({:?} msg {})", request.command, request.message_id)
            }
            PipelineJob::EncodeResponse { result } => {
                write!(f, "EncodeResponse({:?} msg {})", result.command, result.message_id)
            }
            PipelineJob::SendBytes { bytes, then_close, .. } => {
                write!(f, "SendBytes({} bytes, close={})", bytes.len(), then_close)
            }
        }
    }
}

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum SubmitError {
    #[snafu(display("{:?} queue is full", stage))]
    Backpressure { stage: Stage },

    #[snafu(display("pipeline is shutting down"))]
    ShuttingDown,
}

type QueueItem = (JobContext, PipelineJob);

/// A bounded FIFO queue guarded by a mutex and condvars.
///
/// A plain deque (rather than a channel) because the shed-oldest
/// policy needs to evict from the front on overflow.
struct StageQueue {
    items: Mutex<VecDeque<QueueItem>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    policy: BackpressurePolicy,
    stopping: AtomicBool,
}

/// Outcome of a queue push, for metrics accounting.
enum PushOutcome {
    Enqueued,
    /// enqueued after evicting the oldest entry
    Shed(QueueItem),
}

impl StageQueue {
    fn new(capacity: usize, policy: BackpressurePolicy) -> Self {
        StageQueue {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
            policy,
            stopping: AtomicBool::new(false),
        }
    }

    fn push(&self, item: QueueItem, block_timeout: Duration) -> Result<PushOutcome, SubmitError> {
        if self.stopping.load(Ordering::Acquire) {
            return ShuttingDownSnafu.fail();
        }
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            match self.policy {
                BackpressurePolicy::Block => {
                    let deadline = Instant::now() + block_timeout;
                    while items.len() >= self.capacity {
                        if self.stopping.load(Ordering::Acquire) {
                            return ShuttingDownSnafu.fail();
                        }
                        if self
                            .not_full
                            .wait_until(&mut items, deadline)
                            .timed_out()
                        {
                            return BackpressureSnafu {
                                stage: Stage::NetworkReceive,
                            }
                            .fail();
                        }
                    }
                }
                BackpressurePolicy::Drop => {
                    return BackpressureSnafu {
                        stage: Stage::NetworkReceive,
                    }
                    .fail();
                }
                BackpressurePolicy::ShedOldest => {
                    let shed = items.pop_front().expect("queue at capacity is non-empty");
                    items.push_back(item);
                    self.not_empty.notify_one();
                    return Ok(PushOutcome::Shed(shed));
                }
            }
        }
        items.push_back(item);
        self.not_empty.notify_one();
        Ok(PushOutcome::Enqueued)
    }

    /// Pop the next job, blocking until one arrives.
    /// After stop, drains the remainder and then returns `None`.
    fn pop(&self) -> Option<QueueItem> {
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if self.stopping.load(Ordering::Acquire) {
                return None;
            }
            self.not_empty.wait(&mut items);
        }
    }

    fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    fn len(&self) -> usize {
        self.items.lock().len()
    }
}

/// Stage-level logic, implemented by the engine core.
pub trait StageExecutor: Send + Sync + 'static {
    /// Run one job; successors are submitted through the coordinator.
    fn execute(
        &self,
        stage: Stage,
        ctx: &JobContext,
        job: PipelineJob,
    ) -> Result<(), crate::error::EngineError>;
}

/// Per-stage pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub workers: [usize; Stage::COUNT],
    pub queue_capacity: [usize; Stage::COUNT],
    pub backpressure: [BackpressurePolicy; Stage::COUNT],
    /// upper bound of a Block policy wait
    pub block_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut backpressure = [BackpressurePolicy::Block; Stage::COUNT];
        backpressure[Stage::NetworkSend.index()] = BackpressurePolicy::ShedOldest;
        PipelineConfig {
            // the execute pool is largest: handlers may block on I/O
            workers: [2, 2, 2, 4, 2, 2],
            queue_capacity: [256, 256, 256, 256, 256, 256],
            backpressure,
            block_timeout: Duration::from_secs(5),
        }
    }
}

/// The pipeline coordinator: owns the stage queues and worker pools.
pub struct PipelineCoordinator {
    /// one queue per shared stage, one queue per lane for sharded stages
    queues: [Vec<Arc<StageQueue>>; Stage::COUNT],
    workers_per_stage: [usize; Stage::COUNT],
    metrics: Arc<PipelineMetrics>,
    job_counter: AtomicU64,
    block_timeout: Duration,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PipelineCoordinator {
    pub fn new(config: &PipelineConfig, metrics: Arc<PipelineMetrics>) -> Arc<Self> {
        let queues = Stage::ALL.map(|stage| {
            let workers = config.workers[stage.index()].max(1);
            let capacity = config.queue_capacity[stage.index()];
            let policy = config.backpressure[stage.index()];
            if stage.is_sharded() {
                (0..workers)
                    .map(|_| Arc::new(StageQueue::new(capacity, policy)))
                    .collect()
            } else {
                vec![Arc::new(StageQueue::new(capacity, policy))]
            }
        });
        Arc::new(PipelineCoordinator {
            queues,
            workers_per_stage: config.workers.map(|n| n.max(1)),
            metrics,
            job_counter: AtomicU64::new(1),
            block_timeout: config.block_timeout,
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Allocate a pipeline-unique job id.
    pub fn generate_job_id(&self) -> u64 {
        self.job_counter.fetch_add(1, Ordering::Relaxed)
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// The queue of `stage` serving `session_id`.
    fn queue_for(&self, stage: Stage, session_id: u64) -> &Arc<StageQueue> {
        let queues = &self.queues[stage.index()];
        &queues[(session_id % queues.len() as u64) as usize]
    }

    /// Total queued jobs of one stage (all lanes).
    pub fn queue_len(&self, stage: Stage) -> usize {
        self.queues[stage.index()].iter().map(|q| q.len()).sum()
    }

    /// Enqueue a job on its stage, applying the stage's
    /// backpressure policy.
    pub fn submit_to_stage(
        &self,
        stage: Stage,
        ctx: JobContext,
        job: PipelineJob,
    ) -> Result<(), SubmitError> {
        let queue = self.queue_for(stage, ctx.session_id);
        self.metrics.job_enqueued(stage);
        match queue.push((ctx, job), self.block_timeout) {
            Ok(PushOutcome::Enqueued) => Ok(()),
            Ok(PushOutcome::Shed(_old)) => {
                self.metrics.job_shed(stage);
                debug!(stage = ?stage, "shed oldest queued job under backpressure");
                Ok(())
            }
            Err(e) => {
                self.metrics.job_dequeued(stage);
                match &e {
                    SubmitError::Backpressure { .. } => {
                        // report the true stage, the queue does not know it
                        self.metrics.stage(stage).jobs_failed.fetch_add(1, Ordering::Relaxed);
                        Err(SubmitError::Backpressure { stage })
                    }
                    SubmitError::ShuttingDown => Err(e),
                }
            }
        }
    }

    /// Spawn the worker pools. Workers run until [`shutdown`].
    ///
    /// [`shutdown`]: Self::shutdown
    pub fn start(self: &Arc<Self>, executor: Arc<dyn StageExecutor>) {
        let mut workers = self.workers.lock();
        assert!(workers.is_empty(), "pipeline already started");
        for stage in Stage::ALL {
            let lanes = &self.queues[stage.index()];
            if stage.is_sharded() {
                for (lane, queue) in lanes.iter().enumerate() {
                    workers.push(self.spawn_worker(stage, lane, queue, &executor));
                }
            } else {
                let queue = &lanes[0];
                for lane in 0..self.workers_per_stage[stage.index()] {
                    workers.push(self.spawn_worker(stage, lane, queue, &executor));
                }
            }
        }
    }

    fn spawn_worker(
        self: &Arc<Self>,
        stage: Stage,
        lane: usize,
        queue: &Arc<StageQueue>,
        executor: &Arc<dyn StageExecutor>,
    ) -> JoinHandle<()> {
        let queue = Arc::clone(queue);
        let executor = Arc::clone(executor);
        let metrics = Arc::clone(&self.metrics);
        std::thread::Builder::new()
            .name(format!("{:?}-{}", stage, lane))
            .spawn(move || {
                metrics.worker_started(stage);
                while let Some((ctx, job)) = queue.pop() {
                    metrics.job_dequeued(stage);
                    if ctx.cancelled.load(Ordering::Acquire) {
                        // discarded, but still accounted for
                        metrics.record_job(stage, 0, false);
                        continue;
                    }
                    metrics.worker_active(stage);
                    let start = Instant::now();
                    let outcome = executor.execute(stage, &ctx, job);
                    let elapsed = start.elapsed().as_nanos() as u64;
                    if let Err(error) = &outcome {
                        warn!(stage = ?stage, session_id = ctx.session_id, %error, "stage job failed");
                    }
                    metrics.record_job(stage, elapsed, outcome.is_ok());
                    metrics.worker_idle(stage);
                }
            })
            .expect("worker thread spawn")
    }

    /// Stop accepting jobs, drain the queues and join the workers.
    pub fn shutdown(&self) {
        for lanes in &self.queues {
            for queue in lanes {
                queue.stop();
            }
        }
        let workers = {
            let mut guard = self.workers.lock();
            std::mem::take(&mut *guard)
        };
        for worker in workers {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    fn noop_send() -> SendFn {
        Arc::new(|_bytes: &[u8]| Ok(()))
    }

    fn ctx(session_id: u64) -> JobContext {
        JobContext {
            job_id: 1,
            session_id,
            message_id: 0,
            category: JobCategory::Other,
            enqueued_at: Instant::now(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    struct CountingExecutor {
        seen: Arc<AtomicU64>,
    }

    impl StageExecutor for CountingExecutor {
        fn execute(
            &self,
            _stage: Stage,
            _ctx: &JobContext,
            _job: PipelineJob,
        ) -> Result<(), EngineError> {
            self.seen.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            workers: [1, 1, 1, 1, 1, 1],
            queue_capacity: [8, 8, 8, 8, 8, 8],
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn jobs_flow_to_workers() {
        let metrics = Arc::new(PipelineMetrics::new());
        let coordinator = PipelineCoordinator::new(&small_config(), metrics);
        let seen = Arc::new(AtomicU64::new(0));
        coordinator.start(Arc::new(CountingExecutor {
            seen: Arc::clone(&seen),
        }));

        for i in 0..5 {
            coordinator
                .submit_to_stage(
                    Stage::Execute,
                    ctx(i),
                    PipelineJob::SendBytes {
                        bytes: vec![],
                        send_fn: noop_send(),
                        then_close: false,
                    },
                )
                .unwrap();
        }
        // drain
        while coordinator.queue_len(Stage::Execute) > 0 {
            std::thread::sleep(Duration::from_millis(5));
        }
        coordinator.shutdown();
        assert_eq!(seen.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn shed_oldest_keeps_newest_and_counts_losses() {
        let mut config = small_config();
        config.queue_capacity[Stage::NetworkSend.index()] = 4;
        let metrics = Arc::new(PipelineMetrics::new());
        let coordinator = PipelineCoordinator::new(&config, Arc::clone(&metrics));
        // no workers started: the queue just fills up

        for i in 0..10u64 {
            coordinator
                .submit_to_stage(
                    Stage::NetworkSend,
                    ctx(7),
                    PipelineJob::SendBytes {
                        bytes: vec![i as u8],
                        send_fn: noop_send(),
                        then_close: false,
                    },
                )
                .unwrap();
        }
        assert_eq!(coordinator.queue_len(Stage::NetworkSend), 4);
        assert_eq!(
            metrics
                .stage(Stage::NetworkSend)
                .jobs_shed
                .load(Ordering::Relaxed),
            6
        );
        assert_eq!(
            metrics
                .stage(Stage::NetworkSend)
                .jobs_queued
                .load(Ordering::Relaxed),
            4
        );
        coordinator.shutdown();
    }

    #[test]
    fn drop_policy_fails_submission() {
        let mut config = small_config();
        config.queue_capacity[Stage::DimseProcess.index()] = 2;
        config.backpressure[Stage::DimseProcess.index()] = BackpressurePolicy::Drop;
        let metrics = Arc::new(PipelineMetrics::new());
        let coordinator = PipelineCoordinator::new(&config, metrics);

        for _ in 0..2 {
            coordinator
                .submit_to_stage(
                    Stage::DimseProcess,
                    ctx(1),
                    PipelineJob::SendBytes {
                        bytes: vec![],
                        send_fn: noop_send(),
                        then_close: false,
                    },
                )
                .unwrap();
        }
        let err = coordinator
            .submit_to_stage(
                Stage::DimseProcess,
                ctx(1),
                PipelineJob::SendBytes {
                    bytes: vec![],
                    send_fn: noop_send(),
                    then_close: false,
                },
            )
            .unwrap_err();
        assert!(matches!(err, SubmitError::Backpressure { .. }));
        coordinator.shutdown();
    }

    #[test]
    fn cancelled_jobs_are_discarded_with_accounting() {
        let metrics = Arc::new(PipelineMetrics::new());
        let coordinator = PipelineCoordinator::new(&small_config(), Arc::clone(&metrics));
        let seen = Arc::new(AtomicU64::new(0));
        coordinator.start(Arc::new(CountingExecutor {
            seen: Arc::clone(&seen),
        }));

        let cancelled = Arc::new(AtomicBool::new(true));
        let mut context = ctx(3);
        context.cancelled = cancelled;
        coordinator
            .submit_to_stage(
                Stage::Execute,
                context,
                PipelineJob::SendBytes {
                    bytes: vec![],
                    send_fn: noop_send(),
                    then_close: false,
                },
            )
            .unwrap();

        while coordinator.queue_len(Stage::Execute) > 0 {
            std::thread::sleep(Duration::from_millis(5));
        }
        coordinator.shutdown();
        assert_eq!(seen.load(Ordering::Relaxed), 0);
        assert_eq!(
            metrics
                .stage(Stage::Execute)
                .jobs_failed
                .load(Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn sharded_stage_routes_one_session_to_one_lane() {
        let mut config = small_config();
        config.workers[Stage::NetworkSend.index()] = 3;
        let metrics = Arc::new(PipelineMetrics::new());
        let coordinator = PipelineCoordinator::new(&config, metrics);

        // all jobs of session 5 land on the same lane queue
        for _ in 0..4 {
            coordinator
                .submit_to_stage(
                    Stage::NetworkSend,
                    ctx(5),
                    PipelineJob::SendBytes {
                        bytes: vec![],
                        send_fn: noop_send(),
                        then_close: false,
                    },
                )
                .unwrap();
        }
        let lane = (5 % 3) as usize;
        assert_eq!(coordinator.queues[Stage::NetworkSend.index()][lane].len(), 4);
        coordinator.shutdown();
    }
}
