//! Lock-free pipeline metrics.
//!
//! Two flat arrays of counters: one per pipeline stage, one per job
//! category. All mutations are relaxed atomic adds; minima and maxima
//! use compare-exchange loops. Reads never block.

use crate::pipeline::{JobCategory, Stage};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of one pipeline stage.
#[derive(Debug, Default)]
pub struct StageMetrics {
    /// jobs fully processed by this stage
    pub jobs_processed: AtomicU64,
    /// jobs currently waiting in the stage queue (gauge)
    pub jobs_queued: AtomicU64,
    /// jobs that failed or were discarded in this stage
    pub jobs_failed: AtomicU64,
    /// jobs lost to the shed-oldest backpressure policy
    pub jobs_shed: AtomicU64,
    /// cumulative processing time
    pub total_ns: AtomicU64,
    /// largest single-job processing time
    pub max_ns: AtomicU64,
    /// workers currently running a job
    pub active_workers: AtomicU64,
    /// workers currently waiting for a job
    pub idle_workers: AtomicU64,
}

impl StageMetrics {
    fn record_completion(&self, elapsed_ns: u64, ok: bool) {
        self.jobs_processed.fetch_add(1, Ordering::Relaxed);
        self.total_ns.fetch_add(elapsed_ns, Ordering::Relaxed);
        if !ok {
            self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        }
        let mut current = self.max_ns.load(Ordering::Relaxed);
        while elapsed_ns > current {
            match self.max_ns.compare_exchange_weak(
                current,
                elapsed_ns,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }
}

/// Counters of one job category.
#[derive(Debug)]
pub struct CategoryMetrics {
    pub total: AtomicU64,
    pub success: AtomicU64,
    pub failed: AtomicU64,
    pub total_ns: AtomicU64,
    pub min_ns: AtomicU64,
    pub max_ns: AtomicU64,
}

impl Default for CategoryMetrics {
    fn default() -> Self {
        CategoryMetrics {
            total: AtomicU64::new(0),
            success: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            total_ns: AtomicU64::new(0),
            min_ns: AtomicU64::new(u64::MAX),
            max_ns: AtomicU64::new(0),
        }
    }
}

impl CategoryMetrics {
    fn record(&self, elapsed_ns: u64, ok: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if ok {
            self.success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_ns.fetch_add(elapsed_ns, Ordering::Relaxed);

        let mut current = self.min_ns.load(Ordering::Relaxed);
        while elapsed_ns < current {
            match self.min_ns.compare_exchange_weak(
                current,
                elapsed_ns,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
        let mut current = self.max_ns.load(Ordering::Relaxed);
        while elapsed_ns > current {
            match self.max_ns.compare_exchange_weak(
                current,
                elapsed_ns,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }
}

/// Metrics of the whole pipeline.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    stages: [StageMetrics; Stage::COUNT],
    categories: [CategoryMetrics; JobCategory::COUNT],
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// The counters of one stage.
    pub fn stage(&self, stage: Stage) -> &StageMetrics {
        &self.stages[stage.index()]
    }

    /// The counters of one category.
    pub fn category(&self, category: JobCategory) -> &CategoryMetrics {
        &self.categories[category.index()]
    }

    /// Record one job completion in a stage.
    pub fn record_job(&self, stage: Stage, elapsed_ns: u64, ok: bool) {
        self.stage(stage).record_completion(elapsed_ns, ok);
    }

    /// Record the end-to-end outcome of one operation.
    pub fn record_operation(&self, category: JobCategory, elapsed_ns: u64, ok: bool) {
        self.category(category).record(elapsed_ns, ok);
    }

    pub fn job_enqueued(&self, stage: Stage) {
        self.stage(stage).jobs_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_dequeued(&self, stage: Stage) {
        self.stage(stage).jobs_queued.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn job_shed(&self, stage: Stage) {
        let metrics = self.stage(stage);
        metrics.jobs_shed.fetch_add(1, Ordering::Relaxed);
        metrics.jobs_queued.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn worker_active(&self, stage: Stage) {
        let metrics = self.stage(stage);
        metrics.idle_workers.fetch_sub(1, Ordering::Relaxed);
        metrics.active_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_idle(&self, stage: Stage) {
        let metrics = self.stage(stage);
        metrics.active_workers.fetch_sub(1, Ordering::Relaxed);
        metrics.idle_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_started(&self, stage: Stage) {
        self.stage(stage).idle_workers.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn stage_counters_accumulate() {
        let metrics = PipelineMetrics::new();
        metrics.record_job(Stage::Execute, 100, true);
        metrics.record_job(Stage::Execute, 300, false);
        metrics.record_job(Stage::Execute, 200, true);

        let stage = metrics.stage(Stage::Execute);
        assert_eq!(stage.jobs_processed.load(Ordering::Relaxed), 3);
        assert_eq!(stage.jobs_failed.load(Ordering::Relaxed), 1);
        assert_eq!(stage.total_ns.load(Ordering::Relaxed), 600);
        assert_eq!(stage.max_ns.load(Ordering::Relaxed), 300);
    }

    #[test]
    fn category_min_max_track_extremes() {
        let metrics = PipelineMetrics::new();
        metrics.record_operation(JobCategory::Find, 500, true);
        metrics.record_operation(JobCategory::Find, 100, true);
        metrics.record_operation(JobCategory::Find, 900, false);

        let cat = metrics.category(JobCategory::Find);
        assert_eq!(cat.total.load(Ordering::Relaxed), 3);
        assert_eq!(cat.success.load(Ordering::Relaxed), 2);
        assert_eq!(cat.failed.load(Ordering::Relaxed), 1);
        assert_eq!(cat.min_ns.load(Ordering::Relaxed), 100);
        assert_eq!(cat.max_ns.load(Ordering::Relaxed), 900);
    }

    #[test]
    fn queue_gauge_moves_both_ways() {
        let metrics = PipelineMetrics::new();
        metrics.job_enqueued(Stage::NetworkSend);
        metrics.job_enqueued(Stage::NetworkSend);
        metrics.job_dequeued(Stage::NetworkSend);
        assert_eq!(
            metrics
                .stage(Stage::NetworkSend)
                .jobs_queued
                .load(Ordering::Relaxed),
            1
        );
    }
}
