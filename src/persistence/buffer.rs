//! Status Batching & Persistence Buffer
//!
//! Reports are kept per run in memory until `batch_threshold` of them have
//! accumulated, then written to the sink in one bulk insert. The same pending
//! list doubles as the recent-reports cache used for resync, so a
//! reconnecting agent sees reports that have not reached storage yet.
//!
//! A failed insert never drops reports; they stay pending and are retried on
//! the next threshold trigger or explicit flush.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use super::store::ReportSink;
use crate::domain::StatusReport;
use crate::error::{FieldError, Result};

pub struct StatusBuffer {
    sink: Arc<dyn ReportSink>,
    batch_threshold: usize,
    pending: RwLock<HashMap<String, Vec<StatusReport>>>,
    /// Serializes flushes so a batch is never written twice
    flush_lock: Mutex<()>,
}

impl StatusBuffer {
    pub fn new(sink: Arc<dyn ReportSink>, batch_threshold: usize) -> Self {
        Self {
            sink,
            batch_threshold: batch_threshold.max(1),
            pending: RwLock::new(HashMap::new()),
            flush_lock: Mutex::new(()),
        }
    }

    pub fn sink(&self) -> Arc<dyn ReportSink> {
        self.sink.clone()
    }

    pub fn batch_threshold(&self) -> usize {
        self.batch_threshold
    }

    /// Append a report; flushes the run's batch once the threshold is reached.
    ///
    /// Returns how many reports were persisted by this call (0 when below
    /// threshold). On sink failure the reports remain pending and the error is
    /// returned for the caller to surface.
    pub async fn push(&self, report: StatusReport) -> Result<usize> {
        let run_id = report.run_id.clone();
        let full = {
            let mut pending = self.pending.write().await;
            let batch = pending.entry(run_id.clone()).or_default();
            batch.push(report);
            batch.len() >= self.batch_threshold
        };

        if full {
            self.flush_pending(&run_id, self.batch_threshold).await
        } else {
            Ok(0)
        }
    }

    /// Persist everything pending for one run
    pub async fn flush_run(&self, run_id: &str) -> Result<usize> {
        self.flush_pending(run_id, 1).await
    }

    /// Persist everything pending for every run.
    ///
    /// Keeps going after a failure; the first error is returned.
    pub async fn flush_all(&self) -> Result<usize> {
        let run_ids: Vec<String> = self.pending.read().await.keys().cloned().collect();

        let mut flushed = 0;
        let mut first_error = None;
        for run_id in run_ids {
            match self.flush_pending(&run_id, 1).await {
                Ok(n) => flushed += n,
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(flushed),
        }
    }

    /// Insert the pending batch of `run_id` if it holds at least `min_len` reports
    async fn flush_pending(&self, run_id: &str, min_len: usize) -> Result<usize> {
        let _guard = self.flush_lock.lock().await;

        let batch = {
            let pending = self.pending.read().await;
            match pending.get(run_id) {
                Some(batch) if !batch.is_empty() && batch.len() >= min_len => batch.clone(),
                _ => return Ok(0),
            }
        };

        let count = batch.len();
        if let Err(e) = self.sink.insert_batch(run_id, &batch).await {
            warn!(
                run_id,
                pending = count,
                error = %e,
                "report batch insert failed; keeping reports for retry"
            );
            return Err(FieldError::Persistence(format!(
                "insert of {} reports for run {} failed: {}",
                count, run_id, e
            )));
        }

        // Reports pushed while the insert was in flight stay pending
        let mut pending = self.pending.write().await;
        if let Some(current) = pending.get_mut(run_id) {
            current.drain(..count.min(current.len()));
            if current.is_empty() {
                pending.remove(run_id);
            }
        }

        debug!(run_id, count, "flushed report batch");
        Ok(count)
    }

    /// Most recent reports of a run, oldest first.
    ///
    /// Served from the in-memory cache; when that is empty (after a flush or a
    /// coordinator restart) falls back to the latest durable report.
    pub async fn recent(&self, run_id: &str, limit: usize) -> Result<Vec<StatusReport>> {
        let cached = self.cached(run_id, limit).await;
        if !cached.is_empty() {
            return Ok(cached);
        }

        Ok(self.sink.latest_report(run_id).await?.into_iter().collect())
    }

    /// Up to `limit` pending reports of a run, oldest first; memory only
    pub async fn cached(&self, run_id: &str, limit: usize) -> Vec<StatusReport> {
        let pending = self.pending.read().await;
        match pending.get(run_id) {
            Some(batch) => {
                let start = batch.len().saturating_sub(limit);
                batch[start..].to_vec()
            }
            None => Vec::new(),
        }
    }

    pub async fn pending_count(&self, run_id: &str) -> usize {
        self.pending
            .read()
            .await
            .get(run_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub async fn total_pending(&self) -> usize {
        self.pending.read().await.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Coordinate, Environment};
    use crate::persistence::store::{MemoryReportStore, MockReportSink};
    use chrono::Utc;
    use mockall::Sequence;

    fn report(run_id: &str, sequence: u64) -> StatusReport {
        StatusReport {
            timestamp: Utc::now(),
            run_id: run_id.to_string(),
            agent_id: "agent-1".to_string(),
            sequence,
            position: Coordinate::new(0.0, 0.0),
            altitude_m: 10.0,
            speed_mps: 5.0,
            battery_pct: 90.0,
            progress: 0.0,
            environment: Environment {
                temperature_c: 20.0,
                current_a: 10.0,
                voltage_v: 22.0,
            },
            scores: None,
        }
    }

    #[tokio::test]
    async fn test_threshold_triggers_exactly_one_flush() {
        let mut sink = MockReportSink::new();
        sink.expect_insert_batch()
            .withf(|_, reports| {
                reports.len() == 20
                    && reports.iter().enumerate().all(|(i, r)| r.sequence == i as u64 + 1)
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let buffer = StatusBuffer::new(Arc::new(sink), 20);
        for seq in 1..=19 {
            assert_eq!(buffer.push(report("run-1", seq)).await.unwrap(), 0);
        }
        assert_eq!(buffer.push(report("run-1", 20)).await.unwrap(), 20);
        assert_eq!(buffer.pending_count("run-1").await, 0);

        // Fresh batch starts empty and below threshold
        assert_eq!(buffer.push(report("run-1", 21)).await.unwrap(), 0);
        assert_eq!(buffer.pending_count("run-1").await, 1);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_reports_and_retries() {
        let mut sink = MockReportSink::new();
        let mut seq = Sequence::new();
        sink.expect_insert_batch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(FieldError::Persistence("connection refused".into())));
        sink.expect_insert_batch()
            .withf(|_, reports| reports.len() == 3)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let buffer = StatusBuffer::new(Arc::new(sink), 2);
        buffer.push(report("run-1", 1)).await.unwrap();
        assert!(buffer.push(report("run-1", 2)).await.is_err());
        assert_eq!(buffer.pending_count("run-1").await, 2);

        // Next trigger retries with everything still pending
        assert_eq!(buffer.push(report("run-1", 3)).await.unwrap(), 3);
        assert_eq!(buffer.pending_count("run-1").await, 0);
    }

    #[tokio::test]
    async fn test_runs_are_batched_independently() {
        let store = Arc::new(MemoryReportStore::new());
        let buffer = StatusBuffer::new(store.clone(), 2);

        buffer.push(report("run-a", 1)).await.unwrap();
        buffer.push(report("run-b", 1)).await.unwrap();
        assert_eq!(buffer.total_pending().await, 2);

        buffer.push(report("run-a", 2)).await.unwrap();
        assert_eq!(store.reports("run-a").await.len(), 2);
        assert!(store.reports("run-b").await.is_empty());
        assert_eq!(buffer.pending_count("run-b").await, 1);
    }

    #[tokio::test]
    async fn test_flush_all_persists_partial_batches() {
        let store = Arc::new(MemoryReportStore::new());
        let buffer = StatusBuffer::new(store.clone(), 20);

        buffer.push(report("run-a", 1)).await.unwrap();
        buffer.push(report("run-b", 1)).await.unwrap();
        buffer.push(report("run-b", 2)).await.unwrap();

        assert_eq!(buffer.flush_all().await.unwrap(), 3);
        assert_eq!(buffer.total_pending().await, 0);
        assert_eq!(store.reports("run-b").await.len(), 2);

        // Nothing pending is a no-op
        assert_eq!(buffer.flush_run("run-a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recent_prefers_cache() {
        let mut sink = MockReportSink::new();
        sink.expect_latest_report().never();

        let buffer = StatusBuffer::new(Arc::new(sink), 20);
        for seq in 1..=5 {
            buffer.push(report("run-1", seq)).await.unwrap();
        }

        let recent = buffer.recent("run-1", 3).await.unwrap();
        let sequences: Vec<u64> = recent.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_recent_falls_back_to_durable_store() {
        let mut sink = MockReportSink::new();
        sink.expect_latest_report()
            .times(1)
            .returning(|run_id| Ok(Some(report(run_id, 42))));

        let buffer = StatusBuffer::new(Arc::new(sink), 20);
        let recent = buffer.recent("run-1", 20).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].sequence, 42);
    }
}
