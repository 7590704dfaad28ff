//! Bounded fan-out of relay decisions across the tokio runtime.

use crate::routing::engine::RoutingEngine;
use crate::routing::types::{RelayJob, RelayReport};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Runs relay jobs concurrently, at most `max_concurrent_relays` at a time.
///
/// Jobs are dispatched most urgent first, so under contention CRITICAL
/// messages get permits before LOW ones.
pub struct RelayPool {
    engine: Arc<RoutingEngine>,
    permits: Arc<Semaphore>,
}

impl RelayPool {
    pub fn new(engine: Arc<RoutingEngine>) -> Self {
        let permits = engine.config().max_concurrent_relays.max(1);
        Self {
            engine,
            permits: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn engine(&self) -> &Arc<RoutingEngine> {
        &self.engine
    }

    /// Run every job and collect the reports of those that completed.
    /// Failed decisions are logged and left out.
    pub async fn run(&self, mut jobs: Vec<RelayJob>) -> Vec<RelayReport> {
        jobs.sort_by(|a, b| {
            b.urgency
                .cmp(&a.urgency)
                .then(a.created_at.cmp(&b.created_at))
        });

        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let engine = self.engine.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let result = engine.relay(&job.message_id, &job.holder).await;
                (job, result)
            }));
        }

        let mut reports = Vec::new();
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok((_, Ok(report))) => reports.push(report),
                Ok((job, Err(e))) => {
                    tracing::warn!(
                        message_id = %job.message_id,
                        holder = %job.holder,
                        "Relay failed: {e}"
                    );
                }
                Err(e) => tracing::error!("Relay task panicked: {e}"),
            }
        }
        reports
    }

    /// Relay every pending (message, holder) pair
    pub async fn run_pending(&self) -> Vec<RelayReport> {
        let jobs = self.engine.pending_jobs();
        if jobs.is_empty() {
            return Vec::new();
        }
        tracing::debug!(jobs = jobs.len(), "Relaying pending messages");
        self.run(jobs).await
    }
}
