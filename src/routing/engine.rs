//! Relay decisions: which neighbors of a holder receive a message next.
//!
//! A decision for one message runs under that message's relay lock, so two
//! holders never race to extend the same route forest. Hand-offs are awaited
//! under a timeout; a failing or slow peer is skipped and the next ranked
//! target is tried.

use crate::metrics::{recorder, HandOffTimer};
use crate::model::{Clock, DeviceNode, DistressMessage, MessageId, MessageRoute, MessageStatus};
use crate::registry::DeviceRegistry;
use crate::routing::error::{RelayError, RelayResult};
use crate::routing::route_log::RouteLog;
use crate::routing::scoring;
use crate::routing::transport::PeerTransport;
use crate::routing::types::{
    RelayHalt, RelayJob, RelayOutcome, RelayReport, RoutingConfig, RoutingStats, SkipReason,
    SkippedTarget,
};
use crate::store::{MessageStore, StoreError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Default)]
struct RoutingStatsInner {
    decisions: AtomicU64,
    handoffs: AtomicU64,
    handoffs_failed: AtomicU64,
    held: AtomicU64,
    halted: AtomicU64,
}

pub struct RoutingEngine {
    config: RoutingConfig,
    store: Arc<MessageStore>,
    registry: Arc<DeviceRegistry>,
    routes: Arc<RouteLog>,
    transport: Arc<dyn PeerTransport>,
    clock: Arc<dyn Clock>,
    relay_locks: DashMap<MessageId, Arc<AsyncMutex<()>>>,
    stats: RoutingStatsInner,
}

impl RoutingEngine {
    pub fn new(
        config: RoutingConfig,
        store: Arc<MessageStore>,
        registry: Arc<DeviceRegistry>,
        routes: Arc<RouteLog>,
        transport: Arc<dyn PeerTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            registry,
            routes,
            transport,
            clock,
            relay_locks: DashMap::new(),
            stats: RoutingStatsInner::default(),
        }
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    pub fn routes(&self) -> &Arc<RouteLog> {
        &self.routes
    }

    /// The origin holds a message from creation; every other device holds
    /// it once a route into it exists.
    pub fn holds(&self, message: &DistressMessage, device_id: &str) -> bool {
        message.origin_device_id == device_id || self.routes.has_destination(&message.id, device_id)
    }

    /// Run one relay decision for `message_id` held by `holder`
    pub async fn relay(&self, message_id: &str, holder: &str) -> RelayResult<RelayReport> {
        let lock = self.lock_for(message_id);
        let _guard = lock.lock().await;
        self.stats.decisions.fetch_add(1, Ordering::Relaxed);

        let message = self
            .store
            .get(message_id)
            .ok_or_else(|| RelayError::MessageNotFound(message_id.to_string()))?;

        if !self.holds(&message, holder) {
            return Err(RelayError::NotHeld {
                message_id: message_id.to_string(),
                device_id: holder.to_string(),
            });
        }

        let now = self.clock.now();
        if let Some(halt) = self.check_halt(&message, now)? {
            if !matches!(halt, RelayHalt::HopLimitExceeded { .. }) {
                self.relay_locks.remove(message_id);
            }
            return Ok(self.halted(message_id, holder, halt, Vec::new()));
        }

        let (candidates, mut skipped) = self.eligible_targets(&message, holder, now);
        if candidates.is_empty() {
            return Ok(self.held(message_id, holder, skipped));
        }

        let max_hops = self.config.max_hops_for(message.urgency_level);
        let budget = self
            .config
            .fanout
            .min(max_hops.saturating_sub(message.relay_count) as usize);
        let ranked = scoring::rank(
            message.urgency_level,
            candidates,
            now,
            self.config.recency_horizon(),
            &self.config.weights,
        );

        let mut relay_count = message.relay_count;
        let mut forwarded: Vec<MessageRoute> = Vec::new();
        let mut interrupted = None;

        for (score, target) in ranked {
            if forwarded.len() >= budget {
                break;
            }

            // An acknowledgment may land while earlier hand-offs are in flight
            let status = self
                .store
                .get(message_id)
                .map_or(MessageStatus::Expired, |current| current.status);
            if status.is_terminal() {
                interrupted = Some(status);
                break;
            }

            let target_id = target.device_id;
            tracing::debug!(message_id = %message_id, target = %target_id, score, "Handing off");

            let timer = HandOffTimer::start();
            let attempt = tokio::time::timeout(
                self.config.handoff_timeout(),
                self.transport.hand_off(holder, &target_id, &message),
            )
            .await;

            let reason = match attempt {
                Err(_) => Some((SkipReason::TimedOut, "timeout")),
                Ok(Err(e)) => Some((SkipReason::Unreachable(e.to_string()), e.label())),
                Ok(Ok(())) if !self.registry.is_reachable(&target_id) => {
                    Some((SkipReason::WentOffline, "went_offline"))
                }
                Ok(Ok(())) => None,
            };

            if let Some((reason, label)) = reason {
                tracing::warn!(
                    message_id = %message_id,
                    target = %target_id,
                    reason = %reason,
                    "Hand-off failed"
                );
                recorder::record_handoff_failed(label);
                self.stats.handoffs_failed.fetch_add(1, Ordering::Relaxed);
                skipped.push(SkippedTarget {
                    device_id: target_id,
                    reason,
                });
                continue;
            }

            let route = MessageRoute::new(
                message_id,
                holder,
                target_id.clone(),
                self.clock.now(),
                relay_count + 1,
            );
            self.routes.append(route.clone())?;
            relay_count = self.store.increment_relay(message_id)?;
            self.registry.note_enqueued(&target_id);

            timer.succeed(message.urgency_level);
            self.stats.handoffs.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                message_id = %message_id,
                from = %holder,
                to = %target_id,
                hop = route.hop_count,
                "Message relayed"
            );
            forwarded.push(route);
        }

        if forwarded.is_empty() {
            return Ok(match interrupted {
                Some(status) => self.halted(message_id, holder, RelayHalt::Terminal(status), skipped),
                None => self.held(message_id, holder, skipped),
            });
        }

        self.mark_delivered(message_id);

        Ok(RelayReport {
            message_id: message_id.to_string(),
            holder: holder.to_string(),
            outcome: RelayOutcome::Forwarded(forwarded),
            skipped,
        })
    }

    fn check_halt(
        &self,
        message: &DistressMessage,
        now: DateTime<Utc>,
    ) -> RelayResult<Option<RelayHalt>> {
        if message.status.is_terminal() {
            return Ok(Some(RelayHalt::Terminal(message.status)));
        }

        if message.is_expired_at(now) {
            return match self.store.expire(&message.id) {
                Ok(_) => Ok(Some(RelayHalt::ExpiredMessage)),
                // Acknowledged between the snapshot and the guard
                Err(StoreError::InvalidTransition { from, .. }) => {
                    Ok(Some(RelayHalt::Terminal(from)))
                }
                Err(e) => Err(e.into()),
            };
        }

        let max_hops = self.config.max_hops_for(message.urgency_level);
        if message.relay_count >= max_hops {
            return Ok(Some(RelayHalt::HopLimitExceeded {
                relay_count: message.relay_count,
                max_hops,
            }));
        }

        Ok(None)
    }

    /// Live, uncongested neighbors of `holder` that have not yet received the
    /// message, plus the neighbors skipped with a reason worth reporting
    fn eligible_targets(
        &self,
        message: &DistressMessage,
        holder: &str,
        now: DateTime<Utc>,
    ) -> (Vec<DeviceNode>, Vec<SkippedTarget>) {
        let received = self.routes.destinations(&message.id);
        let mut candidates = Vec::new();
        let mut skipped = Vec::new();

        for view in self.registry.peer_view(holder) {
            if view.peer_id == holder
                || view.peer_id == message.origin_device_id
                || received.contains(&view.peer_id)
            {
                continue;
            }

            match view.node {
                None => skipped.push(SkippedTarget {
                    device_id: view.peer_id,
                    reason: SkipReason::UnknownDevice,
                }),
                Some(node) if !self.registry.is_live(&node, now) => {}
                Some(node) if self.registry.is_congested(&node) => skipped.push(SkippedTarget {
                    device_id: view.peer_id,
                    reason: SkipReason::Congested,
                }),
                Some(node) => candidates.push(node),
            }
        }

        (candidates, skipped)
    }

    fn mark_delivered(&self, message_id: &str) {
        let pending = self
            .store
            .get(message_id)
            .is_some_and(|message| message.status == MessageStatus::Pending);
        if !pending {
            return;
        }
        match self.store.update_status(message_id, MessageStatus::Delivered) {
            Ok(_) | Err(StoreError::InvalidTransition { .. }) => {}
            Err(e) => tracing::warn!(message_id = %message_id, "Failed to mark delivered: {e}"),
        }
    }

    fn held(&self, message_id: &str, holder: &str, skipped: Vec<SkippedTarget>) -> RelayReport {
        tracing::debug!(message_id = %message_id, holder = %holder, "No eligible target, holding");
        self.stats.held.fetch_add(1, Ordering::Relaxed);
        RelayReport {
            message_id: message_id.to_string(),
            holder: holder.to_string(),
            outcome: RelayOutcome::Held,
            skipped,
        }
    }

    fn halted(
        &self,
        message_id: &str,
        holder: &str,
        halt: RelayHalt,
        skipped: Vec<SkippedTarget>,
    ) -> RelayReport {
        tracing::debug!(message_id = %message_id, holder = %holder, reason = %halt, "Relay halted");
        recorder::record_relay_halted(halt.label());
        self.stats.halted.fetch_add(1, Ordering::Relaxed);
        RelayReport {
            message_id: message_id.to_string(),
            holder: holder.to_string(),
            outcome: RelayOutcome::Halted(halt),
            skipped,
        }
    }

    fn lock_for(&self, message_id: &str) -> Arc<AsyncMutex<()>> {
        self.relay_locks
            .entry(message_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the relay lock of a message no decision is running for
    pub fn release(&self, message_id: &str) {
        self.relay_locks
            .remove_if(message_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Drop idle relay locks of messages that can never be forwarded again:
    /// terminal, at their hop limit, or gone from the store
    pub fn prune_locks(&self) -> usize {
        let before = self.relay_locks.len();
        self.relay_locks.retain(|message_id, lock| {
            if Arc::strong_count(lock) > 1 {
                return true;
            }
            self.store.get(message_id).is_some_and(|message| {
                !message.status.is_terminal()
                    && message.relay_count < self.config.max_hops_for(message.urgency_level)
            })
        });
        before.saturating_sub(self.relay_locks.len())
    }

    pub fn tracked_locks(&self) -> usize {
        self.relay_locks.len()
    }

    /// Every (active message, online holder) pair that could still forward,
    /// most urgent first and oldest first within an urgency
    pub fn pending_jobs(&self) -> Vec<RelayJob> {
        let mut jobs = Vec::new();
        for message in self.store.active() {
            if message.relay_count >= self.config.max_hops_for(message.urgency_level) {
                continue;
            }
            let mut holders: Vec<String> = self.routes.destinations(&message.id).into_iter().collect();
            holders.push(message.origin_device_id.clone());
            holders.sort();

            for holder in holders {
                if self.registry.is_reachable(&holder) {
                    jobs.push(Self::job(&message, holder));
                }
            }
        }
        Self::sort_jobs(&mut jobs);
        jobs
    }

    /// Active messages held by `device_id`
    pub fn jobs_for_holder(&self, device_id: &str) -> Vec<RelayJob> {
        let mut jobs: Vec<RelayJob> = self
            .store
            .active()
            .into_iter()
            .filter(|message| self.holds(message, device_id))
            .map(|message| Self::job(&message, device_id.to_string()))
            .collect();
        Self::sort_jobs(&mut jobs);
        jobs
    }

    fn job(message: &DistressMessage, holder: String) -> RelayJob {
        RelayJob {
            message_id: message.id.clone(),
            holder,
            urgency: message.urgency_level,
            created_at: message.created_at,
        }
    }

    fn sort_jobs(jobs: &mut [RelayJob]) {
        jobs.sort_by(|a, b| {
            b.urgency
                .cmp(&a.urgency)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.message_id.cmp(&b.message_id))
                .then(a.holder.cmp(&b.holder))
        });
    }

    pub fn stats(&self) -> RoutingStats {
        RoutingStats {
            decisions: self.stats.decisions.load(Ordering::Relaxed),
            handoffs: self.stats.handoffs.load(Ordering::Relaxed),
            handoffs_failed: self.stats.handoffs_failed.load(Ordering::Relaxed),
            held: self.stats.held.load(Ordering::Relaxed),
            halted: self.stats.halted.load(Ordering::Relaxed),
        }
    }
}
