//! In-memory message store and dedup gate.
//!
//! Every message sits behind its own mutex: mutations of one message are
//! serialized, mutations of different messages never contend beyond the
//! brief map-shard lookup.

use crate::metrics::recorder;
use crate::model::{DistressMessage, Location, MessageId, MessageStatus, ModelError};
use crate::store::error::{StoreError, StoreResult};
use crate::store::types::{AckApplied, AdmitOutcome, MessageFilter, StoreStats};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
pub struct MessageStore {
    messages: DashMap<MessageId, Arc<Mutex<DistressMessage>>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a message whose id has not been seen; otherwise a no-op
    pub fn admit(&self, message: DistressMessage) -> StoreResult<AdmitOutcome> {
        if let Some(expires_at) = message.expires_at {
            if expires_at <= message.created_at {
                return Err(ModelError::InvalidExpiry {
                    created_at: message.created_at,
                    expires_at,
                }
                .into());
            }
        }

        match self.messages.entry(message.id.clone()) {
            Entry::Occupied(_) => {
                tracing::debug!(message_id = %message.id, "Duplicate message ignored");
                recorder::record_duplicate_message();
                Ok(AdmitOutcome::Duplicate)
            }
            Entry::Vacant(slot) => {
                tracing::info!(
                    message_id = %message.id,
                    urgency = %message.urgency_level,
                    category = %message.message_type,
                    "Message admitted"
                );
                recorder::record_message_admitted(message.urgency_level);
                slot.insert(Arc::new(Mutex::new(message)));
                Ok(AdmitOutcome::Admitted)
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<DistressMessage> {
        self.messages.get(id).map(|slot| slot.lock().clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.messages.contains_key(id)
    }

    /// Apply a monotonic status transition. Returns the previous status.
    pub fn update_status(&self, id: &str, next: MessageStatus) -> StoreResult<MessageStatus> {
        let slot = self.slot(id)?;
        let mut message = slot.lock();
        Self::transition(&mut message, next)
    }

    /// Guarded move to EXPIRED. `Ok(false)` when already expired.
    pub fn expire(&self, id: &str) -> StoreResult<bool> {
        let slot = self.slot(id)?;
        let mut message = slot.lock();
        if message.status == MessageStatus::Expired {
            return Ok(false);
        }
        Self::transition(&mut message, MessageStatus::Expired)?;
        Ok(true)
    }

    /// Bump the relay count by one; the only writer of `relay_count`
    pub fn increment_relay(&self, id: &str) -> StoreResult<u32> {
        let slot = self.slot(id)?;
        let mut message = slot.lock();
        message.relay_count += 1;
        Ok(message.relay_count)
    }

    /// Record an acknowledgment. Repeats are no-ops; the first one moves a
    /// PENDING or DELIVERED message to ACKNOWLEDGED.
    pub fn add_acknowledgment(&self, id: &str, acker_id: &str) -> StoreResult<AckApplied> {
        let slot = self.slot(id)?;
        let mut message = slot.lock();

        if message.status == MessageStatus::Expired {
            return Err(StoreError::ExpiredMessage(id.to_string()));
        }

        let newly_added = message.acknowledgments.insert(acker_id.to_string());
        let status_changed = message.status != MessageStatus::Acknowledged;
        if status_changed {
            Self::transition(&mut message, MessageStatus::Acknowledged)?;
        }

        Ok(AckApplied {
            message: message.clone(),
            newly_added,
            status_changed,
        })
    }

    fn transition(message: &mut DistressMessage, next: MessageStatus) -> StoreResult<MessageStatus> {
        let previous = message.status;
        if !previous.can_transition_to(next) {
            tracing::warn!(
                message_id = %message.id,
                from = %previous,
                to = %next,
                "Rejected status transition"
            );
            recorder::record_invalid_transition();
            return Err(StoreError::InvalidTransition {
                id: message.id.clone(),
                from: previous,
                to: next,
            });
        }

        if previous != next {
            message.status = next;
            recorder::record_status_transition(next);
            tracing::debug!(message_id = %message.id, from = %previous, to = %next, "Status changed");
        }
        Ok(previous)
    }

    fn slot(&self, id: &str) -> StoreResult<Arc<Mutex<DistressMessage>>> {
        self.messages
            .get(id)
            .map(|slot| slot.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn snapshot(&self) -> Vec<DistressMessage> {
        let slots: Vec<Arc<Mutex<DistressMessage>>> =
            self.messages.iter().map(|slot| slot.value().clone()).collect();
        slots.iter().map(|slot| slot.lock().clone()).collect()
    }

    /// Messages matching `filter`, CRITICAL first, newest first within urgency
    pub fn list(&self, filter: &MessageFilter) -> Vec<DistressMessage> {
        let mut messages: Vec<DistressMessage> = self
            .snapshot()
            .into_iter()
            .filter(|message| filter.matches(message))
            .collect();
        messages.sort_by(|a, b| {
            b.urgency_level
                .cmp(&a.urgency_level)
                .then(b.created_at.cmp(&a.created_at))
                .then(a.id.cmp(&b.id))
        });
        messages
    }

    /// Active messages within `radius_km` of `center`, nearest first
    pub fn list_near(&self, center: &Location, radius_km: f64) -> Vec<DistressMessage> {
        let mut nearby: Vec<(f64, DistressMessage)> = self
            .snapshot()
            .into_iter()
            .filter(|message| message.status.is_active())
            .map(|message| (center.distance_km(&message.location), message))
            .filter(|(distance, _)| *distance <= radius_km)
            .collect();
        nearby.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.id.cmp(&b.1.id)));
        nearby.into_iter().map(|(_, message)| message).collect()
    }

    /// PENDING and DELIVERED messages
    pub fn active(&self) -> Vec<DistressMessage> {
        self.snapshot()
            .into_iter()
            .filter(|message| message.status.is_active())
            .collect()
    }

    /// Active messages whose expiry is at or before `now`
    pub fn expiry_candidates(&self, now: DateTime<Utc>) -> Vec<MessageId> {
        self.snapshot()
            .into_iter()
            .filter(|message| message.status.is_active() && message.is_expired_at(now))
            .map(|message| message.id)
            .collect()
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats::default();
        for message in self.snapshot() {
            match message.status {
                MessageStatus::Pending => stats.pending += 1,
                MessageStatus::Delivered => stats.delivered += 1,
                MessageStatus::Acknowledged => stats.acknowledged += 1,
                MessageStatus::Expired => stats.expired += 1,
            }
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MessageCategory, Urgency};
    use chrono::Duration;

    fn create_message(id: &str, urgency: Urgency) -> DistressMessage {
        DistressMessage::new(
            id,
            "user-1",
            "device-a",
            MessageCategory::Medical,
            urgency,
            "need insulin",
            Location::new(40.7589, -73.9851),
            Utc::now(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_admit_is_idempotent() {
        let store = MessageStore::new();
        let message = create_message("m-1", Urgency::High);

        assert_eq!(store.admit(message.clone()).unwrap(), AdmitOutcome::Admitted);
        assert_eq!(store.admit(message).unwrap(), AdmitOutcome::Duplicate);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_duplicate_does_not_overwrite() {
        let store = MessageStore::new();
        store.admit(create_message("m-1", Urgency::High)).unwrap();
        store.increment_relay("m-1").unwrap();

        let mut replay = create_message("m-1", Urgency::Low);
        replay.content = "changed".into();
        store.admit(replay).unwrap();

        let stored = store.get("m-1").unwrap();
        assert_eq!(stored.urgency_level, Urgency::High);
        assert_eq!(stored.relay_count, 1);
    }

    #[test]
    fn test_admit_rejects_bad_expiry() {
        let store = MessageStore::new();
        let mut message = create_message("m-1", Urgency::High);
        message.expires_at = Some(message.created_at - Duration::minutes(1));

        assert!(matches!(store.admit(message), Err(StoreError::Invalid(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_backward_transition_fails() {
        let store = MessageStore::new();
        store.admit(create_message("m-1", Urgency::High)).unwrap();

        store.update_status("m-1", MessageStatus::Delivered).unwrap();
        store.update_status("m-1", MessageStatus::Acknowledged).unwrap();

        let result = store.update_status("m-1", MessageStatus::Pending);
        assert!(matches!(
            result,
            Err(StoreError::InvalidTransition {
                from: MessageStatus::Acknowledged,
                to: MessageStatus::Pending,
                ..
            })
        ));
        assert_eq!(store.get("m-1").unwrap().status, MessageStatus::Acknowledged);
    }

    #[test]
    fn test_expire_is_guarded() {
        let store = MessageStore::new();
        store.admit(create_message("m-1", Urgency::High)).unwrap();
        store.admit(create_message("m-2", Urgency::High)).unwrap();

        assert!(store.expire("m-1").unwrap());
        assert!(!store.expire("m-1").unwrap());

        store.add_acknowledgment("m-2", "responder").unwrap();
        assert!(matches!(
            store.expire("m-2"),
            Err(StoreError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_increment_relay() {
        let store = MessageStore::new();
        store.admit(create_message("m-1", Urgency::High)).unwrap();

        assert_eq!(store.increment_relay("m-1").unwrap(), 1);
        assert_eq!(store.increment_relay("m-1").unwrap(), 2);
        assert!(matches!(
            store.increment_relay("missing"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_acknowledgments_are_unique() {
        let store = MessageStore::new();
        store.admit(create_message("m-1", Urgency::High)).unwrap();

        let first = store.add_acknowledgment("m-1", "device-d").unwrap();
        assert!(first.newly_added);
        assert!(first.status_changed);
        assert_eq!(first.message.status, MessageStatus::Acknowledged);

        let repeat = store.add_acknowledgment("m-1", "device-d").unwrap();
        assert!(!repeat.newly_added);
        assert!(!repeat.status_changed);

        store.add_acknowledgment("m-1", "device-e").unwrap();
        let stored = store.get("m-1").unwrap();
        assert_eq!(stored.acknowledgments.len(), 2);
    }

    #[test]
    fn test_ack_on_expired_message_fails() {
        let store = MessageStore::new();
        store.admit(create_message("m-1", Urgency::High)).unwrap();
        store.expire("m-1").unwrap();

        assert!(matches!(
            store.add_acknowledgment("m-1", "device-d"),
            Err(StoreError::ExpiredMessage(_))
        ));
        assert!(store.get("m-1").unwrap().acknowledgments.is_empty());
    }

    #[test]
    fn test_list_orders_by_urgency() {
        let store = MessageStore::new();
        store.admit(create_message("low", Urgency::Low)).unwrap();
        store.admit(create_message("critical", Urgency::Critical)).unwrap();
        store.admit(create_message("medium", Urgency::Medium)).unwrap();

        let ids: Vec<String> = store
            .list(&MessageFilter::default())
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["critical", "medium", "low"]);

        let filter = MessageFilter {
            urgency: Some(Urgency::Low),
            ..Default::default()
        };
        assert_eq!(store.list(&filter).len(), 1);
    }

    #[test]
    fn test_list_near() {
        let store = MessageStore::new();
        store.admit(create_message("nyc", Urgency::High)).unwrap();

        let mut far = create_message("london", Urgency::High);
        far.location = Location::new(51.5074, -0.1278);
        store.admit(far).unwrap();

        let center = Location::new(40.76, -73.98);
        let nearby = store.list_near(&center, 10.0);
        assert_eq!(nearby.len(), 1);
        assert_eq!(nearby[0].id, "nyc");
    }

    #[test]
    fn test_expiry_candidates() {
        let store = MessageStore::new();
        let now = Utc::now();

        let mut expiring = create_message("expiring", Urgency::Low);
        expiring.created_at = now - Duration::hours(3);
        expiring.expires_at = Some(now - Duration::hours(1));
        store.admit(expiring).unwrap();
        store.admit(create_message("forever", Urgency::Low)).unwrap();

        assert_eq!(store.expiry_candidates(now), vec!["expiring".to_string()]);

        store.expire("expiring").unwrap();
        assert!(store.expiry_candidates(now).is_empty());
        assert_eq!(store.stats().expired, 1);
        assert_eq!(store.stats().active(), 1);
    }

    #[test]
    fn test_concurrent_increments_are_serialized() {
        let store = Arc::new(MessageStore::new());
        store.admit(create_message("m-1", Urgency::High)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store.increment_relay("m-1").unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get("m-1").unwrap().relay_count, 800);
    }
}
