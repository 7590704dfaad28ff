//! Applies acknowledgments and tells upstream holders to stop relaying.
//!
//! The store is updated first and unconditionally. The reverse walk is best
//! effort: it follows recorded hops from the acknowledging device toward the
//! origin and stops at the first device that is no longer reachable. Devices
//! past that point learn about the acknowledgment when their next relay
//! decision finds the message terminal.

use crate::ack::error::{AckError, AckResult};
use crate::ack::types::AckReceipt;
use crate::metrics::recorder;
use crate::model::{DeviceId, MessageId};
use crate::registry::DeviceRegistry;
use crate::routing::RouteLog;
use crate::store::MessageStore;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct AckPropagator {
    store: Arc<MessageStore>,
    routes: Arc<RouteLog>,
    registry: Arc<DeviceRegistry>,
    informed: DashMap<MessageId, BTreeSet<DeviceId>>,
}

impl AckPropagator {
    pub fn new(
        store: Arc<MessageStore>,
        routes: Arc<RouteLog>,
        registry: Arc<DeviceRegistry>,
    ) -> Self {
        Self {
            store,
            routes,
            registry,
            informed: DashMap::new(),
        }
    }

    /// Record `acker_id`'s acknowledgment of `message_id` and walk it back
    /// toward the origin
    pub fn submit(&self, message_id: &str, acker_id: &str) -> AckResult<AckReceipt> {
        if acker_id.trim().is_empty() {
            return Err(AckError::EmptyAcker);
        }

        let applied = self.store.add_acknowledgment(message_id, acker_id)?;
        recorder::record_acknowledgment(applied.newly_added);

        let mut informed = vec![acker_id.to_string()];
        let mut reached_origin = applied.message.origin_device_id == acker_id;

        for hop in self.routes.path_to_root(message_id, acker_id) {
            let upstream = hop.from_device_id;
            if !self.registry.is_reachable(&upstream) {
                tracing::debug!(
                    message_id = %message_id,
                    device = %upstream,
                    "Acknowledgment walk stopped at unreachable device"
                );
                break;
            }
            reached_origin = upstream == applied.message.origin_device_id;
            informed.push(upstream);
        }

        {
            let mut known = self.informed.entry(message_id.to_string()).or_default();
            known.extend(informed.iter().cloned());
        }

        tracing::info!(
            message_id = %message_id,
            acker = %acker_id,
            informed = informed.len(),
            reached_origin,
            "Acknowledgment applied"
        );

        Ok(AckReceipt {
            message: applied.message,
            newly_added: applied.newly_added,
            newly_acknowledged: applied.status_changed,
            informed,
            reached_origin,
        })
    }

    pub fn is_informed(&self, message_id: &str, device_id: &str) -> bool {
        self.informed
            .get(message_id)
            .is_some_and(|known| known.contains(device_id))
    }

    /// Devices that learned of an acknowledgment of `message_id`, sorted
    pub fn informed_devices(&self, message_id: &str) -> Vec<DeviceId> {
        self.informed
            .get(message_id)
            .map(|known| known.iter().cloned().collect())
            .unwrap_or_default()
    }
}
