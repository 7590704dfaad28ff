//! Hand-off seam between the routing engine and the physical link.
//!
//! The engine only needs to know whether a peer confirmed receipt of a
//! message. Bluetooth, Wi-Fi Direct or any other link implements
//! [`PeerTransport`]; [`LoopbackTransport`] delivers in-process.

use crate::model::{DeviceId, DistressMessage, MessageId};
use dashmap::{DashMap, DashSet};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandOffError {
    #[error("Peer unreachable: {0}")]
    Unreachable(DeviceId),

    #[error("Peer rejected message: {0}")]
    Rejected(String),
}

impl HandOffError {
    pub fn label(&self) -> &'static str {
        match self {
            HandOffError::Unreachable(_) => "unreachable",
            HandOffError::Rejected(_) => "rejected",
        }
    }
}

/// Delivers one message from a holder to an adjacent device. Resolves once
/// the target confirmed receipt.
pub trait PeerTransport: Send + Sync {
    fn hand_off<'a>(
        &'a self,
        from: &'a str,
        to: &'a str,
        message: &'a DistressMessage,
    ) -> BoxFuture<'a, Result<(), HandOffError>>;
}

/// In-process transport: every hand-off lands in the target's inbox.
///
/// Latency and unreachable devices can be injected to exercise timeouts and
/// fail-soft behavior.
#[derive(Default)]
pub struct LoopbackTransport {
    inboxes: DashMap<DeviceId, Vec<MessageId>>,
    unreachable: DashSet<DeviceId>,
    latency: RwLock<Option<Duration>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.write() = Some(latency);
        self
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    pub fn set_unreachable(&self, device_id: &str, unreachable: bool) {
        if unreachable {
            self.unreachable.insert(device_id.to_string());
        } else {
            self.unreachable.remove(device_id);
        }
    }

    /// Message ids delivered to `device_id`, in arrival order
    pub fn inbox(&self, device_id: &str) -> Vec<MessageId> {
        self.inboxes
            .get(device_id)
            .map(|inbox| inbox.clone())
            .unwrap_or_default()
    }

    pub fn delivered_count(&self) -> usize {
        self.inboxes.iter().map(|inbox| inbox.len()).sum()
    }
}

impl PeerTransport for LoopbackTransport {
    fn hand_off<'a>(
        &'a self,
        _from: &'a str,
        to: &'a str,
        message: &'a DistressMessage,
    ) -> BoxFuture<'a, Result<(), HandOffError>> {
        Box::pin(async move {
            let latency = *self.latency.read();
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }

            if self.unreachable.contains(to) {
                return Err(HandOffError::Unreachable(to.to_string()));
            }

            self.inboxes
                .entry(to.to_string())
                .or_default()
                .push(message.id.clone());
            Ok(())
        })
    }
}
