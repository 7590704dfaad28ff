use crate::metrics::recorder;
use crate::model::{Clock, MessageId};
use crate::persistence::MeshArchive;
use crate::store::{MessageStore, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    pub interval_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

impl ReaperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

pub struct ExpiryReaper {
    store: Arc<MessageStore>,
    clock: Arc<dyn Clock>,
    config: ReaperConfig,
    archive: Option<Arc<MeshArchive>>,
}

impl ExpiryReaper {
    pub fn new(store: Arc<MessageStore>, clock: Arc<dyn Clock>, config: ReaperConfig) -> Self {
        Self {
            store,
            clock,
            config,
            archive: None,
        }
    }

    /// Write expired messages through to `archive`
    pub fn with_archive(mut self, archive: Arc<MeshArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Expire every active message whose expiry has passed. Returns how many
    /// this sweep transitioned.
    pub fn reap_once(&self) -> usize {
        self.reap().len()
    }

    /// Like [`reap_once`](Self::reap_once), returning the expired ids
    pub fn reap(&self) -> Vec<MessageId> {
        let now = self.clock.now();
        let mut reaped = Vec::new();

        for message_id in self.store.expiry_candidates(now) {
            match self.store.expire(&message_id) {
                Ok(true) => reaped.push(message_id),
                Ok(false) => {}
                // Acknowledged or removed since the scan
                Err(StoreError::InvalidTransition { .. }) | Err(StoreError::NotFound(_)) => {
                    tracing::debug!(message_id = %message_id, "Expiry lost race, skipping");
                }
                Err(e) => tracing::warn!(message_id = %message_id, "Failed to expire: {e}"),
            }
        }

        if !reaped.is_empty() {
            tracing::info!(reaped = reaped.len(), "Expired overdue messages");
            recorder::record_messages_reaped(reaped.len());
        }
        recorder::set_active_messages(self.store.stats().active());
        reaped
    }

    /// Reap, then archive what was reaped. Archive failures are logged; the
    /// in-memory transition stands.
    pub async fn sweep(&self) -> usize {
        let reaped = self.reap();
        if let Some(archive) = &self.archive {
            for message_id in &reaped {
                let Some(message) = self.store.get(message_id) else {
                    continue;
                };
                if let Err(e) = archive.save_message(&message).await {
                    tracing::warn!(message_id = %message_id, "Failed to archive expiry: {e}");
                }
            }
        }
        reaped.len()
    }

    /// Sweep every interval until `shutdown` flips to true
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(self.config.interval());
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        self.sweep().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::debug!("Expiry reaper stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}
