use crate::model::{DistressMessage, MessageCategory, MessageStatus, Urgency};
use serde::{Deserialize, Serialize};

/// Result of offering a message to the store. A duplicate is not an error:
/// at-least-once delivery means the same message routinely arrives twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdmitOutcome {
    Admitted,
    Duplicate,
}

impl AdmitOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, AdmitOutcome::Duplicate)
    }
}

/// State after an acknowledgment was applied
#[derive(Debug, Clone)]
pub struct AckApplied {
    pub message: DistressMessage,
    /// False when the acker had already acknowledged
    pub newly_added: bool,
    /// True when this acknowledgment moved the message to ACKNOWLEDGED
    pub status_changed: bool,
}

/// Listing filter; every field is optional and the set fields are ANDed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageFilter {
    pub status: Option<MessageStatus>,
    pub urgency: Option<Urgency>,
    pub category: Option<MessageCategory>,
    pub sender_id: Option<String>,
}

impl MessageFilter {
    pub fn matches(&self, message: &DistressMessage) -> bool {
        self.status.map_or(true, |s| message.status == s)
            && self.urgency.map_or(true, |u| message.urgency_level == u)
            && self.category.map_or(true, |c| message.message_type == c)
            && self
                .sender_id
                .as_deref()
                .map_or(true, |sender| message.sender_id == sender)
    }
}

/// Message counts per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub pending: usize,
    pub delivered: usize,
    pub acknowledged: usize,
    pub expired: usize,
}

impl StoreStats {
    pub fn total(&self) -> usize {
        self.pending + self.delivered + self.acknowledged + self.expired
    }

    pub fn active(&self) -> usize {
        self.pending + self.delivered
    }
}
