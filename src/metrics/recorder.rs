//! Metrics recorder for mesh relay operations
//!
//! Thin wrappers over the `metrics` macros so call sites stay one line.

use crate::model::{MessageStatus, Urgency};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    // Message store
    describe_counter!(
        "sahaay_messages_admitted_total",
        "Distress messages admitted into the store"
    );
    describe_counter!(
        "sahaay_messages_duplicate_total",
        "Admissions rejected as duplicates"
    );
    describe_counter!(
        "sahaay_status_transitions_total",
        "Message status transitions applied"
    );
    describe_counter!(
        "sahaay_invalid_transitions_total",
        "Status transitions rejected as non-monotonic"
    );

    // Relay
    describe_counter!("sahaay_handoffs_total", "Successful device-to-device hand-offs");
    describe_counter!(
        "sahaay_handoffs_failed_total",
        "Hand-off attempts that failed or timed out"
    );
    describe_counter!(
        "sahaay_relays_halted_total",
        "Relay decisions that stopped before forwarding"
    );
    describe_histogram!(
        "sahaay_handoff_duration_seconds",
        "Time spent handing a message to one peer"
    );

    // Acknowledgments and expiry
    describe_counter!(
        "sahaay_acknowledgments_total",
        "Acknowledgments received (including repeats)"
    );
    describe_counter!(
        "sahaay_messages_reaped_total",
        "Messages transitioned to EXPIRED by the reaper"
    );

    // Gauges
    describe_gauge!("sahaay_online_devices", "Devices currently online");
    describe_gauge!("sahaay_active_messages", "Messages in PENDING or DELIVERED");
}

// ============== Message Store ==============

pub fn record_message_admitted(urgency: Urgency) {
    counter!("sahaay_messages_admitted_total", "urgency" => urgency.as_str()).increment(1);
}

pub fn record_duplicate_message() {
    counter!("sahaay_messages_duplicate_total").increment(1);
}

pub fn record_status_transition(to: MessageStatus) {
    counter!("sahaay_status_transitions_total", "status" => to.as_str()).increment(1);
}

pub fn record_invalid_transition() {
    counter!("sahaay_invalid_transitions_total").increment(1);
}

// ============== Relay ==============

pub fn record_handoff(urgency: Urgency, duration: Duration) {
    counter!("sahaay_handoffs_total", "urgency" => urgency.as_str()).increment(1);
    histogram!("sahaay_handoff_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_handoff_failed(reason: &'static str) {
    counter!("sahaay_handoffs_failed_total", "reason" => reason).increment(1);
}

pub fn record_relay_halted(reason: &'static str) {
    counter!("sahaay_relays_halted_total", "reason" => reason).increment(1);
}

// ============== Acknowledgments / Expiry ==============

pub fn record_acknowledgment(newly_added: bool) {
    let kind = if newly_added { "new" } else { "repeat" };
    counter!("sahaay_acknowledgments_total", "kind" => kind).increment(1);
}

pub fn record_messages_reaped(count: usize) {
    counter!("sahaay_messages_reaped_total").increment(count as u64);
}

// ============== Gauges ==============

pub fn set_online_devices(count: usize) {
    gauge!("sahaay_online_devices").set(count as f64);
}

pub fn set_active_messages(count: usize) {
    gauge!("sahaay_active_messages").set(count as f64);
}

/// Times a single hand-off attempt
pub struct HandOffTimer {
    start_time: Instant,
}

impl HandOffTimer {
    pub fn start() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Stop timing and record a successful hand-off
    pub fn succeed(self, urgency: Urgency) {
        record_handoff(urgency, self.start_time.elapsed());
    }
}
