//! Integer priority score for relay targets.
//!
//! score = urgency_rank * w.urgency
//!       - queue_size   * w.queue
//!       + freshness    * w.recency / 100
//!
//! where freshness falls linearly from 100 (heard from just now) to 0 at the
//! recency horizon. Integer arithmetic keeps the ranking deterministic;
//! ties go to the lexicographically smaller device id.

use crate::model::{DeviceNode, Urgency};
use crate::routing::types::ScoreWeights;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Freshness of a peer in percent of the recency horizon
pub fn freshness_pct(last_seen: DateTime<Utc>, now: DateTime<Utc>, horizon: Duration) -> i64 {
    let horizon_ms = horizon.as_millis() as i64;
    if horizon_ms == 0 {
        return 0;
    }
    let age_ms = now
        .signed_duration_since(last_seen)
        .num_milliseconds()
        .clamp(0, horizon_ms);
    (horizon_ms - age_ms) * 100 / horizon_ms
}

pub fn priority_score(
    urgency: Urgency,
    target: &DeviceNode,
    now: DateTime<Utc>,
    horizon: Duration,
    weights: &ScoreWeights,
) -> i64 {
    urgency.rank() * weights.urgency - i64::from(target.message_queue_size) * weights.queue
        + freshness_pct(target.last_seen, now, horizon) * weights.recency / 100
}

/// Order candidate targets best first
pub fn rank(
    urgency: Urgency,
    candidates: Vec<DeviceNode>,
    now: DateTime<Utc>,
    horizon: Duration,
    weights: &ScoreWeights,
) -> Vec<(i64, DeviceNode)> {
    let mut scored: Vec<(i64, DeviceNode)> = candidates
        .into_iter()
        .map(|node| (priority_score(urgency, &node, now, horizon, weights), node))
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.device_id.cmp(&b.1.device_id)));
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    const HORIZON: Duration = Duration::from_secs(300);

    fn node(id: &str, queue: u32, last_seen: DateTime<Utc>) -> DeviceNode {
        let mut node = DeviceNode::new(id, last_seen);
        node.is_online = true;
        node.message_queue_size = queue;
        node
    }

    #[test]
    fn test_freshness_decays_linearly() {
        let now = Utc::now();
        assert_eq!(freshness_pct(now, now, HORIZON), 100);
        assert_eq!(freshness_pct(now - ChronoDuration::seconds(150), now, HORIZON), 50);
        assert_eq!(freshness_pct(now - ChronoDuration::hours(1), now, HORIZON), 0);
        // Clock skew: a future last_seen counts as fresh
        assert_eq!(freshness_pct(now + ChronoDuration::seconds(5), now, HORIZON), 100);
    }

    #[test]
    fn test_shorter_queue_wins() {
        let now = Utc::now();
        let weights = ScoreWeights::default();

        let ranked = rank(
            Urgency::Critical,
            vec![node("b", 5, now), node("c", 1, now)],
            now,
            HORIZON,
            &weights,
        );
        assert_eq!(ranked[0].1.device_id, "c");
        assert_eq!(ranked[0].0, 4 * 1000 - 100 + 100);
    }

    #[test]
    fn test_recency_breaks_equal_queues() {
        let now = Utc::now();
        let weights = ScoreWeights::default();

        let ranked = rank(
            Urgency::Low,
            vec![
                node("a", 2, now - ChronoDuration::seconds(200)),
                node("b", 2, now),
            ],
            now,
            HORIZON,
            &weights,
        );
        assert_eq!(ranked[0].1.device_id, "b");
    }

    #[test]
    fn test_ties_go_to_smaller_id() {
        let now = Utc::now();
        let weights = ScoreWeights::default();

        let ranked = rank(
            Urgency::High,
            vec![node("z", 0, now), node("m", 0, now), node("q", 0, now)],
            now,
            HORIZON,
            &weights,
        );
        let ids: Vec<&str> = ranked.iter().map(|(_, n)| n.device_id.as_str()).collect();
        assert_eq!(ids, vec!["m", "q", "z"]);
    }
}
