//! Event normalizer: per-user contribution bounding.
//!
//! Noise is calibrated to L1 sensitivity 1, which only holds if one user
//! changes at most one item's count by at most one. The normalizer enforces
//! that: for every (day, user) exactly one event survives, chosen by the
//! configured [`RetentionPolicy`]. All other events of that user on that
//! day are discarded.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

use crate::config::RetentionPolicy;
use crate::domain::Event;

/// Events with at most one event per (day, user).
///
/// Only [`normalize`] constructs this type, so aggregators taking it can
/// rely on the contribution bound.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedEvents {
    events: Vec<Event>,
}

impl NormalizedEvents {
    #[must_use]
    pub fn as_slice(&self) -> &[Event] {
        &self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

fn retention_digest(event: &Event) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(event.day.to_string().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(event.user_id.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(event.item_id.as_bytes());
    hasher.finalize().into()
}

/// Bound every user to one event per day.
///
/// Survivors keep their input order under both policies. With
/// [`RetentionPolicy::Hashed`] the choice of survivor does not depend on
/// input order, only the order they are emitted in does.
#[must_use]
pub fn normalize(events: &[Event], policy: RetentionPolicy) -> NormalizedEvents {
    let kept = match policy {
        RetentionPolicy::FirstSeen => keep_first_seen(events),
        RetentionPolicy::Hashed => keep_hashed(events),
    };

    let discarded = events.len() - kept.len();
    if discarded > 0 {
        tracing::debug!(
            "Contribution bounding discarded {discarded} of {} events",
            events.len()
        );
    }

    NormalizedEvents { events: kept }
}

fn keep_first_seen(events: &[Event]) -> Vec<Event> {
    let mut seen: HashSet<(NaiveDate, &str)> = HashSet::with_capacity(events.len());
    events
        .iter()
        .filter(|e| seen.insert((e.day, e.user_id.as_str())))
        .cloned()
        .collect()
}

fn keep_hashed(events: &[Event]) -> Vec<Event> {
    let mut chosen: HashMap<(NaiveDate, &str), ([u8; 32], usize)> =
        HashMap::with_capacity(events.len());

    for (idx, event) in events.iter().enumerate() {
        let digest = retention_digest(event);
        match chosen.entry((event.day, event.user_id.as_str())) {
            Entry::Vacant(slot) => {
                slot.insert((digest, idx));
            }
            Entry::Occupied(mut slot) => {
                if digest < slot.get().0 {
                    slot.insert((digest, idx));
                }
            }
        }
    }

    // Input order, so rank ties still follow first appearance.
    let mut kept: Vec<usize> = chosen.into_values().map(|(_, idx)| idx).collect();
    kept.sort_unstable();
    kept.into_iter().map(|idx| events[idx].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 7, d).expect("valid date")
    }

    fn noisy_input() -> Vec<Event> {
        vec![
            Event::new("u1", "A", day(14)),
            Event::new("u1", "B", day(14)),
            Event::new("u2", "B", day(14)),
            Event::new("u1", "C", day(15)),
            Event::new("u3", "A", day(14)),
            Event::new("u2", "B", day(14)),
            Event::new("u3", "C", day(14)),
        ]
    }

    #[test]
    fn test_first_seen_keeps_first_per_user_and_day() {
        let normalized = normalize(&noisy_input(), RetentionPolicy::FirstSeen);
        assert_eq!(
            normalized.as_slice(),
            &[
                Event::new("u1", "A", day(14)),
                Event::new("u2", "B", day(14)),
                Event::new("u1", "C", day(15)),
                Event::new("u3", "A", day(14)),
            ]
        );
    }

    #[test]
    fn test_one_event_per_user_per_day() {
        for policy in [RetentionPolicy::FirstSeen, RetentionPolicy::Hashed] {
            let normalized = normalize(&noisy_input(), policy);
            let mut keys = HashSet::new();
            for e in normalized.iter() {
                assert!(keys.insert((e.day, e.user_id.clone())), "{policy:?} kept {e:?} twice");
            }
            // u1@14, u2@14, u3@14, u1@15
            assert_eq!(normalized.len(), 4);
        }
    }

    #[test]
    fn test_hashed_is_order_independent() {
        let input = noisy_input();
        let mut reversed = input.clone();
        reversed.reverse();

        let mut forward = normalize(&input, RetentionPolicy::Hashed).as_slice().to_vec();
        let mut backward = normalize(&reversed, RetentionPolicy::Hashed).as_slice().to_vec();
        let key = |e: &Event| (e.day, e.user_id.clone(), e.item_id.clone());
        forward.sort_by_key(key);
        backward.sort_by_key(key);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_hashed_keeps_input_order() {
        let input = noisy_input();
        let normalized = normalize(&input, RetentionPolicy::Hashed);
        let positions: Vec<usize> = normalized
            .iter()
            .map(|e| input.iter().position(|i| i == e).expect("kept event is from input"))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{positions:?}");
    }

    #[test]
    fn test_kept_events_come_from_input() {
        let input = noisy_input();
        let normalized = normalize(&input, RetentionPolicy::Hashed);
        assert!(normalized.iter().all(|e| input.contains(e)));
    }

    #[test]
    fn test_never_more_than_distinct_users() {
        let input: Vec<Event> = (0..200)
            .map(|i| Event::new(format!("u{}", i % 17), format!("item{}", i % 5), day(14)))
            .collect();
        let distinct: HashSet<&str> = input.iter().map(|e| e.user_id.as_str()).collect();
        for policy in [RetentionPolicy::FirstSeen, RetentionPolicy::Hashed] {
            assert!(normalize(&input, policy).len() <= distinct.len());
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(normalize(&[], RetentionPolicy::Hashed).is_empty());
    }
}
