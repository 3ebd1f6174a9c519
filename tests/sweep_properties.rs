//! End-to-end properties of the popularity engine, through the public API.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::NaiveDate;
use dpviews::adapters::{ChaChaNoiseFactory, InMemoryEventSource};
use dpviews::application::{aggregate, normalize, SweepController};
use dpviews::domain::{aggregation_threshold, do_aggregate, qual_eps};
use dpviews::ports::NoiseSourceFactory;
use dpviews::{Event, PopularityService, PrivacyBudget, RetentionPolicy, Scope, SweepConfig};

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 7, 14).expect("valid date")
}

fn visits(layout: &[(&str, usize)]) -> Vec<Event> {
    let mut events = Vec::new();
    let mut user = 0;
    for &(item, count) in layout {
        for _ in 0..count {
            events.push(Event::new(format!("visitor-{user}"), item, day()));
            user += 1;
        }
    }
    events
}

#[test]
fn belief_bound_is_between_prior_and_certainty() {
    for &p in &[0.01, 0.25, 0.5, 0.75, 0.99] {
        for &eps in &[0.01, 0.1, 0.5, 1.0, 5.0] {
            let q = qual_eps(eps, p);
            assert!(q > p && q < 1.0, "qual_eps({eps}, {p}) = {q}");
        }
        assert!((qual_eps(0.0, p) - p).abs() < 1e-12);
    }
    for &p in &[-0.5, 0.0, 1.0, 1.5] {
        assert_eq!(qual_eps(1.0, p), -1.0);
    }
}

#[test]
fn threshold_falls_as_epsilon_grows() {
    let thresholds: Vec<f64> = [0.1, 0.5, 1.0, 5.0]
        .iter()
        .map(|&eps| aggregation_threshold(1, eps, 0.5, 0.25))
        .collect();
    assert!(thresholds.windows(2).all(|w| w[0] > w[1]), "{thresholds:?}");
}

#[test]
fn zero_count_is_always_suppressed() {
    assert!(do_aggregate(0, 1, 0.1, 0.5, 0.25));
}

#[test]
fn exact_ranks_are_deterministic() {
    let config = SweepConfig {
        epsilons: vec![5.0],
        deltas: vec![0.0],
        ..SweepConfig::default()
    };
    for _ in 0..5 {
        let service = PopularityService::new(
            Arc::new(InMemoryEventSource::new(visits(&[("A", 5), ("B", 3), ("C", 2)]))),
            Arc::new(ChaChaNoiseFactory::new()),
            &config,
        )
        .expect("service");
        let report = service.run(&Scope::new("en", day())).expect("report");

        let ranks: Vec<(&str, i64, i64)> = report
            .ranked()
            .into_iter()
            .map(|(id, item)| (id, item.exact_rank, item.exact_count))
            .collect();
        assert_eq!(ranks, vec![("A", 1, 5), ("B", 2, 3), ("C", 3, 2)]);

        // Noise changes between runs; the pairing with exact data does not.
        for (id, item) in &report.items {
            let entry = &item.per_budget["5|0"];
            assert!((1..=3).contains(&entry.noised_rank), "{id}: {entry:?}");
        }
        let noised_ranks: HashSet<i64> = report
            .items
            .values()
            .map(|i| i.per_budget["5|0"].noised_rank)
            .collect();
        assert_eq!(noised_ranks.len(), 3);
    }
}

#[test]
fn independent_runs_draw_different_noise() {
    let budget = PrivacyBudget::new(5.0, 0.0);
    let items: Vec<(String, usize)> = (0..100).map(|i| (format!("page-{i}"), 3)).collect();
    let layout: Vec<(&str, usize)> = items.iter().map(|(s, n)| (s.as_str(), *n)).collect();
    let events = normalize(&visits(&layout), RetentionPolicy::Hashed);

    let run = || {
        let mut source = ChaChaNoiseFactory::new().source_for(&budget).expect("source");
        aggregate::private_counts(&events, budget, 1, &mut source).expect("counts")
    };
    assert_ne!(run(), run());
}

#[test]
fn sweep_yields_one_result_set_per_pair_plus_exact() {
    let epsilons = [0.1, 0.5, 1.0, 5.0];
    let deltas = [0.0001, 0.01, 0.1];
    let config = SweepConfig {
        epsilons: epsilons.to_vec(),
        deltas: deltas.to_vec(),
        ..SweepConfig::default()
    }
    .validate()
    .expect("valid");

    let factory = ChaChaNoiseFactory::new();
    let events = normalize(&visits(&[("A", 4), ("B", 2)]), RetentionPolicy::Hashed);
    let outcome = SweepController::new(&factory, 1, NonZeroUsize::new(3).expect("non-zero"))
        .run(&events, &config.budgets)
        .expect("sweep");

    assert_eq!(outcome.result_sets(), epsilons.len() * deltas.len() + 1);
    let mut keys: HashSet<String> = outcome.noised.iter().map(|c| c.key()).collect();
    keys.insert(outcome.exact.key());
    assert_eq!(keys.len(), outcome.result_sets());
}

#[test]
fn normalized_events_never_exceed_distinct_users() {
    let events: Vec<Event> = (0..500)
        .map(|i| Event::new(format!("u{}", i % 37), format!("p{}", i % 11), day()))
        .collect();
    for policy in [RetentionPolicy::Hashed, RetentionPolicy::FirstSeen] {
        assert_eq!(normalize(&events, policy).len(), 37);
    }
}
