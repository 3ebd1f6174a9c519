//! Exact and differentially private aggregators.
//!
//! Both group normalized events by item. Records come out in order of each
//! item's first appearance in the normalized events; the reconciler relies
//! on that order to break rank ties.

use std::collections::HashMap;

use super::normalize::NormalizedEvents;
use crate::domain::{BudgetCounts, CountRecord, PrivacyBudget};
use crate::ports::{DpError, NoiseSource};

/// True count per item, in first-seen order.
fn grouped_counts(events: &NormalizedEvents) -> Vec<(&str, i64)> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut counts: Vec<(&str, i64)> = Vec::new();

    for event in events.iter() {
        let item = event.item_id.as_str();
        match index.get(item) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(item, counts.len());
                counts.push((item, 1));
            }
        }
    }
    counts
}

/// Exact count of every item, tagged with the sentinel budget.
#[must_use]
pub fn exact_counts(events: &NormalizedEvents) -> BudgetCounts {
    let records = grouped_counts(events)
        .into_iter()
        .map(|(item, count)| CountRecord {
            item_id: item.to_string(),
            count,
            budget: PrivacyBudget::EXACT,
        })
        .collect();

    BudgetCounts {
        budget: PrivacyBudget::EXACT,
        records,
    }
}

/// Laplace-noised count of every item with at least one event.
///
/// Each item's true count gets one independent draw from
/// `Laplace(sensitivity / epsilon)` and is rounded to the nearest integer.
/// Results are not clamped and may be negative. Items without events get
/// no row. Delta is recorded on the records but not used.
///
/// # Errors
/// Returns `DpError::InvalidEpsilon` for non-positive epsilon,
/// `DpError::InvalidSensitivity` for non-positive sensitivity, or whatever
/// the noise source reports.
pub fn private_counts<N: NoiseSource + ?Sized>(
    events: &NormalizedEvents,
    budget: PrivacyBudget,
    sensitivity: i64,
    noise: &mut N,
) -> Result<BudgetCounts, DpError> {
    if !budget.epsilon.is_finite() || budget.epsilon <= 0.0 {
        return Err(DpError::InvalidEpsilon(budget.epsilon));
    }

    let records = grouped_counts(events)
        .into_iter()
        .map(|(item, count)| {
            let noised = noise.add_laplace_noise(count as f64, sensitivity, budget.epsilon)?;
            Ok(CountRecord {
                item_id: item.to_string(),
                count: noised.round() as i64,
                budget,
            })
        })
        .collect::<Result<Vec<_>, DpError>>()?;

    Ok(BudgetCounts { budget, records })
}
