//! Utility diagnostics for released counts.
//!
//! Pure formulas that turn a privacy budget and a noised value into signals
//! a consumer can act on: how much an observer's belief about one user can
//! move, and whether a noised count is too noisy to publish.
//!
//! None of these functions fail. Arguments outside their domain yield
//! [`SENTINEL`] (or, for [`do_aggregate`], `true`, i.e. suppress).
//!
//! Confidence intervals follow the two-tailed Laplace quantile described in
//! <https://arxiv.org/pdf/2009.01265.pdf#section.4>.

/// Returned for undefined inputs.
pub const SENTINEL: f64 = -1.0;

/// Prior belief used when a single headline number is wanted.
pub const DEFAULT_PRIOR: f64 = 0.5;

/// Worst-case posterior belief that a given user is in the data.
///
/// If an observer believed a user was present with probability `prior`, after
/// seeing one `epsilon`-DP release they can be at most `qual_eps(epsilon,
/// prior)` certain. For `epsilon = 1`, `prior = 0.5` that is about 0.731.
///
/// `prior` must lie in `(0, 1)` and `epsilon` must be finite and
/// non-negative, otherwise [`SENTINEL`] is returned. `epsilon = 0` returns
/// `prior` unchanged.
#[must_use]
pub fn qual_eps(epsilon: f64, prior: f64) -> f64 {
    if !(prior > 0.0 && prior < 1.0) || !epsilon.is_finite() || epsilon < 0.0 {
        return SENTINEL;
    }

    let growth = epsilon.exp();
    if !growth.is_finite() {
        return 1.0;
    }
    (growth * prior) / (1.0 + (growth - 1.0) * prior)
}

/// Half-width of the `(1 - alpha)` two-tailed interval of `Laplace(sensitivity
/// / epsilon)`, or `None` outside the domain.
fn confidence_interval(sensitivity: i64, epsilon: f64, alpha: f64) -> Option<f64> {
    if sensitivity <= 0 || !epsilon.is_finite() || epsilon <= 0.0 {
        return None;
    }
    if !(alpha > 0.0 && alpha < 1.0) {
        return None;
    }

    let rank = alpha / 2.0;
    let scale = sensitivity as f64 / epsilon;
    Some((scale * (2.0 * rank).ln()).abs())
}

fn valid_prop_within(prop_within: f64) -> bool {
    prop_within.is_finite() && prop_within > 0.0
}

/// Smallest noised magnitude whose interval stays within `prop_within` of
/// the value: `ceil(ci / prop_within)`.
///
/// Decreases as `epsilon` grows. Returns [`SENTINEL`] for non-positive
/// sensitivity or epsilon, `alpha` outside `(0, 1)` or non-positive
/// `prop_within`.
#[must_use]
pub fn aggregation_threshold(sensitivity: i64, epsilon: f64, alpha: f64, prop_within: f64) -> f64 {
    if !valid_prop_within(prop_within) {
        return SENTINEL;
    }
    match confidence_interval(sensitivity, epsilon, alpha) {
        Some(ci) => (ci / prop_within).ceil(),
        None => SENTINEL,
    }
}

/// Whether `noised` is too noisy to trust and should be suppressed until
/// it can be aggregated further.
///
/// True when there is less than `1 - alpha` confidence that `noised` is
/// within `prop_within` of the true value. Uses only the noised value and
/// public parameters, so calling it costs no privacy. Undefined inputs
/// suppress.
#[must_use]
pub fn do_aggregate(noised: i64, sensitivity: i64, epsilon: f64, alpha: f64, prop_within: f64) -> bool {
    if !valid_prop_within(prop_within) {
        return true;
    }
    match confidence_interval(sensitivity, epsilon, alpha) {
        Some(ci) => ci > prop_within * noised as f64,
        None => true,
    }
}
