//! Sweep configuration.
//!
//! Loaded from defaults, environment overrides or a JSON file, then
//! validated into a [`ValidatedConfig`] before any aggregation starts.

use std::num::NonZeroUsize;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::PrivacyBudget;
use crate::{DpViewsError, Result};

/// How the normalizer picks the one event it keeps per (day, user).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetentionPolicy {
    /// Keep the event with the smallest SHA-256 of `day|user|item`.
    /// Independent of the order the source returns events in.
    #[default]
    Hashed,

    /// Keep the first event in input order.
    FirstSeen,
}

impl FromStr for RetentionPolicy {
    type Err = DpViewsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hashed" => Ok(Self::Hashed),
            "first-seen" | "first_seen" | "firstseen" => Ok(Self::FirstSeen),
            other => Err(DpViewsError::InvalidConfiguration(format!(
                "unknown retention policy {other:?} (expected hashed or first-seen)"
            ))),
        }
    }
}

/// Operator-supplied sweep parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SweepConfig {
    /// Epsilon values of the grid.
    pub epsilons: Vec<f64>,

    /// Delta values of the grid. Carried through; Laplace noise ignores it.
    pub deltas: Vec<f64>,

    /// L1 sensitivity used for noise scale and diagnostics.
    pub sensitivity: i64,

    /// Two-tailed confidence parameter for suppression (0.5 = 50%).
    pub alpha: f64,

    /// Tolerated relative error for suppression (0.25 = 25%).
    pub prop_within: f64,

    /// Worker threads for the sweep; `None` uses available parallelism.
    pub workers: Option<usize>,

    pub retention: RetentionPolicy,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            epsilons: vec![0.1, 0.5, 1.0, 5.0],
            deltas: vec![1e-4, 1e-2, 0.1, 0.5],
            sensitivity: 1,
            alpha: 0.5,
            prop_within: 0.25,
            workers: None,
            retention: RetentionPolicy::default(),
        }
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim().parse::<T>().map_err(|_| {
        DpViewsError::InvalidConfiguration(format!("{name}={raw:?} is not a valid value"))
    })
}

fn parse_list(name: &str, raw: &str) -> Result<Vec<f64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| parse_value::<f64>(name, part))
        .collect()
}

impl SweepConfig {
    /// Defaults with overrides from the environment.
    ///
    /// Supported:
    /// - DPVIEWS_EPSILONS="0.1,0.5,1"
    /// - DPVIEWS_DELTAS="0.0001,0.01"
    /// - DPVIEWS_SENSITIVITY, DPVIEWS_ALPHA, DPVIEWS_PROP_WITHIN
    /// - DPVIEWS_WORKERS
    /// - DPVIEWS_RETENTION=hashed|first-seen
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` if a set variable does not parse.
    pub fn from_env_or_default() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<L>(lookup: L) -> Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(v) = lookup("DPVIEWS_EPSILONS") {
            cfg.epsilons = parse_list("DPVIEWS_EPSILONS", &v)?;
        }
        if let Some(v) = lookup("DPVIEWS_DELTAS") {
            cfg.deltas = parse_list("DPVIEWS_DELTAS", &v)?;
        }
        if let Some(v) = lookup("DPVIEWS_SENSITIVITY") {
            cfg.sensitivity = parse_value("DPVIEWS_SENSITIVITY", &v)?;
        }
        if let Some(v) = lookup("DPVIEWS_ALPHA") {
            cfg.alpha = parse_value("DPVIEWS_ALPHA", &v)?;
        }
        if let Some(v) = lookup("DPVIEWS_PROP_WITHIN") {
            cfg.prop_within = parse_value("DPVIEWS_PROP_WITHIN", &v)?;
        }
        if let Some(v) = lookup("DPVIEWS_WORKERS") {
            cfg.workers = Some(parse_value("DPVIEWS_WORKERS", &v)?);
        }
        if let Some(v) = lookup("DPVIEWS_RETENTION") {
            cfg.retention = v.parse()?;
        }

        Ok(cfg)
    }

    /// Load a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Check every parameter and expand the epsilon × delta grid.
    ///
    /// Duplicate epsilon or delta values are collapsed so each pair appears
    /// once. Grid order is epsilon-major in configuration order.
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` describing the first violation.
    pub fn validate(&self) -> Result<ValidatedConfig> {
        let invalid = |msg: String| {
            tracing::error!("Refusing configuration: {msg}");
            Err(DpViewsError::InvalidConfiguration(msg))
        };

        if self.epsilons.is_empty() {
            return invalid("epsilon set is empty".to_string());
        }
        if self.deltas.is_empty() {
            return invalid("delta set is empty".to_string());
        }
        if let Some(e) = self.epsilons.iter().find(|e| !(e.is_finite() && **e > 0.0)) {
            return invalid(format!("epsilon must be finite and > 0, got {e}"));
        }
        if let Some(d) = self.deltas.iter().find(|d| !(d.is_finite() && **d >= 0.0)) {
            return invalid(format!("delta must be finite and >= 0, got {d}"));
        }
        if self.sensitivity <= 0 {
            return invalid(format!("sensitivity must be > 0, got {}", self.sensitivity));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return invalid(format!("alpha must be in (0, 1), got {}", self.alpha));
        }
        if !(self.prop_within > 0.0 && self.prop_within < 1.0) {
            return invalid(format!("propWithin must be in (0, 1), got {}", self.prop_within));
        }
        let workers = match self.workers {
            Some(n) => match NonZeroUsize::new(n) {
                Some(n) => n,
                None => return invalid("workers must be > 0".to_string()),
            },
            None => std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN),
        };

        let epsilons = dedup(&self.epsilons);
        let deltas = dedup(&self.deltas);
        let budgets = epsilons
            .iter()
            .flat_map(|&e| deltas.iter().map(move |&d| PrivacyBudget::new(e, d)))
            .collect();

        Ok(ValidatedConfig {
            budgets,
            sensitivity: self.sensitivity,
            alpha: self.alpha,
            prop_within: self.prop_within,
            workers,
            retention: self.retention,
        })
    }
}

/// Drop repeated values, keeping first occurrences. `-0.0` folds into `0.0`.
fn dedup(values: &[f64]) -> Vec<f64> {
    let mut out: Vec<f64> = Vec::with_capacity(values.len());
    for &v in values {
        let v = if v == 0.0 { 0.0 } else { v };
        if !out.iter().any(|seen| seen.to_bits() == v.to_bits()) {
            out.push(v);
        }
    }
    out
}

/// Configuration that passed [`SweepConfig::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfig {
    /// Every non-sentinel budget, each exactly once.
    pub budgets: Vec<PrivacyBudget>,
    pub sensitivity: i64,
    pub alpha: f64,
    pub prop_within: f64,
    pub workers: NonZeroUsize,
    pub retention: RetentionPolicy,
}
