//! Domain layer: Core value types and formulas.
//!
//! Pure Rust types with no I/O. Everything here is safe to share across
//! worker threads.

mod budget;
pub mod diagnostics;
mod event;
mod report;

pub use budget::{BudgetCounts, CountRecord, PrivacyBudget};
pub use diagnostics::{aggregation_threshold, do_aggregate, qual_eps};
pub use event::{Event, Scope};
pub use report::{BudgetDiagnostic, BudgetSummary, DiagnosticRecord, ItemReport, Report, Violation, MISSING};
