//! Analysis modules.
//!
//! Bucketing and statistics live here; loading and reporting are handled
//! by their own modules.

pub mod aggregator;
pub mod comparison;
pub mod summary;

pub use comparison::{plan, ComparisonRunner};
pub use summary::{summarize_all, t_tests};
