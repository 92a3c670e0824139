//! Weekly insights and report assembly.
//!
//! [`engine`] turns a daily series into [`common::Insights`];
//! [`ReportAssembler`] fetches the trailing week through any
//! [`common::FetchAdapter`] and caches the result.

pub mod engine;
pub mod fallback;
pub mod report;

pub use engine::{band_for, compute_insights, normalize_series};
pub use fallback::{generate_with_fallback, placeholder_series};
pub use report::{ReportAssembler, REPORT_WINDOW_DAYS};
