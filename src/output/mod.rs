//! Output formatting module
//!
//! Renders the final run report.

mod reporter;

pub use reporter::{OutputFormat, Reporter};
