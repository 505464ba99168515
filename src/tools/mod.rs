//! Tool catalogue for the operations agent.
//!
//! - `registry`: the closed set of invocable tools and their schemas
//! - `sanitize`: typed, validated arguments (fails closed)
//! - `risk`: pure risk classification of a sanitized call

pub mod registry;
pub mod risk;
pub mod sanitize;

pub use registry::{ToolKind, ToolRegistry, ToolSpec};
pub use risk::RiskLevel;
pub use sanitize::SanitizedArguments;
