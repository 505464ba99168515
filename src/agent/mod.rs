//! Agent module: the chat session and everything it records.
//!
//! - `session`: the per-turn state machine (model → parse → gate → execute)
//! - `parser`: tool-call extraction from raw assistant messages
//! - `audit`: append-only JSONL audit log
//! - `console`: shared operator line reader

pub mod audit;
pub mod console;
pub mod parser;
pub mod session;

pub use audit::{AuditEntry, AuditLog};
pub use console::Console;
pub use parser::{ParsedResponse, ResponseShape, parse_response};
pub use session::{ChatSession, TurnOutcome};
