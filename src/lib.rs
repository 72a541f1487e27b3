//! tabula — a natural-language agent for spreadsheet-like data.
//!
//! A language model plans an ordered sequence of table operations from a
//! fixed catalog; the orchestrator executes them against per-file sessions,
//! tracking which table is active and isolating per-step failures.

pub mod agent;
pub mod describe;
pub mod error;
pub mod llm;
pub mod output;
pub mod plot;
pub mod pool;
pub mod registry;
pub mod session;
pub mod settings;
pub mod table;
