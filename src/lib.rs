//! Trade Council
//!
//! A multi-agent deliberation engine that produces a trading decision for
//! one (security, date) pair by:
//! - Running specialist analysts (market, social, news, fundamentals)
//! - Mediating a bull/bear researcher debate and a three-way risk debate
//! - Grounding every agent in precedent retrieved from hybrid memory
//! - Merging static data tools with dynamically discovered external tools
//!
//! PIPELINE:
//! ANALYSTS → RESEARCHER DEBATE → RISK DEBATE → DECISION → MEMORY WRITE-BACK

pub mod agents;
pub mod api;
pub mod archive;
pub mod config;
pub mod controller;
pub mod debate;
pub mod decision;
pub mod error;
pub mod memory;
pub mod models;
pub mod reasoning;
pub mod session;
pub mod tools;

pub use error::{CouncilError, ErrorKind, Result};

// Re-export common types
pub use config::Config;
pub use models::*;
pub use session::Session;
