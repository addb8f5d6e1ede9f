//! Checkpoint Repair Library
//!
//! Detects runs whose recorded time between two checkpoints beats the
//! legitimate minimum, and repairs them by adding the missing ticks to every
//! checkpoint downstream of the segment's end, one verified transaction per
//! run.

pub mod audit;
pub mod config;
pub mod detector;
pub mod error;
pub mod graph;
pub mod models;
pub mod orchestrator;
pub mod repair;
pub mod report;
pub mod store;
pub mod validation;

pub use error::{RepairError, ValidationError};
pub use orchestrator::{CheatRunFixer, FixRequest};
pub use store::SqliteLedger;
