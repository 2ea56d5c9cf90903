//! Task policy layer for Kritai: task registry, result ledger, and the
//! leaderboard ranking comparator.

pub mod layout;
pub mod ledger;
pub mod ranking;
pub mod task;

pub use ledger::ResultRow;
pub use ranking::best_result;
pub use task::{Task, TaskRegistry};
