//! SQLite-backed temporal audit engine.
//!
//! The engine intercepts reads and writes against *tracked* tables to keep
//! an append-only per-column change ledger, turns deletes into an `active`
//! flag flip in a row registry, and reconstructs any tracked row or column
//! as it stood at a past instant. It wraps [`rusqlite`] directly and
//! assumes one logical writer per unit of work.

mod encode;
mod interceptor;
mod metadata;
mod reconstruct;
mod registry;
mod schema;
mod sql;

pub mod engine;
pub mod error;
pub mod ledger;

pub use engine::{Engine, Exec, InterceptPause};
pub use error::{Error, Result};
pub use ledger::RecentChange;

#[cfg(test)]
mod tests;
