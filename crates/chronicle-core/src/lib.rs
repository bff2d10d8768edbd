//! Core types for the Chronicle temporal audit engine.
//!
//! This crate is deliberately free of database dependencies. The engine
//! crate (`chronicle-engine`) depends on it; it depends on nothing but
//! serialization and id/time primitives.

pub mod entry;
pub mod error;
pub mod meta;
pub mod query;
pub mod uid;
pub mod value;

pub use error::{Error, Result};
