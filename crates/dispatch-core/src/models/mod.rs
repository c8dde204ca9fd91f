//! Domain models for the dispatch engine.

mod allocation;
mod lot;
mod prescription;
mod record;

pub use allocation::*;
pub use lot::*;
pub use prescription::*;
pub use record::*;
