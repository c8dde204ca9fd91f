//! Lot selector for a single prescription line.
//!
//! Stateless: FEFO suggestion and proposal validation over a lot snapshot.

mod fefo;
mod validation;

pub use fefo::*;
pub use validation::*;
