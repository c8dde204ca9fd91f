//! Dispatch reconciler.
//!
//! Drives one prescription through allocation to a single outcome:
//!
//! ```text
//!   Selecting ──(completion predicate holds)──▶ ReadyToConfirm
//!       ▲  │                                        │
//!       │  └──────────── abort ───────▶ Aborted ◀───┤
//!       │                                           │
//!       └──────(re-validation fails)─── confirm ────┤
//!                                                   ▼
//!                                               Committed ──▶ DispatchRecord
//! ```
//!
//! Confirmation always re-validates against a freshly fetched lot snapshot.

mod session;
mod state;

pub use session::*;
pub use state::*;
