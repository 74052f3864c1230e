//! Reconciliation primitives.
//!
//! This library provides the building blocks for reconciliation loops
//! that converge observed state to desired state. Key concepts:
//!
//! - **Procedure**: one idempotent action with a should-run predicate.
//! - **Plan**: the ordered procedures for one pass over one entity, computed
//!   fresh on every pass.
//! - **Actuator**: runs a plan's procedures in order against shared state.
//! - **WorkQueue**: deduplicating FIFO of entity keys awaiting a pass.
//!
//! # Invariants
//!
//! - Procedures are idempotent; `should_do` never mutates state
//! - Plans are deterministic given the same state
//! - A key is queued at most once at a time

mod actuator;
mod cancel;
mod error;
mod locks;
mod plan;
mod queue;

pub use actuator::Actuator;
pub use cancel::CancelToken;
pub use error::ActuatorError;
pub use locks::{KeyedGuard, KeyedLocks};
pub use plan::{BoxProcedure, Plan, Procedure};
pub use queue::WorkQueue;
