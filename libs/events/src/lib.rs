//! # kiln-events
//!
//! Event type definitions for microVM spec changes.
//!
//! ## Design Principles
//!
//! - Events are immutable notices that a spec changed
//! - Events carry only the identity of the microVM, never its MicroVmSpec;
//!   listeners re-fetch current state, so a lost event is repaired by the
//!   next resync
//! - Every event is published on a named topic
//!
//! ## Event Types
//!
//! - `microvm.spec_created`
//! - `microvm.spec_updated`
//! - `microvm.spec_deleted`

mod envelope;
mod error;
mod types;

pub use envelope::EventEnvelope;
pub use error::EventError;
pub use types::*;
