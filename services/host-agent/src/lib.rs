//! kiln host agent
//!
//! Reconciles stored microVM specs against the local host. Each pass builds
//! a plan of idempotent steps (state directory, image mounts, network
//! devices, provider create/start or teardown) and runs it with the
//! [`kiln_reconcile::Actuator`].
//!
//! ## Layout
//!
//! - [`models`]: the microVM aggregate
//! - [`ports`]: traits for everything outside the process
//! - [`steps`] and [`plans`]: what a pass does
//! - [`application`]: reconcile, command and query use cases
//! - [`controller`]: event listener and worker pool
//! - [`state`], [`events`], [`network`], [`fs`], [`mock`]: port implementations

pub mod application;
pub mod config;
pub mod controller;
pub mod events;
pub mod fs;
pub mod mock;
pub mod models;
pub mod network;
pub mod plans;
pub mod ports;
pub mod state;
pub mod steps;

pub use application::{App, AppConfig, AppError};
pub use controller::{ControllerOptions, ControllerState, MicroVmController};
