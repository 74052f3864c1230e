//! Procedure and plan contracts.

use std::any::Any;

use async_trait::async_trait;

/// Boxed procedure operating on state `S`.
pub type BoxProcedure<S> = Box<dyn Procedure<S>>;

/// One idempotent action.
///
/// A procedure describes *what* to do to one resource; the state it reads and
/// mutates is passed in by the [`crate::Actuator`]. Every procedure in a pass
/// receives the same state in turn, so a later procedure observes what an
/// earlier one recorded.
#[async_trait]
pub trait Procedure<S: Send + Sync>: Send + Sync {
    /// Stable name for logging. Not used for equality.
    fn name(&self) -> &str;

    /// Whether the action still needs to run.
    ///
    /// Must be safe to call repeatedly. Returning `false` means the
    /// postcondition already holds.
    async fn should_do(&self, state: &S) -> anyhow::Result<bool>;

    /// Performs the action, recording results in `state`.
    ///
    /// May return follow-up procedures; they run immediately, before the
    /// rest of the enclosing list.
    async fn execute(&self, state: &mut S) -> anyhow::Result<Vec<BoxProcedure<S>>>;
}

/// The ordered procedures for one reconciliation pass.
#[async_trait]
pub trait Plan<S: Send + Sync>: Send + Sync {
    fn name(&self) -> &str;

    /// Computes the steps for this pass.
    ///
    /// Every call builds a new list from `state`; calling it twice without
    /// an intervening change yields the same step names in the same order.
    async fn create(&self, state: &mut S) -> anyhow::Result<Vec<BoxProcedure<S>>>;

    /// Optional opaque result for callers.
    fn result(&self) -> Option<&(dyn Any + Send + Sync)> {
        None
    }
}
