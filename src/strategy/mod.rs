//! Trading strategy.
//!
//! - Spread evaluation against the threshold ladder
//! - Maker order lifecycle (placement, chasing, cancellation)
//! - Hedge execution with rollback on failure
//! - The engine tying them together

mod engine;
mod error;
mod hedge;
mod maker;
mod spread;

pub use engine::{ArbEngine, EngineSnapshot, TickOutcome};
pub use error::{EngineError, PlaceError};
pub use hedge::{FillOutcome, HedgeAttemptResult, HedgeContext, HedgeExecutor, HedgePurpose};
pub use maker::{ChaseReason, FillDisposition, MakerOrderController, MakerOrderState, RestingOrder};
pub use spread::{Decision, Direction, SpreadEvaluator, SpreadSnapshot, ThresholdLadder};
