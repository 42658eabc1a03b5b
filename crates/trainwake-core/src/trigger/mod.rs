mod evaluator;
mod state;

pub use evaluator::{FireReason, Tick, TriggerDecision, TriggerEvaluator};
pub use state::{AlertPhase, AlertProgress, SubMode};
