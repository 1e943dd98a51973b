//! Runs block programs against a robot link and resolves joint coupling.

pub mod action;
pub mod coupling;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod joints;
pub mod link;
pub mod simulated;

pub use action::Action;
pub use coupling::{CouplingBatch, CouplingResolver, JointDelta};
pub use error::{EngineError, EvalError, FormulaError, RunWarning, ValidationError};
pub use executor::{EngineConfig, EngineHandle, EngineState, ExecutionEngine, RunOutcome, RunReport};
pub use joints::JointState;
pub use link::{JointCommand, LinkError, RobotLink};
pub use simulated::{DispatchRecord, SimulatedLink};
