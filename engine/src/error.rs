use std::fmt;

use blocks::{BlockId, JointId};
use thiserror::Error;

use crate::link::LinkError;

/// Errors that end a run or reject a direct joint update.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("robot link failure: {0}")]
    Link(#[from] LinkError),
    #[error(transparent)]
    Formula(#[from] FormulaError),
}

/// A request the engine refuses before touching the robot.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("nothing to run: the program has no blocks")]
    EmptyProgram,
    #[error("robot control unavailable: no connected robot link")]
    LinkUnavailable,
    #[error("a program is already running")]
    AlreadyRunning,
    #[error("unknown joint {0}")]
    UnknownJoint(JointId),
    #[error("unknown compound movement '{0}'")]
    UnknownMovement(String),
    #[error("joint {joint} cannot reach {target:.2}°: outside its limits")]
    OutOfRange { joint: JointId, target: f64 },
}

/// Arithmetic failure while evaluating a formula.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("non-finite result {0}")]
    NonFinite(f64),
    #[error("type error: expected {expected}, got {got}")]
    TypeError {
        expected: &'static str,
        got: &'static str,
    },
}

/// A coupling formula that could not produce a finite delta. The whole
/// update it belonged to is rejected.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("movement '{movement}', {location}: {error} in `{formula}`")]
pub struct FormulaError {
    pub movement: String,
    pub location: String,
    pub formula: String,
    #[source]
    pub error: EvalError,
}

/// A block skipped during a run. The run carries on.
#[derive(Debug, Clone, PartialEq)]
pub struct RunWarning {
    pub block_id: BlockId,
    pub message: String,
}

impl RunWarning {
    pub fn new(block_id: &BlockId, message: impl Into<String>) -> Self {
        RunWarning {
            block_id: block_id.clone(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RunWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.block_id, self.message)
    }
}
