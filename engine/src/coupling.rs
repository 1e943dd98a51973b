//! Joint coupling: turns one requested primary-joint delta into a batch of
//! deltas for every joint a compound movement ties to it.

use std::fmt;

use blocks::{CompoundMovement, Formula, JointId, RobotProfile};

use crate::error::{EngineError, FormulaError, ValidationError};
use crate::evaluator::{Scalars, evaluate};
use crate::joints::JointState;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointDelta {
    pub joint: JointId,
    pub delta: f64,
}

impl fmt::Display for JointDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "joint {} {:+.2}°", self.joint, self.delta)
    }
}

/// Deltas to apply together: primary joint first, then dependents in rule order.
#[derive(Debug, Clone, PartialEq)]
pub struct CouplingBatch {
    /// Name of the rule that produced the batch, if any matched.
    pub movement: Option<String>,
    pub deltas: Vec<JointDelta>,
}

impl CouplingBatch {
    fn single(joint: JointId, delta: f64) -> Self {
        CouplingBatch {
            movement: None,
            deltas: vec![JointDelta { joint, delta }],
        }
    }

    pub fn primary_delta(&self) -> f64 {
        self.deltas.first().map_or(0.0, |d| d.delta)
    }

    pub fn delta_for(&self, joint: JointId) -> Option<f64> {
        self.deltas.iter().find(|d| d.joint == joint).map(|d| d.delta)
    }
}

pub struct CouplingResolver<'a> {
    profile: &'a RobotProfile,
}

impl<'a> CouplingResolver<'a> {
    pub fn new(profile: &'a RobotProfile) -> Self {
        CouplingResolver { profile }
    }

    /// Resolve with the first rule whose primary joint is `primary`. With no
    /// matching rule the batch moves only the primary joint, by `requested`.
    pub fn resolve(
        &self,
        primary: JointId,
        requested: f64,
        state: &JointState,
    ) -> Result<CouplingBatch, FormulaError> {
        match self.profile.movements_for(primary).next() {
            Some(movement) => self.resolve_with(movement, requested, state),
            None => Ok(CouplingBatch::single(primary, requested)),
        }
    }

    /// Resolve with the rule called `name`.
    pub fn resolve_movement(
        &self,
        name: &str,
        requested: f64,
        state: &JointState,
    ) -> Result<CouplingBatch, EngineError> {
        let movement = self
            .profile
            .movement(name)
            .ok_or_else(|| ValidationError::UnknownMovement(name.to_string()))?;
        Ok(self.resolve_with(movement, requested, state)?)
    }

    pub fn resolve_with(
        &self,
        movement: &CompoundMovement,
        requested: f64,
        state: &JointState,
    ) -> Result<CouplingBatch, FormulaError> {
        let primary_angle = state.angle(movement.primary_joint).unwrap_or(0.0);

        let effective = match &movement.primary_formula {
            Some(formula) => {
                let first_dependent = movement
                    .dependents
                    .first()
                    .and_then(|d| state.angle(d.joint))
                    .unwrap_or(0.0);
                let scalars = Scalars {
                    primary: primary_angle,
                    dependent: first_dependent,
                    delta_primary: requested,
                };
                let multiplier = run(movement, "primary formula", formula, &scalars)?;
                requested * multiplier
            }
            None => requested,
        };

        let mut deltas = Vec::with_capacity(movement.dependents.len() + 1);
        deltas.push(JointDelta {
            joint: movement.primary_joint,
            delta: effective,
        });

        for dependent in &movement.dependents {
            let scalars = Scalars {
                primary: primary_angle,
                dependent: state.angle(dependent.joint).unwrap_or(0.0),
                delta_primary: effective,
            };
            let location = format!("dependent joint {}", dependent.joint);
            let delta = run(movement, &location, &dependent.formula, &scalars)?;
            deltas.push(JointDelta {
                joint: dependent.joint,
                delta,
            });
        }

        Ok(CouplingBatch {
            movement: Some(movement.name.clone()),
            deltas,
        })
    }
}

fn run(
    movement: &CompoundMovement,
    location: &str,
    formula: &Formula,
    scalars: &Scalars,
) -> Result<f64, FormulaError> {
    evaluate(formula, scalars).map_err(|error| FormulaError {
        movement: movement.name.clone(),
        location: location.to_string(),
        formula: formula.source.clone(),
        error,
    })
}
