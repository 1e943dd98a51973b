use blocks::{JointId, RobotProfile};

use crate::coupling::JointDelta;
use crate::error::ValidationError;
use crate::link::JointCommand;

/// Last acknowledged angle of every joint, in profile declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct JointState {
    angles: Vec<(JointId, f64)>,
}

impl JointState {
    /// Every joint at its home angle.
    pub fn from_profile(profile: &RobotProfile) -> Self {
        JointState {
            angles: profile.initial_angles(),
        }
    }

    pub fn angle(&self, joint: JointId) -> Option<f64> {
        self.angles
            .iter()
            .find(|(id, _)| *id == joint)
            .map(|(_, angle)| *angle)
    }

    pub fn angles(&self) -> &[(JointId, f64)] {
        &self.angles
    }

    /// Overwrite one joint's angle. Unknown joints are ignored.
    pub fn set(&mut self, joint: JointId, degrees: f64) {
        if let Some(entry) = self.angles.iter_mut().find(|(id, _)| *id == joint) {
            entry.1 = degrees;
        }
    }

    /// Absolute commands for a set of relative moves, clamped to joint limits.
    ///
    /// A joint named more than once accumulates its deltas into one command.
    /// Nothing is written to the state.
    pub fn plan_deltas(
        &self,
        profile: &RobotProfile,
        deltas: &[JointDelta],
    ) -> Result<Vec<JointCommand>, ValidationError> {
        let mut commands: Vec<JointCommand> = Vec::with_capacity(deltas.len());
        for delta in deltas {
            let limits = profile
                .joint(delta.joint)
                .ok_or(ValidationError::UnknownJoint(delta.joint))?;
            if let Some(existing) = commands.iter_mut().find(|c| c.joint == delta.joint) {
                existing.angle_degrees = limits.clamp(existing.angle_degrees + delta.delta);
                continue;
            }
            let current = self
                .angle(delta.joint)
                .ok_or(ValidationError::UnknownJoint(delta.joint))?;
            commands.push(JointCommand::new(delta.joint, limits.clamp(current + delta.delta)));
        }
        Ok(commands)
    }

    /// Absolute commands for a coupled batch. Nothing is clamped: if any joint
    /// would leave its limits the whole batch is refused, so the joints keep
    /// moving in their configured ratio.
    pub fn plan_batch(
        &self,
        profile: &RobotProfile,
        deltas: &[JointDelta],
    ) -> Result<Vec<JointCommand>, ValidationError> {
        let mut commands: Vec<JointCommand> = Vec::with_capacity(deltas.len());
        for delta in deltas {
            if let Some(existing) = commands.iter_mut().find(|c| c.joint == delta.joint) {
                existing.angle_degrees += delta.delta;
                continue;
            }
            let current = self
                .angle(delta.joint)
                .ok_or(ValidationError::UnknownJoint(delta.joint))?;
            commands.push(JointCommand::new(delta.joint, current + delta.delta));
        }
        for command in &commands {
            let limits = profile
                .joint(command.joint)
                .ok_or(ValidationError::UnknownJoint(command.joint))?;
            if !limits.within_limits(command.angle_degrees) {
                return Err(ValidationError::OutOfRange {
                    joint: command.joint,
                    target: command.angle_degrees,
                });
            }
        }
        Ok(commands)
    }

    /// Absolute commands for explicit targets, clamped to joint limits.
    pub fn plan_targets(
        &self,
        profile: &RobotProfile,
        targets: &[(JointId, f64)],
    ) -> Result<Vec<JointCommand>, ValidationError> {
        targets
            .iter()
            .map(|&(joint, degrees)| {
                let limits = profile
                    .joint(joint)
                    .ok_or(ValidationError::UnknownJoint(joint))?;
                Ok(JointCommand::new(joint, limits.clamp(degrees)))
            })
            .collect()
    }

    /// Record an acknowledged batch.
    pub fn commit(&mut self, commands: &[JointCommand]) {
        for command in commands {
            self.set(command.joint, command.angle_degrees);
        }
    }

    pub fn reset(&mut self, profile: &RobotProfile) {
        self.angles = profile.initial_angles();
    }

    /// Plan a coupled batch and commit it in one step. On error the state is
    /// unchanged.
    pub fn apply(
        &mut self,
        profile: &RobotProfile,
        deltas: &[JointDelta],
    ) -> Result<Vec<JointCommand>, ValidationError> {
        let commands = self.plan_batch(profile, deltas)?;
        self.commit(&commands);
        Ok(commands)
    }
}
