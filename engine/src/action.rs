use std::time::Duration;

use blocks::registry::standard;
use blocks::{BlockDefinition, BlockInstance, JointId, RobotProfile, Shape};

/// Everything the engine knows how to execute.
///
/// The registry may hold any number of definitions; only the ones mapped here
/// do something. Everything else classifies as [`Action::Skip`].
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    MoveJoint {
        joint: JointId,
        angle: f64,
    },
    MoveJointBy {
        joint: JointId,
        delta: f64,
        coupled: bool,
    },
    Gripper {
        joint: JointId,
        angle: f64,
    },
    Wait(Duration),
    /// Zero means the body never runs.
    Repeat(u32),
    If(bool),
    Home,
    Skip(String),
}

impl Action {
    /// Map a block onto an executable action.
    ///
    /// `definition` is `None` when the instance references a definition the
    /// registry no longer has.
    pub fn classify(
        definition: Option<&BlockDefinition>,
        block: &BlockInstance,
        profile: &RobotProfile,
    ) -> Action {
        let Some(definition) = definition else {
            return Action::Skip(format!("unknown block definition '{}'", block.definition_id));
        };
        if definition.shape != Shape::Command {
            return Action::Skip(format!("'{}' is not an executable block", definition.id));
        }

        match definition.id.as_str() {
            standard::MOVE_JOINT => match joint_param(block, profile) {
                Ok(joint) => Action::MoveJoint {
                    joint,
                    angle: number(block, definition, "angle"),
                },
                Err(skip) => skip,
            },
            standard::MOVE_JOINT_BY => match joint_param(block, profile) {
                Ok(joint) => Action::MoveJointBy {
                    joint,
                    delta: number(block, definition, "delta"),
                    coupled: boolean(block, definition, "coupled"),
                },
                Err(skip) => skip,
            },
            standard::OPEN_GRIPPER | standard::CLOSE_GRIPPER => match &profile.gripper {
                Some(gripper) => Action::Gripper {
                    joint: gripper.joint,
                    angle: if definition.id == standard::OPEN_GRIPPER {
                        gripper.open_degrees
                    } else {
                        gripper.closed_degrees
                    },
                },
                None => Action::Skip(format!("robot '{}' has no gripper", profile.name)),
            },
            standard::WAIT_SECONDS => {
                let seconds = number(block, definition, "seconds").max(0.0);
                match Duration::try_from_secs_f64(seconds) {
                    Ok(duration) => Action::Wait(duration),
                    Err(_) => Action::Skip(format!("invalid wait of {seconds} seconds")),
                }
            }
            // Saturating cast: negative and NaN counts become 0.
            standard::REPEAT => Action::Repeat(number(block, definition, "times").trunc() as u32),
            standard::IF_CONDITION => Action::If(boolean(block, definition, "condition")),
            standard::HOME => Action::Home,
            other => Action::Skip(format!("'{other}' is not an executable block")),
        }
    }
}

fn joint_param(block: &BlockInstance, profile: &RobotProfile) -> Result<JointId, Action> {
    let name = block.text("joint").unwrap_or_default();
    profile
        .joint_by_name(name)
        .map(|j| j.id)
        .ok_or_else(|| Action::Skip(format!("unknown joint '{name}'")))
}

// Falls back to the definition default when the instance value is missing or
// of the wrong type.
fn number(block: &BlockInstance, definition: &BlockDefinition, name: &str) -> f64 {
    block
        .number(name)
        .or_else(|| definition.parameter(name).and_then(|p| p.default.as_number()))
        .unwrap_or(0.0)
}

fn boolean(block: &BlockInstance, definition: &BlockDefinition, name: &str) -> bool {
    block
        .boolean(name)
        .or_else(|| definition.parameter(name).and_then(|p| p.default.as_bool()))
        .unwrap_or(false)
}
