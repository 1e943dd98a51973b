//! The built-in block catalog for robot-arm programs.

use crate::definition::{BlockDefinition, Category, ParameterDefinition, Shape};
use crate::registry::{BlockCategory, BlockRegistry};

pub const MOVE_JOINT: &str = "move_joint";
pub const MOVE_JOINT_BY: &str = "move_joint_by";
pub const OPEN_GRIPPER: &str = "open_gripper";
pub const CLOSE_GRIPPER: &str = "close_gripper";
pub const HOME: &str = "home";
pub const WAIT_SECONDS: &str = "wait_seconds";
pub const REPEAT: &str = "repeat";
pub const IF_CONDITION: &str = "if_condition";
pub const JOINT_ANGLE: &str = "joint_angle";

/// Joint names of the SO-ARM101 arm, used when no robot profile is supplied.
pub const DEFAULT_JOINTS: &[&str] = &[
    "Rotation",
    "Pitch",
    "Elbow",
    "Wrist_Pitch",
    "Wrist_Roll",
    "Jaw",
];

impl BlockRegistry {
    /// The standard catalog with joint dropdowns listing the SO-ARM101 joints.
    pub fn standard() -> Self {
        Self::standard_with_joints(DEFAULT_JOINTS)
    }

    /// The standard catalog with joint dropdowns listing `joints`.
    pub fn standard_with_joints<S: AsRef<str>>(joints: &[S]) -> Self {
        let joints: Vec<&str> = joints.iter().map(|j| j.as_ref()).collect();
        let mut registry = BlockRegistry::new();

        for category in standard_categories() {
            // Fresh registry: ids cannot collide.
            let _ = registry.register_category(category);
        }
        for definition in standard_blocks(&joints) {
            let _ = registry.register(definition);
        }
        registry
    }
}

fn standard_categories() -> Vec<BlockCategory> {
    let category = |id: Category, name: &str, color: &str, icon: &str| BlockCategory {
        id,
        name: name.to_string(),
        color: color.to_string(),
        icon: icon.to_string(),
    };
    vec![
        category(Category::Motion, "Motion", "#4C97FF", "🦾"),
        category(Category::Gripper, "Gripper", "#59C059", "✊"),
        category(Category::Control, "Control", "#FFAB19", "🔁"),
        category(Category::Sensing, "Sensing", "#5CB1D6", "📡"),
    ]
}

fn standard_blocks(joints: &[&str]) -> Vec<BlockDefinition> {
    vec![
        BlockDefinition::new(MOVE_JOINT, "move joint to", Category::Motion, Shape::Command)
            .with_color("#4C97FF")
            .with_description("Move a joint to an absolute angle")
            .with_parameter(ParameterDefinition::dropdown("joint", joints))
            .with_parameter(ParameterDefinition::angle("angle", 180.0)),
        BlockDefinition::new(MOVE_JOINT_BY, "turn joint by", Category::Motion, Shape::Command)
            .with_color("#4C97FF")
            .with_description("Turn a joint by a relative angle, optionally moving coupled joints")
            .with_parameter(ParameterDefinition::dropdown("joint", joints))
            .with_parameter(ParameterDefinition::angle("delta", 10.0))
            .with_parameter(ParameterDefinition::boolean("coupled", true)),
        BlockDefinition::new(HOME, "go home", Category::Motion, Shape::Command)
            .with_color("#4C97FF")
            .with_description("Return every joint to its home position"),
        BlockDefinition::new(OPEN_GRIPPER, "open gripper", Category::Gripper, Shape::Command)
            .with_color("#59C059")
            .with_description("Open the gripper"),
        BlockDefinition::new(CLOSE_GRIPPER, "close gripper", Category::Gripper, Shape::Command)
            .with_color("#59C059")
            .with_description("Close the gripper"),
        BlockDefinition::new(WAIT_SECONDS, "wait", Category::Control, Shape::Command)
            .with_color("#FFAB19")
            .with_description("Wait for a number of seconds")
            .with_parameter(ParameterDefinition::number("seconds", 1.0).with_range(0.1, 10.0, 0.1)),
        BlockDefinition::new(REPEAT, "repeat", Category::Control, Shape::Command)
            .with_color("#FFAB19")
            .with_description("Repeat the enclosed blocks")
            .with_parameter(ParameterDefinition::number("times", 3.0).with_range(1.0, 10.0, 1.0))
            .with_body(),
        BlockDefinition::new(IF_CONDITION, "if", Category::Control, Shape::Command)
            .with_color("#FFAB19")
            .with_description("Run the enclosed blocks when the condition holds")
            .with_parameter(ParameterDefinition::boolean("condition", true))
            .with_body(),
        BlockDefinition::new(JOINT_ANGLE, "joint angle", Category::Sensing, Shape::Reporter)
            .with_color("#5CB1D6")
            .with_description("Report the current angle of a joint")
            .with_parameter(ParameterDefinition::dropdown("joint", joints)),
    ]
}
