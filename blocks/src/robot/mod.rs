//! Static per-robot configuration: joint map, home angles, gripper and
//! compound-movement rules. Loaded once and treated as immutable.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::formula::Formula;
use crate::parser::ParseError;

const SO_ARM101: &str = include_str!("../../robots/so-arm101.toml");

/// Identifier of a joint as understood by the robot link (e.g. a servo id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JointId(pub u32);

impl fmt::Display for JointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointSpec {
    pub name: String,
    pub id: JointId,
    pub initial_degrees: f64,
    #[serde(default)]
    pub min_degrees: Option<f64>,
    #[serde(default)]
    pub max_degrees: Option<f64>,
}

impl JointSpec {
    /// Clamp an absolute angle into the joint's limits, if it declares any.
    pub fn clamp(&self, degrees: f64) -> f64 {
        let lower = self.min_degrees.unwrap_or(f64::NEG_INFINITY);
        let upper = self.max_degrees.unwrap_or(f64::INFINITY);
        degrees.max(lower).min(upper)
    }

    pub fn within_limits(&self, degrees: f64) -> bool {
        self.clamp(degrees) == degrees
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GripperSpec {
    pub joint: JointId,
    pub open_degrees: f64,
    pub closed_degrees: f64,
}

/// One dependent joint of a compound movement.
#[derive(Debug, Clone, PartialEq)]
pub struct DependentJoint {
    pub joint: JointId,
    /// Reads `primary`, `dependent` and `deltaPrimary`.
    pub formula: Formula,
}

/// A declarative rule coupling one primary joint's motion to compensating
/// motion in other joints.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundMovement {
    pub name: String,
    pub primary_joint: JointId,
    /// Yields a sign/scale multiplier for the requested primary delta.
    pub primary_formula: Option<Formula>,
    pub dependents: Vec<DependentJoint>,
}

/// A formula that failed to parse, with enough context to render it.
#[derive(Debug, Clone, PartialEq)]
pub struct FormulaIssue {
    pub movement: String,
    /// Which formula of the movement: "primary formula" or "dependent joint N".
    pub location: String,
    pub source: String,
    pub error: ParseError,
}

impl fmt::Display for FormulaIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "movement '{}', {}: {} in `{}`",
            self.movement, self.location, self.error.message, self.source
        )
    }
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("cannot read '{path}': {message}")]
    Io { path: String, message: String },
    #[error("invalid robot profile: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("robot profile declares no joints")]
    NoJoints,
    #[error("joint id {0} is declared more than once")]
    DuplicateJointId(JointId),
    #[error("joint name '{0}' is declared more than once")]
    DuplicateJointName(String),
    #[error("{context} references unknown joint {joint}")]
    UnknownJoint { context: String, joint: JointId },
    #[error("{} formula(s) failed to parse", .0.len())]
    Formulas(Vec<FormulaIssue>),
}

// Raw TOML shape; formulas are still text here.
#[derive(Debug, Deserialize)]
struct ProfileFile {
    name: String,
    #[serde(default)]
    joints: Vec<JointSpec>,
    #[serde(default)]
    gripper: Option<GripperSpec>,
    #[serde(default)]
    compound_movements: Vec<MovementFile>,
}

#[derive(Debug, Deserialize)]
struct MovementFile {
    name: String,
    primary_joint: JointId,
    #[serde(default)]
    primary_formula: Option<String>,
    #[serde(default)]
    dependents: Vec<DependentFile>,
}

#[derive(Debug, Deserialize)]
struct DependentFile {
    joint: JointId,
    formula: String,
}

/// A validated robot profile with every formula parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct RobotProfile {
    pub name: String,
    /// In declaration order.
    pub joints: Vec<JointSpec>,
    pub gripper: Option<GripperSpec>,
    /// In declaration order; the first matching rule wins for a primary joint.
    pub compound_movements: Vec<CompoundMovement>,
}

impl RobotProfile {
    /// The built-in SO-ARM101 profile.
    pub fn so_arm101() -> Result<Self, ProfileError> {
        Self::from_toml(SO_ARM101)
    }

    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        let source = std::fs::read_to_string(path).map_err(|e| ProfileError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml(&source)
    }

    pub fn from_toml(source: &str) -> Result<Self, ProfileError> {
        let file: ProfileFile = toml::from_str(source)?;
        Self::compile(file)
    }

    fn compile(file: ProfileFile) -> Result<Self, ProfileError> {
        if file.joints.is_empty() {
            return Err(ProfileError::NoJoints);
        }

        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for joint in &file.joints {
            if !ids.insert(joint.id) {
                return Err(ProfileError::DuplicateJointId(joint.id));
            }
            if !names.insert(joint.name.as_str()) {
                return Err(ProfileError::DuplicateJointName(joint.name.clone()));
            }
        }

        let check_joint = |context: String, joint: JointId| {
            if ids.contains(&joint) {
                Ok(())
            } else {
                Err(ProfileError::UnknownJoint { context, joint })
            }
        };

        if let Some(gripper) = &file.gripper {
            check_joint("gripper".to_string(), gripper.joint)?;
        }

        let mut issues = Vec::new();
        let mut movements = Vec::new();
        for movement in file.compound_movements {
            check_joint(format!("movement '{}'", movement.name), movement.primary_joint)?;

            let primary_formula = match &movement.primary_formula {
                Some(text) => match Formula::parse(text, 0) {
                    Ok(formula) => Some(formula),
                    Err(error) => {
                        issues.push(FormulaIssue {
                            movement: movement.name.clone(),
                            location: "primary formula".to_string(),
                            source: text.clone(),
                            error,
                        });
                        None
                    }
                },
                None => None,
            };

            let mut dependents = Vec::new();
            for dependent in &movement.dependents {
                check_joint(format!("movement '{}'", movement.name), dependent.joint)?;
                match Formula::parse(&dependent.formula, 0) {
                    Ok(formula) => dependents.push(DependentJoint {
                        joint: dependent.joint,
                        formula,
                    }),
                    Err(error) => issues.push(FormulaIssue {
                        movement: movement.name.clone(),
                        location: format!("dependent joint {}", dependent.joint),
                        source: dependent.formula.clone(),
                        error,
                    }),
                }
            }

            movements.push(CompoundMovement {
                name: movement.name,
                primary_joint: movement.primary_joint,
                primary_formula,
                dependents,
            });
        }

        if !issues.is_empty() {
            return Err(ProfileError::Formulas(issues));
        }

        Ok(RobotProfile {
            name: file.name,
            joints: file.joints,
            gripper: file.gripper,
            compound_movements: movements,
        })
    }

    pub fn joint(&self, id: JointId) -> Option<&JointSpec> {
        self.joints.iter().find(|j| j.id == id)
    }

    /// Case-insensitive joint lookup by name.
    pub fn joint_by_name(&self, name: &str) -> Option<&JointSpec> {
        self.joints
            .iter()
            .find(|j| j.name == name)
            .or_else(|| self.joints.iter().find(|j| j.name.eq_ignore_ascii_case(name)))
    }

    pub fn joint_names(&self) -> Vec<&str> {
        self.joints.iter().map(|j| j.name.as_str()).collect()
    }

    /// Home angles, in joint declaration order.
    pub fn initial_angles(&self) -> Vec<(JointId, f64)> {
        self.joints.iter().map(|j| (j.id, j.initial_degrees)).collect()
    }

    /// Rules whose primary joint is `joint`, in declaration order.
    pub fn movements_for(&self, joint: JointId) -> impl Iterator<Item = &CompoundMovement> {
        self.compound_movements
            .iter()
            .filter(move |m| m.primary_joint == joint)
    }

    pub fn movement(&self, name: &str) -> Option<&CompoundMovement> {
        self.compound_movements.iter().find(|m| m.name == name)
    }
}
