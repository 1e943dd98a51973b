use std::fmt;

use blocks::JointId;
use thiserror::Error;

/// One absolute-angle instruction for a single joint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointCommand {
    pub joint: JointId,
    pub angle_degrees: f64,
}

impl JointCommand {
    pub fn new(joint: JointId, angle_degrees: f64) -> Self {
        JointCommand { joint, angle_degrees }
    }
}

impl fmt::Display for JointCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "joint {} -> {:.2}°", self.joint, self.angle_degrees)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LinkError {
    #[error("robot link is not connected")]
    NotConnected,
    #[error("command timed out")]
    Timeout,
    #[error("robot rejected command: {0}")]
    Rejected(String),
    #[error("{0} is not supported by this link")]
    Unsupported(&'static str),
}

/// Capability for talking to a simulated or physical robot.
///
/// The engine is the only caller of the mutating operations. Each call to
/// [`update_joints_degrees`](RobotLink::update_joints_degrees) is one atomic
/// batch and resolves once the robot has acknowledged it.
#[allow(async_fn_in_trait)]
pub trait RobotLink {
    async fn connect(&mut self) -> Result<(), LinkError>;

    async fn disconnect(&mut self) -> Result<(), LinkError>;

    fn is_connected(&self) -> bool;

    async fn update_joints_degrees(&mut self, commands: &[JointCommand]) -> Result<(), LinkError>;

    /// Whether [`home`](RobotLink::home) is implemented natively.
    fn supports_home(&self) -> bool {
        false
    }

    async fn home(&mut self) -> Result<(), LinkError> {
        Err(LinkError::Unsupported("home"))
    }
}
