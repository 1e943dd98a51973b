use std::collections::BTreeMap;
use std::time::Duration;

use blocks::{JointId, RobotProfile};
use tokio::time::Instant;
use tracing::debug;

use crate::link::{JointCommand, LinkError, RobotLink};

/// One acknowledged batch, stamped with the (tokio) time it was sent.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRecord {
    pub at: Instant,
    pub commands: Vec<JointCommand>,
}

/// An in-process robot: records every batch and tracks simulated angles.
#[derive(Debug, Clone, Default)]
pub struct SimulatedLink {
    connected: bool,
    angles: BTreeMap<JointId, f64>,
    home_angles: Option<Vec<(JointId, f64)>>,
    latency: Duration,
    fail_on: Option<usize>,
    attempts: usize,
    history: Vec<DispatchRecord>,
    homes: usize,
}

impl SimulatedLink {
    /// A disconnected link with no known joints.
    pub fn new() -> Self {
        Self::default()
    }

    /// A disconnected link with every joint at its home angle.
    pub fn for_profile(profile: &RobotProfile) -> Self {
        SimulatedLink {
            angles: profile.initial_angles().into_iter().collect(),
            ..Self::default()
        }
    }

    /// Start out connected.
    pub fn connected(mut self) -> Self {
        self.connected = true;
        self
    }

    /// Delay before each batch is acknowledged.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Reject the `n`th batch (1-based) with [`LinkError::Rejected`].
    pub fn fail_on_batch(mut self, n: usize) -> Self {
        self.fail_on = Some(n);
        self
    }

    /// Support [`RobotLink::home`] natively, moving to `profile`'s home angles.
    pub fn with_native_home(mut self, profile: &RobotProfile) -> Self {
        self.home_angles = Some(profile.initial_angles());
        self
    }

    pub fn history(&self) -> &[DispatchRecord] {
        &self.history
    }

    pub fn angle(&self, joint: JointId) -> Option<f64> {
        self.angles.get(&joint).copied()
    }

    pub fn angles(&self) -> &BTreeMap<JointId, f64> {
        &self.angles
    }

    pub fn home_calls(&self) -> usize {
        self.homes
    }
}

impl RobotLink for SimulatedLink {
    async fn connect(&mut self) -> Result<(), LinkError> {
        self.connected = true;
        debug!("simulated link connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        self.connected = false;
        debug!("simulated link disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn update_joints_degrees(&mut self, commands: &[JointCommand]) -> Result<(), LinkError> {
        if !self.connected {
            return Err(LinkError::NotConnected);
        }
        self.attempts += 1;
        let at = Instant::now();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.fail_on == Some(self.attempts) {
            debug!(batch = self.attempts, "simulated link rejecting batch");
            return Err(LinkError::Rejected(format!(
                "injected failure on batch {}",
                self.attempts
            )));
        }
        for command in commands {
            self.angles.insert(command.joint, command.angle_degrees);
        }
        debug!(batch = self.attempts, commands = commands.len(), "simulated batch applied");
        self.history.push(DispatchRecord {
            at,
            commands: commands.to_vec(),
        });
        Ok(())
    }

    fn supports_home(&self) -> bool {
        self.home_angles.is_some()
    }

    async fn home(&mut self) -> Result<(), LinkError> {
        if !self.connected {
            return Err(LinkError::NotConnected);
        }
        let Some(home) = &self.home_angles else {
            return Err(LinkError::Unsupported("home"));
        };
        for &(joint, degrees) in home {
            self.angles.insert(joint, degrees);
        }
        self.homes += 1;
        debug!("simulated link homed");
        Ok(())
    }
}
