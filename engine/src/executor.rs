use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use blocks::{BlockInstance, BlockRegistry, JointId, ProgramSnapshot, RobotProfile};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, watch};
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, info, warn};

use crate::action::Action;
use crate::coupling::{CouplingBatch, CouplingResolver, JointDelta};
use crate::error::{EngineError, RunWarning, ValidationError};
use crate::joints::JointState;
use crate::link::{JointCommand, LinkError, RobotLink};

// ---------------------------------------------------------------------------
// Configuration and reporting
// ---------------------------------------------------------------------------

/// Pacing between dispatches and how long the link may take to acknowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum time between the starts of two consecutive dispatches.
    pub command_pause_ms: u64,
    /// Time to wait after each acknowledged dispatch.
    pub settle_ms: u64,
    /// A dispatch not acknowledged within this time fails the run.
    pub ack_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            command_pause_ms: 300,
            settle_ms: 100,
            ack_timeout_ms: 5_000,
        }
    }
}

impl EngineConfig {
    pub fn command_pause(&self) -> Duration {
        Duration::from_millis(self.command_pause_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
}

/// Result of a run that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Every joint-command batch the link acknowledged, in order.
    pub batches: Vec<Vec<JointCommand>>,
    /// Native home calls the link acknowledged.
    pub home_calls: usize,
    pub warnings: Vec<RunWarning>,
}

impl RunReport {
    fn new() -> Self {
        RunReport {
            outcome: RunOutcome::Completed,
            batches: Vec::new(),
            home_calls: 0,
            warnings: Vec::new(),
        }
    }

    /// Total acknowledged dispatches, batches and home calls alike.
    pub fn dispatched(&self) -> usize {
        self.batches.len() + self.home_calls
    }
}

// ---------------------------------------------------------------------------
// Shared run state
// ---------------------------------------------------------------------------

struct Shared {
    state: watch::Sender<EngineState>,
    cancel: AtomicBool,
    /// Wakes suspended runs when cancellation is requested.
    wake: Notify,
}

/// Cancels and observes runs from another task.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
}

impl EngineHandle {
    /// Request that the active run stop at its next checkpoint. No-op when idle.
    pub fn cancel(&self) {
        self.shared.cancel.store(true, Ordering::SeqCst);
        self.shared.wake.notify_waiters();
    }

    pub fn state(&self) -> EngineState {
        *self.shared.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.shared.state.subscribe()
    }
}

/// Holds the engine out of Idle. Dropping it always returns to Idle.
struct RunGuard<'a> {
    shared: &'a Shared,
}

impl RunGuard<'_> {
    fn finish(&self, state: EngineState) {
        self.shared.state.send_replace(state);
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.shared.state.send_replace(EngineState::Idle);
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Walks a program snapshot and drives a robot link, one paced batch at a time.
pub struct ExecutionEngine {
    registry: Arc<BlockRegistry>,
    profile: Arc<RobotProfile>,
    config: EngineConfig,
    shared: Arc<Shared>,
    joints: Mutex<JointState>,
}

/// A body being walked. `remaining` counts passes left, including this one.
struct Frame {
    blocks: Vec<BlockInstance>,
    cursor: usize,
    remaining: u32,
}

enum Outgoing {
    Batch(Vec<JointCommand>),
    Home,
}

enum Step {
    Continue,
    Cancelled,
}

struct Pacer {
    pause: Duration,
    settle: Duration,
    last_dispatch: Option<Instant>,
}

/// Await a link request, failing with [`LinkError::Timeout`] once `limit` elapses.
async fn acknowledged<T>(
    limit: Duration,
    request: impl Future<Output = Result<T, LinkError>>,
) -> Result<T, LinkError> {
    timeout(limit, request).await.unwrap_or(Err(LinkError::Timeout))
}

impl ExecutionEngine {
    pub fn new(registry: Arc<BlockRegistry>, profile: Arc<RobotProfile>, config: EngineConfig) -> Self {
        let (state, _) = watch::channel(EngineState::Idle);
        let joints = Mutex::new(JointState::from_profile(&profile));
        ExecutionEngine {
            registry,
            profile,
            config,
            shared: Arc::new(Shared {
                state,
                cancel: AtomicBool::new(false),
                wake: Notify::new(),
            }),
            joints,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.shared.state.borrow()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn profile(&self) -> &RobotProfile {
        &self.profile
    }

    /// Last acknowledged joint angles.
    pub fn joint_state(&self) -> JointState {
        self.lock_joints().clone()
    }

    /// Run a program to completion, cancellation or the first error.
    ///
    /// Nothing is sent and the state stays Idle when the program is empty, the
    /// link is missing or disconnected, or another run is active.
    pub async fn run<L: RobotLink>(
        &self,
        snapshot: &ProgramSnapshot,
        link: Option<&mut L>,
    ) -> Result<RunReport, EngineError> {
        if !snapshot.has_top_level() {
            warn!("run rejected: nothing to run");
            return Err(ValidationError::EmptyProgram.into());
        }
        let link = match link {
            Some(link) if link.is_connected() => link,
            _ => {
                warn!("run rejected: robot control unavailable");
                return Err(ValidationError::LinkUnavailable.into());
            }
        };
        let guard = self.acquire()?;

        info!(blocks = snapshot.len(), "run started");
        let mut report = RunReport::new();
        match self.execute(snapshot, link, &mut report).await {
            Ok(Step::Continue) => {
                guard.finish(EngineState::Completed);
                info!(dispatched = report.dispatched(), "run completed");
            }
            Ok(Step::Cancelled) => {
                report.outcome = RunOutcome::Cancelled;
                guard.finish(EngineState::Cancelled);
                info!(dispatched = report.dispatched(), "run cancelled");
            }
            Err(error) => {
                guard.finish(EngineState::Failed);
                warn!(dispatched = report.dispatched(), %error, "run failed");
                return Err(error);
            }
        }
        Ok(report)
    }

    /// Move one joint by `delta` through the coupling resolver, as one batch.
    ///
    /// `movement` picks a compound movement by name; otherwise the first rule
    /// for `joint` applies. Rejected while a run is active.
    pub async fn jog<L: RobotLink>(
        &self,
        link: &mut L,
        joint: JointId,
        delta: f64,
        movement: Option<&str>,
    ) -> Result<CouplingBatch, EngineError> {
        if !link.is_connected() {
            return Err(ValidationError::LinkUnavailable.into());
        }
        let guard = self.acquire()?;

        let result = self.jog_inner(link, joint, delta, movement).await;
        match &result {
            Ok(batch) => {
                guard.finish(EngineState::Completed);
                debug!(joint = %joint, deltas = batch.deltas.len(), "jog applied");
            }
            Err(error) => {
                guard.finish(EngineState::Failed);
                warn!(joint = %joint, %error, "jog failed");
            }
        }
        result
    }

    async fn jog_inner<L: RobotLink>(
        &self,
        link: &mut L,
        joint: JointId,
        delta: f64,
        movement: Option<&str>,
    ) -> Result<CouplingBatch, EngineError> {
        if self.profile.joint(joint).is_none() {
            return Err(ValidationError::UnknownJoint(joint).into());
        }
        let state = self.joint_state();
        let resolver = CouplingResolver::new(&self.profile);
        let batch = match movement {
            Some(name) => resolver.resolve_movement(name, delta, &state)?,
            None => resolver.resolve(joint, delta, &state)?,
        };
        let commands = state.plan_batch(&self.profile, &batch.deltas)?;
        acknowledged(self.config.ack_timeout(), link.update_joints_degrees(&commands)).await?;
        self.lock_joints().commit(&commands);
        Ok(batch)
    }

    fn acquire(&self) -> Result<RunGuard<'_>, ValidationError> {
        let acquired = self.shared.state.send_if_modified(|state| {
            if *state == EngineState::Idle {
                *state = EngineState::Running;
                true
            } else {
                false
            }
        });
        if !acquired {
            warn!("rejected: a program is already running");
            return Err(ValidationError::AlreadyRunning);
        }
        self.shared.cancel.store(false, Ordering::SeqCst);
        Ok(RunGuard {
            shared: &self.shared,
        })
    }

    fn cancelled(&self) -> bool {
        self.shared.cancel.load(Ordering::SeqCst)
    }

    /// Sleep until `deadline` or until cancellation is requested.
    async fn suspend_until(&self, deadline: Instant) {
        let notified = self.shared.wake.notified();
        tokio::pin!(notified);
        // Registered before the flag check so a cancel in between still wakes us.
        notified.as_mut().enable();
        if self.cancelled() {
            return;
        }
        tokio::select! {
            _ = sleep_until(deadline) => {}
            _ = notified => {}
        }
    }

    // The state is plain data; a panic elsewhere cannot leave it half-written.
    fn lock_joints(&self) -> MutexGuard<'_, JointState> {
        self.joints.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn execute<L: RobotLink>(
        &self,
        snapshot: &ProgramSnapshot,
        link: &mut L,
        report: &mut RunReport,
    ) -> Result<Step, EngineError> {
        let mut pacer = Pacer {
            pause: self.config.command_pause(),
            settle: self.config.settle(),
            last_dispatch: None,
        };
        let mut stack = vec![Frame {
            blocks: snapshot.top_level(),
            cursor: 0,
            remaining: 1,
        }];

        while let Some(frame) = stack.last_mut() {
            if frame.cursor == frame.blocks.len() {
                if frame.remaining > 1 {
                    frame.remaining -= 1;
                    frame.cursor = 0;
                    if self.cancelled() {
                        return Ok(Step::Cancelled);
                    }
                } else {
                    stack.pop();
                }
                continue;
            }

            let block = frame.blocks[frame.cursor].clone();
            frame.cursor += 1;

            let definition = self.registry.get_block(&block.definition_id);
            let action = Action::classify(definition, &block, &self.profile);
            match &action {
                Action::Repeat(times) => {
                    let body = snapshot.children_of(&block.id);
                    if *times == 0 || body.is_empty() {
                        debug!(block = %block.id, "repeat skipped: nothing to run");
                        continue;
                    }
                    if self.cancelled() {
                        return Ok(Step::Cancelled);
                    }
                    stack.push(Frame {
                        blocks: body,
                        cursor: 0,
                        remaining: *times,
                    });
                    continue;
                }
                Action::If(condition) => {
                    let body = snapshot.children_of(&block.id);
                    if *condition && !body.is_empty() {
                        stack.push(Frame {
                            blocks: body,
                            cursor: 0,
                            remaining: 1,
                        });
                    }
                    continue;
                }
                Action::Wait(duration) => {
                    debug!(block = %block.id, ?duration, "waiting");
                    self.suspend_until(Instant::now() + *duration).await;
                    if self.cancelled() {
                        return Ok(Step::Cancelled);
                    }
                    continue;
                }
                Action::Skip(reason) => {
                    warn!(block = %block.id, "{reason}, skipped");
                    report.warnings.push(RunWarning::new(&block.id, reason.clone()));
                    continue;
                }
                _ => {}
            }

            let outgoing = self.plan(action, link.supports_home())?;
            if let Outgoing::Batch(commands) = &outgoing
                && commands.is_empty()
            {
                continue;
            }
            if let Step::Cancelled = self.dispatch(link, &mut pacer, outgoing, &block, report).await? {
                return Ok(Step::Cancelled);
            }
        }

        Ok(Step::Continue)
    }

    /// Commands for a motion action, planned against the current joint state.
    fn plan(&self, action: Action, native_home: bool) -> Result<Outgoing, EngineError> {
        let state = self.joint_state();
        let commands = match action {
            Action::Home if native_home => return Ok(Outgoing::Home),
            Action::Home => state.plan_targets(&self.profile, &self.profile.initial_angles())?,
            Action::MoveJoint { joint, angle } | Action::Gripper { joint, angle } => {
                state.plan_targets(&self.profile, &[(joint, angle)])?
            }
            Action::MoveJointBy {
                joint,
                delta,
                coupled: true,
            } => {
                let batch = CouplingResolver::new(&self.profile).resolve(joint, delta, &state)?;
                state.plan_batch(&self.profile, &batch.deltas)?
            }
            Action::MoveJointBy { joint, delta, .. } => {
                state.plan_deltas(&self.profile, &[JointDelta { joint, delta }])?
            }
            Action::Repeat(_) | Action::If(_) | Action::Wait(_) | Action::Skip(_) => Vec::new(),
        };
        Ok(Outgoing::Batch(commands))
    }

    async fn dispatch<L: RobotLink>(
        &self,
        link: &mut L,
        pacer: &mut Pacer,
        outgoing: Outgoing,
        block: &BlockInstance,
        report: &mut RunReport,
    ) -> Result<Step, EngineError> {
        if self.cancelled() {
            return Ok(Step::Cancelled);
        }
        if let Some(last) = pacer.last_dispatch {
            self.suspend_until(last + pacer.pause).await;
        }
        if self.cancelled() {
            return Ok(Step::Cancelled);
        }
        pacer.last_dispatch = Some(Instant::now());

        let limit = self.config.ack_timeout();
        match outgoing {
            Outgoing::Batch(commands) => {
                debug!(block = %block.id, commands = commands.len(), "dispatching batch");
                acknowledged(limit, link.update_joints_degrees(&commands)).await?;
                self.lock_joints().commit(&commands);
                report.batches.push(commands);
            }
            Outgoing::Home => {
                debug!(block = %block.id, "dispatching home");
                acknowledged(limit, link.home()).await?;
                self.lock_joints().reset(&self.profile);
                report.home_calls += 1;
            }
        }

        if !pacer.settle.is_zero() {
            self.suspend_until(Instant::now() + pacer.settle).await;
        }
        if self.cancelled() {
            return Ok(Step::Cancelled);
        }
        Ok(Step::Continue)
    }
}
