use std::sync::Arc;
use std::time::Duration;

use blocks::registry::standard;
use blocks::{
    BlockDefinition, BlockId, BlockInstance, BlockRegistry, Category, JointId, ParameterValue,
    ProgramModel, RobotProfile, Shape,
};
use engine::{
    EngineConfig, EngineError, EngineState, ExecutionEngine, LinkError, RobotLink, RunOutcome,
    SimulatedLink, ValidationError,
};
use tokio::time::{Instant, sleep};

fn registry() -> BlockRegistry {
    BlockRegistry::standard()
}

fn profile() -> Arc<RobotProfile> {
    Arc::new(RobotProfile::so_arm101().expect("built-in profile"))
}

fn engine(config: EngineConfig) -> ExecutionEngine {
    ExecutionEngine::new(Arc::new(registry()), profile(), config)
}

fn fast() -> EngineConfig {
    EngineConfig {
        command_pause_ms: 100,
        settle_ms: 0,
        ..EngineConfig::default()
    }
}

fn link() -> SimulatedLink {
    SimulatedLink::for_profile(&profile()).connected()
}

fn add(model: &mut ProgramModel, parent: Option<&BlockId>, id: &str) -> BlockInstance {
    let registry = registry();
    let definition = registry.get_block(id).expect("standard block");
    match parent {
        Some(parent) => model.add_child_block(parent, definition).expect("parent hosts children"),
        None => model.add_top_level_block(definition),
    }
}

fn set(model: &mut ProgramModel, block: &BlockInstance, name: &str, value: impl Into<ParameterValue>) {
    assert!(model.update_parameter(&block.id, name, value.into()));
}

fn move_joint(model: &mut ProgramModel, parent: Option<&BlockId>, joint: &str, angle: f64) -> BlockInstance {
    let block = add(model, parent, standard::MOVE_JOINT);
    set(model, &block, "joint", joint);
    set(model, &block, "angle", angle);
    block
}

fn repeat_one_move(times: f64) -> ProgramModel {
    let mut model = ProgramModel::new();
    let repeat = add(&mut model, None, standard::REPEAT);
    set(&mut model, &repeat, "times", times);
    move_joint(&mut model, Some(&repeat.id), "Rotation", 90.0);
    model
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn empty_program_never_leaves_idle_or_touches_link() {
    let engine = engine(fast());
    let mut receiver = engine.handle().subscribe();
    let mut link = link();

    let result = engine.run(&ProgramModel::new().snapshot(), Some(&mut link)).await;

    assert_eq!(result, Err(EngineError::Validation(ValidationError::EmptyProgram)));
    assert!(link.history().is_empty());
    assert_eq!(engine.state(), EngineState::Idle);
    assert!(!receiver.has_changed().expect("sender alive"));
    assert_eq!(*receiver.borrow_and_update(), EngineState::Idle);
}

#[tokio::test(start_paused = true)]
async fn missing_or_disconnected_link_is_rejected() {
    let engine = engine(fast());
    let snapshot = repeat_one_move(1.0).snapshot();

    let result = engine.run::<SimulatedLink>(&snapshot, None).await;
    assert_eq!(result, Err(EngineError::Validation(ValidationError::LinkUnavailable)));

    let mut offline = SimulatedLink::for_profile(&profile());
    let result = engine.run(&snapshot, Some(&mut offline)).await;
    assert_eq!(result, Err(EngineError::Validation(ValidationError::LinkUnavailable)));
    assert!(offline.history().is_empty());
    assert_eq!(engine.state(), EngineState::Idle);
}

// ---------------------------------------------------------------------------
// Pacing and repeat
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn repeat_three_dispatches_three_paced_batches() {
    let config = EngineConfig {
        command_pause_ms: 300,
        settle_ms: 100,
        ..EngineConfig::default()
    };
    let engine = engine(config);
    let mut link = link();

    let report = engine
        .run(&repeat_one_move(3.0).snapshot(), Some(&mut link))
        .await
        .expect("run succeeds");

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.batches.len(), 3);
    let history = link.history();
    assert_eq!(history.len(), 3);
    for pair in history.windows(2) {
        assert!(pair[1].at - pair[0].at >= Duration::from_millis(300));
    }
    for record in history {
        assert_eq!(record.commands.len(), 1);
        assert_eq!(record.commands[0].joint, JointId(1));
        assert_eq!(record.commands[0].angle_degrees, 90.0);
    }
    assert_eq!(engine.state(), EngineState::Idle);
}

#[tokio::test(start_paused = true)]
async fn nested_repeats_run_depth_first_in_order() {
    let engine = engine(fast());
    let mut link = link();
    let mut model = ProgramModel::new();

    let outer = add(&mut model, None, standard::REPEAT);
    set(&mut model, &outer, "times", 2.0);
    move_joint(&mut model, Some(&outer.id), "Rotation", 10.0);
    let inner = add(&mut model, Some(&outer.id), standard::REPEAT);
    set(&mut model, &inner, "times", 2.0);
    move_joint(&mut model, Some(&inner.id), "Pitch", 20.0);
    move_joint(&mut model, None, "Elbow", 30.0);

    let report = engine.run(&model.snapshot(), Some(&mut link)).await.expect("run succeeds");

    let joints: Vec<u32> = report.batches.iter().map(|b| b[0].joint.0).collect();
    assert_eq!(joints, vec![1, 2, 2, 1, 2, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn repeat_count_is_truncated_and_non_positive_counts_skip() {
    let engine = engine(fast());
    let mut link = link();

    let report = engine
        .run(&repeat_one_move(2.9).snapshot(), Some(&mut link))
        .await
        .expect("run succeeds");
    assert_eq!(report.batches.len(), 2);

    let report = engine
        .run(&repeat_one_move(0.0).snapshot(), Some(&mut link))
        .await
        .expect("run succeeds");
    assert!(report.batches.is_empty());
    assert!(report.warnings.is_empty());
}

#[tokio::test(start_paused = true)]
async fn if_block_runs_body_only_when_condition_holds() {
    let engine = engine(fast());
    let mut link = link();
    let mut model = ProgramModel::new();

    let taken = add(&mut model, None, standard::IF_CONDITION);
    move_joint(&mut model, Some(&taken.id), "Rotation", 45.0);
    let skipped = add(&mut model, None, standard::IF_CONDITION);
    set(&mut model, &skipped, "condition", false);
    move_joint(&mut model, Some(&skipped.id), "Pitch", 45.0);

    let report = engine.run(&model.snapshot(), Some(&mut link)).await.expect("run succeeds");

    assert_eq!(report.batches.len(), 1);
    assert_eq!(report.batches[0][0].joint, JointId(1));
}

#[tokio::test(start_paused = true)]
async fn wait_block_suspends_without_dispatching() {
    let engine = engine(fast());
    let mut link = link();
    let mut model = ProgramModel::new();
    move_joint(&mut model, None, "Rotation", 10.0);
    let wait = add(&mut model, None, standard::WAIT_SECONDS);
    set(&mut model, &wait, "seconds", 2.0);
    move_joint(&mut model, None, "Rotation", 20.0);

    let report = engine.run(&model.snapshot(), Some(&mut link)).await.expect("run succeeds");

    assert_eq!(report.batches.len(), 2);
    let history = link.history();
    assert!(history[1].at - history[0].at >= Duration::from_secs(2));
}

// ---------------------------------------------------------------------------
// Cancellation and failure
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn cancel_during_second_iteration_stops_after_two_batches() {
    let engine = engine(fast());
    let handle = engine.handle();
    let mut link = link();
    let snapshot = repeat_one_move(3.0).snapshot();

    let (result, _) = tokio::join!(engine.run(&snapshot, Some(&mut link)), async {
        sleep(Duration::from_millis(150)).await;
        handle.cancel();
    });

    let report = result.expect("cancellation is not an error");
    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.batches.len(), 2);
    assert_eq!(link.history().len(), 2);
    assert_eq!(handle.state(), EngineState::Idle);
}

#[tokio::test(start_paused = true)]
async fn cancel_flag_is_cleared_for_the_next_run() {
    let engine = engine(fast());
    let mut link = link();
    engine.handle().cancel();

    let report = engine
        .run(&repeat_one_move(2.0).snapshot(), Some(&mut link))
        .await
        .expect("run succeeds");

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.batches.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancel_interrupts_a_long_wait() {
    let engine = engine(fast());
    let handle = engine.handle();
    let mut link = link();
    let mut model = ProgramModel::new();
    let wait = add(&mut model, None, standard::WAIT_SECONDS);
    set(&mut model, &wait, "seconds", 10.0);
    move_joint(&mut model, None, "Rotation", 20.0);
    let snapshot = model.snapshot();

    let start = Instant::now();
    let (result, _) = tokio::join!(engine.run(&snapshot, Some(&mut link)), async {
        sleep(Duration::from_millis(100)).await;
        handle.cancel();
    });

    let report = result.expect("cancellation is not an error");
    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(link.history().is_empty());
    assert_eq!(handle.state(), EngineState::Idle);
}

#[tokio::test(start_paused = true)]
async fn link_failure_halts_dispatch_and_engine_accepts_new_run() {
    let engine = engine(fast());
    let mut link = link().fail_on_batch(2);
    let mut model = ProgramModel::new();
    for angle in [10.0, 20.0, 30.0, 40.0] {
        move_joint(&mut model, None, "Rotation", angle);
    }
    let snapshot = model.snapshot();

    let result = engine.run(&snapshot, Some(&mut link)).await;

    assert!(matches!(result, Err(EngineError::Link(LinkError::Rejected(_)))));
    assert_eq!(link.history().len(), 1);
    assert_eq!(link.history()[0].commands[0].angle_degrees, 10.0);
    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(engine.joint_state().angle(JointId(1)), Some(10.0));

    let report = engine.run(&snapshot, Some(&mut link)).await.expect("second run succeeds");
    assert_eq!(report.batches.len(), 4);
}

/// Accepts the connection but never acknowledges a command.
struct SilentLink;

impl RobotLink for SilentLink {
    async fn connect(&mut self) -> Result<(), LinkError> {
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn update_joints_degrees(&mut self, _: &[engine::JointCommand]) -> Result<(), LinkError> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_dispatch_times_out_and_engine_recovers() {
    let config = EngineConfig {
        ack_timeout_ms: 2_000,
        ..fast()
    };
    let engine = engine(config);
    let mut states = engine.handle().subscribe();
    let snapshot = repeat_one_move(1.0).snapshot();

    let mut silent = SilentLink;
    let start = Instant::now();
    let (result, observed) = tokio::join!(engine.run(&snapshot, Some(&mut silent)), async {
        let mut seen = Vec::new();
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            seen.push(state);
            if state == EngineState::Idle {
                break;
            }
        }
        seen
    });

    assert_eq!(result, Err(EngineError::Link(LinkError::Timeout)));
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert_eq!(observed.first(), Some(&EngineState::Running));
    assert_eq!(observed.last(), Some(&EngineState::Idle));
    assert_eq!(engine.joint_state().angle(JointId(1)), Some(180.0));

    let mut link = link();
    let report = engine.run(&snapshot, Some(&mut link)).await.expect("next run succeeds");
    assert_eq!(report.batches.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn state_channel_reports_running_while_active() {
    let engine = engine(fast());
    let handle = engine.handle();
    let mut link = link();
    let snapshot = repeat_one_move(3.0).snapshot();

    let (result, observed) = tokio::join!(engine.run(&snapshot, Some(&mut link)), async {
        sleep(Duration::from_millis(50)).await;
        handle.state()
    });

    result.expect("run succeeds");
    assert_eq!(observed, EngineState::Running);
    assert_eq!(handle.state(), EngineState::Idle);
}

#[tokio::test(start_paused = true)]
async fn second_run_and_jog_are_rejected_while_running() {
    let engine = engine(fast());
    let mut link = link();
    let mut other = SimulatedLink::for_profile(&profile()).connected();
    let mut model = ProgramModel::new();
    let wait = add(&mut model, None, standard::WAIT_SECONDS);
    set(&mut model, &wait, "seconds", 1.0);
    let snapshot = model.snapshot();

    let (first, (second, jog)) = tokio::join!(engine.run(&snapshot, Some(&mut link)), async {
        sleep(Duration::from_millis(10)).await;
        let second = engine.run(&snapshot, Some(&mut other)).await;
        let jog = engine.jog(&mut other, JointId(2), 10.0, None).await;
        (second, jog)
    });

    assert!(first.is_ok());
    assert_eq!(second, Err(EngineError::Validation(ValidationError::AlreadyRunning)));
    assert_eq!(jog, Err(EngineError::Validation(ValidationError::AlreadyRunning)));
    assert!(other.history().is_empty());
}

// ---------------------------------------------------------------------------
// Skipped blocks
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn unknown_joints_reporters_and_dangling_definitions_are_skipped_with_warnings() {
    let engine = engine(fast());
    let mut link = link();
    let mut model = ProgramModel::new();

    let bad_joint = move_joint(&mut model, None, "Shoulder", 10.0);
    let reporter = add(&mut model, None, standard::JOINT_ANGLE);
    let custom = BlockDefinition::new("wave", "wave", Category::Custom("fun".into()), Shape::Command);
    let dangling = model.add_top_level_block(&custom);
    move_joint(&mut model, None, "rotation", 15.0);

    let report = engine.run(&model.snapshot(), Some(&mut link)).await.expect("run succeeds");

    assert_eq!(report.batches.len(), 1);
    assert_eq!(report.batches[0][0].angle_degrees, 15.0);
    let skipped: Vec<&BlockId> = report.warnings.iter().map(|w| &w.block_id).collect();
    assert_eq!(skipped, vec![&bad_joint.id, &reporter.id, &dangling.id]);
    assert!(report.warnings[0].message.contains("Shoulder"));
    assert!(report.warnings[2].message.contains("wave"));
}

#[tokio::test(start_paused = true)]
async fn gripper_blocks_use_profile_angles() {
    let engine = engine(fast());
    let mut link = link();
    let mut model = ProgramModel::new();
    add(&mut model, None, standard::OPEN_GRIPPER);
    add(&mut model, None, standard::CLOSE_GRIPPER);

    let report = engine.run(&model.snapshot(), Some(&mut link)).await.expect("run succeeds");

    let angles: Vec<f64> = report.batches.iter().map(|b| b[0].angle_degrees).collect();
    assert_eq!(angles, vec![220.0, 180.0]);
    assert!(report.batches.iter().all(|b| b[0].joint == JointId(6)));
}

#[tokio::test(start_paused = true)]
async fn gripper_without_profile_gripper_is_skipped() {
    let profile = RobotProfile::from_toml(
        r#"
        name = "bare"
        [[joints]]
        name = "Base"
        id = 1
        initial_degrees = 0.0
        "#,
    )
    .expect("valid profile");
    let engine = ExecutionEngine::new(Arc::new(registry()), Arc::new(profile), fast());
    let mut link = SimulatedLink::new().connected();
    let mut model = ProgramModel::new();
    add(&mut model, None, standard::OPEN_GRIPPER);

    let report = engine.run(&model.snapshot(), Some(&mut link)).await.expect("run succeeds");

    assert!(report.batches.is_empty());
    assert_eq!(report.warnings.len(), 1);
}

// ---------------------------------------------------------------------------
// Home and relative moves
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn home_falls_back_to_initial_angles_batch() {
    let engine = engine(fast());
    let mut link = link();
    let mut model = ProgramModel::new();
    move_joint(&mut model, None, "Rotation", 90.0);
    add(&mut model, None, standard::HOME);

    let report = engine.run(&model.snapshot(), Some(&mut link)).await.expect("run succeeds");

    assert_eq!(report.batches.len(), 2);
    assert_eq!(report.home_calls, 0);
    assert_eq!(report.batches[1].len(), 6);
    assert_eq!(link.angle(JointId(1)), Some(180.0));
    assert_eq!(engine.joint_state().angle(JointId(1)), Some(180.0));
}

#[tokio::test(start_paused = true)]
async fn home_uses_native_support_when_available() {
    let profile = profile();
    let engine = engine(fast());
    let mut link = link().with_native_home(&profile);
    let mut model = ProgramModel::new();
    move_joint(&mut model, None, "Rotation", 90.0);
    add(&mut model, None, standard::HOME);

    let report = engine.run(&model.snapshot(), Some(&mut link)).await.expect("run succeeds");

    assert_eq!(report.batches.len(), 1);
    assert_eq!(report.home_calls, 1);
    assert_eq!(report.dispatched(), 2);
    assert_eq!(link.home_calls(), 1);
    assert_eq!(engine.joint_state().angle(JointId(1)), Some(180.0));
}

#[tokio::test(start_paused = true)]
async fn coupled_relative_move_dispatches_whole_batch() {
    let engine = engine(fast());
    let mut link = link();
    let mut model = ProgramModel::new();
    let block = add(&mut model, None, standard::MOVE_JOINT_BY);
    set(&mut model, &block, "joint", "Pitch");
    set(&mut model, &block, "delta", 10.0);

    let report = engine.run(&model.snapshot(), Some(&mut link)).await.expect("run succeeds");

    assert_eq!(report.batches.len(), 1);
    let joints: Vec<u32> = report.batches[0].iter().map(|c| c.joint.0).collect();
    assert_eq!(joints, vec![2, 3, 4]);
    assert_eq!(report.batches[0][0].angle_degrees, 100.0);
    assert!((report.batches[0][1].angle_degrees - 341.0).abs() < 1e-9);
    assert!((report.batches[0][2].angle_degrees - 185.1).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn coupled_move_past_a_joint_limit_sends_nothing() {
    let profile = RobotProfile::from_toml(
        r#"
        name = "limited"
        [[joints]]
        name = "Shoulder"
        id = 2
        initial_degrees = 50.0
        [[joints]]
        name = "Elbow"
        id = 3
        initial_degrees = 200.0
        min_degrees = 0.0
        max_degrees = 205.0
        [[compound_movements]]
        name = "reach"
        primary_joint = 2
        [[compound_movements.dependents]]
        joint = 3
        formula = "-0.9 * deltaPrimary"
        "#,
    )
    .expect("valid profile");
    let registry = BlockRegistry::standard_with_joints(&profile.joint_names());
    let engine = ExecutionEngine::new(Arc::new(registry.clone()), Arc::new(profile), fast());
    let mut link = SimulatedLink::new().connected();
    let mut model = ProgramModel::new();
    let block = model.add_top_level_block(registry.get_block(standard::MOVE_JOINT_BY).expect("block"));
    set(&mut model, &block, "delta", -10.0);

    let result = engine.run(&model.snapshot(), Some(&mut link)).await;

    assert!(matches!(
        result,
        Err(EngineError::Validation(ValidationError::OutOfRange { joint: JointId(3), .. }))
    ));
    assert!(link.history().is_empty());
    assert_eq!(engine.joint_state().angle(JointId(2)), Some(50.0));
    assert_eq!(engine.joint_state().angle(JointId(3)), Some(200.0));

    let jog = engine.jog(&mut link, JointId(2), -10.0, None).await;
    assert!(matches!(
        jog,
        Err(EngineError::Validation(ValidationError::OutOfRange { .. }))
    ));
    assert!(link.history().is_empty());
}

#[tokio::test(start_paused = true)]
async fn uncoupled_relative_move_touches_one_joint() {
    let engine = engine(fast());
    let mut link = link();
    let mut model = ProgramModel::new();
    let block = add(&mut model, None, standard::MOVE_JOINT_BY);
    set(&mut model, &block, "joint", "Pitch");
    set(&mut model, &block, "delta", -30.0);
    set(&mut model, &block, "coupled", false);

    let report = engine.run(&model.snapshot(), Some(&mut link)).await.expect("run succeeds");

    assert_eq!(report.batches, vec![vec![engine::JointCommand::new(JointId(2), 60.0)]]);
}

#[tokio::test(start_paused = true)]
async fn formula_failure_rejects_batch_and_fails_run() {
    let profile = RobotProfile::from_toml(
        r#"
        name = "fragile"
        [[joints]]
        name = "A"
        id = 1
        initial_degrees = 50.0
        [[joints]]
        name = "B"
        id = 2
        initial_degrees = 0.0
        [[compound_movements]]
        name = "divide"
        primary_joint = 1
        [[compound_movements.dependents]]
        joint = 2
        formula = "deltaPrimary / (primary - 50)"
        "#,
    )
    .expect("valid profile");
    let registry = BlockRegistry::standard_with_joints(&profile.joint_names());
    let engine = ExecutionEngine::new(Arc::new(registry.clone()), Arc::new(profile), fast());
    let mut link = SimulatedLink::new().connected();
    let mut model = ProgramModel::new();
    let block = model.add_top_level_block(registry.get_block(standard::MOVE_JOINT_BY).expect("block"));
    model.update_parameter(&block.id, "joint", "A".into());

    let result = engine.run(&model.snapshot(), Some(&mut link)).await;

    assert!(matches!(result, Err(EngineError::Formula(_))));
    assert!(link.history().is_empty());
    assert_eq!(engine.joint_state().angle(JointId(1)), Some(50.0));
    assert_eq!(engine.state(), EngineState::Idle);
}

#[tokio::test(start_paused = true)]
async fn jog_applies_named_movement_and_updates_state() {
    let engine = engine(fast());
    let mut link = link();

    let batch = engine
        .jog(&mut link, JointId(2), 10.0, Some("Jaw backward & forward"))
        .await
        .expect("jog succeeds");

    assert_eq!(batch.movement.as_deref(), Some("Jaw backward & forward"));
    assert_eq!(batch.primary_delta(), 10.0);
    assert_eq!(batch.delta_for(JointId(3)), Some(-9.0));
    assert_eq!(link.history().len(), 1);
    assert_eq!(engine.joint_state().angle(JointId(2)), Some(100.0));
    assert_eq!(engine.joint_state().angle(JointId(3)), Some(351.0));

    let unknown = engine.jog(&mut link, JointId(2), 10.0, Some("Cartwheel")).await;
    assert_eq!(
        unknown,
        Err(EngineError::Validation(ValidationError::UnknownMovement("Cartwheel".into())))
    );
    assert_eq!(engine.state(), EngineState::Idle);
}

#[tokio::test(start_paused = true)]
async fn link_latency_delays_acknowledgement() {
    let engine = engine(fast());
    let mut link = link().with_latency(Duration::from_millis(40));
    link.disconnect().await.expect("disconnect");
    link.connect().await.expect("connect");

    let start = tokio::time::Instant::now();
    engine
        .run(&repeat_one_move(1.0).snapshot(), Some(&mut link))
        .await
        .expect("run succeeds");

    assert!(start.elapsed() >= Duration::from_millis(40));
}
