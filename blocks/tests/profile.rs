use blocks::registry::standard;
use blocks::robot::ProfileError;
use blocks::{
    BlockCategory, BlockDefinition, BlockRegistry, Category, JointId, ParameterKind, RegistryError,
    RobotProfile, Shape,
};

// ---------------------------------------------------------------------------
// Robot profiles
// ---------------------------------------------------------------------------

#[test]
fn built_in_profile_loads() {
    let profile = RobotProfile::so_arm101().expect("built-in profile");

    assert_eq!(profile.name, "so-arm101");
    assert_eq!(profile.joint_names(), standard::DEFAULT_JOINTS.to_vec());
    assert_eq!(profile.joint_by_name("wrist_pitch").map(|j| j.id), Some(JointId(4)));
    assert_eq!(profile.gripper.map(|g| g.joint), Some(JointId(6)));
    assert_eq!(profile.movements_for(JointId(2)).count(), 2);
    assert_eq!(profile.movements_for(JointId(1)).count(), 0);
    assert!(profile.movement("Jaw backward & forward").is_some());
    assert_eq!(profile.initial_angles()[2], (JointId(3), 360.0));
}

#[test]
fn joint_limits_clamp() {
    let profile = RobotProfile::from_toml(
        r#"
        name = "limited"
        [[joints]]
        name = "Base"
        id = 1
        initial_degrees = 90.0
        min_degrees = 0.0
        max_degrees = 180.0
        "#,
    )
    .expect("valid profile");
    let base = profile.joint(JointId(1)).expect("joint 1");

    assert_eq!(base.clamp(-5.0), 0.0);
    assert_eq!(base.clamp(200.0), 180.0);
    assert_eq!(base.clamp(45.0), 45.0);
}

#[test]
fn profile_validation_errors() {
    assert!(matches!(
        RobotProfile::from_toml("name = \"empty\""),
        Err(ProfileError::NoJoints)
    ));

    let duplicate = r#"
        name = "dup"
        [[joints]]
        name = "A"
        id = 1
        initial_degrees = 0.0
        [[joints]]
        name = "B"
        id = 1
        initial_degrees = 0.0
    "#;
    assert!(matches!(
        RobotProfile::from_toml(duplicate),
        Err(ProfileError::DuplicateJointId(JointId(1)))
    ));

    let unknown = r#"
        name = "unknown"
        [[joints]]
        name = "A"
        id = 1
        initial_degrees = 0.0
        [[compound_movements]]
        name = "reach"
        primary_joint = 1
        [[compound_movements.dependents]]
        joint = 9
        formula = "deltaPrimary"
    "#;
    assert!(matches!(
        RobotProfile::from_toml(unknown),
        Err(ProfileError::UnknownJoint { joint: JointId(9), .. })
    ));

    assert!(matches!(
        RobotProfile::from_toml("name = 3"),
        Err(ProfileError::Toml(_))
    ));
}

#[test]
fn every_bad_formula_is_reported() {
    let source = r#"
        name = "typos"
        [[joints]]
        name = "A"
        id = 1
        initial_degrees = 0.0
        [[joints]]
        name = "B"
        id = 2
        initial_degrees = 0.0
        [[compound_movements]]
        name = "reach"
        primary_joint = 1
        primary_formula = "primry < 1 ? 1 : -1"
        [[compound_movements.dependents]]
        joint = 2
        formula = "deltaPrimary *"
    "#;

    let Err(ProfileError::Formulas(issues)) = RobotProfile::from_toml(source) else {
        panic!("expected formula issues");
    };
    assert_eq!(issues.len(), 2);
    assert_eq!(issues[0].location, "primary formula");
    assert_eq!(issues[0].error.span, 0..6);
    assert_eq!(issues[1].location, "dependent joint 2");
    assert_eq!(issues[1].source, "deltaPrimary *");
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[test]
fn standard_catalog_is_ordered_by_registration() {
    let registry = BlockRegistry::standard();

    let categories: Vec<&Category> = registry.categories().iter().map(|c| &c.id).collect();
    assert_eq!(
        categories,
        vec![&Category::Motion, &Category::Gripper, &Category::Control, &Category::Sensing]
    );
    assert_eq!(registry.blocks()[0].id, standard::MOVE_JOINT);
    assert!(registry.contains(standard::JOINT_ANGLE));
}

#[test]
fn only_control_blocks_with_a_body_host_children() {
    let registry = BlockRegistry::standard();
    let hosts: Vec<&str> = registry
        .blocks()
        .iter()
        .filter(|b| b.can_host_children())
        .map(|b| b.id.as_str())
        .collect();

    assert_eq!(hosts, vec![standard::REPEAT, standard::IF_CONDITION]);
}

#[test]
fn joint_dropdown_follows_the_profile() {
    let registry = BlockRegistry::standard_with_joints(&["Base", "Arm"]);
    let joint = registry
        .get_block(standard::MOVE_JOINT)
        .and_then(|b| b.parameter("joint"))
        .expect("joint parameter");

    assert_eq!(joint.kind, ParameterKind::Dropdown);
    assert_eq!(joint.options, vec!["Base".to_string(), "Arm".to_string()]);
    assert_eq!(joint.default.as_text(), Some("Base"));
}

#[test]
fn duplicate_registration_is_rejected() {
    let mut registry = BlockRegistry::standard();

    let duplicate = BlockDefinition::new(standard::HOME, "home again", Category::Motion, Shape::Command);
    assert_eq!(
        registry.register(duplicate),
        Err(RegistryError::DuplicateBlock("home".to_string()))
    );

    let category = BlockCategory {
        id: Category::Motion,
        name: "Motion".into(),
        color: "#000000".into(),
        icon: String::new(),
    };
    assert_eq!(
        registry.register_category(category),
        Err(RegistryError::DuplicateCategory("motion".to_string()))
    );
}

#[test]
fn custom_categories_filter_and_stack() {
    let mut registry = BlockRegistry::new();
    let looks = Category::Custom("lights".into());
    registry
        .register(BlockDefinition::new("blink", "blink", looks.clone(), Shape::Command))
        .expect("fresh id");
    registry
        .register(BlockDefinition::new("brightness", "brightness", looks.clone(), Shape::Reporter))
        .expect("fresh id");

    assert_eq!(registry.blocks_in(&looks).count(), 2);
    let stackable: Vec<&str> = registry.child_compatible(&looks).map(|b| b.id.as_str()).collect();
    assert_eq!(stackable, vec!["blink"]);
}
