mod test_runner;

use std::path::PathBuf;
use std::process;
use std::str::FromStr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use tracing::Level;

use blocks::program::file::ProgramFile;
use blocks::robot::{FormulaIssue, ProfileError};
use blocks::{BlockRegistry, JointId, RobotProfile};
use engine::{EngineConfig, ExecutionEngine, JointCommand, RunOutcome, SimulatedLink};

#[derive(Parser)]
#[command(name = "armblocks", version, about = "Block programs for robot arms")]
struct Cli {
    /// Disable colored error output
    #[arg(long, global = true)]
    no_color: bool,

    /// Log level written to stderr (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a program against a simulated arm. Ctrl-C cancels the run.
    Run(RunArgs),

    /// Move one joint through the coupling resolver
    Jog(JogArgs),

    /// List block categories and definitions
    Catalog(RobotArgs),

    /// Validate a robot profile
    Check(CheckArgs),

    /// Run .scenario.toml files
    Test(TestArgs),
}

#[derive(clap::Args)]
struct RobotArgs {
    /// Robot profile (TOML). Defaults to the built-in SO-ARM101 profile.
    #[arg(long)]
    robot: Option<PathBuf>,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Program file (TOML)
    file: PathBuf,

    #[command(flatten)]
    robot: RobotArgs,

    /// Minimum time between two dispatches, in milliseconds
    #[arg(long)]
    pause_ms: Option<u64>,

    /// Time to wait after each acknowledged dispatch, in milliseconds
    #[arg(long)]
    settle_ms: Option<u64>,
}

#[derive(clap::Args)]
struct JogArgs {
    /// Joint name (case-insensitive) or numeric id
    joint: String,

    /// Requested change in degrees
    #[arg(allow_negative_numbers = true)]
    delta: f64,

    #[command(flatten)]
    robot: RobotArgs,

    /// Use this compound movement instead of the first one for the joint
    #[arg(long)]
    movement: Option<String>,
}

#[derive(clap::Args)]
struct CheckArgs {
    /// Robot profile to validate
    profile: PathBuf,
}

#[derive(clap::Args)]
struct TestArgs {
    /// Path to a .scenario.toml file or a directory containing them
    path: PathBuf,

    /// Run only scenarios whose file name contains this substring
    #[arg(short, long)]
    filter: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    let level = Level::from_str(&cli.log_level).unwrap_or(Level::WARN);
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init();

    let color_choice = if cli.no_color {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    };

    let exit_code = match cli.command {
        Command::Run(args) => block_on(do_run(args, color_choice)),
        Command::Jog(args) => block_on(do_jog(args, color_choice)),
        Command::Catalog(args) => do_catalog(args, color_choice),
        Command::Check(args) => do_check(args, color_choice),
        Command::Test(args) => block_on(test_runner::run_scenarios(
            &args.path,
            cli.no_color,
            args.filter.as_deref(),
        )),
    };
    process::exit(exit_code);
}

fn block_on<F: Future<Output = i32>>(future: F) -> i32 {
    match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime.block_on(future),
        Err(e) => {
            eprintln!("error: cannot start runtime: {}", e);
            1
        }
    }
}

fn load_profile(args: &RobotArgs) -> Result<RobotProfile, ProfileError> {
    match &args.robot {
        Some(path) => RobotProfile::load(path),
        None => RobotProfile::so_arm101(),
    }
}

/// Load a profile or print why it failed. Formula issues are rendered with
/// their source spans.
fn load_profile_or_report(args: &RobotArgs, color_choice: ColorChoice) -> Option<RobotProfile> {
    match load_profile(args) {
        Ok(profile) => Some(profile),
        Err(error) => {
            report_profile_error(&error, color_choice);
            None
        }
    }
}

fn report_profile_error(error: &ProfileError, color_choice: ColorChoice) {
    match error {
        ProfileError::Formulas(issues) => {
            let writer = StandardStream::stderr(color_choice);
            for issue in issues {
                emit_formula_issue(&writer, issue);
            }
            eprintln!("error: {}", error);
        }
        other => eprintln!("error: {}", other),
    }
}

fn emit_formula_issue(writer: &StandardStream, issue: &FormulaIssue) {
    // Formulas are parsed with file id 0, so each one gets a database of its own.
    let mut files = SimpleFiles::new();
    files.add(format!("{} ({})", issue.movement, issue.location), issue.source.clone());
    let config = term::Config::default();
    let diagnostic = issue.error.to_diagnostic();
    let _ = term::emit_to_write_style(&mut writer.lock(), &config, &files, &diagnostic);
}

fn registry_for(profile: &RobotProfile) -> BlockRegistry {
    BlockRegistry::standard_with_joints(&profile.joint_names())
}

async fn do_run(args: RunArgs, color_choice: ColorChoice) -> i32 {
    let Some(profile) = load_profile_or_report(&args.robot, color_choice) else {
        return 1;
    };
    let registry = registry_for(&profile);

    let model = match ProgramFile::load(&args.file).and_then(|file| file.build(&registry)) {
        Ok(model) => model,
        Err(e) => {
            eprintln!("error: {}: {}", args.file.display(), e);
            return 1;
        }
    };

    let mut config = EngineConfig::default();
    if let Some(pause) = args.pause_ms {
        config.command_pause_ms = pause;
    }
    if let Some(settle) = args.settle_ms {
        config.settle_ms = settle;
    }

    let profile = Arc::new(profile);
    let engine = ExecutionEngine::new(Arc::new(registry), Arc::clone(&profile), config);
    let mut link = SimulatedLink::for_profile(&profile).connected();
    let handle = engine.handle();
    let snapshot = model.snapshot();

    let result = {
        let run = engine.run(&snapshot, Some(&mut link));
        tokio::pin!(run);
        tokio::select! {
            result = &mut run => result,
            Ok(()) = tokio::signal::ctrl_c() => {
                eprintln!("interrupt: cancelling run");
                handle.cancel();
                run.await
            }
        }
    };

    match result {
        Ok(report) => {
            for warning in &report.warnings {
                eprintln!("warning: {}", warning);
            }
            for (i, batch) in report.batches.iter().enumerate() {
                println!("batch {}: {}", i + 1, format_commands(&profile, batch));
            }
            if report.home_calls > 0 {
                println!("home calls: {}", report.home_calls);
            }
            if report.outcome == RunOutcome::Cancelled {
                println!("cancelled after {} dispatch(es)", report.dispatched());
            }
            print_angles(&profile, engine.joint_state().angles());
            0
        }
        Err(e) => {
            eprintln!("error: {}", e);
            for (i, record) in link.history().iter().enumerate() {
                println!("batch {}: {}", i + 1, format_commands(&profile, &record.commands));
            }
            1
        }
    }
}

async fn do_jog(args: JogArgs, color_choice: ColorChoice) -> i32 {
    let Some(profile) = load_profile_or_report(&args.robot, color_choice) else {
        return 1;
    };
    let joint = match resolve_joint(&profile, &args.joint) {
        Some(joint) => joint,
        None => {
            eprintln!(
                "error: unknown joint '{}' (available: {})",
                args.joint,
                profile.joint_names().join(", ")
            );
            return 1;
        }
    };

    let registry = registry_for(&profile);
    let profile = Arc::new(profile);
    let engine = ExecutionEngine::new(Arc::new(registry), Arc::clone(&profile), EngineConfig::default());
    let mut link = SimulatedLink::for_profile(&profile).connected();

    match engine
        .jog(&mut link, joint, args.delta, args.movement.as_deref())
        .await
    {
        Ok(batch) => {
            match &batch.movement {
                Some(name) => println!("movement: {}", name),
                None => println!("movement: (none)"),
            }
            for delta in &batch.deltas {
                println!("  {:<12} {:+.2}", joint_label(&profile, delta.joint), delta.delta);
            }
            print_angles(&profile, engine.joint_state().angles());
            0
        }
        Err(e) => {
            eprintln!("error: {}", e);
            1
        }
    }
}

fn do_catalog(args: RobotArgs, color_choice: ColorChoice) -> i32 {
    let Some(profile) = load_profile_or_report(&args, color_choice) else {
        return 1;
    };
    let registry = registry_for(&profile);

    for category in registry.categories() {
        println!("{} {} ({})", category.icon, category.name, category.id);
        for block in registry.blocks_in(&category.id) {
            let params: Vec<String> = block
                .parameters
                .iter()
                .map(|p| format!("{}={}", p.name, p.default))
                .collect();
            let body = if block.can_host_children() { " [body]" } else { "" };
            println!("  {:<14} {}{}  {}", block.id, block.name, body, params.join(" "));
        }
    }
    0
}

fn do_check(args: CheckArgs, color_choice: ColorChoice) -> i32 {
    match RobotProfile::load(&args.profile) {
        Ok(profile) => {
            eprintln!(
                "ok: {}: {} joint(s), {} compound movement(s)",
                profile.name,
                profile.joints.len(),
                profile.compound_movements.len()
            );
            0
        }
        Err(error) => {
            report_profile_error(&error, color_choice);
            1
        }
    }
}

fn resolve_joint(profile: &RobotProfile, name: &str) -> Option<JointId> {
    if let Ok(id) = name.parse::<u32>() {
        return profile.joint(JointId(id)).map(|j| j.id);
    }
    profile.joint_by_name(name).map(|j| j.id)
}

fn joint_label(profile: &RobotProfile, joint: JointId) -> String {
    profile
        .joint(joint)
        .map(|j| j.name.clone())
        .unwrap_or_else(|| format!("#{}", joint))
}

fn format_commands(profile: &RobotProfile, commands: &[JointCommand]) -> String {
    commands
        .iter()
        .map(|c| format!("{}={:.2}", joint_label(profile, c.joint), c.angle_degrees))
        .collect::<Vec<_>>()
        .join(" ")
}

fn print_angles(profile: &RobotProfile, angles: &[(JointId, f64)]) {
    println!("final angles:");
    for (joint, degrees) in angles {
        println!("  {:<12} {:.2}", joint_label(profile, *joint), degrees);
    }
}
