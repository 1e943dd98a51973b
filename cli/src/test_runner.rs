use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use blocks::program::file::{BlockEntry, ProgramFile};
use blocks::{BlockRegistry, RobotProfile};
use engine::{EngineConfig, ExecutionEngine, RunReport, SimulatedLink};

const SUFFIX: &str = ".scenario.toml";

#[derive(Debug, Deserialize)]
pub struct Scenario {
    /// Human-readable scenario description.
    #[serde(default)]
    pub description: Option<String>,

    /// Robot profile, relative to the scenario file. Defaults to the built-in profile.
    #[serde(default)]
    pub robot: Option<PathBuf>,

    /// Engine pacing. Scenarios run unpaced unless they set it.
    #[serde(default = "unpaced")]
    pub engine: EngineConfig,

    /// The program under test.
    #[serde(default)]
    pub blocks: Vec<BlockEntry>,

    /// Expected number of acknowledged dispatches.
    #[serde(default)]
    pub expect_batches: Option<usize>,

    /// Expected final angle per joint name, compared to within 1e-6 degrees.
    #[serde(default)]
    pub expect_angles: BTreeMap<String, f64>,

    /// Expected error: the error's Display string must contain this substring.
    #[serde(default)]
    pub expect_error: Option<String>,

    /// Expected warnings, in order. If present (even empty), the count is checked too.
    #[serde(default)]
    pub expect_warnings: Option<Vec<String>>,
}

fn unpaced() -> EngineConfig {
    EngineConfig {
        command_pause_ms: 0,
        settle_ms: 0,
        ..EngineConfig::default()
    }
}

pub enum TestOutcome {
    Pass,
    Fail(String),
}

pub struct TestResult {
    pub path: PathBuf,
    pub description: Option<String>,
    pub outcome: TestOutcome,
}

impl TestResult {
    fn fail(path: &Path, description: Option<String>, reason: String) -> Self {
        TestResult {
            path: path.to_path_buf(),
            description,
            outcome: TestOutcome::Fail(reason),
        }
    }
}

async fn run_single_scenario(path: &Path) -> TestResult {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => return TestResult::fail(path, None, format!("cannot read file: {}", e)),
    };

    let scenario: Scenario = match toml::from_str(&content) {
        Ok(s) => s,
        Err(e) => return TestResult::fail(path, None, format!("TOML parse error: {}", e)),
    };
    let description = scenario.description.clone();

    let profile = match &scenario.robot {
        Some(robot) => {
            let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
            RobotProfile::load(&base_dir.join(robot))
        }
        None => RobotProfile::so_arm101(),
    };
    let profile = match profile {
        Ok(p) => Arc::new(p),
        Err(e) => return TestResult::fail(path, description, format!("robot profile: {}", e)),
    };

    let registry = BlockRegistry::standard_with_joints(&profile.joint_names());
    let program = ProgramFile {
        blocks: scenario.blocks.clone(),
    };
    let model = match program.build(&registry) {
        Ok(m) => m,
        Err(e) => return TestResult::fail(path, description, format!("program: {}", e)),
    };

    let engine = ExecutionEngine::new(Arc::new(registry), Arc::clone(&profile), scenario.engine);
    let mut link = SimulatedLink::for_profile(&profile).connected();
    let result = engine.run(&model.snapshot(), Some(&mut link)).await;

    let report = match (&scenario.expect_error, result) {
        (Some(expected), Err(error)) => {
            let message = error.to_string();
            if !message.contains(expected.as_str()) {
                return TestResult::fail(
                    path,
                    description,
                    format!("expected error containing \"{}\", got: {}", expected, message),
                );
            }
            None
        }
        (Some(expected), Ok(_)) => {
            return TestResult::fail(
                path,
                description,
                format!("expected error containing \"{}\", but the run succeeded", expected),
            );
        }
        (None, Err(error)) => {
            return TestResult::fail(path, description, format!("unexpected error: {}", error));
        }
        (None, Ok(report)) => Some(report),
    };

    let dispatched = report
        .as_ref()
        .map_or(link.history().len(), RunReport::dispatched);
    if let Some(expected) = scenario.expect_batches
        && expected != dispatched
    {
        return TestResult::fail(
            path,
            description,
            format!("expected {} batch(es), got {}", expected, dispatched),
        );
    }

    if let Some(reason) = check_angles(&profile, &link, &scenario.expect_angles) {
        return TestResult::fail(path, description, reason);
    }

    if let (Some(expected), Some(report)) = (&scenario.expect_warnings, &report)
        && let Some(reason) = check_warnings(report, expected)
    {
        return TestResult::fail(path, description, reason);
    }

    TestResult {
        path: path.to_path_buf(),
        description,
        outcome: TestOutcome::Pass,
    }
}

/// Compare the simulated arm's final angles. Returns `Some(reason)` on mismatch.
fn check_angles(
    profile: &RobotProfile,
    link: &SimulatedLink,
    expected: &BTreeMap<String, f64>,
) -> Option<String> {
    for (name, degrees) in expected {
        let Some(joint) = profile.joint_by_name(name) else {
            return Some(format!("expect_angles names unknown joint '{}'", name));
        };
        match link.angle(joint.id) {
            Some(actual) if (actual - degrees).abs() <= 1e-6 => {}
            Some(actual) => {
                return Some(format!(
                    "joint {}: expected {:.3}°, got {:.3}°",
                    name, degrees, actual
                ));
            }
            None => return Some(format!("joint {}: no angle recorded", name)),
        }
    }
    None
}

/// Check that actual warnings match expectations. Returns `Some(reason)` on mismatch.
fn check_warnings(report: &RunReport, expected: &[String]) -> Option<String> {
    if report.warnings.len() != expected.len() {
        let actual: Vec<String> = report.warnings.iter().map(|w| format!("  - {}", w)).collect();
        return Some(format!(
            "expected {} warning(s), got {}\n  actual warnings:\n{}",
            expected.len(),
            report.warnings.len(),
            if actual.is_empty() {
                "    (none)".to_string()
            } else {
                actual.join("\n")
            }
        ));
    }

    for (i, (actual, expected)) in report.warnings.iter().zip(expected).enumerate() {
        let message = actual.to_string();
        if !message.contains(expected.as_str()) {
            return Some(format!(
                "warning[{}]: expected message containing \"{}\", got: {}",
                i, expected, message
            ));
        }
    }
    None
}

fn collect_scenarios(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_scenarios(&path, out);
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| name.ends_with(SUFFIX))
        {
            out.push(path);
        }
    }
}

fn pass_label(no_color: bool) -> &'static str {
    if no_color { "PASS" } else { "\x1b[32mPASS\x1b[0m" }
}

fn fail_label(no_color: bool) -> &'static str {
    if no_color { "FAIL" } else { "\x1b[31mFAIL\x1b[0m" }
}

fn label(result: &TestResult) -> String {
    match &result.description {
        Some(description) => description.clone(),
        None => result
            .path
            .file_name()
            .and_then(|s| s.to_str())
            .map(|s| s.trim_end_matches(SUFFIX).to_string())
            .unwrap_or_else(|| "?".to_string()),
    }
}

/// Run every scenario under `path` (or a single file), optionally only those
/// whose file name contains `filter`.
/// Returns exit code: 0 = all pass, 1 = any failure or nothing to run.
pub async fn run_scenarios(path: &Path, no_color: bool, filter: Option<&str>) -> i32 {
    let mut files = Vec::new();
    if path.is_file() {
        files.push(path.to_path_buf());
    } else {
        collect_scenarios(path, &mut files);
        files.sort();
    }
    if let Some(filter) = filter {
        files.retain(|f| {
            f.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains(filter))
        });
    }

    if files.is_empty() {
        eprintln!("no {} files found in {}", SUFFIX, path.display());
        return 1;
    }

    let mut passed = 0usize;
    let mut failures: Vec<TestResult> = Vec::new();

    for file in &files {
        let result = run_single_scenario(file).await;
        match &result.outcome {
            TestOutcome::Pass => {
                passed += 1;
                eprintln!("  {}  {}", pass_label(no_color), label(&result));
            }
            TestOutcome::Fail(_) => {
                eprintln!("  {}  {}", fail_label(no_color), label(&result));
                failures.push(result);
            }
        }
    }

    if !failures.is_empty() {
        eprintln!();
        eprintln!("failures:");
        for f in &failures {
            eprintln!();
            eprintln!("  --- {} ---", f.path.display());
            if let TestOutcome::Fail(reason) = &f.outcome {
                for line in reason.lines() {
                    eprintln!("  {}", line);
                }
            }
        }
    }

    eprintln!();
    let failed = failures.len();
    if failed == 0 {
        let ok = if no_color { "ok" } else { "\x1b[32mok\x1b[0m" };
        eprintln!("test result: {}. {} passed, 0 failed", ok, passed);
        0
    } else {
        let failed_label = if no_color { "FAILED" } else { "\x1b[31mFAILED\x1b[0m" };
        eprintln!(
            "test result: {}. {} passed, {} failed (of {})",
            failed_label,
            passed,
            failed,
            passed + failed
        );
        1
    }
}
