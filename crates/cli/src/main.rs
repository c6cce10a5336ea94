//! `spin`: the session-loop binary. Argument parsing, config/formula/
//! goal/trajectory bootstrap, then a loop of `spin_engine::run_cycle`
//! calls until the engine terminates or SIGINT arrives. Grounded on
//! the teacher's `bm_runner` binary: env-var-seeded `parse_args`, a
//! manual flag loop, `usage()`, and liberal `std::process::exit` on
//! setup failure rather than unwinding a `Result` all the way out.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use spin_agent::coding_agent::BackendConfig;
use spin_agent::pr_cli::PrCliConfig;
use spin_config::solo_config::SoloConfig;
use spin_config::{load_formula, load_goal, load_trajectory};
use spin_core::ids::ProjectId;
use spin_core::model::{Formula, RunState, Trajectory, TrajectoryState};
use spin_engine::error::CycleOutcome;
use spin_engine::git_driver::GitMutex;
use spin_engine::scheduler::TasteProfile;
use spin_engine::ticket_runner::DeliveryMode;
use spin_engine::CycleContext;
use spin_storage::journal::Journal;
use spin_storage::{state_file, Store};

/// Default allow-set when neither `--allow` nor the active formula
/// names any categories (spec.md §4.8 stage 8's "safe-set").
const SAFE_CATEGORY_SET: &[&str] = &["bug", "docs", "refactor", "perf", "style"];

fn usage() -> &'static str {
    "spin — autonomous code-improvement orchestrator\n\
     \n\
     USAGE:\n\
     \x20 spin [OPTIONS]\n\
     \n\
     OPTIONS:\n\
     \x20 --repo PATH              repository root (default: .)\n\
     \x20 --appdir PATH            state directory relative to PATH unless absolute (default: .spin)\n\
     \x20 --base-branch NAME       base branch to pull/rebase against (default: main)\n\
     \x20 --delivery MODE          direct | pr | auto-merge (default: direct)\n\
     \x20 --agent-bin BIN          coding-agent binary to invoke (default: claude)\n\
     \x20 --agent-model NAME       model flag value passed to the agent binary\n\
     \x20 --pr-bin BIN             PR-hosting CLI binary (default: gh)\n\
     \x20 --allow CATS             comma-separated category allow-list override\n\
     \x20 --block CATS             comma-separated category block-list\n\
     \x20 --tests                  include the test category\n\
     \x20 --trajectory NAME        active trajectory YAML name under <appdir>/trajectories\n\
     \x20 --timeout-s N            per-agent-invocation timeout in seconds (default: 600)\n\
     \x20 --once                   run a single cycle and exit\n\
     \x20 --max-cycles N           stop after N cycles even if not idle\n\
     \x20 --skip-qa                skip QA commands for every ticket\n\
     \x20 -h, --help               print this message and exit\n\
     \n\
     Every option has a SPIN_* environment fallback, e.g. SPIN_REPO, \n\
     SPIN_APPDIR, SPIN_DELIVERY, SPIN_AGENT_BIN, SPIN_AGENT_MODEL, \n\
     SPIN_PR_BIN, SPIN_ALLOW, SPIN_BLOCK, SPIN_TRAJECTORY, SPIN_TIMEOUT_S, \n\
     SPIN_ONCE, SPIN_MAX_CYCLES, SPIN_SKIP_QA.\n\
     \n\
     EXIT CODES: 0 clean terminate, 1 unexpected error, 2 bad arguments \n\
     or config, 130 interrupted by SIGINT.\n"
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn split_list(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

struct CliConfig {
    repo_root: PathBuf,
    appdir: PathBuf,
    base_branch: String,
    delivery_mode: DeliveryMode,
    agent_bin: String,
    agent_model: Option<String>,
    pr_bin: String,
    allow: Vec<String>,
    block: Vec<String>,
    include_tests: bool,
    trajectory_name: Option<String>,
    timeout_s: u64,
    once: bool,
    max_cycles: Option<u64>,
    skip_qa: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from("."),
            appdir: PathBuf::from(".spin"),
            base_branch: "main".to_string(),
            delivery_mode: DeliveryMode::Direct,
            agent_bin: "claude".to_string(),
            agent_model: None,
            pr_bin: "gh".to_string(),
            allow: Vec::new(),
            block: Vec::new(),
            include_tests: false,
            trajectory_name: None,
            timeout_s: 600,
            once: false,
            max_cycles: None,
            skip_qa: false,
        }
    }
}

fn parse_delivery_mode(value: &str) -> Result<DeliveryMode, String> {
    match value {
        "direct" => Ok(DeliveryMode::Direct),
        "pr" => Ok(DeliveryMode::Pr),
        "auto-merge" | "automerge" => Ok(DeliveryMode::AutoMerge),
        other => Err(format!("unknown --delivery mode: {other} (expected direct|pr|auto-merge)")),
    }
}

fn parse_args() -> Result<CliConfig, String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print!("{}", usage());
        std::process::exit(0);
    }

    let mut cfg = CliConfig::default();
    if let Some(v) = env_var("SPIN_REPO") {
        cfg.repo_root = PathBuf::from(v);
    }
    if let Some(v) = env_var("SPIN_APPDIR") {
        cfg.appdir = PathBuf::from(v);
    }
    if let Some(v) = env_var("SPIN_BASE_BRANCH") {
        cfg.base_branch = v;
    }
    if let Some(v) = env_var("SPIN_DELIVERY") {
        cfg.delivery_mode = parse_delivery_mode(&v)?;
    }
    if let Some(v) = env_var("SPIN_AGENT_BIN") {
        cfg.agent_bin = v;
    }
    if let Some(v) = env_var("SPIN_AGENT_MODEL") {
        cfg.agent_model = Some(v);
    }
    if let Some(v) = env_var("SPIN_PR_BIN") {
        cfg.pr_bin = v;
    }
    if let Some(v) = env_var("SPIN_ALLOW") {
        cfg.allow = split_list(&v);
    }
    if let Some(v) = env_var("SPIN_BLOCK") {
        cfg.block = split_list(&v);
    }
    if let Some(v) = env_var("SPIN_TRAJECTORY") {
        cfg.trajectory_name = Some(v);
    }
    if let Some(v) = env_var("SPIN_TIMEOUT_S") {
        cfg.timeout_s = v.parse().map_err(|_| "SPIN_TIMEOUT_S must be an integer".to_string())?;
    }
    if env_var("SPIN_ONCE").is_some() {
        cfg.once = true;
    }
    if let Some(v) = env_var("SPIN_MAX_CYCLES") {
        cfg.max_cycles = Some(v.parse().map_err(|_| "SPIN_MAX_CYCLES must be an integer".to_string())?);
    }
    if env_var("SPIN_SKIP_QA").is_some() {
        cfg.skip_qa = true;
    }

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--repo" => {
                i += 1;
                cfg.repo_root = PathBuf::from(args.get(i).ok_or("--repo requires PATH")?);
            }
            "--appdir" => {
                i += 1;
                cfg.appdir = PathBuf::from(args.get(i).ok_or("--appdir requires PATH")?);
            }
            "--base-branch" => {
                i += 1;
                cfg.base_branch = args.get(i).ok_or("--base-branch requires NAME")?.clone();
            }
            "--delivery" => {
                i += 1;
                cfg.delivery_mode = parse_delivery_mode(args.get(i).ok_or("--delivery requires MODE")?)?;
            }
            "--agent-bin" => {
                i += 1;
                cfg.agent_bin = args.get(i).ok_or("--agent-bin requires BIN")?.clone();
            }
            "--agent-model" => {
                i += 1;
                cfg.agent_model = Some(args.get(i).ok_or("--agent-model requires NAME")?.clone());
            }
            "--pr-bin" => {
                i += 1;
                cfg.pr_bin = args.get(i).ok_or("--pr-bin requires BIN")?.clone();
            }
            "--allow" => {
                i += 1;
                cfg.allow = split_list(args.get(i).ok_or("--allow requires CATS")?);
            }
            "--block" => {
                i += 1;
                cfg.block = split_list(args.get(i).ok_or("--block requires CATS")?);
            }
            "--tests" => cfg.include_tests = true,
            "--trajectory" => {
                i += 1;
                cfg.trajectory_name = Some(args.get(i).ok_or("--trajectory requires NAME")?.clone());
            }
            "--timeout-s" => {
                i += 1;
                let v = args.get(i).ok_or("--timeout-s requires N")?;
                cfg.timeout_s = v.parse().map_err(|_| "--timeout-s must be an integer".to_string())?;
            }
            "--once" => cfg.once = true,
            "--max-cycles" => {
                i += 1;
                let v = args.get(i).ok_or("--max-cycles requires N")?;
                cfg.max_cycles = Some(v.parse().map_err(|_| "--max-cycles must be an integer".to_string())?);
            }
            "--skip-qa" => cfg.skip_qa = true,
            other => return Err(format!("unrecognized argument: {other}")),
        }
        i += 1;
    }

    Ok(cfg)
}

fn resolve_appdir(repo_root: &Path, appdir: &Path) -> PathBuf {
    if appdir.is_absolute() {
        appdir.to_path_buf()
    } else {
        repo_root.join(appdir)
    }
}

/// Load every `<dir>/*.yaml` entry as a named resource via `load`,
/// skipping unreadable filenames rather than failing the whole
/// session over one malformed file. An absent directory is an empty
/// set, not an error — a fresh repo has no formulas yet.
fn load_all<T>(dir: &Path, load: impl Fn(&Path, &str) -> Result<T, spin_config::ConfigError>) -> Vec<T> {
    let Ok(entries) = std::fs::read_dir(dir) else { return Vec::new() };
    let mut out = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
        match load(dir, stem) {
            Ok(value) => out.push(value),
            Err(e) => tracing::warn!(file = %path.display(), error = %e, "skipping unreadable resource"),
        }
    }
    out
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("spin_cli=info".parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cfg = parse_args().unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(2);
    });
    init_logging();

    match run(cfg) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(error = %e, "session failed");
            std::process::exit(1);
        }
    }
}

fn run(cfg: CliConfig) -> Result<i32, Box<dyn std::error::Error>> {
    let repo_root = cfg.repo_root.canonicalize().unwrap_or_else(|_| cfg.repo_root.clone());
    let appdir = resolve_appdir(&repo_root, &cfg.appdir);
    std::fs::create_dir_all(&appdir)?;

    let solo_cfg = SoloConfig::load(&appdir)?;

    let db_path = appdir.join("spin.db");
    let store = Store::open(&db_path)?;

    let project = match store.get_project_by_root(repo_root.to_string_lossy().as_ref())? {
        Some(project) => project,
        None => {
            let name = repo_root.file_name().and_then(|n| n.to_str()).unwrap_or("project");
            store.create_project(name, repo_root.to_string_lossy().as_ref(), solo_cfg.allowed_remote.as_deref())?
        }
    };
    let project_id: ProjectId = project.id.clone();

    let formulas: Vec<Formula> = load_all(&appdir.join("formulas"), load_formula);
    let goals: Vec<Formula> = load_all(&appdir.join("goals"), load_goal).into_iter().map(|g| g.0).collect();

    let trajectory: Option<Trajectory> = match &cfg.trajectory_name {
        Some(name) => Some(load_trajectory(&appdir.join("trajectories"), name)?),
        None => None,
    };

    let run_state_path = appdir.join("run_state.json");
    state_file::recover_tmp(&run_state_path)?;
    let mut run_state: RunState = state_file::read(&run_state_path)?.unwrap_or_default();

    let trajectory_state_path = appdir.join("trajectory_state.json");
    state_file::recover_tmp(&trajectory_state_path)?;
    let mut trajectory_state: Option<TrajectoryState> = state_file::read(&trajectory_state_path)?;
    if trajectory.is_some() && trajectory_state.is_none() {
        trajectory_state = Some(TrajectoryState::new(cfg.trajectory_name.clone().unwrap_or_default(), spin_core::now_ms()));
    }

    let run_id = spin_core::ids::RunId::generate();
    let journal = Journal::open(appdir.join("runs").join(run_id.as_str()).join("events.ndjson"))?;

    let backend = BackendConfig {
        bin: cfg.agent_bin.clone(),
        model: cfg.agent_model.clone(),
        model_flag: "--model".to_string(),
        non_interactive_flag: Some("--non-interactive".to_string()),
        skip_permissions_flag: None,
        extra_args: Vec::new(),
    };
    let pr_cli = PrCliConfig { bin: cfg.pr_bin.clone() };
    let taste = TasteProfile { preferred_categories: Vec::new(), avoided_categories: Vec::new() };

    let trusted_category_set: Vec<String> = SAFE_CATEGORY_SET.iter().map(|s| s.to_string()).collect();
    let guidelines_path = appdir.join("GUIDELINES.md");
    let artifacts_dir = appdir.join("artifacts");
    std::fs::create_dir_all(&artifacts_dir)?;

    let mut solo_cfg = solo_cfg;
    if !cfg.allow.is_empty() {
        solo_cfg.allow_categories = cfg.allow.clone();
    }
    if !cfg.block.is_empty() {
        solo_cfg.block_categories = cfg.block.clone();
    }
    if cfg.include_tests {
        solo_cfg.include_tests = true;
    }
    if cfg.skip_qa {
        solo_cfg.qa.commands.clear();
    }

    let git_mutex = GitMutex::new();
    let agent_timeout = Duration::from_secs(cfg.timeout_s);
    let start_ms = spin_core::now_ms();

    let cancelled = Arc::new(AtomicBool::new(false));
    let ctrlc_flag = Arc::clone(&cancelled);
    ctrlc::set_handler(move || {
        ctrlc_flag.store(true, Ordering::SeqCst);
    })?;

    journal_emit_session(&journal, "SESSION_START", serde_json::json!({"repo": repo_root.display().to_string()}));

    let mut cycles_run: u64 = 0;
    let mut exit_code = 0;
    loop {
        if cancelled.load(Ordering::SeqCst) {
            exit_code = 130;
            break;
        }
        if let Some(max) = cfg.max_cycles {
            if cycles_run >= max {
                break;
            }
        }

        let elapsed_ms = spin_core::now_ms() - start_ms;
        let cancelled_fn: &(dyn Fn() -> bool + Sync) = &|| cancelled.load(Ordering::SeqCst);

        let ctx = CycleContext {
            repo_root: &repo_root,
            appdir: &appdir,
            app_prefix: "spin",
            base_branch: &cfg.base_branch,
            db_path: &db_path,
            project_id: &project_id,
            guidelines_path: &guidelines_path,
            cfg: &solo_cfg,
            backend: &backend,
            pr_cli: &pr_cli,
            formulas: &formulas,
            goals: &goals,
            trusted_category_set: &trusted_category_set,
            taste: &taste,
            trajectory: trajectory.as_ref(),
            delivery_mode: cfg.delivery_mode,
            agent_timeout,
            journal: Some(&journal),
        };

        let outcome = spin_engine::run_cycle(
            &ctx,
            &store,
            &mut run_state,
            trajectory_state.as_mut(),
            &git_mutex,
            &artifacts_dir,
            elapsed_ms,
            spin_core::now_ms(),
            cancelled_fn,
        )?;

        state_file::write_atomic(&run_state_path, &run_state)?;
        if let Some(state) = &trajectory_state {
            state_file::write_atomic(&trajectory_state_path, state)?;
        }
        cycles_run += 1;

        match outcome {
            CycleOutcome::Continue => {
                if cfg.once {
                    break;
                }
            }
            CycleOutcome::SkipRest => {
                if cfg.once {
                    break;
                }
            }
            CycleOutcome::Terminate { reason } => {
                tracing::info!(reason = %reason, "session terminating");
                break;
            }
        }
    }

    journal_emit_session(&journal, "SESSION_END", serde_json::json!({"cycles": cycles_run, "exit_code": exit_code}));

    Ok(exit_code)
}

fn journal_emit_session(journal: &Journal, step: &str, payload: serde_json::Value) {
    use spin_core::model::{Event, EventType};
    let event_type = if step == "SESSION_START" { EventType::SessionStart } else { EventType::SessionEnd };
    let run_id = spin_core::ids::RunId::generate();
    if let Err(e) = journal.append(&Event::new(&run_id, step, event_type, payload)) {
        tracing::warn!(error = %e, "failed to append session journal event");
    }
}
