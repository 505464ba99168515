use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use gmv_ops::agent::{AuditLog, ChatSession, Console, TurnOutcome};
use gmv_ops::config::{ExecutorConfig, SessionConfig, env_flag};
use gmv_ops::error::PolicyError;
use gmv_ops::executor::ToolExecutor;
use gmv_ops::gate::ConsoleConfirmer;
use gmv_ops::harvest::{HarvestRequest, harvest_resources};
use gmv_ops::llm::{LlmOverrides, LlmProvider, LlmSettings, MockProvider, create_provider};
use gmv_ops::pipeline::PipelineContext;
use gmv_ops::policy::{
    DecisionLog, EngineConfig, PolicyEngine, PolicyRisk, Signal, compare, replay_file,
};
use gmv_ops::tools::ToolRegistry;

#[derive(Parser, Debug)]
#[command(name = "gmv-ops", version, about = "GMV pipeline operations agent")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chat with the operations assistant (one message, or a REPL)
    Chat(ChatArgs),
    /// Policy engine and resource tooling
    #[command(subcommand)]
    Agent(AgentCommand),
}

#[derive(Args, Debug)]
struct ChatArgs {
    /// Pipeline config YAML
    #[arg(long)]
    config: PathBuf,
    /// Run a single turn with this message instead of the REPL
    #[arg(long)]
    message: Option<String>,
    /// Execute high-risk actions without asking
    #[arg(long)]
    auto_approve: bool,
    /// Model round-trips per turn
    #[arg(long, default_value_t = 8)]
    max_steps: usize,
    /// Audit log directory (default: <results_dir>/<run_id>/agent/chat)
    #[arg(long)]
    log_dir: Option<PathBuf>,
    #[arg(long)]
    base_url: Option<String>,
    #[arg(long)]
    model: Option<String>,
    /// Environment variable holding the API key
    #[arg(long)]
    api_key_env: Option<String>,
    /// LLM settings YAML (default: ~/.config/gmv/llm.yaml)
    #[arg(long)]
    llm_config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum AgentCommand {
    /// Replay a signal log through the policy engine
    Replay(ReplayArgs),
    /// Evaluate one live signal and append the decision
    Evaluate(EvaluateArgs),
    /// Suggest per-tool resource ceilings from sacct accounting
    Harvest(HarvestArgs),
}

#[derive(Args, Debug)]
struct EngineArgs {
    /// Pipeline config YAML supplying the agent section
    #[arg(long)]
    config: Option<PathBuf>,
    /// Comma-separated risk levels applied without review, e.g. low,medium
    #[arg(long)]
    auto_apply_risk_levels: Option<String>,
    #[arg(long)]
    retry_limit: Option<i64>,
    #[arg(long)]
    low_yield_threshold: Option<i64>,
}

#[derive(Args, Debug)]
struct ReplayArgs {
    /// Signal log (JSONL of {step, signal})
    #[arg(long)]
    file: PathBuf,
    /// Recorded decision log to compare against
    #[arg(long)]
    compare: Option<PathBuf>,
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Args, Debug)]
struct EvaluateArgs {
    #[arg(long)]
    step: String,
    /// Signal as a JSON object
    #[arg(long)]
    signal: String,
    /// Decision log to append to (default: the run's agent directory when --config is given)
    #[arg(long)]
    decision_log: Option<PathBuf>,
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Args, Debug)]
struct HarvestArgs {
    #[arg(long)]
    config: PathBuf,
    #[arg(long)]
    run_id: Option<String>,
    #[arg(long)]
    snakemake_log: Option<PathBuf>,
    /// Directory holding .snakemake/ (default: current directory)
    #[arg(long)]
    repo_root: Option<PathBuf>,
}

fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match std::env::var_os("GMV_TRACE_DIR").filter(|d| !d.is_empty()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "gmv-ops.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(file)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let guard = init_tracing();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            1
        }
    };

    // Flush the file appender before exiting.
    drop(guard);
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Command::Chat(args) => chat(args).await,
        Command::Agent(AgentCommand::Replay(args)) => replay(args),
        Command::Agent(AgentCommand::Evaluate(args)) => evaluate(args),
        Command::Agent(AgentCommand::Harvest(args)) => harvest(args).await,
    }
}

fn working_root() -> anyhow::Result<PathBuf> {
    std::env::current_dir().context("Cannot determine the current directory")
}

fn load_pipeline(path: &Path, root: &Path) -> anyhow::Result<PipelineContext> {
    PipelineContext::load(path, root)
        .with_context(|| format!("Failed to load pipeline config {}", path.display()))
}

async fn chat(args: ChatArgs) -> anyhow::Result<i32> {
    let root = working_root()?;
    let ctx = load_pipeline(&args.config, &root)?;

    let mock = env_flag("GMV_CHAT_MOCK");
    let dry_run_tools = mock || env_flag("GMV_CHAT_DRY_RUN_TOOLS");

    let llm: Arc<dyn LlmProvider> = if mock {
        tracing::info!("Using the offline mock model");
        Arc::new(MockProvider::new(args.config.display().to_string()))
    } else {
        let settings = LlmSettings::load(&LlmOverrides {
            base_url: args.base_url,
            model: args.model,
            api_key_env: args.api_key_env,
            settings_file: args.llm_config,
            allow_missing_key: false,
        })?;
        create_provider(&settings)?
    };

    let log_dir = args.log_dir.unwrap_or_else(|| ctx.chat_log_dir());
    let audit = AuditLog::create_in(&log_dir)
        .with_context(|| format!("Cannot create audit log in {}", log_dir.display()))?;
    eprintln!("audit log: {}", audit.path().display());

    let executor_config = ExecutorConfig::new(root, log_dir).with_env()?;
    let executor = ToolExecutor::new(executor_config);

    let interactive = args.message.is_none();
    let config = SessionConfig {
        auto_approve: args.auto_approve,
        interactive,
        dry_run_tools,
        echo: true,
        ..SessionConfig::default()
    }
    .with_max_steps(args.max_steps);

    let registry = Arc::new(ToolRegistry::new());
    let mut session = ChatSession::new(config, registry, llm, executor, audit)?;

    match args.message {
        Some(message) => {
            let outcome = session.run_turn(&message).await?;
            if !matches!(outcome, TurnOutcome::Answered { .. }) {
                eprintln!("[turn] {}", outcome.label());
            }
            Ok(outcome.exit_code())
        }
        None => {
            let console = Arc::new(Console::stdin());
            let mut session = session.with_confirmer(Arc::new(ConsoleConfirmer::new(console.clone())));
            session.repl(&console).await?;
            Ok(0)
        }
    }
}

fn engine_config(args: &EngineArgs) -> anyhow::Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => load_pipeline(path, &working_root()?)?.engine,
        None => EngineConfig::default(),
    };
    if let Some(levels) = &args.auto_apply_risk_levels {
        config.auto_apply_risk_levels = PolicyRisk::parse_list(levels)?;
    }
    if let Some(limit) = args.retry_limit {
        config.retry_limit = limit;
    }
    if let Some(threshold) = args.low_yield_threshold {
        config.low_yield_threshold = threshold;
    }
    Ok(config)
}

fn replay(args: ReplayArgs) -> anyhow::Result<i32> {
    let engine = PolicyEngine::new(engine_config(&args.engine)?);
    let decisions = replay_file(&args.file, &engine)?;
    for decision in &decisions {
        println!("{}", decision.to_json_line()?);
    }

    let Some(recorded_path) = args.compare else {
        return Ok(0);
    };
    let recorded = DecisionLog::new(recorded_path).read_all()?;
    let divergences = compare(&recorded, &decisions)?;
    if divergences.is_empty() {
        eprintln!("replay matches {} recorded decision(s)", recorded.len());
        return Ok(0);
    }
    for d in &divergences {
        eprintln!("divergence {d}");
    }
    eprintln!("{} divergence(s)", divergences.len());
    Ok(1)
}

fn evaluate(args: EvaluateArgs) -> anyhow::Result<i32> {
    let value: serde_json::Value =
        serde_json::from_str(&args.signal).context("--signal is not valid JSON")?;
    if !value.is_object() {
        return Err(PolicyError::InvalidSignal("expected a JSON object".to_string()).into());
    }
    let mut signal: Signal = serde_json::from_value(value)?;
    if signal.observed_at().is_none() {
        signal = signal.with("observed_at", chrono::Utc::now().to_rfc3339());
    }

    let log_path = match (&args.decision_log, &args.engine.config) {
        (Some(path), _) => Some(path.clone()),
        (None, Some(config)) => Some(load_pipeline(config, &working_root()?)?.decision_log_path()),
        (None, None) => None,
    };

    let engine = PolicyEngine::new(engine_config(&args.engine)?);
    let decision = engine.evaluate(&args.step, &signal);
    if let Some(path) = log_path {
        DecisionLog::new(&path).append(&decision)?;
        tracing::info!(path = %path.display(), action = decision.action.as_str(), "Recorded decision");
    }
    println!("{}", decision.to_json_line()?);
    Ok(0)
}

async fn harvest(args: HarvestArgs) -> anyhow::Result<i32> {
    let root = working_root()?;
    let ctx = load_pipeline(&args.config, &root)?;

    let mut request = HarvestRequest::new(
        args.run_id.unwrap_or_else(|| ctx.run_id.clone()),
        ctx.results_dir.clone(),
        ctx.fudge,
    );
    request.repo_root = args.repo_root.unwrap_or(root.clone());
    request.snakemake_log = args
        .snakemake_log
        .map(|p| if p.is_absolute() { p } else { root.join(p) });

    let outcome = harvest_resources(&request).await?;
    for note in &outcome.report.notes {
        eprintln!("note: {note}");
    }
    println!("{}", outcome.path.display());
    Ok(0)
}
