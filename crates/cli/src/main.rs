mod cli;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use prometheus::{Encoder, Registry, TextEncoder};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use teamprov_core::{
    driver::CommandDriver,
    email::{EmailProvider, HttpEmailProvider},
    invite::HttpTeamInviter,
    load_config, metrics,
    orchestrator::Pacer,
    registrar::HttpRegistrar,
    report::{self, StatusReport},
    tracker::ErrorKind,
    validate_config, CancellationToken, Collaborators, Config, RetryPolicy, RunContext,
    RunController, SanitizedConfig, SqliteAccountTracker, StageOrchestrator, TeamRegistry,
};

use cli::{Cli, Commands, ExportFormat};

/// Exit status when a run was interrupted.
const EXIT_CANCELLED: u8 = 130;

/// Exit status of `code` when no verification code arrived.
const EXIT_CODE_TIMEOUT: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("Fatal error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(io::stderr)))
        .with((!json).then(|| fmt::layer().with_writer(io::stderr)))
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_and_check(&cli.config)?;

    match cli.command {
        Commands::Run {
            team,
            accounts,
            metrics_out,
            owners,
        } => cmd_run(config, team, accounts, owners, metrics_out.as_deref()).await,
        Commands::Status { team, json } => cmd_status(&config, team.as_deref(), json),
        Commands::Export { format, out, team } => {
            cmd_export(&config, format, out.as_deref(), team.as_deref())
        }
        Commands::Code { email, timeout } => cmd_code(&config, &email, timeout).await,
    }
}

fn load_and_check(path: &Path) -> Result<Config> {
    info!("Loading configuration from {:?}", path);
    let config =
        load_config(path).with_context(|| format!("Failed to load config from {:?}", path))?;
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!("Configuration loaded (hash {})", &config_hash[..16]);
    info!("Tracker path: {:?}", config.tracker.path);

    Ok(config)
}

fn open_tracker(config: &Config) -> Result<Arc<SqliteAccountTracker>> {
    let tracker = SqliteAccountTracker::new(&config.tracker.path)
        .with_context(|| format!("Failed to open tracker at {:?}", config.tracker.path))?;
    Ok(Arc::new(tracker))
}

async fn cmd_run(
    config: Config,
    team: Option<String>,
    accounts: Option<usize>,
    owners: bool,
    metrics_out: Option<&Path>,
) -> Result<ExitCode> {
    let mut run_config = config.run.clone();
    if let Some(team) = team {
        run_config.team = Some(team);
    }
    if let Some(accounts) = accounts {
        ensure!(accounts > 0, "--accounts must be at least 1");
        run_config.accounts_per_team = accounts;
    }
    let owner_password = config.email.as_ref().and_then(|e| e.default_password.clone());
    if owners {
        ensure!(
            owner_password.is_some(),
            "--owners requires email.default_password"
        );
        run_config.owners = true;
    }

    let sanitized = SanitizedConfig::from(&config);
    info!(
        "Effective configuration: {}",
        serde_json::to_string(&sanitized).unwrap_or_default()
    );

    let tracker = open_tracker(&config)?;
    info!("Tracker initialized");

    let registry = TeamRegistry::load(&config.teams.path)
        .with_context(|| format!("Failed to load teams from {:?}", config.teams.path))?;
    ensure!(!registry.is_empty(), "No teams found in {:?}", config.teams.path);
    info!("Loaded {} team(s)", registry.len());

    let collaborators = build_collaborators(&config).await?;

    let pacer = Pacer::new(config.pacing.clone());
    let retry = RetryPolicy::new(config.retry.clone()).with_failure_policy(config.policy.clone());
    let orchestrator = Arc::new(
        StageOrchestrator::new(tracker, collaborators)
            .with_retry_policy(retry)
            .with_pacer(pacer.clone())
            .with_stale_after(config.tracker.stale_after()),
    );
    let mut controller = RunController::new(orchestrator, registry, run_config).with_pacer(pacer);
    if let Some(password) = owner_password {
        controller = controller.with_owner_password(password);
    }

    let cancellation = CancellationToken::new();
    tokio::spawn(watch_interrupts(cancellation.clone()));

    let ctx = RunContext::with_cancellation(cancellation);
    let summary = controller.run(&ctx).await.context("Run failed")?;
    summary.log();

    if let Some(path) = metrics_out {
        write_metrics(path)?;
        info!("Metrics written to {:?}", path);
    }

    if summary.cancelled {
        warn!("Run {} was cancelled; rerun to resume", summary.run_id);
        return Ok(ExitCode::from(EXIT_CANCELLED));
    }
    if summary.failed_teams() > 0 {
        error!("{} team(s) failed", summary.failed_teams());
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// Build the concrete collaborators and check the registrar credentials.
async fn build_collaborators(config: &Config) -> Result<Collaborators> {
    let email_config = config
        .email
        .clone()
        .context("[email] section is required to run")?;
    let invite_config = config
        .invite
        .clone()
        .context("[invite] section is required to run")?;
    let registrar_config = config
        .registrar
        .clone()
        .context("[registrar] section is required to run")?;
    let driver_config = config
        .driver
        .clone()
        .context("[driver] section is required to run")?;

    let email = HttpEmailProvider::new(email_config).context("Failed to create email provider")?;
    let inviter = HttpTeamInviter::new(invite_config).context("Failed to create team inviter")?;
    let registrar = HttpRegistrar::new(registrar_config).context("Failed to create registrar")?;

    let stored = registrar
        .verify()
        .await
        .context("Registrar rejected the admin token")?;
    info!("Registrar reachable ({} account(s) stored)", stored);

    info!("Using driver program {:?}", driver_config.program);
    let driver = CommandDriver::new(driver_config);

    Ok(Collaborators {
        email: Arc::new(email),
        inviter: Arc::new(inviter),
        driver: Arc::new(driver),
        registrar: Arc::new(registrar),
    })
}

/// First Ctrl-C cancels the run after the current identity; a second one exits.
async fn watch_interrupts(cancellation: CancellationToken) {
    if signal::ctrl_c().await.is_err() {
        warn!("Failed to install Ctrl-C handler");
        return;
    }
    warn!("Interrupt received, stopping after the current identity (Ctrl-C again to exit now)");
    cancellation.cancel();

    if signal::ctrl_c().await.is_ok() {
        error!("Second interrupt, exiting");
        std::process::exit(EXIT_CANCELLED as i32);
    }
}

fn write_metrics(path: &Path) -> Result<()> {
    let registry = Registry::new();
    for collector in metrics::all_metrics() {
        registry
            .register(collector)
            .context("Failed to register metric")?;
    }

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    std::fs::write(path, buffer).with_context(|| format!("Failed to write {:?}", path))
}

fn cmd_status(config: &Config, team: Option<&str>, json: bool) -> Result<ExitCode> {
    let tracker = open_tracker(config)?;
    let status = StatusReport::build(tracker.as_ref(), team).context("Failed to read tracker")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", status.render());
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_export(
    config: &Config,
    format: ExportFormat,
    out: Option<&Path>,
    team: Option<&str>,
) -> Result<ExitCode> {
    let tracker = open_tracker(config)?;
    let rows = report::export_rows(tracker.as_ref(), team).context("Failed to read tracker")?;

    let writer: Box<dyn Write> = match out {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {:?}", path))?,
        )),
        None => Box::new(io::stdout().lock()),
    };

    match format {
        ExportFormat::Json => report::write_json(&rows, writer),
        ExportFormat::Csv => report::write_csv(&rows, writer),
    }
    .context("Failed to write export")?;

    info!("Exported {} record(s)", rows.len());
    Ok(ExitCode::SUCCESS)
}

async fn cmd_code(config: &Config, email: &str, timeout: u64) -> Result<ExitCode> {
    let email_config = config
        .email
        .clone()
        .context("[email] section is required to poll codes")?;
    let provider = HttpEmailProvider::new(email_config).context("Failed to create email provider")?;

    match provider
        .poll_verification_code(email, Duration::from_secs(timeout))
        .await
    {
        Ok(code) => {
            println!("{}", code);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.kind() == ErrorKind::VerificationTimeout => {
            warn!("{}", e);
            Ok(ExitCode::from(EXIT_CODE_TIMEOUT))
        }
        Err(e) => Err(e).context("Failed to poll for the verification code"),
    }
}
