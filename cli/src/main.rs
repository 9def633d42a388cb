//! Konveyor CLI - drives the analyzer RPC server from a terminal.
//!
//! ```text
//! main() -> load config -> AnalyzerClient::start() -> wait for running
//!                               |
//!                               v
//!                      run_analysis() -> summary -> stop()
//! ```

mod terminal;

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use konveyor_analyzer::{
    AnalyzerClient, AnalyzerSettings, Collaborators, ExtensionState, ExtensionStore, Platform,
    RetryPolicy, bundle_jars, resolve_analyzer_binary,
};
use konveyor_config::KonveyorConfig;
use konveyor_types::{AnalysisOutcome, ServerState, check_analyzable};

use crate::terminal::{ConfiguredProviders, TerminalNotifier};

#[derive(Parser, Debug)]
#[command(name = "konveyor")]
#[command(version, about = "Run Konveyor migration analysis from the terminal", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.konveyor/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the analyzer, analyze the workspace (or only FILES), then stop it
    Analyze {
        /// Limit the analysis to these files
        files: Vec<PathBuf>,
    },
    /// Report whether the active profile can be analyzed
    Check,
    /// Show the resolved analyzer binary and provider bundles
    Assets,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // stdout is for results; prefer no logs over mixing them in.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.konveyor/logs/konveyor.log
    if let Some(home) = konveyor_config::konveyor_home() {
        candidates.push(home.join("logs").join("konveyor.log"));
    }

    // Fallback: ./.konveyor/logs/konveyor.log
    candidates.push(PathBuf::from(".konveyor").join("logs").join("konveyor.log"));

    candidates
}

fn load_config(explicit: Option<&Path>) -> Result<(KonveyorConfig, Option<PathBuf>)> {
    if let Some(path) = explicit {
        let config = KonveyorConfig::load_from(path)?;
        return Ok((config, Some(path.to_path_buf())));
    }
    let config = KonveyorConfig::load()?.unwrap_or_default();
    Ok((config, KonveyorConfig::path()))
}

fn analyzer_settings(config: &KonveyorConfig) -> Result<AnalyzerSettings> {
    let analyzer = &config.analyzer;
    let binary_path = resolve_analyzer_binary(
        analyzer.binary_path().as_deref(),
        &analyzer.asset_dir(),
        Platform::current(),
    )
    .context("resolving the analyzer binary")?;

    Ok(AnalyzerSettings {
        binary_path,
        default_rulesets: analyzer.rulesets_dir(),
        data_dir: analyzer.data_dir(),
        excluded_paths: analyzer.excluded_paths.clone(),
        trace_rpc: analyzer.trace_rpc,
        retry: RetryPolicy {
            interval: analyzer.connect_interval(),
            max_attempts: analyzer.connect_attempts,
        },
    })
}

async fn analyze(
    config: &KonveyorConfig,
    config_path: Option<&Path>,
    files: Vec<PathBuf>,
) -> Result<ExitCode> {
    let settings = analyzer_settings(config)?;
    let store = Arc::new(ExtensionStore::new(ExtensionState::with_profiles(
        config.profiles.clone(),
        config.active_profile().map(|p| p.id.clone()),
    )));
    let notifier = Arc::new(TerminalNotifier::new(
        config_path.map(|p| p.display().to_string()),
    ));
    let client = AnalyzerClient::new(
        settings,
        store,
        Collaborators {
            notifier: Arc::clone(&notifier) as Arc<dyn konveyor_analyzer::Notifier>,
            providers: Arc::new(ConfiguredProviders::new(config.providers.clone())),
            task_manager: None,
        },
    );

    if !client.can_analyze_interactive().await {
        return Ok(ExitCode::FAILURE);
    }

    client.start().await.context("starting the analyzer")?;
    let state = client.wait_for_server_state(ServerState::Running).await;
    if state != ServerState::Running {
        client.stop().await;
        bail!("analyzer did not become ready (state: {state})");
    }

    let ctrl_c = tokio::spawn({
        let notifier = Arc::clone(&notifier);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                notifier.cancel_progress();
            }
        }
    });

    let included = (!files.is_empty()).then(|| {
        files
            .iter()
            .map(|file| {
                std::path::absolute(file)
                    .unwrap_or_else(|_| file.clone())
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    });
    let outcome = client.run_analysis(included).await;
    ctrl_c.abort();

    print_summary(&client.store().snapshot());
    client.stop().await;

    Ok(match outcome {
        Some(AnalysisOutcome::Succeeded { .. } | AnalysisOutcome::Cancelled) => ExitCode::SUCCESS,
        Some(AnalysisOutcome::Failed { .. }) | None => ExitCode::FAILURE,
    })
}

fn print_summary(state: &ExtensionState) {
    for rule_set in &state.rule_sets {
        let count = rule_set.incident_count();
        if count == 0 {
            continue;
        }
        println!("{} ({count})", rule_set.name.as_deref().unwrap_or("<unnamed>"));
        for (id, violation) in &rule_set.violations {
            if violation.incidents.is_empty() {
                continue;
            }
            println!("  {id}: {} ({})", violation.description, violation.incidents.len());
        }
    }
    println!(
        "{} incidents in {} rulesets",
        state.enhanced_incidents.len(),
        state.rule_sets.len()
    );
}

fn check(config: &KonveyorConfig, config_path: Option<&Path>) -> ExitCode {
    match config_path {
        Some(path) => println!("config:        {}", path.display()),
        None => println!("config:        <none>"),
    }
    match config.active_profile() {
        Some(profile) => println!("profile:       {} ({})", profile.name, profile.id),
        None => println!("profile:       <none>"),
    }
    println!("rulesets:      {}", config.analyzer.rulesets_dir().display());
    println!("data dir:      {}", config.analyzer.data_dir().display());
    println!("providers:     {}", config.providers.len());

    let binary = resolve_analyzer_binary(
        config.analyzer.binary_path().as_deref(),
        &config.analyzer.asset_dir(),
        Platform::current(),
    );
    match &binary {
        Ok(path) => println!("analyzer:      {}", path.display()),
        Err(err) => println!("analyzer:      {err}"),
    }

    match check_analyzable(config.active_profile()) {
        Ok(()) if binary.is_ok() => {
            println!("ready:         yes");
            ExitCode::SUCCESS
        }
        Ok(()) => {
            println!("ready:         no");
            ExitCode::FAILURE
        }
        Err(issue) => {
            println!("ready:         no ({issue})");
            ExitCode::FAILURE
        }
    }
}

fn assets(config: &KonveyorConfig) -> Result<ExitCode> {
    let platform = Platform::current();
    let asset_dir = config.analyzer.asset_dir();
    println!("platform:  {}", platform.dir_name());
    println!("assets:    {}", asset_dir.display());

    let found = match resolve_analyzer_binary(
        config.analyzer.binary_path().as_deref(),
        &asset_dir,
        platform,
    ) {
        Ok(path) => {
            println!("analyzer:  {}", path.display());
            true
        }
        Err(err) => {
            println!("analyzer:  {err}");
            false
        }
    };

    let bundle_dir = config.analyzer.bundle_dir();
    let jars = bundle_jars(&bundle_dir)
        .with_context(|| format!("listing bundles in {}", bundle_dir.display()))?;
    println!("bundles:   {} ({} jars)", bundle_dir.display(), jars.len());
    for jar in jars {
        println!("  {}", jar.display());
    }

    Ok(if found {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let (config, config_path) = load_config(cli.config.as_deref())?;
    tracing::debug!(
        profiles = config.profiles.len(),
        providers = config.providers.len(),
        "Configuration loaded"
    );

    match cli.command {
        Command::Analyze { files } => analyze(&config, config_path.as_deref(), files).await,
        Command::Check => Ok(check(&config, config_path.as_deref())),
        Command::Assets => assets(&config),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{err:#}");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
