//! proclaunch CLI entry point
//!
//! Usage:
//!   proclaunch run -- <program> [args...]     Run a program, blocking
//!   proclaunch spawn -- <program> [args...]   Run a program under supervision
//!   proclaunch profile <name>                 Run a configured profile
//!   proclaunch config                         Show configuration

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use proclaunch::cli::{
    commands::{ConfigArgs, LaunchTarget, ProfileArgs, RunArgs, SpawnArgs},
    render::{error_info, exit_status, print_outcome, RunReport},
    Cli, Commands, OutputFormat,
};
use proclaunch::config::{find_config_files, load_config, Config, ResolvedLaunch};
use proclaunch::error::ProcessError;
use proclaunch::executor::{AsyncProcessRunner, ExecutionResult, StreamKind};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose, cli.format) {
        eprintln!("{}: failed to initialise logging: {}", "warning".yellow(), e);
    }

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}: {:#}", "error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

/// Structured logs on stderr; JSON lines when the output format is JSON
fn init_tracing(verbose: bool, format: OutputFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("proclaunch=debug,warn")
            } else {
                EnvFilter::try_new("proclaunch=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == OutputFormat::Json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init()?;
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<u8> {
    // Config interpolation may run `$(command)` through the blocking runner
    let config_path = cli.config.clone();
    let config = tokio::task::spawn_blocking(move || load_config(config_path.as_deref()))
        .await
        .context("Config loader panicked")??;

    match cli.command {
        Commands::Run(args) => run_blocking(resolve_run(&config, args), cli.format, cli.verbose).await,
        Commands::Spawn(args) => {
            let poll_ms = args.poll_ms;
            run_supervised(resolve_spawn(&config, args), cli.format, cli.verbose, poll_ms).await
        }
        Commands::Profile(args) => run_profile(&config, args, cli.format, cli.verbose).await,
        Commands::Config(args) => {
            show_config(&config, args, cli.format)?;
            Ok(0)
        }
    }
}

/// Resolve an ad-hoc launch from CLI flags
fn resolve_target(config: &Config, target: LaunchTarget) -> ResolvedLaunch {
    let mut launch = config.resolve_command(&target.program, &target.argument_string());
    launch.env.extend(target.env_as_map());
    launch.working_dir = target.cwd;
    launch
}

fn resolve_run(config: &Config, args: RunArgs) -> ResolvedLaunch {
    let mut launch = resolve_target(config, args.target);
    if let Some(timeout_ms) = args.timeout_ms {
        launch.timeout_ms = timeout_ms;
    }
    launch
}

fn resolve_spawn(config: &Config, args: SpawnArgs) -> ResolvedLaunch {
    let mut launch = resolve_target(config, args.target);
    if let Some(ms) = args.startup_timeout_ms {
        launch.startup_timeout_ms = ms;
    }
    if let Some(ms) = args.run_timeout_ms {
        launch.run_timeout_ms = ms;
    }
    launch
}

/// Run through `SynchronousProcessRunner` on a blocking thread
async fn run_blocking(launch: ResolvedLaunch, format: OutputFormat, verbose: bool) -> Result<u8> {
    let program = launch.executable.clone();
    let (command, result, error) = tokio::task::spawn_blocking(move || {
        let mut runner = launch.sync_runner();
        let command = runner.config().display_command();
        tracing::debug!(command = %command, timeout_ms = launch.timeout_ms, "Running");
        let error = runner.run().err();
        (command, runner.result().clone(), error)
    })
    .await
    .context("Runner thread panicked")?;

    report(&program, &command, &result, error.as_ref(), None, format, verbose)
}

/// Run through `AsyncProcessRunner`; Ctrl-C kills the process tree
async fn run_supervised(
    launch: ResolvedLaunch,
    format: OutputFormat,
    verbose: bool,
    poll_ms: u64,
) -> Result<u8> {
    let runner = launch.async_runner();
    let command = runner.config().display_command();

    if let Err(e) = runner.start(&CancellationToken::new()).await {
        let result = runner.result();
        return report(&launch.executable, &command, &result, Some(&e), Some(&runner), format, verbose);
    }
    tracing::info!(pid = ?runner.process_id(), command = %command, "Process started");

    let never = CancellationToken::new();
    let wait = runner.wait_for_exit(&never);
    tokio::pin!(wait);

    let mut ticker = tokio::time::interval(Duration::from_millis(poll_ms.max(1)));
    let mut interrupted = false;

    let result = loop {
        tokio::select! {
            outcome = &mut wait => break outcome?,
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                if let Err(e) = signal {
                    tracing::warn!("Failed to listen for Ctrl-C: {}", e);
                } else {
                    tracing::warn!(pid = ?runner.process_id(), "Interrupted; killing process tree");
                    runner.kill(true);
                }
                interrupted = true;
            }
            _ = ticker.tick(), if poll_ms > 0 => {
                eprintln!(
                    "{}: pid={} state={} stdout_lines={} stderr_lines={}",
                    "progress".cyan(),
                    runner.process_id().map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
                    runner.state(),
                    runner.output().line_count(StreamKind::Stdout),
                    runner.output().line_count(StreamKind::Stderr),
                );
            }
        }
    };

    let error = result.is_timeout.then(|| ProcessError::Timeout {
        command: command.clone(),
        timeout_ms: launch.run_timeout_ms,
    });
    report(&launch.executable, &command, &result, error.as_ref(), Some(&runner), format, verbose)
}

async fn run_profile(
    config: &Config,
    args: ProfileArgs,
    format: OutputFormat,
    verbose: bool,
) -> Result<u8> {
    let launch = config.get_profile(&args.name).with_context(|| {
        format!(
            "Profile '{}' not found. Configured profiles: {}",
            args.name,
            config.list_profiles().join(", ")
        )
    })?;

    if verbose {
        eprintln!("{}: {}", "profile".cyan(), args.name);
    }

    if args.run_async {
        run_supervised(launch, format, verbose, args.poll_ms).await
    } else {
        run_blocking(launch, format, verbose).await
    }
}

fn report(
    program: &str,
    command: &str,
    result: &ExecutionResult,
    error: Option<&ProcessError>,
    runner: Option<&AsyncProcessRunner>,
    format: OutputFormat,
    verbose: bool,
) -> Result<u8> {
    let report = RunReport {
        command,
        state: runner.map(|r| r.state()),
        pid: runner.and_then(|r| r.process_id()),
        result,
        error: error_info(program, error, &result.error_text),
    };
    print_outcome(format, &report, verbose)?;

    match error {
        // Launch failures have no exit code of their own
        Some(e) if !e.is_timeout() => Ok(exit_status(result).max(1)),
        _ => Ok(exit_status(result)),
    }
}

/// Show resolved configuration
fn show_config(config: &Config, args: ConfigArgs, format: OutputFormat) -> Result<()> {
    match args.profile {
        Some(name) => {
            let launch = config
                .get_profile(&name)
                .with_context(|| format!("Profile '{}' not found", name))?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&launch)?),
                OutputFormat::Plain => println!(
                    "{}",
                    launch.start_configuration().display_command()
                ),
                OutputFormat::Table => {
                    println!("{}: {}", "Profile".cyan(), launch.name);
                    println!("{}: {}", "Command".cyan(), launch.start_configuration().display_command());
                    if let Some(ref dir) = launch.working_dir {
                        println!("{}: {}", "Directory".cyan(), dir);
                    }
                    println!("{}: {}ms", "Timeout".cyan(), launch.timeout_ms);
                    println!("{}: {}ms", "Startup Timeout".cyan(), launch.startup_timeout_ms);
                    println!("{}: {}ms", "Run Timeout".cyan(), launch.run_timeout_ms);
                    if !launch.env.is_empty() {
                        println!("{}:", "Environment".cyan());
                        let mut keys: Vec<_> = launch.env.keys().collect();
                        keys.sort();
                        for key in keys {
                            println!("  {}={}", key, launch.env[key]);
                        }
                    }
                }
            }
        }
        None => match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
            OutputFormat::Plain => {
                for name in config.list_profiles() {
                    println!("{}", name);
                }
            }
            OutputFormat::Table => {
                let files = find_config_files();
                println!("{}:", "Config Files".cyan());
                if files.is_empty() {
                    println!("  None (using defaults)");
                }
                for file in &files {
                    println!("  - {}", file.display());
                }
                println!();
                print!(
                    "{}",
                    toml::to_string_pretty(config).context("Failed to render configuration")?
                );
            }
        },
    }

    Ok(())
}
