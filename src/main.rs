//! heartmula-daemon: lyrics-to-song generation around a cached pipeline.
//!
//! This binary can run in two modes:
//! - CLI mode: generate one song and print its path
//! - Daemon mode: JSON-RPC server over stdio for a front-end

use anyhow::{bail, Context};

use heartmula_daemon::cli::Cli;
use heartmula_daemon::config::DaemonConfig;
use heartmula_daemon::generation::RequestHandler;
use heartmula_daemon::models::{SystemGpuProbe, WorkerBackend};
use heartmula_daemon::rpc::{run_server, ServerState};

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    // stdout belongs to JSON-RPC responses and the CLI's output path
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse_args();

    let mut config = DaemonConfig::from_env();
    cli.apply_to(&mut config);
    if let Some(problem) = config.validate() {
        bail!("invalid configuration: {}", problem);
    }

    if cli.is_daemon_mode() {
        run_daemon_mode(config)
    } else if cli.is_cli_mode() {
        run_cli_mode(&cli, &config)
    } else {
        print_usage();
        Ok(())
    }
}

fn build_handler(config: &DaemonConfig) -> RequestHandler<WorkerBackend> {
    let output_dir = config.effective_output_path();
    let backend = WorkerBackend::new(config.worker_command.clone());
    tracing::info!(
        worker = %backend.command().join(" "),
        output_dir = %output_dir.display(),
        "request handler ready"
    );
    RequestHandler::new(backend, SystemGpuProbe, output_dir)
}

/// Generates one song; the log goes to stderr, the output path to stdout.
fn run_cli_mode(cli: &Cli, config: &DaemonConfig) -> anyhow::Result<()> {
    let request = cli.to_request(config).context("cannot build request")?;
    let mut handler = build_handler(config);

    let outcome = handler.handle(&request);
    eprintln!("{}", outcome.log());

    match outcome.path() {
        Some(path) => {
            println!("{}", path.display());
            Ok(())
        }
        None => bail!("generation failed"),
    }
}

/// Runs the daemon mode (JSON-RPC server).
fn run_daemon_mode(config: DaemonConfig) -> anyhow::Result<()> {
    tracing::info!(
        model_path = %config.model_path.display(),
        version = %config.version,
        mula_device = %config.mula_device,
        codec_device = %config.codec_device,
        "starting JSON-RPC server on stdio"
    );

    let handler = build_handler(&config);
    let state = ServerState::new(handler, config);
    run_server(state).context("JSON-RPC server failed")
}

/// Prints usage information.
fn print_usage() {
    eprintln!("heartmula-daemon: lyrics-to-song generation");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  One song:");
    eprintln!("    heartmula-daemon --lyrics-file song.txt --tags \"piano,happy\" --output wedding");
    eprintln!();
    eprintln!("  CPU only:");
    eprintln!("    heartmula-daemon --lyrics \"[Verse] ...\" --mula-device cpu --codec-device cpu");
    eprintln!();
    eprintln!("  Daemon mode (JSON-RPC server):");
    eprintln!("    heartmula-daemon --daemon");
    eprintln!();
    eprintln!("Run 'heartmula-daemon --help' for full options.");
}
