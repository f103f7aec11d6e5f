use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use tokio::io::AsyncReadExt;

use framefarm::cli::{Cli, Command, RenderArgs};
use framefarm::config::{JobConfig, JobSettings};
use framefarm::error::FarmError;
use framefarm::host::{self, JobHandle, WorkerCommand};
use framefarm::market::GatewayClient;
use framefarm::progress::{self, JobPhase};
use framefarm::supervisor::{self, JobReport};
use framefarm::ui::JobProgress;
use framefarm::logging;

/// Intervalo entre consultas ao canal de progresso.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Render(args) => {
            logging::init_host(cli.verbose);
            match render(args) {
                Ok(code) => code,
                Err(e) => {
                    eprintln!("Error: {e:#}");
                    ExitCode::FAILURE
                }
            }
        }
        Command::Worker => worker(),
    }
}

fn render(args: RenderArgs) -> Result<ExitCode> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    runtime.block_on(render_job(args))
}

async fn render_job(args: RenderArgs) -> Result<ExitCode> {
    let (scene, project_dir) = args.scene()?;
    let mut settings = JobSettings::load(args.config.as_deref())?;
    args.apply(&mut settings);

    let stamp = Local::now().format("%d-%m-%Y_%H-%M-%S").to_string();
    let output_dir = args.output.join(stamp);
    let config = JobConfig::new(scene, project_dir, output_dir, args.frames.0.clone(), settings);
    config.validate()?;
    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("failed to create {}", config.output_dir.display()))?;

    let worker = WorkerCommand::current_exe()?;
    let mut handle = JobHandle::start(&worker, &config).await?;
    let ui = JobProgress::start(&config.scene, handle.status().total);

    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let phase = loop {
        tokio::select! {
            _ = ticker.tick() => {
                handle.poll();
                ui.update(handle.status());
                if let Some(phase) = handle.try_exit()? {
                    break phase;
                }
            }
            _ = &mut ctrl_c => {
                handle.cancel().await?;
                break JobPhase::Cancelled;
            }
        }
    };

    ui.complete(handle.status());
    println!("  Output: {}", config.output_dir.display());

    Ok(match phase {
        JobPhase::Completed => ExitCode::SUCCESS,
        JobPhase::Failed(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        _ => ExitCode::FAILURE,
    })
}

fn worker() -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("framefarm worker: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run_worker()) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, code = e.exit_code(), "Worker failed");
            eprintln!("framefarm worker: {e}");
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}

async fn run_worker() -> Result<JobReport, FarmError> {
    let mut input = String::new();
    tokio::io::stdin().read_to_string(&mut input).await?;
    let config: JobConfig = serde_json::from_str(&input)
        .map_err(|e| FarmError::Configuration(format!("invalid job config: {e}")))?;
    config.validate()?;
    logging::init_worker(&config.log_path())?;

    let market = GatewayClient::new(&config.settings.market)?;
    let (tx, rx) = progress::channel();
    let (report, forwarded) = tokio::join!(
        supervisor::run(&config, &market, tx),
        host::write_progress(rx, tokio::io::stdout()),
    );
    let report = report?;
    if let Err(e) = forwarded {
        // Host went away; the job itself still ran.
        tracing::warn!(error = %e, "Progress not delivered");
    }

    std::fs::write(config.report_path(), serde_json::to_vec_pretty(&report)?)?;
    Ok(report)
}
