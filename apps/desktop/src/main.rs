use std::{
    io::{self, Write},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use client_core::{ControllerState, HttpAnalysisService, JobController, View};
use futures::StreamExt;
use tokio_stream::wrappers::WatchStream;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod render;

use config::{load_settings, Settings};
use render::render_view;

/// Customer insight dashboard: sentiment analysis and churn risk for a product.
#[derive(Parser, Debug)]
#[command(name = "insight-dashboard", version)]
struct Args {
    /// Product or company to analyze (e.g. "iPhone 17", "Tesla", "Netflix").
    subject: String,
    /// Base URL of the analysis service (overrides API_URL / dashboard.toml).
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    poll_interval_ms: Option<u64>,
    #[arg(long)]
    max_attempts: Option<u32>,
    /// Override log level (trace/debug/info/warn/error); RUST_LOG is used otherwise.
    #[arg(long)]
    log_level: Option<String>,
    /// Print the final report as JSON on stdout; progress goes to stderr.
    #[arg(long)]
    json: bool,
}

impl Args {
    fn apply(&self, settings: &mut Settings) {
        if let Some(v) = &self.server_url {
            settings.server_url = v.trim().trim_end_matches('/').to_string();
        }
        if let Some(v) = self.poll_interval_ms {
            settings.poll_interval_ms = v.max(1);
        }
        if let Some(v) = self.max_attempts {
            settings.max_attempts = v.max(1);
        }
    }
}

fn init_logging(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).with_context(|| format!("invalid log level '{level}'"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))
}

enum Outcome {
    Finished(ControllerState),
    Interrupted,
}

async fn follow(controller: &JobController, json: bool) -> Result<Outcome> {
    let mut updates = WatchStream::new(controller.subscribe());
    let config = controller.config();
    let mut last_frame = Vec::new();

    loop {
        tokio::select! {
            next = updates.next() => {
                let Some(state) = next else {
                    bail!("controller stopped before the analysis finished");
                };

                let mut frame = Vec::new();
                render_view(&mut frame, &View::from_state(&state), &config)?;
                let show_text = !(json && state.report().is_some());
                if show_text && frame != last_frame {
                    if json {
                        io::stderr().write_all(&frame)?;
                    } else {
                        let mut stdout = io::stdout();
                        stdout.write_all(&frame)?;
                        stdout.flush()?;
                    }
                    last_frame = frame;
                }

                if state.is_terminal() {
                    return Ok(Outcome::Finished(state));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("dashboard: interrupted; cancelling analysis");
                controller.cancel();
                return Ok(Outcome::Interrupted);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.log_level.as_deref())?;

    let mut settings = load_settings()?;
    args.apply(&mut settings);

    let service = HttpAnalysisService::with_timeout(&settings.server_url, settings.request_timeout())
        .context("failed to build analysis service client")?;
    let controller = JobController::new(Arc::new(service), settings.controller_config());
    info!(
        server_url = %settings.server_url,
        poll_interval_ms = settings.poll_interval_ms,
        max_attempts = settings.max_attempts,
        "dashboard: starting analysis"
    );

    controller.submit(&args.subject);
    match follow(&controller, args.json).await? {
        Outcome::Finished(ControllerState::Succeeded(report)) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(report.as_ref())?);
            }
            Ok(ExitCode::SUCCESS)
        }
        Outcome::Finished(_) => Ok(ExitCode::FAILURE),
        Outcome::Interrupted => Ok(ExitCode::from(130)),
    }
}
