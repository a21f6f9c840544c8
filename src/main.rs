//! `streamprobe` command line.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use streamprobe::core::{JsonlEventSink, RunStatus, Scenario};
use streamprobe::load::endpoints;
use streamprobe::{Harness, RunOutput};

#[derive(Parser)]
#[command(
    name = "streamprobe",
    about = "Traffic generation and anomaly detection for streaming endpoints"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a scenario file (TOML, or JSON by extension)
    Run {
        /// Scenario file
        scenario: PathBuf,
        #[arg(long, default_value_t = false)]
        /// Print the full run output as JSON
        json: bool,
        #[arg(long = "events")]
        /// Append events to a JSON-lines file instead of memory
        events: Option<PathBuf>,
    },
    /// Serve a line-echo endpoint until interrupted
    ServeEcho {
        /// Listen address
        addr: String,
    },
    /// Serve an in-memory pub/sub broker until interrupted
    ServeBroker {
        /// Listen address
        addr: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Run {
            scenario,
            json,
            events,
        } => run(scenario, json, events).await,
        Command::ServeEcho { addr } => {
            let endpoint = endpoints::echo(&addr)
                .await
                .with_context(|| format!("cannot bind {addr}"))?;
            println!("echo endpoint listening on {}", endpoint.addr());
            tokio::signal::ctrl_c().await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::ServeBroker { addr } => {
            let endpoint = endpoints::broker(&addr)
                .await
                .with_context(|| format!("cannot bind {addr}"))?;
            println!("pub/sub broker listening on {}", endpoint.addr());
            tokio::signal::ctrl_c().await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(
    path: PathBuf,
    json: bool,
    events: Option<PathBuf>,
) -> anyhow::Result<ExitCode> {
    let scenario = Scenario::load(&path)
        .with_context(|| format!("cannot load scenario {}", path.display()))?;

    let mut builder = Harness::builder();
    if let Some(events) = events {
        builder = builder.with_sink(Arc::new(JsonlEventSink::new(events)));
    }
    let harness = builder.build();

    let handle = harness.start(scenario).await?;
    let stop = handle.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping run");
            stop.stop();
        }
    });
    let output = handle.wait().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_summary(&output);
    }
    Ok(if output.status == RunStatus::Failed || !output.slo.passed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn print_summary(output: &RunOutput) {
    let m = &output.metrics;
    println!("run {} ({}): {}", output.run_id, output.scenario, output.status);
    if let Some(reason) = &output.failure_reason {
        println!("  reason: {reason}");
    }
    println!(
        "  events={} ok={} errors={} timeouts={} error_rate={:.3}",
        m.total_events, m.successful_events, m.error_events, m.timeout_events, m.error_rate
    );
    println!(
        "  latency p50={:.1}ms p95={:.1}ms p99={:.1}ms throughput={:.1}/s",
        m.latency_p50_ms, m.latency_p95_ms, m.latency_p99_ms, m.throughput
    );
    for check in output.slo.failures() {
        println!("  SLO violated: {check:?}");
    }
    for signature in &output.signatures {
        println!(
            "  signature {} {} {} severity={} occurrences={}",
            signature.fingerprint.short(),
            signature.anomaly_type,
            signature.endpoint,
            signature.severity,
            signature.occurrence_count
        );
    }
    for suggestion in &output.suggestions {
        println!(
            "  suggest [{}] {} (confidence {:.2}, priority {:.2})",
            suggestion.fix_type, suggestion.title, suggestion.confidence, suggestion.priority_score
        );
    }
}
