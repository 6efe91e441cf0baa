use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use orbitx_telemetry::{
    AlertFilter, EngineConfig, ExportFormat, ExportTable, ManeuverType, MissionControl,
    OpsTelemetry, RegistrySnapshot, Status, SubscriptionTarget,
};
use serde_json::json;
use shared_event_bus::FileEventPublisher;
use shared_logging::LogLevel;
use tokio::runtime::Runtime;

#[derive(Parser, Debug)]
#[command(name = "opsctl", version, about = "OrbitX mission-ops engine, headless")]
struct Cli {
    /// Engine configuration (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Overrides the configured random-walk seed.
    #[arg(long, global = true)]
    seed: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs the tick scheduler against the wall clock.
    Run {
        /// Seconds to run before printing the alert summary.
        #[arg(long, default_value_t = 30)]
        seconds: u64,
        /// Appends domain events to this JSON-lines file.
        #[arg(long)]
        event_log: Option<PathBuf>,
    },
    /// Simulates ticks without timers and lists alerts.
    Alerts {
        #[arg(long, default_value = "all")]
        filter: AlertFilter,
        /// Rounds of every enabled group to simulate first.
        #[arg(long, default_value_t = 0)]
        ticks: u32,
    },
    /// Evaluates a collision-avoidance maneuver.
    Maneuver {
        #[arg(long)]
        entity: String,
        #[arg(long = "type", default_value = "radial-boost")]
        kind: ManeuverType,
        #[arg(long)]
        delta_v: f64,
    },
    /// Exports current state as CSV or JSON.
    Export {
        #[arg(long, default_value = "csv")]
        format: ExportFormat,
        /// CSV table; overrides `--format`.
        #[arg(long)]
        table: Option<ExportTable>,
        /// Telemetry-analysis JSON for one spacecraft; overrides `--format`.
        #[arg(long)]
        spacecraft: Option<String>,
        /// Output file; stdout when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let runtime = Runtime::new().context("starting tokio runtime")?;
    match cli.command {
        Commands::Run { seconds, event_log } => runtime.block_on(handle_run(
            config,
            cli.seed,
            Duration::from_secs(seconds),
            event_log.as_deref(),
        )),
        Commands::Alerts { filter, ticks } => {
            let seed = cli.seed.or(config.seed).unwrap_or_default();
            let mission = build(config, Some(seed), None)?;
            for _ in 0..ticks {
                mission.tick_all()?;
            }
            for alert in mission.list_alerts(filter) {
                println!(
                    "{} | {} | {} | {} | {}",
                    alert.created_at.format("%H:%M:%S"),
                    alert.severity.label(),
                    alert.entity_id,
                    alert.title,
                    alert.message
                );
            }
            let summary = mission.alert_summary();
            println!(
                "all={} unacknowledged={} critical={}",
                summary.all, summary.unacknowledged, summary.critical
            );
            Ok(())
        }
        Commands::Maneuver {
            entity,
            kind,
            delta_v,
        } => runtime.block_on(async {
            let mission = build(config, cli.seed, None)?;
            let result = mission.request_maneuver(&entity, kind, delta_v).await?;
            let body = json!({
                "entity": entity,
                "maneuverType": kind,
                "deltaV": delta_v,
                "result": result,
                "display": result.display(),
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(())
        }),
        Commands::Export {
            format,
            table,
            spacecraft,
            out,
        } => {
            let mission = build(config, cli.seed, None)?;
            let contents = match (spacecraft, table) {
                (Some(id), _) => mission.export_telemetry(&id)?,
                (None, Some(table)) => mission.export_table(table),
                (None, None) => mission.export_snapshot(format)?,
            };
            match out {
                Some(path) => {
                    mission
                        .write_export(&path, &contents)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("wrote {} bytes to {}", contents.len(), path.display());
                }
                None => print!("{contents}"),
            }
            Ok(())
        }
    }
}

fn build(
    config: EngineConfig,
    seed: Option<u64>,
    telemetry: Option<OpsTelemetry>,
) -> Result<MissionControl> {
    let mut builder = MissionControl::builder().config(config);
    if let Some(seed) = seed {
        builder = builder.seed(seed);
    }
    if let Some(telemetry) = telemetry {
        builder = builder.telemetry(telemetry);
    }
    builder.build()
}

async fn handle_run(
    config: EngineConfig,
    seed: Option<u64>,
    duration: Duration,
    event_log: Option<&Path>,
) -> Result<()> {
    let telemetry = match event_log {
        Some(path) => {
            let publisher = FileEventPublisher::new(path)
                .with_context(|| format!("opening event log {}", path.display()))?;
            let mut builder = OpsTelemetry::builder("opsctl")
                .min_level(config.telemetry.min_level)
                .event_publisher(Arc::new(publisher));
            if let Some(log_path) = &config.telemetry.log_path {
                builder = builder.log_path(log_path.clone());
            }
            Some(builder.build()?)
        }
        None => None,
    };
    let mission = build(config, seed, telemetry)?;
    println!("seed {}", mission.seed());

    let mut snapshots = Box::pin(mission.subscribe(SubscriptionTarget::All));
    mission.start();
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            () = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            next = snapshots.next() => match next {
                Some(snapshot) => println!("{}", summarize(&snapshot)),
                None => break,
            },
        }
    }
    mission.shutdown().await;

    let summary = mission.alert_summary();
    println!(
        "alerts: all={} unacknowledged={} critical={}",
        summary.all, summary.unacknowledged, summary.critical
    );
    let events = mission.recorded_events();
    if !events.is_empty() {
        println!(
            "events: {} retained, {} alert events",
            events.len(),
            events.iter().filter(|event| event.is_under("alerts")).count()
        );
    }
    if let Some(telemetry) = mission.telemetry() {
        telemetry.record(LogLevel::Info, "opsctl.run.finished", json!(summary));
    }
    Ok(())
}

/// `tick | entity | status` for the worst entity of the group that ticked.
fn summarize(snapshot: &RegistrySnapshot) -> String {
    let group = snapshot.group.as_deref().unwrap_or("all");
    let worst = snapshot
        .entities
        .iter()
        .filter(|entity| entity.group == group)
        .max_by_key(|entity| entity.status);
    match worst {
        Some(entity) => format!(
            "{} | {} | {}",
            snapshot.tick,
            entity.id,
            entity.status.label()
        ),
        None => format!("{} | {group} | {}", snapshot.tick, Status::Nominal.label()),
    }
}
