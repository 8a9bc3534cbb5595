mod bootstrap;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use telemetry_core::formatting::format_duration;
use telemetry_core::settings::Settings;
use telemetry_core::time_utils::parse_compact_date;
use telemetry_data::analysis::AnalysisConfig;
use telemetry_runtime::orchestrator::{GroupFilter, GroupOrchestrator, GroupStatus};
use telemetry_runtime::store::JsonFileStore;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load_with_saved();
    settings.validate()?;

    bootstrap::ensure_directories()?;
    bootstrap::setup_logging(&settings.log_level, settings.log_file.as_ref())?;

    tracing::info!("Fleet Telemetry v{} starting", env!("CARGO_PKG_VERSION"));
    if settings.clear {
        tracing::info!("Saved configuration cleared");
    }

    let data_dir = bootstrap::resolve_data_dir(settings.data_dir.as_deref())
        .ok_or_else(|| anyhow!("no data directory: pass --data-dir or set FLEET_TELEMETRY_DATA"))?;
    let output_dir = bootstrap::resolve_output_dir(settings.output_dir.as_deref());
    tracing::info!(
        "Data: {}, output: {}, concurrency: {}",
        data_dir.display(),
        output_dir.display(),
        settings.concurrency
    );

    let filter = GroupFilter {
        vehicle: settings.vehicle.clone(),
        date: settings.date.as_deref().and_then(parse_compact_date),
    };
    let pipeline = settings.pipeline_config();
    let orchestrator = GroupOrchestrator::new(
        AnalysisConfig::from(&pipeline),
        Arc::new(JsonFileStore::new(&output_dir)),
        usize::from(settings.concurrency),
    )
    .with_group_timeout(settings.group_timeout_secs.map(Duration::from_secs));

    let summary = tokio::select! {
        summary = orchestrator.run_dir(&data_dir, &filter) => summary?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Ctrl+C received; abandoning run");
            return Ok(());
        }
    };

    for group in &summary.groups {
        match &group.status {
            GroupStatus::Completed {
                sessions,
                valid_sessions,
                events,
            } => println!(
                "{}: {} sessions ({} valid), {} events",
                group.key, sessions, valid_sessions, events
            ),
            GroupStatus::Failed { error } => println!("{}: FAILED ({})", group.key, error),
            GroupStatus::TimedOut => println!("{}: TIMED OUT", group.key),
        }
    }
    println!(
        "{} files, {} groups ({} ok, {} failed), {} events in {}",
        summary.files_found,
        summary.groups.len(),
        summary.succeeded(),
        summary.failed(),
        summary.total_events(),
        format_duration(summary.elapsed.as_secs() as i64)
    );

    if summary.failed() > 0 {
        bail!("{} group(s) failed", summary.failed());
    }
    Ok(())
}
