//! One-off ingestion cycles.
//!
//! Uses the same slot-derived cycle ids as the scheduler, so running this
//! inside a slot the server already processed resumes from the stored
//! stage memos instead of fetching again.

use std::sync::Arc;

use chrono::Utc;
use leadscout_core::{AppConfig, Platform};
use leadscout_pipeline::{
    gate_summary, CycleReport, HttpConnector, IngestPipeline, PgStageStore, PgStore,
    PipelineSettings, PipelineStore,
};
use sqlx::PgPool;

pub(crate) async fn run_cycle(
    pool: PgPool,
    config: &AppConfig,
    platform: Option<Platform>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let platforms: Vec<Platform> = platform.map_or_else(|| Platform::ALL.to_vec(), |p| vec![p]);

    if dry_run {
        let store = PgStore::new(pool);
        for platform in platforms {
            print_gate_summary(&store, platform).await?;
        }
        return Ok(());
    }

    let pipeline = IngestPipeline::new(
        Arc::new(PgStore::new(pool.clone())),
        Arc::new(HttpConnector::from_config(config)?),
        PgStageStore::new(pool),
        PipelineSettings::from_config(config),
    );

    let mut failed_monitors = 0;
    for platform in platforms {
        match pipeline.run_platform_cycle(platform, Utc::now()).await {
            Ok(report) => {
                print_report(&report);
                failed_monitors += report.failed;
            }
            Err(e) => {
                tracing::error!(platform = %platform, error = %e, "cli: cycle failed");
            }
        }
    }

    if failed_monitors > 0 {
        tracing::warn!(failed_monitors, "cli: some monitors failed; they retry next cycle");
    }
    Ok(())
}

async fn print_gate_summary(store: &PgStore, platform: Platform) -> anyhow::Result<()> {
    let monitors = store.monitors_for_platform(platform).await?;
    let mut tenant_ids: Vec<String> = monitors.iter().map(|m| m.tenant_id.clone()).collect();
    tenant_ids.sort();
    tenant_ids.dedup();
    let tiers = store.tenant_tiers(&tenant_ids).await?;

    let mut rows: Vec<(String, usize)> = gate_summary(&monitors, &tiers, platform, Utc::now())
        .into_iter()
        .map(|(reason, count)| {
            let label = reason.map_or_else(|| "due".to_string(), |r| format!("{r:?}"));
            (label, count)
        })
        .collect();
    rows.sort();

    println!("{platform} ({} monitors)", monitors.len());
    for (label, count) in rows {
        println!("  {label:<24} {count}");
    }
    Ok(())
}

fn print_report(report: &CycleReport) {
    let platform = report.platform.map_or("-", Platform::as_str);
    if report.platform_skipped {
        println!("{platform:<14} skipped (connector not configured)");
        return;
    }
    println!(
        "{platform:<14} {:<24} monitors={} processed={} skipped={} failed={} new={} events={}",
        report.cycle_id,
        report.monitors_total,
        report.processed,
        report.skipped,
        report.failed,
        report.new_results,
        report.enrichment_events,
    );
}
