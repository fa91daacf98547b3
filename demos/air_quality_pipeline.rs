//! Hourly air quality pipeline: flattens per-city payloads, matches
//! coordinates to cities and flags risk by run tertiles.
//!
//! Run with: cargo run --example air_quality_pipeline

use anyhow::Result;
use ironload::domains::air_quality::{self, RiskBanding};
use ironload::*;
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();

    let pattern = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("data/air_quality/*.json")
        .display()
        .to_string();
    let sources = GlobSource::new(pattern, |p| Box::new(air_quality::hourly_source(p)) as Box<dyn RecordSource>)
        .units()?;

    let store = MemoryTableStore::new();
    store.create_table(air_quality::TARGET_TABLE);
    let pipeline = EtlPipeline::new(
        air_quality::definition(RiskBanding::Percentile)?,
        PipelineConfig::default(),
        store,
    )?;
    let report = pipeline.run(&sources)?;

    for bands in &report.bands {
        println!("{} ({}): bounds {:?}", bands.column, bands.mode, bands.bounds);
    }
    if let Some(Analysis::AirQuality(summary)) = &report.analysis {
        println!(
            "highest pm2_5: {:?}, highest severity: {:?}, worst hour: {:?}",
            summary.top_city_by_pm2_5, summary.top_city_by_severity, summary.worst_hour_by_pm2_5
        );
        println!("risk split (%): {:?}", summary.risk_flag_share);
    }
    let out = std::env::temp_dir().join("ironload/air_quality_report.json");
    report.write_to_file(&out)?;
    println!("report written to {}", out.display());
    Ok(())
}
