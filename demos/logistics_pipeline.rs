//! Delivery performance pipeline over the bundled sample data.
//!
//! Reads deliveries and route traffic from `data/logistics/`, loads the
//! enriched rows into an in-memory `deliveries` table and prints the run
//! report.
//!
//! Run with: cargo run --example logistics_pipeline [-- path/to/config.toml]

use anyhow::Result;
use ironload::domains::logistics;
use ironload::*;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();

    let data = Path::new(env!("CARGO_MANIFEST_DIR")).join("data/logistics");
    let config = match std::env::args().nth(1) {
        Some(path) => PipelineConfig::from_path(path)?,
        None => PipelineConfig::default(),
    };

    // Traffic is a side table, so it is extracted on its own first.
    let traffic = JsonArraySource::new(data.join("traffic.json")).fetch()?;
    let definition = logistics::definition(Arc::new(logistics::traffic_lookup(&traffic)))?;

    let store = MemoryTableStore::new();
    store.create_table(logistics::TARGET_TABLE);
    let pipeline = EtlPipeline::new(definition, config, store)?;

    let sources: Vec<Box<dyn RecordSource>> = vec![Box::new(GlobSource::new(
        data.join("deliveries*.json").display().to_string(),
        |p| Box::new(JsonArraySource::new(p)) as Box<dyn RecordSource>,
    ))];
    let report = pipeline.run(&sources)?;

    println!("{}", report.to_json()?);
    println!(
        "\n{} of {} rows loaded into `{}`, validation {}",
        report.load.rows_succeeded,
        report.rows_extracted,
        report.target_table,
        if report.validation.passed() { "passed" } else { "FAILED" }
    );
    Ok(())
}
