//! Telco churn pipeline: forward fill, median fill, tenure groups and
//! encoded flags.
//!
//! Run with: cargo run --example churn_pipeline

use anyhow::Result;
use ironload::domains::churn;
use ironload::*;
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();

    let root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let config = PipelineConfig {
        batch_size: 4,
        staged_path: Some(std::env::temp_dir().join("ironload/telco_churn_staged.csv.gz")),
        ..PipelineConfig::default()
    };

    let store = MemoryTableStore::new();
    store.create_table(churn::TARGET_TABLE);
    let pipeline = EtlPipeline::new(churn::definition()?, config, store)?;

    let sources: Vec<Box<dyn RecordSource>> =
        vec![Box::new(CsvSource::new(root.join("data/churn/telco.csv")))];
    let report = pipeline.run(&sources)?;

    for dropped in &report.drops {
        println!("dropped row {} ({}): {}", dropped.row_index, dropped.key, dropped.reason);
    }
    let rows = pipeline.store().rows(churn::TARGET_TABLE).unwrap_or_default();
    for row in &rows {
        println!(
            "{:<12} {:<10} {:<8} churn={} contract={}",
            row["customer_id"], row["tenure_group"], row["monthly_charge_segment"], row["churn_flag"], row["contract_type_code"],
        );
    }
    if let Some(Analysis::Churn(summary)) = &report.analysis {
        println!("\nchurn: {:?}%", summary.churn_percentage);
        for (contract, mean) in &summary.mean_monthly_charges_by_contract {
            println!("  {contract:<16} mean monthly charges {mean:.2}");
        }
        for (segment, rate) in &summary.churn_rate_by_charge_segment {
            println!("  {segment:<16} churn rate {rate:.2}");
        }
    }
    println!("\nsucceeded: {}", report.succeeded());
    Ok(())
}
