use serde_json::json;
use tracing::info;

use allotment::catalog::Catalog;
use allotment::config::{Cli, Command};
use allotment::matching::run_period;
use allotment::observability;
use allotment::store::DurableStore;
use clap::Parser;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    observability::init(cli.metrics_port)?;

    std::fs::create_dir_all(&cli.data_dir)?;
    let wal_path = cli.wal_path();
    let store = DurableStore::open(&wal_path)?;
    info!("allotment data: {}", wal_path.display());

    match &cli.command {
        Command::Import { catalog } => {
            let catalog = Catalog::from_path(catalog)?;
            let imported = store.import(catalog)?;
            println!("{}", json!({ "imported": imported }));
        }
        Command::Match { period, options } => {
            let outcome = run_period(&store, *period, &options.to_options())?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Report { period } => {
            let tables = store.tables();
            let report = json!({
                "occasions": tables.occasion_summaries(period)?,
                "bookings": tables.bookings_in_period(period),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Compact => store.compact()?,
    }
    Ok(())
}
