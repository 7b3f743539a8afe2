//! Record Store Simulator - Main Entry Point

mod simulation;

use config::{Config, Environment, File};
use rtc_store::{ResetCause, RetainedMemory, StoreConfig};
use simulation::{SimError, Simulation};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Initialize logging
fn init_logging() -> Result<(), SimError> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| SimError::Logging(e.to_string()))
}

/// Load store sizes from an optional config file and `RTC_STORE_*` variables
fn load_config(path: &str) -> Result<StoreConfig, SimError> {
    let config = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(Environment::with_prefix("RTC_STORE").try_parsing(true))
        .build()?
        .try_deserialize::<StoreConfig>()?;
    config.validate()?;
    Ok(config)
}

fn main() -> Result<(), SimError> {
    init_logging()?;

    info!("=== RTC Store Simulator v{} ===", env!("CARGO_PKG_VERSION"));
    let path = std::env::args().nth(1).unwrap_or_else(|| "rtc-store".to_string());
    let config = load_config(&path)?;
    info!(
        "Retained area: {} bytes, critical log {} bytes, non-critical log {} bytes",
        config.total_size,
        config.critical_len(),
        config.non_critical_len()
    );

    let mut memory = RetainedMemory::from_config(&config)?;
    let simulation = Simulation::default();

    let mut reports = Vec::new();
    reports.push(simulation.boot(&mut memory, ResetCause::PowerOn)?);
    reports.push(simulation.boot(&mut memory, ResetCause::TaskWatchdog)?);
    reports.push(simulation.boot(&mut memory, ResetCause::Panic)?);
    reports.push(simulation.boot(&mut memory, ResetCause::Brownout)?);

    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}
