use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use fleet_tracker::channel::{Channel, KafkaChannel};
use fleet_tracker::config::AppConfig;
use fleet_tracker::db::{
    self, GeofenceRepository, PgGeofenceRepository, PgTripSource, PgVehicleSource, VehicleSource,
};
use fleet_tracker::processor::TelemetryProcessor;
use fleet_tracker::timeline::timeline_for_device;
use fleet_tracker::{SubscriptionManager, VehicleStore};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Track the fleet live until Ctrl-C (default)
    Serve,
    /// Print one device's timeline for a day as JSON
    Timeline {
        /// Device id as reported by the tracker
        #[arg(long)]
        device_id: String,
        /// Day to build, e.g. 2025-03-10
        #[arg(long)]
        date: NaiveDate,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Timeline { device_id, date } => print_timeline(config, &device_id, date).await,
    }
}

async fn print_timeline(config: AppConfig, device_id: &str, date: NaiveDate) -> anyhow::Result<()> {
    let pool = db::init_pool(&config.database_url).await?;
    let source = PgTripSource::new(pool);
    let events = timeline_for_device(&source, device_id, date, &config.timeline_config()).await?;
    info!("Built {} timeline events for device {} on {}", events.len(), device_id, date);
    println!("{}", serde_json::to_string_pretty(&events)?);
    Ok(())
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    info!("Starting fleet tracker for organization '{}'", config.fleet_org_id);

    let pool = db::init_pool(&config.database_url).await?;
    info!("Connected to database");

    let vehicles = PgVehicleSource::new(pool.clone())
        .fetch_vehicles(&config.fleet_org_id)
        .await?;
    let mut store = VehicleStore::new();
    store.load(vehicles);

    let geofences = match PgGeofenceRepository::new(pool.clone())
        .list(&config.fleet_org_id)
        .await
    {
        Ok(geofences) => geofences,
        Err(e) => {
            warn!("Could not load geofences, crossings will not be reported: {}", e);
            Vec::new()
        }
    };
    info!(
        "Tracking {} vehicles ({} with devices) against {} geofences",
        store.len(),
        store.device_ids().len(),
        geofences.len()
    );
    let device_ids = store.device_ids();

    let channel = Arc::new(KafkaChannel::new(config.kafka_settings()));
    if let Err(e) = channel.connect().await {
        warn!("Telemetry channel unavailable, serving last known state: {}", e);
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let manager = SubscriptionManager::new(channel.clone());
    let updates = manager.on_update(move |delta| {
        if tx.send(delta.clone()).is_err() {
            warn!("Telemetry processor stopped, dropping delta for {}", delta.device_id);
        }
    });
    manager.subscribe(device_ids, &config.fleet_org_id).await;

    let worker = tokio::spawn(
        TelemetryProcessor::new(store, geofences).run(rx, config.status_summary_interval()),
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    updates.unsubscribe();
    manager.unsubscribe_all().await;
    drop(manager);
    if let Err(e) = channel.disconnect().await {
        error!("Failed to close telemetry channel: {}", e);
    }

    match worker.await {
        Ok(processor) => info!("Processor drained, {} vehicles in store", processor.store().len()),
        Err(e) => error!("Processor task failed: {}", e),
    }

    Ok(())
}
