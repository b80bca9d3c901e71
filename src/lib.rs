pub mod canonical;
pub mod channels;
pub mod config;
pub mod coordinator;
pub mod mppsolar;
pub mod mqtt;
pub mod options;
pub mod prelude;
pub mod scheduler;

pub const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;

use crate::coordinator::Coordinator;
use crate::mppsolar::transport::SerialTransport;
use crate::mqtt::Mqtt;
use crate::scheduler::Scheduler;

pub fn init_logging(loglevel: &str) {
    if env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(loglevel))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init()
        .is_err()
    {
        debug!("logger was already initialised");
    }
}

pub async fn app(mut shutdown_rx: broadcast::Receiver<()>, config: ConfigWrapper) -> Result<()> {
    info!("mppsolar-bridge {} starting", CARGO_PKG_VERSION);

    let channels = Channels::new();

    let inverter = config.inverter();
    let transport = SerialTransport::new(inverter.serial(), inverter.baudrate(), inverter.protocol())?;

    let mut coordinator = Coordinator::new(config.clone(), channels.clone(), Box::new(transport));
    let stats = coordinator.shared_stats.clone();
    let coordinator_handle = tokio::spawn(async move {
        if let Err(err) = coordinator.start().await {
            error!("coordinator task failed: {:#}", err);
        }
    });

    let scheduler = Scheduler::new(config.clone(), channels.clone());
    let scheduler_handle = tokio::spawn(async move {
        if let Err(err) = scheduler.start().await {
            error!("scheduler task failed: {:#}", err);
        }
    });

    let mqtt = Mqtt::new(config.clone(), channels.clone());
    let mqtt_runner = mqtt.clone();
    let mqtt_handle = tokio::spawn(async move {
        if let Err(err) = mqtt_runner.start().await {
            error!("mqtt task failed: {:#}", err);
        }
    });

    // Either an external signal or an internal fatal event (a reset
    // request) stops the whole service; the process supervisor restarts it.
    let mut internal_shutdown = channels.shutdown.subscribe();
    tokio::select! {
        _ = shutdown_rx.recv() => info!("shutdown signal received"),
        _ = internal_shutdown.recv() => info!("internal shutdown requested"),
    }

    let _ = channels.to_coordinator.send(coordinator::ChannelData::Shutdown);
    mqtt.stop();
    let _ = channels.shutdown.send(());

    if let Err(err) = coordinator_handle.await {
        error!("error waiting for coordinator task: {}", err);
    }
    if let Err(err) = mqtt_handle.await {
        error!("error waiting for mqtt task: {}", err);
    }
    // the scheduler only notices the coordinator is gone at its next tick
    scheduler_handle.abort();

    if let Ok(stats) = stats.lock() {
        stats.print_summary();
    }

    info!("shutdown complete");
    Ok(())
}
