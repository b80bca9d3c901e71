use anyhow::Result;
use log::error;
use tokio::sync::broadcast;

use mppsolar_bridge::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let options = Options::new();

    mppsolar_bridge::init_logging("info");

    let config = Config::new(options.config_file)?;
    let config = ConfigWrapper::from_config(config);

    // command-line overrides for quick tests against a different port
    if let Some(serial) = options.serial {
        config.set_serial(serial);
    }
    if let Some(baudrate) = options.baudrate {
        config.set_baudrate(baudrate);
    }

    mppsolar_bridge::init_logging(&config.loglevel());

    let (shutdown_tx, _) = broadcast::channel(1);

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl+c: {}", err);
        }
        let _ = shutdown_tx_clone.send(());
    });

    mppsolar_bridge::app(shutdown_tx.subscribe(), config).await
}
