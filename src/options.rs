use clap::Parser;

/// MPP Solar Bridge - publishes an MPP Solar inverter/charger onto MQTT
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Config file to read
    #[clap(short = 'c', long = "config", default_value = "config.yaml")]
    pub config_file: String,

    /// Serial device the inverter is connected to (overrides config)
    #[clap(short = 's', long = "serial")]
    pub serial: Option<String>,

    /// Baud rate for the serial device (overrides config)
    #[clap(short = 'b', long = "baudrate")]
    pub baudrate: Option<u32>,
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }
}
