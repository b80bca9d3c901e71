use crate::prelude::*;

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::mppsolar::protocol::Protocol;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub inverter: Inverter,
    pub mqtt: Mqtt,

    #[serde(default = "Config::default_workarounds")]
    pub workarounds: Workarounds,

    /// Cosmetic product names keyed by serial device, like the json config
    /// the Venus OS install reads.
    #[serde(default = "HashMap::new")]
    pub products: HashMap<String, String>,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Inverter {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Inverter {
    pub serial: String,

    #[serde(default = "Config::default_baudrate")]
    pub baudrate: u32,

    #[serde(default = "Config::default_protocol")]
    pub protocol: Protocol,

    #[serde(default = "Config::default_poll_interval")]
    pub poll_interval: u64,

    #[serde(default = "Config::default_device_instance")]
    pub device_instance: u16,
}
impl Inverter {
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn baudrate(&self) -> u32 {
        self.baudrate
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn poll_interval(&self) -> u64 {
        self.poll_interval
    }

    pub fn device_instance(&self) -> u16 {
        self.device_instance
    }

    /// The device identifier used in bus topics, i.e. "ttyUSB0" for
    /// /dev/ttyUSB0.
    pub fn device_id(&self) -> String {
        self.serial.trim_start_matches("/dev/").replace('/', "_")
    }
} // }}}

// Mqtt {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Mqtt {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    pub host: String,
    #[serde(default = "Config::default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,

    #[serde(default = "Config::default_mqtt_namespace")]
    pub namespace: String,
}
impl Mqtt {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &Option<String> {
        &self.username
    }

    pub fn password(&self) -> &Option<String> {
        &self.password
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
} // }}}

// Workarounds {{{
//
// Named deviations from raw protocol reporting, not protocol features.
#[derive(Clone, Debug, Deserialize)]
pub struct Workarounds {
    /// When the inverter reports neither Battery nor Fault mode, display an
    /// assumed bypass state instead of Off.
    #[serde(default = "Config::default_enabled")]
    pub inverter_off_assume_bypass: bool,
}
impl Workarounds {
    pub fn inverter_off_assume_bypass(&self) -> bool {
        self.inverter_off_assume_bypass
    }
} // }}}

pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl Clone for ConfigWrapper {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        let config = Config::new(file)?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    pub fn inverter(&self) -> Inverter {
        self.config.lock().unwrap().inverter.clone()
    }

    pub fn mqtt(&self) -> Mqtt {
        self.config.lock().unwrap().mqtt.clone()
    }

    pub fn workarounds(&self) -> Workarounds {
        self.config.lock().unwrap().workarounds.clone()
    }

    pub fn loglevel(&self) -> String {
        self.config.lock().unwrap().loglevel.clone()
    }

    /// Cosmetic product name for a serial device, if the config carries one.
    pub fn product_name(&self) -> String {
        let config = self.config.lock().unwrap();
        let device_id = config.inverter.device_id();
        config
            .products
            .get(&device_id)
            .cloned()
            .unwrap_or_else(|| "MPPSolar".to_string())
    }

    pub fn set_serial(&self, serial: String) {
        self.config.lock().unwrap().inverter.serial = serial;
    }

    pub fn set_baudrate(&self, baudrate: u32) {
        self.config.lock().unwrap().inverter.baudrate = baudrate;
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        info!("Reading configuration from {}", file);
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("error reading {}: {}", file, err))?;

        let config: Self = serde_yaml::from_str(&content)?;

        info!("Configuration loaded:");
        info!("  Inverter:");
        info!("    Serial: {}", config.inverter.serial);
        info!("    Baudrate: {}", config.inverter.baudrate);
        info!("    Protocol: {:?}", config.inverter.protocol);
        info!("    Poll interval: {}s", config.inverter.poll_interval);
        info!("    Device instance: {}", config.inverter.device_instance);
        info!("  MQTT: {}", if config.mqtt.enabled { "enabled" } else { "disabled" });
        if config.mqtt.enabled {
            info!("    Host: {}", config.mqtt.host);
            info!("    Port: {}", config.mqtt.port);
            info!("    Namespace: {}", config.mqtt.namespace);
        }
        info!(
            "  Workarounds: inverter_off_assume_bypass={}",
            config.workarounds.inverter_off_assume_bypass
        );
        info!("  Log Level: {}", config.loglevel);

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.inverter.serial.is_empty() {
            bail!("inverter.serial cannot be empty");
        }
        if self.inverter.baudrate == 0 {
            bail!("inverter.baudrate must be non-zero");
        }
        if self.inverter.poll_interval == 0 {
            bail!("inverter.poll_interval must be at least 1 second");
        }

        if self.mqtt.enabled {
            if self.mqtt.port == 0 {
                bail!("mqtt.port must be between 1 and 65535");
            }
            if self.mqtt.host.is_empty() {
                bail!("mqtt.host cannot be empty");
            }
        }

        Ok(())
    }

    fn default_baudrate() -> u32 {
        2400
    }

    fn default_protocol() -> Protocol {
        Protocol::Pi18
    }

    fn default_poll_interval() -> u64 {
        10
    }

    fn default_device_instance() -> u16 {
        0
    }

    fn default_mqtt_port() -> u16 {
        1883
    }

    fn default_mqtt_namespace() -> String {
        "mppsolar".to_string()
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }

    fn default_workarounds() -> Workarounds {
        Workarounds {
            inverter_off_assume_bypass: Self::default_enabled(),
        }
    }
}
