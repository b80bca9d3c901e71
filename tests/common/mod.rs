#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::broadcast;

use mppsolar_bridge::config::{Config, ConfigWrapper, Inverter, Mqtt, Workarounds};
use mppsolar_bridge::mppsolar::protocol::Protocol;
use mppsolar_bridge::mppsolar::transport::CommandTransport;
use mppsolar_bridge::mqtt;

pub const ID_REPLY: &str = "^D02596332309100452000000";
pub const VFW_REPLY: &str = "^D01105220-0001";
pub const ET_REPLY: &str = "^D01100015000";
// battery 52.1V, AC out 230.0V / 500W, PV 120W at 60.0V, heat sink 45C,
// mppt 39C
pub const GS_REPLY: &str = "^D1062299,499,2300,499,0500,0500,017,521,000,000,000,012,080,045,039,000,0120,0000,0600,0000,0,0,0,1,1,0,0";
pub const MOD_BATTERY_REPLY: &str = "^D00503";
pub const MOD_FAULT_REPLY: &str = "^D00504";
pub const MOD_STANDBY_REPLY: &str = "^D00501";
pub const PIRI_REPLY: &str =
    "^D0892301,104,2301,499,104,5000,5000,480,460,540,420,564,540,2,10,060,1,2";

pub fn happy_replies() -> HashMap<String, String> {
    let mut replies = HashMap::new();
    replies.insert("ID".to_string(), ID_REPLY.to_string());
    replies.insert("VFW".to_string(), VFW_REPLY.to_string());
    replies.insert("ET".to_string(), ET_REPLY.to_string());
    replies.insert("GS".to_string(), GS_REPLY.to_string());
    replies.insert("MOD".to_string(), MOD_BATTERY_REPLY.to_string());
    replies.insert("PIRI".to_string(), PIRI_REPLY.to_string());
    replies
}

/// Canned command/reply transport standing in for the serial port. Every
/// command sent is recorded; a command without a scripted reply fails the
/// round trip, like a device that stopped answering.
#[derive(Clone)]
pub struct ScriptedTransport {
    replies: Arc<Mutex<HashMap<String, String>>>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTransport {
    pub fn new(replies: HashMap<String, String>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies)),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_reply(&self, command: &str, reply: &str) {
        self.replies
            .lock()
            .unwrap()
            .insert(command.to_string(), reply.to_string());
    }

    pub fn remove_reply(&self, command: &str) {
        self.replies.lock().unwrap().remove(command);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandTransport for ScriptedTransport {
    async fn send(&mut self, command: &str) -> Result<String> {
        self.sent.lock().unwrap().push(command.to_string());
        let replies = self.replies.lock().unwrap();
        replies
            .get(command)
            .cloned()
            .ok_or_else(|| anyhow!("no scripted reply for {}", command))
    }
}

pub fn test_config() -> ConfigWrapper {
    ConfigWrapper::from_config(Config {
        inverter: Inverter {
            serial: "/dev/ttyUSB0".to_string(),
            baudrate: 2400,
            protocol: Protocol::Pi18,
            poll_interval: 10,
            device_instance: 0,
        },
        mqtt: Mqtt {
            enabled: true,
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            namespace: "test".to_string(),
        },
        workarounds: Workarounds {
            inverter_off_assume_bypass: true,
        },
        products: HashMap::new(),
        loglevel: "info".to_string(),
    })
}

/// Wait for the next full batch on the outbound bus channel.
pub async fn next_batch(
    receiver: &mut broadcast::Receiver<mqtt::ChannelData>,
) -> Vec<mqtt::Message> {
    loop {
        let data = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
            .await
            .expect("timed out waiting for a batch")
            .expect("bus channel closed");
        if let mqtt::ChannelData::Batch(messages) = data {
            return messages;
        }
    }
}

pub fn payload(batch: &[mqtt::Message], topic: &str) -> String {
    batch
        .iter()
        .find(|m| m.topic == topic)
        .unwrap_or_else(|| panic!("no message for {}", topic))
        .payload
        .clone()
}

pub fn payload_f64(batch: &[mqtt::Message], topic: &str) -> f64 {
    payload(batch, topic)
        .parse()
        .unwrap_or_else(|_| panic!("payload for {} is not numeric", topic))
}
