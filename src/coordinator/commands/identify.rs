use crate::prelude::*;

use std::sync::{Arc, Mutex};

use crate::coordinator::BridgeStats;
use crate::mppsolar::protocol::{self, CommandKind, Protocol, Record};
use crate::mppsolar::transport::CommandTransport;

/// Startup identity probe: serial number (ID) and firmware version (VFW).
///
/// Best-effort per query; a device that answers one but not the other
/// still yields the field it answered. Each completed round trip is
/// counted against the shared stats as it happens.
pub struct Identify {
    protocol: Protocol,
}

#[derive(Debug, Default, Clone)]
pub struct Identity {
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,
}

impl Identify {
    pub fn new(protocol: Protocol) -> Self {
        Self { protocol }
    }

    pub async fn run(
        &self,
        transport: &mut dyn CommandTransport,
        stats: &Arc<Mutex<BridgeStats>>,
    ) -> Identity {
        let mut identity = Identity::default();

        match self.query(transport, CommandKind::IdentifyQuery, stats).await {
            Ok(record) => {
                identity.serial_number = record.text("serial_number").map(str::to_string)
            }
            Err(err) => warn!("error reading serial number: {:#}", err),
        }

        match self.query(transport, CommandKind::FirmwareQuery, stats).await {
            Ok(record) => {
                identity.firmware_version = record.text("main_cpu_version").map(str::to_string)
            }
            Err(err) => warn!("error reading firmware version: {:#}", err),
        }

        identity
    }

    async fn query(
        &self,
        transport: &mut dyn CommandTransport,
        kind: CommandKind,
        stats: &Arc<Mutex<BridgeStats>>,
    ) -> Result<Record> {
        let command = protocol::encode(&kind, self.protocol)
            .ok_or_else(|| anyhow!("{:?} has no encoding for {}", kind, self.protocol))?;

        let raw = transport.send(&command).await?;
        if let Ok(mut stats) = stats.lock() {
            stats.count_commands(1);
        }

        Ok(protocol::decode(&kind, &raw)?)
    }
}
