use crate::prelude::*;

use crate::mppsolar::protocol::{self, CommandKind, Protocol};
use crate::mppsolar::transport::CommandTransport;

/// MCHGV - set bulk and float charging voltage (PI18 only).
///
/// On other variants this is a documented no-op: nothing is sent and the
/// operation still reports success.
pub struct SetMaxChargingVoltage {
    protocol: Protocol,
    voltage: f64,
}

impl SetMaxChargingVoltage {
    pub fn new(protocol: Protocol, voltage: f64) -> Self {
        Self { protocol, voltage }
    }

    pub async fn run(&self, transport: &mut dyn CommandTransport) -> Result<()> {
        let kind = CommandKind::SetMaxChargingVoltage(self.voltage);
        let Some(command) = protocol::encode(&kind, self.protocol) else {
            debug!(
                "max charging voltage not supported on {}, skipping",
                self.protocol
            );
            return Ok(());
        };

        info!("setting max charging voltage {}V ({})", self.voltage, command);
        let reply = transport.send(&command).await?;
        if !protocol::is_ack(&reply) {
            bail!("device rejected {}: {}", command, reply);
        }
        Ok(())
    }
}
