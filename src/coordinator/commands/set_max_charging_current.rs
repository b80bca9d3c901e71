use crate::prelude::*;

use crate::mppsolar::protocol::{self, CommandKind, Protocol};
use crate::mppsolar::transport::CommandTransport;

/// MCHGC (PI18) / MNCHGC (other variants) - set the maximum charging
/// current. The device only accepts multiples of 10A.
pub struct SetMaxChargingCurrent {
    protocol: Protocol,
    current: f64,
}

impl SetMaxChargingCurrent {
    pub fn new(protocol: Protocol, current: f64) -> Self {
        Self { protocol, current }
    }

    pub async fn run(&self, transport: &mut dyn CommandTransport) -> Result<()> {
        let kind = CommandKind::SetMaxChargingCurrent(self.current);
        let Some(command) = protocol::encode(&kind, self.protocol) else {
            return Ok(());
        };

        info!("setting max charging current {}A ({})", self.current, command);
        let reply = transport.send(&command).await?;
        if !protocol::is_ack(&reply) {
            bail!("device rejected {}: {}", command, reply);
        }
        Ok(())
    }
}
