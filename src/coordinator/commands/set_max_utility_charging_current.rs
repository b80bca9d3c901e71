use crate::prelude::*;

use crate::mppsolar::protocol::{self, CommandKind, Protocol};
use crate::mppsolar::transport::CommandTransport;

/// MUCHGC - set the maximum utility charging current.
///
/// PI18 rounds to the nearest 10A and floors at 2; other variants send the
/// raw integer current. The asymmetry is a firmware quirk, kept as-is.
pub struct SetMaxUtilityChargingCurrent {
    protocol: Protocol,
    current: f64,
}

impl SetMaxUtilityChargingCurrent {
    pub fn new(protocol: Protocol, current: f64) -> Self {
        Self { protocol, current }
    }

    pub async fn run(&self, transport: &mut dyn CommandTransport) -> Result<()> {
        let kind = CommandKind::SetMaxUtilityChargingCurrent(self.current);
        let Some(command) = protocol::encode(&kind, self.protocol) else {
            return Ok(());
        };

        info!(
            "setting max utility charging current {}A ({})",
            self.current, command
        );
        let reply = transport.send(&command).await?;
        if !protocol::is_ack(&reply) {
            bail!("device rejected {}: {}", command, reply);
        }
        Ok(())
    }
}
