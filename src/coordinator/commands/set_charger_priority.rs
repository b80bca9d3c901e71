use crate::prelude::*;

use crate::mppsolar::protocol::{self, CommandKind, Protocol};
use crate::mppsolar::transport::CommandTransport;

/// PCP - select the charger source priority.
///
/// PI18 codes: 0 solar first, 1 solar and utility, 2 only solar.
pub struct SetChargerPriority {
    protocol: Protocol,
    priority: u8,
}

impl SetChargerPriority {
    pub fn new(protocol: Protocol, priority: u8) -> Self {
        Self { protocol, priority }
    }

    pub async fn run(&self, transport: &mut dyn CommandTransport) -> Result<()> {
        let kind = CommandKind::SetChargerPriority(self.priority);
        let Some(command) = protocol::encode(&kind, self.protocol) else {
            return Ok(());
        };

        info!("setting charger priority {} ({})", self.priority, command);
        let reply = transport.send(&command).await?;
        if !protocol::is_ack(&reply) {
            bail!("device rejected {}: {}", command, reply);
        }
        Ok(())
    }
}
