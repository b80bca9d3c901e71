use crate::prelude::*;

use crate::mppsolar::protocol::{self, CommandKind, Protocol};
use crate::mppsolar::transport::CommandTransport;

/// POP - select the output source priority.
///
/// PI18 codes: 0 solar-utility-battery, 1 solar-battery-utility, 2 SBU.
pub struct SetOutputSource {
    protocol: Protocol,
    source: u8,
}

impl SetOutputSource {
    pub fn new(protocol: Protocol, source: u8) -> Self {
        Self { protocol, source }
    }

    pub async fn run(&self, transport: &mut dyn CommandTransport) -> Result<()> {
        let kind = CommandKind::SetOutputSource(self.source);
        let Some(command) = protocol::encode(&kind, self.protocol) else {
            return Ok(());
        };

        info!("setting output source {} ({})", self.source, command);
        let reply = transport.send(&command).await?;
        if !protocol::is_ack(&reply) {
            bail!("device rejected {}: {}", command, reply);
        }
        Ok(())
    }
}
