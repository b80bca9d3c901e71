use crate::prelude::*;

use async_trait::async_trait;
use crc16::{State, XMODEM};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::mppsolar::protocol::Protocol;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// One command, one reply, blocking for the duration of the round trip.
/// The poll interval is much larger than a worst-case round trip, so the
/// event loop tolerates the wait.
#[async_trait]
pub trait CommandTransport: Send {
    async fn send(&mut self, command: &str) -> Result<String>;
}

// PI18 distinguishes setters from queries in the frame marker.
const SETTER_PREFIXES: &[&str] = &["POP", "PCP", "MCHGV", "MNCHGC", "MCHGC", "MUCHGC"];

/// Wrap a bare command in the on-wire frame for the protocol variant.
///
/// PI18: `^P`/`^S` + 3-digit length (command + CRC + CR) + command +
/// CRC16/XMODEM + CR. PI30: command + CRC + CR.
pub fn frame_command(command: &str, protocol: Protocol) -> Vec<u8> {
    match protocol {
        Protocol::Pi18 => {
            let marker = if SETTER_PREFIXES.iter().any(|p| command.starts_with(p)) {
                "^S"
            } else {
                "^P"
            };
            let body = format!("{}{:03}{}", marker, command.len() + 3, command);
            let crc = State::<XMODEM>::calculate(body.as_bytes());
            let mut frame = body.into_bytes();
            frame.extend_from_slice(&crc.to_be_bytes());
            frame.push(b'\r');
            frame
        }
        Protocol::Pi30 => {
            let crc = State::<XMODEM>::calculate(command.as_bytes());
            let mut frame = command.as_bytes().to_vec();
            frame.extend_from_slice(&crc.to_be_bytes());
            frame.push(b'\r');
            frame
        }
    }
}

pub struct SerialTransport {
    port: SerialStream,
    protocol: Protocol,
}

impl SerialTransport {
    pub fn new(device: &str, baudrate: u32, protocol: Protocol) -> Result<Self> {
        info!("opening {} at {} baud ({})", device, baudrate, protocol);

        let port = tokio_serial::new(device, baudrate)
            .timeout(READ_TIMEOUT)
            .open_native_async()
            .map_err(|err| anyhow!("failed to open {}: {}", device, err))?;

        Ok(Self { port, protocol })
    }

    async fn read_reply(&mut self) -> Result<Vec<u8>> {
        let mut reply = Vec::new();
        let mut byte = [0u8; 1];

        let read = async {
            loop {
                self.port.read_exact(&mut byte).await?;
                if byte[0] == b'\r' {
                    break;
                }
                reply.push(byte[0]);
            }
            Ok::<_, std::io::Error>(())
        };

        tokio::time::timeout(READ_TIMEOUT, read)
            .await
            .map_err(|_| anyhow!("timed out waiting for reply"))?
            .map_err(|err| anyhow!("serial read failed: {}", err))?;

        Ok(reply)
    }
}

#[async_trait]
impl CommandTransport for SerialTransport {
    async fn send(&mut self, command: &str) -> Result<String> {
        let frame = frame_command(command, self.protocol);
        AsyncWriteExt::write_all(&mut self.port, &frame)
            .await
            .map_err(|err| anyhow!("serial write failed: {}", err))?;

        let mut reply = self.read_reply().await?;

        // Framed replies carry a trailing CRC16; verify and strip it.
        if reply.first() == Some(&b'^') && reply.len() > 2 {
            let (payload, crc_bytes) = reply.split_at(reply.len() - 2);
            let expected = State::<XMODEM>::calculate(payload);
            let received = u16::from_be_bytes([crc_bytes[0], crc_bytes[1]]);
            if expected != received {
                warn!(
                    "reply CRC mismatch for {} (expected {:04x}, got {:04x})",
                    command, expected, received
                );
            }
            reply.truncate(reply.len() - 2);
        }

        let text = String::from_utf8_lossy(&reply).into_owned();
        trace!("{} -> {}", command, text);
        Ok(text)
    }
}
