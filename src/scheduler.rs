use crate::prelude::*;

/// Fires a poll tick at a fixed interval, forever. There is no backoff:
/// a failed cycle simply retries on the next tick.
pub struct Scheduler {
    config: ConfigWrapper,
    channels: Channels,
}

impl Scheduler {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        Self { config, channels }
    }

    pub async fn start(&self) -> Result<()> {
        let period = std::time::Duration::from_secs(self.config.inverter().poll_interval());
        let mut interval = tokio::time::interval(period);
        // the first tick fires immediately, giving us a poll right at startup

        loop {
            interval.tick().await;

            if self
                .channels
                .to_coordinator
                .send(coordinator::ChannelData::PollTick)
                .is_err()
            {
                // coordinator gone, nothing left to schedule for
                break;
            }
        }

        Ok(())
    }
}
