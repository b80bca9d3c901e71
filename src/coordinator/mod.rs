use crate::prelude::*;

pub mod commands;

use num_enum::TryFromPrimitive;
use std::convert::TryFrom;
use std::sync::{Arc, Mutex};

use crate::canonical::{
    CanonicalState, ChargerState, DeviceGroup, InverterState, PendingControlUpdates, Value,
};
use crate::coordinator::commands::{
    Identify, SetChargerPriority, SetMaxChargingCurrent, SetMaxChargingVoltage,
    SetMaxUtilityChargingCurrent, SetOutputSource,
};
use crate::mppsolar::protocol::{self, CommandKind, Protocol, Record};
use crate::mppsolar::transport::CommandTransport;

#[derive(Clone, Debug)]
pub enum ChannelData {
    /// Scheduler says it is time for a poll cycle.
    PollTick,
    /// An external write request arrived on the bus.
    WriteRequest(String, serde_json::Value),
    Shutdown,
}

// ModeDirective {{{
/// The coarse /Mode switch exposed on the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(i64)]
pub enum ModeDirective {
    ChargerOnly = 1,
    InverterOnly = 2,
    On = 3,
    Off = 4,
}

impl ModeDirective {
    /// The (charger priority, output source) codes issued for each
    /// directive, always in that order.
    pub fn command_codes(self) -> (u8, u8) {
        match self {
            ModeDirective::ChargerOnly => (1, 1), // charger: utility
            ModeDirective::InverterOnly => (0, 2), // charger: solar, output: SBU
            ModeDirective::On => (1, 2),          // charger: utility, output: SBU
            ModeDirective::Off => (3, 2),         // charger: only solar
        }
    }
} // }}}

/// Poll cycle lifecycle; Failed cycles leave CanonicalState untouched and
/// retry at the next tick, indefinitely.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PollState {
    Idle,
    Polling,
    Merging,
    Failed,
}

// BridgeStats {{{
#[derive(Default)]
pub struct BridgeStats {
    cycles_ok: u64,
    cycles_failed: u64,
    commands_sent: u64,
    writes_accepted: u64,
    writes_rejected: u64,
    batches_published: u64,
}

impl BridgeStats {
    pub fn count_commands(&mut self, n: u64) {
        self.commands_sent += n;
    }

    pub fn commands_sent(&self) -> u64 {
        self.commands_sent
    }

    pub fn print_summary(&self) {
        info!("Bridge statistics:");
        info!("  Poll cycles: {} ok, {} failed", self.cycles_ok, self.cycles_failed);
        info!("  Device commands sent: {}", self.commands_sent);
        info!(
            "  Control writes: {} accepted, {} rejected",
            self.writes_accepted, self.writes_rejected
        );
        info!("  Batches published: {}", self.batches_published);
    }
} // }}}

/// The four decode results for one complete poll cycle. Either all four
/// are present or the cycle failed as a whole.
pub struct TelemetrySnapshot {
    pub energy: Record,
    pub status: Record,
    pub mode: Record,
    pub rated: Record,
}

pub struct Coordinator {
    config: ConfigWrapper,
    channels: Channels,
    transport: Box<dyn CommandTransport>,
    protocol: Protocol,
    state: CanonicalState,
    pending: PendingControlUpdates,
    poll_state: PollState,
    pub shared_stats: Arc<Mutex<BridgeStats>>,
}

impl Coordinator {
    pub fn new(
        config: ConfigWrapper,
        channels: Channels,
        transport: Box<dyn CommandTransport>,
    ) -> Self {
        let protocol = config.inverter().protocol();
        Self {
            config,
            channels,
            transport,
            protocol,
            state: CanonicalState::new(),
            pending: PendingControlUpdates::default(),
            poll_state: PollState::Idle,
            shared_stats: Arc::new(Mutex::new(BridgeStats::default())),
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        self.publish_management().await;

        let mut receiver = self.channels.to_coordinator.subscribe();

        loop {
            match receiver.recv().await {
                Ok(ChannelData::PollTick) => self.poll_cycle().await?,
                Ok(ChannelData::WriteRequest(path, value)) => {
                    self.handle_write(&path, value).await
                }
                Ok(ChannelData::Shutdown) => break,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("coordinator lagged, dropped {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        info!("coordinator stopping");
        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.channels.to_coordinator.send(ChannelData::Shutdown);
    }

    // Best-effort identity probe plus the management sub-tree publish.
    // A failure here is logged and tolerated.
    async fn publish_management(&mut self) {
        let identity = Identify::new(self.protocol)
            .run(self.transport.as_mut(), &self.shared_stats)
            .await;

        let messages = mqtt::Message::for_management(
            &self.config,
            identity.firmware_version.as_deref(),
            identity.serial_number.as_deref(),
        );
        self.publish_batch(messages);
    }

    // Telemetry poller {{{

    /// One full poll cycle: Idle -> Polling -> {Merging, Failed} -> Idle.
    async fn poll_cycle(&mut self) -> Result<()> {
        self.poll_state = PollState::Polling;

        let snapshot = match self.read_telemetry().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                // Soft failure: previous state is retained byte-for-byte
                // and the next tick retries. Never any backoff.
                self.poll_state = PollState::Failed;
                if let Ok(mut stats) = self.shared_stats.lock() {
                    stats.cycles_failed += 1;
                }
                warn!("poll cycle failed, keeping previous state: {:#}", err);
                return Ok(());
            }
        };

        self.poll_state = PollState::Merging;
        self.merge_telemetry(&snapshot);
        self.apply_pending_updates();
        self.publish_state();

        self.poll_state = PollState::Idle;
        if let Ok(mut stats) = self.shared_stats.lock() {
            stats.cycles_ok += 1;
        }
        Ok(())
    }

    /// Issue the fixed query batch in order; any transport or decode
    /// failure aborts the whole cycle.
    async fn read_telemetry(&mut self) -> Result<TelemetrySnapshot> {
        let energy = self.query(CommandKind::EnergyTotalsQuery).await?;
        let status = self.query(CommandKind::GeneralStatusQuery).await?;
        let mode = self.query(CommandKind::ModeQuery).await?;
        let rated = self.query(CommandKind::RatedInfoQuery).await?;

        Ok(TelemetrySnapshot {
            energy,
            status,
            mode,
            rated,
        })
    }

    async fn query(&mut self, kind: CommandKind) -> Result<Record> {
        let command = protocol::encode(&kind, self.protocol)
            .ok_or_else(|| anyhow!("{:?} has no encoding for {}", kind, self.protocol))?;

        let raw = self.transport.send(&command).await?;
        self.count_commands(1);

        let record = protocol::decode(&kind, &raw)?;
        debug!("{} -> {}", command, record.to_json());
        Ok(record)
    }

    /// Fold one complete telemetry snapshot into CanonicalState. Absent
    /// fields keep their previous value, they are never zeroed.
    fn merge_telemetry(&mut self, snapshot: &TelemetrySnapshot) {
        use DeviceGroup::{Charger, Inverter};

        let run_state = match snapshot.mode.text("working_mode") {
            Some("Battery mode") => InverterState::Inverting,
            Some("Fault mode") => InverterState::Fault,
            _ if self.config.workarounds().inverter_off_assume_bypass() => InverterState::Bypass,
            _ => InverterState::Off,
        };
        self.state
            .set(Inverter, "/State", Value::Int(run_state.into()));

        if let Some(v) = snapshot.status.num("battery_voltage") {
            self.state.set(Inverter, "/Dc/0/Voltage", Value::Float(v));
            self.state.set(Charger, "/Dc/0/Voltage", Value::Float(v));
        }

        if let Some(v) = snapshot.status.num("ac_output_voltage") {
            self.state.set(Inverter, "/Ac/Out/L1/V", Value::Float(v));
        }
        if let Some(p) = snapshot.status.num("ac_output_active_power") {
            self.state.set(Inverter, "/Ac/Out/L1/P", Value::Float(p));
        }

        // Output current is derived, not read. Both readings must be
        // non-zero before dividing.
        let voltage = self.state.num(Inverter, "/Ac/Out/L1/V").unwrap_or(0.0);
        let power = self.state.num(Inverter, "/Ac/Out/L1/P").unwrap_or(0.0);
        if voltage != 0.0 && power != 0.0 {
            self.state
                .set(Inverter, "/Ac/Out/L1/I", Value::Float(power / voltage));
        }

        let pv_power = snapshot.status.num("pv1_input_power");
        let charger_state = match pv_power {
            Some(p) if p > 0.0 => ChargerState::Charging,
            _ => ChargerState::Off,
        };
        self.state
            .set(Charger, "/State", Value::Int(charger_state.into()));
        self.state.set(
            Charger,
            "/MppOperationMode",
            Value::Int(if matches!(pv_power, Some(p) if p > 0.0) { 2 } else { 0 }),
        );

        if let Some(v) = snapshot.status.num("pv1_input_voltage") {
            self.state.set(Charger, "/Pv/V", Value::Float(v));
        }
        if let Some(p) = pv_power {
            self.state.set(Charger, "/Yield/Power", Value::Float(p));
        }

        // source units -> kWh
        if let Some(e) = snapshot.energy.num("total_generated_energy") {
            self.state
                .set(Charger, "/Yield/User", Value::Float(e / 1000.0));
            self.state
                .set(Charger, "/Yield/System", Value::Float(e / 1000.0));
        }

        if let Some(t) = snapshot.status.num("inverter_heat_sink_temperature") {
            self.state.set(Inverter, "/Temperature", Value::Float(t));
        }
        if let Some(t) = snapshot.status.num("mppt1_charger_temperature") {
            self.state.set(Charger, "/DC/0/Temperature", Value::Float(t));
        }
    }

    fn apply_pending_updates(&mut self) {
        for (path, value) in self.pending.drain() {
            debug!("applying queued control update {} = {:?}", path, value);
            self.state.apply_update(&path, value);
        }
    }

    /// The single atomic publish point: the whole tree goes out as one
    /// batch, so readers can never mix fields from different cycles.
    fn publish_state(&mut self) {
        let inverter = self.config.inverter();
        let namespace_config = self.config.mqtt();
        let namespace = namespace_config.namespace();
        let device_id = inverter.device_id();

        let messages = self
            .state
            .snapshot()
            .into_iter()
            .map(|(group, path, value)| {
                mqtt::Message::for_attribute(namespace, &device_id, group, &path, &value)
            })
            .collect();

        self.publish_batch(messages);
    }

    fn publish_batch(&mut self, messages: Vec<mqtt::Message>) {
        if !self.config.mqtt().enabled() {
            return;
        }

        if self
            .channels
            .to_mqtt
            .send(mqtt::ChannelData::Batch(messages))
            .is_err()
        {
            warn!("send(to_mqtt) failed - channel closed?");
            return;
        }

        if let Ok(mut stats) = self.shared_stats.lock() {
            stats.batches_published += 1;
        }
    }

    // }}}

    // Control translator {{{

    /// Translate one external write into device commands. Rejections and
    /// transport failures are soft: logged, state unchanged.
    async fn handle_write(&mut self, path: &str, value: serde_json::Value) {
        info!("write request {} = {}", path, value);

        let result = match path {
            "/Settings/Reset" => {
                // Fatal on purpose: no device command, the whole service
                // shuts down and the process supervisor restarts it.
                warn!("reset requested, shutting down");
                let _ = self.channels.shutdown.send(());
                let _ = self.channels.to_coordinator.send(ChannelData::Shutdown);
                return;
            }
            "/Mode" => self.write_mode(&value).await,
            "/Settings/Charger" => self.write_charger_priority(&value).await,
            "/Settings/Output" => self.write_output_source(&value).await,
            "/Link/ChargeVoltage" => self.write_charge_voltage(&value).await,
            "/Link/ChargeCurrent" => self.write_charge_current(&value).await,
            "/Settings/UtilityChargeCurrent" => self.write_utility_charge_current(&value).await,
            _ => Err(anyhow!("path is not writable")),
        };

        match result {
            Ok(()) => {
                if let Ok(mut stats) = self.shared_stats.lock() {
                    stats.writes_accepted += 1;
                }
            }
            Err(err) => {
                warn!("rejected write {} = {}: {:#}", path, value, err);
                if let Ok(mut stats) = self.shared_stats.lock() {
                    stats.writes_rejected += 1;
                }
            }
        }
    }

    /// A mode directive maps to a fixed two-command sequence: charger
    /// priority first, then output source.
    async fn write_mode(&mut self, value: &serde_json::Value) -> Result<()> {
        let code = value
            .as_i64()
            .ok_or_else(|| anyhow!("mode must be an integer"))?;
        let directive = ModeDirective::try_from(code)
            .map_err(|_| anyhow!("mode {} not understood", code))?;

        let (priority, source) = directive.command_codes();
        info!("setting mode to {:?} (PCP {}, POP {})", directive, priority, source);

        SetChargerPriority::new(self.protocol, priority)
            .run(self.transport.as_mut())
            .await?;
        self.count_commands(1);

        SetOutputSource::new(self.protocol, source)
            .run(self.transport.as_mut())
            .await?;
        self.count_commands(1);

        // visible only after the next merge point, to keep the publish
        // atomic per cycle
        self.pending.push("/Mode", Value::Int(code));
        Ok(())
    }

    async fn write_charger_priority(&mut self, value: &serde_json::Value) -> Result<()> {
        let priority = value
            .as_u64()
            .and_then(|v| u8::try_from(v).ok())
            .ok_or_else(|| anyhow!("charger priority must be a small integer"))?;

        SetChargerPriority::new(self.protocol, priority)
            .run(self.transport.as_mut())
            .await?;
        self.count_commands(1);

        self.pending
            .push("/Settings/Charger", Value::Int(priority as i64));
        Ok(())
    }

    async fn write_output_source(&mut self, value: &serde_json::Value) -> Result<()> {
        let source = value
            .as_u64()
            .and_then(|v| u8::try_from(v).ok())
            .ok_or_else(|| anyhow!("output source must be a small integer"))?;

        SetOutputSource::new(self.protocol, source)
            .run(self.transport.as_mut())
            .await?;
        self.count_commands(1);

        self.pending
            .push("/Settings/Output", Value::Int(source as i64));
        Ok(())
    }

    async fn write_charge_voltage(&mut self, value: &serde_json::Value) -> Result<()> {
        let voltage = value
            .as_f64()
            .ok_or_else(|| anyhow!("charge voltage must be a number"))?;

        let command = SetMaxChargingVoltage::new(self.protocol, voltage);
        command.run(self.transport.as_mut()).await?;
        if self.protocol == Protocol::Pi18 {
            self.count_commands(1);
        }

        self.pending
            .push("/Link/ChargeVoltage", Value::Float(voltage));
        Ok(())
    }

    async fn write_charge_current(&mut self, value: &serde_json::Value) -> Result<()> {
        let current = value
            .as_f64()
            .ok_or_else(|| anyhow!("charge current must be a number"))?;

        SetMaxChargingCurrent::new(self.protocol, current)
            .run(self.transport.as_mut())
            .await?;
        self.count_commands(1);

        self.pending
            .push("/Link/ChargeCurrent", Value::Float(current));
        Ok(())
    }

    async fn write_utility_charge_current(&mut self, value: &serde_json::Value) -> Result<()> {
        let current = value
            .as_f64()
            .ok_or_else(|| anyhow!("utility charge current must be a number"))?;

        SetMaxUtilityChargingCurrent::new(self.protocol, current)
            .run(self.transport.as_mut())
            .await?;
        self.count_commands(1);

        self.pending
            .push("/Settings/UtilityChargeCurrent", Value::Float(current));
        Ok(())
    }

    // }}}

    fn count_commands(&self, n: u64) {
        if let Ok(mut stats) = self.shared_stats.lock() {
            stats.count_commands(n);
        }
    }
}
