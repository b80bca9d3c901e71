use num_enum::IntoPrimitive;
use std::collections::BTreeMap;

/// Run-state codes for the inverter device group, as the supervisory bus
/// displays them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive)]
#[repr(i64)]
pub enum InverterState {
    Off = 0,
    LowPower = 1,
    Fault = 2,
    // passthru display state, used by the bypass-assumption workaround
    Bypass = 8,
    Inverting = 9,
}

/// Run-state codes for the charger device group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive)]
#[repr(i64)]
pub enum ChargerState {
    Off = 0,
    Fault = 2,
    Charging = 3,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Float(f64),
    Int(i64),
    Text(String),
    None,
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// JSON payload as published on the bus.
    pub fn to_payload(&self) -> String {
        match self {
            Value::Float(v) => serde_json::json!(v).to_string(),
            Value::Int(v) => serde_json::json!(v).to_string(),
            Value::Text(v) => serde_json::json!(v).to_string(),
            Value::None => "null".to_string(),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceGroup {
    Inverter,
    Charger,
}

impl std::fmt::Display for DeviceGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceGroup::Inverter => write!(f, "inverter"),
            DeviceGroup::Charger => write!(f, "charger"),
        }
    }
}

/// Accepted control writes waiting for the next publish point. Applied
/// strictly FIFO, only at the per-cycle merge, never out-of-band.
#[derive(Debug, Default)]
pub struct PendingControlUpdates {
    updates: Vec<(String, Value)>,
}

impl PendingControlUpdates {
    pub fn push(&mut self, path: &str, value: Value) {
        self.updates.push((path.to_string(), value));
    }

    pub fn drain(&mut self) -> Vec<(String, Value)> {
        std::mem::take(&mut self.updates)
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

/// The externally visible attribute tree, two device groups of path->value.
///
/// Owned and mutated exclusively by the coordinator task; readers only ever
/// see the per-cycle snapshot batch, so fields from different cycles can
/// never be mixed.
#[derive(Clone, Debug, PartialEq)]
pub struct CanonicalState {
    inverter: BTreeMap<String, Value>,
    charger: BTreeMap<String, Value>,
}

impl CanonicalState {
    /// The initial tree, every path registered up front with its default.
    pub fn new() -> Self {
        let mut inverter = BTreeMap::new();
        for path in ["/Dc/0/Voltage", "/Ac/Out/L1/V", "/Ac/Out/L1/I", "/Ac/Out/L1/P"] {
            inverter.insert(path.to_string(), Value::Int(0));
        }
        inverter.insert("/Mode".to_string(), Value::Int(0));
        inverter.insert("/State".to_string(), Value::Int(0));
        inverter.insert("/Temperature".to_string(), Value::None);
        inverter.insert("/Settings/Reset".to_string(), Value::None);
        inverter.insert("/Settings/Charger".to_string(), Value::None);
        inverter.insert("/Settings/Output".to_string(), Value::None);

        let mut charger = BTreeMap::new();
        charger.insert("/NrOfTrackers".to_string(), Value::Int(1));
        charger.insert("/Pv/V".to_string(), Value::Int(0));
        charger.insert("/Yield/Power".to_string(), Value::Int(0));
        charger.insert("/DC/0/Temperature".to_string(), Value::None);
        charger.insert("/Dc/0/Voltage".to_string(), Value::Int(0));
        charger.insert("/Dc/0/Current".to_string(), Value::Int(0));

        // external BMS-control surface
        charger.insert("/Link/NetworkMode".to_string(), Value::Int(1));
        charger.insert("/Link/BatteryCurrent".to_string(), Value::Int(0));
        charger.insert("/Link/ChargeCurrent".to_string(), Value::Int(0));
        charger.insert("/Link/ChargeVoltage".to_string(), Value::Int(0));
        charger.insert("/Link/NetworkStatus".to_string(), Value::Int(4));
        charger.insert("/Link/TemperatureSense".to_string(), Value::Int(0));
        charger.insert("/Link/TemperatureSenseActive".to_string(), Value::Int(0));
        charger.insert("/Link/VoltageSense".to_string(), Value::Int(0));
        charger.insert("/Link/VoltageSenseActive".to_string(), Value::Int(0));

        charger.insert("/Settings/Reset".to_string(), Value::None);
        charger.insert("/Settings/Charger".to_string(), Value::None);
        charger.insert("/Settings/Output".to_string(), Value::None);
        charger.insert("/Settings/BmsPresent".to_string(), Value::None);
        charger.insert("/Settings/ChargeCurrentLimit".to_string(), Value::Int(80));
        charger.insert("/Settings/UtilityChargeCurrent".to_string(), Value::None);

        charger.insert("/Yield/User".to_string(), Value::Int(0));
        charger.insert("/Yield/System".to_string(), Value::Int(0));
        charger.insert("/ErrorCode".to_string(), Value::Int(0));
        charger.insert("/State".to_string(), Value::Int(0));
        charger.insert("/Mode".to_string(), Value::Int(0));
        charger.insert("/MppOperationMode".to_string(), Value::Int(0));
        charger.insert("/Relay/0/State".to_string(), Value::None);

        Self { inverter, charger }
    }

    fn group(&self, group: DeviceGroup) -> &BTreeMap<String, Value> {
        match group {
            DeviceGroup::Inverter => &self.inverter,
            DeviceGroup::Charger => &self.charger,
        }
    }

    fn group_mut(&mut self, group: DeviceGroup) -> &mut BTreeMap<String, Value> {
        match group {
            DeviceGroup::Inverter => &mut self.inverter,
            DeviceGroup::Charger => &mut self.charger,
        }
    }

    pub fn get(&self, group: DeviceGroup, path: &str) -> Option<&Value> {
        self.group(group).get(path)
    }

    pub fn num(&self, group: DeviceGroup, path: &str) -> Option<f64> {
        self.get(group, path).and_then(Value::as_f64)
    }

    pub fn set(&mut self, group: DeviceGroup, path: &str, value: Value) {
        self.group_mut(group).insert(path.to_string(), value);
    }

    /// Apply a queued control update: it lands in every device group that
    /// carries the path (shared paths like /Mode exist in both).
    pub fn apply_update(&mut self, path: &str, value: Value) {
        let in_inverter = self.inverter.contains_key(path);
        let in_charger = self.charger.contains_key(path);
        if in_inverter || !in_charger {
            self.inverter.insert(path.to_string(), value.clone());
        }
        if in_charger || !in_inverter {
            self.charger.insert(path.to_string(), value);
        }
    }

    /// The full tree as one ordered batch, for the atomic per-cycle publish.
    pub fn snapshot(&self) -> Vec<(DeviceGroup, String, Value)> {
        let mut batch = Vec::with_capacity(self.inverter.len() + self.charger.len());
        for (path, value) in &self.inverter {
            batch.push((DeviceGroup::Inverter, path.clone(), value.clone()));
        }
        for (path, value) in &self.charger {
            batch.push((DeviceGroup::Charger, path.clone(), value.clone()));
        }
        batch
    }
}

impl Default for CanonicalState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_codes_match_the_bus_numbering() {
        assert_eq!(i64::from(InverterState::Off), 0);
        assert_eq!(i64::from(InverterState::Fault), 2);
        assert_eq!(i64::from(InverterState::Bypass), 8);
        assert_eq!(i64::from(InverterState::Inverting), 9);
        assert_eq!(i64::from(ChargerState::Charging), 3);
    }

    #[test]
    fn update_lands_in_every_group_that_carries_the_path() {
        let mut state = CanonicalState::new();

        // /Mode exists in both groups
        state.apply_update("/Mode", Value::Int(4));
        assert_eq!(state.get(DeviceGroup::Inverter, "/Mode"), Some(&Value::Int(4)));
        assert_eq!(state.get(DeviceGroup::Charger, "/Mode"), Some(&Value::Int(4)));

        // /Link/ChargeCurrent is charger-only and must stay that way
        state.apply_update("/Link/ChargeCurrent", Value::Float(60.0));
        assert_eq!(state.get(DeviceGroup::Inverter, "/Link/ChargeCurrent"), None);
        assert_eq!(
            state.get(DeviceGroup::Charger, "/Link/ChargeCurrent"),
            Some(&Value::Float(60.0))
        );
    }

    #[test]
    fn snapshot_covers_the_whole_tree() {
        let state = CanonicalState::new();
        let batch = state.snapshot();

        assert!(batch
            .iter()
            .any(|(g, p, _)| *g == DeviceGroup::Inverter && p == "/State"));
        assert!(batch
            .iter()
            .any(|(g, p, _)| *g == DeviceGroup::Charger && p == "/MppOperationMode"));

        // every inverter entry precedes every charger entry
        let first_charger = batch
            .iter()
            .position(|(g, _, _)| *g == DeviceGroup::Charger)
            .unwrap();
        assert!(batch[..first_charger]
            .iter()
            .all(|(g, _, _)| *g == DeviceGroup::Inverter));
    }

    #[test]
    fn pending_updates_drain_in_arrival_order() {
        let mut pending = PendingControlUpdates::default();
        pending.push("/Mode", Value::Int(3));
        pending.push("/Settings/Output", Value::Int(1));

        let drained = pending.drain();
        assert_eq!(drained[0].0, "/Mode");
        assert_eq!(drained[1].0, "/Settings/Output");
        assert!(pending.is_empty());
    }

    #[test]
    fn payload_encoding() {
        assert_eq!(Value::Float(52.1).to_payload(), "52.1");
        assert_eq!(Value::Int(9).to_payload(), "9");
        assert_eq!(Value::Text("Inverter".into()).to_payload(), "\"Inverter\"");
        assert_eq!(Value::None.to_payload(), "null");
    }
}
