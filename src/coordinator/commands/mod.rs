pub mod identify;
pub mod set_charger_priority;
pub mod set_max_charging_current;
pub mod set_max_charging_voltage;
pub mod set_max_utility_charging_current;
pub mod set_output_source;

pub use identify::Identify;
pub use set_charger_priority::SetChargerPriority;
pub use set_max_charging_current::SetMaxChargingCurrent;
pub use set_max_charging_voltage::SetMaxChargingVoltage;
pub use set_max_utility_charging_current::SetMaxUtilityChargingCurrent;
pub use set_output_source::SetOutputSource;
