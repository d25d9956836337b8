//! Hardware ports. Everything above this module reasons in logical terms
//! (raining, wet, pump on); this is where electrical levels live.
//!
//! Two backends exist: the `sim` feature provides a simulated sensor board
//! for local development, the `gpio` feature drives real pins through
//! `rppal` on a Raspberry Pi. Relays on the simulator are the in-memory
//! [`MemoryRelays`] bank.

use serde::Deserialize;
use std::collections::HashMap;

#[cfg(feature = "gpio")]
pub mod ads1115;
#[cfg(feature = "gpio")]
pub mod gpio;
#[cfg(feature = "sim")]
pub mod sim;

// ---------------------------------------------------------------------------
// Signal level
// ---------------------------------------------------------------------------

/// Electrical level of a digital pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    High,
}

impl Level {
    /// Level that represents an asserted signal under the given polarity.
    pub fn active(active_low: bool) -> Self {
        if active_low {
            Level::Low
        } else {
            Level::High
        }
    }

    pub fn inverted(self) -> Self {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Raw sensor inputs. Implementations never retry; a slow read just delays
/// the caller.
pub trait SensorPort {
    /// Air temperature in °C, or `None` when the sensor reported no data.
    fn temperature_c(&mut self) -> Option<f32>;
    /// Raw analog soil moisture sample.
    fn soil_raw(&mut self) -> u16;
    /// Level of a binary wet/dry soil moisture module.
    fn soil_level(&mut self) -> Level;
    /// Level of the rain detector output.
    fn rain_level(&mut self) -> Level;
    /// Told after each request whether any pump is running. Real sensors
    /// see the water themselves and ignore this.
    fn set_watering(&mut self, _active: bool) {}
}

/// Relay outputs, addressed by BCM GPIO number.
pub trait RelayPort {
    fn drive(&mut self, gpio: u8, level: Level);
    /// Level currently driven on `gpio`.
    fn level(&self, gpio: u8) -> Level;
}

// ---------------------------------------------------------------------------
// In-memory relay bank
// ---------------------------------------------------------------------------

/// Relay outputs with no hardware behind them. Undriven pins read low.
#[derive(Debug, Default)]
pub struct MemoryRelays {
    pins: HashMap<u8, Level>,
}

impl MemoryRelays {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RelayPort for MemoryRelays {
    fn drive(&mut self, gpio: u8, level: Level) {
        tracing::debug!(gpio, ?level, "[mock-gpio] relay driven");
        self.pins.insert(gpio, level);
    }

    fn level(&self, gpio: u8) -> Level {
        self.pins.get(&gpio).copied().unwrap_or(Level::Low)
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod fake {
    use super::{Level, SensorPort};

    /// Sensor inputs set directly by the test.
    #[derive(Debug, Clone)]
    pub(crate) struct FakeSensors {
        pub(crate) temperature: Option<f32>,
        pub(crate) soil_raw: u16,
        pub(crate) soil_level: Level,
        pub(crate) rain_level: Level,
        /// Last value passed to `set_watering`.
        pub(crate) watering: bool,
    }

    impl Default for FakeSensors {
        /// 24.5 °C, mid-range soil, dry digital module, no rain (active-low).
        fn default() -> Self {
            Self {
                temperature: Some(24.5),
                soil_raw: 2500,
                soil_level: Level::High,
                rain_level: Level::High,
                watering: false,
            }
        }
    }

    impl SensorPort for FakeSensors {
        fn temperature_c(&mut self) -> Option<f32> {
            self.temperature
        }

        fn soil_raw(&mut self) -> u16 {
            self.soil_raw
        }

        fn soil_level(&mut self) -> Level {
            self.soil_level
        }

        fn rain_level(&mut self) -> Level {
            self.rain_level
        }

        fn set_watering(&mut self, active: bool) {
            self.watering = active;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
