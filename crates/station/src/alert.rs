//! Alert state tracking: a latched moisture alarm with hysteresis and an
//! edge-triggered rain monitor.
//!
//! ```text
//! moisture:  Normal ──[pct < threshold]──▶ Low ──[pct >= threshold]──▶ Normal
//!            (one notification per arrow, nothing while a side holds)
//!
//! rain:      Unknown ──▶ Raining ◀──▶ NotRaining
//!            (one notification per change, including the first sighting)
//! ```

use std::fmt;

use tracing::{info, warn};

use crate::sensors::SensorReading;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RainState {
    Raining,
    NotRaining,
    /// Nothing observed yet.
    Unknown,
}

impl From<bool> for RainState {
    fn from(raining: bool) -> Self {
        if raining {
            RainState::Raining
        } else {
            RainState::NotRaining
        }
    }
}

impl fmt::Display for RainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raining => write!(f, "raining"),
            Self::NotRaining => write!(f, "not raining"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertState {
    pub moisture_alert_latched: bool,
    pub last_rain_state: RainState,
}

impl Default for AlertState {
    fn default() -> Self {
        Self {
            moisture_alert_latched: false,
            last_rain_state: RainState::Unknown,
        }
    }
}

/// A state change worth reporting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Notification {
    MoistureLow { pct: f32 },
    MoistureNormal { pct: f32 },
    Rain(RainState),
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct AlertTracker {
    threshold: f32,
}

impl AlertTracker {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Strictly below the threshold. The threshold itself is not low.
    pub fn is_moisture_low(&self, pct: f32) -> bool {
        pct < self.threshold
    }

    /// Feed one reading through the state machine. Returns the
    /// notifications it produced, rain first, each also logged.
    pub fn observe(&self, state: &mut AlertState, reading: &SensorReading) -> Vec<Notification> {
        let mut fired = Vec::new();

        let rain = RainState::from(reading.raining);
        if rain != state.last_rain_state {
            info!(from = %state.last_rain_state, to = %rain, "rain state changed");
            state.last_rain_state = rain;
            fired.push(Notification::Rain(rain));
        }

        let pct = reading.soil_moisture_pct;
        let low = self.is_moisture_low(pct);
        if low && !state.moisture_alert_latched {
            warn!(pct = format!("{pct:.1}"), threshold = self.threshold, "soil moisture low");
            state.moisture_alert_latched = true;
            fired.push(Notification::MoistureLow { pct });
        } else if !low && state.moisture_alert_latched {
            info!(pct = format!("{pct:.1}"), threshold = self.threshold, "soil moisture back to normal");
            state.moisture_alert_latched = false;
            fired.push(Notification::MoistureNormal { pct });
        }

        fired
    }
}

// ===========================================================================
// Tests
// ===========================================================================
