//! Simulated sensor board for running the station without hardware.
//!
//! Models:
//! - Soil moisture as a random walk with mean reversion and a drying drift
//! - Per-reading ADC noise and occasional spikes
//! - Diurnal (day/night) cycle on both soil and air temperature
//! - Rain showers that start and stop at random and wet the soil while
//!   they last
//! - Closed-loop watering: the soil gets wetter while any pump runs
//! - Occasional temperature sensor dropouts
//!
//! Digital outputs honour the configured polarity, so the simulator
//! exercises the same level translation the real inputs do.

use std::fmt;

use crate::config::{Config, MoistureEntry};
use crate::hw::{Level, SensorPort};

/// Largest sample the simulated ADC produces.
const ADC_MAX: f64 = 32767.0;

/// Calibration range the tuning constants below were chosen for. Soil
/// parameters scale with the configured range.
const REFERENCE_RANGE: f64 = 14000.0;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    (0..12).map(|_| fastrand::f64()).sum::<f64>() - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Simulation profiles selectable via the `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Starts mid-range and dries steadily, so the low-moisture alert
    /// arms after a while. Showers are rare.
    Drying,
    /// Hovers near the centre with low noise. Almost never rains.
    Stable,
    /// Noisy probe, frequent spikes, a temperature sensor that drops out.
    Flaky,
    /// Starts near the wet end with long, frequent showers.
    Wet,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "flaky" => Self::Flaky,
            "wet" => Self::Wet,
            _ => Self::Drying,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Flaky => write!(f, "flaky"),
            Self::Wet => write!(f, "wet"),
        }
    }
}

struct Tuning {
    /// Drift toward dry per sample, in reference ADC units.
    drift: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    noise_sigma: f64,
    spike_prob: f32,
    spike_sigma: f64,
    /// 0.0 = start at the wet endpoint, 1.0 = at the dry endpoint.
    start_frac: f64,
    rain_start_prob: f32,
    rain_stop_prob: f32,
    temp_dropout_prob: f32,
}

impl Scenario {
    fn tuning(self) -> Tuning {
        match self {
            Scenario::Drying => Tuning {
                drift: 15.0,
                walk_sigma: 150.0,
                mean_reversion: 0.02,
                noise_sigma: 80.0,
                spike_prob: 0.03,
                spike_sigma: 2000.0,
                start_frac: 0.5,
                rain_start_prob: 0.002,
                rain_stop_prob: 0.05,
                temp_dropout_prob: 0.005,
            },
            Scenario::Stable => Tuning {
                drift: 2.0,
                walk_sigma: 60.0,
                mean_reversion: 0.05,
                noise_sigma: 40.0,
                spike_prob: 0.005,
                spike_sigma: 1000.0,
                start_frac: 0.5,
                rain_start_prob: 0.0005,
                rain_stop_prob: 0.1,
                temp_dropout_prob: 0.001,
            },
            Scenario::Flaky => Tuning {
                drift: 10.0,
                walk_sigma: 250.0,
                mean_reversion: 0.02,
                noise_sigma: 200.0,
                spike_prob: 0.10,
                spike_sigma: 3000.0,
                start_frac: 0.5,
                rain_start_prob: 0.01,
                rain_stop_prob: 0.1,
                temp_dropout_prob: 0.05,
            },
            Scenario::Wet => Tuning {
                drift: 3.0,
                walk_sigma: 80.0,
                mean_reversion: 0.02,
                noise_sigma: 60.0,
                spike_prob: 0.02,
                spike_sigma: 1500.0,
                start_frac: 0.2,
                rain_start_prob: 0.02,
                rain_stop_prob: 0.02,
                temp_dropout_prob: 0.005,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub struct SimSensors {
    // Soil, in raw ADC units
    base: f64,
    offset: f64,
    raw_dry: f64,
    raw_wet: f64,
    center: f64,
    /// +1 when the dry endpoint is the larger raw value, -1 otherwise.
    dry_dir: f64,
    scale: f64,
    tuning: Tuning,
    diurnal_period_s: f64,

    // Weather and watering, wet rates in reference ADC units per sample
    raining: bool,
    rain_wet_rate: f64,
    watering: bool,
    pump_wet_rate: f64,
    temp_mean_c: f64,
    temp_swing_c: f64,

    // Wiring
    rain_active_low: bool,
    soil_wet_level: Level,
}

impl SimSensors {
    /// Build a simulator matching the station's configured calibration and
    /// input polarities.
    ///
    /// `diurnal_period_s` controls the day/night cycle length. Use 600
    /// (10 min) for fast dev iteration or 86400 for real-time.
    pub fn new(scenario: Scenario, config: &Config, diurnal_period_s: f64) -> Self {
        let (raw_dry, raw_wet, soil_wet_level) = match config.moisture {
            MoistureEntry::Analog {
                dry_raw, wet_raw, ..
            } => (f64::from(dry_raw), f64::from(wet_raw), Level::Low),
            // A digital module has no calibration; simulate an analog probe
            // behind its comparator.
            MoistureEntry::Digital { wet_level, .. } => (3500.0, 1500.0, wet_level),
        };

        let range = raw_dry - raw_wet;
        let tuning = scenario.tuning();
        let start = raw_wet + tuning.start_frac * range;

        Self {
            base: start + gaussian(0.0, range.abs() * 0.03),
            offset: gaussian(0.0, range.abs() * 0.02),
            raw_dry,
            raw_wet,
            center: (raw_dry + raw_wet) / 2.0,
            dry_dir: if range >= 0.0 { 1.0 } else { -1.0 },
            scale: range.abs() / REFERENCE_RANGE,
            tuning,
            diurnal_period_s,
            raining: false,
            rain_wet_rate: 300.0,
            watering: false,
            pump_wet_rate: 300.0,
            temp_mean_c: 24.0,
            temp_swing_c: 6.0,
            rain_active_low: config.rain.active_low,
            soil_wet_level,
        }
    }

    #[cfg(test)]
    fn set_raining(&mut self, raining: bool) {
        self.raining = raining;
    }

    /// Position in the day/night cycle, -1..=1, peaking in the "afternoon".
    fn diurnal(&self) -> f64 {
        let now_s = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        (2.0 * std::f64::consts::PI * now_s / self.diurnal_period_s).sin()
    }

    /// Advance the soil model one step and return the instantaneous raw
    /// reading.
    fn sample_soil(&mut self) -> f64 {
        let t = &self.tuning;

        let pull = t.mean_reversion * (self.center - self.base);
        let walk = gaussian(0.0, t.walk_sigma * self.scale);
        let drift = self.dry_dir * t.drift * self.scale;
        let mut wet_rate = 0.0;
        if self.raining {
            wet_rate += self.rain_wet_rate;
        }
        if self.watering {
            wet_rate += self.pump_wet_rate;
        }
        let wet = -self.dry_dir * wet_rate * self.scale;

        let lo = self.raw_dry.min(self.raw_wet);
        let hi = self.raw_dry.max(self.raw_wet);
        let margin = 500.0 * self.scale;
        self.base = (self.base + drift + pull + walk + wet).clamp(lo - margin, hi + margin);

        // Afternoon heat reads drier.
        let diurnal = self.dry_dir * (hi - lo) * 0.06 * self.diurnal();
        let noise = gaussian(0.0, t.noise_sigma * self.scale);
        let spike = if fastrand::f32() < t.spike_prob {
            gaussian(0.0, t.spike_sigma * self.scale)
        } else {
            0.0
        };

        self.base + self.offset + diurnal + noise + spike
    }

    /// Showers start and stop as a two-state Markov chain.
    fn step_weather(&mut self) {
        let flip = if self.raining {
            self.tuning.rain_stop_prob
        } else {
            self.tuning.rain_start_prob
        };
        if fastrand::f32() < flip {
            self.raining = !self.raining;
            tracing::debug!(raining = self.raining, "[sim] weather changed");
        }
    }
}

impl SensorPort for SimSensors {
    fn temperature_c(&mut self) -> Option<f32> {
        if fastrand::f32() < self.tuning.temp_dropout_prob {
            return None;
        }
        let rain_cooling = if self.raining { -3.0 } else { 0.0 };
        let t = self.temp_mean_c
            + self.temp_swing_c * self.diurnal()
            + rain_cooling
            + gaussian(0.0, 0.2);
        Some(t as f32)
    }

    fn soil_raw(&mut self) -> u16 {
        self.sample_soil().round().clamp(0.0, ADC_MAX) as u16
    }

    fn soil_level(&mut self) -> Level {
        let raw = self.sample_soil();
        let wet = (raw - self.center) * self.dry_dir < 0.0;
        if wet {
            self.soil_wet_level
        } else {
            self.soil_wet_level.inverted()
        }
    }

    fn set_watering(&mut self, active: bool) {
        if active != self.watering {
            tracing::debug!(watering = active, "[sim] watering changed");
        }
        self.watering = active;
    }

    fn rain_level(&mut self) -> Level {
        self.step_weather();
        let active = Level::active(self.rain_active_low);
        if self.raining {
            active
        } else {
            active.inverted()
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
