//! Sensor acquisition: raw port values in, calibrated domain values out.

use crate::hw::{Level, SensorPort};

// ---------------------------------------------------------------------------
// Domain values
// ---------------------------------------------------------------------------

/// Outcome of a temperature read. A failed read is its own variant so it can
/// never be mistaken for a measurement further down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Temperature {
    Celsius(f32),
    ReadFailure,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub temperature: Temperature,
    /// 0 = driest, 100 = wettest.
    pub soil_moisture_pct: f32,
    pub raining: bool,
}

/// How soil moisture is sensed on this deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoistureSource {
    /// Capacitive probe on an ADC, calibrated by its dry and wet raw values.
    Analog { dry_raw: u16, wet_raw: u16 },
    /// Comparator module with a single wet/dry output.
    Digital { wet_level: Level },
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// Map a raw ADC sample onto 0..=100 % using the calibration endpoints.
///
/// The sample is clamped into the calibration range first, so readings past
/// either endpoint saturate at 0 or 100 instead of extrapolating. Works for
/// either orientation, though probes usually read lower when wet.
pub fn analog_to_percent(raw: u16, dry_raw: u16, wet_raw: u16) -> f32 {
    if dry_raw == wet_raw {
        return 0.0; // degenerate calibration, rejected by config validation
    }
    let lo = dry_raw.min(wet_raw);
    let hi = dry_raw.max(wet_raw);
    let raw = raw.clamp(lo, hi) as f32;
    let dry = dry_raw as f32;
    let wet = wet_raw as f32;
    ((dry - raw) * 100.0 / (dry - wet)).clamp(0.0, 100.0)
}

/// A binary module is either fully wet or fully dry.
pub fn digital_to_percent(level: Level, wet_level: Level) -> f32 {
    if level == wet_level {
        100.0
    } else {
        0.0
    }
}

// ---------------------------------------------------------------------------
// Acquisition
// ---------------------------------------------------------------------------

pub struct SensorAcquisition<S> {
    port: S,
    moisture: MoistureSource,
    rain_active_low: bool,
}

impl<S: SensorPort> SensorAcquisition<S> {
    pub fn new(port: S, moisture: MoistureSource, rain_active_low: bool) -> Self {
        Self {
            port,
            moisture,
            rain_active_low,
        }
    }

    /// Take one fresh reading of every sensor.
    pub fn read(&mut self) -> SensorReading {
        SensorReading {
            temperature: self.read_temperature(),
            soil_moisture_pct: self.read_soil_moisture(),
            raining: self.read_rain(),
        }
    }

    pub fn set_watering(&mut self, active: bool) {
        self.port.set_watering(active);
    }

    fn read_temperature(&mut self) -> Temperature {
        match self.port.temperature_c() {
            Some(t) if t.is_finite() => Temperature::Celsius(t),
            _ => Temperature::ReadFailure,
        }
    }

    fn read_soil_moisture(&mut self) -> f32 {
        match self.moisture {
            MoistureSource::Analog { dry_raw, wet_raw } => {
                analog_to_percent(self.port.soil_raw(), dry_raw, wet_raw)
            }
            MoistureSource::Digital { wet_level } => {
                digital_to_percent(self.port.soil_level(), wet_level)
            }
        }
    }

    fn read_rain(&mut self) -> bool {
        self.port.rain_level() == Level::active(self.rain_active_low)
    }

    #[cfg(test)]
    pub(crate) fn port_mut(&mut self) -> &mut S {
        &mut self.port
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::fake::FakeSensors;

    const DRY: u16 = 3500;
    const WET: u16 = 1500;

    fn analog(port: FakeSensors) -> SensorAcquisition<FakeSensors> {
        SensorAcquisition::new(
            port,
            MoistureSource::Analog {
                dry_raw: DRY,
                wet_raw: WET,
            },
            true,
        )
    }

    // -- analog_to_percent --------------------------------------------------

    #[test]
    fn analog_endpoints_map_to_bounds() {
        assert_eq!(analog_to_percent(DRY, DRY, WET), 0.0);
        assert_eq!(analog_to_percent(WET, DRY, WET), 100.0);
    }

    #[test]
    fn analog_midpoint_is_fifty() {
        assert_eq!(analog_to_percent(2500, DRY, WET), 50.0);
    }

    #[test]
    fn analog_is_linear() {
        // 25% of the way from dry to wet.
        assert_eq!(analog_to_percent(3000, DRY, WET), 25.0);
        assert_eq!(analog_to_percent(2000, DRY, WET), 75.0);
    }

    #[test]
    fn analog_below_wet_bound_saturates_at_hundred() {
        for raw in [0, 1, 500, 1000, 1499] {
            assert_eq!(analog_to_percent(raw, DRY, WET), 100.0, "raw={raw}");
        }
    }

    #[test]
    fn analog_above_dry_bound_saturates_at_zero() {
        for raw in [3501, 4000, 4095, u16::MAX] {
            assert_eq!(analog_to_percent(raw, DRY, WET), 0.0, "raw={raw}");
        }
    }

    #[test]
    fn analog_never_leaves_percent_range() {
        for raw in (0..=5000).step_by(7) {
            let pct = analog_to_percent(raw, DRY, WET);
            assert!((0.0..=100.0).contains(&pct), "raw={raw} pct={pct}");
        }
    }

    #[test]
    fn analog_inverted_probe_orientation() {
        // Probe that reads higher when wet.
        assert_eq!(analog_to_percent(1000, 1000, 3000), 0.0);
        assert_eq!(analog_to_percent(3000, 1000, 3000), 100.0);
        assert_eq!(analog_to_percent(2000, 1000, 3000), 50.0);
        assert_eq!(analog_to_percent(9000, 1000, 3000), 100.0);
    }

    #[test]
    fn analog_degenerate_calibration_is_zero() {
        assert_eq!(analog_to_percent(2000, 2000, 2000), 0.0);
    }

    // -- digital ------------------------------------------------------------

    #[test]
    fn digital_yields_only_bounds() {
        for wet_level in [Level::Low, Level::High] {
            for level in [Level::Low, Level::High] {
                let pct = digital_to_percent(level, wet_level);
                assert!(pct == 0.0 || pct == 100.0, "pct={pct}");
            }
        }
        assert_eq!(digital_to_percent(Level::Low, Level::Low), 100.0);
        assert_eq!(digital_to_percent(Level::High, Level::Low), 0.0);
    }

    #[test]
    fn digital_source_reads_module_level() {
        let mut sensors = SensorAcquisition::new(
            FakeSensors {
                soil_level: Level::Low,
                ..FakeSensors::default()
            },
            MoistureSource::Digital {
                wet_level: Level::Low,
            },
            true,
        );
        assert_eq!(sensors.read().soil_moisture_pct, 100.0);

        sensors.port_mut().soil_level = Level::High;
        assert_eq!(sensors.read().soil_moisture_pct, 0.0);
    }

    // -- temperature --------------------------------------------------------

    #[test]
    fn temperature_passes_through() {
        let mut sensors = analog(FakeSensors::default());
        assert_eq!(sensors.read().temperature, Temperature::Celsius(24.5));
    }

    #[test]
    fn temperature_no_data_is_failure() {
        let mut sensors = analog(FakeSensors {
            temperature: None,
            ..FakeSensors::default()
        });
        assert_eq!(sensors.read().temperature, Temperature::ReadFailure);
    }

    #[test]
    fn temperature_nan_is_failure() {
        let mut sensors = analog(FakeSensors {
            temperature: Some(f32::NAN),
            ..FakeSensors::default()
        });
        assert_eq!(sensors.read().temperature, Temperature::ReadFailure);
    }

    #[test]
    fn temperature_failure_leaves_other_fields_alone() {
        let mut sensors = analog(FakeSensors {
            temperature: None,
            soil_raw: 2000,
            rain_level: Level::Low,
            ..FakeSensors::default()
        });
        let reading = sensors.read();
        assert_eq!(reading.soil_moisture_pct, 75.0);
        assert!(reading.raining);
    }

    // -- rain ---------------------------------------------------------------

    #[test]
    fn rain_active_low() {
        let mut sensors = analog(FakeSensors {
            rain_level: Level::Low,
            ..FakeSensors::default()
        });
        assert!(sensors.read().raining);

        sensors.port_mut().rain_level = Level::High;
        assert!(!sensors.read().raining);
    }

    #[test]
    fn rain_active_high() {
        let mut sensors = SensorAcquisition::new(
            FakeSensors {
                rain_level: Level::High,
                ..FakeSensors::default()
            },
            MoistureSource::Digital {
                wet_level: Level::Low,
            },
            false,
        );
        assert!(sensors.read().raining);
    }
}
