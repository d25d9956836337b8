//! Raspberry Pi backend: relays and digital inputs through rppal, soil
//! moisture through an ADS1115, air temperature from a DS18B20 on the
//! kernel's 1-Wire bus.

use anyhow::{Context, Result};
use rppal::gpio::{Gpio, InputPin, OutputPin};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use super::ads1115::{self, Ads1115};
use super::{Level, RelayPort, SensorPort};
use crate::config::{Config, MoistureEntry};

const W1_DEVICES: &str = "/sys/bus/w1/devices";
/// DS18B20 family code.
const DS18B20_PREFIX: &str = "28-";
/// What a DS18B20 reports before its first conversion after power-up.
const POWER_ON_RESET_MILLI_C: i32 = 85_000;
/// Consecutive failed conversions before the warning becomes an error.
const STALE_ESCALATE: u32 = 10;

impl From<rppal::gpio::Level> for Level {
    fn from(level: rppal::gpio::Level) -> Self {
        match level {
            rppal::gpio::Level::Low => Level::Low,
            rppal::gpio::Level::High => Level::High,
        }
    }
}

// ---------------------------------------------------------------------------
// Relays
// ---------------------------------------------------------------------------

pub struct GpioRelays {
    pins: HashMap<u8, OutputPin>,
}

impl GpioRelays {
    /// Claim every pump pin, already at the released level so no relay
    /// clicks on during start-up.
    pub fn new(config: &Config) -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut pins = HashMap::new();
        for p in &config.pumps {
            let pin = gpio
                .get(p.gpio)
                .with_context(|| format!("pump '{}': gpio {} unavailable", p.id, p.gpio))?;
            let pin = if config.relay_active_low {
                pin.into_output_high()
            } else {
                pin.into_output_low()
            };
            pins.insert(p.gpio, pin);
        }
        info!(count = pins.len(), active_low = config.relay_active_low, "relay outputs ready");
        Ok(Self { pins })
    }
}

impl RelayPort for GpioRelays {
    fn drive(&mut self, gpio: u8, level: Level) {
        match self.pins.get_mut(&gpio) {
            Some(pin) => match level {
                Level::Low => pin.set_low(),
                Level::High => pin.set_high(),
            },
            None => warn!(gpio, "drive on unclaimed relay pin"),
        }
    }

    fn level(&self, gpio: u8) -> Level {
        match self.pins.get(&gpio) {
            Some(pin) if pin.is_set_high() => Level::High,
            _ => Level::Low,
        }
    }
}

// ---------------------------------------------------------------------------
// Sensors
// ---------------------------------------------------------------------------

/// Last good ADC sample. Only exists once a conversion has succeeded, so
/// a failed read can repeat a real value but never invent one.
#[derive(Debug)]
struct HeldSample {
    value: u16,
    /// Failed conversions since `value` was taken.
    stale: u32,
}

impl HeldSample {
    fn seed(first: Result<u16>) -> Result<Self> {
        let value = first.context("initial ADS1115 read failed")?;
        Ok(Self { value, stale: 0 })
    }

    fn update(&mut self, sample: Result<u16>) -> u16 {
        match sample {
            Ok(raw) => {
                if self.stale > 0 {
                    info!(failed = self.stale, raw, "adc reads recovered");
                }
                self.value = raw;
                self.stale = 0;
            }
            Err(e) => {
                self.stale += 1;
                if self.stale >= STALE_ESCALATE {
                    error!(last = self.value, stale = self.stale, "adc read failed: {e:#}");
                } else {
                    warn!(last = self.value, stale = self.stale, "adc read failed: {e:#}");
                }
            }
        }
        self.value
    }
}

enum SoilInput {
    Adc { adc: Ads1115, held: HeldSample },
    Pin(InputPin),
}

pub struct GpioSensors {
    rain: InputPin,
    soil: SoilInput,
    w1_slave: Option<PathBuf>,
}

impl GpioSensors {
    pub fn new(config: &Config) -> Result<Self> {
        let gpio = Gpio::new()?;

        let rain = gpio
            .get(config.rain.gpio)
            .with_context(|| format!("rain: gpio {} unavailable", config.rain.gpio))?
            .into_input();

        let soil = match config.moisture {
            MoistureEntry::Analog { adc_channel, .. } => {
                let mut adc = Ads1115::new(ads1115::DEFAULT_ADDR, adc_channel)?;
                let held = HeldSample::seed(adc.read())?;
                info!(channel = adc_channel, raw = held.value, "ads1115 ready");
                SoilInput::Adc { adc, held }
            }
            MoistureEntry::Digital { gpio: pin, .. } => SoilInput::Pin(
                gpio.get(pin)
                    .with_context(|| format!("moisture: gpio {pin} unavailable"))?
                    .into_input(),
            ),
        };

        let w1_slave = match &config.temperature.w1_device {
            Some(id) => Some(Path::new(W1_DEVICES).join(id).join("w1_slave")),
            None => find_ds18b20(Path::new(W1_DEVICES)),
        };
        match &w1_slave {
            Some(path) => info!(path = %path.display(), "ds18b20 selected"),
            None => warn!("no DS18B20 found; temperature will report errors"),
        }

        Ok(Self {
            rain,
            soil,
            w1_slave,
        })
    }
}

impl SensorPort for GpioSensors {
    fn temperature_c(&mut self) -> Option<f32> {
        let path = self.w1_slave.as_ref()?;
        match fs::read_to_string(path) {
            Ok(text) => parse_w1_slave(&text),
            Err(e) => {
                warn!(path = %path.display(), "ds18b20 read failed: {e}");
                None
            }
        }
    }

    /// Digital moisture has no raw value; callers only ask in analog mode.
    fn soil_raw(&mut self) -> u16 {
        match &mut self.soil {
            SoilInput::Adc { adc, held } => held.update(adc.read()),
            SoilInput::Pin(_) => 0,
        }
    }

    fn soil_level(&mut self) -> Level {
        match &self.soil {
            SoilInput::Pin(pin) => pin.read().into(),
            SoilInput::Adc { .. } => Level::Low,
        }
    }

    fn rain_level(&mut self) -> Level {
        self.rain.read().into()
    }
}

// ---------------------------------------------------------------------------
// DS18B20
// ---------------------------------------------------------------------------

/// First `28-*` device under the 1-Wire sysfs directory.
fn find_ds18b20(devices: &Path) -> Option<PathBuf> {
    let mut ids: Vec<String> = fs::read_dir(devices)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(DS18B20_PREFIX))
        .collect();
    ids.sort();
    ids.first().map(|id| devices.join(id).join("w1_slave"))
}

/// Parse the two-line `w1_slave` report. `None` on a CRC failure, a missing
/// reading, or the power-on reset value.
fn parse_w1_slave(text: &str) -> Option<f32> {
    let mut lines = text.lines();
    if !lines.next()?.trim_end().ends_with("YES") {
        return None;
    }
    let (_, milli) = lines.next()?.split_once("t=")?;
    let milli: i32 = milli.trim().parse().ok()?;
    if milli == POWER_ON_RESET_MILLI_C {
        return None;
    }
    Some(milli as f32 / 1000.0)
}

// ===========================================================================
// Tests
// ===========================================================================
