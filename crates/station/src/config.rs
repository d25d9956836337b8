//! TOML config file loading and validation. Every field has a default; an
//! empty file describes the reference two-pump analog station.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::api::{OutputFormat, Vocabulary};
use crate::hw::Level;
use crate::sensors::MoistureSource;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Soil moisture percentage below which the low-moisture alert arms.
    #[serde(default = "default_threshold")]
    pub moisture_threshold: f32,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_web_port")]
    pub web_port: u16,
    /// Form field carrying the pump command.
    #[serde(default = "default_command_field")]
    pub command_field: String,
    #[serde(default)]
    pub vocabulary: Vocabulary,
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Many common relay boards are active-low. If yours is active-high, set false.
    #[serde(default = "default_true")]
    pub relay_active_low: bool,
    #[serde(default)]
    pub rain: RainEntry,
    #[serde(default)]
    pub moisture: MoistureEntry,
    #[serde(default)]
    pub temperature: TemperatureEntry,
    #[serde(default = "default_pumps")]
    pub pumps: Vec<PumpEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RainEntry {
    pub gpio: u8,
    #[serde(default = "default_true")]
    pub active_low: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MoistureEntry {
    Analog {
        dry_raw: u16,
        wet_raw: u16,
        #[serde(default)]
        adc_channel: u8,
    },
    Digital {
        gpio: u8,
        #[serde(default = "default_wet_level")]
        wet_level: Level,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemperatureEntry {
    /// 1-Wire device id (`28-...`). The first DS18B20 found is used when unset.
    pub w1_device: Option<String>,
    /// Data pin of the kernel's `w1-gpio` overlay.
    #[serde(default = "default_w1_gpio")]
    pub w1_gpio: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PumpEntry {
    pub id: String,
    pub gpio: u8,
    #[serde(default = "default_true")]
    pub controllable: bool,
    /// Hard-wired to run permanently. Such a pump cannot be controllable.
    #[serde(default)]
    pub always_on: bool,
}

fn default_threshold() -> f32 {
    30.0
}

fn default_tick_ms() -> u64 {
    1000
}

fn default_web_port() -> u16 {
    8080
}

fn default_command_field() -> String {
    "acao".to_string()
}

fn default_true() -> bool {
    true
}

fn default_w1_gpio() -> u8 {
    4
}

fn default_wet_level() -> Level {
    Level::Low
}

fn default_pumps() -> Vec<PumpEntry> {
    vec![
        PumpEntry {
            id: "bomba1".into(),
            gpio: 23,
            controllable: true,
            always_on: false,
        },
        PumpEntry {
            id: "bomba2".into(),
            gpio: 19,
            controllable: true,
            always_on: false,
        },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            moisture_threshold: default_threshold(),
            tick_ms: default_tick_ms(),
            web_port: default_web_port(),
            command_field: default_command_field(),
            vocabulary: Vocabulary::default(),
            output_format: OutputFormat::default(),
            relay_active_low: true,
            rain: RainEntry::default(),
            moisture: MoistureEntry::default(),
            temperature: TemperatureEntry::default(),
            pumps: default_pumps(),
        }
    }
}

impl Default for RainEntry {
    fn default() -> Self {
        Self {
            gpio: 13,
            active_low: true,
        }
    }
}

impl Default for TemperatureEntry {
    fn default() -> Self {
        Self {
            w1_device: None,
            w1_gpio: default_w1_gpio(),
        }
    }
}

impl Default for MoistureEntry {
    fn default() -> Self {
        MoistureEntry::Analog {
            dry_raw: 3500,
            wet_raw: 1500,
            adc_channel: 0,
        }
    }
}

impl MoistureEntry {
    /// The sensing modality, without the wiring details.
    pub fn source(&self) -> MoistureSource {
        match *self {
            MoistureEntry::Analog {
                dry_raw, wet_raw, ..
            } => MoistureSource::Analog { dry_raw, wet_raw },
            MoistureEntry::Digital { wet_level, .. } => MoistureSource::Digital { wet_level },
        }
    }
}

impl Config {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: std::ops::RangeInclusive<u8> = 2..=27;

/// Maximum single-ended reading from the ADS1115 (15-bit unsigned).
const ADS1115_MAX: u16 = 32767;

/// Highest single-ended ADS1115 input (AIN0..AIN3).
const ADS1115_MAX_CHANNEL: u8 = 3;

/// Path segments already taken by other routes, and the fixed keys of the
/// status object a pump id would collide with.
const RESERVED_PUMP_IDS: &[&str] = &["status", "temperatura", "umidadeSolo", "chuva", "alerta"];

/// BCM pins of I2C bus 1, used by the ADS1115.
const I2C_SDA: u8 = 2;
const I2C_SCL: u8 = 3;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate the whole config. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_general(&mut errors);
        self.validate_moisture(&mut errors);
        self.validate_pumps(&mut errors);
        self.validate_pins(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_general(&self, errors: &mut Vec<String>) {
        if !(0.0..=100.0).contains(&self.moisture_threshold) {
            errors.push(format!(
                "moisture_threshold {} out of range [0, 100]",
                self.moisture_threshold
            ));
        }
        if self.tick_ms == 0 {
            errors.push("tick_ms must be positive".to_string());
        }
        if self.command_field.trim().is_empty() {
            errors.push("command_field is empty".to_string());
        }
        if let Some(id) = &self.temperature.w1_device {
            if !id.starts_with("28-") || id.contains('/') {
                errors.push(format!(
                    "temperature: w1_device '{id}' is not a DS18B20 id (28-...)"
                ));
            }
        }
    }

    fn validate_moisture(&self, errors: &mut Vec<String>) {
        if let MoistureEntry::Analog {
            dry_raw,
            wet_raw,
            adc_channel,
        } = self.moisture
        {
            if dry_raw > ADS1115_MAX {
                errors.push(format!(
                    "moisture: dry_raw {dry_raw} out of ADS1115 range [0, {ADS1115_MAX}]"
                ));
            }
            if wet_raw > ADS1115_MAX {
                errors.push(format!(
                    "moisture: wet_raw {wet_raw} out of ADS1115 range [0, {ADS1115_MAX}]"
                ));
            }
            if dry_raw == wet_raw {
                errors.push(format!(
                    "moisture: dry_raw and wet_raw are both {dry_raw}; calibration range is zero"
                ));
            }
            if adc_channel > ADS1115_MAX_CHANNEL {
                errors.push(format!(
                    "moisture: adc_channel {adc_channel} out of range (0-{ADS1115_MAX_CHANNEL})"
                ));
            }
        }
    }

    fn validate_pumps(&self, errors: &mut Vec<String>) {
        if self.pumps.is_empty() {
            errors.push("at least one pump must be configured".to_string());
        }

        let mut seen_ids: HashSet<&str> = HashSet::new();

        for (i, p) in self.pumps.iter().enumerate() {
            let ctx = || {
                if p.id.is_empty() {
                    format!("pumps[{i}]")
                } else {
                    format!("pump '{}'", p.id)
                }
            };

            // ── Identity ────────────────────────────────────────
            if p.id.trim().is_empty() {
                errors.push(format!("{}: id is empty", ctx()));
            } else if !seen_ids.insert(&p.id) {
                errors.push(format!("{}: duplicate id", ctx()));
            } else if !p
                .id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                errors.push(format!(
                    "{}: id may only contain letters, digits, '-' and '_'",
                    ctx()
                ));
            } else if RESERVED_PUMP_IDS.contains(&p.id.as_str()) {
                errors.push(format!("{}: id is reserved", ctx()));
            }

            // ── Wiring ──────────────────────────────────────────
            if p.always_on && p.controllable {
                errors.push(format!(
                    "{}: always_on pump cannot be controllable",
                    ctx()
                ));
            }
        }
    }

    /// Every GPIO in use must be on the header and claimed only once.
    fn validate_pins(&self, errors: &mut Vec<String>) {
        let mut claims: Vec<(String, u8)> = vec![
            ("rain".to_string(), self.rain.gpio),
            ("temperature (1-Wire)".to_string(), self.temperature.w1_gpio),
        ];
        match self.moisture {
            MoistureEntry::Digital { gpio, .. } => claims.push(("moisture".to_string(), gpio)),
            MoistureEntry::Analog { .. } => {
                claims.push(("moisture ADC (I2C SDA)".to_string(), I2C_SDA));
                claims.push(("moisture ADC (I2C SCL)".to_string(), I2C_SCL));
            }
        }
        for p in &self.pumps {
            claims.push((format!("pump '{}'", p.id), p.gpio));
        }

        let mut seen_pins: HashSet<u8> = HashSet::new();
        for (owner, gpio) in &claims {
            if !VALID_GPIO_PINS.contains(gpio) {
                errors.push(format!(
                    "{owner}: gpio {gpio} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            } else if !seen_pins.insert(*gpio) {
                errors.push(format!("{owner}: gpio {gpio} is already in use"));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    parse(&contents).with_context(|| format!("invalid config: {}", path.display()))
}

/// Parse and validate TOML text.
pub fn parse(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents).context("failed to parse config")?;
    config.validate()?;
    Ok(config)
}

/// Config named by `CONFIG_PATH`, else `config.toml` if present, else the
/// built-in defaults. `WEB_PORT` overrides the listening port.
pub fn from_env() -> Result<Config> {
    from_vars(
        std::env::var("CONFIG_PATH").ok().as_deref(),
        std::env::var("WEB_PORT").ok().as_deref(),
        Path::new("."),
    )
}

/// `from_env` with the variables and working directory passed in. A
/// relative `config_path` is taken as given, not joined to `cwd`.
fn from_vars(config_path: Option<&str>, web_port: Option<&str>, cwd: &Path) -> Result<Config> {
    let fallback = cwd.join("config.toml");
    let mut config = match config_path {
        Some(path) => load(path)?,
        None if fallback.exists() => load(&fallback)?,
        None => {
            tracing::info!("no config file, using built-in defaults");
            Config::default()
        }
    };

    match web_port.map(|s| s.trim().parse::<u16>()) {
        Some(Ok(port)) => config.web_port = port,
        Some(Err(_)) => tracing::warn!(
            value = web_port.unwrap_or_default(),
            port = config.web_port,
            "ignoring unparsable WEB_PORT"
        ),
        None => {}
    }

    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
