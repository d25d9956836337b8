//! Status and pump-command handlers. Transport-agnostic: `web` turns HTTP
//! into calls on these functions, the control loop runs them.
//!
//! The JSON vocabulary (keys, status words, alert phrases) is the one the
//! deployed dashboards already read.

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

use tracing::warn;

use crate::control::Station;
use crate::hw::{RelayPort, SensorPort};
use crate::pump::PumpCommand;
use crate::sensors::Temperature;

pub const TEMPERATURE_ERROR_MARKER: &str = "Erro";
pub const RAIN_ALERT: &str = "Alerta: Está chovendo. ";
pub const MOISTURE_LOW_ALERT: &str = "Alerta: Umidade do solo baixa. ";

const RAINING: &str = "Chovendo";
const NOT_RAINING: &str = "Sem chuva";
const PUMP_ON: &str = "ligada";
const PUMP_OFF: &str = "desligada";

// ---------------------------------------------------------------------------
// Deployment choices
// ---------------------------------------------------------------------------

/// Command tokens accepted by the pump endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vocabulary {
    /// `on` / `off`
    #[default]
    OnOff,
    /// `1` / `0`
    OneZero,
}

impl Vocabulary {
    /// Parse a command token. Only the exact tokens are accepted.
    pub fn parse(self, token: &str) -> Option<PumpCommand> {
        match (self, token) {
            (Vocabulary::OnOff, "on") | (Vocabulary::OneZero, "1") => Some(PumpCommand::On),
            (Vocabulary::OnOff, "off") | (Vocabulary::OneZero, "0") => Some(PumpCommand::Off),
            _ => None,
        }
    }

    fn tokens(self) -> &'static str {
        match self {
            Vocabulary::OnOff => "on/off",
            Vocabulary::OneZero => "1/0",
        }
    }
}

/// How pump states are rendered in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// `"ligada"` / `"desligada"`
    #[default]
    Word,
    /// `true` / `false`
    Bool,
    /// `1` / `0`
    Int,
}

impl OutputFormat {
    pub fn encode(self, energized: bool) -> StateField {
        match self {
            OutputFormat::Word => StateField::Word(if energized { PUMP_ON } else { PUMP_OFF }),
            OutputFormat::Bool => StateField::Flag(energized),
            OutputFormat::Int => StateField::Level(u8::from(energized)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StateField {
    Word(&'static str),
    Flag(bool),
    Level(u8),
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The command field was absent.
    MissingParameter,
    /// The command field held a token outside the vocabulary.
    InvalidCommand(String),
    /// The pump is hard-wired and takes no commands.
    NotControllable(String),
    /// No pump with this id.
    UnknownPump(String),
}

impl CommandError {
    /// Stable machine-readable reason.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingParameter => "missing_parameter",
            Self::InvalidCommand(_) => "invalid_command",
            Self::NotControllable(_) => "not_controllable",
            Self::UnknownPump(_) => "unknown_pump",
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingParameter => write!(f, "command parameter is missing"),
            Self::InvalidCommand(token) => write!(f, "unrecognised command '{token}'"),
            Self::NotControllable(id) => write!(f, "pump '{id}' is not remotely controllable"),
            Self::UnknownPump(id) => write!(f, "no pump named '{id}'"),
        }
    }
}

impl std::error::Error for CommandError {}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TemperatureField {
    Celsius(f64),
    Error(&'static str),
}

/// Body of `GET /status`. Serialises as a flat object with one key per pump,
/// in configuration order.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub temperature: TemperatureField,
    pub soil_moisture_pct: f64,
    pub rain: &'static str,
    pub pumps: Vec<(String, StateField)>,
    pub alert: String,
}

impl Serialize for StatusReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(4 + self.pumps.len()))?;
        map.serialize_entry("temperatura", &self.temperature)?;
        map.serialize_entry("umidadeSolo", &self.soil_moisture_pct)?;
        map.serialize_entry("chuva", self.rain)?;
        for (id, state) in &self.pumps {
            map.serialize_entry(id, state)?;
        }
        map.serialize_entry("alerta", &self.alert)?;
        map.end()
    }
}

/// Body of a successful pump command: `{"<pump_id>": <state>}`.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEcho {
    pub pump_id: String,
    pub state: StateField,
}

impl Serialize for CommandEcho {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.pump_id, &self.state)?;
        map.end()
    }
}

/// Round to one decimal place, widening first so the JSON shows `23.4`
/// rather than the nearest f32 expansion.
fn one_decimal(v: f32) -> f64 {
    (f64::from(v) * 10.0).round() / 10.0
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Take a fresh reading and report it with every pump's state and the
/// currently active alerts. A temperature failure is reported inline.
pub fn status<S: SensorPort, R: RelayPort>(station: &mut Station<S, R>) -> StatusReport {
    let reading = station.sensors.read();
    let format = station.config.output_format;

    let temperature = match reading.temperature {
        Temperature::Celsius(t) => TemperatureField::Celsius(one_decimal(t)),
        Temperature::ReadFailure => {
            warn!("temperature read failed");
            TemperatureField::Error(TEMPERATURE_ERROR_MARKER)
        }
    };

    let mut alert = String::new();
    if reading.raining {
        alert.push_str(RAIN_ALERT);
    }
    if station.tracker.is_moisture_low(reading.soil_moisture_pct) {
        alert.push_str(MOISTURE_LOW_ALERT);
    }

    StatusReport {
        temperature,
        soil_moisture_pct: one_decimal(reading.soil_moisture_pct),
        rain: if reading.raining { RAINING } else { NOT_RAINING },
        pumps: station
            .pumps
            .states()
            .into_iter()
            .map(|p| (p.id, format.encode(p.energized)))
            .collect(),
        alert,
    }
}

/// Validate and apply a pump command. `token` is the raw command field, if
/// the request carried one.
pub fn command<S: SensorPort, R: RelayPort>(
    station: &mut Station<S, R>,
    pump_id: &str,
    token: Option<&str>,
) -> Result<CommandEcho, CommandError> {
    if station.pumps.get(pump_id).is_none() {
        return Err(CommandError::UnknownPump(pump_id.to_string()));
    }

    let token = token.ok_or(CommandError::MissingParameter)?;
    let vocabulary = station.config.vocabulary;
    let requested = vocabulary.parse(token).ok_or_else(|| {
        warn!(pump = %pump_id, token, expected = vocabulary.tokens(), "invalid pump command");
        CommandError::InvalidCommand(token.to_string())
    })?;

    station.pumps.set(pump_id, requested)?;

    let energized = station
        .pumps
        .get(pump_id)
        .map(|p| p.energized)
        .unwrap_or(requested.is_on());

    Ok(CommandEcho {
        pump_id: pump_id.to_string(),
        state: station.config.output_format.encode(energized),
    })
}

// ===========================================================================
// Tests
// ===========================================================================
