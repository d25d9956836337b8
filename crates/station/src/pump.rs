//! Pump relays. Callers speak in logical on/off; the relay polarity is
//! translated here and nowhere else.

use std::fmt;

use tracing::info;

use crate::api::CommandError;
use crate::config::PumpEntry;
use crate::hw::{Level, RelayPort};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpCommand {
    On,
    Off,
}

impl PumpCommand {
    pub fn is_on(self) -> bool {
        matches!(self, PumpCommand::On)
    }
}

impl fmt::Display for PumpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => write!(f, "ON"),
            Self::Off => write!(f, "OFF"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpState {
    pub id: String,
    pub energized: bool,
}

struct Pump {
    id: String,
    gpio: u8,
    controllable: bool,
}

pub struct PumpBoard<R> {
    relays: R,
    pumps: Vec<Pump>,
    active_low: bool,
}

impl<R: RelayPort> PumpBoard<R> {
    /// Take over the relays and drive every pump to its start-up state:
    /// off, unless it is wired to run permanently.
    pub fn new(relays: R, entries: &[PumpEntry], active_low: bool) -> Self {
        let pumps = entries
            .iter()
            .map(|e| Pump {
                id: e.id.clone(),
                gpio: e.gpio,
                controllable: e.controllable,
            })
            .collect();

        let mut board = Self {
            relays,
            pumps,
            active_low,
        };

        for e in entries {
            board.drive(e.gpio, e.always_on);
            info!(
                pump = %e.id,
                gpio = e.gpio,
                controllable = e.controllable,
                on = e.always_on,
                "pump registered"
            );
        }

        board
    }

    /// Switch a pump. Repeating the current state is a no-op, not an error.
    pub fn set(&mut self, id: &str, requested: PumpCommand) -> Result<(), CommandError> {
        let pump = self
            .pumps
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| CommandError::UnknownPump(id.to_string()))?;
        if !pump.controllable {
            return Err(CommandError::NotControllable(id.to_string()));
        }

        let gpio = pump.gpio;
        self.drive(gpio, requested.is_on());
        info!(pump = %id, "pump set {requested}");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<PumpState> {
        self.pumps.iter().find(|p| p.id == id).map(|p| self.state_of(p))
    }

    /// Every pump, in configuration order.
    pub fn states(&self) -> Vec<PumpState> {
        self.pumps.iter().map(|p| self.state_of(p)).collect()
    }

    /// Whether any pump, hard-wired or not, is currently energized.
    pub fn any_energized(&self) -> bool {
        self.pumps.iter().any(|p| self.state_of(p).energized)
    }

    /// Switch off everything that accepts commands. Hard-wired pumps are left
    /// as they are.
    pub fn all_off(&mut self) {
        let gpios: Vec<u8> = self
            .pumps
            .iter()
            .filter(|p| p.controllable)
            .map(|p| p.gpio)
            .collect();
        for gpio in gpios {
            self.drive(gpio, false);
        }
        info!("controllable pumps switched off");
    }

    fn drive(&mut self, gpio: u8, on: bool) {
        let energized = Level::active(self.active_low);
        let level = if on { energized } else { energized.inverted() };
        self.relays.drive(gpio, level);
    }

    fn state_of(&self, pump: &Pump) -> PumpState {
        PumpState {
            id: pump.id.clone(),
            energized: self.relays.level(pump.gpio) == Level::active(self.active_low),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
