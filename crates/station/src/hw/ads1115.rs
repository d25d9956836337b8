//! ADS1115 16-bit ADC on I2C bus 1, read one single-ended input at a time.
//!
//! PGA ±4.096 V, 128 SPS, single-shot. A capacitive probe powered from
//! 3.3 V stays well inside the positive half of the range.

use anyhow::{ensure, Result};
use rppal::i2c::I2c;
use std::{thread, time::Duration};

/// Factory address with ADDR tied to GND.
pub const DEFAULT_ADDR: u16 = 0x48;

const REG_CONVERSION: u8 = 0x00;
const REG_CONFIG: u8 = 0x01;

// Config register, MSB first:
//   [15] OS  [14:12] MUX  [11:9] PGA  [8] MODE  [7:5] DR  [4:0] comparator
//
// OS=1 (start), PGA=001 (±4.096 V), MODE=1 (single-shot), DR=100 (128 SPS),
// COMP_QUE=11 (comparator off). MUX is filled in per channel.
const CONFIG_BASE: u16 = 0b1_000_001_1_100_0_0_0_11;

const MUX_SHIFT: u16 = 12;
/// AINx vs GND is MUX=1xx.
const MUX_SINGLE_ENDED: u16 = 0b100;

const MAX_CHANNEL: u8 = 3;

/// One conversion at 128 SPS takes ~7.8 ms.
const CONVERSION_WAIT: Duration = Duration::from_millis(9);
const READY_POLLS: usize = 3;
/// Reads back as 1 once the conversion is done.
const OS_READY_BIT: u16 = 1 << 15;

fn config_word(channel: u8) -> u16 {
    CONFIG_BASE | ((MUX_SINGLE_ENDED | u16::from(channel)) << MUX_SHIFT)
}

/// Single-ended results are never negative; a negative code means noise
/// around 0 V or a corrupted transfer.
fn decode(bytes: [u8; 2]) -> u16 {
    i16::from_be_bytes(bytes).max(0) as u16
}

pub struct Ads1115 {
    i2c: I2c,
    channel: u8,
}

impl Ads1115 {
    pub fn new(addr: u16, channel: u8) -> Result<Self> {
        ensure!(
            channel <= MAX_CHANNEL,
            "ADS1115 channel {channel} out of range (0-{MAX_CHANNEL})"
        );

        let mut i2c = I2c::new()?;
        i2c.set_slave_address(addr)?;

        tracing::info!(
            addr = format_args!("0x{addr:02x}"),
            channel,
            "ads1115 initialised"
        );

        Ok(Self { i2c, channel })
    }

    /// Blocking single-shot conversion on the configured input.
    pub fn read(&mut self) -> Result<u16> {
        self.i2c
            .block_write(REG_CONFIG, &config_word(self.channel).to_be_bytes())?;
        thread::sleep(CONVERSION_WAIT);

        for _ in 0..READY_POLLS {
            let mut status = [0u8; 2];
            self.i2c.block_read(REG_CONFIG, &mut status)?;
            if u16::from_be_bytes(status) & OS_READY_BIT != 0 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }

        let mut result = [0u8; 2];
        self.i2c.block_read(REG_CONVERSION, &mut result)?;
        Ok(decode(result))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
