//! Board access through Raspberry Pi GPIO and SPI (rppal).

use std::time::Duration;

use rppal::gpio::{Gpio, InputPin, OutputPin};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use timeswipe_traits::{BoxError, Bridge, ButtonSource, RawRow, SensorFrontend};
use tracing::{debug, trace};

use crate::bus::{self, CHUNK_BYTES, byte_from_levels, chunk_to_row};
use crate::command::{self, get_command, parse_answer, set_command};
use crate::error::{HwError, Result};
use crate::util::wait_until_ready_with_timeout;

const SPI_CLOCK_HZ: u32 = 500_000;
const ANSWER_BYTES: usize = 64;
const PI_OK_POLL: Duration = Duration::from_micros(50);
/// Time the board controller needs to act on a routing or enable command.
const COMMAND_SETTLE: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioPins {
    pub data: [u8; 8],
    pub clock: u8,
    pub pi_ok: u8,
    pub fail: u8,
    pub reset: u8,
}

impl Default for GpioPins {
    fn default() -> Self {
        Self {
            data: bus::pins::DATA,
            clock: bus::pins::CLOCK,
            pi_ok: bus::pins::PI_OK,
            fail: bus::pins::FAIL,
            reset: bus::pins::RESET,
        }
    }
}

pub struct GpioFrontend {
    data: Vec<InputPin>,
    clock: OutputPin,
    _reset: OutputPin,
    pi_ok: InputPin,
    fail: InputPin,
    spi: Spi,
}

fn gpio_err(e: rppal::gpio::Error) -> HwError {
    HwError::Gpio(e.to_string())
}

fn spi_err(e: rppal::spi::Error) -> HwError {
    HwError::Spi(e.to_string())
}

impl GpioFrontend {
    pub fn open(pins: &GpioPins) -> Result<Self> {
        let gpio = Gpio::new().map_err(gpio_err)?;
        let input = |pin: u8| gpio.get(pin).map(|p| p.into_input()).map_err(gpio_err);
        let output = |pin: u8| gpio.get(pin).map(|p| p.into_output()).map_err(gpio_err);

        let data = pins
            .data
            .iter()
            .map(|&p| input(p))
            .collect::<Result<Vec<_>>>()?;
        let mut clock = output(pins.clock)?;
        let mut reset = output(pins.reset)?;
        clock.set_low();
        reset.set_high();

        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, SPI_CLOCK_HZ, Mode::Mode0)
            .map_err(spi_err)?;
        debug!(?pins, "board bus opened");
        Ok(Self {
            data,
            clock,
            _reset: reset,
            pi_ok: input(pins.pi_ok)?,
            fail: input(pins.fail)?,
            spi,
        })
    }

    fn send(&mut self, cmd: &str) -> Result<String> {
        self.spi.write(cmd.as_bytes()).map_err(spi_err)?;
        let mut buf = [0u8; ANSWER_BYTES];
        let n = self.spi.read(&mut buf).map_err(spi_err)?;
        let text = String::from_utf8_lossy(&buf[..n]);
        let ans = parse_answer(&text)?.to_string();
        trace!(cmd = cmd.trim_end(), ans, "spi command");
        Ok(ans)
    }

    fn read_byte(&mut self) -> u8 {
        self.clock.set_high();
        std::hint::spin_loop();
        self.clock.set_low();
        std::hint::spin_loop();
        let mut levels = [false; 8];
        for (level, pin) in levels.iter_mut().zip(&self.data) {
            *level = pin.is_high();
        }
        byte_from_levels(levels)
    }
}

impl SensorFrontend for GpioFrontend {
    fn read_channels(&mut self, timeout: Duration) -> std::result::Result<RawRow, BoxError> {
        if self.fail.is_high() {
            return Err(Box::new(HwError::FailLine));
        }
        let pi_ok = &self.pi_ok;
        wait_until_ready_with_timeout(|| pi_ok.is_high(), timeout, PI_OK_POLL)?;
        let mut chunk = [0u8; CHUNK_BYTES];
        for byte in &mut chunk {
            *byte = self.read_byte();
        }
        Ok(chunk_to_row(&chunk))
    }

    fn select_bridge(&mut self, bridge: Bridge) -> std::result::Result<(), BoxError> {
        self.send(&set_command(command::BRIDGE, bridge.as_i64()))?;
        std::thread::sleep(COMMAND_SETTLE);
        Ok(())
    }

    fn set_measuring(&mut self, on: bool) -> std::result::Result<(), BoxError> {
        if on {
            // Toggle off first so the controller restarts conversions cleanly.
            self.send(&set_command(command::ENABLE_AD_MES, 0))?;
            std::thread::sleep(COMMAND_SETTLE);
        } else {
            self.clock.set_low();
        }
        let value = u8::from(on).to_string();
        self.send(&set_command(command::ENABLE_AD_MES, &value))?;
        if on {
            let ans = self.send(&get_command(command::ENABLE_AD_MES))?;
            command::check_readback(command::ENABLE_AD_MES, &value, &ans)?;
        }
        Ok(())
    }
}

pub struct GpioButton {
    pin: InputPin,
    active_low: bool,
}

impl GpioButton {
    pub fn open(pin: u8, active_low: bool) -> Result<Self> {
        let gpio = Gpio::new().map_err(gpio_err)?;
        let pin = gpio.get(pin).map_err(gpio_err)?.into_input();
        Ok(Self { pin, active_low })
    }
}

impl ButtonSource for GpioButton {
    fn is_pressed(&mut self) -> bool {
        self.pin.is_high() != self.active_low
    }
}
