use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use rppal::gpio::{Gpio as RppalGpio, InputPin, Level, OutputPin};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("GPIO unavailable: {0}")]
    Unavailable(String),
    #[error("pin {0} is not configured")]
    UnknownPin(u8),
}

/// Hardware capability consumed by the door logic. Implementations own the
/// pins; callers only see logical pin numbers and levels.
pub trait Gpio: Send {
    fn read_sensor(&self, pin: u8) -> Result<bool, GpioError>;
    fn pulse_relay(&mut self, pin: u8, duration: Duration) -> Result<(), GpioError>;
}

/// Raspberry Pi pins via rppal. Sensor pins are inputs with the internal
/// pull-up enabled; relay pins are active-low outputs held high when idle.
pub struct RaspberryPi {
    sensors: HashMap<u8, InputPin>,
    relays: HashMap<u8, OutputPin>,
}

impl RaspberryPi {
    pub fn new(sensor_pins: &[u8], relay_pins: &[u8]) -> rppal::gpio::Result<RaspberryPi> {
        let gpio = RppalGpio::new()?;
        let mut sensors = HashMap::new();
        for &pin in sensor_pins {
            sensors.insert(pin, gpio.get(pin)?.into_input_pullup());
        }
        let mut relays = HashMap::new();
        for &pin in relay_pins {
            let mut relay = gpio.get(pin)?.into_output();
            relay.set_high();
            relays.insert(pin, relay);
        }
        Ok(RaspberryPi { sensors, relays })
    }
}

impl Gpio for RaspberryPi {
    fn read_sensor(&self, pin: u8) -> Result<bool, GpioError> {
        let sensor = self.sensors.get(&pin).ok_or(GpioError::UnknownPin(pin))?;
        Ok(sensor.read() == Level::High)
    }

    fn pulse_relay(&mut self, pin: u8, duration: Duration) -> Result<(), GpioError> {
        let relay = self.relays.get_mut(&pin).ok_or(GpioError::UnknownPin(pin))?;
        relay.set_low();
        thread::sleep(duration);
        relay.set_high();
        Ok(())
    }
}

/// Stand-in used when the GPIO peripheral could not be acquired, so the
/// server can still run off-device. Every operation fails; the door logic
/// treats failed sensor reads as "not closed".
pub struct Disconnected(pub String);

impl Gpio for Disconnected {
    fn read_sensor(&self, _pin: u8) -> Result<bool, GpioError> {
        Err(GpioError::Unavailable(self.0.clone()))
    }

    fn pulse_relay(&mut self, _pin: u8, _duration: Duration) -> Result<(), GpioError> {
        Err(GpioError::Unavailable(self.0.clone()))
    }
}

#[cfg(test)]
pub(crate) use fake::FakeGpio;
