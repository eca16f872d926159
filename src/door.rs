use std::time::{Duration, SystemTime};

use log::{debug, error, warn};

use crate::alert::Episode;
use crate::config::DoorConfig;
use crate::door_state::{Action, DoorState};
use crate::gpio::Gpio;
use crate::Update;

/// How long the relay is held active per toggle.
const RELAY_PULSE: Duration = Duration::from_millis(200);

pub struct Door {
    pub id: String,
    pub name: String,
    pub in_sentence: String,
    pub openhab_name: Option<String>,
    relay_pin: u8,
    sensor_pin: u8,
    sensor_closed_value: bool,
    pub time_to_open: Duration,
    pub time_to_close: Duration,

    // Runtime bookkeeping, written only under the controller lock.
    pub last_action: Option<Action>,
    pub last_action_time: Option<SystemTime>,
    pub last_state: DoorState,
    pub last_state_time: SystemTime,
    pub episode: Episode,
}

impl Door {
    pub fn new(config: DoorConfig, now: SystemTime) -> Door {
        Door {
            id: config.id,
            name: config.name,
            in_sentence: config.in_sentence,
            openhab_name: config.openhab_name,
            relay_pin: config.relay_pin,
            sensor_pin: config.state_pin,
            sensor_closed_value: config.state_pin_closed_value,
            time_to_open: config.approx_time_to_open,
            time_to_close: config.approx_time_to_close,
            last_action: None,
            last_action_time: None,
            last_state: DoorState::Unknown,
            last_state_time: now,
            episode: Episode::new(now),
        }
    }

    /// Classify the door's current state. The sensor is the only ground
    /// truth: a closed reading wins over any recorded action. Everything
    /// else is inferred from the last relay action and how long ago it was.
    pub fn observe(&self, gpio: &dyn Gpio, now: SystemTime) -> DoorState {
        if self.sensor_reads_closed(gpio) {
            return DoorState::Closed;
        }
        match self.last_action {
            Some(Action::Open) => {
                if self.elapsed_since_action(now) >= self.time_to_open {
                    DoorState::Open
                } else {
                    DoorState::Opening
                }
            }
            Some(Action::Close) => {
                // Commanded closed long enough ago that it should have made
                // it, yet the sensor disagrees. Report the jam as open so
                // escalation treats it as an open door.
                if self.elapsed_since_action(now) >= self.time_to_close {
                    DoorState::Open
                } else {
                    DoorState::Closing
                }
            }
            None => DoorState::Open,
        }
    }

    /// Record the intended action and fire exactly one relay pulse. A door
    /// caught mid-transition still gets the pulse but with no recorded
    /// intent, matching the opener's own stop-or-reverse behaviour.
    pub fn toggle(&mut self, gpio: &mut dyn Gpio, now: SystemTime) {
        match self.observe(gpio, now) {
            DoorState::Open => {
                self.last_action = Some(Action::Close);
                self.last_action_time = Some(now);
            }
            DoorState::Closed => {
                self.last_action = Some(Action::Open);
                self.last_action_time = Some(now);
            }
            _ => {
                self.last_action = None;
                self.last_action_time = None;
            }
        }
        debug!("{}: recorded action {:?}", self.name, self.last_action);
        if let Err(err) = gpio.pulse_relay(self.relay_pin, RELAY_PULSE) {
            error!("{}: relay pulse failed: {}", self.name, err);
        }
    }

    pub fn update(&self) -> Update {
        Update {
            door_id: self.id.clone(),
            state: self.last_state,
            timestamp: self.last_state_time,
        }
    }

    fn sensor_reads_closed(&self, gpio: &dyn Gpio) -> bool {
        match gpio.read_sensor(self.sensor_pin) {
            Ok(level) => level == self.sensor_closed_value,
            Err(err) => {
                // A failed read must never stop the tick; assume not-closed.
                warn!("{}: sensor read failed: {}", self.name, err);
                false
            }
        }
    }

    fn elapsed_since_action(&self, now: SystemTime) -> Duration {
        self.last_action_time
            .and_then(|at| now.duration_since(at).ok())
            .unwrap_or(Duration::from_secs(0))
    }
}
