use std::time::SystemTime;

use log::{info, warn};

use crate::alert::{self, Alert, AlertParams};
use crate::broker::{LongPoll, NotificationBroker, ObserverId};
use crate::config::Config;
use crate::gpio::Gpio;
use crate::{Door, DoorState, Update};

/// Work the tick loop hands to the dispatcher thread so network calls
/// never run under the controller lock.
#[derive(Debug, PartialEq)]
pub enum Dispatch {
    Alert {
        door_id: String,
        title: String,
        body: String,
    },
    Mirror {
        item: String,
        state: DoorState,
    },
}

/// One door's row in the status page and config endpoint.
#[derive(Clone, Debug)]
pub struct DoorStatus {
    pub id: String,
    pub name: String,
    pub state: DoorState,
    pub timestamp: SystemTime,
}

/// Owns every door, the GPIO handle and the long-poll registry. The server
/// wraps it in a single mutex; everything here assumes it is the only
/// writer.
pub struct Controller {
    doors: Vec<Door>,
    gpio: Box<dyn Gpio>,
    params: AlertParams,
    alerts_enabled: bool,
    mirror_enabled: bool,
    broker: NotificationBroker,
}

impl Controller {
    pub fn new(config: &Config, gpio: Box<dyn Gpio>, now: SystemTime) -> Controller {
        Controller {
            doors: config
                .doors
                .iter()
                .cloned()
                .map(|door| Door::new(door, now))
                .collect(),
            gpio,
            params: AlertParams {
                time_to_wait: config.alerts.time_to_wait,
                repeat_interval: config.alerts.repeat_interval,
            },
            alerts_enabled: config.alerts.enabled,
            mirror_enabled: config.openhab.is_some(),
            broker: NotificationBroker::new(),
        }
    }

    /// One poll pass over every door: observe, record transitions, decide
    /// alerts, and resolve parked observers. Returns the side effects for
    /// the dispatcher; nothing here touches the network.
    pub fn tick(&mut self, now: SystemTime) -> Vec<Dispatch> {
        let mut jobs = Vec::new();
        let mut changed = Vec::new();
        for door in &mut self.doors {
            let state = door.observe(&*self.gpio, now);
            if state != door.last_state {
                info!("{}: {} => {}", door.name, door.last_state, state);
                // An episode spans from leaving closed until the sensor
                // confirms closed again; transitions within the open side
                // (opening => open) must not restart it.
                if matches!(door.last_state, DoorState::Closed | DoorState::Unknown)
                    && state != DoorState::Closed
                {
                    door.episode.reset(now);
                }
                door.last_state = state;
                door.last_state_time = now;
                changed.push(door.update());
                if self.mirror_enabled && !state.is_transient() {
                    if let Some(item) = &door.openhab_name {
                        jobs.push(Dispatch::Mirror {
                            item: item.clone(),
                            state,
                        });
                    }
                }
            }
            if let Some(alert) =
                alert::evaluate(state, door.time_to_open, &door.episode, &self.params, now)
            {
                // Bookkeeping happens regardless so a later enable does not
                // replay the whole backlog of missed alerts.
                door.episode.note_alert(&alert, now);
                if self.alerts_enabled {
                    info!(
                        "{}: alert, open for {}",
                        door.name,
                        alert::format_seconds(alert.open_for())
                    );
                    jobs.push(alert_dispatch(door, &alert));
                }
            }
            if state == DoorState::Closed {
                door.episode.reset(now);
            }
        }
        if !changed.is_empty() {
            self.broker.publish(&changed);
        }
        jobs
    }

    /// Pulse the named door's relay. Unknown ids are logged and dropped so
    /// a stale browser tab cannot make anything move.
    pub fn toggle(&mut self, door_id: &str, now: SystemTime) -> bool {
        match self.doors.iter_mut().find(|door| door.id == door_id) {
            Some(door) => {
                info!("{}: toggle requested", door.name);
                door.toggle(&mut *self.gpio, now);
                true
            }
            None => {
                warn!("toggle for unknown door id {:?}", door_id);
                false
            }
        }
    }

    /// Doors whose last recorded change is at or past `watermark`, in
    /// config order.
    pub fn updates_since(&self, watermark: SystemTime) -> Vec<Update> {
        self.doors
            .iter()
            .filter(|door| door.last_state_time >= watermark)
            .map(Door::update)
            .collect()
    }

    pub fn snapshot(&self) -> Vec<DoorStatus> {
        self.doors
            .iter()
            .map(|door| DoorStatus {
                id: door.id.clone(),
                name: door.name.clone(),
                state: door.last_state,
                timestamp: door.last_state_time,
            })
            .collect()
    }

    /// Answer immediately when updates already exist past the watermark,
    /// otherwise park an observer. Both halves run under the controller
    /// lock, so no update can fall between the check and the parking.
    pub fn register_long_poll(&mut self, watermark: SystemTime) -> LongPoll {
        let updates = self.updates_since(watermark);
        if updates.is_empty() {
            LongPoll::Pending(self.broker.register())
        } else {
            LongPoll::Ready(updates)
        }
    }

    pub fn expire_long_poll(&mut self, id: ObserverId) -> bool {
        self.broker.expire(id)
    }

    #[cfg(test)]
    fn door(&self, door_id: &str) -> Option<&Door> {
        self.doors.iter().find(|door| door.id == door_id)
    }
}

fn alert_dispatch(door: &Door, alert: &Alert) -> Dispatch {
    let state = match alert {
        Alert::NowClosed { .. } => DoorState::Closed,
        _ => DoorState::Open,
    };
    let elapsed = alert::format_seconds(alert.open_for());
    let body = match alert {
        Alert::OpenTooLong { .. } | Alert::StillOpen { .. } => format!(
            "{}{}has been open for {}",
            door.name, door.in_sentence, elapsed
        ),
        Alert::NowClosed { .. } => format!(
            "{}{}is now closed being open for {}",
            door.name, door.in_sentence, elapsed
        ),
    };
    Dispatch::Alert {
        door_id: door.id.clone(),
        title: format!("{}{}{}", door.name, door.in_sentence, state),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AlertConfig, DoorConfig, OpenhabConfig, SiteConfig};
    use crate::gpio::FakeGpio;
    use std::time::{Duration, UNIX_EPOCH};

    const LEFT_SENSOR: u8 = 17;
    const RIGHT_SENSOR: u8 = 27;
    const LEFT_RELAY: u8 = 23;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn door_config(
        id: &str,
        name: &str,
        relay: u8,
        sensor: u8,
        openhab: Option<&str>,
    ) -> DoorConfig {
        DoorConfig {
            id: id.to_string(),
            name: name.to_string(),
            in_sentence: String::from(" is "),
            relay_pin: relay,
            state_pin: sensor,
            state_pin_closed_value: false,
            approx_time_to_open: Duration::from_secs(10),
            approx_time_to_close: Duration::from_secs(14),
            openhab_name: openhab.map(str::to_string),
        }
    }

    fn test_config(alerts_enabled: bool) -> Config {
        Config {
            doors: vec![
                door_config("left", "Left Door", LEFT_RELAY, LEFT_SENSOR, Some("garageDoorLeft")),
                door_config("right", "Right Door", 24, RIGHT_SENSOR, None),
            ],
            alerts: AlertConfig {
                enabled: alerts_enabled,
                transport: None,
                time_to_wait: Duration::from_secs(30),
                repeat_interval: Duration::from_secs(30),
            },
            openhab: Some(OpenhabConfig {
                server: String::from("hub.local"),
                port: 8080,
            }),
            site: SiteConfig {
                port: 8888,
                user: None,
                group: None,
            },
        }
    }

    /// Both sensors start closed.
    fn controller(alerts_enabled: bool) -> (FakeGpio, Controller) {
        let gpio = FakeGpio::new();
        gpio.set_level(LEFT_SENSOR, false);
        gpio.set_level(RIGHT_SENSOR, false);
        let controller = Controller::new(&test_config(alerts_enabled), Box::new(gpio.clone()), at(0));
        (gpio, controller)
    }

    #[test]
    fn open_episode_escalates_and_confirms_close() {
        let (gpio, mut controller) = controller(true);

        // First tick settles both doors into closed; only the left door
        // has an openhab item to mirror.
        let jobs = controller.tick(at(0));
        assert_eq!(
            jobs,
            vec![Dispatch::Mirror {
                item: String::from("garageDoorLeft"),
                state: DoorState::Closed,
            }]
        );

        assert!(controller.toggle("left", at(0)));
        assert_eq!(gpio.pulses(), vec![LEFT_RELAY]);

        gpio.set_level(LEFT_SENSOR, true);
        // Opening is transient: no mirror, no alert.
        assert_eq!(controller.tick(at(5)), vec![]);
        assert_eq!(
            controller.tick(at(15)),
            vec![Dispatch::Mirror {
                item: String::from("garageDoorLeft"),
                state: DoorState::Open,
            }]
        );

        // Grace period (30) plus transit (10), counted from leaving closed
        // at t=5.
        assert_eq!(controller.tick(at(44)), vec![]);
        assert_eq!(
            controller.tick(at(45)),
            vec![Dispatch::Alert {
                door_id: String::from("left"),
                title: String::from("Left Door is open"),
                body: String::from("Left Door is has been open for 0:00:40"),
            }]
        );

        assert_eq!(controller.tick(at(50)), vec![]);
        assert_eq!(
            controller.tick(at(75)),
            vec![Dispatch::Alert {
                door_id: String::from("left"),
                title: String::from("Left Door is open"),
                body: String::from("Left Door is has been open for 0:01:10"),
            }]
        );

        gpio.set_level(LEFT_SENSOR, false);
        assert_eq!(
            controller.tick(at(80)),
            vec![
                Dispatch::Mirror {
                    item: String::from("garageDoorLeft"),
                    state: DoorState::Closed,
                },
                Dispatch::Alert {
                    door_id: String::from("left"),
                    title: String::from("Left Door is closed"),
                    body: String::from("Left Door is is now closed being open for 0:01:15"),
                },
            ]
        );

        // The episode is spent: staying closed owes nothing further.
        assert_eq!(controller.tick(at(85)), vec![]);
    }

    #[test]
    fn disabled_alerts_still_keep_episode_bookkeeping() {
        let (gpio, mut controller) = controller(false);
        controller.tick(at(0));
        controller.toggle("left", at(0));
        gpio.set_level(LEFT_SENSOR, true);
        controller.tick(at(5));
        controller.tick(at(15));

        assert_eq!(controller.tick(at(45)), vec![]);
        let door = controller.door("left").unwrap();
        assert!(door.episode.alert_sent);
        assert!(door.episode.awaiting_close_confirmation);

        // The close confirmation is likewise computed but not dispatched.
        gpio.set_level(LEFT_SENSOR, false);
        assert_eq!(
            controller.tick(at(60)),
            vec![Dispatch::Mirror {
                item: String::from("garageDoorLeft"),
                state: DoorState::Closed,
            }]
        );
    }

    #[test]
    fn toggle_of_unknown_door_is_ignored() {
        let (gpio, mut controller) = controller(true);
        assert!(!controller.toggle("basement", at(0)));
        assert!(gpio.pulses().is_empty());
    }

    #[test]
    fn updates_since_filters_by_watermark_in_config_order() {
        let (gpio, mut controller) = controller(true);
        controller.tick(at(0));

        let all = controller.updates_since(at(0));
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].door_id, "left");
        assert_eq!(all[1].door_id, "right");

        gpio.set_level(LEFT_SENSOR, true);
        controller.tick(at(5));
        let recent = controller.updates_since(at(1));
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].door_id, "left");
        assert_eq!(recent[0].state, DoorState::Open);
        assert_eq!(recent[0].timestamp, at(5));
    }

    #[test]
    fn long_poll_parks_until_a_change_is_published() {
        let (gpio, mut controller) = controller(true);
        controller.tick(at(0));

        match controller.register_long_poll(at(0)) {
            LongPoll::Ready(updates) => assert_eq!(updates.len(), 2),
            LongPoll::Pending(_) => panic!("updates were already due"),
        }

        let handle = match controller.register_long_poll(at(1)) {
            LongPoll::Pending(handle) => handle,
            LongPoll::Ready(_) => panic!("no updates past the watermark"),
        };

        gpio.set_level(LEFT_SENSOR, true);
        controller.tick(at(5));
        let updates = handle.payload.try_recv().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].door_id, "left");

        // The same watermark now resolves without parking.
        match controller.register_long_poll(at(1)) {
            LongPoll::Ready(updates) => assert_eq!(updates[0].state, DoorState::Open),
            LongPoll::Pending(_) => panic!("change should be visible"),
        }
    }

    #[test]
    fn expired_observer_misses_the_next_change() {
        let (gpio, mut controller) = controller(true);
        controller.tick(at(0));
        let handle = match controller.register_long_poll(at(1)) {
            LongPoll::Pending(handle) => handle,
            LongPoll::Ready(_) => panic!("no updates past the watermark"),
        };

        assert!(controller.expire_long_poll(handle.id));
        gpio.set_level(LEFT_SENSOR, true);
        controller.tick(at(5));
        assert!(handle.payload.try_recv().is_err());
    }

    #[test]
    fn failed_sensor_reads_do_not_stall_other_doors() {
        let (gpio, mut controller) = controller(true);
        gpio.fail_pin(LEFT_SENSOR);
        controller.tick(at(0));

        let snapshot = controller.snapshot();
        assert_eq!(snapshot[0].id, "left");
        assert_eq!(snapshot[0].state, DoorState::Open);
        assert_eq!(snapshot[1].id, "right");
        assert_eq!(snapshot[1].name, "Right Door");
        assert_eq!(snapshot[1].state, DoorState::Closed);
    }
}
