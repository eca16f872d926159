use std::time::{Duration, SystemTime};

use crate::DoorState;

/// Alert cadence parameters, global across doors.
#[derive(Copy, Clone, Debug)]
pub struct AlertParams {
    /// Grace period after a door leaves closed before the first alert.
    pub time_to_wait: Duration,
    /// Minimum gap between repeat alerts while the door stays open.
    pub repeat_interval: Duration,
}

/// What the policy decided for a single door on one tick.
#[derive(Clone, Debug, PartialEq)]
pub enum Alert {
    /// First escalation of an open episode.
    OpenTooLong { open_for: Duration },
    /// The door is still open after a previous alert.
    StillOpen { open_for: Duration },
    /// The door closed after an open alert had fired.
    NowClosed { open_for: Duration },
}

impl Alert {
    pub fn open_for(&self) -> Duration {
        match self {
            Alert::OpenTooLong { open_for }
            | Alert::StillOpen { open_for }
            | Alert::NowClosed { open_for } => *open_for,
        }
    }
}

/// Per-door episode bookkeeping: the span from first leaving closed until
/// the door is confirmed closed again. The policy reads it; the controller
/// applies the updates it calls for, so the decision itself stays pure.
#[derive(Clone, Debug)]
pub struct Episode {
    pub start: SystemTime,
    pub alert_sent: bool,
    pub awaiting_close_confirmation: bool,
    pub alert_sent_time: SystemTime,
}

impl Episode {
    pub fn new(now: SystemTime) -> Episode {
        Episode {
            start: now,
            alert_sent: false,
            awaiting_close_confirmation: false,
            alert_sent_time: now,
        }
    }

    /// Re-arm for the next episode beginning at `now`.
    pub fn reset(&mut self, now: SystemTime) {
        *self = Episode::new(now);
    }

    /// Record that `alert` was decided at `now`. Called whether or not the
    /// alert is actually deliverable, so the bookkeeping stays correct when
    /// alerting is globally disabled.
    pub fn note_alert(&mut self, alert: &Alert, now: SystemTime) {
        match alert {
            Alert::OpenTooLong { .. } => {
                self.alert_sent = true;
                self.awaiting_close_confirmation = true;
                self.alert_sent_time = now;
            }
            Alert::StillOpen { .. } => self.alert_sent_time = now,
            // The controller resets the episode when the door is closed.
            Alert::NowClosed { .. } => {}
        }
    }
}

/// Decide whether an alert is due for a door observed in `state` at `now`.
///
/// The first alert waits out the door's own transit time on top of the grace
/// period so a normal open-then-close cycle never alerts. The close
/// confirmation only exists when an open alert already fired this episode.
pub fn evaluate(
    state: DoorState,
    time_to_open: Duration,
    episode: &Episode,
    params: &AlertParams,
    now: SystemTime,
) -> Option<Alert> {
    match state {
        DoorState::Open => {
            let open_for = duration_since(now, episode.start);
            if !episode.alert_sent {
                if open_for >= params.time_to_wait + time_to_open {
                    Some(Alert::OpenTooLong { open_for })
                } else {
                    None
                }
            } else if duration_since(now, episode.alert_sent_time) >= params.repeat_interval {
                Some(Alert::StillOpen { open_for })
            } else {
                None
            }
        }
        DoorState::Closed if episode.awaiting_close_confirmation => Some(Alert::NowClosed {
            open_for: duration_since(now, episode.start),
        }),
        _ => None,
    }
}

/// Duration formatting for alert bodies: `H:MM:SS`.
pub fn format_seconds(duration: Duration) -> String {
    let total = duration.as_secs();
    format!("{}:{:02}:{:02}", total / 3600, total % 3600 / 60, total % 60)
}

fn duration_since(now: SystemTime, earlier: SystemTime) -> Duration {
    // The wall clock can step backwards; a zero elapsed time just defers
    // the decision to a later tick.
    now.duration_since(earlier).unwrap_or(Duration::from_secs(0))
}
