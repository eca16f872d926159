pub mod alert;
pub mod broker;
pub mod config;
pub mod controller;
mod door;
mod door_state;
pub mod gpio;
pub mod http;
pub mod notify;
pub mod openhab;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub use door::Door;
pub use door_state::{Action, DoorState};

#[macro_export]
macro_rules! term_on_err {
    ($expr:expr, $term:expr) => {
        match $expr {
            std::result::Result::Ok(val) => val,
            std::result::Result::Err(err) => {
                eprintln!("setting term due to error: {}", err);
                $term.store(true, std::sync::atomic::Ordering::SeqCst);
                break;
            }
        }
    };
}

/// One door's last observed state change, as relayed to update observers.
#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    pub door_id: String,
    pub state: DoorState,
    pub timestamp: SystemTime,
}

/// Timestamps cross the wire as fractional Unix seconds.
pub fn unix_seconds(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}

/// Inverse of [`unix_seconds`]. Out of range values clamp to the epoch.
pub fn time_from_unix_seconds(secs: f64) -> SystemTime {
    if secs.is_finite() && secs >= 0.0 {
        UNIX_EPOCH + Duration::from_secs_f64(secs)
    } else {
        UNIX_EPOCH
    }
}
