use std::time::Duration;

use log::debug;

use crate::config::OpenhabConfig;
use crate::notify::NotifyError;
use crate::DoorState;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Mirrors settled door states onto openHAB contact items.
pub struct Openhab {
    base: String,
}

impl Openhab {
    pub fn new(config: &OpenhabConfig) -> Openhab {
        Openhab {
            base: format!("http://{}:{}", config.server, config.port),
        }
    }

    /// Contact items only accept OPEN and CLOSED; anything else is not a
    /// settled state and is skipped.
    pub fn publish(&self, item: &str, state: DoorState) -> Result<(), NotifyError> {
        let value = match state {
            DoorState::Open => "OPEN",
            DoorState::Closed => "CLOSED",
            _ => return Ok(()),
        };
        let url = format!("{}/rest/items/{}/state", self.base, item);
        ureq::put(&url)
            .timeout(HTTP_TIMEOUT)
            .set("Content-Type", "text/plain")
            .send_string(value)
            .map_err(Box::new)?;
        debug!("mirrored {} = {}", item, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_states_are_skipped_without_a_request() {
        // The base URL points nowhere; a request would error.
        let hub = Openhab::new(&OpenhabConfig {
            server: String::from("0.0.0.0"),
            port: 9,
        });
        assert!(hub.publish("garageDoorLeft", DoorState::Opening).is_ok());
        assert!(hub.publish("garageDoorLeft", DoorState::Closing).is_ok());
        assert!(hub.publish("garageDoorLeft", DoorState::Unknown).is_ok());
    }
}
