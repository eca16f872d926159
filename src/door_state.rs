use std::fmt;

/// Observed door state. `Opening` and `Closing` are inferred from the last
/// relay action, not sensed: the sensor only distinguishes closed from
/// not-closed.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum DoorState {
    Unknown,
    Closed,
    Opening,
    Open,
    Closing,
}

impl DoorState {
    /// Opening and Closing pass through the alert timers untouched and are
    /// never mirrored externally.
    pub fn is_transient(self) -> bool {
        match self {
            DoorState::Opening | DoorState::Closing => true,
            _ => false,
        }
    }
}

impl fmt::Display for DoorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Lowercase forms are the wire protocol; clients compare them.
        match self {
            DoorState::Unknown => f.write_str("unknown"),
            DoorState::Closed => f.write_str("closed"),
            DoorState::Opening => f.write_str("opening"),
            DoorState::Open => f.write_str("open"),
            DoorState::Closing => f.write_str("closing"),
        }
    }
}

/// The intent recorded when the relay was last pulsed.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Action {
    Open,
    Close,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_strings_are_lowercase() {
        assert_eq!(DoorState::Open.to_string(), "open");
        assert_eq!(DoorState::Closed.to_string(), "closed");
        assert_eq!(DoorState::Opening.to_string(), "opening");
        assert_eq!(DoorState::Closing.to_string(), "closing");
        assert_eq!(DoorState::Unknown.to_string(), "unknown");
    }

    #[test]
    fn only_opening_and_closing_are_transient() {
        assert!(DoorState::Opening.is_transient());
        assert!(DoorState::Closing.is_transient());
        assert!(!DoorState::Open.is_transient());
        assert!(!DoorState::Closed.is_transient());
        assert!(!DoorState::Unknown.is_transient());
    }
}
