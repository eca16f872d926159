use std::fs;
use std::io;
use std::time::Duration;

use json::JsonValue;
use thiserror::Error;

/// Per-door timing defaults when the config omits them, in seconds.
const DEFAULT_TRANSIT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read {path}: {source}")]
    Io { path: String, source: io::Error },
    #[error("config is not valid JSON: {0}")]
    Parse(#[from] json::Error),
    #[error("missing config key: {0}")]
    Missing(String),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub doors: Vec<DoorConfig>,
    pub alerts: AlertConfig,
    pub openhab: Option<OpenhabConfig>,
    pub site: SiteConfig,
}

#[derive(Clone, Debug)]
pub struct DoorConfig {
    pub id: String,
    pub name: String,
    /// Sentence fragment between the door name and the rest of a message,
    /// e.g. " is " producing "Left Door is open".
    pub in_sentence: String,
    pub relay_pin: u8,
    pub state_pin: u8,
    /// Logical sensor level that means "closed".
    pub state_pin_closed_value: bool,
    pub approx_time_to_open: Duration,
    pub approx_time_to_close: Duration,
    pub openhab_name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AlertConfig {
    pub enabled: bool,
    pub transport: Option<AlertTransport>,
    /// Grace period after a door leaves closed before the first alert.
    pub time_to_wait: Duration,
    /// Minimum gap between repeat alerts while a door stays open.
    pub repeat_interval: Duration,
}

#[derive(Clone, Debug)]
pub enum AlertTransport {
    Email(EmailConfig),
    Pushbullet { access_token: String },
    Pushover { api_key: String, user_key: String },
}

/// Mailgun-style HTTP mail API. `api_url` is the message root, e.g.
/// `https://api.mailgun.net/v3/example.org`.
#[derive(Clone, Debug)]
pub struct EmailConfig {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
    pub to: String,
}

#[derive(Clone, Debug)]
pub struct OpenhabConfig {
    pub server: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct SiteConfig {
    pub port: u16,
    /// Unprivileged user/group to switch to after pins and sockets are held.
    pub user: Option<String>,
    pub group: Option<String>,
}

pub fn load(path: &str) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_string(),
        source,
    })?;
    parse(&contents)
}

pub fn parse(contents: &str) -> Result<Config, ConfigError> {
    let root = json::parse(contents)?;

    let use_alerts = root["config"]["use_alerts"].as_bool().unwrap_or(false);
    let use_openhab = root["config"]["use_openhab"].as_bool().unwrap_or(false);

    let doors_value = &root["doors"];
    if !doors_value.is_object() {
        return Err(ConfigError::Missing(String::from("doors")));
    }
    let mut doors = Vec::new();
    for (id, door) in doors_value.entries() {
        doors.push(parse_door(id, door)?);
    }
    if doors.is_empty() {
        return Err(ConfigError::Invalid {
            key: String::from("doors"),
            reason: String::from("at least one door must be configured"),
        });
    }

    let alerts = parse_alerts(&root["alerts"], use_alerts)?;
    let openhab = if use_openhab {
        Some(parse_openhab(&root["openhab"])?)
    } else {
        None
    };
    let site = parse_site(&root["site"])?;

    Ok(Config {
        doors,
        alerts,
        openhab,
        site,
    })
}

fn parse_door(id: &str, value: &JsonValue) -> Result<DoorConfig, ConfigError> {
    Ok(DoorConfig {
        id: id.to_string(),
        name: require_str(&value["name"], &format!("doors.{}.name", id))?,
        in_sentence: value["in_sentence"].as_str().unwrap_or(" is ").to_string(),
        relay_pin: require_u8(&value["relay_pin"], &format!("doors.{}.relay_pin", id))?,
        state_pin: require_u8(&value["state_pin"], &format!("doors.{}.state_pin", id))?,
        state_pin_closed_value: closed_value(&value["state_pin_closed_value"], id)?,
        approx_time_to_open: secs_or_default(
            &value["approx_time_to_open"],
            &format!("doors.{}.approx_time_to_open", id),
        )?,
        approx_time_to_close: secs_or_default(
            &value["approx_time_to_close"],
            &format!("doors.{}.approx_time_to_close", id),
        )?,
        openhab_name: value["openhab_name"].as_str().map(str::to_string),
    })
}

fn parse_alerts(value: &JsonValue, enabled: bool) -> Result<AlertConfig, ConfigError> {
    if value.is_null() {
        return Err(ConfigError::Missing(String::from("alerts")));
    }
    let transport = match value["alert_type"].as_str() {
        Some("email") => Some(AlertTransport::Email(parse_email(&value["email"])?)),
        Some("pushbullet") => Some(AlertTransport::Pushbullet {
            access_token: require_str(
                &value["pushbullet"]["access_token"],
                "alerts.pushbullet.access_token",
            )?,
        }),
        Some("pushover") => Some(AlertTransport::Pushover {
            api_key: require_str(&value["pushover"]["api_key"], "alerts.pushover.api_key")?,
            user_key: require_str(&value["pushover"]["user_key"], "alerts.pushover.user_key")?,
        }),
        // Anything else means alerts stay computed but undeliverable,
        // matching the original's "No alerts configured" path.
        _ => None,
    };
    Ok(AlertConfig {
        enabled,
        transport,
        time_to_wait: require_secs(&value["time_to_wait"], "alerts.time_to_wait")?,
        repeat_interval: require_secs(
            &value["time_btw_alert_repeat"],
            "alerts.time_btw_alert_repeat",
        )?,
    })
}

fn parse_email(value: &JsonValue) -> Result<EmailConfig, ConfigError> {
    Ok(EmailConfig {
        api_url: require_str(&value["api_url"], "alerts.email.api_url")?,
        api_key: require_str(&value["api_key"], "alerts.email.api_key")?,
        from: require_str(&value["from"], "alerts.email.from")?,
        to: require_str(&value["to"], "alerts.email.to")?,
    })
}

fn parse_openhab(value: &JsonValue) -> Result<OpenhabConfig, ConfigError> {
    Ok(OpenhabConfig {
        server: require_str(&value["server"], "openhab.server")?,
        port: require_u16(&value["port"], "openhab.port")?,
    })
}

fn parse_site(value: &JsonValue) -> Result<SiteConfig, ConfigError> {
    Ok(SiteConfig {
        port: require_u16(&value["port"], "site.port")?,
        user: value["user"].as_str().map(str::to_string),
        group: value["group"].as_str().map(str::to_string),
    })
}

fn closed_value(value: &JsonValue, id: &str) -> Result<bool, ConfigError> {
    if value.is_null() {
        return Ok(false);
    }
    match value.as_u8() {
        Some(0) => Ok(false),
        Some(1) => Ok(true),
        _ => Err(ConfigError::Invalid {
            key: format!("doors.{}.state_pin_closed_value", id),
            reason: String::from("must be 0 or 1"),
        }),
    }
}

fn require_str(value: &JsonValue, key: &str) -> Result<String, ConfigError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ConfigError::Missing(key.to_string()))
}

fn require_u8(value: &JsonValue, key: &str) -> Result<u8, ConfigError> {
    value
        .as_u8()
        .ok_or_else(|| ConfigError::Missing(key.to_string()))
}

fn require_u16(value: &JsonValue, key: &str) -> Result<u16, ConfigError> {
    value
        .as_u16()
        .ok_or_else(|| ConfigError::Missing(key.to_string()))
}

fn require_secs(value: &JsonValue, key: &str) -> Result<Duration, ConfigError> {
    value
        .as_u64()
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::Missing(key.to_string()))
}

fn secs_or_default(value: &JsonValue, key: &str) -> Result<Duration, ConfigError> {
    if value.is_null() {
        return Ok(Duration::from_secs(DEFAULT_TRANSIT_SECS));
    }
    require_secs(value, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "config": { "use_alerts": true, "use_openhab": true },
        "site": { "port": 8888, "user": "garage", "group": "garage" },
        "doors": {
            "left": {
                "name": "Left Door",
                "relay_pin": 23,
                "state_pin": 17,
                "approx_time_to_open": 12,
                "approx_time_to_close": 14,
                "openhab_name": "garageDoorLeft"
            },
            "right": {
                "name": "Right Door",
                "relay_pin": 24,
                "state_pin": 27,
                "state_pin_closed_value": 1
            }
        },
        "alerts": {
            "alert_type": "pushover",
            "time_to_wait": 300,
            "time_btw_alert_repeat": 600,
            "pushover": { "api_key": "key", "user_key": "user" }
        },
        "openhab": { "server": "hub.local", "port": 8080 }
    }"#;

    #[test]
    fn parses_sample_config() {
        let config = parse(SAMPLE).unwrap();
        assert_eq!(config.doors.len(), 2);

        let left = &config.doors[0];
        assert_eq!(left.id, "left");
        assert_eq!(left.name, "Left Door");
        assert_eq!(left.in_sentence, " is ");
        assert_eq!(left.relay_pin, 23);
        assert_eq!(left.state_pin, 17);
        assert!(!left.state_pin_closed_value);
        assert_eq!(left.approx_time_to_open, Duration::from_secs(12));
        assert_eq!(left.approx_time_to_close, Duration::from_secs(14));
        assert_eq!(left.openhab_name.as_deref(), Some("garageDoorLeft"));

        let right = &config.doors[1];
        assert_eq!(right.id, "right");
        assert!(right.state_pin_closed_value);
        assert_eq!(right.approx_time_to_open, Duration::from_secs(10));
        assert!(right.openhab_name.is_none());

        assert!(config.alerts.enabled);
        assert_eq!(config.alerts.time_to_wait, Duration::from_secs(300));
        assert_eq!(config.alerts.repeat_interval, Duration::from_secs(600));
        match config.alerts.transport {
            Some(AlertTransport::Pushover { ref api_key, ref user_key }) => {
                assert_eq!(api_key, "key");
                assert_eq!(user_key, "user");
            }
            ref other => panic!("unexpected transport: {:?}", other),
        }

        let openhab = config.openhab.unwrap();
        assert_eq!(openhab.server, "hub.local");
        assert_eq!(openhab.port, 8080);

        assert_eq!(config.site.port, 8888);
        assert_eq!(config.site.user.as_deref(), Some("garage"));
    }

    #[test]
    fn door_order_follows_the_config_file() {
        let config = parse(SAMPLE).unwrap();
        let ids: Vec<&str> = config.doors.iter().map(|door| door.id.as_str()).collect();
        assert_eq!(ids, ["left", "right"]);
    }

    #[test]
    fn missing_door_name_is_an_error() {
        let broken = SAMPLE.replace("\"name\": \"Left Door\",", "");
        match parse(&broken) {
            Err(ConfigError::Missing(key)) => assert_eq!(key, "doors.left.name"),
            other => panic!("expected missing key error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn unknown_alert_type_leaves_alerts_undeliverable() {
        let changed = SAMPLE.replace("\"pushover\",", "\"carrier-pigeon\",");
        let config = parse(&changed).unwrap();
        assert!(config.alerts.enabled);
        assert!(config.alerts.transport.is_none());
    }

    #[test]
    fn bad_closed_value_is_rejected() {
        let broken = SAMPLE.replace("\"state_pin_closed_value\": 1", "\"state_pin_closed_value\": 7");
        assert!(matches!(parse(&broken), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn not_json_is_a_parse_error() {
        assert!(matches!(parse("relays: yes"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn no_doors_is_rejected() {
        let broken = r#"{
            "site": { "port": 8888 },
            "doors": {},
            "alerts": { "time_to_wait": 1, "time_btw_alert_repeat": 1 }
        }"#;
        assert!(matches!(parse(broken), Err(ConfigError::Invalid { .. })));
    }
}
