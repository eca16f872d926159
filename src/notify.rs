use std::collections::HashMap;
use std::io;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use json::JsonValue;
use log::{debug, info};
use thiserror::Error;

use crate::config::{AlertTransport, EmailConfig};

const PUSHBULLET_PUSHES: &str = "https://api.pushbullet.com/v2/pushes";
const PUSHOVER_MESSAGES: &str = "https://api.pushover.net/1/messages.json";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Http(#[from] Box<ureq::Error>),
    #[error("notification response unreadable: {0}")]
    Io(#[from] io::Error),
    #[error("notification response is not JSON: {0}")]
    Parse(#[from] json::Error),
    #[error("pushbullet response did not include an iden")]
    MissingIden,
}

/// Delivers alert pushes over whichever transport the config selected.
/// Lives on the dispatcher thread so its blocking HTTP calls never run
/// under the controller lock.
pub enum Notifier {
    Email(EmailConfig),
    Pushbullet {
        access_token: String,
        /// Last push iden per door, so a door's previous alert can be
        /// revoked when the next one supersedes it.
        idens: HashMap<String, String>,
    },
    Pushover {
        api_key: String,
        user_key: String,
    },
    Disabled,
}

impl Notifier {
    pub fn new(transport: Option<AlertTransport>) -> Notifier {
        match transport {
            Some(AlertTransport::Email(config)) => Notifier::Email(config),
            Some(AlertTransport::Pushbullet { access_token }) => Notifier::Pushbullet {
                access_token,
                idens: HashMap::new(),
            },
            Some(AlertTransport::Pushover { api_key, user_key }) => Notifier::Pushover {
                api_key,
                user_key,
            },
            None => Notifier::Disabled,
        }
    }

    pub fn send(&mut self, door_id: &str, title: &str, body: &str) -> Result<(), NotifyError> {
        match self {
            Notifier::Email(config) => send_email(config, title, body),
            Notifier::Pushbullet {
                access_token,
                idens,
            } => send_pushbullet(access_token, idens, door_id, title, body),
            Notifier::Pushover { api_key, user_key } => {
                send_pushover(api_key, user_key, title, body)
            }
            Notifier::Disabled => {
                info!("no alert transport configured, dropping: {}", title);
                Ok(())
            }
        }
    }
}

/// Mailgun-style message API: one form post, basic auth with the fixed
/// `api` user.
fn send_email(config: &EmailConfig, title: &str, body: &str) -> Result<(), NotifyError> {
    let credentials = STANDARD.encode(format!("api:{}", config.api_key));
    ureq::post(&format!("{}/messages", config.api_url))
        .timeout(HTTP_TIMEOUT)
        .set("Authorization", &format!("Basic {}", credentials))
        .send_form(&[
            ("from", config.from.as_str()),
            ("to", config.to.as_str()),
            ("subject", title),
            ("text", body),
        ])
        .map_err(Box::new)?;
    debug!("email sent: {}", title);
    Ok(())
}

fn send_pushbullet(
    access_token: &str,
    idens: &mut HashMap<String, String>,
    door_id: &str,
    title: &str,
    body: &str,
) -> Result<(), NotifyError> {
    if let Some(iden) = idens.remove(door_id) {
        // Revoke the superseded push. A failure here must not block the
        // new push going out.
        let url = format!("{}/{}", PUSHBULLET_PUSHES, iden);
        if let Err(err) = ureq::delete(&url)
            .timeout(HTTP_TIMEOUT)
            .set("Access-Token", access_token)
            .call()
        {
            debug!("pushbullet delete of {} failed: {}", iden, err);
        }
    }

    let mut push = JsonValue::new_object();
    push["type"] = "note".into();
    push["title"] = title.into();
    push["body"] = body.into();
    let response = ureq::post(PUSHBULLET_PUSHES)
        .timeout(HTTP_TIMEOUT)
        .set("Access-Token", access_token)
        .set("Content-Type", "application/json")
        .send_string(&push.dump())
        .map_err(Box::new)?;

    let payload = json::parse(&response.into_string()?)?;
    match payload["iden"].as_str() {
        Some(iden) => {
            idens.insert(door_id.to_string(), iden.to_string());
            debug!("pushbullet push {} recorded for {}", iden, door_id);
            Ok(())
        }
        None => Err(NotifyError::MissingIden),
    }
}

fn send_pushover(
    api_key: &str,
    user_key: &str,
    title: &str,
    body: &str,
) -> Result<(), NotifyError> {
    ureq::post(PUSHOVER_MESSAGES)
        .timeout(HTTP_TIMEOUT)
        .send_form(&[
            ("token", api_key),
            ("user", user_key),
            ("title", title),
            ("message", body),
        ])
        .map_err(Box::new)?;
    debug!("pushover message sent: {}", title);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_transports_map_onto_notifier_variants() {
        assert!(matches!(Notifier::new(None), Notifier::Disabled));
        assert!(matches!(
            Notifier::new(Some(AlertTransport::Pushover {
                api_key: String::from("key"),
                user_key: String::from("user"),
            })),
            Notifier::Pushover { .. }
        ));
        match Notifier::new(Some(AlertTransport::Pushbullet {
            access_token: String::from("token"),
        })) {
            Notifier::Pushbullet { idens, .. } => assert!(idens.is_empty()),
            _ => panic!("expected pushbullet"),
        }
    }

    #[test]
    fn disabled_notifier_swallows_sends() {
        let mut notifier = Notifier::Disabled;
        assert!(notifier.send("left", "Left Door is open", "body").is_ok());
    }
}
