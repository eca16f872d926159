use std::error::Error;
use std::net::ToSocketAddrs;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime};

use json::{object, JsonValue};
use log::warn;
use systemstat::{Platform, System};
use tiny_http::{Header, Request, Response};

use crate::alert::format_seconds;
use crate::broker::LongPoll;
use crate::controller::{Controller, DoorStatus};
use crate::{time_from_unix_seconds, unix_seconds, Update};

const HTML: &str = include_str!("home.html");

/// Upper bound on how long /upd holds a request open. The client re-polls
/// with the same watermark after an empty reply, so nothing is lost at the
/// cutoff.
const LONG_POLL_WAIT: Duration = Duration::from_secs(25);

pub struct Server(tiny_http::Server);

impl Server {
    pub fn new<A>(addr: A) -> Result<Server, Box<dyn Error + Send + Sync + 'static>>
    where
        A: ToSocketAddrs,
    {
        tiny_http::Server::http(addr).map(Server)
    }

    pub fn handle_requests(&self, controller: Arc<Mutex<Controller>>) {
        let json_content = "Content-type: application/json; charset=utf-8"
            .parse::<Header>()
            .unwrap();
        let html_content = "Content-type: text/html; charset=utf-8"
            .parse::<Header>()
            .unwrap();
        for request in self.0.incoming_requests() {
            let url = request.url().to_string();
            let (path, query) = split_query(&url);
            if path == "/upd" {
                handle_updates(request, query, &controller, &json_content);
                continue;
            }
            let response = match path {
                "/" => {
                    let snapshot = { controller.lock().unwrap().snapshot() };
                    Response::from_string(render_home(&snapshot, SystemTime::now()))
                        .with_header(html_content.clone())
                }
                "/cfg" => {
                    let snapshot = { controller.lock().unwrap().snapshot() };
                    let rows: Vec<JsonValue> = snapshot
                        .iter()
                        .map(|door| {
                            json::array![
                                door.id.as_str(),
                                door.name.as_str(),
                                door.state.to_string(),
                                unix_seconds(door.timestamp)
                            ]
                        })
                        .collect();
                    Response::from_string(json::stringify(rows))
                        .with_header(json_content.clone())
                }
                "/clk" => {
                    match query_param(query, "id") {
                        Some(id) => {
                            let mut controller = controller.lock().unwrap();
                            controller.toggle(id, SystemTime::now());
                        }
                        None => warn!("clk request without a door id"),
                    }
                    // Always OK: a stale or mangled click must not error the
                    // page driving it.
                    Response::from_string("OK")
                }
                "/uptime" => match System::new().uptime() {
                    Ok(uptime) => Response::from_string(format_seconds(uptime)),
                    Err(err) => {
                        warn!("uptime unavailable: {}", err);
                        Response::from_string("uptime unavailable").with_status_code(500)
                    }
                },
                _ => Response::from_string("Not found").with_status_code(404),
            };

            // Ignoring I/O errors that occur here so that we don't take down
            // the process if there is an issue sending the response.
            let _ = request.respond(response);
        }
    }

    pub fn shutdown(&self) {
        self.0.unblock();
    }
}

/// Answer immediately when updates are already due, otherwise hand the
/// request to a waiter thread parked on the observer's channel.
fn handle_updates(
    request: Request,
    query: &str,
    controller: &Arc<Mutex<Controller>>,
    json_content: &Header,
) {
    let watermark = query_param(query, "lastupdate")
        .and_then(|value| value.parse::<f64>().ok())
        .unwrap_or(0.0);
    let outcome = {
        let mut controller = controller.lock().unwrap();
        controller.register_long_poll(time_from_unix_seconds(watermark))
    };
    match outcome {
        LongPoll::Ready(updates) => {
            let body = updates_body(&updates, SystemTime::now());
            let _ = request.respond(Response::from_string(body).with_header(json_content.clone()));
        }
        LongPoll::Pending(handle) => {
            let controller = Arc::clone(controller);
            let header = json_content.clone();
            thread::spawn(move || {
                let updates = match handle.payload.recv_timeout(LONG_POLL_WAIT) {
                    Ok(updates) => updates,
                    Err(RecvTimeoutError::Timeout) => {
                        if controller.lock().unwrap().expire_long_poll(handle.id) {
                            Vec::new()
                        } else {
                            // Resolved just as the wait ran out; the payload
                            // is already sitting in the channel.
                            handle.payload.try_recv().unwrap_or_default()
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => Vec::new(),
                };
                let body = updates_body(&updates, SystemTime::now());
                let _ = request.respond(Response::from_string(body).with_header(header));
            });
        }
    }
}

fn render_home(snapshot: &[DoorStatus], now: SystemTime) -> String {
    let formatter = timeago::Formatter::new();
    let doors: String = snapshot
        .iter()
        .map(|door| {
            let since = now
                .duration_since(door.timestamp)
                .map(|elapsed| formatter.convert(elapsed))
                .unwrap_or_else(|_| String::from("just now"));
            format!(
                "<div class=\"door\"><h2>{name}</h2>\
                 <p class=\"state\" id=\"state-{id}\">{state}</p>\
                 <p class=\"since\">changed {since}</p>\
                 <button onclick=\"clk('{id}')\">Toggle</button></div>\n",
                name = door.name,
                id = door.id,
                state = door.state,
                since = since,
            )
        })
        .collect();
    HTML.replace("$doors$", &doors)
}

fn updates_body(updates: &[Update], now: SystemTime) -> String {
    let rows: Vec<JsonValue> = updates
        .iter()
        .map(|update| {
            json::array![
                update.door_id.as_str(),
                update.state.to_string(),
                unix_seconds(update.timestamp)
            ]
        })
        .collect();
    let envelope = object! {
        timestamp: unix_seconds(now) as u64,
        update: rows,
    };
    json::stringify(envelope)
}

fn split_query(url: &str) -> (&str, &str) {
    match url.find('?') {
        Some(index) => (&url[..index], &url[index + 1..]),
        None => (url, ""),
    }
}

fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        match (parts.next(), parts.next()) {
            (Some(name), Some(value)) if name == key => Some(value),
            _ => None,
        }
    })
}
