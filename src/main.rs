use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use std::{env, io, process, thread};

use log::{error, info, LevelFilter};
use syslog::{BasicLogger, Facility, Formatter3164};

use garage_door_controller::config::{self, Config};
use garage_door_controller::controller::{Controller, Dispatch};
use garage_door_controller::gpio::{self, Gpio};
use garage_door_controller::notify::Notifier;
use garage_door_controller::openhab::Openhab;
use garage_door_controller::{http, term_on_err};

const ONE_SECOND: Duration = Duration::from_secs(1);
const TICK_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_CONFIG_PATH: &str = "config.json";

fn main() -> Result<(), io::Error> {
    init_logging();

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| String::from(DEFAULT_CONFIG_PATH));
    let config = match config::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}: {}", config_path, err);
            process::exit(1);
        }
    };
    info!(
        "{} door(s) configured, alerts {}",
        config.doors.len(),
        if config.alerts.enabled { "on" } else { "off" }
    );

    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&term))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&term))?;

    let pins = setup_gpio(&config);
    let controller = Arc::new(Mutex::new(Controller::new(
        &config,
        pins,
        SystemTime::now(),
    )));

    let (jobs_tx, jobs_rx) = mpsc::channel();
    let mut threads = Vec::new();

    // Tick thread: poll the doors and queue any resulting network work.
    {
        let term = Arc::clone(&term);
        let controller = Arc::clone(&controller);
        let thread = thread::spawn(move || {
            while !term.load(Ordering::Relaxed) {
                let jobs = { term_on_err!(controller.lock(), &term).tick(SystemTime::now()) };
                for job in jobs {
                    term_on_err!(jobs_tx.send(job), &term);
                }
                thread::sleep(TICK_INTERVAL);
            }
            eprintln!("tick thread exiting");
        });
        threads.push(thread);
    }

    // Dispatch thread: alerts and openhab mirroring happen here so the
    // tick never waits on the network.
    {
        let term = Arc::clone(&term);
        let mut notifier = Notifier::new(config.alerts.transport.clone());
        let openhab = config.openhab.as_ref().map(Openhab::new);
        let thread = thread::spawn(move || {
            while !term.load(Ordering::Relaxed) {
                match jobs_rx.recv_timeout(ONE_SECOND) {
                    Ok(Dispatch::Alert {
                        door_id,
                        title,
                        body,
                    }) => {
                        if let Err(err) = notifier.send(&door_id, &title, &body) {
                            error!("alert delivery failed: {}", err);
                        }
                    }
                    Ok(Dispatch::Mirror { item, state }) => {
                        if let Some(hub) = &openhab {
                            if let Err(err) = hub.publish(&item, state) {
                                error!("openhab mirror failed: {}", err);
                            }
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            eprintln!("dispatch thread exiting");
        });
        threads.push(thread);
    }

    // Start HTTP server
    let addr = ("0.0.0.0", config.site.port);
    let server = match http::Server::new(addr) {
        Ok(server) => Arc::new(server),
        Err(err) => {
            eprintln!(
                "Unable to start http server on {}:{}: {}",
                addr.0, addr.1, err
            );
            process::exit(1);
        }
    };
    eprintln!("http server running on {}:{}", addr.0, addr.1);

    // Pins and sockets are held; root is no longer needed.
    drop_privileges(&config);

    // Handle HTTP requests
    {
        let controller = Arc::clone(&controller);
        let server = Arc::clone(&server);
        let thread = thread::spawn(move || {
            server.handle_requests(controller);
            eprintln!("server thread exiting");
        });
        threads.push(thread);
    }

    // Wait for signals to exit
    while !term.load(Ordering::Relaxed) {
        thread::sleep(ONE_SECOND);
    }
    server.shutdown();

    for thread in threads {
        let _ = thread.join();
    }

    Ok(())
}

fn init_logging() {
    let formatter = Formatter3164 {
        facility: Facility::LOG_DAEMON,
        hostname: None,
        process: String::from("garage-door-controller"),
        pid: 0,
    };
    match syslog::unix(formatter) {
        Ok(logger) => {
            if log::set_boxed_logger(Box::new(BasicLogger::new(logger))).is_ok() {
                log::set_max_level(LevelFilter::Info);
            }
        }
        Err(err) => eprintln!("unable to connect to syslog: {}", err),
    }
}

/// Acquire every configured pin up front. When the GPIO peripheral is not
/// available the process still runs: sensors read not-closed and toggles
/// fail loudly in the log.
fn setup_gpio(config: &Config) -> Box<dyn Gpio> {
    let sensor_pins: Vec<u8> = config.doors.iter().map(|door| door.state_pin).collect();
    let relay_pins: Vec<u8> = config.doors.iter().map(|door| door.relay_pin).collect();
    match gpio::RaspberryPi::new(&sensor_pins, &relay_pins) {
        Ok(pins) => Box::new(pins),
        Err(err) => {
            eprintln!("Unable to set up GPIO: {}", err);
            Box::new(gpio::Disconnected(err.to_string()))
        }
    }
}

fn drop_privileges(config: &Config) {
    if unsafe { libc::geteuid() } != 0 {
        return;
    }
    if let (Some(user), Some(group)) = (&config.site.user, &config.site.group) {
        if let Err(err) = drop_root::set_user_group(user, group) {
            eprintln!("unable to drop privileges to {}:{}: {}", user, group, err);
            process::exit(1);
        }
        info!("dropped privileges to {}:{}", user, group);
    }
}
