mod action;
mod app_state;
mod color;
mod config;
mod config_env;
mod console;
mod dashboard;
mod message;
mod mqtt;
mod poll;
mod reading;
mod session;

use app_state::AppState;
use config::MonitorConfig;
use config_env::ConfigEnv;
use console::run_console;
use log::{error, info, warn, LevelFilter};
use mqtt::{init_mqtt, send_status_message};
use session::SerialPortOpener;
use simple_logger::SimpleLogger;
use std::io;
use std::process;
use std::sync::mpsc;
use std::sync::mpsc::{RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn init() -> Result<(Arc<Mutex<AppState>>, Duration), String> {
    let config_env = ConfigEnv::get()?;
    let monitor_config = MonitorConfig::load(&config_env.config_filename)?;
    let app_state = Arc::new(Mutex::new(AppState::new(
        Arc::new(SerialPortOpener),
        &config_env,
        monitor_config,
    )));

    let mqtt_client = match &config_env.mqtt_host {
        Some(mqtt_host) => Some(
            init_mqtt(&app_state, &config_env, mqtt_host)
                .map_err(|err| format!("init mqtt error: {}", err))?,
        ),
        None => {
            info!("MQTT_HOST not set, mqtt bridge disabled");
            None
        }
    };

    let mut state = app_state
        .lock()
        .map_err(|err| format!("failed to lock {}", err))?;
    state.mqtt_client = mqtt_client;
    state.start()?;
    drop(state);

    return Result::Ok((app_state, config_env.status_interval));
}

/// Turns SIGINT/SIGTERM into a shutdown request so the port is closed
/// cleanly even when the console is not attached.
fn spawn_signal_thread(shutdown_tx: Sender<()>) -> Result<(), String> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| format!("failed to build signal runtime: {}", err))?;
    thread::Builder::new()
        .name("signal".to_string())
        .spawn(move || match runtime.block_on(wait_for_termination()) {
            Result::Ok(()) => {
                info!("termination signal received");
                let _ = shutdown_tx.send(());
            }
            Result::Err(err) => error!("failed to listen for signals: {}", err),
        })
        .map_err(|err| format!("failed to spawn signal thread: {}", err))?;
    return Result::Ok(());
}

#[cfg(unix)]
async fn wait_for_termination() -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Result::Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() -> io::Result<()> {
    return tokio::signal::ctrl_c().await;
}

fn main() -> Result<(), String> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .env()
        .init()
        .map_err(|err| format!("{}", err))?;

    let (app_state, status_interval) = match init() {
        Result::Err(err) => {
            error!("init failed: {}", err);
            process::exit(1);
        }
        Result::Ok(init) => init,
    };
    info!("started");

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    spawn_signal_thread(shutdown_tx.clone())?;
    let console_app_state = app_state.clone();
    thread::Builder::new()
        .name("console".to_string())
        .spawn(move || run_console(&console_app_state, io::stdin().lock(), &shutdown_tx))
        .map_err(|err| format!("failed to spawn console thread: {}", err))?;

    // stdin closing is not a shutdown request; the signal thread keeps a sender
    let mut can_shutdown = true;
    loop {
        if can_shutdown {
            match shutdown_rx.recv_timeout(status_interval) {
                Result::Ok(()) => break,
                Result::Err(RecvTimeoutError::Timeout) => {}
                Result::Err(RecvTimeoutError::Disconnected) => {
                    warn!("no console and no signal handler, running until killed");
                    can_shutdown = false;
                    continue;
                }
            }
        } else {
            thread::sleep(status_interval);
        }
        send_status_message(&app_state)
            .unwrap_or_else(|err| error!("failed to send status heartbeat: {}", err));
    }

    match app_state.lock() {
        Result::Err(err) => {
            error!("failed to lock {}", err);
            process::exit(1);
        }
        Result::Ok(mut app_state) => app_state.shutdown()?,
    }
    info!("stopped");
    return Result::Ok(());
}
