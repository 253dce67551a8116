use crate::action::do_action;
use crate::color::{ColorChannel, ColorController};
use crate::config::MonitorConfig;
use crate::config_env::ConfigEnv;
use crate::dashboard::Dashboard;
use crate::message::StatusMessage;
use crate::mqtt::publish_reading;
use crate::poll::{PollLoop, RefreshCallback};
use crate::reading::Reading;
use crate::session::{LinkOpener, SerialSession, SerialSettings};
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

/// Owns the serial session and everything driven from it. The poll loop
/// shares the session and dashboard; every other mutation goes through
/// here. Writes and status never wait on the poll loop's blocking read.
pub struct AppState {
    pub session: Arc<SerialSession>,
    pub dashboard: Arc<Mutex<Dashboard>>,
    pub color: ColorController,
    pub monitor_config: MonitorConfig,
    pub poll_interval: Duration,
    pub mqtt_client: Option<rumqttc::Client>,
    pub topic_prefix: String,
    poll: Option<PollLoop>,
}

impl AppState {
    pub fn new(
        opener: Arc<dyn LinkOpener>,
        config_env: &ConfigEnv,
        monitor_config: MonitorConfig,
    ) -> AppState {
        if !monitor_config.has_port(&config_env.serial_port) {
            warn!(
                "serial port {} is not one of the configured ports {:?}",
                config_env.serial_port, monitor_config.ports
            );
        }
        let session = SerialSession::open(opener, SerialSettings::new(&config_env.serial_port));
        let mut dashboard = Dashboard::new();
        dashboard.set_link(&session);
        return AppState {
            session: Arc::new(session),
            dashboard: Arc::new(Mutex::new(dashboard)),
            color: ColorController::new(),
            monitor_config,
            poll_interval: config_env.poll_interval,
            mqtt_client: None,
            topic_prefix: config_env.topic_prefix.clone(),
            poll: None,
        };
    }

    /// Starts the poll loop, replacing a running one.
    pub fn start(&mut self) -> Result<(), String> {
        self.stop_polling(self.restart_grace());
        let poll = PollLoop::spawn(
            self.session.clone(),
            self.dashboard.clone(),
            self.poll_interval,
            self.refresh_callback(),
        )?;
        self.poll = Some(poll);
        return Result::Ok(());
    }

    pub fn is_polling(&self) -> bool {
        return self.poll.is_some();
    }

    fn refresh_callback(&self) -> RefreshCallback {
        match &self.mqtt_client {
            None => Box::new(|reading: &Reading| {
                debug!(
                    "humidity {} temperature {}",
                    reading.humidity, reading.temperature
                )
            }),
            Some(client) => {
                let client = client.clone();
                let topic = self.topic_prefix.clone() + "reading";
                Box::new(move |reading: &Reading| {
                    publish_reading(&client, &topic, reading)
                        .unwrap_or_else(|err| error!("failed to publish reading: {}", err))
                })
            }
        }
    }

    /// A port change waits for an in-flight read to finish before the
    /// session is swapped.
    fn restart_grace(&self) -> Duration {
        return self.session.settings().read_timeout + self.poll_interval;
    }

    fn stop_polling(&mut self, grace: Duration) {
        if let Some(poll) = self.poll.take() {
            poll.stop(grace);
        }
    }

    pub fn change_port(&mut self, port: &str) -> Result<(), String> {
        if !self.monitor_config.has_port(port) {
            return Result::Err(format!(
                "unknown port: {} (expected one of {})",
                port,
                self.monitor_config.ports.join(", ")
            ));
        }
        let was_polling = self.is_polling();
        self.stop_polling(self.restart_grace());
        self.session.change_port(port);
        lock(&self.dashboard)?.set_link(&self.session);
        info!("active port is now {}", port);
        if was_polling {
            self.start()?;
        }
        return Result::Ok(());
    }

    pub fn set_color_channel(&mut self, channel: ColorChannel, value: f64) -> String {
        return self.color.set(channel, value).to_string();
    }

    pub fn send_color(&self) -> Result<(), String> {
        return self.color.send(&self.session);
    }

    pub fn activate(&self, name: &str) -> Result<(), String> {
        return do_action(&self.session, &self.monitor_config, name);
    }

    pub fn status(&self) -> Result<StatusMessage, String> {
        let port = self.session.port();
        let dashboard = lock(&self.dashboard)?.clone();
        return Result::Ok(StatusMessage {
            port,
            polling: self.is_polling(),
            dashboard,
            color: self.color.command(),
        });
    }

    /// Stops the poll loop with a short bounded join, then closes the port.
    pub fn shutdown(&mut self) -> Result<(), String> {
        info!("shutting down");
        self.stop_polling(SHUTDOWN_GRACE);
        self.session.close();
        lock(&self.dashboard)?.set_link(&self.session);
        return Result::Ok(());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, String> {
    return mutex.lock().map_err(|err| format!("failed to lock {}", err));
}
