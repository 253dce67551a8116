use crate::reading::Reading;
use crate::session::SerialSession;
use serde::Serialize;

pub const PLACEHOLDER: &str = "--";
pub const CONNECTED: &str = "device connected";
pub const DISCONNECTED: &str = "device disconnected";

/// Live values shown to the user, written by the poll loop and read by the
/// console and MQTT bridge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub humidity: String,
    pub temperature: String,
    pub link_status: String,
    pub fields_enabled: bool,
    pub last_error: Option<String>,
    pub readings: u64,
}

impl Dashboard {
    pub fn new() -> Dashboard {
        return Dashboard {
            humidity: PLACEHOLDER.to_string(),
            temperature: PLACEHOLDER.to_string(),
            link_status: DISCONNECTED.to_string(),
            fields_enabled: false,
            last_error: None,
            readings: 0,
        };
    }

    pub fn apply(&mut self, reading: &Reading) {
        self.humidity = reading.humidity.clone();
        self.temperature = reading.temperature.clone();
        self.readings += 1;
    }

    pub fn record_error(&mut self, message: String) {
        self.last_error = Some(message);
    }

    pub fn set_link(&mut self, session: &SerialSession) {
        match session.error() {
            Some(err) => {
                self.link_status = err.to_string();
                self.fields_enabled = false;
            }
            None if session.is_open() => {
                self.link_status = CONNECTED.to_string();
                self.fields_enabled = true;
            }
            None => {
                self.link_status = DISCONNECTED.to_string();
                self.fields_enabled = false;
            }
        }
    }
}
