use crate::session::{SerialSession, SessionError};
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const CHANNEL_MIN: f64 = 0.0;
pub const CHANNEL_MAX: f64 = 255.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorChannel {
    Red,
    Green,
    Blue,
}

impl FromStr for ColorChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<ColorChannel, String> {
        match s.to_lowercase().as_str() {
            "red" | "r" => Result::Ok(ColorChannel::Red),
            "green" | "g" => Result::Ok(ColorChannel::Green),
            "blue" | "b" => Result::Ok(ColorChannel::Blue),
            _ => Result::Err(format!("unknown color channel: {}", s)),
        }
    }
}

impl fmt::Display for ColorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColorChannel::Red => "red",
            ColorChannel::Green => "green",
            ColorChannel::Blue => "blue",
        };
        write!(f, "{}", name)
    }
}

/// Wire form of a color change, each channel a zero-padded 3-digit string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorCommand {
    pub red: String,
    pub green: String,
    pub blue: String,
}

impl ColorCommand {
    pub fn to_json(&self) -> Result<String, String> {
        return serde_json::to_string(self)
            .map_err(|err| format!("could not convert color to json: {}", err));
    }
}

/// Slider state for the RGB LED. Changing a channel only reformats the
/// displayed value; nothing is sent until `send`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorController {
    red: String,
    green: String,
    blue: String,
}

impl ColorController {
    pub fn new() -> ColorController {
        return ColorController {
            red: zero_fill(0.0),
            green: zero_fill(0.0),
            blue: zero_fill(0.0),
        };
    }

    pub fn set(&mut self, channel: ColorChannel, value: f64) -> &str {
        let text = zero_fill(value);
        let slot = match channel {
            ColorChannel::Red => &mut self.red,
            ColorChannel::Green => &mut self.green,
            ColorChannel::Blue => &mut self.blue,
        };
        *slot = text;
        return slot;
    }

    pub fn get(&self, channel: ColorChannel) -> &str {
        match channel {
            ColorChannel::Red => &self.red,
            ColorChannel::Green => &self.green,
            ColorChannel::Blue => &self.blue,
        }
    }

    pub fn command(&self) -> ColorCommand {
        return ColorCommand {
            red: self.get(ColorChannel::Red).to_string(),
            green: self.get(ColorChannel::Green).to_string(),
            blue: self.get(ColorChannel::Blue).to_string(),
        };
    }

    pub fn send(&self, session: &SerialSession) -> Result<(), String> {
        let json = self.command().to_json()?;
        info!("sending color {}", json);
        return session
            .write_line(&json)
            .map_err(|err: SessionError| format!("failed to send color: {}", err));
    }
}

/// Slider values are truncated to an integer and clamped to 0-255.
fn zero_fill(value: f64) -> String {
    let value = if value.is_nan() {
        CHANNEL_MIN
    } else {
        value.clamp(CHANNEL_MIN, CHANNEL_MAX)
    };
    return format!("{:03}", value.trunc() as u8);
}
