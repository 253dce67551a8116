use crate::color::ColorCommand;
use crate::dashboard::Dashboard;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct StatusMessage {
    pub port: String,
    pub polling: bool,
    #[serde(flatten)]
    pub dashboard: Dashboard,
    pub color: ColorCommand,
}

/// Inbound color change; channel values use the slider range 0-255.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct ColorMessage {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_flattens_dashboard() {
        let status = StatusMessage {
            port: "COM4".to_string(),
            polling: true,
            dashboard: Dashboard::new(),
            color: ColorCommand {
                red: "001".to_string(),
                green: "002".to_string(),
                blue: "003".to_string(),
            },
        };

        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["port"], "COM4");
        assert_eq!(value["fields_enabled"], false);
        assert_eq!(value["polling"], true);
        assert_eq!(value["color"], json!({"red": "001", "green": "002", "blue": "003"}));
    }

    #[test]
    fn color_message_accepts_integers() {
        let message: ColorMessage =
            serde_json::from_str(r#"{"red": 5, "green": 0, "blue": 255}"#).unwrap();
        assert_eq!(message.blue, 255.0);
    }
}
