use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One sample from the device. Channel values are kept as the text the
/// dashboard displays, whether the device sent a number or a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(alias = "humedad", deserialize_with = "scalar_text")]
    pub humidity: String,

    #[serde(alias = "temperatura", deserialize_with = "scalar_text")]
    pub temperature: String,
}

impl Reading {
    pub fn parse(line: &str) -> Result<Reading, String> {
        return serde_json::from_str(line.trim())
            .map_err(|err| format!("invalid reading: {}", err));
    }
}

fn scalar_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(number) => Result::Ok(number.to_string()),
        Value::String(text) => Result::Ok(text),
        other => Result::Err(serde::de::Error::custom(format!(
            "expected a number or string, got {}",
            other
        ))),
    }
}
