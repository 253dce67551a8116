use crate::poll::DEFAULT_INTERVAL;
use std::env;
use std::time::Duration;

pub struct ConfigEnv {
    pub config_filename: String,
    pub serial_port: String,
    pub poll_interval: Duration,
    pub status_interval: Duration,
    pub mqtt_host: Option<String>,
    pub mqtt_port: u16,
    pub mqtt_client_id: String,
    pub topic_prefix: String,
}

impl ConfigEnv {
    pub fn get() -> Result<ConfigEnv, String> {
        return Result::Ok(ConfigEnv {
            config_filename: env::var("HUMITURE_CONFIG").unwrap_or("./config.yaml".to_string()),
            serial_port: env::var("SERIAL_PORT").unwrap_or("COM4".to_string()),
            poll_interval: ConfigEnv::get_poll_interval()?,
            status_interval: ConfigEnv::get_status_interval()?,
            mqtt_host: env::var("MQTT_HOST").ok().filter(|host| !host.is_empty()),
            mqtt_port: ConfigEnv::get_mqtt_port()?,
            mqtt_client_id: env::var("MQTT_CLIENT_ID").unwrap_or("humiture".to_string()),
            topic_prefix: normalize_topic_prefix(
                env::var("MQTT_TOPIC_PREFIX").unwrap_or("humiture/".to_string()),
            ),
        });
    }

    fn get_poll_interval() -> Result<Duration, String> {
        return match env::var("POLL_INTERVAL_MS") {
            Result::Err(_) => Result::Ok(DEFAULT_INTERVAL),
            Result::Ok(value) => parse_poll_interval(&value),
        };
    }

    fn get_status_interval() -> Result<Duration, String> {
        let status_interval_str = env::var("STATUS_INTERVAL").unwrap_or("60".to_string());
        let status_interval_seconds = status_interval_str
            .parse::<u64>()
            .map_err(|err| format!("invalid status interval: {} ({})", status_interval_str, err))?;
        return Result::Ok(Duration::from_secs(status_interval_seconds));
    }

    fn get_mqtt_port() -> Result<u16, String> {
        let port_str = env::var("MQTT_PORT").unwrap_or("1883".to_string());
        return port_str
            .parse::<u16>()
            .map_err(|err| format!("invalid mqtt port: {} ({})", port_str, err));
    }
}

fn parse_poll_interval(value: &str) -> Result<Duration, String> {
    let millis = value
        .parse::<u64>()
        .map_err(|err| format!("invalid poll interval: {} ({})", value, err))?;
    if millis == 0 {
        return Result::Err(format!("invalid poll interval: {} (must be positive)", value));
    }
    return Result::Ok(Duration::from_millis(millis));
}

fn normalize_topic_prefix(mut topic_prefix: String) -> String {
    if !topic_prefix.ends_with("/") {
        topic_prefix = topic_prefix + "/";
    }
    return topic_prefix;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_prefix_gets_trailing_slash() {
        assert_eq!(normalize_topic_prefix("lab".to_string()), "lab/");
        assert_eq!(normalize_topic_prefix("lab/".to_string()), "lab/");
    }

    #[test]
    fn poll_interval_must_be_positive_millis() {
        assert_eq!(parse_poll_interval("5000"), Result::Ok(Duration::from_secs(5)));
        assert!(parse_poll_interval("0").is_err());
        assert!(parse_poll_interval("fast").is_err());
    }
}
