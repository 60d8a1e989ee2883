use std::env;

use crate::error::{BridgeError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub miio: MiioConfig,
    pub initial_states: InitialStates,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    pub client_id: String,
}

#[derive(Debug, Clone)]
pub struct MiioConfig {
    pub host: String,
    pub port: u16,
    /// Skip the startup requests that make the gateway play tones.
    pub silent_start: bool,
}

/// Values the device state starts from before the gateway reports anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialStates {
    pub sound: u32,
    pub sound_volume: u8,
    pub light_rgb: u32,
    pub brightness: u8,
    pub doorbell_volume: u8,
    pub doorbell_sound: u32,
    pub alarm_volume: u8,
    pub alarm_sound: u32,
    pub arming_time: u32,
    pub alarm_duration: u32,
}

impl Default for InitialStates {
    fn default() -> Self {
        Self {
            sound: 2,
            sound_volume: 50,
            light_rgb: 0xFF_FFFF,
            brightness: 54,
            doorbell_volume: 25,
            doorbell_sound: 11,
            alarm_volume: 90,
            alarm_sound: 2,
            arming_time: 30,
            alarm_duration: 1200,
        }
    }
}

fn env_required(key: &str) -> Result<String> {
    env::var(key).map_err(|_| BridgeError::Config(format!("{key} environment variable is required")))
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_hex_or_default(key: &str, default: u32) -> Result<u32> {
    match env_optional(key) {
        Some(v) => u32::from_str_radix(v.trim_start_matches("0x"), 16)
            .map_err(|e| BridgeError::Config(format!("{key} is not a hex color: {e}"))),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = InitialStates::default();
        let initial_states = InitialStates {
            sound: env_or_default("INITIAL_SOUND", defaults.sound),
            sound_volume: env_or_default("INITIAL_SOUND_VOLUME", defaults.sound_volume),
            light_rgb: env_hex_or_default("INITIAL_LIGHT_RGB", defaults.light_rgb)?,
            brightness: env_or_default("INITIAL_BRIGHTNESS", defaults.brightness),
            doorbell_volume: env_or_default("INITIAL_DOORBELL_VOLUME", defaults.doorbell_volume),
            doorbell_sound: env_or_default("INITIAL_DOORBELL_SOUND", defaults.doorbell_sound),
            alarm_volume: env_or_default("INITIAL_ALARM_VOLUME", defaults.alarm_volume),
            alarm_sound: env_or_default("INITIAL_ALARM_SOUND", defaults.alarm_sound),
            arming_time: env_or_default("INITIAL_ARMING_TIME", defaults.arming_time),
            alarm_duration: env_or_default("INITIAL_ALARM_DURATION", defaults.alarm_duration),
        };

        let config = Self {
            mqtt: MqttConfig {
                broker_host: env_required("MQTT_BROKER_HOST")?,
                broker_port: env_or_default("MQTT_BROKER_PORT", 1883),
                username: env_optional("MQTT_USERNAME"),
                password: env_optional("MQTT_PASSWORD"),
                topic_prefix: env_or_default("MQTT_TOPIC_PREFIX", "miio".to_string()),
                client_id: env_or_default("MQTT_CLIENT_ID", "miio-to-mqtt".to_string()),
            },
            miio: MiioConfig {
                host: env_or_default("MIIO_HOST", "127.0.0.1".to_string()),
                port: env_or_default("MIIO_PORT", 54322),
                silent_start: env_or_default("SILENT_START", false),
            },
            initial_states,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.mqtt.broker_host.is_empty() {
            return Err(BridgeError::Config("MQTT_BROKER_HOST must not be empty".into()));
        }
        if self.miio.port == 0 {
            return Err(BridgeError::Config("MIIO_PORT must be > 0".into()));
        }
        let states = &self.initial_states;
        if states.light_rgb > 0xFF_FFFF {
            return Err(BridgeError::Config("INITIAL_LIGHT_RGB must fit in 24 bits".into()));
        }
        for (key, value) in [
            ("INITIAL_SOUND_VOLUME", states.sound_volume),
            ("INITIAL_BRIGHTNESS", states.brightness),
            ("INITIAL_DOORBELL_VOLUME", states.doorbell_volume),
            ("INITIAL_ALARM_VOLUME", states.alarm_volume),
        ] {
            if value > 100 {
                return Err(BridgeError::Config(format!("{key} must be <= 100")));
            }
        }
        Ok(())
    }

    /// Full topic for a prefix-relative suffix: "sound/volume" -> "miio/sound/volume".
    pub fn topic(&self, suffix: &str) -> String {
        format!(
            "{}/{}",
            self.mqtt.topic_prefix.trim_end_matches('/'),
            suffix.trim_start_matches('/')
        )
    }

    /// Inverse of [`Config::topic`].
    pub fn strip_prefix<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let rest = topic.strip_prefix(self.mqtt.topic_prefix.trim_end_matches('/'))?;
        let rest = rest.strip_prefix('/')?;
        (!rest.is_empty()).then_some(rest)
    }

    pub fn bridge_status_topic(&self) -> String {
        self.topic("bridge_status")
    }

    pub fn gateway_addr(&self) -> String {
        format!("{}:{}", self.miio.host, self.miio.port)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn config(prefix: &str) -> Config {
        Config {
            mqtt: MqttConfig {
                broker_host: "localhost".into(),
                broker_port: 1883,
                username: None,
                password: None,
                topic_prefix: prefix.into(),
                client_id: "test".into(),
            },
            miio: MiioConfig {
                host: "127.0.0.1".into(),
                port: 54322,
                silent_start: false,
            },
            initial_states: InitialStates::default(),
        }
    }

    #[test]
    fn topics_round_trip_through_prefix() {
        let config = config("home/gateway/");
        let full = config.topic("sound/volume");
        assert_eq!(full, "home/gateway/sound/volume");
        assert_eq!(config.strip_prefix(&full), Some("sound/volume"));
        assert_eq!(config.strip_prefix("other/sound"), None);
        assert_eq!(config.strip_prefix("home/gateway/"), None);
    }

    #[test]
    fn rejects_out_of_range_initial_values() {
        let mut config = config("miio");
        assert!(config.validate().is_ok());
        config.initial_states.brightness = 101;
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn gateway_addr_joins_host_and_port() {
        assert_eq!(config("miio").gateway_addr(), "127.0.0.1:54322");
    }
}
