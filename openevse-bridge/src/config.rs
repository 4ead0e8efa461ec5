//! Configuration for the OpenEVSE status bridge
//!
//! Combines the accessory identity, the capability profile and the settings
//! of both transports. The host-style JSON accessory block is accepted as-is:
//!
//! ```json
//! {
//!   "name": "Garage Charger",
//!   "host": "192.168.1.40",
//!   "pollInterval": 15,
//!   "mqtt_host": "192.168.1.2",
//!   "mqtt_topic": "openevse",
//!   "profile": "outlet"
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::hap::Profile;

pub const DEFAULT_HTTP_PORT: u16 = 80;
pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_BASE_TOPIC: &str = "openevse";

/// Complete accessory configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Display label, also used as the service name prefix
    pub name: String,

    /// Which capability set is exposed to the host
    pub profile: Profile,

    /// Static accessory information
    pub info: AccessoryInfo,

    /// HTTP polling (disabled when `None`)
    pub http: Option<HttpConfig>,

    /// Message-bus subscription (disabled when `None`)
    pub mqtt: Option<MqttConfig>,

    /// Never apply the SoC fallback once an explicit SoC has been seen
    pub sticky_soc: bool,
}

/// Static descriptive properties set once per capability group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessoryInfo {
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
}

/// HTTP status poller configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,

    /// Basic auth is only sent when both are set
    pub username: Option<String>,
    pub password: Option<String>,

    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

/// MQTT subscriber configuration
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,

    /// Base path; `<base>/state`, `<base>/amp` and `<base>/watt` are subscribed
    pub base_topic: String,

    /// Fixed delay between reconnect attempts (no cap on attempts)
    pub reconnect_delay: Duration,

    pub keep_alive: Duration,
}

impl Default for AccessoryInfo {
    fn default() -> Self {
        Self {
            manufacturer: "OpenEVSE".to_string(),
            model: "WiFi Charger".to_string(),
            serial_number: "Unknown".to_string(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: "EV Charger".to_string(),
            profile: Profile::Switch,
            info: AccessoryInfo::default(),
            http: None,
            mqtt: None,
            sticky_soc: false,
        }
    }
}

impl HttpConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_HTTP_PORT,
            username: None,
            password: None,
            poll_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
        }
    }

    /// URL of the charger's status endpoint
    pub fn status_url(&self) -> String {
        let scheme = if self.port == 443 { "https" } else { "http" };
        format!("{}://{}:{}/status", scheme, self.host, self.port)
    }

    /// Credentials for basic auth, if both halves are configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user, pass)),
            _ => None,
        }
    }
}

impl MqttConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_MQTT_PORT,
            username: None,
            password: None,
            base_topic: DEFAULT_BASE_TOPIC.to_string(),
            reconnect_delay: Duration::from_secs(5),
            keep_alive: Duration::from_secs(30),
        }
    }

    /// Base topic without trailing separators
    pub fn topic_base(&self) -> &str {
        self.base_topic.trim_end_matches('/')
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user, pass)),
            _ => None,
        }
    }
}

impl BridgeConfig {
    /// Create config with a display name and default settings
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Enable HTTP polling
    pub fn with_http(mut self, http: HttpConfig) -> Self {
        self.http = Some(http);
        self
    }

    /// Enable the MQTT subscription
    pub fn with_mqtt(mut self, mqtt: MqttConfig) -> Self {
        self.mqtt = Some(mqtt);
        self
    }

    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_info(mut self, info: AccessoryInfo) -> Self {
        self.info = info;
        self
    }

    pub fn with_sticky_soc(mut self, sticky: bool) -> Self {
        self.sticky_soc = sticky;
        self
    }

    /// Parse the host-style JSON accessory block
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(json)?;
        let config = Self::try_from(file)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.is_none() && self.mqtt.is_none() {
            return Err(ConfigError::NoTransport);
        }

        if let Some(http) = &self.http {
            if http.host.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "host",
                    reason: "must not be empty".into(),
                });
            }
            if http.poll_interval.is_zero() {
                return Err(ConfigError::Invalid {
                    field: "pollInterval",
                    reason: "must be at least one second".into(),
                });
            }
            if http.request_timeout.is_zero() {
                return Err(ConfigError::Invalid {
                    field: "timeout",
                    reason: "must be at least one second".into(),
                });
            }
        }

        if let Some(mqtt) = &self.mqtt {
            if mqtt.host.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "mqtt_host",
                    reason: "must not be empty".into(),
                });
            }
            if mqtt.topic_base().trim_start_matches('/').is_empty() {
                return Err(ConfigError::Invalid {
                    field: "mqtt_topic",
                    reason: "must not be empty".into(),
                });
            }
            if mqtt.reconnect_delay.is_zero() {
                return Err(ConfigError::Invalid {
                    field: "mqtt_reconnect",
                    reason: "must be at least one second".into(),
                });
            }
        }

        Ok(())
    }
}

/// On-disk accessory block, keys as the host plugin config spells them
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default = "default_name")]
    name: String,
    host: Option<String>,
    #[serde(default = "default_http_port")]
    port: u16,
    username: Option<String>,
    password: Option<String>,
    #[serde(rename = "pollInterval", default = "default_poll_interval")]
    poll_interval: u64,
    #[serde(default = "default_timeout")]
    timeout: u64,

    mqtt_host: Option<String>,
    #[serde(default = "default_mqtt_port")]
    mqtt_port: u16,
    mqtt_user: Option<String>,
    mqtt_pass: Option<String>,
    #[serde(default = "default_base_topic")]
    mqtt_topic: String,
    #[serde(default = "default_reconnect")]
    mqtt_reconnect: u64,

    #[serde(default)]
    profile: Option<String>,
    manufacturer: Option<String>,
    model: Option<String>,
    serial: Option<String>,
    #[serde(default)]
    sticky_soc: bool,
}

fn default_name() -> String {
    "EV Charger".to_string()
}

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_poll_interval() -> u64 {
    10
}

fn default_timeout() -> u64 {
    5
}

fn default_mqtt_port() -> u16 {
    DEFAULT_MQTT_PORT
}

fn default_base_topic() -> String {
    DEFAULT_BASE_TOPIC.to_string()
}

fn default_reconnect() -> u64 {
    5
}

impl TryFrom<ConfigFile> for BridgeConfig {
    type Error = ConfigError;

    fn try_from(file: ConfigFile) -> Result<Self, Self::Error> {
        let profile = match file.profile.as_deref() {
            Some(p) => p.parse()?,
            None => Profile::Switch,
        };

        let defaults = AccessoryInfo::default();
        let info = AccessoryInfo {
            manufacturer: file.manufacturer.unwrap_or(defaults.manufacturer),
            model: file.model.unwrap_or(defaults.model),
            serial_number: file.serial.unwrap_or(defaults.serial_number),
        };

        let http = file.host.map(|host| HttpConfig {
            host,
            port: file.port,
            username: file.username,
            password: file.password,
            poll_interval: Duration::from_secs(file.poll_interval),
            request_timeout: Duration::from_secs(file.timeout),
        });

        let mqtt = file.mqtt_host.map(|host| MqttConfig {
            host,
            port: file.mqtt_port,
            username: file.mqtt_user,
            password: file.mqtt_pass,
            base_topic: file.mqtt_topic,
            reconnect_delay: Duration::from_secs(file.mqtt_reconnect),
            ..MqttConfig::new("")
        });

        Ok(Self {
            name: file.name,
            profile,
            info,
            http,
            mqtt,
            sticky_soc: file.sticky_soc,
        })
    }
}
