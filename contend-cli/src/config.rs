//! Configuration file support for the contend tools

use contend_protocol::backoff::{BackoffConfig, BackoffMode};
use contend_protocol::rto::RtoConfig;
use contend_protocol::sender::SenderConfig;
use contend_sim::{ChannelConfig, ScenarioConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Backoff draw mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Draw from the full window on every retry
    #[default]
    Uniform,
    /// Grow the upper bound exponentially up to the ceiling
    Exponential,
}

/// Per-sender retry parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Slot duration in microseconds
    #[serde(default = "default_slot_time_us")]
    pub slot_time_us: u64,
    /// Attempts before a message is abandoned
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub mode: BackoffKind,
    /// Exponent cap for exponential mode
    #[serde(default = "default_ceiling")]
    pub ceiling: u32,
    /// Timeout before the first RTT sample, in milliseconds
    #[serde(default = "default_initial_rto_ms")]
    pub initial_rto_ms: u64,
}

fn default_slot_time_us() -> u64 {
    1
}

fn default_max_retries() -> u32 {
    5
}

fn default_ceiling() -> u32 {
    10
}

fn default_initial_rto_ms() -> u64 {
    1000
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            slot_time_us: default_slot_time_us(),
            max_retries: default_max_retries(),
            mode: BackoffKind::Uniform,
            ceiling: default_ceiling(),
            initial_rto_ms: default_initial_rto_ms(),
        }
    }
}

impl RetrySettings {
    /// Build the sender parameters
    ///
    /// The window is left at its default; the simulation replaces it with the
    /// regime's window.
    pub fn sender_config(&self) -> SenderConfig {
        let mode = match self.mode {
            BackoffKind::Uniform => BackoffMode::Uniform,
            BackoffKind::Exponential => BackoffMode::Exponential {
                ceiling: self.ceiling,
            },
        };

        SenderConfig {
            backoff: BackoffConfig {
                slot_time: Duration::from_micros(self.slot_time_us),
                max_retries: self.max_retries,
                mode,
                ..BackoffConfig::default()
            },
            rto: RtoConfig {
                initial_rto: Duration::from_millis(self.initial_rto_ms),
                ..RtoConfig::default()
            },
        }
    }
}

/// Fleet simulation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of senders
    #[serde(default = "default_senders")]
    pub senders: usize,
    /// Messages per sender
    #[serde(default = "default_messages")]
    pub messages: u32,
    /// Payload size in bytes
    #[serde(default = "default_payload_size")]
    pub payload_size: usize,
    /// Pause between messages in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Node density
    pub density: f64,
    /// Mean node speed
    pub speed: f64,
    /// Probability that an attempt is acknowledged
    #[serde(default = "default_delivery")]
    pub delivery: f64,
    /// Probability that a failed attempt reports a close
    #[serde(default)]
    pub close_probability: f64,
    /// Round-trip time in milliseconds
    #[serde(default = "default_base_rtt_ms")]
    pub base_rtt_ms: u64,
    /// Round-trip jitter in milliseconds
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    /// Energy per sent message in joules
    #[serde(default = "default_energy_j")]
    pub energy_per_packet_j: f64,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_senders() -> usize {
    5
}

fn default_messages() -> u32 {
    1000
}

fn default_payload_size() -> usize {
    1024
}

fn default_interval_ms() -> u64 {
    100
}

fn default_delivery() -> f64 {
    contend_sim::channel::DEFAULT_DELIVERY_PROBABILITY
}

fn default_base_rtt_ms() -> u64 {
    10
}

fn default_jitter_ms() -> u64 {
    2
}

fn default_energy_j() -> f64 {
    contend_protocol::metrics::DEFAULT_ENERGY_PER_PACKET_J
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            senders: default_senders(),
            messages: default_messages(),
            payload_size: default_payload_size(),
            interval_ms: default_interval_ms(),
            density: 50.0,
            speed: 10.0,
            delivery: default_delivery(),
            close_probability: 0.0,
            base_rtt_ms: default_base_rtt_ms(),
            jitter_ms: default_jitter_ms(),
            energy_per_packet_j: default_energy_j(),
            seed: 0,
            retry: RetrySettings::default(),
        }
    }
}

impl SimulationConfig {
    /// Convert to a validated scenario
    pub fn to_scenario(&self) -> Result<ScenarioConfig, ConfigError> {
        let scenario = ScenarioConfig {
            senders: self.senders,
            messages_per_sender: self.messages,
            payload_size: self.payload_size,
            message_interval: Duration::from_millis(self.interval_ms),
            density: self.density,
            speed: self.speed,
            seed: self.seed,
            sender: self.retry.sender_config(),
            channel: ChannelConfig {
                delivery_probability: self.delivery,
                close_probability: self.close_probability,
                base_rtt: Duration::from_millis(self.base_rtt_ms),
                jitter: Duration::from_millis(self.jitter_ms),
                ..ChannelConfig::default()
            },
            energy_per_packet_j: self.energy_per_packet_j,
        };

        scenario
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(scenario)
    }
}

/// Socket demo configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoConfig {
    /// Responder listen address
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// Messages to deliver
    #[serde(default = "default_echo_messages")]
    pub messages: u32,
    /// Payload size in bytes
    #[serde(default = "default_echo_payload_size")]
    pub payload_size: usize,
    /// Fraction of datagrams the responder drops
    #[serde(default)]
    pub loss: f64,
    /// Responder replies FIN after this many datagrams
    pub close_after: Option<u64>,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

fn default_echo_messages() -> u32 {
    100
}

fn default_echo_payload_size() -> usize {
    64
}

impl Default for EchoConfig {
    fn default() -> Self {
        EchoConfig {
            bind: default_bind(),
            messages: default_echo_messages(),
            payload_size: default_echo_payload_size(),
            loss: 0.0,
            close_after: None,
            seed: 0,
            retry: RetrySettings::default(),
        }
    }
}

impl EchoConfig {
    /// Check the values the socket demo relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.loss) {
            return Err(ConfigError::Invalid(format!(
                "loss must be in [0, 1], got {}",
                self.loss
            )));
        }
        if self.payload_size > contend_io::udp::MAX_DATAGRAM_PAYLOAD {
            return Err(ConfigError::Invalid(format!(
                "payload of {} bytes does not fit one datagram",
                self.payload_size
            )));
        }
        self.retry
            .sender_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

/// Combined configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Fleet simulation configuration
    pub simulation: Option<SimulationConfig>,
    /// Socket demo configuration
    pub echo: Option<EchoConfig>,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Create example simulation configuration
    pub fn example_simulation() -> Self {
        Config {
            simulation: Some(SimulationConfig {
                senders: 10,
                density: 65.0,
                speed: 12.0,
                retry: RetrySettings {
                    mode: BackoffKind::Exponential,
                    ..RetrySettings::default()
                },
                ..SimulationConfig::default()
            }),
            echo: None,
        }
    }

    /// Create example socket demo configuration
    pub fn example_echo() -> Self {
        Config {
            simulation: None,
            echo: Some(EchoConfig {
                loss: 0.1,
                ..EchoConfig::default()
            }),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
