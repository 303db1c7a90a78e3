//! Configuration for wattflow
//!
//! TigerStyle: Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for a wattflow pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WattflowConfig {
    /// Generic actor runtime configuration
    #[serde(default)]
    pub actor: ActorConfig,

    /// Supervisor configuration
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Dispatcher configuration
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Puller configuration
    #[serde(default)]
    pub puller: PullerConfig,

    /// Pusher configuration
    #[serde(default)]
    pub pusher: PusherConfig,
}

impl WattflowConfig {
    /// Parse a configuration from a JSON document and validate it
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| Error::invalid_configuration("<root>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.actor.validate()?;
        self.supervisor.validate()?;
        self.dispatcher.validate()?;
        self.puller.validate()?;
        self.pusher.validate()?;
        if self.puller.stream_mode != self.supervisor.stream_mode {
            return Err(Error::invalid_configuration(
                "puller.stream_mode",
                format!(
                    "{} does not match supervisor.stream_mode {}",
                    self.puller.stream_mode, self.supervisor.stream_mode
                ),
            ));
        }
        Ok(())
    }

    /// Switch both the pullers and the supervisor to or from stream mode
    pub fn with_stream_mode(mut self, stream_mode: bool) -> Self {
        self.supervisor.stream_mode = stream_mode;
        self.puller.stream_mode = stream_mode;
        self
    }
}

/// Actor runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorConfig {
    /// Maximum number of queued data messages processed on a soft kill
    #[serde(default = "default_drain_messages_max")]
    pub drain_messages_max: usize,

    /// Maximum time spent draining on a soft kill (milliseconds)
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

fn default_drain_messages_max() -> usize {
    ACTOR_DRAIN_MESSAGES_COUNT_MAX
}

fn default_drain_timeout_ms() -> u64 {
    ACTOR_DRAIN_TIMEOUT_MS_DEFAULT
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            drain_messages_max: default_drain_messages_max(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl ActorConfig {
    /// Drain phase time budget
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.drain_messages_max == 0 {
            return Err(Error::invalid_configuration(
                "actor.drain_messages_max",
                "must be positive",
            ));
        }
        if self.drain_timeout_ms > ACTOR_DRAIN_TIMEOUT_MS_MAX {
            return Err(Error::invalid_configuration(
                "actor.drain_timeout_ms",
                format!(
                    "{} exceeds limit {}",
                    self.drain_timeout_ms, ACTOR_DRAIN_TIMEOUT_MS_MAX
                ),
            ));
        }
        Ok(())
    }
}

/// Supervisor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Time allowed for the start handshake (milliseconds)
    #[serde(default = "default_init_timeout_ms")]
    pub init_timeout_ms: u64,

    /// Keep pulling forever instead of stopping on source exhaustion
    #[serde(default)]
    pub stream_mode: bool,

    /// Optional bound on how long `join` waits per actor (milliseconds)
    #[serde(default)]
    pub join_timeout_ms: Option<u64>,
}

fn default_init_timeout_ms() -> u64 {
    ACTOR_INIT_TIMEOUT_MS_DEFAULT
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            init_timeout_ms: default_init_timeout_ms(),
            stream_mode: false,
            join_timeout_ms: None,
        }
    }
}

impl SupervisorConfig {
    /// Start handshake timeout
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    /// Per-actor join timeout, if any
    pub fn join_timeout(&self) -> Option<Duration> {
        self.join_timeout_ms.map(Duration::from_millis)
    }

    fn validate(&self) -> Result<()> {
        if self.init_timeout_ms == 0 || self.init_timeout_ms > ACTOR_INIT_TIMEOUT_MS_MAX {
            return Err(Error::invalid_configuration(
                "supervisor.init_timeout_ms",
                format!("must be in 1..={}", ACTOR_INIT_TIMEOUT_MS_MAX),
            ));
        }
        Ok(())
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Name of the device the dispatcher handles
    #[serde(default = "default_device_id")]
    pub device_id: String,

    /// Number of distinct producers whose End starts the exit drain
    ///
    /// 0 leaves the drain to the supervisor, which stops the dispatcher once
    /// every puller of the pipeline has terminated.
    #[serde(default)]
    pub upstream_count: usize,

    /// Maximum number of live formulas
    #[serde(default = "default_max_formulas")]
    pub max_formulas: usize,
}

fn default_device_id() -> String {
    "cpu".to_string()
}

fn default_max_formulas() -> usize {
    DISPATCHER_FORMULAS_COUNT_MAX
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            upstream_count: 0,
            max_formulas: default_max_formulas(),
        }
    }
}

impl DispatcherConfig {
    fn validate(&self) -> Result<()> {
        if self.max_formulas == 0 || self.max_formulas > DISPATCHER_FORMULAS_COUNT_MAX {
            return Err(Error::invalid_configuration(
                "dispatcher.max_formulas",
                format!("must be in 1..={}", DISPATCHER_FORMULAS_COUNT_MAX),
            ));
        }
        Ok(())
    }
}

/// Puller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullerConfig {
    /// Keep polling the source after it is exhausted
    #[serde(default)]
    pub stream_mode: bool,

    /// Pause between two polls in stream mode (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    PULLER_POLL_INTERVAL_MS_DEFAULT
}

impl Default for PullerConfig {
    fn default() -> Self {
        Self {
            stream_mode: false,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl PullerConfig {
    /// Pause between two polls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.stream_mode && self.poll_interval_ms == 0 {
            return Err(Error::invalid_configuration(
                "puller.poll_interval_ms",
                "must be positive in stream mode",
            ));
        }
        Ok(())
    }
}

/// Pusher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PusherConfig {
    /// Maximum time between two flushes (milliseconds)
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Buffer size above which a flush is forced
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
}

fn default_flush_interval_ms() -> u64 {
    PUSHER_FLUSH_INTERVAL_MS_DEFAULT
}

fn default_max_buffer_size() -> usize {
    PUSHER_BUFFER_SIZE_MAX_DEFAULT
}

impl Default for PusherConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            max_buffer_size: default_max_buffer_size(),
        }
    }
}

impl PusherConfig {
    /// Maximum time between two flushes
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.flush_interval_ms == 0 {
            return Err(Error::invalid_configuration(
                "pusher.flush_interval_ms",
                "must be positive",
            ));
        }
        if self.max_buffer_size > PUSHER_BUFFER_SIZE_MAX_LIMIT {
            return Err(Error::invalid_configuration(
                "pusher.max_buffer_size",
                format!(
                    "{} exceeds limit {}",
                    self.max_buffer_size, PUSHER_BUFFER_SIZE_MAX_LIMIT
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = WattflowConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = WattflowConfig::from_json_str(r#"{"pusher": {"max_buffer_size": 10}}"#)
            .unwrap();
        assert_eq!(config.pusher.max_buffer_size, 10);
        assert_eq!(
            config.pusher.flush_interval_ms,
            PUSHER_FLUSH_INTERVAL_MS_DEFAULT
        );
        assert_eq!(config.supervisor.init_timeout_ms, ACTOR_INIT_TIMEOUT_MS_DEFAULT);
    }

    #[test]
    fn test_stream_mode_mismatch_rejected() {
        let mut config = WattflowConfig::default();
        config.puller.stream_mode = true;
        match config.validate() {
            Err(Error::InvalidConfiguration { field, .. }) => {
                assert_eq!(field, "puller.stream_mode")
            }
            other => panic!("unexpected {:?}", other),
        }

        let mut config = WattflowConfig::default();
        config.supervisor.stream_mode = true;
        assert!(config.validate().is_err());

        let config = WattflowConfig::default().with_stream_mode(true);
        assert!(config.validate().is_ok());
        assert!(config.puller.stream_mode && config.supervisor.stream_mode);
    }

    #[test]
    fn test_dispatcher_drain_left_to_supervisor_by_default() {
        let config = WattflowConfig::from_json_str("{}").unwrap();
        assert_eq!(config.dispatcher.upstream_count, 0);
    }

    #[test]
    fn test_stream_mode_requires_poll_interval() {
        let mut config = WattflowConfig::default();
        config.puller.poll_interval_ms = 0;
        let config = config.with_stream_mode(true);
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfiguration { field, .. }) if field == "puller.poll_interval_ms"
        ));
    }

    #[test]
    fn test_malformed_json_rejected() {
        let result = WattflowConfig::from_json_str("{not json");
        assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));
    }
}
