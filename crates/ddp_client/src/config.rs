//! Configuration for the client.

use ddp_protocol::SUPPORTED_VERSIONS;
use rand::Rng;
use std::time::Duration;

/// Decides how long to wait before each reconnect attempt.
pub trait ReconnectPolicy: Send {
    /// Returns the delay before attempt `attempt` (0-indexed), or `None` to
    /// stop reconnecting.
    fn next_delay(&mut self, attempt: u32) -> Option<Duration>;
}

/// Configuration for a client connection.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server URL.
    pub server_url: String,
    /// Protocol versions offered in the handshake, most preferred first.
    pub supported_versions: Vec<String>,
    /// Idle time after which a ping is sent.
    pub heartbeat_interval: Duration,
    /// Time to wait for any inbound traffic after a ping.
    pub heartbeat_timeout: Duration,
    /// Time allowed between opening the transport and `connected`.
    pub connect_timeout: Duration,
    /// Reconnect back-off.
    pub reconnect: BackoffConfig,
}

impl ClientConfig {
    /// Creates a new configuration.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            supported_versions: SUPPORTED_VERSIONS.iter().map(|v| v.to_string()).collect(),
            heartbeat_interval: Duration::from_millis(17_500),
            heartbeat_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(30),
            reconnect: BackoffConfig::default(),
        }
    }

    /// Sets the offered protocol versions.
    pub fn with_supported_versions(mut self, versions: Vec<String>) -> Self {
        self.supported_versions = versions;
        self
    }

    /// Sets the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the heartbeat timeout.
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Sets the connection-attempt timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the reconnect back-off.
    pub fn with_reconnect(mut self, reconnect: BackoffConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Returns the preferred protocol version.
    pub fn preferred_version(&self) -> &str {
        self.supported_versions
            .first()
            .map(String::as_str)
            .unwrap_or(SUPPORTED_VERSIONS[0])
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// Exponential back-off for reconnect attempts.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Maximum number of attempts; `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl BackoffConfig {
    /// Creates a back-off that retries forever.
    pub fn new() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration that never reconnects.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: Some(0),
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Limits the number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% on top
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconnectPolicy for BackoffConfig {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt >= max => None,
            _ => Some(self.delay_for_attempt(attempt)),
        }
    }
}
