//! Configuration

use std::time::Duration;

/// Tunables for groups, connections, and dispatch. All options have
/// defaults; build one with [`Config::builder`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Grace period before disposing an empty group
    pub group_ttl: Duration,
    /// Per-frame write deadline; eviction on expiry
    pub write_timeout: Duration,
    /// Per-action processing deadline
    pub dispatch_deadline: Duration,
    /// Long-poll hang time
    pub poll_interval: Duration,
    /// Registry cap; further upgrades return 503
    pub max_connections: usize,
    /// Per-connection write queue depth
    pub write_queue: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            group_ttl: Duration::from_secs(30),
            write_timeout: Duration::from_secs(5),
            dispatch_deadline: Duration::from_secs(10),
            poll_interval: Duration::from_secs(25),
            max_connections: 10_000,
            write_queue: 32,
        }
    }
}

impl Config {
    /// Create a builder for a config.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for [`Config`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    group_ttl: Option<Duration>,
    write_timeout: Option<Duration>,
    dispatch_deadline: Option<Duration>,
    poll_interval: Option<Duration>,
    max_connections: Option<usize>,
    write_queue: Option<usize>,
}

impl ConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the empty-group disposal grace period.
    pub fn with_group_ttl(mut self, ttl: Duration) -> Self {
        self.group_ttl = Some(ttl);
        self
    }

    /// Set the per-frame write deadline.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Set the per-action processing deadline.
    pub fn with_dispatch_deadline(mut self, deadline: Duration) -> Self {
        self.dispatch_deadline = Some(deadline);
        self
    }

    /// Set the long-poll hang time.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Set the connection cap.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }

    /// Set the per-connection write queue depth.
    pub fn with_write_queue(mut self, depth: usize) -> Self {
        self.write_queue = Some(depth);
        self
    }

    /// Build the config, filling unset options with defaults.
    pub fn build(self) -> Config {
        let defaults = Config::default();
        Config {
            group_ttl: self.group_ttl.unwrap_or(defaults.group_ttl),
            write_timeout: self.write_timeout.unwrap_or(defaults.write_timeout),
            dispatch_deadline: self.dispatch_deadline.unwrap_or(defaults.dispatch_deadline),
            poll_interval: self.poll_interval.unwrap_or(defaults.poll_interval),
            max_connections: self.max_connections.unwrap_or(defaults.max_connections),
            write_queue: self.write_queue.unwrap_or(defaults.write_queue),
        }
    }
}
