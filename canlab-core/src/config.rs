//! Node configuration types
//!
//! The error counter increments and thresholds of the lab nodes are
//! simplifications, so they live here as configurable defaults rather than
//! as protocol constants.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Role a node plays on the bus; selects the default failure increment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Tracks a transmit error counter (TEC)
    Transmitter,
    /// Tracks a receive error counter (REC)
    Receiver,
}

impl NodeRole {
    /// Default counter increment for one failed attempt
    pub fn default_increment(&self) -> u32 {
        match self {
            NodeRole::Transmitter => 8,
            NodeRole::Receiver => 1,
        }
    }

    /// Short counter label (TEC / REC)
    pub fn counter_label(&self) -> &'static str {
        match self {
            NodeRole::Transmitter => "TEC",
            NodeRole::Receiver => "REC",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Transmitter => write!(f, "transmitter"),
            NodeRole::Receiver => write!(f, "receiver"),
        }
    }
}

/// Configuration for one node error-state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node role (label and default increment)
    pub role: NodeRole,

    /// Counter increment per failure (default: 8 for transmitters, 1 for receivers)
    #[serde(default)]
    pub failure_increment: Option<u32>,

    /// Counter value at which the node leaves Error-Active (default: 128)
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: u32,

    /// Counter value at which the node becomes Error-Passive (default: disabled)
    #[serde(default)]
    pub passive_threshold: Option<u32>,

    /// Highest counter value before bus-off (default: 255)
    #[serde(default = "default_bus_off_limit")]
    pub bus_off_limit: u32,

    /// Bus-off recovery delay in milliseconds (default: 2000ms)
    #[serde(default = "default_recovery_delay_ms")]
    pub recovery_delay_ms: u64,
}

fn default_warning_threshold() -> u32 {
    128
}

fn default_bus_off_limit() -> u32 {
    255
}

fn default_recovery_delay_ms() -> u64 {
    2000
}

impl NodeConfig {
    /// Create a configuration with the defaults for a role
    pub fn new(role: NodeRole) -> Self {
        Self {
            role,
            failure_increment: None,
            warning_threshold: default_warning_threshold(),
            passive_threshold: None,
            bus_off_limit: default_bus_off_limit(),
            recovery_delay_ms: default_recovery_delay_ms(),
        }
    }

    /// Defaults for a transmitting node (increment 8)
    pub fn transmitter() -> Self {
        Self::new(NodeRole::Transmitter)
    }

    /// Defaults for a receiving node (increment 1)
    pub fn receiver() -> Self {
        Self::new(NodeRole::Receiver)
    }

    /// Builder method: override the failure increment
    pub fn with_failure_increment(mut self, increment: u32) -> Self {
        self.failure_increment = Some(increment);
        self
    }

    /// Builder method: set the Error-Warning threshold
    pub fn with_warning_threshold(mut self, threshold: u32) -> Self {
        self.warning_threshold = threshold;
        self
    }

    /// Builder method: enable an Error-Passive threshold
    pub fn with_passive_threshold(mut self, threshold: u32) -> Self {
        self.passive_threshold = Some(threshold);
        self
    }

    /// Builder method: set the highest counter value tolerated before bus-off
    pub fn with_bus_off_limit(mut self, limit: u32) -> Self {
        self.bus_off_limit = limit;
        self
    }

    /// Builder method: set the bus-off recovery delay
    pub fn with_recovery_delay(mut self, delay: Duration) -> Self {
        self.recovery_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Effective failure increment
    pub fn increment(&self) -> u32 {
        self.failure_increment
            .unwrap_or_else(|| self.role.default_increment())
    }

    /// Bus-off recovery delay
    pub fn recovery_delay(&self) -> Duration {
        Duration::from_millis(self.recovery_delay_ms)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::transmitter()
    }
}
