//! Node error-state machine
//!
//! One configurable machine models both historical node roles: a transmitter
//! counting TEC in steps of 8 and a receiver counting REC in steps of 1. The
//! machine owns its counter, derives a qualitative status from it and handles
//! bus-off recovery from the time since bus-off, supplied by the caller. It performs no
//! I/O and holds no locks; each node owns exactly one instance.

use crate::config::{NodeConfig, NodeRole};
use crate::types::{FrameError, RawFrame, StateError, Timestamp};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Qualitative fault-confinement status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeStatus {
    ErrorActive,
    ErrorWarning,
    ErrorPassive,
    BusOff,
}

impl NodeStatus {
    /// Dashboard label used by the lab tools
    pub fn label(&self) -> &'static str {
        match self {
            NodeStatus::ErrorActive => "OK",
            NodeStatus::ErrorWarning => "WARNING",
            NodeStatus::ErrorPassive => "PASSIVE",
            NodeStatus::BusOff => "BUS_OFF",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Status plus recovery flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeState {
    pub status: NodeStatus,
    /// Set on entering bus-off, cleared on recovery
    pub recovering: bool,
}

impl NodeState {
    fn active() -> Self {
        Self {
            status: NodeStatus::ErrorActive,
            recovering: false,
        }
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering
    }
}

/// Emitted on every processed outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusEvent {
    pub role: NodeRole,
    pub counter: u32,
    pub status: NodeStatus,
    pub previous: NodeStatus,
}

impl StatusEvent {
    /// True if this event moved the node into bus-off
    pub fn entered_bus_off(&self) -> bool {
        self.status == NodeStatus::BusOff && self.previous != NodeStatus::BusOff
    }

    /// True if this event brought the node back from bus-off
    pub fn recovered(&self) -> bool {
        self.previous == NodeStatus::BusOff && self.status != NodeStatus::BusOff
    }

    /// Attach the time the outcome was observed
    pub fn stamped(self, timestamp: Timestamp) -> StampedStatus {
        StampedStatus {
            timestamp,
            role: self.role,
            counter: self.counter,
            state: self.status,
        }
    }

    /// Frame broadcasting the counter as two big-endian bytes
    ///
    /// Counters above `u16::MAX` are clamped.
    pub fn to_status_frame(&self, id: u32) -> Result<RawFrame, FrameError> {
        let counter = u16::try_from(self.counter).unwrap_or(u16::MAX);
        RawFrame::standard(id, counter.to_be_bytes().to_vec())
    }
}

/// Status event with its observation time, as consumed by dashboards and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StampedStatus {
    pub timestamp: Timestamp,
    pub role: NodeRole,
    pub counter: u32,
    pub state: NodeStatus,
}

/// Fault-confinement state machine for one node
#[derive(Debug, Clone)]
pub struct NodeStateMachine {
    config: NodeConfig,
    counter: u32,
    state: NodeState,
}

impl NodeStateMachine {
    /// Create a node with counter 0 in Error-Active
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            counter: 0,
            state: NodeState::active(),
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn role(&self) -> NodeRole {
        self.config.role
    }

    /// Current error counter
    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn status(&self) -> NodeStatus {
        self.state.status
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// False while bus-off: the node must neither send nor receive
    pub fn can_communicate(&self) -> bool {
        self.state.status != NodeStatus::BusOff
    }

    /// Classify a counter value against the configured thresholds
    pub fn status_for(&self, counter: u32) -> NodeStatus {
        if counter > self.config.bus_off_limit {
            NodeStatus::BusOff
        } else if self.config.passive_threshold.is_some_and(|p| counter >= p) {
            NodeStatus::ErrorPassive
        } else if counter >= self.config.warning_threshold {
            NodeStatus::ErrorWarning
        } else {
            NodeStatus::ErrorActive
        }
    }

    /// A send or receive attempt succeeded: counter decreases by one, floored at 0
    pub fn on_success(&mut self) -> Result<StatusEvent, StateError> {
        if !self.can_communicate() {
            return Err(StateError::BusOff);
        }
        Ok(self.apply(self.counter.saturating_sub(1)))
    }

    /// A send or receive attempt failed: counter increases by `increment`
    ///
    /// Negative increments are rejected without touching the state. Passing
    /// the bus-off limit moves the node to bus-off and starts recovery.
    pub fn on_failure(&mut self, increment: i64) -> Result<StatusEvent, StateError> {
        if increment < 0 {
            return Err(StateError::InvalidIncrement(increment));
        }
        if !self.can_communicate() {
            return Err(StateError::BusOff);
        }
        let step = u32::try_from(increment).unwrap_or(u32::MAX);
        Ok(self.apply(self.counter.saturating_add(step)))
    }

    /// A failure with the configured increment for this node's role
    pub fn record_failure(&mut self) -> Result<StatusEvent, StateError> {
        self.on_failure(i64::from(self.config.increment()))
    }

    /// Check bus-off recovery, `elapsed` being the time since bus-off was entered
    ///
    /// Once `elapsed` reaches the recovery delay the counter is reset and the
    /// node returns to Error-Active. Below the delay the node stays bus-off
    /// and nothing changes. Returns the transition event, or `None` if
    /// nothing changed. Outside bus-off this is a no-op.
    pub fn on_bus_off_tick(&mut self, elapsed: Duration) -> Option<StatusEvent> {
        if !self.state.recovering || elapsed < self.config.recovery_delay() {
            return None;
        }

        let previous = self.state.status;
        self.counter = 0;
        self.state = NodeState::active();
        log::info!(
            "{} node recovered from bus-off after {:?}",
            self.config.role,
            elapsed
        );

        Some(StatusEvent {
            role: self.config.role,
            counter: self.counter,
            status: self.state.status,
            previous,
        })
    }

    fn apply(&mut self, counter: u32) -> StatusEvent {
        let previous = self.state.status;
        let status = self.status_for(counter);

        self.counter = counter;
        self.state.status = status;

        if status == NodeStatus::BusOff {
            self.state.recovering = true;
            log::info!(
                "{} node entered bus-off ({}={})",
                self.config.role,
                self.config.role.counter_label(),
                counter
            );
        } else if status != previous {
            log::debug!(
                "{} node {} -> {} ({}={})",
                self.config.role,
                previous,
                status,
                self.config.role.counter_label(),
                counter
            );
        }

        StatusEvent {
            role: self.config.role,
            counter,
            status,
            previous,
        }
    }
}
