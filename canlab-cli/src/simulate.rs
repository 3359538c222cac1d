//! Node simulation
//!
//! Drives one node error-state machine with random send outcomes, one per
//! tick, on a simulated clock. While the node is bus-off no send is
//! attempted; the time spent bus-off is passed to recovery instead.

use anyhow::{bail, Result};
use canlab_core::{NodeConfig, NodeStateMachine, StampedStatus, StatusEvent, Timestamp};
use chrono::TimeDelta;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::time::Duration;

/// Default chance that one send attempt fails
pub const DEFAULT_FAILURE_PROBABILITY: f64 = 0.35;

#[derive(Debug, Clone)]
pub struct SimulationSettings {
    pub ticks: u64,
    pub tick: Duration,
    pub failure_probability: f64,
    pub seed: Option<u64>,
    pub start: Timestamp,
}

/// What happened on one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickOutcome {
    Success,
    Failure,
    Recovering,
    Recovered,
}

/// One JSON line of simulation output
#[derive(Debug, Clone, Serialize)]
pub struct TickRecord {
    pub tick: u64,
    pub outcome: TickOutcome,
    #[serde(flatten)]
    pub status: StampedStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_frame: Option<String>,
}

pub struct Simulator {
    node: NodeStateMachine,
    rng: StdRng,
    settings: SimulationSettings,
    status_frame_id: Option<u32>,
    clock: Timestamp,
    tick: u64,
    /// Simulated time since the node entered bus-off
    bus_off_for: Duration,
}

impl Simulator {
    pub fn new(
        config: NodeConfig,
        settings: SimulationSettings,
        status_frame_id: Option<u32>,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&settings.failure_probability) {
            bail!(
                "Failure probability must be within 0..=1, got {}",
                settings.failure_probability
            );
        }

        let seed = settings.seed.unwrap_or_else(rand::random);
        log::info!(
            "Simulating {} node for {} ticks of {:?} (seed {})",
            config.role,
            settings.ticks,
            settings.tick,
            seed
        );

        Ok(Self {
            node: NodeStateMachine::new(config),
            rng: StdRng::seed_from_u64(seed),
            clock: settings.start,
            settings,
            status_frame_id,
            tick: 0,
            bus_off_for: Duration::ZERO,
        })
    }

    pub fn node(&self) -> &NodeStateMachine {
        &self.node
    }

    /// Advance one tick; `None` once every tick has run
    pub fn step(&mut self) -> Result<Option<TickRecord>> {
        if self.tick >= self.settings.ticks {
            return Ok(None);
        }
        self.tick += 1;
        self.clock += TimeDelta::from_std(self.settings.tick)?;

        let (outcome, event) = if self.node.can_communicate() {
            let failed = self.rng.random_bool(self.settings.failure_probability);
            let event = if failed {
                self.node.record_failure()
            } else {
                self.node.on_success()
            };
            match event {
                Ok(event) if failed => (TickOutcome::Failure, event),
                Ok(event) => (TickOutcome::Success, event),
                Err(e) => return Err(e.into()),
            }
        } else {
            self.bus_off_for += self.settings.tick;
            match self.node.on_bus_off_tick(self.bus_off_for) {
                Some(event) => (TickOutcome::Recovered, event),
                None => (TickOutcome::Recovering, self.snapshot()),
            }
        };

        if event.entered_bus_off() {
            self.bus_off_for = Duration::ZERO;
        }

        let status_frame = match self.status_frame_id {
            Some(id) => Some(event.to_status_frame(id)?.to_string()),
            None => None,
        };

        Ok(Some(TickRecord {
            tick: self.tick,
            outcome,
            status: event.stamped(self.clock),
            status_frame,
        }))
    }

    fn snapshot(&self) -> StatusEvent {
        StatusEvent {
            role: self.node.role(),
            counter: self.node.counter(),
            status: self.node.status(),
            previous: self.node.status(),
        }
    }
}

impl Iterator for Simulator {
    type Item = Result<TickRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.step().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canlab_core::NodeStatus;

    fn settings(ticks: u64, failure_probability: f64) -> SimulationSettings {
        SimulationSettings {
            ticks,
            tick: Duration::from_millis(100),
            failure_probability,
            seed: Some(7),
            start: chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn test_always_failing_transmitter_goes_bus_off_and_recovers() {
        let sim = Simulator::new(NodeConfig::transmitter(), settings(60, 1.0), None).unwrap();
        let records = sim.collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(records.len(), 60);

        // 32 failures of 8 reach 256
        assert_eq!(records[31].outcome, TickOutcome::Failure);
        assert_eq!(records[31].status.counter, 256);
        assert_eq!(records[31].status.state, NodeStatus::BusOff);

        // Time since bus-off reaches 2000 ms on the 20th tick of 100 ms
        assert!(records[32..51].iter().all(|r| r.outcome == TickOutcome::Recovering));
        assert!(records[32..51].iter().all(|r| r.status.counter == 256));
        assert_eq!(records[51].outcome, TickOutcome::Recovered);
        assert_eq!(records[51].status.counter, 0);
        assert_eq!(records[52].status.counter, 8);
    }

    #[test]
    fn test_second_bus_off_waits_full_delay() {
        let sim = Simulator::new(NodeConfig::transmitter(), settings(110, 1.0), None).unwrap();
        let records = sim.collect::<Result<Vec<_>>>().unwrap();

        assert_eq!(records[83].status.state, NodeStatus::BusOff);
        assert!(records[84..103].iter().all(|r| r.outcome == TickOutcome::Recovering));
        assert_eq!(records[103].outcome, TickOutcome::Recovered);
    }

    #[test]
    fn test_never_failing_node_stays_active() {
        let sim = Simulator::new(NodeConfig::receiver(), settings(20, 0.0), Some(0x302)).unwrap();
        for record in sim {
            let record = record.unwrap();
            assert_eq!(record.outcome, TickOutcome::Success);
            assert_eq!(record.status.counter, 0);
            assert_eq!(record.status_frame.as_deref(), Some("302#0000"));
        }
    }

    #[test]
    fn test_seeded_runs_repeat() {
        let run = || -> Vec<u32> {
            Simulator::new(NodeConfig::receiver(), settings(200, 0.35), None)
                .unwrap()
                .map(|r| r.unwrap().status.counter)
                .collect()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_clock_advances_per_tick() {
        let mut sim = Simulator::new(NodeConfig::receiver(), settings(2, 0.5), None).unwrap();
        let first = sim.step().unwrap().unwrap();
        let second = sim.step().unwrap().unwrap();
        assert_eq!(
            second.status.timestamp - first.status.timestamp,
            TimeDelta::milliseconds(100)
        );
        assert!(sim.step().unwrap().is_none());
    }

    #[test]
    fn test_rejects_bad_probability() {
        assert!(Simulator::new(NodeConfig::receiver(), settings(1, 1.5), None).is_err());
    }

    #[test]
    fn test_record_serializes_flat() {
        let mut sim = Simulator::new(NodeConfig::receiver(), settings(1, 1.0), Some(0x302)).unwrap();
        let record = sim.step().unwrap().unwrap();
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"tick":1,"outcome":"failure","timestamp":"2023-11-14T22:13:20.100Z","role":"receiver","counter":1,"state":"ErrorActive","status_frame":"302#0001"}"#
        );
    }
}
