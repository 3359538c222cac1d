//! Two-node lab bus demo
//!
//! A transmitting ECU sends EngineData frames on its own thread, failing
//! two attempts out of three, and broadcasts its TEC in a status frame. The
//! monitor side decodes everything arriving on the bus channel and reports
//! the bus load at the end.
//!
//! Usage:
//!   cargo run --example lab_bus -- [rounds]

use canlab_core::bus::{self, BusLoadMeter};
use canlab_core::{
    ByteOrder, DescriptorTable, FrameCodec, FrameDescriptor, NodeConfig, NodeStateMachine,
    SignalLayout,
};
use std::env;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const ENGINE_ID: u32 = 0x123;
const TEC_STATUS_ID: u32 = 0x301;
const TICK: Duration = Duration::from_millis(100);

fn lab_table() -> Result<DescriptorTable, canlab_core::ConfigError> {
    let engine = FrameDescriptor::new(ENGINE_ID, "EngineData").with_signal(
        "EngineSpeed",
        SignalLayout {
            start_bit: 24,
            bit_length: 16,
            byte_order: ByteOrder::LittleEndian,
            factor: 0.125,
            offset: 0.0,
            unit: "rpm".to_string(),
        },
    );
    let status = FrameDescriptor::new(TEC_STATUS_ID, "TecStatus")
        .with_length(2)
        .with_signal(
            "TEC",
            SignalLayout {
                start_bit: 0,
                bit_length: 16,
                byte_order: ByteOrder::BigEndian,
                factor: 1.0,
                offset: 0.0,
                unit: String::new(),
            },
        );
    DescriptorTable::from_frames([engine, status])
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let rounds: u32 = env::args().nth(1).map(|s| s.parse()).transpose()?.unwrap_or(100);
    let codec = Arc::new(FrameCodec::new(lab_table()?));
    let (tx, rx) = bus::channel(16);

    let ecu_codec = Arc::clone(&codec);
    let ecu = thread::spawn(move || -> canlab_core::Result<()> {
        let mut node = NodeStateMachine::new(NodeConfig::transmitter());
        let mut bus_off_round = 0;

        for round in 0..rounds {
            if !node.can_communicate() {
                if let Some(event) = node.on_bus_off_tick(TICK * (round - bus_off_round)) {
                    println!("ECU recovered, TEC={}", event.counter);
                }
                continue;
            }

            let event = if round % 3 != 0 {
                node.record_failure()?
            } else {
                let rpm = 800.0 + 25.0 * round as f64;
                let frame = ecu_codec.encode(ENGINE_ID, [("EngineSpeed", rpm)])?;
                if tx.send(frame).is_err() {
                    break;
                }
                node.on_success()?
            };

            if event.entered_bus_off() {
                bus_off_round = round;
                println!("ECU entered bus-off at round {}", round);
            }
            if tx.send(event.to_status_frame(TEC_STATUS_ID)?).is_err() {
                break;
            }
        }
        Ok(())
    });

    let mut meter = BusLoadMeter::default();
    for frame in rx.iter() {
        meter.record(&frame);
        match codec.decode(&frame) {
            Ok(decoded) => {
                let values: Vec<String> = decoded.signals.iter().map(|s| s.to_string()).collect();
                println!("{:<22} {}", frame.to_string(), values.join(", "));
            }
            Err(e) => eprintln!("{}: {}", frame, e),
        }
    }

    match ecu.join() {
        Ok(result) => result?,
        Err(_) => return Err("ECU thread panicked".into()),
    }

    let window = TICK * rounds;
    println!(
        "\n{} frames over {:?}: {:.2}% load at 500 kbit/s",
        meter.frames(),
        window,
        meter.load_percent(window)
    );
    Ok(())
}
