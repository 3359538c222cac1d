//! CAN Lab CLI Application
//!
//! Command-line front end for the canlab-core library:
//! - Encode and decode frames against a TOML frame table
//! - Compute and check CRC-15 values, with fault injection
//! - Simulate a node's error counter through bus-off and recovery
//! - Estimate bus load for a set of frames

use anyhow::{bail, Context, Result};
use canlab_core::bus::{self, BusLoadMeter};
use canlab_core::crc::{self, ErrorTally};
use canlab_core::{FrameCodec, NodeConfig, NodeRole, RawFrame};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

mod config;
mod frames;
mod simulate;

use config::AppConfig;
use simulate::{SimulationSettings, Simulator, DEFAULT_FAILURE_PROBABILITY};

/// CAN Lab - signal codec, CRC checks and node error-state simulation
#[derive(Parser, Debug)]
#[command(name = "canlab")]
#[command(about = "Encode, decode and simulate CAN lab traffic", long_about = None)]
#[command(version)]
struct Args {
    /// Path to configuration file (frames and nodes)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode physical signal values into a frame
    Encode {
        /// Frame id in hex
        #[arg(long, value_parser = frames::parse_id)]
        id: u32,

        /// Signal values
        #[arg(value_name = "SIGNAL=VALUE", required = true)]
        values: Vec<String>,
    },

    /// Decode frames given as ID#DATA (read from stdin when none are given)
    Decode {
        #[arg(value_name = "FRAME")]
        frames: Vec<String>,

        /// Print one JSON object per frame
        #[arg(long)]
        json: bool,
    },

    /// CRC-15 tools
    Crc {
        #[command(subcommand)]
        action: CrcAction,
    },

    /// Simulate one node's error counter with random send failures
    Simulate {
        /// Node name from the configuration file
        #[arg(long, conflicts_with = "role")]
        node: Option<String>,

        /// Node role when no configured node is used
        #[arg(long, value_enum, default_value = "transmitter")]
        role: RoleArg,

        /// Number of ticks to run
        #[arg(long, default_value_t = 100)]
        ticks: u64,

        /// Simulated time per tick in milliseconds
        #[arg(long, default_value_t = 100)]
        tick_ms: u64,

        /// Chance that one send attempt fails
        #[arg(long, default_value_t = DEFAULT_FAILURE_PROBABILITY)]
        failure_probability: f64,

        /// Seed for a reproducible run
        #[arg(long)]
        seed: Option<u64>,

        /// Also broadcast the counter in a status frame with this id (hex)
        #[arg(long, value_parser = frames::parse_id)]
        status_id: Option<u32>,
    },

    /// Estimate bus load for frames sent once per window
    Busload {
        #[arg(value_name = "FRAME", required = true)]
        frames: Vec<String>,

        /// Measurement window in milliseconds
        #[arg(long, default_value_t = 1000)]
        window_ms: u64,

        /// Bitrate in bit/s (default: from config, else 500000)
        #[arg(long)]
        bitrate: Option<u64>,

        /// Report which frames push the load over this percentage
        #[arg(long)]
        limit: Option<f64>,
    },
}

#[derive(Subcommand, Debug)]
enum CrcAction {
    /// Print the CRC-15 of a hex payload
    Compute { payload: String },

    /// Append the CRC-15 to a hex payload
    Seal { payload: String },

    /// Classify sealed hex data against the payload the sender meant
    Check {
        data: String,

        /// Expected payload (default: the payload carried in DATA)
        #[arg(long)]
        expected: Option<String>,
    },

    /// Run the three fault-injection cases on a payload
    Inject { payload: String },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum RoleArg {
    Transmitter,
    Receiver,
}

impl From<RoleArg> for NodeRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Transmitter => NodeRole::Transmitter,
            RoleArg::Receiver => NodeRole::Receiver,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!("CAN Lab CLI v{}", env!("CARGO_PKG_VERSION"));
    log::debug!("Using core library v{}", canlab_core::VERSION);

    let config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };

    match args.command {
        Command::Encode { id, values } => encode_mode(&config, id, &values),
        Command::Decode { frames, json } => decode_mode(&config, frames, json),
        Command::Crc { action } => crc_mode(action),
        Command::Simulate {
            node,
            role,
            ticks,
            tick_ms,
            failure_probability,
            seed,
            status_id,
        } => {
            let (node_config, configured_id) = match node {
                Some(name) => {
                    let entry = config
                        .node(&name)
                        .with_context(|| format!("No node named {:?} in configuration", name))?;
                    (entry.config.clone(), entry.status_frame_id)
                }
                None => (NodeConfig::new(role.into()), None),
            };
            let settings = SimulationSettings {
                ticks,
                tick: Duration::from_millis(tick_ms),
                failure_probability,
                seed,
                start: chrono::Utc::now(),
            };
            simulate_mode(node_config, settings, status_id.or(configured_id))
        }
        Command::Busload {
            frames,
            window_ms,
            bitrate,
            limit,
        } => busload_mode(
            &frames,
            Duration::from_millis(window_ms),
            bitrate.unwrap_or(config.bus.bitrate),
            limit,
        ),
    }
}

fn build_codec(config: &AppConfig) -> Result<FrameCodec> {
    let table = config.descriptor_table()?;
    let stats = table.stats();
    if stats.num_frames == 0 {
        bail!("No frames defined; pass --config with a [[frames]] table");
    }
    log::info!(
        "Frame table: {} frames, {} signals",
        stats.num_frames,
        stats.num_signals
    );
    Ok(FrameCodec::new(table))
}

fn encode_mode(config: &AppConfig, id: u32, values: &[String]) -> Result<()> {
    let codec = build_codec(config)?;
    let values = values
        .iter()
        .map(|v| frames::parse_assignment(v))
        .collect::<Result<Vec<_>, _>>()?;

    let frame = codec
        .encode(id, values.iter().map(|(name, value)| (name.as_str(), *value)))
        .with_context(|| format!("Failed to encode frame 0x{:X}", id))?;

    println!("{}", frame);
    Ok(())
}

/// Decode frames, fed through the bounded bus channel from a reader thread
fn decode_mode(config: &AppConfig, inputs: Vec<String>, json: bool) -> Result<()> {
    let codec = build_codec(config)?;
    let (tx, rx) = bus::channel(64);

    let reader = thread::spawn(move || -> Result<()> {
        let lines: Box<dyn Iterator<Item = io::Result<String>>> = if inputs.is_empty() {
            Box::new(io::stdin().lock().lines())
        } else {
            Box::new(inputs.into_iter().map(Ok))
        };

        for line in lines {
            let line = line.context("Failed to read frame input")?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match frames::parse_frame(line) {
                Ok(frame) => tx.send(frame)?,
                Err(e) => log::warn!("Skipping input: {}", e),
            }
        }
        Ok(())
    });

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut decoded_count = 0usize;
    let mut failed_count = 0usize;

    for frame in rx.iter() {
        match codec.decode(&frame) {
            Ok(decoded) => {
                decoded_count += 1;
                if json {
                    writeln!(out, "{}", serde_json::to_string(&decoded)?)?;
                } else {
                    writeln!(out, "{} {} (0x{:X})", frame, decoded.name, decoded.id)?;
                    for signal in &decoded.signals {
                        writeln!(out, "  {}", signal)?;
                    }
                }
            }
            Err(e) => {
                failed_count += 1;
                log::warn!("{}: {}", frame, e);
            }
        }
    }

    match reader.join() {
        Ok(result) => result?,
        Err(_) => bail!("Frame reader thread panicked"),
    }

    log::info!("Decoded {} frames, {} failed", decoded_count, failed_count);
    Ok(())
}

fn crc_mode(action: CrcAction) -> Result<()> {
    match action {
        CrcAction::Compute { payload } => {
            let payload = frames::parse_hex(&payload)?;
            println!("0x{:04X}", crc::compute(&payload));
        }
        CrcAction::Seal { payload } => {
            let payload = frames::parse_hex(&payload)?;
            println!("{}", frames::to_hex(&crc::seal(&payload)));
        }
        CrcAction::Check { data, expected } => {
            let data = frames::parse_hex(&data)?;
            let expected = match expected {
                Some(text) => frames::parse_hex(&text)?,
                None => crc::unseal(&data)
                    .map(|(payload, _)| payload.to_vec())
                    .context("Sealed data needs at least one payload byte and two CRC bytes")?,
            };
            let mut tally = ErrorTally::new();
            println!("{}", tally.check_sealed(&data, &expected));
        }
        CrcAction::Inject { payload } => {
            let payload = frames::parse_hex(&payload)?;
            let valid_crc = crc::compute(&payload);
            let mut tally = ErrorTally::new();

            let cases = [
                ("valid", payload.clone(), valid_crc),
                ("bit flip", crc::flip_payload_bit(&payload), valid_crc),
                ("bad crc", payload.clone(), crc::corrupt_crc(valid_crc)),
            ];
            for (label, received, received_crc) in cases {
                let outcome = tally.record(crc::classify(&received, received_crc, &payload));
                println!(
                    "{:<9} {} crc=0x{:04X} -> {}",
                    label,
                    frames::to_hex(&received),
                    received_crc,
                    outcome
                );
            }
            log::info!(
                "{} checked: {} ok, {} CRC errors, {} bit errors",
                tally.total(),
                tally.ok,
                tally.crc_errors,
                tally.bit_errors
            );
        }
    }
    Ok(())
}

fn simulate_mode(
    node_config: NodeConfig,
    settings: SimulationSettings,
    status_frame_id: Option<u32>,
) -> Result<()> {
    let mut simulator = Simulator::new(node_config, settings, status_frame_id)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut recoveries = 0u32;

    while let Some(record) = simulator.step()? {
        if record.outcome == simulate::TickOutcome::Recovered {
            recoveries += 1;
        }
        writeln!(out, "{}", serde_json::to_string(&record)?)?;
    }

    let node = simulator.node();
    log::info!(
        "Simulation finished: {}={} {}, {} recoveries",
        node.role().counter_label(),
        node.counter(),
        node.status(),
        recoveries
    );
    Ok(())
}

fn busload_mode(inputs: &[String], window: Duration, bitrate: u64, limit: Option<f64>) -> Result<()> {
    let frames = inputs
        .iter()
        .map(|text| frames::parse_frame(text))
        .collect::<Result<Vec<RawFrame>, _>>()?;

    let mut meter = BusLoadMeter::new(bitrate);
    for frame in &frames {
        if let Some(limit) = limit {
            if meter.would_exceed(frame, limit, window) {
                println!("{} would exceed {:.1}% load", frame, limit);
            }
        }
        meter.record(frame);
    }

    println!(
        "{} frames, {} payload bits, {} total bits",
        meter.frames(),
        meter.payload_bits(),
        meter.total_bits()
    );
    println!(
        "Bus load: {:.2}% of {} bit/s over {:?}",
        meter.load_percent(window),
        bitrate,
        window
    );
    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
