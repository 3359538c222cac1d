//! CAN Lab Core Library
//!
//! The two pieces of CAN bus lab work that need exact arithmetic, as a
//! reusable library:
//! - A bit-level signal codec packing named, scaled signals into frame payloads
//! - A per-node fault-confinement state machine with bus-off recovery
//! - A CRC-15 validator classifying frames for fault-injection tests
//!
//! The library does NOT:
//! - Open sockets or talk to CAN hardware
//! - Parse DBC files
//! - Write CSV logs or draw plots
//!
//! Bus adapters hand frames in through [`bus::channel`] and consume decoded
//! values and status events. All timing is passed in by the caller.
//!
//! # Example Usage
//!
//! ```
//! use canlab_core::{ByteOrder, DescriptorTable, FrameCodec, FrameDescriptor, SignalLayout};
//!
//! let engine = FrameDescriptor::new(0x123, "EngineData").with_signal(
//!     "EngineSpeed",
//!     SignalLayout {
//!         start_bit: 24,
//!         bit_length: 16,
//!         byte_order: ByteOrder::LittleEndian,
//!         factor: 0.125,
//!         offset: 0.0,
//!         unit: "rpm".to_string(),
//!     },
//! );
//! let codec = FrameCodec::new(DescriptorTable::from_frames([engine]).unwrap());
//!
//! let frame = codec.encode(0x123, [("EngineSpeed", 2000.0)]).unwrap();
//! let decoded = codec.decode(&frame).unwrap();
//! assert_eq!(decoded.physical("EngineSpeed"), Some(2000.0));
//! ```

// Public modules
pub mod bus;
pub mod codec;
pub mod config;
pub mod crc;
pub mod node;
pub mod signals;
pub mod types;

// Re-export main types for convenience
pub use codec::FrameCodec;
pub use config::{NodeConfig, NodeRole};
pub use crc::{ErrorTally, FrameOutcome};
pub use node::{NodeState, NodeStateMachine, NodeStatus, StampedStatus, StatusEvent};
pub use signals::{ByteOrder, DescriptorTable, FrameDescriptor, SignalDefinition, SignalLayout};
pub use types::{
    ConfigError, DecodeError, DecodedFrame, DecodedSignal, EncodeError, Error, FrameError,
    RawFrame, Result, StateError, Timestamp,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
