//! Signal descriptor table
//!
//! Static mapping from frame identifiers to the named signal layouts packed
//! into their payloads. Pure data: validation happens when a frame is added,
//! the codec does the bit work.

pub mod database;

// Re-export key types for convenience
pub use database::{
    BitSpan, ByteOrder, DescriptorTable, FrameDescriptor, SignalDefinition,
    SignalLayout, TableStats,
};
