//! Bus adapter hand-off
//!
//! The bus adapter (socket listener, log replayer, simulator) runs on its own
//! thread and hands frames to the core through a bounded channel. A full
//! channel is reported to the producer instead of growing without limit.
//!
//! Also provides a bus-load meter using the approximate frame cost of a
//! standard-ID classic CAN frame.

use crate::types::RawFrame;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;

/// Approximate overhead bits of a standard-ID frame (SOF, ID, control, CRC, ACK, EOF)
pub const FRAME_OVERHEAD_BITS: u64 = 47;

/// Default nominal bitrate of the lab bus
pub const DEFAULT_BITRATE: u64 = 500_000;

/// Errors reported to a frame producer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("Frame channel is full")]
    Full(RawFrame),

    #[error("Frame channel is closed")]
    Closed(RawFrame),
}

/// Every sender is gone and the queue is drained
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Frame channel is closed")]
pub struct Disconnected;

/// Create a bounded frame channel holding at most `capacity` frames
pub fn channel(capacity: usize) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    (FrameSender { tx }, FrameReceiver { rx })
}

/// Producer half, owned by the bus adapter; clone it for several producers
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: SyncSender<RawFrame>,
}

impl FrameSender {
    /// Queue a frame without blocking
    pub fn try_send(&self, frame: RawFrame) -> Result<(), SendError> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(frame) => {
                log::warn!("Frame channel full, dropping {}", frame);
                SendError::Full(frame)
            }
            TrySendError::Disconnected(frame) => SendError::Closed(frame),
        })
    }

    /// Queue a frame, waiting for space
    pub fn send(&self, frame: RawFrame) -> Result<(), SendError> {
        self.tx.send(frame).map_err(|e| SendError::Closed(e.0))
    }
}

/// Consumer half, owned by the core side
#[derive(Debug)]
pub struct FrameReceiver {
    rx: Receiver<RawFrame>,
}

impl FrameReceiver {
    /// Take a frame if one is queued
    pub fn try_recv(&self) -> Option<RawFrame> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for a frame
    ///
    /// Returns `Ok(None)` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<RawFrame>, Disconnected> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Disconnected),
        }
    }

    /// Blocking iterator ending when every sender is dropped
    pub fn iter(&self) -> impl Iterator<Item = RawFrame> + '_ {
        self.rx.iter()
    }
}

/// Bits on the wire for one frame, approximated as overhead + payload
pub fn frame_bits(frame: &RawFrame) -> u64 {
    FRAME_OVERHEAD_BITS + 8 * frame.dlc() as u64
}

/// Accumulates frame bits over a measurement window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusLoadMeter {
    bitrate: u64,
    frames: u64,
    payload_bits: u64,
    total_bits: u64,
}

impl BusLoadMeter {
    /// Create a meter for a bus running at `bitrate` bit/s
    pub fn new(bitrate: u64) -> Self {
        Self {
            bitrate,
            frames: 0,
            payload_bits: 0,
            total_bits: 0,
        }
    }

    /// Count a frame in the current window
    pub fn record(&mut self, frame: &RawFrame) {
        self.frames += 1;
        self.payload_bits += 8 * frame.dlc() as u64;
        self.total_bits += frame_bits(frame);
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn payload_bits(&self) -> u64 {
        self.payload_bits
    }

    pub fn total_bits(&self) -> u64 {
        self.total_bits
    }

    /// Load of the bus over `window`, in percent
    pub fn load_percent(&self, window: Duration) -> f64 {
        let capacity = self.bitrate as f64 * window.as_secs_f64();
        if capacity <= 0.0 {
            return 0.0;
        }
        self.total_bits as f64 / capacity * 100.0
    }

    /// True if counting `frame` would push the load over `limit_percent`
    pub fn would_exceed(&self, frame: &RawFrame, limit_percent: f64, window: Duration) -> bool {
        let mut next = self.clone();
        next.record(frame);
        next.load_percent(window) > limit_percent
    }

    /// Start a new window
    pub fn reset(&mut self) {
        self.frames = 0;
        self.payload_bits = 0;
        self.total_bits = 0;
    }
}

impl Default for BusLoadMeter {
    fn default() -> Self {
        Self::new(DEFAULT_BITRATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn frame(id: u32, len: usize) -> RawFrame {
        RawFrame::standard(id, vec![0xAA; len]).unwrap()
    }

    #[test]
    fn test_channel_bounded() {
        let (tx, rx) = channel(2);
        tx.try_send(frame(0x101, 8)).unwrap();
        tx.try_send(frame(0x102, 8)).unwrap();
        assert_eq!(tx.try_send(frame(0x103, 8)), Err(SendError::Full(frame(0x103, 8))));

        assert_eq!(rx.try_recv().map(|f| f.id()), Some(0x101));
        tx.try_send(frame(0x103, 8)).unwrap();
    }

    #[test]
    fn test_channel_hand_off_between_threads() {
        let (tx, rx) = channel(4);
        let producer = thread::spawn(move || {
            for id in 0x100..0x110 {
                tx.send(frame(id, 2)).unwrap();
            }
        });

        let ids: Vec<u32> = rx.iter().map(|f| f.id()).collect();
        producer.join().unwrap();
        assert_eq!(ids, (0x100..0x110).collect::<Vec<_>>());
    }

    #[test]
    fn test_recv_timeout_and_close() {
        let (tx, rx) = channel(1);
        assert_eq!(rx.recv_timeout(Duration::from_millis(1)), Ok(None));
        drop(tx);
        assert_eq!(rx.recv_timeout(Duration::from_millis(1)), Err(Disconnected));
    }

    #[test]
    fn test_frame_bits() {
        assert_eq!(frame_bits(&frame(0x101, 8)), 111);
        assert_eq!(frame_bits(&frame(0x101, 0)), 47);
    }

    #[test]
    fn test_bus_load() {
        let mut meter = BusLoadMeter::new(500_000);
        for _ in 0..1000 {
            meter.record(&frame(0x101, 8));
        }
        assert_eq!(meter.frames(), 1000);
        assert_eq!(meter.payload_bits(), 64_000);
        assert_eq!(meter.total_bits(), 111_000);
        assert!((meter.load_percent(Duration::from_secs(1)) - 22.2).abs() < 1e-9);

        assert!(!meter.would_exceed(&frame(0x101, 8), 30.0, Duration::from_secs(1)));
        assert!(meter.would_exceed(&frame(0x101, 8), 22.2, Duration::from_secs(1)));

        meter.reset();
        assert_eq!(meter.load_percent(Duration::from_secs(1)), 0.0);
        assert_eq!(meter.load_percent(Duration::ZERO), 0.0);
    }
}
