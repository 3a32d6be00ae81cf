//! Error taxonomy for the base station engine.
//!
//! Three families, one per subsystem that can fail: [`CodecError`] for
//! malformed wire data, [`StoreError`] for node-store ingestion rejections,
//! and [`RadioError`] for transceiver I/O. None of these are surfaced to a
//! packet's sender — per the propagation policy, parse/ingestion failures
//! are logged and the frame is dropped; only [`CodecError::DataTooLong`] is
//! a programmer error returned synchronously from `build_command`.

use thiserror::Error;

/// Errors returned while parsing or building wire frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Buffer shorter than the declared or required length.
    #[error("buffer too short for this frame")]
    TooShort,
    /// Sync word did not match any recognized frame kind.
    #[error("sync word mismatch")]
    BadSync,
    /// CRC-16 verification failed.
    #[error("CRC mismatch")]
    BadCrc,
    /// Declared data length exceeds the container that holds it.
    #[error("declared data length exceeds container")]
    BadLength,
    /// Caller-supplied command payload exceeds 192 bytes. Programmer error.
    #[error("command payload too long ({0} > 192 bytes)")]
    DataTooLong(usize),
}

/// Errors surfaced by the node store's ingestion path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Sensor id fell in the reserved set `{0, 255}`.
    #[error("sensor id {0} is reserved")]
    ReservedNode(u8),
    /// Node creation was rejected because `MAX_NODES` was already reached.
    #[error("node population cap reached, rejecting node {0}")]
    PopulationExceeded(u8),
    /// The durable time-series write or read failed.
    #[error("durable store I/O error: {0}")]
    StoreIo(String),
}

/// Errors surfaced by the radio gateway's transceiver calls.
#[derive(Debug, Error)]
pub enum RadioError {
    /// Transient transceiver I/O error (receive or send).
    #[error("radio I/O error: {0}")]
    RadioIo(String),
}
