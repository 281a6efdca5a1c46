use thiserror::Error;

/// Errors surfaced at the layer boundaries of the stack.
///
/// Validation and duplicate errors are logged at the frame entry and the
/// offending buffer dropped there; `NoMacAddress` and `DeviceSend` are
/// transient and drive the deferred retry machinery instead of propagating.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetError {
    #[error("Initialization failed: {0}")]
    Init(&'static str),
    #[error("Frame not addressed to us")]
    WrongMac,
    #[error("Unknown EtherType: {0:#06x}")]
    UnknownEtherType(u16),
    #[error("Frame too short")]
    FrameTooShort,
    #[error("Malformed field: {0}")]
    WrongField(&'static str),
    #[error("Checksum mismatch")]
    WrongChecksum,
    #[error("Destination IP is not ours")]
    WrongIpAddress,
    #[error("Unknown IP protocol: {0}")]
    WrongProtocol(u8),
    #[error("Duplicate fragment at offset {0}")]
    DuplicateFragment(u32),
    #[error("No MAC binding for next hop")]
    NoMacAddress,
    #[error("Queue full")]
    QueueFull,
    #[error("Buffer pool exhausted")]
    PoolExhausted,
    #[error("Device rejected the frame")]
    DeviceSend,
    #[error("Not implemented")]
    NotImplemented,
    #[error("Stack is shutting down")]
    Shutdown,
}

/// What happened to the buffer a layer was handed.
///
/// Ownership transfer is enforced by moves; this enum reports which way the
/// buffer went so the frame entry point and tests can observe it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The message was handled to completion; the buffer has been released.
    Delivered,
    /// An asynchronous continuation (reassembly entry, send record or
    /// transport queue) now owns the buffer.
    Retained,
}
