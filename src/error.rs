use std::io;
use thiserror::Error;

/// Errors surfaced by the Transport layer (USB bulk I/O or TCP).
///
/// Kept distinct from [`AdbError`] so the connection state machine can
/// special-case a timeout without inspecting a string.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("operation timed out")]
    Timeout,
    #[error("device disconnected")]
    Disconnected,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// The crate's single error type.
#[derive(Error, Debug)]
pub enum AdbError {
    #[error("no ADB-capable device found")]
    NoDevice,
    #[error("operation timed out")]
    Timeout,
    #[error("device disconnected")]
    Disconnected,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("bad magic in packet header")]
    BadMagic,
    #[error("bad checksum in packet payload")]
    BadChecksum,
    #[error("device refused authentication")]
    AuthRefused,
    #[error("device is waiting for the user to approve this host's key")]
    PendingUserApproval,
    #[error("protocol error: {0}")]
    ProtocolError(String),
    #[error("device refused to open stream")]
    StreamRefused,
    #[error("sync protocol error: {0}")]
    SyncError(String),
    #[error("RSA error: {0}")]
    Rsa(#[from] rsa::Error),
    #[error("key store error: {0}")]
    KeyStore(String),
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),
}

impl From<TransportError> for AdbError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => AdbError::Timeout,
            TransportError::Disconnected => AdbError::Disconnected,
            TransportError::Io(e) => AdbError::Io(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, AdbError>;
