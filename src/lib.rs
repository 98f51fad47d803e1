pub mod config;
pub mod device;
pub mod error;
pub mod fsm;
pub mod keystore;
pub mod package;
pub mod packet;
pub mod pubkey;
pub mod shell;
pub mod stream;
pub mod sync;
pub mod transport;
pub mod usb;

pub use device::Device;
pub use error::{AdbError, Result};
