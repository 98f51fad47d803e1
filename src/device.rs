//! The public entry point: a connected device, reachable over USB or TCP,
//! offering shell, sync, and package operations.

use crate::config::Config;
use crate::error::AdbError;
use crate::fsm::ConnectionFsm;
use crate::keystore::KeyStore;
use crate::package;
use crate::shell;
use crate::stream::StreamEngine;
use crate::sync::{DirEntry, FileStat, SyncSession};
use crate::transport::{Transport, TcpTransport, UsbTransport};
use std::net::ToSocketAddrs;
use std::path::Path;

/// A device reachable over some [`Transport`], authenticated and ready to
/// dispatch commands. At most one stream is open at a time; every operation
/// here opens its stream, drives it to completion, and closes it before
/// returning.
pub struct Device<T: Transport> {
    transport: T,
    engine: StreamEngine,
    fsm: ConnectionFsm,
    keystore: KeyStore,
    config: Config,
}

impl Device<UsbTransport> {
    /// Connects to the sole attached USB device, or the one matching
    /// `serial` if given.
    pub fn connect_usb(serial: Option<&str>, config: Config) -> Result<Self, AdbError> {
        let transport = UsbTransport::connect(serial)?;
        Self::handshake(transport, config)
    }
}

impl Device<TcpTransport> {
    /// Connects over TCP, e.g. to an emulator or `adb tcpip`-enabled device.
    pub fn connect_tcp(addr: impl ToSocketAddrs, config: Config) -> Result<Self, AdbError> {
        let transport = TcpTransport::connect(addr)?;
        Self::handshake(transport, config)
    }
}

impl<T: Transport> Device<T> {
    /// Connects over an already-constructed transport. `connect_usb` and
    /// `connect_tcp` are thin wrappers around this for their respective
    /// transports; this entry point is for callers (and tests) supplying
    /// their own.
    pub fn connect(transport: T, config: Config) -> Result<Self, AdbError> {
        Self::handshake(transport, config)
    }

    fn handshake(mut transport: T, config: Config) -> Result<Self, AdbError> {
        let keystore = KeyStore::load_or_generate_at_path(&config.key_path)?;
        transport.set_timeout(config.connect_timeout);
        let mut fsm = ConnectionFsm::new();
        fsm.connect(&mut transport, &keystore, config.user_approval_timeout)?;
        log::debug!("device: handshake complete, identity={:?}", fsm.device_identity);
        Ok(Self {
            transport,
            engine: StreamEngine::new(),
            fsm,
            keystore,
            config,
        })
    }

    /// The device identity string learned from `CNXN`, e.g. `device::<id>`.
    pub fn identity(&self) -> Option<&str> {
        self.fsm.device_identity.as_deref()
    }

    /// Re-runs the handshake, e.g. after a `PendingUserApproval` error once
    /// the user has approved the host's key on the device screen.
    pub fn reconnect(&mut self) -> Result<(), AdbError> {
        log::debug!("device: reconnecting");
        self.fsm
            .connect(&mut self.transport, &self.keystore, self.config.user_approval_timeout)
    }

    /// Runs `command` in a device shell. When `echo_output` is set, each
    /// chunk of output is also printed as it arrives.
    pub fn shell(&mut self, command: &str, echo_output: bool) -> Result<Vec<u8>, AdbError> {
        shell::shell(&mut self.transport, &mut self.engine, command, echo_output)
    }

    pub fn stat(&mut self, path: &str) -> Result<FileStat, AdbError> {
        let mut session = SyncSession::open(&mut self.transport, &mut self.engine)?;
        let result = session.stat(path);
        let _ = session.quit();
        result
    }

    pub fn list(&mut self, path: &str) -> Result<Vec<DirEntry>, AdbError> {
        let mut session = SyncSession::open(&mut self.transport, &mut self.engine)?;
        let result = session.list(path);
        let _ = session.quit();
        result
    }

    pub fn push(&mut self, local: &Path, remote: &str) -> Result<(), AdbError> {
        if !local.exists() {
            return Err(AdbError::SyncError(format!("local file not found: {}", local.display())));
        }
        let mut session = SyncSession::open(&mut self.transport, &mut self.engine)?;
        let result = session.push(local, remote);
        let _ = session.quit();
        result
    }

    pub fn pull(&mut self, remote: &str, local: &Path) -> Result<(), AdbError> {
        let mut session = SyncSession::open(&mut self.transport, &mut self.engine)?;
        let result = session.pull(remote, local);
        let _ = session.quit();
        result
    }

    pub fn install(&mut self, apk: &Path) -> Result<String, AdbError> {
        package::install(&mut self.transport, &mut self.engine, apk)
    }

    pub fn uninstall(&mut self, package_name: &str) -> Result<String, AdbError> {
        package::uninstall(&mut self.transport, &mut self.engine, package_name)
    }

    pub fn reboot(mut self) -> Result<(), AdbError> {
        package::reboot(&mut self.transport, &mut self.engine)
    }
}
