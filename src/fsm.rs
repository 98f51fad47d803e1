//! The connection handshake state machine: NOT_CONNECTED -> WAIT_FOR_AUTH ->
//! (SEND_PRIVATE_KEY | SEND_PUBLIC_KEY) -> CONNECTED.

use crate::error::AdbError;
use crate::keystore::KeyStore;
use crate::packet::{self, Command, Message, AUTH_TOKEN};
use crate::transport::Transport;
use std::time::Duration;

const SYSTEM_IDENTITY: &str = "host::";

/// Explicit connection states; never encoded as opaque integers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    NotConnected,
    WaitForAuth,
    SendPrivateKey,
    SendPublicKey,
    Connected,
}

pub struct ConnectionFsm {
    state: ConnectionState,
    /// The device's own `host::`-style identity string, learned from CNXN.
    pub device_identity: Option<String>,
}

impl Default for ConnectionFsm {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionFsm {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::NotConnected,
            device_identity: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Drives the handshake to completion (CONNECTED) or a terminal error.
    /// On `PendingUserApproval`, `self` resets to `NotConnected` and the
    /// caller may call `connect` again once the user has approved the key
    /// on the device.
    pub fn connect(
        &mut self,
        transport: &mut impl Transport,
        keystore: &KeyStore,
        user_approval_timeout: Duration,
    ) -> Result<(), AdbError> {
        self.state = ConnectionState::NotConnected;
        packet::send_message(transport, &Message::cnxn(SYSTEM_IDENTITY))?;
        self.state = ConnectionState::WaitForAuth;
        log::debug!("fsm: NotConnected -> WaitForAuth");

        loop {
            let msg = match packet::recv_message(transport) {
                Ok(msg) => msg,
                Err(AdbError::Timeout) => {
                    return self.handle_timeout(transport, keystore, user_approval_timeout);
                }
                Err(err) => return Err(err),
            };

            match (self.state, msg.command) {
                (_, Command::Cnxn) => {
                    let identity = String::from_utf8_lossy(&msg.payload);
                    let identity = identity.trim_end_matches('\0');
                    self.device_identity = Some(identity.to_string());
                    self.state = ConnectionState::Connected;
                    log::debug!("fsm: -> Connected, device_identity={identity:?}");
                    return Ok(());
                }
                (ConnectionState::WaitForAuth, Command::Auth) if msg.arg0 == AUTH_TOKEN => {
                    let signature = keystore.sign(&msg.payload)?;
                    packet::send_message(transport, &Message::auth_signature(signature))?;
                    self.state = ConnectionState::SendPrivateKey;
                    log::debug!("fsm: WaitForAuth -> SendPrivateKey");
                }
                (ConnectionState::WaitForAuth, _) => {
                    self.state = ConnectionState::NotConnected;
                    log::error!("unexpected {:?} while waiting for AUTH(TOKEN)", msg.command);
                    return Err(AdbError::ProtocolError(format!(
                        "unexpected {:?} while waiting for AUTH(TOKEN)",
                        msg.command
                    )));
                }
                (ConnectionState::SendPrivateKey, Command::Auth) => {
                    // Device rejected the signature; present our public key.
                    let pubkey = keystore.public_key_blob()?;
                    packet::send_message(transport, &Message::auth_public_key(pubkey))?;
                    self.state = ConnectionState::SendPublicKey;
                    transport.set_timeout(user_approval_timeout);
                    log::debug!("fsm: SendPrivateKey -> SendPublicKey, signature rejected");
                }
                (ConnectionState::SendPublicKey, _) => {
                    self.state = ConnectionState::NotConnected;
                    log::error!("device refused AUTH(RSAPUBLICKEY)");
                    return Err(AdbError::AuthRefused);
                }
                (state, cmd) => {
                    self.state = ConnectionState::NotConnected;
                    log::error!("unexpected {cmd:?} in state {state:?}");
                    return Err(AdbError::ProtocolError(format!(
                        "unexpected {cmd:?} in state {state:?}"
                    )));
                }
            }
        }
    }

    fn handle_timeout(
        &mut self,
        transport: &mut impl Transport,
        _keystore: &KeyStore,
        _user_approval_timeout: Duration,
    ) -> Result<(), AdbError> {
        match self.state {
            ConnectionState::SendPublicKey => {
                // The expected "user has not approved yet" signal.
                self.state = ConnectionState::NotConnected;
                log::warn!("fsm: timeout in SendPublicKey, awaiting user approval");
                Err(AdbError::PendingUserApproval)
            }
            ConnectionState::WaitForAuth | ConnectionState::SendPrivateKey => {
                // Transient transport hiccup during handshake: reset and
                // let the caller retry `connect`.
                self.state = ConnectionState::NotConnected;
                transport.set_timeout(Duration::from_secs(10));
                log::warn!("fsm: transport timeout, resetting to NotConnected");
                Err(AdbError::Timeout)
            }
            other => {
                self.state = ConnectionState::NotConnected;
                log::error!("fsm: timeout in unexpected state {other:?}");
                Err(AdbError::ProtocolError(format!("timeout in state {other:?}")))
            }
        }
    }

    /// Resets the FSM to NOT_CONNECTED, as on explicit close or cancellation.
    pub fn close(&mut self) {
        self.state = ConnectionState::NotConnected;
        self.device_identity = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::packet::{AUTH_RSAPUBLICKEY, AUTH_SIGNATURE};
    use std::collections::VecDeque;
    use std::io::Cursor;

    /// An in-memory Transport that plays back a scripted sequence of raw
    /// encoded messages, recording what was sent.
    struct MockTransport {
        inbound: VecDeque<Vec<u8>>,
        pub sent: Vec<Message>,
        timed_out_after: Option<usize>,
    }

    impl MockTransport {
        fn new(replies: Vec<Message>) -> Self {
            let inbound = replies
                .into_iter()
                .map(|m| {
                    let mut buf = Vec::new();
                    m.encode(&mut buf).unwrap();
                    buf
                })
                .collect();
            Self {
                inbound,
                sent: vec![],
                timed_out_after: None,
            }
        }

        fn with_final_timeout(mut self) -> Self {
            self.timed_out_after = Some(self.inbound.len());
            self
        }
    }

    impl Transport for MockTransport {
        fn send(&mut self, buf: &[u8]) -> Result<(), TransportError> {
            let mut cursor = Cursor::new(buf.to_vec());
            if let Ok(header) = packet::Header::decode(&mut cursor) {
                let mut payload = vec![0u8; header.data_length as usize];
                std::io::Read::read_exact(&mut cursor, &mut payload).ok();
                if let Ok(msg) = Message::from_header_and_payload(header, payload) {
                    self.sent.push(msg);
                }
            }
            Ok(())
        }

        fn recv(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
            if let Some(front) = self.inbound.front_mut() {
                let n = buf.len().min(front.len());
                buf[..n].copy_from_slice(&front[..n]);
                *front = front.split_off(n);
                if front.is_empty() {
                    self.inbound.pop_front();
                }
                Ok(())
            } else if self.timed_out_after.is_some() {
                Err(TransportError::Timeout)
            } else {
                Err(TransportError::Disconnected)
            }
        }

        fn set_timeout(&mut self, _timeout: Duration) {}
    }

    fn keystore(dir: &std::path::Path) -> KeyStore {
        KeyStore::load_or_generate(dir).unwrap()
    }

    #[test]
    fn trusted_first_use_reaches_connected() {
        let dir = tempfile::tempdir().unwrap();
        let store = keystore(dir.path());
        let token = vec![0x11u8; 20];

        let mut transport = MockTransport::new(vec![
            Message::new(Command::Auth, AUTH_TOKEN, 0, token),
            Message::cnxn("device::trusted"),
        ]);

        let mut fsm = ConnectionFsm::new();
        fsm.connect(&mut transport, &store, Duration::from_secs(1)).unwrap();

        assert_eq!(fsm.state(), ConnectionState::Connected);
        assert_eq!(fsm.device_identity.as_deref(), Some("device::trusted"));
        assert_eq!(transport.sent.len(), 2);
        assert_eq!(transport.sent[0].command, Command::Cnxn);
        assert_eq!(transport.sent[1].command, Command::Auth);
        assert_eq!(transport.sent[1].arg0, AUTH_SIGNATURE);
    }

    #[test]
    fn untrusted_then_approved_reaches_connected() {
        let dir = tempfile::tempdir().unwrap();
        let store = keystore(dir.path());
        let token = vec![0x22u8; 20];

        let mut transport = MockTransport::new(vec![
            Message::new(Command::Auth, AUTH_TOKEN, 0, token.clone()),
            Message::new(Command::Auth, AUTH_TOKEN, 0, token),
            Message::cnxn("device::approved"),
        ]);

        let mut fsm = ConnectionFsm::new();
        fsm.connect(&mut transport, &store, Duration::from_secs(1)).unwrap();

        assert_eq!(fsm.state(), ConnectionState::Connected);
        assert_eq!(transport.sent[2].arg0, AUTH_RSAPUBLICKEY);
    }

    #[test]
    fn user_never_approves_surfaces_pending_approval() {
        let dir = tempfile::tempdir().unwrap();
        let store = keystore(dir.path());
        let token = vec![0x33u8; 20];

        let mut transport = MockTransport::new(vec![
            Message::new(Command::Auth, AUTH_TOKEN, 0, token.clone()),
            Message::new(Command::Auth, AUTH_TOKEN, 0, token),
        ])
        .with_final_timeout();

        let mut fsm = ConnectionFsm::new();
        let err = fsm.connect(&mut transport, &store, Duration::from_secs(1)).unwrap_err();

        assert!(matches!(err, AdbError::PendingUserApproval));
        assert_eq!(fsm.state(), ConnectionState::NotConnected);
    }
}
