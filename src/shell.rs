//! The `shell:` service: runs a command on the device and collects its
//! combined stdout/stderr until the stream closes.

use crate::error::AdbError;
use crate::stream::StreamEngine;
use crate::transport::Transport;
use std::io::Write;

/// Runs `command` via a fresh `shell:` stream, returning the accumulated
/// combined stdout/stderr. When `echo_output` is set, each chunk is also
/// printed to stdout as it arrives, before the stream closes.
///
/// A non-OKAY response to the initial OPEN surfaces as
/// [`AdbError::StreamRefused`].
pub fn shell(
    transport: &mut impl Transport,
    engine: &mut StreamEngine,
    command: &str,
    echo_output: bool,
) -> Result<Vec<u8>, AdbError> {
    let destination = format!("shell:{command}");
    log::debug!("shell: OPEN {destination:?}");
    let stream = engine.open(transport, &destination)?;

    let mut out = Vec::new();
    let result = (|| -> Result<(), AdbError> {
        while let Some(chunk) = engine.read(transport, &stream)? {
            if echo_output {
                let mut stdout = std::io::stdout();
                stdout.write_all(&chunk).ok();
                stdout.flush().ok();
            }
            out.extend_from_slice(&chunk);
        }
        Ok(())
    })();
    // Best-effort: a protocol error on read still leaves the stream open on
    // our side unless we close it explicitly.
    let _ = engine.close(transport, &stream);
    log::debug!("shell: {destination:?} -> {} bytes", out.len());
    result.map(|_| out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::packet::{self, Command, Message};
    use std::collections::VecDeque;
    use std::time::Duration;

    struct MockTransport {
        inbound: VecDeque<Vec<u8>>,
        sent: Vec<Message>,
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
            Self { inbound, sent: vec![] }
        }
    }

    impl Transport for MockTransport {
        fn send(&mut self, buf: &[u8]) -> Result<(), TransportError> {
            let mut cursor = std::io::Cursor::new(buf.to_vec());
            let header = packet::Header::decode(&mut cursor).unwrap();
            let mut payload = vec![0u8; header.data_length as usize];
            std::io::Read::read_exact(&mut cursor, &mut payload).ok();
            self.sent.push(Message::from_header_and_payload(header, payload).unwrap());
            Ok(())
        }

        fn recv(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
            let front = self.inbound.front_mut().ok_or(TransportError::Disconnected)?;
            let n = buf.len().min(front.len());
            buf[..n].copy_from_slice(&front[..n]);
            *front = front.split_off(n);
            if front.is_empty() {
                self.inbound.pop_front();
            }
            Ok(())
        }

        fn set_timeout(&mut self, _timeout: Duration) {}
    }

    #[test]
    fn shell_roundtrip_collects_output() {
        let mut transport = MockTransport::new(vec![
            Message::okay(9, 1),
            Message::write(9, 1, b"total 0\n".to_vec()),
            Message::close(9, 1),
        ]);
        let mut engine = StreamEngine::new();
        let output = shell(&mut transport, &mut engine, "ls /", false).unwrap();
        assert_eq!(output, b"total 0\n");
        assert_eq!(transport.sent[0].command, Command::Open);
        assert_eq!(transport.sent[0].payload, b"shell:ls /\0");
    }

    #[test]
    fn shell_refused_surfaces_stream_refused() {
        let mut transport = MockTransport::new(vec![Message::close(9, 1)]);
        let mut engine = StreamEngine::new();
        let err = shell(&mut transport, &mut engine, "ls /", false).unwrap_err();
        assert!(matches!(err, AdbError::StreamRefused));
    }

    #[test]
    fn shell_with_echo_still_returns_accumulated_output() {
        let mut transport = MockTransport::new(vec![
            Message::okay(9, 1),
            Message::write(9, 1, b"hello ".to_vec()),
            Message::write(9, 1, b"world".to_vec()),
            Message::close(9, 1),
        ]);
        let mut engine = StreamEngine::new();
        let output = shell(&mut transport, &mut engine, "echo hi", true).unwrap();
        assert_eq!(output, b"hello world");
    }
}
