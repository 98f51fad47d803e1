//! Per-stream OPEN/OKAY/WRTE/CLSE sub-protocol, one stream at a time, with a
//! flow-control window of exactly one unacknowledged WRTE.

use crate::error::AdbError;
use crate::packet::{self, Command, Message};
use crate::transport::Transport;

/// A single open stream: one local id, the peer's remote id once OPEN is
/// acknowledged, and strict write/ack alternation.
#[derive(Debug)]
pub struct Stream {
    local_id: u32,
    remote_id: u32,
}

/// Drives streams over a connected Transport. Only one `Stream` may be open
/// at a time; `open` consumes the engine's only local id slot until `close`.
pub struct StreamEngine {
    next_local_id: u32,
}

impl Default for StreamEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamEngine {
    pub fn new() -> Self {
        Self { next_local_id: 1 }
    }

    /// Sends `OPEN(destination)` and waits for `OKAY`. A `CLSE` reply means
    /// the device refused the destination.
    pub fn open(&mut self, transport: &mut impl Transport, destination: &str) -> Result<Stream, AdbError> {
        let local_id = self.next_local_id;
        self.next_local_id += 1;

        packet::send_message(transport, &Message::open(local_id, destination))?;
        loop {
            let msg = packet::recv_message(transport)?;
            if msg.arg1 != 0 && msg.arg1 != local_id {
                // Reply addressed to a different stream than the one we just opened.
                continue;
            }
            return match msg.command {
                Command::Okay => {
                    log::debug!("stream {local_id}: OPENING -> OPEN, remote_id={}", msg.arg0);
                    Ok(Stream {
                        local_id,
                        remote_id: msg.arg0,
                    })
                }
                Command::Clse => {
                    log::warn!("stream {local_id}: OPEN refused for {destination:?}");
                    Err(AdbError::StreamRefused)
                }
                other => Err(AdbError::ProtocolError(format!(
                    "unexpected {other:?} in response to OPEN"
                ))),
            };
        }
    }

    /// Writes `data` and blocks for the peer's OKAY before returning:
    /// the window is exactly one outstanding WRTE.
    pub fn write(&mut self, transport: &mut impl Transport, stream: &Stream, data: &[u8]) -> Result<(), AdbError> {
        for chunk in data.chunks(packet::MAX_DATA as usize).collect::<Vec<_>>() {
            packet::send_message(
                transport,
                &Message::write(stream.local_id, stream.remote_id, chunk.to_vec()),
            )?;
            self.await_okay(transport, stream)?;
        }
        if data.is_empty() {
            packet::send_message(transport, &Message::write(stream.local_id, stream.remote_id, vec![]))?;
            self.await_okay(transport, stream)?;
        }
        Ok(())
    }

    fn await_okay(&mut self, transport: &mut impl Transport, stream: &Stream) -> Result<(), AdbError> {
        loop {
            let msg = packet::recv_message(transport)?;
            if msg.arg1 != stream.local_id {
                continue;
            }
            return match msg.command {
                Command::Okay => Ok(()),
                Command::Clse => {
                    log::warn!("stream {}: peer closed while awaiting OKAY", stream.local_id);
                    Err(AdbError::StreamRefused)
                }
                other => Err(AdbError::ProtocolError(format!(
                    "unexpected {other:?} while awaiting OKAY"
                ))),
            };
        }
    }

    /// Reads one `WRTE` (acking it with `OKAY`), returning `None` on `CLSE`.
    pub fn read(&mut self, transport: &mut impl Transport, stream: &Stream) -> Result<Option<Vec<u8>>, AdbError> {
        loop {
            let msg = packet::recv_message(transport)?;
            if msg.arg1 != stream.local_id {
                continue;
            }
            match msg.command {
                Command::Wrte => {
                    packet::send_message(transport, &Message::okay(stream.local_id, stream.remote_id))?;
                    return Ok(Some(msg.payload));
                }
                Command::Clse => {
                    log::debug!("stream {}: OPEN -> CLOSED (peer CLSE)", stream.local_id);
                    return Ok(None);
                }
                other => {
                    return Err(AdbError::ProtocolError(format!(
                        "unexpected {other:?} while reading stream"
                    )))
                }
            }
        }
    }

    /// Reads `WRTE` frames until `CLSE`, concatenating their payloads.
    pub fn read_to_end(&mut self, transport: &mut impl Transport, stream: &Stream) -> Result<Vec<u8>, AdbError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.read(transport, stream)? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Sends `CLSE`; does not wait for the peer's own `CLSE`.
    pub fn close(&mut self, transport: &mut impl Transport, stream: &Stream) -> Result<(), AdbError> {
        log::debug!("stream {}: -> CLOSED (local CLSE)", stream.local_id);
        packet::send_message(transport, &Message::close(stream.local_id, stream.remote_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
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
    fn open_succeeds_on_okay() {
        let mut transport = MockTransport::new(vec![Message::okay(5, 1)]);
        let mut engine = StreamEngine::new();
        let stream = engine.open(&mut transport, "shell:ls").unwrap();
        assert_eq!(stream.remote_id, 5);
        assert_eq!(transport.sent[0].command, Command::Open);
    }

    #[test]
    fn open_fails_on_clse() {
        let mut transport = MockTransport::new(vec![Message::close(5, 1)]);
        let mut engine = StreamEngine::new();
        let err = engine.open(&mut transport, "shell:ls").unwrap_err();
        assert!(matches!(err, AdbError::StreamRefused));
    }

    #[test]
    fn read_to_end_concatenates_until_close() {
        let mut transport = MockTransport::new(vec![
            Message::okay(9, 1),
            Message::write(9, 1, b"hello ".to_vec()),
            Message::write(9, 1, b"world".to_vec()),
            Message::close(9, 1),
        ]);
        let mut engine = StreamEngine::new();
        let stream = engine.open(&mut transport, "shell:echo").unwrap();
        let data = engine.read_to_end(&mut transport, &stream).unwrap();
        assert_eq!(data, b"hello world");
        // One OKAY sent per WRTE received.
        assert_eq!(transport.sent.iter().filter(|m| m.command == Command::Okay).count(), 2);
    }

    #[test]
    fn write_waits_for_okay_per_chunk() {
        let mut transport = MockTransport::new(vec![Message::okay(9, 1), Message::okay(9, 1)]);
        let mut engine = StreamEngine::new();
        let stream = engine.open(&mut transport, "shell:cat").unwrap();
        engine.write(&mut transport, &stream, b"data").unwrap();
        assert_eq!(transport.sent[1].command, Command::Wrte);
        assert_eq!(transport.sent[1].payload, b"data");
    }
}
