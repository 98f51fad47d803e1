//! The ADB wire format: a 24-byte header followed by a payload.
//!
//! Mirrors the six-command vocabulary and the magic/checksum invariants of
//! the upstream protocol: `magic == command ^ 0xffff_ffff` and
//! `checksum == sum(payload bytes)`.

use crate::error::AdbError;
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::io::{Read, Write};

/// Maximum payload size per message.
pub const MAX_DATA: u32 = 4096;
/// Protocol version this client speaks; no negotiation beyond it.
pub const A_VERSION: u32 = 0x0100_0000;
/// Size in bytes of an AUTH token/TOKEN challenge.
pub const AUTH_TOKEN_LEN: usize = 20;

pub const AUTH_TOKEN: u32 = 1;
pub const AUTH_SIGNATURE: u32 = 2;
pub const AUTH_RSAPUBLICKEY: u32 = 3;


#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Command {
    Sync = 0x434e5953,
    Cnxn = 0x4e584e43,
    Auth = 0x48545541,
    Open = 0x4e45504f,
    Okay = 0x59414b4f,
    Clse = 0x45534c43,
    Wrte = 0x45545257,
}

impl TryFrom<u32> for Command {
    type Error = AdbError;

    fn try_from(cmd: u32) -> Result<Self, Self::Error> {
        Ok(match cmd {
            cmd if cmd == Self::Sync as u32 => Self::Sync,
            cmd if cmd == Self::Cnxn as u32 => Self::Cnxn,
            cmd if cmd == Self::Auth as u32 => Self::Auth,
            cmd if cmd == Self::Open as u32 => Self::Open,
            cmd if cmd == Self::Okay as u32 => Self::Okay,
            cmd if cmd == Self::Clse as u32 => Self::Clse,
            cmd if cmd == Self::Wrte as u32 => Self::Wrte,
            _ => return Err(AdbError::ProtocolError(format!("unknown command 0x{cmd:x}"))),
        })
    }
}

fn checksum(payload: &[u8]) -> u32 {
    payload.iter().map(|&b| b as u32).sum()
}

/// The decoded 24-byte header, before the payload has been read.
#[derive(Clone, Copy, Debug)]
pub struct Header {
    pub command: Command,
    pub arg0: u32,
    pub arg1: u32,
    pub data_length: u32,
    pub data_checksum: u32,
}

impl Header {
    /// Reads exactly 24 bytes and validates the magic invariant.
    pub fn decode(r: &mut impl Read) -> Result<Self, AdbError> {
        let command = r.read_u32::<LE>()?;
        let arg0 = r.read_u32::<LE>()?;
        let arg1 = r.read_u32::<LE>()?;
        let data_length = r.read_u32::<LE>()?;
        let data_checksum = r.read_u32::<LE>()?;
        let magic = r.read_u32::<LE>()?;
        if command ^ 0xffff_ffff != magic {
            log::error!("bad magic: command=0x{command:x} magic=0x{magic:x}");
            return Err(AdbError::BadMagic);
        }
        if data_length > MAX_DATA {
            log::error!("payload too large: {data_length} > {MAX_DATA}");
            return Err(AdbError::ProtocolError(format!(
                "payload too large: {data_length} > {MAX_DATA}"
            )));
        }
        let command = Command::try_from(command)?;
        Ok(Self {
            command,
            arg0,
            arg1,
            data_length,
            data_checksum,
        })
    }

    pub fn encode(&self, w: &mut impl Write) -> Result<(), AdbError> {
        w.write_u32::<LE>(self.command as u32)?;
        w.write_u32::<LE>(self.arg0)?;
        w.write_u32::<LE>(self.arg1)?;
        w.write_u32::<LE>(self.data_length)?;
        w.write_u32::<LE>(self.data_checksum)?;
        w.write_u32::<LE>(self.command as u32 ^ 0xffff_ffff)?;
        Ok(())
    }
}

/// A fully decoded message: header plus payload, checksum verified.
#[derive(Clone, Debug)]
pub struct Message {
    pub command: Command,
    pub arg0: u32,
    pub arg1: u32,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(command: Command, arg0: u32, arg1: u32, payload: Vec<u8>) -> Self {
        Self {
            command,
            arg0,
            arg1,
            payload,
        }
    }

    pub fn cnxn(system_identity: &str) -> Self {
        let mut payload = Vec::with_capacity(system_identity.len() + 1);
        payload.extend_from_slice(system_identity.as_bytes());
        payload.push(0);
        Self::new(Command::Cnxn, A_VERSION, MAX_DATA, payload)
    }

    pub fn auth_signature(sig: Vec<u8>) -> Self {
        Self::new(Command::Auth, AUTH_SIGNATURE, 0, sig)
    }

    pub fn auth_public_key(pubkey_blob: Vec<u8>) -> Self {
        Self::new(Command::Auth, AUTH_RSAPUBLICKEY, 0, pubkey_blob)
    }

    pub fn open(local_id: u32, destination: &str) -> Self {
        let mut payload = destination.as_bytes().to_vec();
        payload.push(0);
        Self::new(Command::Open, local_id, 0, payload)
    }

    pub fn okay(local_id: u32, remote_id: u32) -> Self {
        Self::new(Command::Okay, local_id, remote_id, vec![])
    }

    pub fn write(local_id: u32, remote_id: u32, payload: Vec<u8>) -> Self {
        Self::new(Command::Wrte, local_id, remote_id, payload)
    }

    pub fn close(local_id: u32, remote_id: u32) -> Self {
        Self::new(Command::Clse, local_id, remote_id, vec![])
    }

    /// Encodes header + payload into `w`. Rejects oversized payloads.
    pub fn encode(&self, w: &mut impl Write) -> Result<(), AdbError> {
        if self.payload.len() as u32 > MAX_DATA {
            return Err(AdbError::ProtocolError(format!(
                "payload too large: {} > {MAX_DATA}",
                self.payload.len()
            )));
        }
        let header = Header {
            command: self.command,
            arg0: self.arg0,
            arg1: self.arg1,
            data_length: self.payload.len() as u32,
            data_checksum: checksum(&self.payload),
        };
        header.encode(w)?;
        w.write_all(&self.payload)?;
        Ok(())
    }

    /// Validates a payload against a decoded header's checksum and builds
    /// the full message.
    pub fn from_header_and_payload(header: Header, payload: Vec<u8>) -> Result<Self, AdbError> {
        if checksum(&payload) != header.data_checksum {
            log::error!("bad checksum for {:?}: expected {}", header.command, header.data_checksum);
            return Err(AdbError::BadChecksum);
        }
        Ok(Self {
            command: header.command,
            arg0: header.arg0,
            arg1: header.arg1,
            payload,
        })
    }
}

/// Encodes `msg` and writes it to `transport` in one send.
pub fn send_message(transport: &mut impl crate::transport::Transport, msg: &Message) -> Result<(), AdbError> {
    let mut buf = Vec::new();
    msg.encode(&mut buf)?;
    log::trace!("send {:?} arg0={} arg1={} len={}", msg.command, msg.arg0, msg.arg1, msg.payload.len());
    transport.send(&buf).map_err(AdbError::from)
}

/// Reads a header (24 bytes), then its payload (`data_length` bytes), as
/// two separate Transport receives.
pub fn recv_message(transport: &mut impl crate::transport::Transport) -> Result<Message, AdbError> {
    let mut header_buf = [0u8; 24];
    transport.recv(&mut header_buf)?;
    let header = Header::decode(&mut &header_buf[..])?;
    let mut payload = vec![0u8; header.data_length as usize];
    if header.data_length > 0 {
        transport.recv(&mut payload)?;
    }
    let msg = Message::from_header_and_payload(header, payload)?;
    log::trace!("recv {:?} arg0={} arg1={} len={}", msg.command, msg.arg0, msg.arg1, msg.payload.len());
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_preserves_fields() {
        let msg = Message::write(7, 9, b"hello".to_vec());
        let mut buf = Vec::new();
        msg.encode(&mut buf).unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let header = Header::decode(&mut cursor).unwrap();
        let mut payload = vec![0u8; header.data_length as usize];
        cursor.read_exact(&mut payload).unwrap();
        let decoded = Message::from_header_and_payload(header, payload).unwrap();

        assert_eq!(decoded.command, Command::Wrte);
        assert_eq!(decoded.arg0, 7);
        assert_eq!(decoded.arg1, 9);
        assert_eq!(decoded.payload, b"hello");
    }

    #[test]
    fn magic_invariant_holds() {
        assert_eq!(Command::Cnxn as u32 ^ 0xffff_ffff, 0x4e584e43 ^ 0xffff_ffff);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buf = Vec::new();
        buf.write_u32::<LE>(Command::Cnxn as u32).unwrap();
        buf.write_u32::<LE>(0).unwrap();
        buf.write_u32::<LE>(0).unwrap();
        buf.write_u32::<LE>(0).unwrap();
        buf.write_u32::<LE>(0).unwrap();
        buf.write_u32::<LE>(0xdead_beef).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        assert!(matches!(Header::decode(&mut cursor), Err(AdbError::BadMagic)));
    }

    #[test]
    fn bad_checksum_is_rejected() {
        let header = Header {
            command: Command::Wrte,
            arg0: 1,
            arg1: 2,
            data_length: 3,
            data_checksum: 0,
        };
        let err = Message::from_header_and_payload(header, b"xyz".to_vec()).unwrap_err();
        assert!(matches!(err, AdbError::BadChecksum));
    }

    #[test]
    fn oversized_payload_is_rejected_on_decode() {
        let mut buf = Vec::new();
        buf.write_u32::<LE>(Command::Wrte as u32).unwrap();
        buf.write_u32::<LE>(0).unwrap();
        buf.write_u32::<LE>(0).unwrap();
        buf.write_u32::<LE>(MAX_DATA + 1).unwrap();
        buf.write_u32::<LE>(0).unwrap();
        buf.write_u32::<LE>(Command::Wrte as u32 ^ 0xffff_ffff).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        assert!(Header::decode(&mut cursor).is_err());
    }
}
