//! The `sync:` file-transfer sub-protocol: length-prefixed STAT/LIST/SEND/
//! RECV/DATA/DONE/OKAY/FAIL/DENT/QUIT frames multiplexed over one stream.

use crate::error::AdbError;
use crate::stream::{Stream, StreamEngine};
use crate::transport::Transport;
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

const ID_STAT: [u8; 4] = *b"STAT";
const ID_LIST: [u8; 4] = *b"LIST";
const ID_SEND: [u8; 4] = *b"SEND";
const ID_RECV: [u8; 4] = *b"RECV";
const ID_DATA: [u8; 4] = *b"DATA";
const ID_DONE: [u8; 4] = *b"DONE";
const ID_OKAY: [u8; 4] = *b"OKAY";
const ID_FAIL: [u8; 4] = *b"FAIL";
const ID_DENT: [u8; 4] = *b"DENT";
const ID_QUIT: [u8; 4] = *b"QUIT";

/// Upper bound on a `RECV` `DATA` frame's length, per the sync protocol.
/// `SEND`'s own `DATA` frames are chunked at [`crate::packet::MAX_DATA`]
/// instead (see `push`), which is well under this ceiling.
const SYNC_DATA_MAX: usize = 64 * 1024;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileStat {
    pub mode: u32,
    pub size: u32,
    pub mtime: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DirEntry {
    pub name: String,
    pub mode: u32,
    pub size: u32,
    pub mtime: u32,
}

/// Drives the sync sub-protocol over a single stream, buffering partial
/// frames across `WRTE` boundaries.
pub struct SyncSession<'a, T: Transport> {
    transport: &'a mut T,
    engine: &'a mut StreamEngine,
    stream: Stream,
    buffer: VecDeque<u8>,
}

impl<'a, T: Transport> SyncSession<'a, T> {
    pub fn open(transport: &'a mut T, engine: &'a mut StreamEngine) -> Result<Self, AdbError> {
        let stream = engine.open(transport, "sync:")?;
        Ok(Self {
            transport,
            engine,
            stream,
            buffer: VecDeque::new(),
        })
    }

    fn fill(&mut self) -> Result<(), AdbError> {
        match self.engine.read(self.transport, &self.stream)? {
            Some(chunk) => {
                self.buffer.extend(chunk);
                Ok(())
            }
            None => Err(AdbError::SyncError("stream closed mid-frame".into())),
        }
    }

    fn read_exact_n(&mut self, n: usize) -> Result<Vec<u8>, AdbError> {
        while self.buffer.len() < n {
            self.fill()?;
        }
        Ok(self.buffer.drain(..n).collect())
    }

    fn read_id(&mut self) -> Result<[u8; 4], AdbError> {
        let bytes = self.read_exact_n(4)?;
        Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn read_u32(&mut self) -> Result<u32, AdbError> {
        let bytes = self.read_exact_n(4)?;
        Ok((&bytes[..]).read_u32::<LE>()?)
    }

    fn read_fail(&mut self) -> Result<AdbError, AdbError> {
        let len = self.read_u32()?;
        let message = self.read_exact_n(len as usize)?;
        Ok(AdbError::SyncError(String::from_utf8_lossy(&message).into_owned()))
    }

    /// Sends `id` followed by a little-endian length and `payload`.
    fn send_frame(&mut self, id: [u8; 4], payload: &[u8]) -> Result<(), AdbError> {
        let mut buf = Vec::with_capacity(8 + payload.len());
        buf.extend_from_slice(&id);
        buf.write_u32::<LE>(payload.len() as u32)?;
        buf.extend_from_slice(payload);
        self.engine.write(self.transport, &self.stream, &buf)
    }

    /// Sends `id` followed by a raw 4-byte field that is not a payload
    /// length (used by `DONE`, whose field carries the file's mtime).
    fn send_header(&mut self, id: [u8; 4], arg: u32) -> Result<(), AdbError> {
        let mut buf = Vec::with_capacity(8);
        buf.extend_from_slice(&id);
        buf.write_u32::<LE>(arg)?;
        self.engine.write(self.transport, &self.stream, &buf)
    }

    pub fn stat(&mut self, path: &str) -> Result<FileStat, AdbError> {
        log::debug!("sync: STAT {path}");
        self.send_frame(ID_STAT, path.as_bytes())?;
        match self.read_id()? {
            id if id == ID_STAT => Ok(FileStat {
                mode: self.read_u32()?,
                size: self.read_u32()?,
                mtime: self.read_u32()?,
            }),
            id if id == ID_FAIL => {
                let err = self.read_fail()?;
                log::warn!("sync: STAT {path} failed: {err}");
                Err(err)
            }
            other => Err(AdbError::SyncError(format!("unexpected id {other:?} in STAT reply"))),
        }
    }

    pub fn list(&mut self, path: &str) -> Result<Vec<DirEntry>, AdbError> {
        log::debug!("sync: LIST {path}");
        self.send_frame(ID_LIST, path.as_bytes())?;
        let mut entries = Vec::new();
        loop {
            match self.read_id()? {
                id if id == ID_DENT => {
                    let mode = self.read_u32()?;
                    let size = self.read_u32()?;
                    let mtime = self.read_u32()?;
                    let namelen = self.read_u32()?;
                    let name = self.read_exact_n(namelen as usize)?;
                    entries.push(DirEntry {
                        name: String::from_utf8_lossy(&name).into_owned(),
                        mode,
                        size,
                        mtime,
                    });
                }
                id if id == ID_DONE => {
                    // DONE terminates LIST as a zeroed DENT record: mode,
                    // size, mtime, namelen, no name.
                    self.read_exact_n(16)?;
                    log::debug!("sync: LIST {path} -> {} entries", entries.len());
                    return Ok(entries);
                }
                id if id == ID_FAIL => {
                    let err = self.read_fail()?;
                    log::warn!("sync: LIST {path} failed: {err}");
                    return Err(err);
                }
                other => return Err(AdbError::SyncError(format!("unexpected id {other:?} in LIST reply"))),
            }
        }
    }

    /// Pushes `local` to `remote`, preserving the local file's mode and
    /// modification time.
    pub fn push(&mut self, local: &Path, remote: &str) -> Result<(), AdbError> {
        let mut file = File::open(local)?;
        let metadata = file.metadata()?;
        let mode = unix_mode(&metadata);
        let mtime = mtime_secs(&metadata);

        let spec = format!("{remote},{mode}");
        log::debug!("sync: SEND {} -> {remote} (mode=0o{mode:o})", local.display());
        self.send_frame(ID_SEND, spec.as_bytes())?;

        let mut chunk = vec![0u8; crate::packet::MAX_DATA as usize];
        let mut sent_bytes = 0u64;
        loop {
            let n = file.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            self.send_frame(ID_DATA, &chunk[..n])?;
            sent_bytes += n as u64;
        }
        log::trace!("sync: SEND wrote {sent_bytes} bytes in DATA frames");
        self.send_header(ID_DONE, mtime)?;

        match self.read_id()? {
            id if id == ID_OKAY => Ok(()),
            id if id == ID_FAIL => {
                let err = self.read_fail()?;
                log::warn!("sync: SEND {remote} failed: {err}");
                Err(err)
            }
            other => Err(AdbError::SyncError(format!("unexpected id {other:?} in SEND reply"))),
        }
    }

    /// Pulls `remote` to `local`, writing through a sibling temp file and
    /// renaming into place only once the whole transfer has succeeded.
    pub fn pull(&mut self, remote: &str, local: &Path) -> Result<(), AdbError> {
        log::debug!("sync: RECV {remote} -> {}", local.display());
        self.send_frame(ID_RECV, remote.as_bytes())?;

        let tmp_path = local.with_extension("adbsync.tmp");
        let mut file = File::create(&tmp_path)?;
        let mut received_bytes = 0u64;
        loop {
            match self.read_id()? {
                id if id == ID_DATA => {
                    let len = self.read_u32()? as usize;
                    if len > SYNC_DATA_MAX {
                        return Err(AdbError::SyncError(format!(
                            "RECV DATA frame of {len} bytes exceeds the {SYNC_DATA_MAX}-byte limit"
                        )));
                    }
                    let data = self.read_exact_n(len)?;
                    file.write_all(&data)?;
                    received_bytes += len as u64;
                }
                id if id == ID_DONE => {
                    self.read_u32()?; // unused trailing field
                    log::trace!("sync: RECV read {received_bytes} bytes in DATA frames");
                    break;
                }
                id if id == ID_FAIL => {
                    let err = self.read_fail()?;
                    log::warn!("sync: RECV {remote} failed: {err}");
                    drop(file);
                    let _ = std::fs::remove_file(&tmp_path);
                    return Err(err);
                }
                other => return Err(AdbError::SyncError(format!("unexpected id {other:?} in RECV reply"))),
            }
        }
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp_path, local)?;
        Ok(())
    }

    pub fn quit(mut self) -> Result<(), AdbError> {
        log::debug!("sync: QUIT");
        self.send_header(ID_QUIT, 0)?;
        self.engine.close(self.transport, &self.stream)
    }
}

#[cfg(unix)]
fn unix_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    0o100000 | (metadata.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn unix_mode(_metadata: &std::fs::Metadata) -> u32 {
    0o100644
}

fn mtime_secs(metadata: &std::fs::Metadata) -> u32 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}
