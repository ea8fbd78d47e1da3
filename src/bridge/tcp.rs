use super::BridgeChannel;
use crate::algs::communicator::MessageTag;
use crate::algs::wire::{WIRE_VERSION, WireHdr};
use crate::redist_error::{FramingError, RedistError};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Body bytes reserved up front; larger bodies grow as bytes arrive.
const PREALLOC_LIMIT: usize = 64 * 1024;

/// Bridge connection over one TCP stream.
///
/// Each message is a [`WireHdr`] envelope (version, tag, body length) and the
/// body. The receiver checks the tag against the one it expects, so a
/// length/payload mix-up surfaces as a [`FramingError`] instead of garbage.
#[derive(Debug)]
pub struct TcpBridge {
    reader: Mutex<TcpStream>,
    writer: Mutex<TcpStream>,
    read_timeout: Option<Duration>,
    index: usize,
}

impl TcpBridge {
    /// Wrap a connected stream. `read_timeout = None` blocks indefinitely.
    pub fn new(stream: TcpStream, read_timeout: Option<Duration>) -> Result<Self, RedistError> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(read_timeout)?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: Mutex::new(stream),
            writer: Mutex::new(writer),
            read_timeout,
            index: 0,
        })
    }

    pub fn connect<A: ToSocketAddrs>(addr: A, read_timeout: Option<Duration>) -> Result<Self, RedistError> {
        let stream = TcpStream::connect(addr)?;
        log::debug!("bridge connected to {:?}", stream.peer_addr().ok());
        Self::new(stream, read_timeout)
    }

    pub fn accept(listener: &TcpListener, read_timeout: Option<Duration>) -> Result<Self, RedistError> {
        let (stream, peer) = listener.accept()?;
        log::debug!("bridge accepted {peer}");
        Self::new(stream, read_timeout)
    }

    /// Connection index reported in timeout errors.
    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    fn io_error(&self, e: io::Error, tag: u16) -> RedistError {
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => RedistError::Timeout {
                peer: self.index,
                tag,
            },
            _ => RedistError::Io(e),
        }
    }

    fn read_into(&self, stream: &mut TcpStream, buf: &mut [u8], tag: u16) -> Result<(), RedistError> {
        let got = read_full(stream, buf).map_err(|e| self.io_error(e, tag))?;
        if got < buf.len() {
            return Err(FramingError::Truncated {
                expected: buf.len(),
                got,
            }
            .into());
        }
        Ok(())
    }

    /// Read a `len`-byte body without trusting `len` for the allocation.
    fn read_body(&self, stream: &mut TcpStream, len: usize, tag: u16) -> Result<Vec<u8>, RedistError> {
        let mut body = Vec::with_capacity(len.min(PREALLOC_LIMIT));
        Read::take(&mut *stream, len as u64)
            .read_to_end(&mut body)
            .map_err(|e| self.io_error(e, tag))?;
        if body.len() < len {
            return Err(FramingError::Truncated {
                expected: len,
                got: body.len(),
            }
            .into());
        }
        Ok(body)
    }

    fn receive_locked(&self, r: &mut TcpStream, expected: u16) -> Result<Vec<u8>, RedistError> {
        let mut raw = [0u8; WireHdr::SIZE];
        self.read_into(r, &mut raw, expected)?;
        let hdr: WireHdr = bytemuck::pod_read_unaligned(&raw);
        if hdr.version() != WIRE_VERSION {
            return Err(FramingError::UnsupportedVersion(hdr.version()).into());
        }
        if hdr.tag() != expected {
            return Err(FramingError::TagMismatch {
                expected,
                got: hdr.tag(),
            }
            .into());
        }
        self.read_body(r, hdr.len(), expected)
    }
}

/// Read until `buf` is full or the peer closes; returns how much arrived.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut got = 0;
    while got < buf.len() {
        match r.read(&mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(got)
}

impl BridgeChannel for TcpBridge {
    fn send(&self, tag: MessageTag, buf: &[u8]) -> Result<(), RedistError> {
        let len = u32::try_from(buf.len()).map_err(|_| FramingError::LengthOverflow(buf.len()))?;
        let hdr = WireHdr::new(tag.wire_id(), len);
        let mut w = self.writer.lock();
        w.write_all(bytemuck::bytes_of(&hdr))?;
        w.write_all(buf)?;
        w.flush()?;
        Ok(())
    }

    fn receive_within(&self, tag: MessageTag, timeout: Option<Duration>) -> Result<Vec<u8>, RedistError> {
        let mut r = self.reader.lock();
        let Some(t) = timeout else {
            return self.receive_locked(&mut r, tag.wire_id());
        };
        r.set_read_timeout(Some(t))?;
        let out = self.receive_locked(&mut r, tag.wire_id());
        r.set_read_timeout(self.read_timeout)?;
        out
    }
}
