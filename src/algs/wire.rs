//! Fixed, versioned, little-endian wire types for the bridge and the mesh codec.

use crate::redist_error::FramingError;
use bytemuck::{Pod, Zeroable};
use static_assertions::assert_eq_size;
use std::mem::size_of;

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Magic at the start of every non-empty mesh buffer.
pub const MESH_MAGIC: [u8; 4] = *b"PMSH";

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), FramingError> {
    if actual == expected {
        Ok(())
    } else {
        Err(FramingError::PayloadLength {
            expected,
            got: actual,
        })
    }
}

// All multi-byte integers in these structs are **little-endian** on the wire.
// We store them pre-LE with `.to_le()` and decode with `.from_le()`.

// ===== Bridge records ======================================================

/// Envelope in front of every message on a stream bridge.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireHdr {
    pub version_le: u16, // = WIRE_VERSION.to_le()
    pub tag_le: u16,     // MessageTag::wire_id()
    pub len_le: u32,     // body bytes that follow
}

impl WireHdr {
    pub const SIZE: usize = 8;

    pub fn new(tag: u16, len: u32) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            tag_le: tag.to_le(),
            len_le: len.to_le(),
        }
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
    pub fn tag(&self) -> u16 {
        u16::from_le(self.tag_le)
    }
    pub fn len(&self) -> usize {
        u32::from_le(self.len_le) as usize
    }
}

/// Body of a length message: the byte count of the payload that follows.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireLen {
    pub n_le: u32,
}

impl WireLen {
    pub const SIZE: usize = 4;

    pub fn new(n: usize) -> Result<Self, FramingError> {
        let n = u32::try_from(n).map_err(|_| FramingError::LengthOverflow(n))?;
        Ok(Self { n_le: n.to_le() })
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
    pub fn decode(bytes: &[u8]) -> Result<Self, FramingError> {
        if bytes.len() != Self::SIZE {
            return Err(FramingError::BadLengthMessage { got: bytes.len() });
        }
        Ok(bytemuck::pod_read_unaligned(bytes))
    }
}

// ===== Mesh records ========================================================

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireMeshHdr {
    pub magic: [u8; 4],
    pub version_le: u16,
    pub reserved_le: u16, // keep zero
    pub n_points_le: u32,
    pub n_cells_le: u32,
    pub n_conn_le: u32,
    pub n_arrays_le: u32,
}

impl WireMeshHdr {
    pub fn new(n_points: u32, n_cells: u32, n_conn: u32, n_arrays: u32) -> Self {
        Self {
            magic: MESH_MAGIC,
            version_le: WIRE_VERSION.to_le(),
            reserved_le: 0,
            n_points_le: n_points.to_le(),
            n_cells_le: n_cells.to_le(),
            n_conn_le: n_conn.to_le(),
            n_arrays_le: n_arrays.to_le(),
        }
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
    pub fn n_points(&self) -> usize {
        u32::from_le(self.n_points_le) as usize
    }
    pub fn n_cells(&self) -> usize {
        u32::from_le(self.n_cells_le) as usize
    }
    pub fn n_conn(&self) -> usize {
        u32::from_le(self.n_conn_le) as usize
    }
    pub fn n_arrays(&self) -> usize {
        u32::from_le(self.n_arrays_le) as usize
    }
}

/// One point, coordinates carried as IEEE-754 bit patterns.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WirePoint3 {
    pub xyz_le: [u64; 3],
}

impl WirePoint3 {
    pub fn of(p: [f64; 3]) -> Self {
        Self {
            xyz_le: p.map(|c| c.to_bits().to_le()),
        }
    }
    pub fn get(&self) -> [f64; 3] {
        self.xyz_le.map(|c| f64::from_bits(u64::from_le(c)))
    }
}

// ===== Byte cursors ========================================================

/// Append-only encoder for wire records.
#[derive(Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            buf: Vec::with_capacity(n),
        }
    }
    pub fn put<T: Pod>(&mut self, v: &T) {
        self.buf.extend_from_slice(bytemuck::bytes_of(v));
    }
    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    pub fn put_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_bits().to_le_bytes());
    }
    pub fn put_bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Bounds-checked decoder over a byte slice of unknown alignment.
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        if n > self.remaining() {
            return Err(format!(
                "need {n} bytes at offset {}, only {} left",
                self.pos,
                self.remaining()
            ));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }
    pub fn get<T: Pod>(&mut self) -> Result<T, String> {
        self.take(size_of::<T>()).map(bytemuck::pod_read_unaligned)
    }
    pub fn get_u32(&mut self) -> Result<u32, String> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }
    pub fn get_f64(&mut self) -> Result<f64, String> {
        let raw: [u8; 8] = bytemuck::pod_read_unaligned(self.take(8)?);
        Ok(f64::from_bits(u64::from_le_bytes(raw)))
    }
}

// ===== Compile-time sanity checks =========================================

assert_eq_size!(WireHdr, u64);
assert_eq_size!(WireLen, u32);

const _: () = {
    assert!(size_of::<WireHdr>() == WireHdr::SIZE);
    assert!(size_of::<WireLen>() == WireLen::SIZE);
    assert!(size_of::<WireMeshHdr>() == 24);
    assert!(size_of::<WirePoint3>() == 24);
};
