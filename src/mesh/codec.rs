//! Mesh codec seam and the default binary codec for [`PolyMesh`].
//!
//! The redistribution layer treats serialized meshes as opaque [`MeshBuffer`]s.
//! Any codec works as long as `deserialize(serialize(m))` reproduces `m` and an
//! empty mesh maps to a zero-length buffer.
//!
//! Layout of a non-empty [`BinaryPolyCodec`] buffer (all little-endian):
//!
//! ```text
//! WireMeshHdr                       24 bytes
//! n_points * WirePoint3             24 bytes each
//! n_cells  * u32 cell end offsets
//! n_conn   * u32 point indices
//! n_arrays * { u32 name_len, name (utf-8), n_points * f64 }
//! ```

use super::{CellArray, PolyMesh};
use crate::algs::wire::{
    MESH_MAGIC, WIRE_VERSION, WireMeshHdr, WirePoint3, WireReader, WireWriter,
};
use crate::redist_error::RedistError;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::mem::size_of;

/// One rank's serialized mesh fragment. Immutable once built.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MeshBuffer(Bytes);

impl MeshBuffer {
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for MeshBuffer {
    fn from(v: Vec<u8>) -> Self {
        Self(Bytes::from(v))
    }
}

impl AsRef<[u8]> for MeshBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Turns meshes into bytes and back, and appends meshes.
pub trait MeshCodec: Send + Sync {
    type Mesh: Clone + Send;

    fn serialize(&self, mesh: &Self::Mesh) -> Result<MeshBuffer, RedistError>;
    fn deserialize(&self, bytes: &[u8]) -> Result<Self::Mesh, RedistError>;
    /// Append `other` onto `acc` (union of both meshes).
    fn append(&self, acc: &mut Self::Mesh, other: Self::Mesh);
    fn empty(&self) -> Self::Mesh;
}

/// Compact little-endian codec for [`PolyMesh`].
#[derive(Clone, Copy, Debug, Default)]
pub struct BinaryPolyCodec;

fn ser_err(msg: impl Into<String>) -> RedistError {
    RedistError::Serialization(msg.into())
}

fn to_u32(n: usize, what: &str) -> Result<u32, RedistError> {
    u32::try_from(n).map_err(|_| ser_err(format!("{what} count {n} exceeds u32")))
}

impl MeshCodec for BinaryPolyCodec {
    type Mesh = PolyMesh;

    fn serialize(&self, mesh: &PolyMesh) -> Result<MeshBuffer, RedistError> {
        if mesh.is_empty() {
            return Ok(MeshBuffer::default());
        }
        mesh.validate().map_err(ser_err)?;

        let cells = &mesh.cells;
        let hdr = WireMeshHdr::new(
            to_u32(mesh.n_points(), "point")?,
            to_u32(cells.len(), "cell")?,
            to_u32(cells.connectivity().len(), "connectivity")?,
            to_u32(mesh.point_data.len(), "array")?,
        );
        let approx = size_of::<WireMeshHdr>()
            + mesh.n_points() * (size_of::<WirePoint3>() + 8 * mesh.point_data.len())
            + 4 * (cells.len() + cells.connectivity().len());
        let mut w = WireWriter::with_capacity(approx);
        w.put(&hdr);
        for &p in &mesh.points {
            w.put(&WirePoint3::of(p));
        }
        for &o in cells.offsets() {
            w.put_u32(o);
        }
        for &c in cells.connectivity() {
            w.put_u32(c);
        }
        for (name, values) in &mesh.point_data {
            w.put_u32(to_u32(name.len(), "name byte")?);
            w.put_bytes(name.as_bytes());
            for &v in values {
                w.put_f64(v);
            }
        }
        let out = w.finish();
        log::trace!(
            "serialized mesh: {} points, {} cells, {} bytes",
            mesh.n_points(),
            mesh.n_cells(),
            out.len()
        );
        Ok(out.into())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<PolyMesh, RedistError> {
        if bytes.is_empty() {
            return Ok(PolyMesh::new());
        }
        let mut r = WireReader::new(bytes);
        let hdr: WireMeshHdr = r.get().map_err(ser_err)?;
        if hdr.magic != MESH_MAGIC {
            return Err(ser_err("buffer does not start with a mesh header"));
        }
        if hdr.version() != WIRE_VERSION {
            return Err(ser_err(format!("unsupported mesh version {}", hdr.version())));
        }

        let n_points = hdr.n_points();
        // sizes are checked against what is left before allocating
        if n_points.saturating_mul(size_of::<WirePoint3>()) > r.remaining() {
            return Err(ser_err(format!("header claims {n_points} points, buffer too short")));
        }
        let mut points = Vec::with_capacity(n_points);
        for _ in 0..n_points {
            let p: WirePoint3 = r.get().map_err(ser_err)?;
            points.push(p.get());
        }

        let (n_cells, n_conn) = (hdr.n_cells(), hdr.n_conn());
        if n_cells.saturating_add(n_conn).saturating_mul(4) > r.remaining() {
            return Err(ser_err("header claims more cells than the buffer holds"));
        }
        let offsets = (0..n_cells)
            .map(|_| r.get_u32())
            .collect::<Result<Vec<_>, _>>()
            .map_err(ser_err)?;
        let connectivity = (0..n_conn)
            .map(|_| r.get_u32())
            .collect::<Result<Vec<_>, _>>()
            .map_err(ser_err)?;
        let cells = CellArray::from_parts(offsets, connectivity).map_err(ser_err)?;

        let mut point_data = BTreeMap::new();
        for _ in 0..hdr.n_arrays() {
            let name_len = r.get_u32().map_err(ser_err)? as usize;
            let name = std::str::from_utf8(r.take(name_len).map_err(ser_err)?)
                .map_err(|e| ser_err(format!("array name is not utf-8: {e}")))?
                .to_owned();
            if n_points.saturating_mul(8) > r.remaining() {
                return Err(ser_err(format!("array `{name}` truncated")));
            }
            let values = (0..n_points)
                .map(|_| r.get_f64())
                .collect::<Result<Vec<_>, _>>()
                .map_err(ser_err)?;
            point_data.insert(name, values);
        }
        if r.remaining() != 0 {
            return Err(ser_err(format!("{} trailing bytes after mesh", r.remaining())));
        }

        let mesh = PolyMesh {
            points,
            cells,
            point_data,
        };
        mesh.validate().map_err(ser_err)?;
        Ok(mesh)
    }

    fn append(&self, acc: &mut PolyMesh, other: PolyMesh) {
        acc.append(&other);
    }

    fn empty(&self) -> PolyMesh {
        PolyMesh::new()
    }
}
