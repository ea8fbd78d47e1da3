#![allow(dead_code)]

use mesh_m2n::mesh::PolyMesh;
use mesh_m2n::mesh::codec::{MeshBuffer, MeshCodec};
use mesh_m2n::redist_error::RedistError;
use std::thread;

/// A fan of `n - 2` triangles over `n` points, shifted along x by `dx`.
pub fn fan(n: usize, dx: f64) -> PolyMesh {
    let mut m = PolyMesh::new();
    for i in 0..n {
        let a = i as f64;
        m.add_point([dx + a.cos(), a.sin(), 0.0]);
    }
    for i in 1..n.saturating_sub(1) {
        m.add_cell(&[0, i as u32, i as u32 + 1]);
    }
    m
}

/// Codec whose "mesh" is the raw byte string itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawCodec;

impl MeshCodec for RawCodec {
    type Mesh = Vec<u8>;

    fn serialize(&self, mesh: &Vec<u8>) -> Result<MeshBuffer, RedistError> {
        Ok(mesh.clone().into())
    }
    fn deserialize(&self, bytes: &[u8]) -> Result<Vec<u8>, RedistError> {
        Ok(bytes.to_vec())
    }
    fn append(&self, acc: &mut Vec<u8>, other: Vec<u8>) {
        acc.extend(other);
    }
    fn empty(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// Run `f(rank_handle)` on one thread per handle and collect results in rank order.
pub fn run_ranks<H, T, F>(handles: Vec<H>, f: F) -> Vec<T>
where
    H: Send,
    T: Send,
    F: Fn(usize, H) -> T + Sync,
{
    thread::scope(|s| {
        let f = &f;
        let joins: Vec<_> = handles
            .into_iter()
            .enumerate()
            .map(|(rank, h)| s.spawn(move || f(rank, h)))
            .collect();
        joins
            .into_iter()
            .map(|j| j.join().expect("rank thread panicked"))
            .collect()
    })
}
