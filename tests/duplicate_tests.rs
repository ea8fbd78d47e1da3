mod common;

use common::{RawCodec, fan, run_ranks};
use mesh_m2n::algs::communicator::{NoComm, ThreadComm};
use mesh_m2n::algs::duplicate::{duplicate_within_group, gather_buffers};
use mesh_m2n::mesh::PolyMesh;
use mesh_m2n::mesh::codec::{BinaryPolyCodec, MeshBuffer, MeshCodec};
use mesh_m2n::redist_error::RedistError;

#[test]
fn degenerate_group_is_identity() {
    let mut m = fan(7, 3.0);
    m.set_point_data("t", (0..7).map(|i| i as f64).collect()).unwrap();
    let out = duplicate_within_group(&m, &BinaryPolyCodec, &NoComm).unwrap();
    assert_eq!(out, m);
}

#[test]
fn union_of_three_and_five_points() {
    let inputs = [fan(3, 0.0), fan(5, 10.0)];
    let out = run_ranks(ThreadComm::group(2), |rank, comm| {
        duplicate_within_group(&inputs[rank], &BinaryPolyCodec, &comm).unwrap()
    });
    for m in &out {
        assert_eq!(m.n_points(), 8);
        assert_eq!(m.n_cells(), 1 + 3);
        m.validate().unwrap();
    }
    // rank order: rank 0's points come first
    assert_eq!(&out[0].points[..3], &inputs[0].points[..]);
    assert_eq!(&out[0].points[3..], &inputs[1].points[..]);
}

#[test]
fn every_rank_gets_identical_bytes() {
    let out = run_ranks(ThreadComm::group(4), |rank, comm| {
        let mut local = fan(rank + 3, rank as f64);
        local
            .set_point_data("rank", vec![rank as f64; rank + 3])
            .unwrap();
        let whole = duplicate_within_group(&local, &BinaryPolyCodec, &comm).unwrap();
        BinaryPolyCodec.serialize(&whole).unwrap()
    });
    assert!(out.windows(2).all(|w| w[0] == w[1]));
    let whole = BinaryPolyCodec.deserialize(out[0].as_slice()).unwrap();
    assert_eq!(whole.n_points(), 3 + 4 + 5 + 6);
    assert_eq!(whole.point_data["rank"].len(), whole.n_points());
}

#[test]
fn empty_fragment_contributes_nothing() {
    let inputs = [PolyMesh::new(), fan(4, 0.0)];
    let out = run_ranks(ThreadComm::group(2), |rank, comm| {
        duplicate_within_group(&inputs[rank], &BinaryPolyCodec, &comm).unwrap()
    });
    for m in &out {
        assert_eq!(m.n_points(), 4);
        assert_eq!(m, &inputs[1]);
    }
}

#[test]
fn all_empty_group_yields_empty_mesh() {
    let out = run_ranks(ThreadComm::group(3), |_, comm| {
        duplicate_within_group(&PolyMesh::new(), &BinaryPolyCodec, &comm).unwrap()
    });
    assert!(out.iter().all(PolyMesh::is_empty));
}

#[test]
fn gather_reports_lengths_and_offsets() {
    let out = run_ranks(ThreadComm::group(3), |rank, comm| {
        let local = vec![b'a' + rank as u8; 2 * rank];
        gather_buffers(&local, &comm).unwrap()
    });
    for g in &out {
        assert_eq!(g.lengths(), &[0, 2, 4]);
        assert_eq!(g.offsets(), &[0, 0, 2]);
        assert_eq!(g.buffer(), b"bbcccc");
    }
}

#[test]
fn raw_codec_concatenates_in_rank_order() {
    let out = run_ranks(ThreadComm::group(3), |rank, comm| {
        duplicate_within_group(&vec![rank as u8; 2], &RawCodec, &comm).unwrap()
    });
    assert!(out.iter().all(|b| b == &[0, 0, 1, 1, 2, 2]));
}

/// Codec that cannot decode what it receives.
struct Broken;

impl MeshCodec for Broken {
    type Mesh = Vec<u8>;
    fn serialize(&self, mesh: &Vec<u8>) -> Result<MeshBuffer, RedistError> {
        Ok(mesh.clone().into())
    }
    fn deserialize(&self, _bytes: &[u8]) -> Result<Vec<u8>, RedistError> {
        Err(RedistError::Serialization("corrupt fragment".into()))
    }
    fn append(&self, acc: &mut Vec<u8>, other: Vec<u8>) {
        acc.extend(other);
    }
    fn empty(&self) -> Vec<u8> {
        Vec::new()
    }
}

#[test]
fn decode_failure_propagates() {
    let out = run_ranks(ThreadComm::group(2), |_, comm| {
        duplicate_within_group(&vec![1u8, 2, 3], &Broken, &comm)
    });
    for r in out {
        assert!(matches!(r, Err(RedistError::Serialization(msg)) if msg == "corrupt fragment"));
    }
}
