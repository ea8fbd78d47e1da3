//! M-to-N repartitioning inside one group.
//!
//! Used by the pass-through data-server path when there are fewer bridge
//! connections than data-server ranks: the group's fragments are folded into
//! `shares` buckets, one per connection, before anything crosses the bridge.

use crate::algs::communicator::{Communicator, Topic, recv_pair, send_pair};
use crate::mesh::codec::MeshCodec;
use crate::redist_error::{ConfigError, RedistError};

/// Folds a group's fragments into a smaller number of logical shares.
pub trait Repartitioner: Send + Sync {
    /// Returns `Some(bucket)` on the rank that owns a share, `None` on every other rank.
    fn repartition<K, C>(
        &self,
        local: &K::Mesh,
        codec: &K,
        comm: &C,
        shares: usize,
    ) -> Result<Option<K::Mesh>, RedistError>
    where
        K: MeshCodec + ?Sized,
        C: Communicator + ?Sized;
}

/// Rank `r` goes to bucket `r % shares`; bucket `b` is owned by rank `b`.
///
/// Owners append their members' fragments after their own, in ascending rank
/// order, so the result is deterministic for fixed inputs.
#[derive(Clone, Copy, Debug, Default)]
pub struct ModuloRepartitioner;

impl ModuloRepartitioner {
    pub fn bucket_of(rank: usize, shares: usize) -> usize {
        rank % shares
    }

    /// Ranks other than the owner that feed `bucket`.
    pub fn members(bucket: usize, size: usize, shares: usize) -> impl Iterator<Item = usize> {
        (bucket + shares..size).step_by(shares.max(1))
    }
}

impl Repartitioner for ModuloRepartitioner {
    fn repartition<K, C>(
        &self,
        local: &K::Mesh,
        codec: &K,
        comm: &C,
        shares: usize,
    ) -> Result<Option<K::Mesh>, RedistError>
    where
        K: MeshCodec + ?Sized,
        C: Communicator + ?Sized,
    {
        if shares == 0 {
            return Err(ConfigError::ZeroShares.into());
        }
        let (me, size) = (comm.rank(), comm.size());
        if shares >= size {
            return Ok(Some(local.clone()));
        }

        let owner = Self::bucket_of(me, shares);
        if owner != me {
            let bytes = codec.serialize(local)?;
            log::debug!(
                "rank {me}: handing {} bytes to share owner {owner}",
                bytes.len()
            );
            send_pair(comm, owner, Topic::Repartition, bytes.as_slice())?;
            return Ok(None);
        }

        let mut acc = local.clone();
        for member in Self::members(me, size, shares) {
            let bytes = recv_pair(comm, member, Topic::Repartition)?;
            if !bytes.is_empty() {
                let piece = codec.deserialize(&bytes)?;
                codec.append(&mut acc, piece);
            }
        }
        Ok(Some(acc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, ThreadComm};
    use crate::mesh::PolyMesh;
    use crate::mesh::codec::BinaryPolyCodec;
    use crate::mesh::test_meshes::fan;
    use std::thread;

    #[test]
    fn members_of_bucket() {
        let m: Vec<_> = ModuloRepartitioner::members(1, 7, 3).collect();
        assert_eq!(m, vec![4]);
        let m: Vec<_> = ModuloRepartitioner::members(0, 7, 3).collect();
        assert_eq!(m, vec![3, 6]);
    }

    #[test]
    fn zero_shares_is_config_error() {
        let err = ModuloRepartitioner
            .repartition(&PolyMesh::new(), &BinaryPolyCodec, &NoComm, 0)
            .unwrap_err();
        assert!(matches!(err, RedistError::Config(ConfigError::ZeroShares)));
    }

    #[test]
    fn five_ranks_into_two_shares() {
        let group = ThreadComm::group(5);
        let out: Vec<Option<PolyMesh>> = thread::scope(|s| {
            let hs: Vec<_> = group
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        let local = fan(comm.rank() + 3, comm.rank() as f64);
                        ModuloRepartitioner
                            .repartition(&local, &BinaryPolyCodec, comm, 2)
                            .unwrap()
                    })
                })
                .collect();
            hs.into_iter().map(|h| h.join().unwrap()).collect()
        });
        // bucket 0 = ranks 0, 2, 4 -> 3 + 5 + 7 points; bucket 1 = ranks 1, 3 -> 4 + 6
        assert_eq!(out[0].as_ref().map(PolyMesh::n_points), Some(15));
        assert_eq!(out[1].as_ref().map(PolyMesh::n_points), Some(10));
        assert!(out[2..].iter().all(Option::is_none));
    }
}
