//! Group-wide duplication of mesh fragments.
//!
//! Every rank serializes its fragment, the group all-gathers the lengths and
//! then the bytes, and every rank rebuilds the union by appending the slices
//! in rank order. Because all ranks see the same bytes in the same order,
//! their results are identical.

use crate::algs::communicator::Communicator;
use crate::mesh::codec::MeshCodec;
use crate::redist_error::{FramingError, RedistError};

/// Output of the gather phase: one concatenated buffer plus a slice per rank.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GatherResult {
    lengths: Vec<usize>,
    offsets: Vec<usize>,
    buffer: Vec<u8>,
}

impl GatherResult {
    /// Pair `buffer` with per-rank `lengths`; offsets are their exclusive prefix sum.
    pub fn new(lengths: Vec<usize>, buffer: Vec<u8>) -> Result<Self, FramingError> {
        let offsets: Vec<usize> = lengths
            .iter()
            .scan(0usize, |acc, &l| {
                let start = *acc;
                *acc += l;
                Some(start)
            })
            .collect();
        let total: usize = lengths.iter().sum();
        if total != buffer.len() {
            return Err(FramingError::GatherLength {
                expected: total,
                got: buffer.len(),
            });
        }
        Ok(Self {
            lengths,
            offsets,
            buffer,
        })
    }

    pub fn ranks(&self) -> usize {
        self.lengths.len()
    }
    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Bytes contributed by rank `i`.
    pub fn slice(&self, i: usize) -> &[u8] {
        &self.buffer[self.offsets[i]..self.offsets[i] + self.lengths[i]]
    }

    pub fn slices(&self) -> impl Iterator<Item = &[u8]> + '_ {
        (0..self.ranks()).map(move |i| self.slice(i))
    }
}

/// All-gather one byte buffer per rank.
pub fn gather_buffers<C>(local: &[u8], comm: &C) -> Result<GatherResult, RedistError>
where
    C: Communicator + ?Sized,
{
    let lengths: Vec<usize> = comm
        .all_gather_len(local.len() as u64)?
        .into_iter()
        .map(|l| l as usize)
        .collect();
    if lengths.len() != comm.size() {
        return Err(RedistError::CommError {
            neighbor: comm.rank(),
            source: format!(
                "length all-gather returned {} entries for a group of {}",
                lengths.len(),
                comm.size()
            )
            .into(),
        });
    }
    let buffer = comm.all_gather_bytes(local, &lengths)?;
    log::trace!(
        "rank {}: gathered {} bytes from {} ranks",
        comm.rank(),
        buffer.len(),
        lengths.len()
    );
    Ok(GatherResult::new(lengths, buffer)?)
}

/// Give every rank the union of all ranks' meshes, appended in rank order.
///
/// A group of one skips communication and returns a copy of `local`.
/// Empty fragments are legal and contribute nothing. Codec failures on any
/// slice are returned unchanged.
pub fn duplicate_within_group<K, C>(
    local: &K::Mesh,
    codec: &K,
    comm: &C,
) -> Result<K::Mesh, RedistError>
where
    K: MeshCodec + ?Sized,
    C: Communicator + ?Sized,
{
    if comm.size() <= 1 {
        return Ok(local.clone());
    }

    let mine = codec.serialize(local)?;
    let gathered = gather_buffers(mine.as_slice(), comm)?;

    let mut acc = codec.empty();
    for (rank, bytes) in gathered.slices().enumerate() {
        if bytes.is_empty() {
            log::trace!("rank {rank} contributed an empty fragment");
            continue;
        }
        let piece = codec.deserialize(bytes)?;
        codec.append(&mut acc, piece);
    }
    log::debug!(
        "rank {}: duplicated {} bytes from {} ranks",
        comm.rank(),
        gathered.buffer().len(),
        gathered.ranks()
    );
    Ok(acc)
}
