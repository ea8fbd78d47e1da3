//! Thin façade over intra-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! Point-to-point handles are **waitable**; callers in this crate always call
//! `.wait()` before they trust that a buffer is ready. The collective
//! operations have default implementations in terms of point-to-point
//! messages, which backends with real collectives override.

use crate::algs::mailbox::{Key, Mailbox};
use crate::algs::wire::WireLen;
use crate::redist_error::{FramingError, RedistError};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// ===== Tags ================================================================

/// Raw integer tag carried by point-to-point messages.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommTag(u16);

impl CommTag {
    pub const fn new(v: u16) -> Self {
        Self(v)
    }
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

/// Logical stream a message belongs to.
#[repr(u16)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Data-server (or its rank 0) to the render side of the bridge.
    ServerToRender = 1,
    /// Render-server rank 0 to the rest of its group.
    RenderFanOut = 2,
    /// Point-to-point fallback of the group all-gather.
    Gather = 3,
    /// Members to bucket owners during M-to-N repartitioning.
    Repartition = 4,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::ServerToRender,
        Topic::RenderFanOut,
        Topic::Gather,
        Topic::Repartition,
    ];
}

/// Which half of a length/payload pair a message is.
#[repr(u16)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Length = 0,
    Payload = 1,
}

/// Typed message envelope: every `(topic, kind)` pair has its own wire id.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageTag {
    pub topic: Topic,
    pub kind: MessageKind,
}

const TAG_BASE: u16 = 0x5A00;

impl MessageTag {
    pub const fn new(topic: Topic, kind: MessageKind) -> Self {
        Self { topic, kind }
    }
    pub const fn length(topic: Topic) -> Self {
        Self::new(topic, MessageKind::Length)
    }
    pub const fn payload(topic: Topic) -> Self {
        Self::new(topic, MessageKind::Payload)
    }
    pub const fn wire_id(self) -> u16 {
        TAG_BASE + ((self.topic as u16) << 4) + self.kind as u16
    }
    pub const fn comm_tag(self) -> CommTag {
        CommTag::new(self.wire_id())
    }
}

const _: () = {
    // every (topic, kind) pair must map to a distinct wire id
    let mut ids = [0u16; 8];
    let mut n = 0;
    let mut t = 0;
    while t < Topic::ALL.len() {
        ids[n] = MessageTag::length(Topic::ALL[t]).wire_id();
        ids[n + 1] = MessageTag::payload(Topic::ALL[t]).wire_id();
        n += 2;
        t += 1;
    }
    let mut i = 0;
    while i < ids.len() {
        let mut j = i + 1;
        while j < ids.len() {
            assert!(ids[i] != ids[j]);
            j += 1;
        }
        i += 1;
    }
};

// ===== Traits ==============================================================

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;

    /// Like [`wait`](Wait::wait), but keeps backend failures such as timeouts.
    fn wait_checked(self) -> Result<Option<Vec<u8>>, RedistError>
    where
        Self: Sized,
    {
        Ok(self.wait())
    }
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Communication interface of one process group.
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Every rank contributes one integer; every rank receives all of them in rank order.
    fn all_gather_len(&self, local: u64) -> Result<Vec<u64>, RedistError> {
        let tag = MessageTag::length(Topic::Gather).comm_tag();
        let parts = exchange_all(self, tag, &local.to_le_bytes(), |_| 8)?;
        Ok(parts
            .into_iter()
            .map(|p| {
                let raw: [u8; 8] = bytemuck::pod_read_unaligned(&p);
                u64::from_le_bytes(raw)
            })
            .collect())
    }

    /// Variable-length all-gather: `lengths[i]` is rank `i`'s contribution and
    /// every rank receives the concatenation in rank order.
    fn all_gather_bytes(&self, local: &[u8], lengths: &[usize]) -> Result<Vec<u8>, RedistError> {
        check_lengths(self, local, lengths)?;
        let tag = MessageTag::payload(Topic::Gather).comm_tag();
        let parts = exchange_all(self, tag, local, |peer| lengths[peer])?;
        Ok(parts.concat())
    }

    /// Whether [`broadcast_bytes`](Communicator::broadcast_bytes) is a true collective.
    fn has_native_broadcast(&self) -> bool {
        false
    }

    /// Deliver `data` from `root` to every rank. Non-root ranks pass `None`.
    fn broadcast_bytes(
        &self,
        root: usize,
        data: Option<&[u8]>,
        topic: Topic,
    ) -> Result<Vec<u8>, RedistError> {
        fan_out(self, root, data, topic)
    }
}

// ===== Point-to-point helpers ==============================================

/// `lengths` must hold one entry per rank, and this rank's entry must match `local`.
fn check_lengths<C>(comm: &C, local: &[u8], lengths: &[usize]) -> Result<(), RedistError>
where
    C: Communicator + ?Sized,
{
    let me = comm.rank();
    if lengths.len() != comm.size() {
        return Err(RedistError::CommError {
            neighbor: me,
            source: format!(
                "all-gather needs {} lengths, got {}",
                comm.size(),
                lengths.len()
            )
            .into(),
        });
    }
    if lengths[me] != local.len() {
        return Err(FramingError::PayloadLength {
            expected: lengths[me],
            got: local.len(),
        }
        .into());
    }
    Ok(())
}

/// Receive exactly `len` bytes from `peer` on `tag`.
pub fn recv_exact<C>(comm: &C, peer: usize, tag: CommTag, len: usize) -> Result<Vec<u8>, RedistError>
where
    C: Communicator + ?Sized,
{
    let mut buf = vec![0u8; len];
    let h = comm.irecv(peer, tag.as_u16(), &mut buf);
    match h.wait_checked()? {
        Some(data) if data.len() == len => Ok(data),
        Some(data) => Err(FramingError::PayloadLength {
            expected: len,
            got: data.len(),
        }
        .into()),
        None => Err(RedistError::CommError {
            neighbor: peer,
            source: format!("failed to receive from rank {peer} (tag {:#06x})", tag.as_u16()).into(),
        }),
    }
}

/// Send `payload` to `peer` as a length message followed by the payload (omitted when empty).
pub fn send_pair<C>(comm: &C, peer: usize, topic: Topic, payload: &[u8]) -> Result<(), RedistError>
where
    C: Communicator + ?Sized,
{
    let len = WireLen::new(payload.len())?;
    let _ = comm
        .isend(peer, MessageTag::length(topic).wire_id(), bytemuck::bytes_of(&len))
        .wait();
    if !payload.is_empty() {
        let _ = comm
            .isend(peer, MessageTag::payload(topic).wire_id(), payload)
            .wait();
    }
    Ok(())
}

/// Receive one length/payload pair sent with [`send_pair`].
pub fn recv_pair<C>(comm: &C, peer: usize, topic: Topic) -> Result<Vec<u8>, RedistError>
where
    C: Communicator + ?Sized,
{
    let raw = recv_exact(comm, peer, MessageTag::length(topic).comm_tag(), WireLen::SIZE)?;
    let n = WireLen::decode(&raw)?.get();
    if n == 0 {
        return Ok(Vec::new());
    }
    recv_exact(comm, peer, MessageTag::payload(topic).comm_tag(), n)
}

/// All-to-all exchange of one buffer per rank. Every handle is drained before
/// returning, even if a receive fails.
fn exchange_all<C, F>(
    comm: &C,
    tag: CommTag,
    local: &[u8],
    len_of: F,
) -> Result<Vec<Vec<u8>>, RedistError>
where
    C: Communicator + ?Sized,
    F: Fn(usize) -> usize,
{
    let me = comm.rank();
    let n = comm.size();

    let mut pending_sends = Vec::with_capacity(n.saturating_sub(1));
    if !local.is_empty() {
        for peer in (0..n).filter(|&p| p != me) {
            pending_sends.push(comm.isend(peer, tag.as_u16(), local));
        }
    }

    let mut parts = Vec::with_capacity(n);
    let mut maybe_err = None;
    for peer in 0..n {
        if peer == me {
            parts.push(local.to_vec());
            continue;
        }
        let want = len_of(peer);
        if want == 0 {
            parts.push(Vec::new());
            continue;
        }
        match recv_exact(comm, peer, tag, want) {
            Ok(data) => parts.push(data),
            Err(e) => {
                maybe_err.get_or_insert(e);
                parts.push(Vec::new());
            }
        }
    }

    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(parts),
    }
}

/// Manual broadcast: `root` sends a length/payload pair to each other rank in turn.
pub fn fan_out<C>(
    comm: &C,
    root: usize,
    data: Option<&[u8]>,
    topic: Topic,
) -> Result<Vec<u8>, RedistError>
where
    C: Communicator + ?Sized,
{
    if comm.rank() == root {
        let payload = data.unwrap_or(&[]);
        for peer in (0..comm.size()).filter(|&p| p != root) {
            send_pair(comm, peer, topic, payload)?;
        }
        Ok(payload.to_vec())
    } else {
        recv_pair(comm, root, topic)
    }
}

// ===== NoComm: serial ======================================================

/// Compile-time no-op comm for pure serial runs.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
}

// ===== ThreadComm: ranks as threads of one process ==========================

pub struct LocalHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
    timeout: Option<Duration>,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        self.wait_checked().ok().flatten()
    }

    fn wait_checked(self) -> Result<Option<Vec<u8>>, RedistError> {
        self.mailbox
            .take(self.key, self.timeout)
            .map(|bytes| Some(bytes.to_vec()))
    }
}

/// One rank of an in-process group. Sends are buffered, receives block.
#[derive(Clone)]
pub struct ThreadComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
    timeout: Option<Duration>,
}

impl ThreadComm {
    /// Build every rank of a group of `size`; hand one to each thread.
    pub fn group(size: usize) -> Vec<Self> {
        let mailbox = Arc::new(Mailbox::default());
        (0..size)
            .map(|rank| Self {
                rank,
                size,
                mailbox: mailbox.clone(),
                timeout: None,
            })
            .collect()
    }

    /// Bound every receive on this handle; default is to block indefinitely.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Debug for ThreadComm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadComm")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Communicator for ThreadComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        self.mailbox
            .post((self.rank, peer, tag), Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> Self::RecvHandle {
        LocalHandle {
            mailbox: self.mailbox.clone(),
            key: (peer, self.rank, tag),
            timeout: self.timeout,
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Topic, Wait, check_lengths};
    use crate::redist_error::{FramingError, RedistError};
    use mpi::Count;
    use mpi::datatype::PartitionMut;
    use mpi::environment::Universe;
    use mpi::topology::{Color, SimpleCommunicator};
    use mpi::traits::{Communicator as _, CommunicatorCollectives, Destination, Root, Source};
    use std::sync::Arc;

    /// rsmpi-backed group. Point-to-point calls block and complete eagerly.
    pub struct MpiComm {
        pub world: SimpleCommunicator,
        pub rank: usize,
        size: usize,
        _universe: Option<Arc<Universe>>,
    }

    // One thread per rank drives the communicator; it is never shared across threads concurrently.
    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl MpiComm {
        /// Initialize MPI and wrap the world communicator.
        pub fn new() -> Result<Self, RedistError> {
            let universe = mpi::initialize().ok_or_else(|| RedistError::CommError {
                neighbor: 0,
                source: "MPI is already initialized".into(),
            })?;
            let world = universe.world();
            Ok(Self {
                rank: world.rank() as usize,
                size: world.size() as usize,
                world,
                _universe: Some(Arc::new(universe)),
            })
        }

        /// Split into sub-groups, e.g. data-server ranks vs render-server ranks.
        pub fn split(&self, color: i32) -> Option<Self> {
            let sub = self.world.split_by_color(Color::with_value(color))?;
            Some(Self {
                rank: sub.rank() as usize,
                size: sub.size() as usize,
                world: sub,
                _universe: self._universe.clone(),
            })
        }
    }

    pub struct MpiHandle(Option<Vec<u8>>);

    impl Wait for MpiHandle {
        fn wait(self) -> Option<Vec<u8>> {
            self.0
        }
    }

    fn to_count(n: usize) -> Result<Count, RedistError> {
        Count::try_from(n).map_err(|_| FramingError::LengthOverflow(n).into())
    }

    impl Communicator for MpiComm {
        type SendHandle = ();
        type RecvHandle = MpiHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
            self.world
                .process_at_rank(peer as i32)
                .send_with_tag(buf, tag as i32);
        }

        fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> MpiHandle {
            let (data, _status) = self
                .world
                .process_at_rank(peer as i32)
                .receive_vec_with_tag::<u8>(tag as i32);
            MpiHandle(Some(data))
        }

        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }

        fn all_gather_len(&self, local: u64) -> Result<Vec<u64>, RedistError> {
            let mut out = vec![0u64; self.size];
            self.world.all_gather_into(&local, &mut out[..]);
            Ok(out)
        }

        fn all_gather_bytes(&self, local: &[u8], lengths: &[usize]) -> Result<Vec<u8>, RedistError> {
            check_lengths(self, local, lengths)?;
            let counts = lengths
                .iter()
                .map(|&l| to_count(l))
                .collect::<Result<Vec<_>, _>>()?;
            let mut displs = Vec::with_capacity(counts.len());
            let mut total: usize = 0;
            for &l in lengths {
                displs.push(to_count(total)?);
                total += l;
            }
            let mut buf = vec![0u8; total];
            {
                let mut partition = PartitionMut::new(&mut buf[..], &counts[..], &displs[..]);
                self.world.all_gather_varcount_into(local, &mut partition);
            }
            Ok(buf)
        }

        fn has_native_broadcast(&self) -> bool {
            true
        }

        fn broadcast_bytes(
            &self,
            root: usize,
            data: Option<&[u8]>,
            _topic: Topic,
        ) -> Result<Vec<u8>, RedistError> {
            let root_proc = self.world.process_at_rank(root as i32);
            let mut len = data.map_or(0, |d| d.len() as u64);
            root_proc.broadcast_into(&mut len);
            let mut buf = if self.rank == root {
                data.unwrap_or(&[]).to_vec()
            } else {
                vec![0u8; len as usize]
            };
            if len > 0 {
                root_proc.broadcast_into(&mut buf[..]);
            }
            Ok(buf)
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
