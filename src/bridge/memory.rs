use super::BridgeChannel;
use crate::algs::communicator::MessageTag;
use crate::algs::mailbox::Mailbox;
use crate::redist_error::RedistError;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// One end of an in-process bridge connection.
#[derive(Clone)]
pub struct MemoryBridge {
    side: usize,
    mailbox: Arc<Mailbox>,
    timeout: Option<Duration>,
}

impl MemoryBridge {
    /// Both ends of one connection: `(data-server end, render end)`.
    pub fn pair() -> (Self, Self) {
        let mailbox = Arc::new(Mailbox::default());
        let end = |side| Self {
            side,
            mailbox: mailbox.clone(),
            timeout: None,
        };
        (end(0), end(1))
    }

    /// `n` independent connections; index `i` of each vector belongs to rank `i` of its group.
    pub fn connections(n: usize) -> (Vec<Self>, Vec<Self>) {
        (0..n).map(|_| Self::pair()).unzip()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn peer(&self) -> usize {
        1 - self.side
    }

    #[cfg(test)]
    pub(crate) fn pending(&self, tag: MessageTag) -> usize {
        self.mailbox.pending((self.peer(), self.side, tag.wire_id()))
    }
}

impl fmt::Debug for MemoryBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBridge")
            .field("side", &self.side)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl BridgeChannel for MemoryBridge {
    fn send(&self, tag: MessageTag, buf: &[u8]) -> Result<(), RedistError> {
        self.mailbox.post(
            (self.side, self.peer(), tag.wire_id()),
            Bytes::copy_from_slice(buf),
        );
        Ok(())
    }

    fn receive_within(&self, tag: MessageTag, timeout: Option<Duration>) -> Result<Vec<u8>, RedistError> {
        self.mailbox
            .take((self.peer(), self.side, tag.wire_id()), timeout.or(self.timeout))
            .map(|b| b.to_vec())
    }
}
