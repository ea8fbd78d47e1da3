//! In-process message slots shared by the thread communicator and the memory bridge.
//!
//! Each `(src, dst, tag)` key owns a FIFO queue, so two messages with the same
//! tag between the same pair arrive in send order.

use crate::redist_error::RedistError;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub(crate) type Key = (usize, usize, u16); // (src, dst, tag)

#[derive(Default)]
struct Slot {
    queue: Mutex<VecDeque<Bytes>>,
    ready: Condvar,
}

#[derive(Default)]
pub(crate) struct Mailbox {
    slots: DashMap<Key, Arc<Slot>>,
}

impl Mailbox {
    fn slot(&self, key: Key) -> Arc<Slot> {
        self.slots.entry(key).or_default().clone()
    }

    pub(crate) fn post(&self, key: Key, data: Bytes) {
        let slot = self.slot(key);
        slot.queue.lock().push_back(data);
        slot.ready.notify_one();
    }

    /// Block until a message for `key` arrives, or until `timeout` elapses.
    pub(crate) fn take(&self, key: Key, timeout: Option<Duration>) -> Result<Bytes, RedistError> {
        let slot = self.slot(key);
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut queue = slot.queue.lock();
        loop {
            if let Some(bytes) = queue.pop_front() {
                return Ok(bytes);
            }
            match deadline {
                None => slot.ready.wait(&mut queue),
                Some(d) => {
                    if slot.ready.wait_until(&mut queue, d).timed_out() && queue.is_empty() {
                        return Err(RedistError::Timeout {
                            peer: key.0,
                            tag: key.2,
                        });
                    }
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn pending(&self, key: Key) -> usize {
        self.slots.get(&key).map_or(0, |s| s.queue.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_per_key() {
        let mb = Mailbox::default();
        mb.post((0, 1, 7), Bytes::from_static(b"a"));
        mb.post((0, 1, 7), Bytes::from_static(b"b"));
        mb.post((0, 1, 8), Bytes::from_static(b"c"));
        assert_eq!(mb.pending((0, 1, 7)), 2);
        assert_eq!(&mb.take((0, 1, 7), None).unwrap()[..], b"a");
        assert_eq!(&mb.take((0, 1, 7), None).unwrap()[..], b"b");
        assert_eq!(&mb.take((0, 1, 8), None).unwrap()[..], b"c");
    }

    #[test]
    fn bounded_take_times_out() {
        let mb = Mailbox::default();
        let err = mb
            .take((3, 0, 9), Some(Duration::from_millis(10)))
            .unwrap_err();
        assert!(matches!(err, RedistError::Timeout { peer: 3, tag: 9 }));
    }

    #[test]
    fn take_blocks_until_post() {
        let mb = Arc::new(Mailbox::default());
        let writer = mb.clone();
        let h = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            writer.post((1, 0, 2), Bytes::from_static(&[42]));
        });
        assert_eq!(&mb.take((1, 0, 2), None).unwrap()[..], &[42]);
        h.join().unwrap();
    }
}
