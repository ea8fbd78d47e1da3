//! Point-to-point channel between the data-server side and the render side.
//!
//! Every transfer over a bridge is two blocking messages: a 4-byte
//! little-endian length `L`, then exactly `L` payload bytes. The payload
//! message is not sent at all when `L == 0`. The receiver must take them in
//! that order; there is no other framing.

mod memory;
mod tcp;

pub use memory::MemoryBridge;
pub use tcp::TcpBridge;

use crate::algs::communicator::{MessageTag, Topic};
use crate::algs::wire::{WireLen, expect_exact_len};
use crate::redist_error::RedistError;
use std::sync::Arc;
use std::time::Duration;

/// Blocking typed-message channel. One instance is one connection.
pub trait BridgeChannel: Send + Sync {
    fn send(&self, tag: MessageTag, buf: &[u8]) -> Result<(), RedistError>;

    /// Receive one message, waiting at most `timeout` when given. `None` keeps
    /// the channel's own bound (indefinite unless the channel was built with one).
    fn receive_within(&self, tag: MessageTag, timeout: Option<Duration>) -> Result<Vec<u8>, RedistError>;

    fn receive(&self, tag: MessageTag) -> Result<Vec<u8>, RedistError> {
        self.receive_within(tag, None)
    }
}

impl<B: BridgeChannel + ?Sized> BridgeChannel for Arc<B> {
    fn send(&self, tag: MessageTag, buf: &[u8]) -> Result<(), RedistError> {
        (**self).send(tag, buf)
    }
    fn receive_within(&self, tag: MessageTag, timeout: Option<Duration>) -> Result<Vec<u8>, RedistError> {
        (**self).receive_within(tag, timeout)
    }
}

/// Send `payload` as a length message followed (if non-empty) by the payload.
pub fn send_framed<B>(bridge: &B, topic: Topic, payload: &[u8]) -> Result<(), RedistError>
where
    B: BridgeChannel + ?Sized,
{
    let len = WireLen::new(payload.len())?;
    bridge.send(MessageTag::length(topic), bytemuck::bytes_of(&len))?;
    if !payload.is_empty() {
        bridge.send(MessageTag::payload(topic), payload)?;
    }
    log::trace!("bridge {topic:?}: sent {} bytes", payload.len());
    Ok(())
}

/// Receive one frame sent with [`send_framed`]. `L == 0` yields an empty payload.
pub fn receive_framed<B>(bridge: &B, topic: Topic) -> Result<Vec<u8>, RedistError>
where
    B: BridgeChannel + ?Sized,
{
    receive_framed_within(bridge, topic, None)
}

/// [`receive_framed`] with each of the two receives bounded by `timeout`.
pub fn receive_framed_within<B>(
    bridge: &B,
    topic: Topic,
    timeout: Option<Duration>,
) -> Result<Vec<u8>, RedistError>
where
    B: BridgeChannel + ?Sized,
{
    let raw = bridge.receive_within(MessageTag::length(topic), timeout)?;
    let expected = WireLen::decode(&raw)?.get();
    if expected == 0 {
        log::trace!("bridge {topic:?}: empty payload");
        return Ok(Vec::new());
    }
    let payload = bridge.receive_within(MessageTag::payload(topic), timeout)?;
    expect_exact_len(payload.len(), expected)?;
    log::trace!("bridge {topic:?}: received {expected} bytes");
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redist_error::FramingError;

    #[test]
    fn zero_length_frame_has_no_payload_message() {
        let (a, b) = MemoryBridge::pair();
        send_framed(&a, Topic::ServerToRender, &[]).unwrap();
        // only the length message was posted
        assert_eq!(b.pending(MessageTag::length(Topic::ServerToRender)), 1);
        assert_eq!(b.pending(MessageTag::payload(Topic::ServerToRender)), 0);
        assert!(receive_framed(&b, Topic::ServerToRender).unwrap().is_empty());
    }

    #[test]
    fn seventeen_bytes_exactly() {
        let (a, b) = MemoryBridge::pair();
        let payload: Vec<u8> = (0..17).collect();
        send_framed(&a, Topic::ServerToRender, &payload).unwrap();
        assert_eq!(receive_framed(&b, Topic::ServerToRender).unwrap(), payload);
    }

    #[test]
    fn short_payload_is_framing_error() {
        let (a, b) = MemoryBridge::pair();
        let len = WireLen::new(17).unwrap();
        a.send(
            MessageTag::length(Topic::ServerToRender),
            bytemuck::bytes_of(&len),
        )
        .unwrap();
        a.send(MessageTag::payload(Topic::ServerToRender), &[0; 5])
            .unwrap();
        let err = receive_framed(&b, Topic::ServerToRender).unwrap_err();
        assert!(matches!(
            err,
            RedistError::Framing(FramingError::PayloadLength {
                expected: 17,
                got: 5
            })
        ));
    }

    #[test]
    fn per_call_timeout_bounds_frame_receive() {
        let (_a, b) = MemoryBridge::pair();
        let err = receive_framed_within(&b, Topic::ServerToRender, Some(Duration::from_millis(10)))
            .unwrap_err();
        assert!(matches!(err, RedistError::Timeout { .. }));
    }

    #[test]
    fn topics_do_not_cross() {
        let (a, b) = MemoryBridge::pair();
        send_framed(&a, Topic::RenderFanOut, b"fan").unwrap();
        send_framed(&a, Topic::ServerToRender, b"hop").unwrap();
        assert_eq!(receive_framed(&b, Topic::ServerToRender).unwrap(), b"hop");
        assert_eq!(receive_framed(&b, Topic::RenderFanOut).unwrap(), b"fan");
    }
}
