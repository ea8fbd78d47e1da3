//! Re-export public algorithms.

pub mod communicator;
pub mod duplicate;
pub(crate) mod mailbox;
pub mod repartition;
pub mod wire;

pub use duplicate::{duplicate_within_group, gather_buffers};
