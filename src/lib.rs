#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-m2n
//!
//! mesh-m2n duplicates and redistributes polygonal meshes across an M-process
//! data-server group and an N-process render-server group (or a single client),
//! with the two groups joined by a point-to-point bridge channel.
//!
//! ## Features
//! - Group-wide mesh duplication: every rank ends up with the union of all
//!   ranks' fragments, reconstructed in rank order
//! - A role router that picks the client, data-server, render-server or
//!   pass-through behavior for each process and round
//! - Two-message length/payload framing over the bridge with typed message tags
//! - Pluggable communication backends (serial, threads, MPI) and bridges
//!   (in-memory, TCP)
//! - Pluggable mesh codec and M-to-N repartitioner
//!
//! ## Execution model
//!
//! Every operation is blocking SPMD: each rank calls the same round, and every
//! collective or point-to-point call returns once its peers have matched it.
//! Nothing in this crate is meant to be driven from more than one thread per
//! rank at a time.
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! mesh-m2n = "0.3"
//! # Optional features:
//! # features = ["mpi-support"]
//! ```

pub mod algs;
pub mod bridge;
pub mod config;
pub mod mesh;
pub mod redist_error;
pub mod router;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{
        CommTag, Communicator, MessageKind, MessageTag, NoComm, ThreadComm, Topic, Wait,
    };
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::duplicate::{GatherResult, duplicate_within_group, gather_buffers};
    pub use crate::algs::repartition::{ModuloRepartitioner, Repartitioner};
    pub use crate::bridge::{BridgeChannel, MemoryBridge, TcpBridge, receive_framed, receive_framed_within, send_framed};
    pub use crate::config::{BridgeSide, ConnectionDescriptor, ProcessRole, RedistConfig};
    pub use crate::mesh::PolyMesh;
    pub use crate::mesh::codec::{BinaryPolyCodec, MeshBuffer, MeshCodec};
    pub use crate::redist_error::{ConfigError, FramingError, RedistError};
    pub use crate::router::{RoleRouter, RoundOutput};
}
