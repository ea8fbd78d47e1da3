//! RedistError: unified error type for mesh-m2n public APIs
//!
//! Errors are grouped the way a round can fail: configuration problems that are
//! known before any message moves, framing problems on the wire, codec failures
//! on mesh bytes, and failures of the underlying channels.

use crate::config::{BridgeSide, ProcessRole};
use thiserror::Error;

/// Unified error type for redistribution rounds.
#[derive(Debug, Error)]
pub enum RedistError {
    /// The round cannot start with the given role, flags or channels.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// Length/payload framing was violated on a channel.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    /// Mesh bytes could not be decoded (or a mesh could not be encoded).
    #[error("serialization error: {0}")]
    Serialization(String),
    /// A point-to-point or collective operation with `neighbor` failed.
    #[error("communication error with rank {neighbor}: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// A bounded receive elapsed before the peer sent.
    #[error("timed out waiting for peer {peer} on tag {tag:#06x}")]
    Timeout { peer: usize, tag: u16 },
    /// Socket-level failure on a bridge connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Misconfiguration detected before or at the start of a round.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("role {role:?} requires a bridge channel on rank {rank}, none configured")]
    MissingBridge { role: ProcessRole, rank: usize },
    #[error("role {role:?} requires a group communicator, none configured")]
    MissingGroup { role: ProcessRole },
    #[error("at most one of client_mode, server_mode, render_server_mode may be set")]
    ConflictingModeFlags,
    #[error("role {role:?} does not agree with mode flag `{flag}`")]
    RoleFlagMismatch { role: ProcessRole, flag: &'static str },
    #[error("role {role:?} needs at least one bridge connection")]
    ZeroConnections { role: ProcessRole },
    #[error("role {role:?} cannot run on the {side:?} side of the bridge")]
    BridgeSideMismatch { role: ProcessRole, side: BridgeSide },
    #[error("role {role:?} has {num_connections} bridge connections but only {group_size} ranks")]
    ConnectionsExceedGroup {
        role: ProcessRole,
        num_connections: usize,
        group_size: usize,
    },
    #[error("cannot repartition into zero shares")]
    ZeroShares,
}

/// Violations of the two-message length/payload protocol.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("length message must be 4 bytes, got {got}")]
    BadLengthMessage { got: usize },
    #[error("announced {expected} payload bytes, received {got}")]
    PayloadLength { expected: usize, got: usize },
    #[error("expected tag {expected:#06x}, received tag {got:#06x}")]
    TagMismatch { expected: u16, got: u16 },
    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u16),
    #[error("gathered {got} bytes but lengths sum to {expected}")]
    GatherLength { expected: usize, got: usize },
    #[error("peer closed the connection after {got} of {expected} bytes")]
    Truncated { expected: usize, got: usize },
    #[error("payload of {0} bytes does not fit a 32-bit length message")]
    LengthOverflow(usize),
}

pub type Result<T, E = RedistError> = std::result::Result<T, E>;
