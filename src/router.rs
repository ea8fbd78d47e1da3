//! Per-process role selection for one redistribution round.
//!
//! Each process runs exactly one path through [`RoleRouter::execute`] per
//! round, determined by its fixed [`ProcessRole`] and the pass-through switch:
//!
//! | role          | pass-through | behavior                                                   |
//! |---------------|--------------|------------------------------------------------------------|
//! | client        | -            | receive one frame from the server side (or copy locally)   |
//! | data server   | no           | duplicate within the group; rank 0 forwards the result     |
//! | data server   | yes          | (repartition to the connection count) and forward shares   |
//! | render server | no           | rank 0 receives, then delivers to the whole group          |
//! | render server | yes          | every connected rank receives its own connection's share   |
//! | pass-through  | -            | copy the local mesh, no communication                      |
//!
//! Checks that every rank of a group agrees on (the group communicator, the
//! connection count) run before any message is sent. A missing bridge is only
//! known to the rank that lacks it, so that rank still takes its part in the
//! group exchange first and fails afterwards; its peers finish the round.

use crate::algs::communicator::{Communicator, Topic};
use crate::algs::duplicate::duplicate_within_group;
use crate::algs::repartition::{ModuloRepartitioner, Repartitioner};
use crate::bridge::{BridgeChannel, receive_framed_within, send_framed};
use crate::config::{ConnectionDescriptor, ProcessRole, RedistConfig, Settings};
use crate::mesh::codec::MeshCodec;
use crate::redist_error::{ConfigError, RedistError};
use std::sync::Arc;

/// Result of one round on this process.
#[derive(Clone, Debug, PartialEq)]
pub struct RoundOutput<M> {
    /// The mesh this process holds after the round.
    pub mesh: M,
    /// Payload bytes this process put on the bridge.
    pub bytes_sent: usize,
    /// Payload bytes this process took off the bridge or the fan-out.
    pub bytes_received: usize,
}

impl<M> RoundOutput<M> {
    fn local(mesh: M) -> Self {
        Self {
            mesh,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }
}

/// Runs redistribution rounds for one process.
///
/// The group communicator and bridge are shared handles created once per
/// process; the router only borrows them for the duration of a round.
pub struct RoleRouter<K, C, B, R = ModuloRepartitioner> {
    config: RedistConfig,
    codec: K,
    group: Option<Arc<C>>,
    bridge: Option<Arc<B>>,
    repartitioner: R,
}

impl<K, C, B> RoleRouter<K, C, B, ModuloRepartitioner>
where
    K: MeshCodec,
    C: Communicator,
    B: BridgeChannel,
{
    pub fn new(config: RedistConfig, codec: K) -> Self {
        Self {
            config,
            codec,
            group: None,
            bridge: None,
            repartitioner: ModuloRepartitioner,
        }
    }
}

impl<K, C, B, R> RoleRouter<K, C, B, R>
where
    K: MeshCodec,
    C: Communicator,
    B: BridgeChannel,
    R: Repartitioner,
{
    pub fn with_group(mut self, group: Arc<C>) -> Self {
        self.group = Some(group);
        self
    }

    pub fn with_bridge(mut self, bridge: Arc<B>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn with_repartitioner<R2: Repartitioner>(self, repartitioner: R2) -> RoleRouter<K, C, B, R2> {
        RoleRouter {
            config: self.config,
            codec: self.codec,
            group: self.group,
            bridge: self.bridge,
            repartitioner,
        }
    }

    pub fn config(&self) -> &RedistConfig {
        &self.config
    }

    fn rank(&self) -> usize {
        self.group.as_ref().map_or(0, |g| g.rank())
    }

    fn require_group(&self, role: ProcessRole) -> Result<&C, ConfigError> {
        self.group.as_deref().ok_or(ConfigError::MissingGroup { role })
    }

    fn require_bridge(&self, role: ProcessRole, rank: usize) -> Result<&B, ConfigError> {
        self.bridge
            .as_deref()
            .ok_or(ConfigError::MissingBridge { role, rank })
    }

    /// Run one round. Errors abort the round; nothing is retried.
    pub fn execute(&self, local: &K::Mesh) -> Result<RoundOutput<K::Mesh>, RedistError> {
        let settings = self.config.validate()?;
        log::debug!(
            "rank {}: round as {:?} (pass-through: {})",
            self.rank(),
            settings.role,
            settings.pass_through
        );
        match (settings.role, settings.pass_through) {
            (ProcessRole::Client, _) => self.client_round(local),
            (ProcessRole::DataServer, false) => self.data_server_duplicate(local),
            (ProcessRole::DataServer, true) => {
                self.data_server_pass_through(local, connection_of(&settings)?)
            }
            (ProcessRole::RenderServer, false) => self.render_server_fan_out(),
            (ProcessRole::RenderServer, true) => {
                self.render_server_direct(connection_of(&settings)?)
            }
            (ProcessRole::PassThrough, _) => Ok(RoundOutput::local(local.clone())),
        }
    }

    /// Pipeline-facing wrapper: a failed round is logged and yields no output.
    pub fn run_round(&self, local: &K::Mesh) -> Option<K::Mesh> {
        match self.execute(local) {
            Ok(out) => Some(out.mesh),
            Err(e) => {
                log::error!(
                    "rank {}: {:?} round aborted: {e}",
                    self.rank(),
                    self.config.role
                );
                None
            }
        }
    }

    fn client_round(&self, local: &K::Mesh) -> Result<RoundOutput<K::Mesh>, RedistError> {
        let Some(bridge) = self.bridge.as_deref() else {
            log::warn!("client has no bridge configured, keeping local data");
            return Ok(RoundOutput::local(local.clone()));
        };
        let bytes = receive_framed_within(bridge, Topic::ServerToRender, self.config.recv_timeout())?;
        Ok(RoundOutput {
            mesh: self.codec.deserialize(&bytes)?,
            bytes_sent: 0,
            bytes_received: bytes.len(),
        })
    }

    fn data_server_duplicate(&self, local: &K::Mesh) -> Result<RoundOutput<K::Mesh>, RedistError> {
        let role = ProcessRole::DataServer;
        let group = self.require_group(role)?;
        let rank = group.rank();

        let whole = duplicate_within_group(local, &self.codec, group)?;
        let mut bytes_sent = 0;
        if rank == 0 {
            let bridge = self.require_bridge(role, rank)?;
            let buf = self.codec.serialize(&whole)?;
            send_framed(bridge, Topic::ServerToRender, buf.as_slice())?;
            bytes_sent = buf.len();
        }
        Ok(RoundOutput {
            mesh: whole,
            bytes_sent,
            bytes_received: 0,
        })
    }

    fn data_server_pass_through(
        &self,
        local: &K::Mesh,
        conn: ConnectionDescriptor,
    ) -> Result<RoundOutput<K::Mesh>, RedistError> {
        let role = ProcessRole::DataServer;
        let group = self.require_group(role)?;
        let (rank, size) = (group.rank(), group.size());
        conn.check_group(role, size)?;

        let share = if conn.needs_repartition(size) {
            self.repartitioner
                .repartition(local, &self.codec, group, conn.num_connections)?
        } else {
            Some(local.clone())
        };

        let mut bytes_sent = 0;
        if let Some(share) = share {
            let bridge = self.require_bridge(role, rank)?;
            let buf = self.codec.serialize(&share)?;
            send_framed(bridge, Topic::ServerToRender, buf.as_slice())?;
            bytes_sent = buf.len();
        }
        Ok(RoundOutput {
            mesh: local.clone(),
            bytes_sent,
            bytes_received: 0,
        })
    }

    fn render_server_fan_out(&self) -> Result<RoundOutput<K::Mesh>, RedistError> {
        let role = ProcessRole::RenderServer;
        let group = self.require_group(role)?;
        let rank = group.rank();

        let bytes = if rank == 0 {
            let received = self
                .require_bridge(role, rank)
                .map_err(RedistError::from)
                .and_then(|bridge| {
                    receive_framed_within(bridge, Topic::ServerToRender, self.config.recv_timeout())
                });
            match received {
                Ok(received) => {
                    group.broadcast_bytes(0, Some(received.as_slice()), Topic::RenderFanOut)?
                }
                Err(e) => {
                    // release the rest of the group with an empty frame
                    let nothing: &[u8] = &[];
                    if let Err(fan_err) = group.broadcast_bytes(0, Some(nothing), Topic::RenderFanOut) {
                        log::warn!("rank 0: releasing render group failed: {fan_err}");
                    }
                    return Err(e);
                }
            }
        } else {
            group.broadcast_bytes(0, None, Topic::RenderFanOut)?
        };
        log::trace!(
            "rank {rank}: {} fan-out bytes ({})",
            bytes.len(),
            if group.has_native_broadcast() { "broadcast" } else { "point-to-point" }
        );
        Ok(RoundOutput {
            mesh: self.codec.deserialize(&bytes)?,
            bytes_sent: 0,
            bytes_received: bytes.len(),
        })
    }

    fn render_server_direct(&self, conn: ConnectionDescriptor) -> Result<RoundOutput<K::Mesh>, RedistError> {
        let role = ProcessRole::RenderServer;
        let group = self.require_group(role)?;
        let rank = group.rank();
        conn.check_group(role, group.size())?;
        if !conn.owns_connection(rank) {
            return Ok(RoundOutput::local(self.codec.empty()));
        }
        let bridge = self.require_bridge(role, rank)?;
        let bytes = receive_framed_within(bridge, Topic::ServerToRender, self.config.recv_timeout())?;
        Ok(RoundOutput {
            mesh: self.codec.deserialize(&bytes)?,
            bytes_sent: 0,
            bytes_received: bytes.len(),
        })
    }
}

fn connection_of(settings: &Settings) -> Result<ConnectionDescriptor, ConfigError> {
    settings.connection.ok_or(ConfigError::ZeroConnections {
        role: settings.role,
    })
}
