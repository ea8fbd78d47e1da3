//! Process roles, bridge topology and the per-run redistribution configuration.
//!
//! A [`RedistConfig`] is plain data (it derives `serde` so a host can load it
//! from whatever file format it already uses). [`RedistConfig::validate`]
//! turns it into a [`Settings`] value the router trusts.

use crate::redist_error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a process does in every round. Fixed for the lifetime of a run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessRole {
    DataServer,
    RenderServer,
    Client,
    PassThrough,
}

impl ProcessRole {
    /// Side of the bridge this role sits on; `None` for pure pass-through.
    pub fn bridge_side(self) -> Option<BridgeSide> {
        match self {
            ProcessRole::DataServer => Some(BridgeSide::DataServer),
            ProcessRole::RenderServer => Some(BridgeSide::RenderServer),
            ProcessRole::Client => Some(BridgeSide::Client),
            ProcessRole::PassThrough => None,
        }
    }

    /// Legacy mode flag that must be set for this role, if any.
    fn mode_flag(self) -> Option<&'static str> {
        match self {
            ProcessRole::DataServer => Some("server_mode"),
            ProcessRole::RenderServer => Some("render_server_mode"),
            ProcessRole::Client => Some("client_mode"),
            ProcessRole::PassThrough => None,
        }
    }

    fn is_server(self) -> bool {
        matches!(self, ProcessRole::DataServer | ProcessRole::RenderServer)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeSide {
    DataServer,
    RenderServer,
    Client,
}

/// Which end of the bridge this process is on and how many connections join the two groups.
///
/// Rank `i` of either group owns connection `i` when `i < num_connections`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub side: BridgeSide,
    pub num_connections: usize,
}

impl ConnectionDescriptor {
    pub fn new(side: BridgeSide, num_connections: usize) -> Self {
        Self {
            side,
            num_connections,
        }
    }

    pub fn owns_connection(&self, rank: usize) -> bool {
        rank < self.num_connections
    }

    /// Fewer connections than ranks: the group has to fold into `num_connections` shares first.
    pub fn needs_repartition(&self, group_size: usize) -> bool {
        self.num_connections < group_size
    }

    /// Connection `i` needs a rank `i` on both sides; more connections than
    /// ranks would leave some peer waiting on a connection nobody serves.
    pub fn check_group(&self, role: ProcessRole, group_size: usize) -> Result<(), ConfigError> {
        if self.num_connections > group_size {
            return Err(ConfigError::ConnectionsExceedGroup {
                role,
                num_connections: self.num_connections,
                group_size,
            });
        }
        Ok(())
    }
}

/// Per-run configuration as the host supplies it.
///
/// `client_mode`, `server_mode` and `render_server_mode` are the historical
/// independent switches; at most one may be set and it must agree with `role`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedistConfig {
    pub role: ProcessRole,
    /// Skip compositing and forward local data.
    pub pass_through: bool,
    pub client_mode: bool,
    pub server_mode: bool,
    pub render_server_mode: bool,
    pub num_connections: usize,
    /// Explicit bridge side, checked against `role` when given.
    pub side: Option<BridgeSide>,
    /// Bound on every blocking bridge receive; `None` leaves the channel's own
    /// bound in place. Group receives are bounded by the communicator
    /// (`ThreadComm::with_timeout`).
    pub recv_timeout_ms: Option<u64>,
}

impl Default for RedistConfig {
    fn default() -> Self {
        Self {
            role: ProcessRole::PassThrough,
            pass_through: false,
            client_mode: false,
            server_mode: false,
            render_server_mode: false,
            num_connections: 1,
            side: None,
            recv_timeout_ms: None,
        }
    }
}

impl RedistConfig {
    pub fn data_server(num_connections: usize) -> Self {
        Self {
            role: ProcessRole::DataServer,
            server_mode: true,
            num_connections,
            ..Self::default()
        }
    }

    pub fn render_server(num_connections: usize) -> Self {
        Self {
            role: ProcessRole::RenderServer,
            render_server_mode: true,
            num_connections,
            ..Self::default()
        }
    }

    pub fn client() -> Self {
        Self {
            role: ProcessRole::Client,
            client_mode: true,
            ..Self::default()
        }
    }

    pub fn with_pass_through(mut self, on: bool) -> Self {
        self.pass_through = on;
        self
    }

    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn recv_timeout(&self) -> Option<Duration> {
        self.recv_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<Settings, ConfigError> {
        let flags = [
            ("client_mode", self.client_mode),
            ("server_mode", self.server_mode),
            ("render_server_mode", self.render_server_mode),
        ];
        if flags.iter().filter(|(_, on)| *on).count() > 1 {
            return Err(ConfigError::ConflictingModeFlags);
        }
        let wanted = self.role.mode_flag();
        for (flag, on) in flags {
            if on != (wanted == Some(flag)) {
                return Err(ConfigError::RoleFlagMismatch {
                    role: self.role,
                    flag,
                });
            }
        }
        if self.role.is_server() && self.num_connections == 0 {
            return Err(ConfigError::ZeroConnections { role: self.role });
        }
        let connection = match (self.role.bridge_side(), self.side) {
            (Some(own), Some(given)) if own != given => {
                return Err(ConfigError::BridgeSideMismatch {
                    role: self.role,
                    side: given,
                });
            }
            (None, Some(given)) => {
                return Err(ConfigError::BridgeSideMismatch {
                    role: self.role,
                    side: given,
                });
            }
            (Some(own), _) => Some(ConnectionDescriptor::new(own, self.num_connections)),
            (None, None) => None,
        };
        Ok(Settings {
            role: self.role,
            pass_through: self.pass_through,
            connection,
        })
    }
}

/// Checked configuration the router runs from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub role: ProcessRole,
    pub pass_through: bool,
    pub connection: Option<ConnectionDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_validate() {
        for cfg in [
            RedistConfig::data_server(2),
            RedistConfig::render_server(2),
            RedistConfig::client(),
            RedistConfig::default(),
        ] {
            cfg.validate().unwrap();
        }
    }

    #[test]
    fn two_mode_flags_conflict() {
        let cfg = RedistConfig {
            client_mode: true,
            ..RedistConfig::data_server(1)
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ConflictingModeFlags));
    }

    #[test]
    fn server_role_without_server_mode() {
        let cfg = RedistConfig {
            server_mode: false,
            ..RedistConfig::data_server(1)
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::RoleFlagMismatch {
                role: ProcessRole::DataServer,
                flag: "server_mode"
            })
        );
    }

    #[test]
    fn zero_connections_on_server() {
        assert_eq!(
            RedistConfig::render_server(0).validate(),
            Err(ConfigError::ZeroConnections {
                role: ProcessRole::RenderServer
            })
        );
    }

    #[test]
    fn explicit_side_must_match() {
        let cfg = RedistConfig {
            side: Some(BridgeSide::RenderServer),
            ..RedistConfig::data_server(1)
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::BridgeSideMismatch { .. })
        ));
    }

    #[test]
    fn loads_from_json() {
        let cfg: RedistConfig = serde_json::from_str(
            r#"{"role":"data_server","server_mode":true,"pass_through":true,"num_connections":3}"#,
        )
        .unwrap();
        let s = cfg.validate().unwrap();
        assert!(s.pass_through);
        assert_eq!(
            s.connection,
            Some(ConnectionDescriptor::new(BridgeSide::DataServer, 3))
        );
        assert_eq!(cfg.recv_timeout(), None);
    }

    #[test]
    fn descriptor_ownership() {
        let c = ConnectionDescriptor::new(BridgeSide::DataServer, 2);
        assert!(c.owns_connection(1));
        assert!(!c.owns_connection(2));
        assert!(c.needs_repartition(4));
        assert!(!c.needs_repartition(2));
    }

    #[test]
    fn more_connections_than_ranks() {
        let c = ConnectionDescriptor::new(BridgeSide::DataServer, 3);
        assert_eq!(c.check_group(ProcessRole::DataServer, 3), Ok(()));
        assert_eq!(
            c.check_group(ProcessRole::DataServer, 2),
            Err(ConfigError::ConnectionsExceedGroup {
                role: ProcessRole::DataServer,
                num_connections: 3,
                group_size: 2
            })
        );
    }

    #[test]
    fn recv_timeout_from_duration() {
        let cfg = RedistConfig::client().with_recv_timeout(Duration::from_millis(75));
        assert_eq!(cfg.recv_timeout_ms, Some(75));
        assert_eq!(cfg.recv_timeout(), Some(Duration::from_millis(75)));
    }
}
