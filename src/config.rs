//! Topology manager configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::address::{IdentityNatMapper, NatMapper};
use crate::error::{Error, Result};

/// Which node group serves read commands. Only affects the empty-replica
/// warning emitted at bootstrap; routing itself is a pool concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    #[default]
    Master,
    MasterReplica,
    Replica,
}

impl ReadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadMode::Master => "MASTER",
            ReadMode::MasterReplica => "MASTER_REPLICA",
            ReadMode::Replica => "REPLICA",
        }
    }
}

/// Configuration for [`crate::SentinelTopologyManager`].
#[derive(Clone)]
pub struct SentinelTopologyConfig {
    /// Sentinel logical master name, e.g. `mymaster`. Required.
    pub master_name: String,
    /// Seed sentinel URIs (`redis://host:port`). Required, non-empty.
    pub sentinel_addresses: Vec<String>,
    /// Password for Sentinel connections, used only when the auth probe
    /// latched authentication on. Falls back to `password` when unset.
    pub sentinel_password: Option<String>,
    /// Data-plane password. Its presence triggers the auth probe.
    pub password: Option<String>,
    /// Fail bootstrap unless at least two sentinels are discovered.
    pub check_sentinels_list: bool,
    /// Reconcile Sentinel fleet membership from `SENTINEL SENTINELS`.
    pub sentinels_discovery: bool,
    /// Extend the replica down predicate with `master-link-status`.
    pub check_sync: bool,
    /// Reconciliation period.
    pub scan_interval: Duration,
    /// DNS monitoring period; `None` disables the monitor.
    pub dns_interval: Option<Duration>,
    /// Per-connection establishment budget.
    pub connect_timeout: Duration,
    /// Per-command budget.
    pub timeout: Duration,
    /// URI rewrite applied at every address boundary.
    pub nat_mapper: Arc<dyn NatMapper>,
    pub read_mode: ReadMode,
    /// Suppress initial replica connections and reconciliation replica calls.
    pub skip_replicas_init: bool,
}

impl SentinelTopologyConfig {
    pub fn new(master_name: impl Into<String>, sentinel_addresses: Vec<String>) -> Self {
        Self {
            master_name: master_name.into(),
            sentinel_addresses,
            ..Default::default()
        }
    }

    /// Check the two construction-fatal conditions.
    pub fn validate(&self) -> Result<()> {
        if self.master_name.is_empty() {
            return Err(Error::MasterNameRequired);
        }
        if self.sentinel_addresses.is_empty() {
            return Err(Error::NoSentinelAddresses);
        }
        Ok(())
    }
}

impl Default for SentinelTopologyConfig {
    fn default() -> Self {
        Self {
            master_name: String::new(),
            sentinel_addresses: Vec::new(),
            sentinel_password: None,
            password: None,
            check_sentinels_list: true,
            sentinels_discovery: true,
            check_sync: true,
            scan_interval: Duration::from_millis(1000),
            dns_interval: Some(Duration::from_millis(5000)),
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(3),
            nat_mapper: Arc::new(IdentityNatMapper),
            read_mode: ReadMode::Master,
            skip_replicas_init: false,
        }
    }
}

impl fmt::Debug for SentinelTopologyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SentinelTopologyConfig")
            .field("master_name", &self.master_name)
            .field("sentinel_addresses", &self.sentinel_addresses)
            .field("sentinel_password", &self.sentinel_password.as_deref().map(|_| "***"))
            .field("password", &self.password.as_deref().map(|_| "***"))
            .field("check_sentinels_list", &self.check_sentinels_list)
            .field("sentinels_discovery", &self.sentinels_discovery)
            .field("check_sync", &self.check_sync)
            .field("scan_interval", &self.scan_interval)
            .field("dns_interval", &self.dns_interval)
            .field("connect_timeout", &self.connect_timeout)
            .field("timeout", &self.timeout)
            .field("read_mode", &self.read_mode)
            .field("skip_replicas_init", &self.skip_replicas_init)
            .finish()
    }
}
