//! Topology manager facade and shared state.
//!
//! Lifecycle is `connect -> run -> shutdown`: [`SentinelTopologyManager::connect`]
//! bootstraps the initial topology, hands it to the pool adapter, and spawns
//! the reconciliation and DNS monitoring tasks. All state lives on the
//! manager instance; nothing is process-global.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::address::RedisUri;
use crate::client::ConnectionSettings;
use crate::config::SentinelTopologyConfig;
use crate::error::{Error, Result};
use crate::pool::PoolAdapter;
use crate::registry::{MasterCell, SentinelRegistry, ShutdownGate};
use crate::resolver::{DnsResolver, NameResolver};

/// State shared between the bootstrap, reconciliation, and DNS tasks.
pub(crate) struct ManagerInner {
    pub(crate) config: SentinelTopologyConfig,
    /// Scheme tag taken from the seed URIs, applied to every derived URI.
    pub(crate) scheme: String,
    pub(crate) resolver: Arc<dyn NameResolver>,
    pub(crate) pool: Arc<dyn PoolAdapter>,
    pub(crate) registry: SentinelRegistry,
    pub(crate) master: MasterCell,
    pub(crate) gate: ShutdownGate,
    /// Latched by the auth probe when a seed replied "auth required".
    pub(crate) use_password: AtomicBool,
    /// Hostname-form seed sentinel URIs, kept for DNS-driven discovery.
    /// Built at construction, read-only thereafter.
    pub(crate) sentinel_hosts: HashSet<RedisUri>,
    /// Replicas reported down at bootstrap. Filled once, read-only after.
    pub(crate) disconnected_replicas: Mutex<HashSet<RedisUri>>,
    /// Declared hostname URI of the master -> last resolved address.
    pub(crate) dns_masters: Mutex<HashMap<RedisUri, IpAddr>>,
    /// Declared hostname URI of each replica -> last resolved address.
    pub(crate) dns_replicas: Mutex<HashMap<RedisUri, IpAddr>>,
}

impl ManagerInner {
    fn new(
        config: SentinelTopologyConfig,
        pool: Arc<dyn PoolAdapter>,
        resolver: Arc<dyn NameResolver>,
    ) -> Result<Self> {
        let mut scheme = String::from("redis");
        let mut sentinel_hosts = HashSet::new();
        for address in &config.sentinel_addresses {
            let uri = RedisUri::parse(address)?;
            scheme = uri.scheme().to_string();
            let mapped = config.nat_mapper.map(&uri);
            if !mapped.is_ip() && mapped.host() != "localhost" {
                sentinel_hosts.insert(mapped);
            }
        }

        Ok(Self {
            config,
            scheme,
            resolver,
            pool,
            registry: SentinelRegistry::new(),
            master: MasterCell::new(),
            gate: ShutdownGate::new(),
            use_password: AtomicBool::new(false),
            sentinel_hosts,
            disconnected_replicas: Mutex::new(HashSet::new()),
            dns_masters: Mutex::new(HashMap::new()),
            dns_replicas: Mutex::new(HashMap::new()),
        })
    }

    /// NAT-map a URI, tracing remaps.
    pub(crate) fn apply_nat_map(&self, uri: &RedisUri) -> RedisUri {
        let mapped = self.config.nat_mapper.map(uri);
        if mapped != *uri {
            log::debug!("nat mapped uri: {} to {}", uri, mapped);
        }
        mapped
    }

    /// Scheme-tagged, NAT-mapped URI from reported host/port.
    pub(crate) fn to_uri(&self, host: &str, port: u16) -> RedisUri {
        self.apply_nat_map(&RedisUri::new(&self.scheme, host, port))
    }

    /// Resolve a reported host/port to an IP-form, NAT-mapped URI.
    /// Literal IPs short-circuit the resolver.
    pub(crate) async fn resolve_uri(&self, host: &str, port: u16) -> Result<RedisUri> {
        let raw = RedisUri::new(&self.scheme, host, port);
        if raw.is_ip() {
            return Ok(self.apply_nat_map(&raw));
        }
        match self.resolver.resolve_one(host, port).await {
            Ok(addr) => Ok(self.apply_nat_map(&RedisUri::from_addr(&self.scheme, addr))),
            Err(e) => {
                log::error!("unable to resolve hostname {}: {}", host, e);
                Err(Error::Resolution(host.to_string()))
            }
        }
    }

    /// Connection settings for sentinel clients, honoring the auth probe.
    pub(crate) fn sentinel_settings(&self) -> ConnectionSettings {
        let password = if self.use_password.load(Ordering::Acquire) {
            self.config
                .sentinel_password
                .clone()
                .or_else(|| self.config.password.clone())
        } else {
            None
        };
        ConnectionSettings {
            connect_timeout: self.config.connect_timeout,
            timeout: self.config.timeout,
            password,
            resolver: self.resolver.clone(),
        }
    }

    /// Tear everything down after a bootstrap failure.
    pub(crate) async fn fail_shutdown(&self) {
        self.gate.close().await;
        for client in self.registry.drain() {
            client.shutdown().await;
        }
        self.pool.shutdown().await;
    }
}

/// Sentinel-backed topology manager.
pub struct SentinelTopologyManager {
    inner: Arc<ManagerInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for SentinelTopologyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentinelTopologyManager").finish_non_exhaustive()
    }
}

impl SentinelTopologyManager {
    /// Bootstrap against the seed sentinels and start monitoring, using
    /// the system DNS resolver.
    pub async fn connect(
        config: SentinelTopologyConfig,
        pool: Arc<dyn PoolAdapter>,
    ) -> Result<Self> {
        Self::connect_with_resolver(config, pool, Arc::new(DnsResolver)).await
    }

    /// Bootstrap with a caller-supplied resolver.
    pub async fn connect_with_resolver(
        config: SentinelTopologyConfig,
        pool: Arc<dyn PoolAdapter>,
        resolver: Arc<dyn NameResolver>,
    ) -> Result<Self> {
        config.validate()?;
        let inner = Arc::new(ManagerInner::new(config, pool, resolver)?);

        let snapshot = match inner.bootstrap().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                inner.fail_shutdown().await;
                return Err(e);
            }
        };

        if let Err(e) = inner.pool.init(&snapshot).await {
            inner.fail_shutdown().await;
            return Err(e);
        }

        let mut tasks = vec![tokio::spawn(inner.clone().run_reconcile_loop())];
        if inner.dns_monitoring_needed() {
            tasks.push(tokio::spawn(inner.clone().run_dns_loop()));
        }

        Ok(Self {
            inner,
            tasks: Mutex::new(tasks),
        })
    }

    /// Current master URI.
    pub fn master(&self) -> Option<RedisUri> {
        self.inner.master.get()
    }

    /// Currently registered sentinel URIs (IP form).
    pub fn sentinels(&self) -> Vec<RedisUri> {
        self.inner.registry.uris()
    }

    /// Replicas reported down at bootstrap.
    pub fn disconnected_replicas(&self) -> HashSet<RedisUri> {
        self.inner.disconnected_replicas.lock().clone()
    }

    /// Close the gate and wait out any in-flight tick, cancel the monitor
    /// tasks, drain and shut down every registered sentinel client, then
    /// delegate to the pool shutdown. Tasks are only aborted once the gate
    /// has drained, so none dies mid-mutation.
    pub async fn shutdown(&self) {
        self.inner.gate.close().await;
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        for client in self.inner.registry.drain() {
            client.shutdown().await;
        }
        self.inner.pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::{
        kv, replica_entry, spawn_sentinel, MockPool, MockSentinelState, ScriptedResolver,
    };
    use std::net::SocketAddr;
    use std::time::Duration;

    fn test_config(seeds: Vec<String>) -> SentinelTopologyConfig {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut config = SentinelTopologyConfig::new("mymaster", seeds);
        config.scan_interval = Duration::from_millis(50);
        config.dns_interval = None;
        config.connect_timeout = Duration::from_secs(1);
        config.timeout = Duration::from_secs(1);
        config
    }

    fn seed(addr: SocketAddr) -> String {
        format!("redis://{}", addr)
    }

    fn uri(s: &str) -> RedisUri {
        RedisUri::parse(s).unwrap()
    }

    async fn spawn_fleet(n: usize, state: &Arc<MockSentinelState>) -> Vec<SocketAddr> {
        let mut addrs = Vec::new();
        for _ in 0..n {
            addrs.push(spawn_sentinel("127.0.0.1:0", state.clone()).await);
        }
        state.set_sentinel_addrs(&addrs);
        addrs
    }

    async fn wait_until(what: &str, cond: impl Fn() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !cond() {
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting for {what}");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_bootstrap_discovers_initial_topology() {
        let state = MockSentinelState::with_master("10.0.0.1", 6379);
        state.set_replicas(vec![replica_entry("10.0.0.3", 6379, ("10.0.0.1", 6379))]);
        let addrs = spawn_fleet(3, &state).await;

        let pool = Arc::new(MockPool::default());
        let config = test_config(vec![seed(addrs[0])]);
        let manager = SentinelTopologyManager::connect(config, pool.clone())
            .await
            .unwrap();

        assert_eq!(manager.master(), Some(uri("redis://10.0.0.1:6379")));
        assert_eq!(manager.sentinels().len(), 3);
        assert!(manager.disconnected_replicas().is_empty());

        let snapshot = pool.init_snapshot.lock().clone().unwrap();
        assert_eq!(snapshot.master, uri("redis://10.0.0.1:6379"));
        assert_eq!(snapshot.replicas, vec![uri("redis://10.0.0.3:6379")]);
        assert_eq!(snapshot.sentinels.len(), 3);

        manager.shutdown().await;
        assert_eq!(pool.count_events("shutdown"), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_strict_fails_with_single_sentinel() {
        let state = MockSentinelState::with_master("10.0.0.1", 6379);
        let addr = spawn_sentinel("127.0.0.1:0", state.clone()).await;

        let pool = Arc::new(MockPool::default());
        let config = test_config(vec![seed(addr)]);
        let err = SentinelTopologyManager::connect(config, pool.clone())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("check_sentinels_list"));
        // bootstrap failure tears the pool down
        assert_eq!(pool.count_events("shutdown"), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_single_sentinel_without_strict_check() {
        let state = MockSentinelState::with_master("10.0.0.1", 6379);
        let addr = spawn_sentinel("127.0.0.1:0", state.clone()).await;

        let pool = Arc::new(MockPool::default());
        let mut config = test_config(vec![seed(addr)]);
        config.check_sentinels_list = false;
        let manager = SentinelTopologyManager::connect(config, pool.clone())
            .await
            .unwrap();

        assert_eq!(manager.master(), Some(uri("redis://10.0.0.1:6379")));
        assert_eq!(manager.sentinels().len(), 1);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_bootstrap_records_disconnected_replicas() {
        let state = MockSentinelState::with_master("10.0.0.1", 6379);
        state.set_replicas(vec![
            replica_entry("10.0.0.3", 6379, ("10.0.0.1", 6379)),
            kv(&[
                ("ip", "10.0.0.4"),
                ("port", "6379"),
                ("flags", "slave,s_down"),
                ("master-link-status", "ok"),
                ("master-host", "10.0.0.1"),
                ("master-port", "6379"),
            ]),
        ]);
        let addrs = spawn_fleet(3, &state).await;

        let pool = Arc::new(MockPool::default());
        let manager = SentinelTopologyManager::connect(test_config(vec![seed(addrs[0])]), pool.clone())
            .await
            .unwrap();

        let down = uri("redis://10.0.0.4:6379");
        assert_eq!(
            manager.disconnected_replicas(),
            [down.clone()].into_iter().collect()
        );
        let snapshot = pool.init_snapshot.lock().clone().unwrap();
        assert!(snapshot.disconnected_replicas.contains(&down));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_auth_probe_latches_password() {
        let state = MockSentinelState::with_master("10.0.0.1", 6379);
        *state.password.lock() = Some("sekret".to_string());
        let addrs = spawn_fleet(3, &state).await;

        let pool = Arc::new(MockPool::default());
        let mut config = test_config(vec![seed(addrs[0])]);
        config.password = Some("sekret".to_string());
        let manager = SentinelTopologyManager::connect(config, pool.clone())
            .await
            .unwrap();

        assert_eq!(manager.master(), Some(uri("redis://10.0.0.1:6379")));
        assert_eq!(manager.sentinels().len(), 3);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_failover_swaps_master_once() {
        let state = MockSentinelState::with_master("10.0.0.1", 6379);
        let addrs = spawn_fleet(3, &state).await;

        let pool = Arc::new(MockPool::default());
        let manager = SentinelTopologyManager::connect(test_config(vec![seed(addrs[0])]), pool.clone())
            .await
            .unwrap();
        assert_eq!(manager.master(), Some(uri("redis://10.0.0.1:6379")));

        state.set_master("10.0.0.2", 6379);
        let pool_probe = pool.clone();
        wait_until("master swap", move || {
            *pool_probe.master.lock() == Some(uri("redis://10.0.0.2:6379"))
        })
        .await;

        assert_eq!(manager.master(), Some(uri("redis://10.0.0.2:6379")));
        assert_eq!(pool.count_events("change_master"), 1);
        assert!(!pool.has_replica(&uri("redis://10.0.0.1:6379")));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_change_master_reverts_cell() {
        let state = MockSentinelState::with_master("10.0.0.1", 6379);
        let addrs = spawn_fleet(3, &state).await;

        let pool = Arc::new(MockPool::default());
        let manager = SentinelTopologyManager::connect(test_config(vec![seed(addrs[0])]), pool.clone())
            .await
            .unwrap();

        pool.fail_change_master
            .store(true, std::sync::atomic::Ordering::Release);
        state.set_master("10.0.0.2", 6379);

        let pool_probe = pool.clone();
        let inner_probe = manager.inner.clone();
        wait_until("master cell rollback", move || {
            pool_probe.count_events("change_master") >= 1
                && inner_probe.master.get() == Some(uri("redis://10.0.0.1:6379"))
        })
        .await;

        pool.fail_change_master
            .store(false, std::sync::atomic::Ordering::Release);
        let pool_probe = pool.clone();
        wait_until("master swap after recovery", move || {
            *pool_probe.master.lock() == Some(uri("redis://10.0.0.2:6379"))
        })
        .await;
        assert_eq!(manager.master(), Some(uri("redis://10.0.0.2:6379")));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_replica_down_flag_freezes_and_recovers() {
        let state = MockSentinelState::with_master("10.0.0.1", 6379);
        state.set_replicas(vec![replica_entry("10.0.0.3", 6379, ("10.0.0.1", 6379))]);
        let addrs = spawn_fleet(3, &state).await;

        let pool = Arc::new(MockPool::default());
        let manager = SentinelTopologyManager::connect(test_config(vec![seed(addrs[0])]), pool.clone())
            .await
            .unwrap();
        let replica = uri("redis://10.0.0.3:6379");
        assert!(pool.is_replica_unfrozen(&replica));

        state.set_replicas(vec![kv(&[
            ("ip", "10.0.0.3"),
            ("port", "6379"),
            ("flags", "slave,s_down"),
            ("master-link-status", "ok"),
            ("master-host", "10.0.0.1"),
            ("master-port", "6379"),
        ])]);
        let pool_probe = pool.clone();
        wait_until("replica frozen", move || {
            pool_probe.count_events("replica_down") >= 1
        })
        .await;
        assert!(!pool.is_replica_unfrozen(&replica));

        state.set_replicas(vec![replica_entry("10.0.0.3", 6379, ("10.0.0.1", 6379))]);
        let pool_probe = pool.clone();
        wait_until("replica unfrozen", move || {
            pool_probe.count_events("replica_up") >= 1
        })
        .await;
        assert!(pool.is_replica_unfrozen(&replica));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_split_brain_replica_is_not_added() {
        let state = MockSentinelState::with_master("10.0.0.2", 6379);
        let addrs = spawn_fleet(3, &state).await;

        let pool = Arc::new(MockPool::default());
        let manager = SentinelTopologyManager::connect(test_config(vec![seed(addrs[0])]), pool.clone())
            .await
            .unwrap();

        // reported master differs from the current one
        state.set_replicas(vec![replica_entry("10.0.0.5", 6379, ("10.0.0.9", 6379))]);
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(pool.count_events("add_replica"), 0);
        assert!(!pool.has_replica(&uri("redis://10.0.0.5:6379")));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_sentinel_fleet_shrink_with_discovery() {
        let state = MockSentinelState::with_master("10.0.0.1", 6379);
        let addrs = spawn_fleet(3, &state).await;

        let pool = Arc::new(MockPool::default());
        let manager = SentinelTopologyManager::connect(test_config(vec![seed(addrs[0])]), pool.clone())
            .await
            .unwrap();
        assert_eq!(manager.sentinels().len(), 3);

        let survivor = uri(&seed(addrs[1]));
        state.set_sentinel_addrs(&addrs[1..2]);

        let probe = manager.inner.clone();
        let expected = survivor.clone();
        wait_until("fleet shrink", move || {
            probe.registry.uris() == vec![expected.clone()]
        })
        .await;
        assert_eq!(manager.sentinels(), vec![survivor]);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_sentinel_fleet_kept_without_discovery() {
        let state = MockSentinelState::with_master("10.0.0.1", 6379);
        let addrs = spawn_fleet(3, &state).await;

        let pool = Arc::new(MockPool::default());
        let mut config = test_config(vec![seed(addrs[0])]);
        config.sentinels_discovery = false;
        config.check_sentinels_list = false;
        let manager = SentinelTopologyManager::connect(config, pool.clone())
            .await
            .unwrap();
        assert_eq!(manager.sentinels().len(), 3);

        state.set_sentinel_addrs(&addrs[1..2]);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(manager.sentinels().len(), 3);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_dns_master_and_replica_rebinding() {
        let state = Arc::new(MockSentinelState::default());
        state.set_master("master.test", 6379);
        state.set_replicas(vec![replica_entry("replica.test", 6380, ("master.test", 6379))]);
        let addr = spawn_sentinel("127.0.0.1:0", state.clone()).await;

        let resolver = Arc::new(ScriptedResolver::default());
        resolver.set("master.test", &["10.0.0.1"]);
        resolver.set("replica.test", &["10.0.0.3"]);

        let pool = Arc::new(MockPool::default());
        let mut config = test_config(vec![seed(addr)]);
        config.check_sentinels_list = false;
        config.scan_interval = Duration::from_secs(30); // keep reconciliation quiet
        config.dns_interval = Some(Duration::from_millis(50));
        let manager =
            SentinelTopologyManager::connect_with_resolver(config, pool.clone(), resolver.clone())
                .await
                .unwrap();

        assert_eq!(manager.master(), Some(uri("redis://10.0.0.1:6379")));
        assert!(pool.has_replica(&uri("redis://10.0.0.3:6380")));

        // master hostname rebinds
        resolver.set("master.test", &["10.0.0.2"]);
        let pool_probe = pool.clone();
        wait_until("dns master swap", move || {
            *pool_probe.master.lock() == Some(uri("redis://10.0.0.2:6379"))
        })
        .await;
        assert_eq!(manager.master(), Some(uri("redis://10.0.0.2:6379")));

        // replica hostname rebinds: add the new address, then drop the old
        resolver.set("replica.test", &["10.0.0.4"]);
        let pool_probe = pool.clone();
        wait_until("dns replica swap", move || {
            pool_probe.count_events("replica_down redis://10.0.0.3") >= 1
        })
        .await;

        let events = pool.events();
        let added = events
            .iter()
            .position(|e| e == "add_replica redis://10.0.0.4:6380")
            .expect("new replica added");
        let dropped = events
            .iter()
            .position(|e| e == "replica_down redis://10.0.0.3:6380")
            .expect("old replica dropped");
        assert!(added < dropped);
        assert!(pool.is_replica_unfrozen(&uri("redis://10.0.0.4:6380")));
        assert!(!pool.is_replica_unfrozen(&uri("redis://10.0.0.3:6380")));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_dns_replica_rebinding_with_skip_replicas_init() {
        let state = MockSentinelState::with_master("10.0.0.1", 6379);
        state.set_replicas(vec![replica_entry("replica.test", 6380, ("10.0.0.1", 6379))]);
        let addr = spawn_sentinel("127.0.0.1:0", state.clone()).await;

        let resolver = Arc::new(ScriptedResolver::default());
        resolver.set("replica.test", &["10.0.0.3"]);

        let pool = Arc::new(MockPool::default());
        let mut config = test_config(vec![seed(addr)]);
        config.check_sentinels_list = false;
        config.skip_replicas_init = true;
        config.scan_interval = Duration::from_secs(30);
        config.dns_interval = Some(Duration::from_millis(50));
        let manager =
            SentinelTopologyManager::connect_with_resolver(config, pool.clone(), resolver.clone())
                .await
                .unwrap();
        assert!(pool.has_replica(&uri("redis://10.0.0.3:6380")));

        // the rebind mutates the pool even though replica reconciliation
        // is suppressed
        resolver.set("replica.test", &["10.0.0.4"]);
        let pool_probe = pool.clone();
        wait_until("dns replica swap with skip flag", move || {
            pool_probe.count_events("replica_down redis://10.0.0.3") >= 1
        })
        .await;

        assert!(pool.has_replica(&uri("redis://10.0.0.4:6380")));
        assert!(!pool.is_replica_unfrozen(&uri("redis://10.0.0.3:6380")));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_dns_sentinel_discovery() {
        let state = MockSentinelState::with_master("10.0.0.1", 6379);
        let first = spawn_sentinel("127.0.0.1:0", state.clone()).await;

        let resolver = Arc::new(ScriptedResolver::default());
        resolver.set("sentinels.test", &["127.0.0.1"]);

        let pool = Arc::new(MockPool::default());
        let mut config = test_config(vec![format!("redis://sentinels.test:{}", first.port())]);
        config.check_sentinels_list = false;
        config.scan_interval = Duration::from_secs(30);
        config.dns_interval = Some(Duration::from_millis(50));
        let manager =
            SentinelTopologyManager::connect_with_resolver(config, pool.clone(), resolver.clone())
                .await
                .unwrap();
        assert_eq!(
            manager.sentinels(),
            vec![uri(&format!("redis://127.0.0.1:{}", first.port()))]
        );

        // the sentinel hostname grows a second address
        let second = spawn_sentinel(&format!("127.0.0.2:{}", first.port()), state.clone()).await;
        resolver.set("sentinels.test", &["127.0.0.1", "127.0.0.2"]);

        let expected = uri(&format!("redis://{}", second));
        let probe = manager.inner.clone();
        let wanted = expected.clone();
        wait_until("sentinel discovered via DNS", move || {
            probe.registry.contains(&wanted)
        })
        .await;
        assert!(manager.sentinels().contains(&expected));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_register_sentinel_idempotent_under_races() {
        let state = MockSentinelState::with_master("10.0.0.1", 6379);
        let addrs = spawn_fleet(3, &state).await;

        let pool = Arc::new(MockPool::default());
        let mut config = test_config(vec![seed(addrs[0])]);
        config.sentinels_discovery = false;
        config.check_sentinels_list = false;
        let manager = SentinelTopologyManager::connect(config, pool.clone())
            .await
            .unwrap();
        assert_eq!(manager.sentinels().len(), 3);

        // a fourth sentinel discovered by eight concurrent callers
        let extra = spawn_sentinel("127.0.0.1:0", state.clone()).await;
        let target = uri(&seed(extra));
        let results = futures::future::join_all(
            (0..8).map(|_| manager.inner.register_sentinel(target.clone(), None)),
        )
        .await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(manager.sentinels().len(), 4);
        assert!(manager.sentinels().contains(&target));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_reconciliation() {
        let state = MockSentinelState::with_master("10.0.0.1", 6379);
        let addrs = spawn_fleet(3, &state).await;

        let pool = Arc::new(MockPool::default());
        let manager = SentinelTopologyManager::connect(test_config(vec![seed(addrs[0])]), pool.clone())
            .await
            .unwrap();
        manager.shutdown().await;

        state.set_master("10.0.0.2", 6379);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(pool.count_events("change_master"), 0);
        assert!(manager.sentinels().is_empty());
        assert_eq!(pool.count_events("shutdown"), 1);
    }
}
