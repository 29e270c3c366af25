//! Periodic topology reconciliation.
//!
//! Every `scan_interval` the scheduler picks one live sentinel (shuffled,
//! advancing on failure), asks it for the master address, the replica
//! list, and the sentinel fleet, and commits the differences through the
//! pool adapter. Steady-state errors never propagate; they pick the next
//! sentinel or wait for the next tick.

use std::collections::HashSet;
use std::sync::Arc;

use crate::address::RedisUri;
use crate::client::{is_replica_down, SentinelClient};
use crate::error::{Error, Result};
use crate::manager::ManagerInner;
use crate::pool::FreezeReason;

impl ManagerInner {
    pub(crate) async fn run_reconcile_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.config.scan_interval).await;
            if self.gate.is_closed() {
                return;
            }
            self.reconcile_tick().await;
        }
    }

    /// One reconciliation pass over the shuffled sentinel snapshot.
    pub(crate) async fn reconcile_tick(&self) {
        let mut clients = self.registry.snapshot();
        fastrand::shuffle(&mut clients);

        let mut last_error: Option<Error> = None;
        for client in clients {
            if !self.gate.acquire() {
                return;
            }
            let result = self.update_from(&client).await;
            self.gate.release();

            match result {
                Ok(()) => return,
                Err(e) => {
                    log::error!("can't execute SENTINEL commands on {}: {}", client.uri(), e);
                    client.shutdown().await;
                    last_error = Some(e);
                }
            }
        }

        if let Some(e) = last_error {
            log::error!("can't update cluster state: {}", e);
        }
        self.sentinel_dns_check().await;
    }

    /// Issue the three sub-queries against one sentinel. Their mutations
    /// target disjoint state and may complete in any order.
    async fn update_from(&self, client: &SentinelClient) -> Result<()> {
        let (master, replicas, sentinels) = tokio::join!(
            self.check_master_change(client),
            self.check_replicas_change(client),
            self.check_sentinels_change(client),
        );
        master.and(replicas).and(sentinels)
    }

    async fn check_master_change(&self, client: &SentinelClient) -> Result<()> {
        let Some((host, port)) = client.get_master_addr(&self.config.master_name).await? else {
            return Ok(());
        };
        let Ok(new_master) = self.resolve_uri(&host, port).await else {
            return Ok(()); // logged by resolve_uri, retried next tick
        };

        let current = self.master.get();
        if current.as_ref() == Some(&new_master) {
            return Ok(());
        }
        if self
            .master
            .compare_and_set(current.as_ref(), Some(new_master.clone()))
        {
            log::info!("master: {} changed", new_master);
            if let Err(e) = self.pool.change_master(new_master.clone()).await {
                log::error!("unable to change master to {}: {}", new_master, e);
                self.master.compare_and_set(Some(&new_master), current);
            }
        }
        Ok(())
    }

    async fn check_replicas_change(&self, client: &SentinelClient) -> Result<()> {
        if self.config.skip_replicas_init {
            return Ok(());
        }

        let entries = client.replicas(&self.config.master_name).await?;
        let mut seen: HashSet<RedisUri> = HashSet::with_capacity(entries.len());

        for info in &entries {
            if info.is_empty() {
                continue;
            }
            let Some((host, port)) = info.addr() else {
                continue;
            };
            let Ok(replica) = self.resolve_uri(host, port).await else {
                continue;
            };

            if is_replica_down(info.flags(), info.master_link_status(), self.config.check_sync) {
                self.replica_down(&replica);
                continue;
            }

            // reported master "?" means the replica has not synced yet
            let reported = match (info.master_host(), info.master_port()) {
                (Some("?"), _) | (None, _) | (_, None) => continue,
                (Some(host), Some(port)) => match self.resolve_uri(host, port).await {
                    Ok(uri) => uri,
                    Err(_) => continue,
                },
            };
            if !self.is_same_master(&replica, &reported) {
                continue;
            }

            seen.insert(replica.clone());
            self.add_replica(replica).await;
        }

        // endpoints absent from the report are gone, unless they are the master
        let current_master = self.master.get();
        for endpoint in self.pool.replica_endpoints() {
            if !seen.contains(&endpoint) && current_master.as_ref() != Some(&endpoint) {
                self.replica_down(&endpoint);
            }
        }
        Ok(())
    }

    async fn check_sentinels_change(&self, client: &SentinelClient) -> Result<()> {
        if !self.config.sentinels_discovery {
            return Ok(());
        }

        let entries = client.sentinels(&self.config.master_name).await?;
        if entries.is_empty() {
            return Ok(());
        }

        let mut fleet: HashSet<RedisUri> = HashSet::with_capacity(entries.len() + 1);
        for info in &entries {
            if info.is_empty()
                || is_replica_down(info.flags(), info.master_link_status(), self.config.check_sync)
            {
                continue;
            }
            let Some((host, port)) = info.addr() else {
                continue;
            };
            if let Ok(uri) = self.resolve_uri(host, port).await {
                fleet.insert(uri);
            }
        }
        fleet.insert(client.uri().clone());

        self.update_sentinels(fleet).await;
        Ok(())
    }

    /// Align the registry with the reported fleet.
    async fn update_sentinels(&self, fleet: HashSet<RedisUri>) {
        for uri in &fleet {
            if !self.registry.contains(uri) {
                if let Err(e) = self.register_sentinel(uri.clone(), None).await {
                    log::warn!("unable to register sentinel {}: {}", uri, e);
                }
            }
        }

        for uri in self.registry.uris() {
            if !fleet.contains(&uri) {
                if let Some(removed) = self.registry.remove(&uri) {
                    tokio::spawn(async move { removed.shutdown().await });
                    log::warn!("sentinel: {} is down", uri);
                }
            }
        }
    }

    fn is_same_master(&self, replica: &RedisUri, reported: &RedisUri) -> bool {
        let Some(master) = self.master.get() else {
            return false;
        };
        if master != *reported {
            log::warn!(
                "skipped replica up {} since its master {} differs from current {}",
                replica,
                reported,
                master
            );
            return false;
        }
        true
    }

    /// Add a replica to the pool, unfreezing it on success; replicas the
    /// pool already tracks are only unfrozen.
    pub(crate) async fn add_replica(&self, uri: RedisUri) {
        if self.pool.has_replica(&uri) {
            self.replica_up(&uri);
            return;
        }
        match self.pool.add_replica(uri.clone()).await {
            Ok(()) => {
                if self.pool.is_replica_unfrozen(&uri)
                    || self.pool.replica_up(&uri, FreezeReason::Manager)
                {
                    log::info!("replica: {} added", uri);
                }
            }
            Err(e) => log::error!("can't add replica {}: {}", uri, e),
        }
    }

    pub(crate) fn replica_up(&self, uri: &RedisUri) {
        if self.config.skip_replicas_init {
            log::info!("replica: {} is up", uri);
            return;
        }
        if self.pool.replica_up(uri, FreezeReason::Manager) {
            log::info!("replica: {} is up", uri);
        }
    }

    pub(crate) fn replica_down(&self, uri: &RedisUri) {
        if self.config.skip_replicas_init {
            log::warn!("replica: {} is down", uri);
            return;
        }
        if self.pool.replica_down(uri, FreezeReason::Manager) {
            log::warn!("replica: {} is down", uri);
        }
    }
}
