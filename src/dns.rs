//! DNS change monitoring.
//!
//! Nodes declared by hostname can move without Sentinel noticing, so the
//! monitor periodically re-resolves every declared hostname and issues the
//! same swap/rebind mutations the reconciler would. A physical change can
//! therefore arrive on two channels; the master cell CAS and the pool
//! adapter keep the outcome idempotent.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use futures::future::join_all;

use crate::address::RedisUri;
use crate::manager::ManagerInner;
use crate::pool::FreezeReason;

impl ManagerInner {
    /// DNS monitoring runs only when an interval is configured and there
    /// is at least one hostname to watch; literal IPs are immutable.
    pub(crate) fn dns_monitoring_needed(&self) -> bool {
        self.config.dns_interval.is_some()
            && (!self.dns_masters.lock().is_empty()
                || !self.dns_replicas.lock().is_empty()
                || !self.sentinel_hosts.is_empty())
    }

    pub(crate) async fn run_dns_loop(self: Arc<Self>) {
        let Some(interval) = self.config.dns_interval else {
            return;
        };
        log::debug!(
            "DNS monitoring enabled; masters: {:?}, replicas: {:?}",
            self.dns_masters.lock(),
            self.dns_replicas.lock()
        );
        loop {
            tokio::time::sleep(interval).await;
            if self.gate.is_closed() {
                return;
            }
            self.dns_tick().await;
        }
    }

    /// Re-resolve every monitored hostname; all checks of one tick run
    /// concurrently and the tick re-arms when the last completes.
    pub(crate) async fn dns_tick(&self) {
        let masters: Vec<(RedisUri, IpAddr)> = self
            .dns_masters
            .lock()
            .iter()
            .map(|(uri, addr)| (uri.clone(), *addr))
            .collect();
        let replicas: Vec<(RedisUri, IpAddr)> = self
            .dns_replicas
            .lock()
            .iter()
            .map(|(uri, addr)| (uri.clone(), *addr))
            .collect();

        let master_checks = masters
            .iter()
            .map(|(declared, last)| self.check_master_dns(declared, *last));
        let replica_checks = replicas
            .iter()
            .map(|(declared, last)| self.check_replica_dns(declared, *last));
        futures::join!(join_all(master_checks), join_all(replica_checks));

        self.sentinel_dns_check().await;
    }

    async fn check_master_dns(&self, declared: &RedisUri, last: IpAddr) {
        log::debug!("resolving master host {}", declared.host());
        let addr = match self
            .resolver
            .resolve_one(declared.host(), declared.port())
            .await
        {
            Ok(addr) => addr,
            Err(e) => {
                log::error!("unable to resolve {}: {}", declared.host(), e);
                return;
            }
        };
        if addr.ip() == last {
            return;
        }

        log::info!(
            "detected DNS change, master {} changed ip from {} to {}",
            declared,
            last,
            addr.ip()
        );
        let old_uri =
            self.apply_nat_map(&RedisUri::from_addr(&self.scheme, SocketAddr::new(last, declared.port())));
        let new_uri = self.apply_nat_map(&RedisUri::from_addr(&self.scheme, addr));

        if !self.gate.acquire() {
            return;
        }
        let current = self.master.get();
        if current.as_ref() != Some(&old_uri) {
            log::error!("unable to find entry for current master {}", old_uri);
            self.gate.release();
            return;
        }
        match self.pool.change_master(new_uri.clone()).await {
            Ok(()) => {
                self.master
                    .compare_and_set(current.as_ref(), Some(new_uri.clone()));
                self.dns_masters.lock().insert(declared.clone(), addr.ip());
            }
            Err(e) => log::error!("unable to change master to {}: {}", new_uri, e),
        }
        self.gate.release();
    }

    async fn check_replica_dns(&self, declared: &RedisUri, last: IpAddr) {
        log::debug!("resolving replica host {}", declared.host());
        let addr = match self
            .resolver
            .resolve_one(declared.host(), declared.port())
            .await
        {
            Ok(addr) => addr,
            Err(e) => {
                log::error!("unable to resolve {}: {}", declared.host(), e);
                return;
            }
        };
        if addr.ip() == last {
            return;
        }

        log::info!(
            "detected DNS change, replica {} changed ip from {} to {}",
            declared.host(),
            last,
            addr.ip()
        );
        let old_uri =
            self.apply_nat_map(&RedisUri::from_addr(&self.scheme, SocketAddr::new(last, declared.port())));
        let new_uri = self.apply_nat_map(&RedisUri::from_addr(&self.scheme, addr));

        if !self.gate.acquire() {
            return;
        }
        if !self.pool.has_replica(&old_uri) {
            self.gate.release();
            return;
        }
        // rebinds act on entries the pool already tracks, so they go to the
        // pool directly, not through the skip_replicas_init-gated wrappers
        if self.pool.has_replica(&new_uri) {
            if self.pool.replica_up(&new_uri, FreezeReason::Manager) {
                log::info!("replica: {} is up", new_uri);
            }
            if self.pool.replica_down(&old_uri, FreezeReason::Manager) {
                log::warn!("replica: {} is down", old_uri);
            }
            self.dns_replicas.lock().insert(declared.clone(), addr.ip());
        } else {
            match self.pool.add_replica(new_uri.clone()).await {
                Ok(()) => {
                    if self.pool.replica_down(&old_uri, FreezeReason::Manager) {
                        log::warn!("replica: {} is down", old_uri);
                    }
                    self.dns_replicas.lock().insert(declared.clone(), addr.ip());
                }
                Err(e) => log::error!("can't add replica {}: {}", new_uri, e),
            }
        }
        self.gate.release();
    }

    /// Re-resolve the hostname-seeded sentinels and register any address
    /// not yet in the registry.
    pub(crate) async fn sentinel_dns_check(&self) {
        for host_uri in &self.sentinel_hosts {
            let addrs = match self
                .resolver
                .resolve_all(host_uri.host(), host_uri.port())
                .await
            {
                Ok(addrs) => addrs,
                Err(e) => {
                    log::error!("unable to resolve {}: {}", host_uri.host(), e);
                    continue;
                }
            };

            for addr in addrs {
                let uri = self.apply_nat_map(&RedisUri::from_addr(&self.scheme, addr));
                if self.registry.contains(&uri) {
                    continue;
                }
                if let Err(e) = self
                    .register_sentinel(uri.clone(), Some(host_uri.host().to_string()))
                    .await
                {
                    log::warn!("unable to register sentinel {}: {}", uri, e);
                }
            }
        }
    }
}
