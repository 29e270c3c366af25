//! First contact with the sentinel fleet.
//!
//! Walks the seed addresses, latches authentication through the probe,
//! takes the initial topology snapshot from the first sentinel that yields
//! a master, and registers the discovered fleet.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::future::join_all;

use crate::address::RedisUri;
use crate::client::{is_replica_down, ConnectionSettings, SentinelClient};
use crate::config::ReadMode;
use crate::error::{Error, Result};
use crate::manager::ManagerInner;
use crate::pool::TopologySnapshot;

impl ManagerInner {
    pub(crate) async fn bootstrap(&self) -> Result<TopologySnapshot> {
        self.check_auth().await?;
        self.seed_topology().await
    }

    /// Probe the seeds for whether they demand authentication.
    ///
    /// Runs only when a data-plane password is configured. The first
    /// definitive outcome wins; exhaustion without any connection is fatal.
    async fn check_auth(&self) -> Result<()> {
        if self.config.password.is_none() {
            return Ok(());
        }

        for address in &self.config.sentinel_addresses {
            let uri = self.apply_nat_map(&RedisUri::parse(address)?);
            let client = SentinelClient::new(
                uri.clone(),
                None,
                ConnectionSettings {
                    password: None,
                    ..self.sentinel_settings()
                },
            );
            let outcome = client.ping().await;
            client.shutdown().await;
            match outcome {
                Ok(()) => return Ok(()),
                Err(Error::AuthRequired(_)) => {
                    self.use_password.store(true, Ordering::Release);
                    return Ok(());
                }
                Err(e @ (Error::Connection(..) | Error::Timeout(_) | Error::Io(_))) => {
                    log::warn!("can't connect to sentinel server {}: {}", uri, e);
                }
                Err(e) => {
                    log::debug!("auth probe against {} skipped: {}", uri, e);
                }
            }
        }

        Err(Error::SentinelsUnreachable(
            self.config.sentinel_addresses.join(", "),
        ))
    }

    /// Take the initial topology snapshot from the first responsive seed.
    async fn seed_topology(&self) -> Result<TopologySnapshot> {
        let mut last_error: Option<Error> = None;
        let mut replicas: Vec<RedisUri> = Vec::new();

        for address in &self.config.sentinel_addresses {
            let uri = self.apply_nat_map(&RedisUri::parse(address)?);
            let declared = (!uri.is_ip()).then(|| uri.host().to_string());
            let client = SentinelClient::new(uri.clone(), declared, self.sentinel_settings());

            let outcome = self.seed_from(&client, &mut replicas).await;
            client.shutdown().await;
            match outcome {
                Ok(()) => break,
                Err(e @ Error::MasterUndefined) => return Err(e),
                Err(e) => {
                    log::warn!("sentinel {} did not yield a topology: {}", uri, e);
                    last_error = Some(e);
                }
            }
        }

        if self.config.check_sentinels_list && self.config.sentinels_discovery {
            if self.registry.is_empty() {
                return Err(Error::SentinelsListEmpty);
            }
            if self.registry.len() < 2 {
                return Err(Error::SentinelsListTooSmall);
            }
        }

        let Some(master) = self.master.get() else {
            let cause = last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no sentinel responded".to_string());
            return Err(Error::NoMasterDiscovered(cause));
        };

        if self.config.read_mode != ReadMode::Master && replicas.is_empty() {
            log::warn!(
                "read_mode = {}, but replica nodes are not found",
                self.config.read_mode.as_str()
            );
        }

        Ok(TopologySnapshot {
            master,
            replicas,
            disconnected_replicas: self.disconnected_replicas.lock().clone(),
            sentinels: self.registry.uris(),
        })
    }

    /// Pull master, replicas, and the sentinel fleet from one seed.
    async fn seed_from(&self, client: &SentinelClient, replicas: &mut Vec<RedisUri>) -> Result<()> {
        let name = &self.config.master_name;

        // discard anything a previously failed seed attempt recorded
        replicas.clear();
        self.disconnected_replicas.lock().clear();
        self.dns_masters.lock().clear();
        self.dns_replicas.lock().clear();

        let (host, port) = client
            .get_master_addr(name)
            .await?
            .ok_or(Error::MasterUndefined)?;
        let declared_master = self.to_uri(&host, port);
        let master_uri = self.resolve_uri(&host, port).await?;
        self.master.set(master_uri.clone());
        log::info!("master: {} added", master_uri);
        if !declared_master.is_ip() {
            if let Some(ip) = master_uri.ip() {
                self.dns_masters.lock().insert(declared_master, ip);
            }
        }

        for info in client.replicas(name).await? {
            if info.is_empty() {
                continue;
            }
            let Some((host, port)) = info.addr() else {
                continue;
            };
            let declared = self.to_uri(host, port);
            let uri = self.resolve_uri(host, port).await?;
            if uri == master_uri {
                log::debug!("replica {} matches the master address, skipped", uri);
                continue;
            }
            log::debug!("replica {} state: {:?}", uri, info);
            replicas.push(uri.clone());
            log::info!("replica: {} added", uri);
            if is_replica_down(info.flags(), info.master_link_status(), self.config.check_sync) {
                self.disconnected_replicas.lock().insert(uri.clone());
                log::warn!("replica: {} is down", uri);
            }
            if !declared.is_ip() {
                if let Some(ip) = uri.ip() {
                    self.dns_replicas.lock().insert(declared, ip);
                }
            }
        }

        let mut registrations = Vec::new();
        for info in client.sentinels(name).await? {
            if info.is_empty() {
                continue;
            }
            let Some((host, port)) = info.addr() else {
                continue;
            };
            let declared =
                (!RedisUri::new(&self.scheme, host, port).is_ip()).then(|| host.to_string());
            let uri = self.resolve_uri(host, port).await?;
            registrations.push(self.register_sentinel(uri, declared));
        }

        // the currently-connected sentinel itself, under its IP-form URI
        let own = client.uri().clone();
        let own_ip_form = if own.is_ip() {
            own
        } else {
            self.resolve_uri(own.host(), own.port()).await?
        };
        registrations.push(self.register_sentinel(own_ip_form, None));

        match tokio::time::timeout(self.config.connect_timeout, join_all(registrations)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        log::warn!("unable to register sentinel: {}", e);
                    }
                }
            }
            Err(_) => log::warn!("sentinel registration did not finish within connect timeout"),
        }

        Ok(())
    }

    /// Register a sentinel under its IP-form URI, connecting and PINGing it
    /// first. Idempotent under concurrent discovery: the registry insert is
    /// a compare-and-set, every caller observes success.
    pub(crate) async fn register_sentinel(
        &self,
        uri: RedisUri,
        declared_host: Option<String>,
    ) -> Result<()> {
        let is_hostname = !uri.is_ip();
        if !is_hostname && self.registry.contains(&uri) {
            return Ok(());
        }

        let ip_form = if is_hostname {
            self.resolve_uri(uri.host(), uri.port()).await?
        } else {
            uri.clone()
        };
        if is_hostname && self.registry.contains(&ip_form) {
            return Ok(());
        }

        let declared = declared_host.or_else(|| is_hostname.then(|| uri.host().to_string()));
        let client = Arc::new(SentinelClient::new(
            ip_form.clone(),
            declared,
            self.sentinel_settings(),
        ));
        client.ping().await?;

        if self.registry.try_register(ip_form.clone(), client.clone()) {
            log::info!("sentinel: {} added", ip_form);
        } else {
            // lost the race, the registered entry stays
            client.shutdown().await;
        }
        Ok(())
    }
}
