//! rps/src/upstream.rs
//! Upstream proxy pools, periodically reloaded from the control API.

use crate::config::{ApiConfig, UpstreamsConfig};
use crate::error::{Error, Result};
use crate::types::Proto;
use rand::Rng as _;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::lookup_host;
use tokio::sync::watch;
use tracing::{debug, error, trace, warn};
use url::Url;

pub const DEFAULT_WEIGHT: u16 = 1;

const USER_AGENT: &str = "rps/curl";

/// One reachable upstream proxy.
#[derive(Debug)]
pub struct Upstream {
    pub proto: Proto,
    pub addr: SocketAddr,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Reserved for weighted scheduling.
    pub weight: u16,
    /// Times this entry was handed out. Telemetry only; bumped under the
    /// pool's read lock, so exact accuracy is not guaranteed.
    count: AtomicU64,
}

impl Upstream {
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn dump(&self) {
        trace!(
            "\t{}://{}@{} #{}",
            self.proto,
            self.username.as_deref().unwrap_or(""),
            self.addr,
            self.count()
        );
    }
}

impl Clone for Upstream {
    fn clone(&self) -> Self {
        Upstream {
            proto: self.proto,
            addr: self.addr,
            username: self.username.clone(),
            password: self.password.clone(),
            weight: self.weight,
            count: AtomicU64::new(self.count()),
        }
    }
}

/// One record of the control API's JSON array. Records carrying unknown
/// keys are invalid and get skipped.
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct UpstreamRecord {
    host: String,
    port: u16,
    proto: Proto,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    weight: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    RoundRobin,
    Random,
}

impl Schedule {
    pub fn from_str(s: &str) -> Result<Schedule> {
        match s {
            "rr" => Ok(Schedule::RoundRobin),
            "random" => Ok(Schedule::Random),
            "wrr" => Err(Error::Config("wrr schedule is not implemented".into())),
            other => Err(Error::Config(format!("unknown schedule: {other}"))),
        }
    }
}

/// Per-protocol pool. Readers take the lock on session tasks; the refresh
/// task holds the write lock only across the swap.
pub struct UpstreamPool {
    pub proto: Proto,
    api: String,
    timeout: Duration,
    pool: RwLock<Vec<Upstream>>,
    index: AtomicUsize,
}

impl UpstreamPool {
    fn new(proto: Proto, api_base: &str, timeout: Duration) -> UpstreamPool {
        let api = format!("{}/proxy/{}", api_base.trim_end_matches('/'), proto);
        UpstreamPool {
            proto,
            api,
            timeout,
            pool: RwLock::new(Vec::new()),
            index: AtomicUsize::new(0),
        }
    }

    /// Fetch and decode a fresh entry list. No lock is held here.
    async fn fetch(&self, client: &reqwest::Client) -> Result<Vec<Upstream>> {
        let resp = client
            .get(&self.api)
            .timeout(self.timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Upstream(format!("fetch upstreams from '{}': {e}", self.api)))?;
        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::Upstream(format!("read upstreams from '{}': {e}", self.api)))?;
        trace!("fetch upstreams from '{}' success, {} bytes", self.api, body.len());

        let mut fresh = Vec::new();
        for record in decode_records(&body)? {
            let target = (record.host.as_str(), record.port);
            let addr = match lookup_host(target).await.ok().and_then(|mut a| a.next()) {
                Some(addr) => addr,
                None => {
                    warn!(
                        "invalid upstream address {}:{}, record skipped",
                        record.host, record.port
                    );
                    continue;
                }
            };
            fresh.push(Upstream {
                proto: record.proto,
                addr,
                username: record.username,
                password: record.password,
                weight: record.weight.unwrap_or(DEFAULT_WEIGHT),
                count: AtomicU64::new(0),
            });
        }
        Ok(fresh)
    }

    /// Replace the entry list. The previous pool survives any fetch or
    /// decode failure; the write lock covers only the pointer swap.
    async fn refresh(&self, client: &reqwest::Client) -> Result<usize> {
        let fresh = self.fetch(client).await?;
        let count = fresh.len();
        let old;
        {
            let mut pool = self.pool.write().unwrap();
            old = std::mem::replace(&mut *pool, fresh);
        }
        // old entries die outside the lock
        drop(old);
        Ok(count)
    }

    fn get(&self, schedule: Schedule) -> Result<Upstream> {
        let pool = self.pool.read().unwrap();
        if pool.is_empty() {
            return Err(Error::Upstream(format!("{} upstream pool is empty", self.proto)));
        }
        let i = match schedule {
            Schedule::RoundRobin => self.index.fetch_add(1, Ordering::Relaxed) % pool.len(),
            Schedule::Random => {
                let i = rand::rng().random_range(0..pool.len());
                self.index.store(i, Ordering::Relaxed);
                i
            }
        };
        let upstream = &pool[i];
        upstream.count.fetch_add(1, Ordering::Relaxed);
        upstream.dump();
        Ok(upstream.clone())
    }
}

/// Decode the control API body. Individually invalid records are logged
/// and skipped; a body that is not a JSON array fails the refresh.
fn decode_records(body: &[u8]) -> Result<Vec<UpstreamRecord>> {
    let values: Vec<serde_json::Value> = serde_json::from_slice(body)
        .map_err(|e| Error::Upstream(format!("json decode upstream pool: {e}")))?;

    let mut records = Vec::with_capacity(values.len());
    for value in values {
        match serde_json::from_value::<UpstreamRecord>(value) {
            Ok(record) if record.proto == Proto::Socks4 => {
                warn!("socks4 upstream record skipped");
            }
            Ok(record) => records.push(record),
            Err(e) => warn!("invalid upstream record skipped: {e}"),
        }
    }
    Ok(records)
}

/// The registry of all pools plus scheduling policy and readiness.
pub struct Upstreams {
    pools: Vec<UpstreamPool>,
    schedule: Schedule,
    hybrid: bool,
    pub maxreconn: u32,
    pub maxretry: u32,
    interval: Duration,
    client: reqwest::Client,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
}

impl Upstreams {
    pub fn new(cfg: &UpstreamsConfig, api: &ApiConfig) -> Result<Upstreams> {
        let schedule = Schedule::from_str(&cfg.schedule)?;
        Url::parse(&api.url)
            .map_err(|e| Error::Config(format!("invalid api url '{}': {e}", api.url)))?;
        if cfg.pools.is_empty() {
            return Err(Error::Config("no upstream pools configured".into()));
        }

        let timeout = Duration::from_secs(api.timeout);
        let mut pools = Vec::with_capacity(cfg.pools.len());
        for pool in &cfg.pools {
            if pool.proto == Proto::Socks4 {
                return Err(Error::Config("socks4 upstream pools are not supported".into()));
            }
            pools.push(UpstreamPool::new(pool.proto, &api.url, timeout));
        }

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Config(format!("http client init: {e}")))?;

        let (ready_tx, ready_rx) = watch::channel(false);

        Ok(Upstreams {
            pools,
            schedule,
            hybrid: cfg.hybrid,
            maxreconn: cfg.maxreconn,
            maxretry: cfg.maxretry,
            interval: Duration::from_secs(api.interval),
            client,
            ready_tx,
            ready_rx,
        })
    }

    /// Resolves once every pool has completed at least one successful
    /// refresh; acceptors block on this before serving traffic.
    pub async fn ready(&self) {
        let mut rx = self.ready_rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub async fn refresh_all(&self) {
        let mut all_ok = true;
        for pool in &self.pools {
            match pool.refresh(&self.client).await {
                Ok(count) => {
                    debug!("refresh {} upstream pool, got <{}> proxies", pool.proto, count);
                }
                Err(e) => {
                    error!("update {} upstream proxy pool failed: {e}", pool.proto);
                    all_ok = false;
                }
            }
        }
        if all_ok && !*self.ready_rx.borrow() {
            let _ = self.ready_tx.send(true);
        }
    }

    /// Periodic refresh driver; the first pass runs immediately.
    pub async fn refresh_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            self.refresh_all().await;
        }
    }

    /// Pick an upstream for a client of `proto` per the configured policy.
    pub fn get(&self, proto: Proto) -> Result<Upstream> {
        let pool = if self.hybrid {
            if proto.connect_capable() {
                // opaque tunnels can only ride connect-capable upstreams
                let candidates: Vec<&UpstreamPool> = self
                    .pools
                    .iter()
                    .filter(|p| p.proto.connect_capable())
                    .collect();
                if candidates.is_empty() {
                    return Err(Error::Upstream("no connect-capable upstream pool".into()));
                }
                candidates[rand::rng().random_range(0..candidates.len())]
            } else {
                &self.pools[rand::rng().random_range(0..self.pools.len())]
            }
        } else {
            self.pools
                .iter()
                .find(|p| p.proto == proto)
                .ok_or_else(|| Error::Upstream(format!("no {proto} upstream pool")))?
        };

        pool.get(self.schedule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use std::collections::HashSet;

    fn entry(proto: Proto, port: u16) -> Upstream {
        Upstream {
            proto,
            addr: SocketAddr::from(([127, 0, 0, 1], port)),
            username: None,
            password: None,
            weight: DEFAULT_WEIGHT,
            count: AtomicU64::new(0),
        }
    }

    fn pool_with(proto: Proto, ports: &[u16]) -> UpstreamPool {
        let pool = UpstreamPool::new(proto, "http://127.0.0.1:1", Duration::from_secs(1));
        *pool.pool.write().unwrap() = ports.iter().map(|&p| entry(proto, p)).collect();
        pool
    }

    fn upstreams_with(hybrid: bool, schedule: &str, pools: Vec<UpstreamPool>) -> Upstreams {
        let cfg = UpstreamsConfig {
            hybrid,
            schedule: schedule.into(),
            maxreconn: 1,
            maxretry: 1,
            pools: pools.iter().map(|p| PoolConfig { proto: p.proto }).collect(),
        };
        let api = ApiConfig {
            url: "http://127.0.0.1:1".into(),
            timeout: 1,
            interval: 60,
        };
        let mut us = Upstreams::new(&cfg, &api).unwrap();
        us.pools = pools;
        us
    }

    #[test]
    fn decode_skips_invalid_records() {
        let body = br#"[
            { "host": "192.0.2.1", "port": 1080, "proto": "socks5",
              "username": null, "password": null, "weight": 1 },
            { "host": "192.0.2.2", "port": "bad", "proto": "socks5" },
            { "host": "192.0.2.3", "port": 8080, "proto": "ftp" },
            { "host": "192.0.2.4", "port": 3128, "proto": "http_tunnel",
              "username": "u", "password": "p" },
            { "host": "192.0.2.5", "port": 1080, "proto": "socks4" }
        ]"#;
        let records = decode_records(body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].host, "192.0.2.1");
        assert_eq!(records[0].username, None);
        assert_eq!(records[0].weight, Some(1));
        assert_eq!(records[1].proto, Proto::HttpTunnel);
        assert_eq!(records[1].username.as_deref(), Some("u"));
    }

    #[test]
    fn decode_rejects_non_array() {
        assert!(decode_records(b"{\"host\": \"x\"}").is_err());
        assert!(decode_records(b"not json").is_err());
    }

    #[test]
    fn round_robin_visits_all_entries() {
        let pool = pool_with(Proto::Socks5, &[1001, 1002, 1003, 1004]);
        let mut seen = HashSet::new();
        for _ in 0..4 {
            seen.insert(pool.get(Schedule::RoundRobin).unwrap().addr.port());
        }
        assert_eq!(seen.len(), 4);
        // wraps around
        assert_eq!(pool.get(Schedule::RoundRobin).unwrap().addr.port(), 1001);
    }

    #[test]
    fn random_stays_in_bounds_and_updates_cursor() {
        let pool = pool_with(Proto::Socks5, &[2001, 2002, 2003]);
        for _ in 0..64 {
            let got = pool.get(Schedule::Random).unwrap();
            let i = pool.index.load(Ordering::Relaxed);
            assert!(i < 3);
            assert_eq!(
                pool.pool.read().unwrap()[i].addr.port(),
                got.addr.port()
            );
        }
    }

    #[test]
    fn empty_pool_get_fails() {
        let pool = pool_with(Proto::Socks5, &[]);
        assert!(matches!(
            pool.get(Schedule::RoundRobin),
            Err(Error::Upstream(_))
        ));
    }

    #[test]
    fn get_bumps_count() {
        let pool = pool_with(Proto::Socks5, &[3001]);
        pool.get(Schedule::RoundRobin).unwrap();
        pool.get(Schedule::RoundRobin).unwrap();
        assert_eq!(pool.pool.read().unwrap()[0].count(), 2);
    }

    #[test]
    fn concurrent_get_and_swap_sees_only_whole_entries() {
        let pool = Arc::new(pool_with(Proto::Socks5, &[4001, 4002, 4003]));
        let old_ports: HashSet<u16> = [4001, 4002, 4003].into();
        let new_ports: HashSet<u16> = [5001, 5002, 5003, 5004, 5005].into();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let old = old_ports.clone();
                let new = new_ports.clone();
                std::thread::spawn(move || {
                    for _ in 0..2000 {
                        let got = pool.get(Schedule::RoundRobin).unwrap();
                        let port = got.addr.port();
                        assert!(
                            old.contains(&port) || new.contains(&port),
                            "entry from neither generation: {port}"
                        );
                    }
                })
            })
            .collect();

        let fresh: Vec<Upstream> = new_ports
            .iter()
            .map(|&p| entry(Proto::Socks5, p))
            .collect();
        let old = {
            let mut guard = pool.pool.write().unwrap();
            std::mem::replace(&mut *guard, fresh)
        };
        drop(old);

        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn non_hybrid_matches_pool_by_proto() {
        let us = upstreams_with(
            false,
            "rr",
            vec![
                pool_with(Proto::Socks5, &[6001]),
                pool_with(Proto::HttpTunnel, &[6002]),
            ],
        );
        assert_eq!(us.get(Proto::HttpTunnel).unwrap().addr.port(), 6002);
        assert_eq!(us.get(Proto::Socks5).unwrap().addr.port(), 6001);
        assert!(matches!(us.get(Proto::Http), Err(Error::Upstream(_))));
    }

    #[test]
    fn hybrid_restricts_tunnels_to_connect_capable_pools() {
        let us = upstreams_with(
            true,
            "rr",
            vec![
                pool_with(Proto::Http, &[7001]),
                pool_with(Proto::Socks5, &[7002]),
            ],
        );
        for _ in 0..32 {
            let got = us.get(Proto::HttpTunnel).unwrap();
            assert!(got.proto.connect_capable());
        }
    }

    #[test]
    fn wrr_schedule_rejected_at_startup() {
        assert!(matches!(Schedule::from_str("wrr"), Err(Error::Config(_))));
        assert!(matches!(Schedule::from_str("lifo"), Err(Error::Config(_))));
        assert_eq!(Schedule::from_str("rr").unwrap(), Schedule::RoundRobin);
        assert_eq!(Schedule::from_str("random").unwrap(), Schedule::Random);
    }
}
