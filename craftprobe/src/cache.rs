//! TTL caching of statuses, and coalescing of identical in-flight lookups.
//!
//! The first request for a key becomes the leader and runs the probe; requests
//! arriving while it runs subscribe to its outcome instead of probing again.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use tokio::sync::watch;

use crate::{
    Error,
    model::{Platform, ProbeRequest, ServerStatus},
    orchestrator::StatusProbe,
};

/// Identity of a lookup: platform, normalised hostname and effective port.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CacheKey {
    pub platform: Platform,
    pub hostname: String,
    pub port: u16,
}

impl CacheKey {
    #[must_use]
    pub fn new(request: &ProbeRequest) -> Self {
        Self {
            platform: request.platform,
            hostname: request
                .hostname
                .trim_end_matches('.')
                .to_ascii_lowercase(),
            port: request.effective_port(),
        }
    }
}

/// A key/value store with per-entry expiry.
pub trait StatusCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<ServerStatus>;
    fn put(&self, key: CacheKey, value: ServerStatus, ttl: Duration);
}

struct CacheEntry {
    status: ServerStatus,
    expires_at: Instant,
}

/// In-process [`StatusCache`].
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<CacheKey, CacheEntry>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }
}

impl StatusCache for MemoryCache {
    fn get(&self, key: &CacheKey) -> Option<ServerStatus> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Some(entry.status.clone());
            }
        }
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    fn put(&self, key: CacheKey, value: ServerStatus, ttl: Duration) {
        self.entries.insert(
            key,
            CacheEntry {
                status: value,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

/// What a leader hands its followers.
#[derive(Clone)]
enum Settled {
    Found(ServerStatus),
    NotFound,
}

type InflightSender = Arc<watch::Sender<Option<Settled>>>;
type InflightMap = DashMap<CacheKey, InflightSender>;

/// Removes the in-flight entry when the leader finishes or is cancelled.
///
/// A cancelled leader publishes `None`, which sends followers back to the
/// cache and, failing that, to run the probe themselves.
struct InflightLeaderGuard<'a> {
    inflight: &'a InflightMap,
    key: CacheKey,
    settled: bool,
}

impl InflightLeaderGuard<'_> {
    fn settle(&mut self, outcome: Settled) {
        self.settled = true;
        if let Some((_, tx)) = self.inflight.remove(&self.key) {
            let _ = tx.send(Some(outcome));
        }
    }
}

impl Drop for InflightLeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            if let Some((_, tx)) = self.inflight.remove(&self.key) {
                let _ = tx.send(None);
            }
        }
    }
}

enum Role<'a> {
    Leader(InflightLeaderGuard<'a>),
    Follower(watch::Receiver<Option<Settled>>),
}

/// Wraps a [`StatusProbe`] with a TTL cache and at most one in-flight probe per key.
pub struct CachedProber<P, C = MemoryCache> {
    inner: P,
    cache: C,
    ttl: Duration,
    inflight: InflightMap,
}

impl<P: StatusProbe, C: StatusCache> CachedProber<P, C> {
    pub fn new(inner: P, cache: C, ttl: Duration) -> Self {
        Self {
            inner,
            cache,
            ttl,
            inflight: DashMap::new(),
        }
    }

    pub const fn cache(&self) -> &C {
        &self.cache
    }

    pub const fn inner(&self) -> &P {
        &self.inner
    }

    /// Returns a cached status, joins an identical probe already running, or probes.
    ///
    /// # Errors
    /// [`Error::ResourceNotFound`] when no status could be obtained. Failures are not cached.
    pub async fn probe(&self, request: &ProbeRequest) -> Result<ServerStatus, Error> {
        let key = CacheKey::new(request);
        loop {
            if let Some(status) = self.cache.get(&key) {
                debug!(platform = %key.platform, hostname = %key.hostname, port = key.port, "cache hit");
                return Ok(status);
            }
            match self.register_or_join(&key) {
                Role::Leader(guard) => return self.lead(request, guard).await,
                Role::Follower(rx) => match follow(rx).await {
                    Some(Settled::Found(status)) => return Ok(status),
                    Some(Settled::NotFound) => return Err(Error::ResourceNotFound),
                    None => trace!(hostname = %key.hostname, "leader cancelled, retrying"),
                },
            }
        }
    }

    fn register_or_join(&self, key: &CacheKey) -> Role<'_> {
        match self.inflight.entry(key.clone()) {
            dashmap::Entry::Occupied(e) => Role::Follower(e.get().subscribe()),
            dashmap::Entry::Vacant(e) => {
                let (tx, _) = watch::channel(None);
                e.insert(Arc::new(tx));
                Role::Leader(InflightLeaderGuard {
                    inflight: &self.inflight,
                    key: key.clone(),
                    settled: false,
                })
            }
        }
    }

    async fn lead(
        &self,
        request: &ProbeRequest,
        mut guard: InflightLeaderGuard<'_>,
    ) -> Result<ServerStatus, Error> {
        debug!(platform = %request.platform, hostname = %request.hostname, "cache miss");
        match self.inner.probe(request).await {
            Ok(status) => {
                self.cache.put(guard.key.clone(), status.clone(), self.ttl);
                guard.settle(Settled::Found(status.clone()));
                Ok(status)
            }
            Err(e) => {
                guard.settle(Settled::NotFound);
                Err(e)
            }
        }
    }
}

async fn follow(mut rx: watch::Receiver<Option<Settled>>) -> Option<Settled> {
    // An error means the sender is gone; whatever it last published still counts.
    let _ = rx.changed().await;
    rx.borrow().clone()
}
