//! Per-domain connection lifecycle with coalesced connect attempts.
//!
//! Each configured domain owns one slot guarded by its own mutex, so
//! unrelated domains never serialize on each other. A slot moves through
//! `Uninitialized -> Connecting -> Connected | Failed`; `Failed -> Connecting`
//! happens only on the next explicit connect. While `Connecting`, the slot
//! holds a `watch` receiver for the in-flight attempt and every caller awaits
//! that same outcome, so concurrent callers never open a second physical
//! connection.
//!
//! The attempt itself runs on a spawned task bounded by the connect timeout:
//! a caller that is cancelled mid-wait cannot strand the others, and a driver
//! that never answers moves the slot to `Failed` instead of hanging waiters.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use storefront_core::EntitySchema;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{ConnectError, RegistryError};
use crate::service::{ManagedService, ServiceContext};
use crate::storage::{ConnectionId, ConnectionSpec, EntityStore, StoreConnection, StoreDriver};

/// Slot name used for the fallback connection in logs and errors.
pub const FALLBACK_SLOT: &str = "<fallback>";

/// Connection status of a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainStatus {
    Uninitialized,
    Connecting,
    Connected,
    Failed,
}

impl DomainStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DomainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry-wide settings.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Upper bound on a single physical connect attempt.
    pub connect_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Point-in-time view of one slot, for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct DomainSnapshot {
    pub domain: String,
    pub status: DomainStatus,
    pub attempts: u64,
    pub connection: Option<String>,
    pub connection_id: Option<u64>,
    pub last_error: Option<String>,
}

type ConnectOutcome = Result<Arc<dyn StoreConnection>, ConnectError>;

enum SlotState {
    Uninitialized,
    Connecting {
        attempt: u64,
        outcome: watch::Receiver<Option<ConnectOutcome>>,
    },
    Connected(Arc<dyn StoreConnection>),
    Failed(ConnectError),
}

enum Attempt {
    Ready(Arc<dyn StoreConnection>),
    Pending {
        attempt: u64,
        outcome: watch::Receiver<Option<ConnectOutcome>>,
    },
}

struct Slot {
    name: String,
    spec: ConnectionSpec,
    state: Mutex<SlotState>,
    attempts: AtomicU64,
}

impl Slot {
    fn new(name: String, spec: ConnectionSpec) -> Self {
        Self {
            name,
            spec,
            state: Mutex::new(SlotState::Uninitialized),
            attempts: AtomicU64::new(0),
        }
    }

    fn status(&self) -> DomainStatus {
        match &*self.state.lock() {
            SlotState::Uninitialized => DomainStatus::Uninitialized,
            SlotState::Connecting { .. } => DomainStatus::Connecting,
            SlotState::Connected(_) => DomainStatus::Connected,
            SlotState::Failed(_) => DomainStatus::Failed,
        }
    }

    fn connection(&self) -> Option<Arc<dyn StoreConnection>> {
        match &*self.state.lock() {
            SlotState::Connected(conn) => Some(Arc::clone(conn)),
            _ => None,
        }
    }

    fn snapshot(&self) -> DomainSnapshot {
        let state = self.state.lock();
        let (status, connection, last_error) = match &*state {
            SlotState::Uninitialized => (DomainStatus::Uninitialized, None, None),
            SlotState::Connecting { .. } => (DomainStatus::Connecting, None, None),
            SlotState::Connected(conn) => (DomainStatus::Connected, Some(Arc::clone(conn)), None),
            SlotState::Failed(err) => (DomainStatus::Failed, None, Some(err.to_string())),
        };
        DomainSnapshot {
            domain: self.name.clone(),
            status,
            attempts: self.attempts.load(Ordering::Relaxed),
            connection_id: connection.as_ref().map(|c| c.id().0),
            connection: connection.map(|c| c.label().to_string()),
            last_error,
        }
    }

    /// Records the outcome of `attempt`, unless the slot has moved on.
    ///
    /// Returns the outcome to broadcast and, if the registry shut down while
    /// the attempt was in flight, the orphaned connection to close.
    fn finish(
        &self,
        attempt: u64,
        outcome: ConnectOutcome,
        closed: &AtomicBool,
    ) -> (ConnectOutcome, Option<Arc<dyn StoreConnection>>) {
        let mut state = self.state.lock();
        let current = matches!(&*state, SlotState::Connecting { attempt: a, .. } if *a == attempt);

        match outcome {
            Ok(conn) if closed.load(Ordering::Acquire) || !current => {
                if current {
                    *state = SlotState::Failed(ConnectError::ShutDown);
                }
                (Err(ConnectError::ShutDown), Some(conn))
            }
            Ok(conn) => {
                *state = SlotState::Connected(Arc::clone(&conn));
                (Ok(conn), None)
            }
            Err(err) => {
                if current {
                    *state = SlotState::Failed(err.clone());
                }
                (Err(err), None)
            }
        }
    }

    /// Marks `attempt` failed if its task vanished without reporting.
    fn abandon(&self, attempt: u64) {
        let mut state = self.state.lock();
        if matches!(&*state, SlotState::Connecting { attempt: a, .. } if *a == attempt) {
            *state = SlotState::Failed(ConnectError::Aborted {
                domain: self.name.clone(),
            });
        }
    }
}

/// Owns one backing-store connection per configured domain, plus the
/// optional process-wide fallback connection.
///
/// The domain set is fixed at construction. Shared as `Arc<ConnectionRegistry>`.
pub struct ConnectionRegistry {
    driver: Arc<dyn StoreDriver>,
    domains: HashMap<String, Arc<Slot>>,
    fallback: Option<Arc<Slot>>,
    config: RegistryConfig,
    closed: Arc<AtomicBool>,
}

impl ConnectionRegistry {
    /// Creates a registry with every domain `Uninitialized`. Nothing connects
    /// until [`connect`](Self::connect), [`begin_connect`](Self::begin_connect)
    /// or [`warm_up`](Self::warm_up) is called.
    #[must_use]
    pub fn new(
        driver: Arc<dyn StoreDriver>,
        domains: impl IntoIterator<Item = (String, ConnectionSpec)>,
        fallback: Option<ConnectionSpec>,
        config: RegistryConfig,
    ) -> Self {
        let domains = domains
            .into_iter()
            .map(|(name, spec)| (name.clone(), Arc::new(Slot::new(name, spec))))
            .collect();
        Self {
            driver,
            domains,
            fallback: fallback.map(|spec| Arc::new(Slot::new(FALLBACK_SLOT.to_string(), spec))),
            config,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Configured domain names, sorted.
    #[must_use]
    pub fn domains(&self) -> Vec<String> {
        let mut names: Vec<String> = self.domains.keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn has_domain(&self, domain: &str) -> bool {
        self.domains.contains_key(domain)
    }

    #[must_use]
    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Current status, or `None` for an unknown domain. Never suspends.
    #[must_use]
    pub fn status(&self, domain: &str) -> Option<DomainStatus> {
        self.domains.get(domain).map(|slot| slot.status())
    }

    /// Whether the domain is `Connected`. Never suspends.
    #[must_use]
    pub fn is_connected(&self, domain: &str) -> bool {
        self.status(domain) == Some(DomainStatus::Connected)
    }

    /// Returns the live connection. Never suspends.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotConnected`] unless the domain is `Connected`.
    pub fn get_connection(&self, domain: &str) -> Result<Arc<dyn StoreConnection>, RegistryError> {
        let slot = self
            .domains
            .get(domain)
            .ok_or_else(|| RegistryError::UnknownDomain {
                domain: domain.to_string(),
            })?;
        slot.connection().ok_or_else(|| RegistryError::NotConnected {
            domain: domain.to_string(),
            status: slot.status(),
        })
    }

    /// Returns the domain's connection, connecting if needed.
    ///
    /// Idempotent: `Connected` returns immediately; `Connecting` joins the
    /// in-flight attempt; `Uninitialized`/`Failed` starts a new attempt.
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the attempt's [`ConnectError`], shared by all coalesced callers.
    pub async fn connect(&self, domain: &str) -> Result<Arc<dyn StoreConnection>, ConnectError> {
        let slot = self
            .domains
            .get(domain)
            .ok_or_else(|| ConnectError::UnknownDomain {
                domain: domain.to_string(),
            })?;
        self.connect_slot(slot).await
    }

    /// Starts a connect attempt in the background if the domain is not
    /// connected and none is in flight. Never suspends.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::UnknownDomain`] or [`ConnectError::ShutDown`].
    pub fn begin_connect(&self, domain: &str) -> Result<DomainStatus, ConnectError> {
        let slot = self
            .domains
            .get(domain)
            .ok_or_else(|| ConnectError::UnknownDomain {
                domain: domain.to_string(),
            })?;
        self.poll_or_start(slot)?;
        Ok(slot.status())
    }

    /// Returns the fallback connection, connecting if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::NoFallback`] if none is configured, or the
    /// attempt's error.
    pub async fn connect_fallback(&self) -> Result<Arc<dyn StoreConnection>, ConnectError> {
        let slot = self.fallback.as_ref().ok_or(ConnectError::NoFallback)?;
        self.connect_slot(slot).await
    }

    /// The fallback connection if it is already up. Never suspends.
    #[must_use]
    pub fn fallback_connection(&self) -> Option<Arc<dyn StoreConnection>> {
        self.fallback.as_ref().and_then(|slot| slot.connection())
    }

    /// Kicks off connect attempts for every domain and the fallback without
    /// waiting for them. Requests arriving meanwhile see a cold start.
    pub fn warm_up(&self) {
        let slots = self.domains.values().chain(self.fallback.iter());
        for slot in slots {
            if let Err(err) = self.poll_or_start(slot) {
                warn!(domain = %slot.name, error = %err, "warm-up connect not started");
            }
        }
    }

    /// Snapshot of every domain, sorted by name.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DomainSnapshot> {
        let mut snapshots: Vec<DomainSnapshot> =
            self.domains.values().map(|slot| slot.snapshot()).collect();
        snapshots.sort_by(|a, b| a.domain.cmp(&b.domain));
        snapshots
    }

    #[must_use]
    pub fn fallback_snapshot(&self) -> Option<DomainSnapshot> {
        self.fallback.as_ref().map(|slot| slot.snapshot())
    }

    /// Connection id of the fallback, if connected.
    #[must_use]
    pub fn fallback_connection_id(&self) -> Option<ConnectionId> {
        self.fallback_connection().map(|c| c.id())
    }

    /// Binds `schema` to `connection` through the registry's driver.
    ///
    /// # Errors
    ///
    /// Propagates the driver's error.
    pub async fn bind_schema(
        &self,
        connection: &Arc<dyn StoreConnection>,
        schema: &EntitySchema,
    ) -> anyhow::Result<Arc<dyn EntityStore>> {
        self.driver.bind_schema(connection, schema).await
    }

    /// Closes every live connection. Later connects fail with
    /// [`ConnectError::ShutDown`]; attempts still in flight close their
    /// connection when they complete.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);

        let mut open = Vec::new();
        for slot in self.domains.values().chain(self.fallback.iter()) {
            let mut state = slot.state.lock();
            if let SlotState::Connected(conn) = &*state {
                open.push((slot.name.clone(), Arc::clone(conn)));
                *state = SlotState::Failed(ConnectError::ShutDown);
            }
        }

        for (domain, conn) in open {
            match conn.close().await {
                Ok(()) => info!(domain = %domain, connection_id = %conn.id(), "connection closed"),
                Err(err) => warn!(domain = %domain, error = %err, "error closing connection"),
            }
        }
    }

    async fn connect_slot(&self, slot: &Arc<Slot>) -> Result<Arc<dyn StoreConnection>, ConnectError> {
        match self.poll_or_start(slot)? {
            Attempt::Ready(conn) => Ok(conn),
            Attempt::Pending { attempt, mut outcome } => {
                let received = outcome
                    .wait_for(Option::is_some)
                    .await
                    .map(|value| (*value).clone());
                match received {
                    Ok(Some(result)) => result,
                    Ok(None) | Err(_) => {
                        slot.abandon(attempt);
                        Err(ConnectError::Aborted {
                            domain: slot.name.clone(),
                        })
                    }
                }
            }
        }
    }

    fn poll_or_start(&self, slot: &Arc<Slot>) -> Result<Attempt, ConnectError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnectError::ShutDown);
        }
        let mut state = slot.state.lock();
        if let SlotState::Connected(conn) = &*state {
            return Ok(Attempt::Ready(Arc::clone(conn)));
        }
        if let SlotState::Connecting { attempt, outcome } = &*state {
            debug!(domain = %slot.name, attempt, "joining in-flight connect");
            return Ok(Attempt::Pending {
                attempt: *attempt,
                outcome: outcome.clone(),
            });
        }
        Ok(self.start_attempt(slot, &mut state))
    }

    /// Moves the slot to `Connecting` and spawns the physical attempt.
    /// Caller holds the slot lock.
    fn start_attempt(&self, slot: &Arc<Slot>, state: &mut SlotState) -> Attempt {
        let attempt = slot.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = watch::channel(None);
        *state = SlotState::Connecting {
            attempt,
            outcome: rx.clone(),
        };

        metrics::counter!("storefront_connect_attempts_total", "domain" => slot.name.clone())
            .increment(1);
        info!(domain = %slot.name, attempt, spec = %slot.spec, "connecting");

        let driver = Arc::clone(&self.driver);
        let slot = Arc::clone(slot);
        let closed = Arc::clone(&self.closed);
        let timeout = self.config.connect_timeout;

        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, driver.connect(&slot.spec)).await {
                Ok(Ok(conn)) => Ok(conn),
                Ok(Err(err)) => Err(ConnectError::Failed {
                    domain: slot.name.clone(),
                    reason: format!("{err:#}"),
                }),
                Err(_elapsed) => Err(ConnectError::Timeout {
                    domain: slot.name.clone(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }),
            };

            let (outcome, orphan) = slot.finish(attempt, result, &closed);
            match &outcome {
                Ok(conn) => {
                    metrics::counter!("storefront_connect_success_total", "domain" => slot.name.clone())
                        .increment(1);
                    info!(domain = %slot.name, attempt, connection_id = %conn.id(), "connected");
                }
                Err(err) => {
                    metrics::counter!("storefront_connect_failure_total", "domain" => slot.name.clone())
                        .increment(1);
                    warn!(domain = %slot.name, attempt, error = %err, "connect failed");
                }
            }
            // Waiters may all have gone away; the slot state is already updated.
            let _ = tx.send(Some(outcome));

            if let Some(conn) = orphan {
                let _ = conn.close().await;
            }
        });

        Attempt::Pending { attempt, outcome: rx }
    }
}

#[async_trait]
impl ManagedService for ConnectionRegistry {
    fn name(&self) -> &'static str {
        "connections"
    }

    async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        self.warm_up();
        Ok(())
    }

    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        ConnectionRegistry::shutdown(self).await;
        Ok(())
    }
}
