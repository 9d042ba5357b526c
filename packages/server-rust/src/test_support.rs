//! Scripted driver for tests: counts physical connect attempts and schema
//! binds per spec, and injects delays, failures and hangs in front of a
//! [`MemoryDriver`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use storefront_core::EntitySchema;

use crate::storage::{
    ConnectionId, ConnectionSpec, EntityStore, MemoryDriver, StoreConnection, StoreDriver,
};

#[derive(Debug, Clone, Default)]
struct Script {
    delay: Option<Duration>,
    bind_delay: Option<Duration>,
    failures: usize,
    hang: bool,
}

#[derive(Default)]
struct Counters {
    attempts: HashMap<String, usize>,
    closed: HashMap<String, usize>,
    binds: HashMap<String, usize>,
}

pub(crate) struct ScriptedDriver {
    memory: MemoryDriver,
    scripts: Mutex<HashMap<String, Script>>,
    counters: Arc<Mutex<Counters>>,
}

impl ScriptedDriver {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            memory: MemoryDriver::new(),
            scripts: Mutex::new(HashMap::new()),
            counters: Arc::new(Mutex::new(Counters::default())),
        })
    }

    pub(crate) fn delay(&self, spec: &str, delay: Duration) {
        self.scripts.lock().entry(spec.to_string()).or_default().delay = Some(delay);
    }

    pub(crate) fn bind_delay(&self, spec: &str, delay: Duration) {
        self.scripts.lock().entry(spec.to_string()).or_default().bind_delay = Some(delay);
    }

    pub(crate) fn fail_times(&self, spec: &str, failures: usize) {
        self.scripts.lock().entry(spec.to_string()).or_default().failures = failures;
    }

    pub(crate) fn hang(&self, spec: &str, hang: bool) {
        self.scripts.lock().entry(spec.to_string()).or_default().hang = hang;
    }

    pub(crate) fn attempts(&self, spec: &str) -> usize {
        self.counters.lock().attempts.get(spec).copied().unwrap_or(0)
    }

    pub(crate) fn closed(&self, spec: &str) -> usize {
        self.counters.lock().closed.get(spec).copied().unwrap_or(0)
    }

    pub(crate) fn binds(&self, spec: &str) -> usize {
        self.counters.lock().binds.get(spec).copied().unwrap_or(0)
    }

    pub(crate) fn memory(&self) -> &MemoryDriver {
        &self.memory
    }
}

#[async_trait]
impl StoreDriver for ScriptedDriver {
    async fn connect(&self, spec: &ConnectionSpec) -> anyhow::Result<Arc<dyn StoreConnection>> {
        let raw = spec.expose().to_string();
        *self.counters.lock().attempts.entry(raw.clone()).or_default() += 1;

        let (script, fail) = {
            let mut scripts = self.scripts.lock();
            let script = scripts.entry(raw.clone()).or_default();
            let fail = script.failures > 0;
            if fail {
                script.failures -= 1;
            }
            (script.clone(), fail)
        };

        if script.hang {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            anyhow::bail!("scripted failure for {spec}");
        }

        let inner = self.memory.connect(spec).await?;
        Ok(Arc::new(ScriptedConnection {
            spec: raw,
            bind_delay: script.bind_delay,
            inner,
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct ScriptedConnection {
    spec: String,
    bind_delay: Option<Duration>,
    inner: Arc<dyn StoreConnection>,
    counters: Arc<Mutex<Counters>>,
}

#[async_trait]
impl StoreConnection for ScriptedConnection {
    fn id(&self) -> ConnectionId {
        self.inner.id()
    }

    fn label(&self) -> &str {
        self.inner.label()
    }

    async fn bind_schema(&self, schema: &EntitySchema) -> anyhow::Result<Arc<dyn EntityStore>> {
        *self.counters.lock().binds.entry(self.spec.clone()).or_default() += 1;
        if let Some(delay) = self.bind_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.bind_schema(schema).await
    }

    async fn close(&self) -> anyhow::Result<()> {
        *self.counters.lock().closed.entry(self.spec.clone()).or_default() += 1;
        self.inner.close().await
    }
}
