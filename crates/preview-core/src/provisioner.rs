//! Schema provisioner
//!
//! Creates and drops the database schema backing a preview session. The
//! physical DDL lives outside this crate; `InMemorySchemaProvisioner` keeps a
//! set of live names and supports fault injection for tests and simulation.

use crate::error::ProvisionError;
use crate::types::SchemaName;
use async_trait::async_trait;
use dashmap::DashSet;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Schema-scoped database handle passed to seeders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaHandle {
    schema: SchemaName,
}

impl SchemaHandle {
    /// Handle scoped to `schema`
    #[inline]
    #[must_use]
    pub fn new(schema: SchemaName) -> Self {
        Self { schema }
    }

    /// Schema this handle is scoped to
    #[inline]
    #[must_use]
    pub fn schema(&self) -> &SchemaName {
        &self.schema
    }
}

/// Creates and drops preview schemas
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SchemaProvisioner: Send + Sync {
    /// Create an empty schema with all tables applied
    async fn provision_schema(&self, schema: &SchemaName) -> Result<SchemaHandle, ProvisionError>;

    /// Drop a schema; a no-op if it does not exist
    async fn drop_schema(&self, schema: &SchemaName) -> Result<(), ProvisionError>;
}

/// Provisioner that tracks schemas in memory
#[derive(Debug, Default)]
pub struct InMemorySchemaProvisioner {
    live: DashSet<SchemaName>,
    failing_drops: DashSet<SchemaName>,
    fail_all_drops: AtomicBool,
    fail_provisions: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
    latency: Mutex<Duration>,
    provisioned_total: AtomicUsize,
    dropped_total: AtomicUsize,
}

impl InMemorySchemaProvisioner {
    /// Create provisioner with no schemas
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` provision calls
    pub fn fail_next_provisions(&self, count: usize) {
        self.fail_provisions.store(count, Ordering::SeqCst);
    }

    /// Fail every drop of `schema`
    pub fn fail_drop_of(&self, schema: SchemaName) {
        self.failing_drops.insert(schema);
    }

    /// Fail every drop
    pub fn fail_all_drops(&self, fail: bool) {
        self.fail_all_drops.store(fail, Ordering::SeqCst);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Block provision calls until `resume_provisioning`
    pub fn pause_provisioning(&self) {
        let mut gate = self.gate.lock();
        if gate.is_none() {
            *gate = Some(Arc::new(Semaphore::new(0)));
        }
    }

    /// Release every blocked provision call
    pub fn resume_provisioning(&self) {
        if let Some(gate) = self.gate.lock().take() {
            gate.close();
        }
    }

    /// Whether `schema` currently exists
    #[must_use]
    pub fn exists(&self, schema: &SchemaName) -> bool {
        self.live.contains(schema)
    }

    /// Number of existing schemas
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Names of existing schemas
    #[must_use]
    pub fn live_schemas(&self) -> Vec<SchemaName> {
        let mut names: Vec<_> = self.live.iter().map(|s| s.key().clone()).collect();
        names.sort();
        names
    }

    /// Successful provisions so far
    #[must_use]
    pub fn provisioned_total(&self) -> usize {
        self.provisioned_total.load(Ordering::SeqCst)
    }

    /// Successful drops of existing schemas so far
    #[must_use]
    pub fn dropped_total(&self) -> usize {
        self.dropped_total.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn take_provision_failure(&self) -> bool {
        self.fail_provisions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SchemaProvisioner for InMemorySchemaProvisioner {
    async fn provision_schema(&self, schema: &SchemaName) -> Result<SchemaHandle, ProvisionError> {
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            // Closed on resume; the error is the release signal.
            let _ = gate.acquire().await;
        }
        self.simulate_latency().await;

        if self.take_provision_failure() {
            return Err(ProvisionError::CreateFailed {
                schema: schema.to_string(),
                message: "injected provision failure".to_string(),
            });
        }
        if !self.live.insert(schema.clone()) {
            return Err(ProvisionError::AlreadyExists(schema.to_string()));
        }
        self.provisioned_total.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(schema = %schema, "schema created");
        Ok(SchemaHandle::new(schema.clone()))
    }

    async fn drop_schema(&self, schema: &SchemaName) -> Result<(), ProvisionError> {
        self.simulate_latency().await;

        if self.fail_all_drops.load(Ordering::SeqCst) || self.failing_drops.contains(schema) {
            return Err(ProvisionError::DropFailed {
                schema: schema.to_string(),
                message: "injected drop failure".to_string(),
            });
        }
        if self.live.remove(schema).is_some() {
            self.dropped_total.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(schema = %schema, "schema dropped");
        }
        Ok(())
    }
}
