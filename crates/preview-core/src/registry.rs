//! Session registry
//!
//! Durable store of `PreviewSession` rows. The registry is the single point
//! of coordination between request-path access touches and sweep-path
//! status changes, so every status write is guarded on the status the
//! writer expects to find.

use crate::error::RegistryError;
use crate::types::{AccessTelemetry, PreviewSession, RecordId, SchemaName, SchemaStatus, SessionId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Predicate over session rows
///
/// Unset fields match everything. Time bounds are strict.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFilter {
    /// `expires_at < t`
    pub expires_before: Option<DateTime<Utc>>,
    /// `last_accessed_at < t`
    pub last_accessed_before: Option<DateTime<Utc>>,
    /// `created_at < t`
    pub created_before: Option<DateTime<Utc>>,
    /// `schema_status` in set
    pub statuses: Option<Vec<SchemaStatus>>,
}

impl SessionFilter {
    /// Every session past its hard TTL, whatever its status
    #[must_use]
    pub fn expired(now: DateTime<Utc>) -> Self {
        Self {
            expires_before: Some(now),
            ..Self::default()
        }
    }

    /// Ready sessions not touched since `cutoff`
    #[must_use]
    pub fn idle(cutoff: DateTime<Utc>) -> Self {
        Self {
            last_accessed_before: Some(cutoff),
            statuses: Some(vec![SchemaStatus::Ready]),
            ..Self::default()
        }
    }

    /// Sessions still provisioning that were created before `cutoff`
    #[must_use]
    pub fn stuck(cutoff: DateTime<Utc>) -> Self {
        Self {
            created_before: Some(cutoff),
            statuses: Some(vec![SchemaStatus::Provisioning]),
            ..Self::default()
        }
    }

    /// Restrict to statuses
    #[must_use]
    pub fn with_statuses(mut self, statuses: impl Into<Vec<SchemaStatus>>) -> Self {
        self.statuses = Some(statuses.into());
        self
    }

    /// Evaluate against a row
    #[must_use]
    pub fn matches(&self, session: &PreviewSession) -> bool {
        self.expires_before.map_or(true, |t| session.expires_at < t)
            && self
                .last_accessed_before
                .map_or(true, |t| session.last_accessed_at < t)
            && self.created_before.map_or(true, |t| session.created_at < t)
            && self
                .statuses
                .as_ref()
                .map_or(true, |s| s.contains(&session.schema_status))
    }
}

/// What happens to `schema_name` on a status write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaNameUpdate {
    /// Leave as is
    Keep,
    /// Assign
    Set(SchemaName),
    /// Null out
    Clear,
}

/// Status write applied by `transition` and `update_many`
///
/// Constructors pair each status with the schema-name change that keeps
/// `schema_name` present exactly while provisioning or ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    /// New status
    pub status: SchemaStatus,
    /// Schema name change
    pub schema_name: SchemaNameUpdate,
}

impl StatusUpdate {
    /// Start provisioning into `schema`
    #[must_use]
    pub fn provisioning(schema: SchemaName) -> Self {
        Self {
            status: SchemaStatus::Provisioning,
            schema_name: SchemaNameUpdate::Set(schema),
        }
    }

    /// Provisioning completed
    #[must_use]
    pub fn ready() -> Self {
        Self {
            status: SchemaStatus::Ready,
            schema_name: SchemaNameUpdate::Keep,
        }
    }

    /// Provisioning failed or stalled
    #[must_use]
    pub fn failed() -> Self {
        Self {
            status: SchemaStatus::Failed,
            schema_name: SchemaNameUpdate::Clear,
        }
    }

    /// Schema reclaimed, row retained
    #[must_use]
    pub fn dropped() -> Self {
        Self {
            status: SchemaStatus::Dropped,
            schema_name: SchemaNameUpdate::Clear,
        }
    }

    /// Apply to a row
    pub fn apply(&self, session: &mut PreviewSession) {
        session.schema_status = self.status;
        match &self.schema_name {
            SchemaNameUpdate::Keep => {}
            SchemaNameUpdate::Set(name) => session.schema_name = Some(name.clone()),
            SchemaNameUpdate::Clear => session.schema_name = None,
        }
    }
}

/// Store of preview session rows
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Insert a new row
    async fn insert(&self, session: PreviewSession) -> Result<(), RegistryError>;

    /// Look up by public token
    async fn get(&self, session_id: SessionId) -> Result<Option<PreviewSession>, RegistryError>;

    /// Look up by internal id
    async fn get_record(&self, id: RecordId) -> Result<Option<PreviewSession>, RegistryError>;

    /// All rows matching `filter`
    async fn find(&self, filter: &SessionFilter) -> Result<Vec<PreviewSession>, RegistryError>;

    /// Apply `update` if the row is still in `expected`
    ///
    /// Returns `false` when the row is gone or in another status.
    async fn transition(
        &self,
        id: RecordId,
        expected: SchemaStatus,
        update: StatusUpdate,
    ) -> Result<bool, RegistryError>;

    /// Apply `update` to every listed row still in `expected`
    ///
    /// Returns the number of rows updated.
    async fn update_many(
        &self,
        ids: &[RecordId],
        expected: SchemaStatus,
        update: StatusUpdate,
    ) -> Result<usize, RegistryError>;

    /// Delete listed rows, returning how many existed
    async fn delete_many(&self, ids: &[RecordId]) -> Result<usize, RegistryError>;

    /// Record an access; never changes status
    ///
    /// Returns `false` if no such session exists.
    async fn touch(
        &self,
        session_id: SessionId,
        at: DateTime<Utc>,
        telemetry: AccessTelemetry,
    ) -> Result<bool, RegistryError>;

    /// Number of rows
    async fn count(&self) -> Result<usize, RegistryError>;
}

/// In-process registry backed by `DashMap`
///
/// Row-level locking comes from the map shards, which makes `transition`
/// an atomic compare-and-set per row. `set_unavailable` simulates an
/// outage: every call fails with `RegistryError::Unavailable`.
#[derive(Debug, Default)]
pub struct InMemorySessionRegistry {
    rows: DashMap<RecordId, PreviewSession>,
    by_token: DashMap<SessionId, RecordId>,
    unavailable: AtomicBool,
}

impl InMemorySessionRegistry {
    /// Create empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle simulated outage
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of all rows
    #[must_use]
    pub fn snapshot(&self) -> Vec<PreviewSession> {
        self.rows.iter().map(|r| r.value().clone()).collect()
    }

    /// Mutate a row directly, bypassing status guards
    ///
    /// Returns `false` if the row does not exist.
    pub fn modify(&self, session_id: SessionId, f: impl FnOnce(&mut PreviewSession)) -> bool {
        let Some(id) = self.by_token.get(&session_id).map(|r| *r.value()) else {
            return false;
        };
        match self.rows.get_mut(&id) {
            Some(mut row) => {
                f(row.value_mut());
                true
            }
            None => false,
        }
    }

    fn check(&self) -> Result<(), RegistryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RegistryError::Unavailable("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }

    fn guarded_update(&self, id: RecordId, expected: SchemaStatus, update: &StatusUpdate) -> bool {
        match self.rows.get_mut(&id) {
            Some(mut row) if row.schema_status == expected => {
                update.apply(row.value_mut());
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl SessionRegistry for InMemorySessionRegistry {
    async fn insert(&self, session: PreviewSession) -> Result<(), RegistryError> {
        self.check()?;
        if self.by_token.contains_key(&session.session_id) {
            return Err(RegistryError::DuplicateSession(session.session_id.to_string()));
        }
        self.by_token.insert(session.session_id, session.id);
        self.rows.insert(session.id, session);
        Ok(())
    }

    async fn get(&self, session_id: SessionId) -> Result<Option<PreviewSession>, RegistryError> {
        self.check()?;
        let Some(id) = self.by_token.get(&session_id).map(|r| *r.value()) else {
            return Ok(None);
        };
        Ok(self.rows.get(&id).map(|r| r.value().clone()))
    }

    async fn get_record(&self, id: RecordId) -> Result<Option<PreviewSession>, RegistryError> {
        self.check()?;
        Ok(self.rows.get(&id).map(|r| r.value().clone()))
    }

    async fn find(&self, filter: &SessionFilter) -> Result<Vec<PreviewSession>, RegistryError> {
        self.check()?;
        let mut found: Vec<PreviewSession> = self
            .rows
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        found.sort_by_key(|s| s.id);
        Ok(found)
    }

    async fn transition(
        &self,
        id: RecordId,
        expected: SchemaStatus,
        update: StatusUpdate,
    ) -> Result<bool, RegistryError> {
        self.check()?;
        Ok(self.guarded_update(id, expected, &update))
    }

    async fn update_many(
        &self,
        ids: &[RecordId],
        expected: SchemaStatus,
        update: StatusUpdate,
    ) -> Result<usize, RegistryError> {
        self.check()?;
        Ok(ids
            .iter()
            .filter(|id| self.guarded_update(**id, expected, &update))
            .count())
    }

    async fn delete_many(&self, ids: &[RecordId]) -> Result<usize, RegistryError> {
        self.check()?;
        let mut deleted = 0;
        for id in ids {
            if let Some((_, session)) = self.rows.remove(id) {
                self.by_token.remove(&session.session_id);
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn touch(
        &self,
        session_id: SessionId,
        at: DateTime<Utc>,
        telemetry: AccessTelemetry,
    ) -> Result<bool, RegistryError> {
        self.check()?;
        Ok(self.modify(session_id, |row| {
            row.last_accessed_at = at;
            row.page_views = row.page_views.saturating_add(telemetry.page_views);
            row.duration_secs = row.duration_secs.saturating_add(telemetry.duration_secs);
        }))
    }

    async fn count(&self) -> Result<usize, RegistryError> {
        self.check()?;
        Ok(self.rows.len())
    }
}
