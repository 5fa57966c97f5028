//! Preview Lifecycle Orchestrator
//!
//! The single authority for status transitions of a `PreviewSession`:
//! - Creates sessions and kicks off provisioning off the request path
//! - Provisions and seeds one schema per session
//! - Records visitor access
//! - Reclaims expired, idle and stuck sessions
//!
//! Every status write goes through a registry compare-and-set on the exact
//! status the orchestrator expects, so provisioning and sweeps never
//! overwrite each other's transitions.

use crate::clock::{Clock, SystemClock};
use crate::config::PreviewConfig;
use crate::error::{PreviewError, ValidationError};
use crate::provisioner::SchemaProvisioner;
use crate::registry::{SessionFilter, SessionRegistry, StatusUpdate};
use crate::seeding::{SeedSummary, SeedingComposer};
use crate::settle::{drop_schemas, DropReport};
use crate::state_machine::validate_transition;
use crate::types::{
    is_slug, AccessTelemetry, CreateSessionRequest, FeatureSet, PreviewSession, RecordId,
    SchemaName, SchemaStatus, SessionId, SessionView, Tier,
};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Result of a reclamation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimOutcome {
    /// Rows deleted (TTL pass) or marked dropped (idle pass)
    pub reclaimed: usize,
    /// Per-schema drop outcomes
    pub drops: DropReport,
}

/// Handle to a spawned provisioning flow
///
/// Dropping the handle does not cancel provisioning.
#[derive(Debug)]
pub struct ProvisioningHandle {
    task: JoinHandle<Result<SchemaStatus, PreviewError>>,
}

impl ProvisioningHandle {
    /// Wait for provisioning to settle
    ///
    /// # Errors
    /// The provisioning failure, or `PreviewError::TaskAborted` if the task
    /// panicked
    pub async fn wait(self) -> Result<SchemaStatus, PreviewError> {
        match self.task.await {
            Ok(result) => result,
            Err(join_error) => Err(PreviewError::TaskAborted(join_error.to_string())),
        }
    }

    /// Whether the flow has settled
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// A session just created
#[derive(Debug)]
pub struct CreatedSession {
    /// Public token for the frontend
    pub session_id: SessionId,
    /// Provisioning in flight
    pub provisioning: ProvisioningHandle,
}

/// The lifecycle orchestrator
///
/// Cheap to clone; clones share collaborators.
#[derive(Clone)]
pub struct PreviewOrchestrator {
    config: Arc<PreviewConfig>,
    registry: Arc<dyn SessionRegistry>,
    provisioner: Arc<dyn SchemaProvisioner>,
    composer: Arc<SeedingComposer>,
    clock: Arc<dyn Clock>,
}

impl PreviewOrchestrator {
    /// Create orchestrator on the system clock
    pub fn new(
        config: PreviewConfig,
        registry: Arc<dyn SessionRegistry>,
        provisioner: Arc<dyn SchemaProvisioner>,
        composer: SeedingComposer,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            provisioner,
            composer: Arc::new(composer),
            clock: Arc::new(SystemClock),
        }
    }

    /// With clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Create a session and start provisioning it in the background
    ///
    /// Returns as soon as the row is stored.
    ///
    /// # Errors
    /// - `PreviewError::Validation` for a bad tier, template or feature set
    /// - `PreviewError::Config` if the TTL pushes expiry past the calendar
    /// - `PreviewError::Registry` if the row cannot be stored
    pub async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CreatedSession, PreviewError> {
        let tier = Tier::parse(request.tier)?;
        let features = FeatureSet::parse(request.features, self.config.max_features)?;
        if let Some(template) = &request.template_id {
            if !is_slug(template, true) {
                return Err(ValidationError::InvalidTemplate(template.clone()).into());
            }
        }

        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(self.config.session_ttl())
            .ok_or_else(|| {
                PreviewError::Config(format!(
                    "session_ttl_secs ({}) overflows the expiry timestamp",
                    self.config.session_ttl_secs
                ))
            })?;
        let session = PreviewSession::new(tier, request.template_id, features, now, expires_at);
        let (record_id, session_id) = (session.id, session.session_id);
        info!(
            session_id = %session_id,
            tier = %session.tier,
            features = session.selected_features.len(),
            "creating preview session"
        );
        self.registry.insert(session).await?;

        let this = self.clone();
        let task = tokio::spawn(async move { this.begin_provisioning(record_id).await });

        Ok(CreatedSession {
            session_id,
            provisioning: ProvisioningHandle { task },
        })
    }

    /// Provision and seed the schema of a `None`-status session
    ///
    /// Returns `Ready` on success. On failure the session is left `Failed`,
    /// a best-effort drop is attempted, and the cause is returned.
    ///
    /// # Errors
    /// - `PreviewError::AlreadyProvisioning` if the session has left `None`,
    ///   terminal sessions included
    /// - `PreviewError::Provision` / `PreviewError::Seeding` on failure
    /// - `PreviewError::TaskAborted` if provisioning or a seeder panicked;
    ///   the session is failed and the schema dropped as for any failure
    /// - `PreviewError::ProvisioningSuperseded` if a sweep changed the row
    ///   before completion
    #[instrument(skip(self))]
    pub async fn begin_provisioning(&self, id: RecordId) -> Result<SchemaStatus, PreviewError> {
        let session = self
            .registry
            .get_record(id)
            .await?
            .ok_or_else(|| PreviewError::SessionNotFound(id.to_string()))?;

        if session.schema_status != SchemaStatus::None {
            debug!(status = %session.schema_status, "provisioning already attempted");
            return Err(PreviewError::AlreadyProvisioning(session.session_id.to_string()));
        }

        let schema = SchemaName::generate(&self.config.schema_prefix)?;
        let claimed = self
            .registry
            .transition(id, SchemaStatus::None, StatusUpdate::provisioning(schema.clone()))
            .await?;
        if !claimed {
            return Err(PreviewError::AlreadyProvisioning(session.session_id.to_string()));
        }
        info!(session_id = %session.session_id, schema = %schema, "provisioning started");

        let outcome = AssertUnwindSafe(self.provision_and_seed(&schema, &session.selected_features))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(PreviewError::TaskAborted(panic_message(&*panic))));
        match outcome {
            Ok(summary) => self.complete(&session, schema, summary).await,
            Err(error) => {
                self.fail(&session, &schema, &error).await;
                Err(error)
            }
        }
    }

    async fn provision_and_seed(
        &self,
        schema: &SchemaName,
        features: &FeatureSet,
    ) -> Result<SeedSummary, PreviewError> {
        let handle = self.provisioner.provision_schema(schema).await?;
        Ok(self.composer.seed(&handle, features).await?)
    }

    async fn complete(
        &self,
        session: &PreviewSession,
        schema: SchemaName,
        summary: SeedSummary,
    ) -> Result<SchemaStatus, PreviewError> {
        match self
            .registry
            .transition(session.id, SchemaStatus::Provisioning, StatusUpdate::ready())
            .await
        {
            Ok(true) => {
                info!(
                    session_id = %session.session_id,
                    schema = %schema,
                    modules = ?summary.modules,
                    "preview ready"
                );
                Ok(SchemaStatus::Ready)
            }
            Ok(false) => {
                // A sweep failed or deleted the row while we worked; the
                // schema is ours alone to clean up.
                warn!(
                    session_id = %session.session_id,
                    schema = %schema,
                    "session changed during provisioning; dropping schema"
                );
                self.best_effort_drop(&schema).await;
                Err(PreviewError::ProvisioningSuperseded {
                    session_id: session.session_id.to_string(),
                })
            }
            Err(error) => {
                let error = PreviewError::from(error);
                self.fail(session, &schema, &error).await;
                Err(error)
            }
        }
    }

    async fn fail(&self, session: &PreviewSession, schema: &SchemaName, error: &PreviewError) {
        warn!(
            session_id = %session.session_id,
            schema = %schema,
            error = %error,
            "provisioning failed"
        );
        match self
            .registry
            .transition(session.id, SchemaStatus::Provisioning, StatusUpdate::failed())
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!(session_id = %session.session_id, "session already left provisioning"),
            Err(e) => warn!(session_id = %session.session_id, error = %e, "could not mark session failed"),
        }
        self.best_effort_drop(schema).await;
    }

    async fn best_effort_drop(&self, schema: &SchemaName) {
        if let Err(error) = self.provisioner.drop_schema(schema).await {
            warn!(schema = %schema, error = %error, "cleanup drop failed; schema may be orphaned");
        }
    }

    /// Record a visitor request against a session
    ///
    /// Only touches `last_accessed_at` and telemetry counters.
    ///
    /// # Errors
    /// - `PreviewError::SessionNotFound` if the session does not exist
    /// - `PreviewError::Registry` on store failure
    pub async fn record_access(
        &self,
        session_id: SessionId,
        telemetry: AccessTelemetry,
    ) -> Result<(), PreviewError> {
        let touched = self
            .registry
            .touch(session_id, self.clock.now(), telemetry)
            .await?;
        if touched {
            Ok(())
        } else {
            Err(PreviewError::SessionNotFound(session_id.to_string()))
        }
    }

    /// Current view of a session, for frontend polling
    ///
    /// # Errors
    /// `PreviewError::Registry` on store failure
    pub async fn session(&self, session_id: SessionId) -> Result<Option<SessionView>, PreviewError> {
        Ok(self.registry.get(session_id).await?.map(|s| s.view()))
    }

    /// Hard-TTL pass: drop schemas of expired sessions, then delete every
    /// expired row whatever the drop outcomes
    ///
    /// # Errors
    /// `PreviewError::Registry` if the query or delete fails
    #[instrument(skip(self))]
    pub async fn reclaim_expired(&self) -> Result<ReclaimOutcome, PreviewError> {
        let now = self.clock.now();
        let expired = self.registry.find(&SessionFilter::expired(now)).await?;
        if expired.is_empty() {
            return Ok(ReclaimOutcome::default());
        }

        let targets = expired
            .iter()
            .filter(|s| s.schema_status.holds_schema())
            .filter_map(|s| s.schema_name.clone().map(|name| (s.id, name)))
            .collect();
        let drops = drop_schemas(Arc::clone(&self.provisioner), targets).await;

        // Metadata goes even when a drop failed; orphans are audited
        // out of band.
        let ids: Vec<RecordId> = expired.iter().map(|s| s.id).collect();
        let reclaimed = self.registry.delete_many(&ids).await?;

        info!(
            reclaimed,
            dropped = drops.dropped.len(),
            drop_failures = drops.failed.len(),
            "expired sessions reclaimed"
        );
        Ok(ReclaimOutcome { reclaimed, drops })
    }

    /// Idle pass: drop schemas of ready sessions idle past the timeout and
    /// mark them `Dropped`, keeping the rows
    ///
    /// # Errors
    /// `PreviewError::Registry` if the query or update fails
    #[instrument(skip(self))]
    pub async fn reclaim_idle(&self) -> Result<ReclaimOutcome, PreviewError> {
        validate_transition(SchemaStatus::Ready, SchemaStatus::Dropped)?;
        let cutoff = self.clock.now() - self.config.idle_timeout();
        let idle = self.registry.find(&SessionFilter::idle(cutoff)).await?;
        if idle.is_empty() {
            return Ok(ReclaimOutcome::default());
        }

        let targets = idle
            .iter()
            .filter_map(|s| s.schema_name.clone().map(|name| (s.id, name)))
            .collect();
        let drops = drop_schemas(Arc::clone(&self.provisioner), targets).await;

        let ids: Vec<RecordId> = idle.iter().map(|s| s.id).collect();
        let reclaimed = self
            .registry
            .update_many(&ids, SchemaStatus::Ready, StatusUpdate::dropped())
            .await?;

        info!(
            reclaimed,
            dropped = drops.dropped.len(),
            drop_failures = drops.failed.len(),
            "idle sessions reclaimed"
        );
        Ok(ReclaimOutcome { reclaimed, drops })
    }

    /// Stuck pass: force sessions provisioning for longer than the
    /// threshold to `Failed`
    ///
    /// No drop is attempted here. The provisioning flow that owns the
    /// schema drops it when its guarded completion is rejected.
    ///
    /// # Errors
    /// `PreviewError::Registry` if the query or update fails
    #[instrument(skip(self))]
    pub async fn fail_stuck_provisioning(&self) -> Result<usize, PreviewError> {
        validate_transition(SchemaStatus::Provisioning, SchemaStatus::Failed)?;
        let cutoff = self.clock.now() - self.config.stuck_threshold();
        let stuck = self.registry.find(&SessionFilter::stuck(cutoff)).await?;
        if stuck.is_empty() {
            return Ok(0);
        }

        let ids: Vec<RecordId> = stuck.iter().map(|s| s.id).collect();
        let failed = self
            .registry
            .update_many(&ids, SchemaStatus::Provisioning, StatusUpdate::failed())
            .await?;

        if failed > 0 {
            warn!(failed, "stuck provisioning sessions marked failed");
        }
        Ok(failed)
    }

    /// Get configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PreviewConfig {
        &self.config
    }

    /// Get composer
    #[inline]
    #[must_use]
    pub fn composer(&self) -> &SeedingComposer {
        &self.composer
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "provisioning panicked".to_string()
    }
}

impl std::fmt::Debug for PreviewOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewOrchestrator")
            .field("config", &self.config)
            .field("composer", &self.composer)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ProvisionError;
    use crate::provisioner::{InMemorySchemaProvisioner, MockSchemaProvisioner, SchemaHandle};
    use crate::registry::InMemorySessionRegistry;
    use crate::seeding::FnSeeder;

    fn composer() -> SeedingComposer {
        SeedingComposer::new(Arc::new(FnSeeder::noop("core")))
            .with_module(Arc::new(FnSeeder::noop("lms")))
    }

    fn orchestrator(
        registry: Arc<InMemorySessionRegistry>,
        provisioner: Arc<dyn SchemaProvisioner>,
    ) -> PreviewOrchestrator {
        PreviewOrchestrator::new(PreviewConfig::default(), registry, provisioner, composer())
            .with_clock(Arc::new(ManualClock::default()))
    }

    #[tokio::test]
    async fn create_session_validates_before_writing() {
        let registry = Arc::new(InMemorySessionRegistry::new());
        let orch = orchestrator(registry.clone(), Arc::new(InMemorySchemaProvisioner::new()));

        let too_many: Vec<String> = (0..33).map(|i| format!("lms.f{i}")).collect();
        let err = orch
            .create_session(CreateSessionRequest::new("pro", too_many))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PreviewError::Validation(ValidationError::TooManyFeatures { count: 33, max: 32 })
        ));

        let err = orch
            .create_session(CreateSessionRequest::new("pro", ["lms"]).with_template("../etc"))
            .await
            .unwrap_err();
        assert!(matches!(err, PreviewError::Validation(ValidationError::InvalidTemplate(_))));

        assert_eq!(registry.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn expires_at_is_creation_plus_ttl() {
        let registry = Arc::new(InMemorySessionRegistry::new());
        let orch = orchestrator(registry.clone(), Arc::new(InMemorySchemaProvisioner::new()));

        let created = orch
            .create_session(CreateSessionRequest::new("pro", ["lms.courses"]))
            .await
            .unwrap();
        created.provisioning.wait().await.unwrap();

        let row = registry.get(created.session_id).await.unwrap().unwrap();
        assert_eq!(row.expires_at - row.created_at, chrono::Duration::hours(2));
    }

    #[tokio::test]
    async fn provision_error_marks_failed_and_cleans_up() {
        let mut mock = MockSchemaProvisioner::new();
        mock.expect_provision_schema().times(1).returning(|schema| {
            Err(ProvisionError::CreateFailed {
                schema: schema.to_string(),
                message: "permission denied".into(),
            })
        });
        mock.expect_drop_schema().times(1).returning(|_| Ok(()));

        let registry = Arc::new(InMemorySessionRegistry::new());
        let orch = orchestrator(registry.clone(), Arc::new(mock));

        let created = orch
            .create_session(CreateSessionRequest::new("pro", ["lms"]))
            .await
            .unwrap();
        let err = created.provisioning.wait().await.unwrap_err();
        assert!(matches!(err, PreviewError::Provision(_)));

        let view = orch.session(created.session_id).await.unwrap().unwrap();
        assert_eq!(view.status, SchemaStatus::Failed);
        assert!(view.schema_name.is_none());
        assert!(view.needs_new_session());
    }

    #[tokio::test]
    async fn cleanup_drop_failure_is_not_escalated() {
        let mut mock = MockSchemaProvisioner::new();
        mock.expect_provision_schema()
            .returning(|schema| Ok(SchemaHandle::new(schema.clone())));
        mock.expect_drop_schema().returning(|schema| {
            Err(ProvisionError::DropFailed {
                schema: schema.to_string(),
                message: "connection reset".into(),
            })
        });

        let registry = Arc::new(InMemorySessionRegistry::new());
        let composer = SeedingComposer::new(Arc::new(FnSeeder::new("core", |_| {
            Box::pin(async { Err(crate::error::SeedError::seeder("core", "no admin")) })
        })));
        let orch = PreviewOrchestrator::new(
            PreviewConfig::default(),
            registry.clone(),
            Arc::new(mock),
            composer,
        );

        let created = orch
            .create_session(CreateSessionRequest::new("pro", Vec::<String>::new()))
            .await
            .unwrap();
        // The seeding error surfaces, not the cleanup drop error
        let err = created.provisioning.wait().await.unwrap_err();
        assert!(matches!(err, PreviewError::Seeding(_)));

        let row = registry.get(created.session_id).await.unwrap().unwrap();
        assert_eq!(row.schema_status, SchemaStatus::Failed);
    }

    #[tokio::test]
    async fn seeder_panic_fails_session_and_drops_schema() {
        let registry = Arc::new(InMemorySessionRegistry::new());
        let provisioner = Arc::new(InMemorySchemaProvisioner::new());
        let composer = SeedingComposer::new(Arc::new(FnSeeder::noop("core"))).with_module(
            Arc::new(FnSeeder::new("lms", |_| {
                Box::pin(async {
                    let fixtures: Option<()> = None;
                    fixtures.expect("lms fixtures missing");
                    Ok(())
                })
            })),
        );
        let orch = PreviewOrchestrator::new(
            PreviewConfig::default(),
            registry.clone(),
            provisioner.clone(),
            composer,
        );

        let created = orch
            .create_session(CreateSessionRequest::new("pro", ["lms.courses"]))
            .await
            .unwrap();
        let err = created.provisioning.wait().await.unwrap_err();
        assert!(matches!(&err, PreviewError::TaskAborted(msg) if msg.contains("lms fixtures missing")));
        assert!(err.is_provisioning_failure());

        let row = registry.get(created.session_id).await.unwrap().unwrap();
        assert_eq!(row.schema_status, SchemaStatus::Failed);
        assert!(row.schema_name.is_none());
        assert_eq!(provisioner.live_count(), 0);
    }

    #[tokio::test]
    async fn expiry_overflow_is_a_config_error() {
        let registry = Arc::new(InMemorySessionRegistry::new());
        let end_of_time = chrono::DateTime::<chrono::Utc>::MAX_UTC - chrono::Duration::hours(1);
        let config =
            PreviewConfig::default().with_session_ttl(std::time::Duration::from_secs(u64::MAX));
        let orch = PreviewOrchestrator::new(
            config,
            registry.clone(),
            Arc::new(InMemorySchemaProvisioner::new()),
            composer(),
        )
        .with_clock(Arc::new(ManualClock::new(end_of_time)));

        let err = orch
            .create_session(CreateSessionRequest::new("pro", ["lms"]))
            .await
            .unwrap_err();
        assert!(matches!(err, PreviewError::Config(_)));
        assert_eq!(registry.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn record_access_unknown_session() {
        let orch = orchestrator(
            Arc::new(InMemorySessionRegistry::new()),
            Arc::new(InMemorySchemaProvisioner::new()),
        );
        let err = orch
            .record_access(SessionId::new(), AccessTelemetry::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PreviewError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn begin_provisioning_rejects_terminal_session() {
        let registry = Arc::new(InMemorySessionRegistry::new());
        let orch = orchestrator(registry.clone(), Arc::new(InMemorySchemaProvisioner::new()));

        let now = chrono::Utc::now();
        let mut session = PreviewSession::new(
            Tier::parse("pro").unwrap(),
            None,
            FeatureSet::default(),
            now,
            now + chrono::Duration::hours(2),
        );
        session.schema_status = SchemaStatus::Dropped;
        let id = session.id;
        registry.insert(session).await.unwrap();

        let err = orch.begin_provisioning(id).await.unwrap_err();
        assert!(matches!(err, PreviewError::AlreadyProvisioning(_)));

        let err = orch.begin_provisioning(RecordId::new()).await.unwrap_err();
        assert!(matches!(err, PreviewError::SessionNotFound(_)));
    }
}
